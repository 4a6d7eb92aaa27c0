// Copyright (C) 2023-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! IPFIX (RFC 7011) collector core.
//!
//! An IPFIX exporter intermixes template records, which describe the shape of
//! subsequent data records, and the data records themselves. This crate
//! maintains per-exporter template state, compiles each template into a
//! decoding sequencer, and executes that sequencer over incoming data records
//! to produce fixed-layout flow records with sampling correction, time-stamp
//! normalization and ICMP fix-ups. Records are appended to a caller-owned
//! [`FlowSource`](sink::FlowSource) sink.
//!
//! The two entry points are [`IpfixDecoder::new`](decoder::IpfixDecoder::new)
//! and [`IpfixDecoder::process_packet`](decoder::IpfixDecoder::process_packet).
//! UDP reception, file rotation and the display pipeline are the caller's
//! business.

pub mod decoder;
pub mod exporter;
pub mod extension;
pub mod ie;
pub mod ipfix;
pub mod options;
pub mod record;
pub mod sequencer;
pub mod sink;
pub mod template;
pub mod wire;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

pub use crate::{
    decoder::{DecoderConfig, IpfixDecoder},
    sink::FlowSource,
};

/// Private Enterprise Number of IPFIX reverse information elements
/// ([RFC 5103](https://www.rfc-editor.org/rfc/rfc5103)). A field carrying
/// this PEN re-interprets its element with forward/reverse roles swapped.
pub const REVERSE_INFORMATION_ELEMENT_PEN: u32 = 29305;

/// Private Enterprise Number of the CERT Coordination Centre (yaf). Fields
/// carrying it are dropped; see [`crate::template`].
pub const CERT_PEN: u32 = 6871;

/// Field Specifier
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |E|  Information Element ident. |        Field Length           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Enterprise Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The enterprise number is only present on the wire when the high bit of the
/// 16-bit element identifier is set; `enterprise_number == 0` means a
/// standard (IANA) element.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct FieldSpecifier {
    element_id: u16,
    length: u16,
    enterprise_number: u32,
}

impl FieldSpecifier {
    pub const fn new(element_id: u16, length: u16, enterprise_number: u32) -> Self {
        Self {
            element_id,
            length,
            enterprise_number,
        }
    }

    pub const fn element_id(&self) -> u16 {
        self.element_id
    }

    pub const fn length(&self) -> u16 {
        self.length
    }

    pub const fn enterprise_number(&self) -> u32 {
        self.enterprise_number
    }
}
