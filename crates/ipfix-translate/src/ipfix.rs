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

//! IPFIX message structures as they appear on the wire.

use serde::{Deserialize, Serialize};

use crate::FieldSpecifier;

pub const IPFIX_VERSION: u16 = 10;

/// 2-octets version, 2-octets length, 4-octets * 3 (export time, seq no,
/// observation domain id)
pub const IPFIX_HEADER_LENGTH: u16 = 16;

/// A value of 2 is reserved for Template Sets
pub const IPFIX_TEMPLATE_SET_ID: u16 = 2;

/// A value of 3 is reserved for Options Template Sets
pub const IPFIX_OPTIONS_TEMPLATE_SET_ID: u16 = 3;

/// Values 256 and above are used for Data Sets
pub const DATA_SET_MIN_ID: u16 = 256;

/// IPFIX Message Header.
///
/// ```text
/// 0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Version Number          |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Export Time                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Sequence Number                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Observation Domain ID                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    version: u16,
    length: u16,
    export_time: u32,
    sequence_number: u32,
    observation_domain_id: u32,
}

impl MessageHeader {
    pub const fn new(
        length: u16,
        export_time: u32,
        sequence_number: u32,
        observation_domain_id: u32,
    ) -> Self {
        Self {
            version: IPFIX_VERSION,
            length,
            export_time,
            sequence_number,
            observation_domain_id,
        }
    }

    pub const fn version(&self) -> u16 {
        self.version
    }

    /// Total length of the IPFIX message in octets, including this header.
    pub const fn length(&self) -> u16 {
        self.length
    }

    /// Time at which the message left the exporter, in seconds since the UNIX
    /// epoch.
    pub const fn export_time(&self) -> u32 {
        self.export_time
    }

    /// Incremental counter modulo 2^32 of all data records sent from the
    /// current observation domain. Template and options-template records do
    /// not increase it.
    pub const fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub const fn observation_domain_id(&self) -> u32 {
        self.observation_domain_id
    }
}

/// Common header of every Set.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Set ID               |          Length               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct SetHeader {
    id: u16,
    length: u16,
}

impl SetHeader {
    pub const fn new(id: u16, length: u16) -> Self {
        Self { id, length }
    }

    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Total length of the set in octets, including the 4-octet set header
    /// and any padding.
    pub const fn length(&self) -> u16 {
        self.length
    }
}

/// Template Record. A field count of zero is a template withdrawal
/// ([RFC 7011 section 8.1](https://www.rfc-editor.org/rfc/rfc7011#section-8.1));
/// a withdrawal whose id equals [`IPFIX_TEMPLATE_SET_ID`] withdraws every
/// template of the observation domain.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Template ID (> 255)      |         Field Count           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    id: u16,
    field_specifiers: Box<[FieldSpecifier]>,
}

impl TemplateRecord {
    pub const fn new(id: u16, field_specifiers: Box<[FieldSpecifier]>) -> Self {
        Self {
            id,
            field_specifiers,
        }
    }

    pub const fn id(&self) -> u16 {
        self.id
    }

    pub const fn field_specifiers(&self) -> &[FieldSpecifier] {
        &self.field_specifiers
    }

    pub fn is_withdrawal(&self) -> bool {
        self.field_specifiers.is_empty()
    }

    /// Bytes one data record of this template occupies on the wire.
    /// Variable-length fields contribute only their smallest possible
    /// encoding (the single length octet).
    pub fn wire_record_length(&self) -> usize {
        self.field_specifiers
            .iter()
            .map(|f| {
                if f.length() == crate::template::VARIABLE_LENGTH {
                    1
                } else {
                    f.length() as usize
                }
            })
            .sum()
    }
}

/// Options Template Record.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Template ID (> 255)   |         Field Count           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Scope Field Count        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct OptionsTemplateRecord {
    id: u16,
    scope_field_specifiers: Box<[FieldSpecifier]>,
    field_specifiers: Box<[FieldSpecifier]>,
}

impl OptionsTemplateRecord {
    pub const fn new(
        id: u16,
        scope_field_specifiers: Box<[FieldSpecifier]>,
        field_specifiers: Box<[FieldSpecifier]>,
    ) -> Self {
        Self {
            id,
            scope_field_specifiers,
            field_specifiers,
        }
    }

    pub const fn id(&self) -> u16 {
        self.id
    }

    pub const fn scope_field_specifiers(&self) -> &[FieldSpecifier] {
        &self.scope_field_specifiers
    }

    pub const fn field_specifiers(&self) -> &[FieldSpecifier] {
        &self.field_specifiers
    }
}
