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

//! The collector's internal flow-record layout.
//!
//! Every translated data record is one variable-size block in this layout: a
//! 32-byte fixed part followed by the extensions enumerated by the record's
//! extension map. Multi-byte fields are little-endian and may sit on any byte
//! boundary, so all access goes through explicitly unaligned reads/writes.
//!
//! ```text
//!  0  u16 type            2  u16 size           4  u8 flags    5  u8 nfversion
//!  6  u16 ext_map         8  u16 msec_first    10  u16 msec_last
//! 12  u32 first          16  u32 last          20  u8 fwd_status
//! 21  u8 tcp_flags       22  u8 prot           23  u8 tos
//! 24  u16 src_port       26  u16 dst_port      28  u16 exporter_sysid
//! 30  u8 biflow_dir      31  u8 flow_end_reason
//! 32  extension data ...
//! ```

use byteorder::{ByteOrder, LittleEndian};

// Record types of the block stream.
pub const EXTENSION_MAP_RECORD_TYPE: u16 = 2;
pub const EXPORTER_INFO_RECORD_TYPE: u16 = 7;
pub const SAMPLER_INFO_RECORD_TYPE: u16 = 9;
pub const COMMON_RECORD_TYPE: u16 = 10;

/// Size of the fixed part; extension data starts here.
pub const COMMON_RECORD_DATA_OFFSET: u16 = 32;

/// Offset of the `first` time stamp; the compiler reserves the 8 bytes at
/// this offset for `first`/`last` before laying out anything else.
pub const BYTE_OFFSET_FIRST: u16 = 12;

pub const OFFSET_TYPE: usize = 0;
pub const OFFSET_SIZE: usize = 2;
pub const OFFSET_FLAGS: usize = 4;
pub const OFFSET_NFVERSION: usize = 5;
pub const OFFSET_EXT_MAP: usize = 6;
pub const OFFSET_MSEC_FIRST: usize = 8;
pub const OFFSET_MSEC_LAST: usize = 10;
pub const OFFSET_FIRST: usize = 12;
pub const OFFSET_LAST: usize = 16;
pub const OFFSET_FWD_STATUS: usize = 20;
pub const OFFSET_TCP_FLAGS: usize = 21;
pub const OFFSET_PROT: usize = 22;
pub const OFFSET_TOS: usize = 23;
pub const OFFSET_SRC_PORT: usize = 24;
pub const OFFSET_DST_PORT: usize = 26;
pub const OFFSET_EXPORTER_SYSID: usize = 28;
pub const OFFSET_BIFLOW_DIR: usize = 30;
pub const OFFSET_FLOW_END_REASON: usize = 31;

// Output record flag bits.
pub const FLAG_IPV6_ADDR: u8 = 1;
pub const FLAG_PKG_64: u8 = 2;
pub const FLAG_BYTES_64: u8 = 4;
pub const FLAG_IPV6_NH: u8 = 8;
pub const FLAG_IPV6_NHB: u8 = 16;
pub const FLAG_IPV6_EXP: u8 = 32;
pub const FLAG_SAMPLED: u8 = 128;

/// Flows started before 1996-01-01 predate NetFlow; such time stamps are
/// garbage and get zeroed.
pub const EARLIEST_SANE_TIME: u32 = 820454400;

#[inline]
pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    LittleEndian::write_u16(&mut buf[offset..offset + 2], value);
}

#[inline]
pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[offset..offset + 4], value);
}

#[inline]
pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    LittleEndian::write_u64(&mut buf[offset..offset + 8], value);
}

#[inline]
pub(crate) fn get_u16(buf: &[u8], offset: usize) -> u16 {
    LittleEndian::read_u16(&buf[offset..offset + 2])
}

#[inline]
pub(crate) fn get_u32(buf: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&buf[offset..offset + 4])
}

#[inline]
pub(crate) fn get_u64(buf: &[u8], offset: usize) -> u64 {
    LittleEndian::read_u64(&buf[offset..offset + 8])
}

/// Read-only view over one emitted record. Used by the verbose dump and by
/// tests; downstream consumers have their own expanded representation.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    buf: &'a [u8],
}

impl<'a> RecordView<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn record_type(&self) -> u16 {
        get_u16(self.buf, OFFSET_TYPE)
    }

    pub fn size(&self) -> u16 {
        get_u16(self.buf, OFFSET_SIZE)
    }

    pub fn flags(&self) -> u8 {
        self.buf[OFFSET_FLAGS]
    }

    pub fn nfversion(&self) -> u8 {
        self.buf[OFFSET_NFVERSION]
    }

    pub fn ext_map(&self) -> u16 {
        get_u16(self.buf, OFFSET_EXT_MAP)
    }

    pub fn msec_first(&self) -> u16 {
        get_u16(self.buf, OFFSET_MSEC_FIRST)
    }

    pub fn msec_last(&self) -> u16 {
        get_u16(self.buf, OFFSET_MSEC_LAST)
    }

    pub fn first(&self) -> u32 {
        get_u32(self.buf, OFFSET_FIRST)
    }

    pub fn last(&self) -> u32 {
        get_u32(self.buf, OFFSET_LAST)
    }

    pub fn fwd_status(&self) -> u8 {
        self.buf[OFFSET_FWD_STATUS]
    }

    pub fn tcp_flags(&self) -> u8 {
        self.buf[OFFSET_TCP_FLAGS]
    }

    pub fn prot(&self) -> u8 {
        self.buf[OFFSET_PROT]
    }

    pub fn tos(&self) -> u8 {
        self.buf[OFFSET_TOS]
    }

    pub fn src_port(&self) -> u16 {
        get_u16(self.buf, OFFSET_SRC_PORT)
    }

    pub fn dst_port(&self) -> u16 {
        get_u16(self.buf, OFFSET_DST_PORT)
    }

    pub fn exporter_sysid(&self) -> u16 {
        get_u16(self.buf, OFFSET_EXPORTER_SYSID)
    }

    pub fn biflow_dir(&self) -> u8 {
        self.buf[OFFSET_BIFLOW_DIR]
    }

    pub fn flow_end_reason(&self) -> u8 {
        self.buf[OFFSET_FLOW_END_REASON]
    }

    pub fn u8_at(&self, offset: usize) -> u8 {
        self.buf[offset]
    }

    pub fn u16_at(&self, offset: usize) -> u16 {
        get_u16(self.buf, offset)
    }

    pub fn u32_at(&self, offset: usize) -> u32 {
        get_u32(self.buf, offset)
    }

    pub fn u64_at(&self, offset: usize) -> u64 {
        get_u64(self.buf, offset)
    }
}

impl std::fmt::Display for RecordView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flow record: size: {}, flags: {:#x}, map: {}, proto: {}, ports: {} -> {}, first: {}.{:03}, last: {}.{:03}, sysid: {}",
            self.size(),
            self.flags(),
            self.ext_map(),
            self.prot(),
            self.src_port(),
            self.dst_port(),
            self.first(),
            self.msec_first(),
            self.last(),
            self.msec_last(),
            self.exporter_sysid(),
        )
    }
}
