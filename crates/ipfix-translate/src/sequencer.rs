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

//! The sequencer: a compiled decoding program, one per translation table.
//!
//! A sequencer is an ordered list of [`Slot`]s executed linearly over one
//! data record. Each slot copies or zeroes output bytes, or feeds a scratch
//! value (time stamps, sampling-corrected counters, ICMP type/code) consumed
//! after the pass. Slots also carry a trailing skip count so undecoded input
//! bytes are stepped over without dedicated slots.

use byteorder::{ByteOrder, NetworkEndian};

use crate::record;

/// One step of a sequencer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Opcode {
    /// No work; only the skip count applies.
    Nop,
    /// Variable-length field: one length octet, or 255 followed by a 16-bit
    /// length, then that many bytes. Consumed, never decoded.
    DynSkip,
    Move8,
    Move16,
    Move32,
    Move40,
    Move48,
    Move56,
    Move64,
    Move128,
    /// Widen to 64 bit, multiply by the sampling rate, write 64 bits and
    /// store the corrected value to the stack target.
    Move32Sampling,
    Move48Sampling,
    Move64Sampling,
    /// 48-bit MAC address into an 8-byte output slot.
    MoveMac,
    /// 24-bit MPLS label stack entry into a 32-bit output slot.
    MoveMpls,
    /// 16-bit TCP flags; only the low byte is kept.
    MoveFlags,
    /// 64-bit absolute milliseconds to stack.
    TimeMilli64,
    /// 32-bit duration in milliseconds to stack.
    DurationMilli,
    /// 32-bit seconds, scaled to milliseconds, to stack.
    TimeSeconds,
    /// `(export_time * 1_000_000 - value) / 1000` milliseconds to stack.
    TimeDeltaMicro,
    /// 64-bit system-uptime milliseconds to stack.
    SystemInitTime,
    /// 32-bit sysup-relative milliseconds to stack; marks the record as
    /// carrying relative time stamps.
    TimeMilli32,
    /// 16-bit ICMP type/code to stack.
    SaveIcmp,
    Zero8,
    Zero16,
    Zero32,
    Zero64,
    Zero128,
}

/// Scratch field of the translation table a slot stores its decoded value
/// into, for the post-pass fix-ups and statistics.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StackTarget {
    FlowStart,
    FlowEnd,
    Duration,
    SysUpTime,
    Packets,
    Bytes,
    OutPackets,
    OutBytes,
    IcmpTypeCode,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Slot {
    pub opcode: Opcode,
    /// Element id the slot decodes; `None` for pure skip slots. Used to
    /// reorder the sequencer into wire order.
    pub element: Option<u16>,
    /// Bytes consumed from the input record, excluding the skip count.
    pub input_length: u16,
    /// Additional input bytes stepped over after the slot executed.
    pub skip_count: u32,
    /// Where the decoded value lands in the output record. `None` for slots
    /// that only feed the stack or only skip input.
    pub output_offset: Option<u16>,
    pub stack: Option<StackTarget>,
}

impl Slot {
    pub(crate) fn skip(length: u32) -> Self {
        Self {
            opcode: Opcode::Nop,
            element: None,
            input_length: 0,
            skip_count: length,
            output_offset: None,
            stack: None,
        }
    }

    pub(crate) fn dyn_skip() -> Self {
        Self {
            opcode: Opcode::DynSkip,
            element: None,
            input_length: 0,
            skip_count: 0,
            output_offset: None,
            stack: None,
        }
    }
}

/// Per-record scratch the sequencer feeds and the post-pass consumes. All
/// times are in milliseconds.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct RecordScratch {
    pub flow_start: u64,
    pub flow_end: u64,
    pub duration: u64,
    pub sys_up_time: u64,
    /// Exporter sent sysup-relative time stamps in this record.
    pub has_time_milli: bool,
    pub icmp_type_code: Option<u16>,
    pub packets: u64,
    pub bytes: u64,
    pub out_packets: u64,
    pub out_bytes: u64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExecuteError {
    /// A slot would read past the end of the remaining flowset bytes.
    InputOverrun {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

impl std::fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputOverrun {
                offset,
                needed,
                available,
            } => write!(
                f,
                "input overrun: need {needed} bytes at offset {offset}, {available} available"
            ),
        }
    }
}

impl std::error::Error for ExecuteError {}

#[inline]
fn take<'a>(input: &'a [u8], offset: usize, needed: usize) -> Result<&'a [u8], ExecuteError> {
    if offset + needed > input.len() {
        return Err(ExecuteError::InputOverrun {
            offset,
            needed,
            available: input.len(),
        });
    }
    Ok(&input[offset..offset + needed])
}

#[inline]
fn store(scratch: &mut RecordScratch, target: StackTarget, value: u64) {
    match target {
        StackTarget::FlowStart => scratch.flow_start = value,
        StackTarget::FlowEnd => scratch.flow_end = value,
        StackTarget::Duration => scratch.duration = value,
        StackTarget::SysUpTime => scratch.sys_up_time = value,
        StackTarget::Packets => scratch.packets = value,
        StackTarget::Bytes => scratch.bytes = value,
        StackTarget::OutPackets => scratch.out_packets = value,
        StackTarget::OutBytes => scratch.out_bytes = value,
        StackTarget::IcmpTypeCode => scratch.icmp_type_code = Some(value as u16),
    }
}

/// Execute a sequencer over one data record.
///
/// `input` is the remaining payload of the data flowset starting at the
/// record; `out` is the zero-initialized output record. Returns the number of
/// input bytes the record consumed.
pub fn execute(
    slots: &[Slot],
    input: &[u8],
    out: &mut [u8],
    export_time: u32,
    sampling_rate: u64,
    scratch: &mut RecordScratch,
) -> Result<usize, ExecuteError> {
    let mut offset = 0usize;
    for slot in slots {
        let out_offset = slot.output_offset.map(usize::from);
        let mut consumed = usize::from(slot.input_length);
        match slot.opcode {
            Opcode::Nop => {}
            Opcode::DynSkip => {
                let length = take(input, offset, 1)?[0];
                if length < 255 {
                    consumed = usize::from(length) + 1;
                } else {
                    let inner = NetworkEndian::read_u16(take(input, offset + 1, 2)?);
                    consumed = usize::from(inner) + 3;
                }
                take(input, offset, consumed)?;
            }
            Opcode::Move8 => {
                let v = take(input, offset, 1)?[0];
                if let Some(o) = out_offset {
                    out[o] = v;
                }
            }
            Opcode::Move16 => {
                let v = NetworkEndian::read_u16(take(input, offset, 2)?);
                if let Some(o) = out_offset {
                    record::put_u16(out, o, v);
                }
            }
            Opcode::Move32 => {
                let v = NetworkEndian::read_u32(take(input, offset, 4)?);
                if let Some(o) = out_offset {
                    record::put_u32(out, o, v);
                }
            }
            Opcode::Move40 => {
                let v = NetworkEndian::read_uint(take(input, offset, 5)?, 5);
                if let Some(o) = out_offset {
                    record::put_u64(out, o, v);
                }
            }
            Opcode::Move48 => {
                let v = NetworkEndian::read_uint(take(input, offset, 6)?, 6);
                if let Some(o) = out_offset {
                    record::put_u64(out, o, v);
                }
            }
            Opcode::Move56 => {
                let v = NetworkEndian::read_uint(take(input, offset, 7)?, 7);
                if let Some(o) = out_offset {
                    record::put_u64(out, o, v);
                }
            }
            Opcode::Move64 => {
                let v = NetworkEndian::read_u64(take(input, offset, 8)?);
                if let Some(o) = out_offset {
                    record::put_u64(out, o, v);
                }
            }
            Opcode::Move128 => {
                let hi = NetworkEndian::read_u64(take(input, offset, 16)?);
                let lo = NetworkEndian::read_u64(&input[offset + 8..offset + 16]);
                if let Some(o) = out_offset {
                    record::put_u64(out, o, hi);
                    record::put_u64(out, o + 8, lo);
                }
            }
            Opcode::Move32Sampling => {
                let v = u64::from(NetworkEndian::read_u32(take(input, offset, 4)?))
                    .wrapping_mul(sampling_rate);
                if let Some(o) = out_offset {
                    record::put_u64(out, o, v);
                }
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
            }
            Opcode::Move48Sampling => {
                let v = NetworkEndian::read_uint(take(input, offset, 6)?, 6)
                    .wrapping_mul(sampling_rate);
                if let Some(o) = out_offset {
                    record::put_u64(out, o, v);
                }
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
            }
            Opcode::Move64Sampling => {
                let v =
                    NetworkEndian::read_u64(take(input, offset, 8)?).wrapping_mul(sampling_rate);
                if let Some(o) = out_offset {
                    record::put_u64(out, o, v);
                }
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
            }
            Opcode::MoveMac => {
                let v = NetworkEndian::read_uint(take(input, offset, 6)?, 6);
                if let Some(o) = out_offset {
                    record::put_u64(out, o, v);
                }
            }
            Opcode::MoveMpls => {
                let v = NetworkEndian::read_u24(take(input, offset, 3)?);
                if let Some(o) = out_offset {
                    record::put_u32(out, o, v);
                }
            }
            Opcode::MoveFlags => {
                let v = NetworkEndian::read_u16(take(input, offset, 2)?);
                if let Some(o) = out_offset {
                    out[o] = (v & 0xff) as u8;
                }
            }
            Opcode::TimeMilli64 => {
                let v = NetworkEndian::read_u64(take(input, offset, 8)?);
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
            }
            Opcode::DurationMilli => {
                let v = u64::from(NetworkEndian::read_u32(take(input, offset, 4)?));
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
            }
            Opcode::TimeSeconds => {
                let v = u64::from(NetworkEndian::read_u32(take(input, offset, 4)?)) * 1000;
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
            }
            Opcode::TimeDeltaMicro => {
                let delta = u64::from(NetworkEndian::read_u32(take(input, offset, 4)?));
                let v = (u64::from(export_time) * 1_000_000).wrapping_sub(delta) / 1000;
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
            }
            Opcode::SystemInitTime => {
                let v = NetworkEndian::read_u64(take(input, offset, 8)?);
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
            }
            Opcode::TimeMilli32 => {
                let v = u64::from(NetworkEndian::read_u32(take(input, offset, 4)?));
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
                scratch.has_time_milli = true;
            }
            Opcode::SaveIcmp => {
                let v = u64::from(NetworkEndian::read_u16(take(input, offset, 2)?));
                if let Some(target) = slot.stack {
                    store(scratch, target, v);
                }
            }
            Opcode::Zero8 => {
                if let Some(o) = out_offset {
                    out[o] = 0;
                }
            }
            Opcode::Zero16 => {
                if let Some(o) = out_offset {
                    record::put_u16(out, o, 0);
                }
            }
            Opcode::Zero32 => {
                if let Some(o) = out_offset {
                    record::put_u32(out, o, 0);
                }
            }
            Opcode::Zero64 => {
                if let Some(o) = out_offset {
                    record::put_u64(out, o, 0);
                }
            }
            Opcode::Zero128 => {
                if let Some(o) = out_offset {
                    record::put_u64(out, o, 0);
                    record::put_u64(out, o + 8, 0);
                }
            }
        }
        offset += consumed + slot.skip_count as usize;
        if offset > input.len() {
            return Err(ExecuteError::InputOverrun {
                offset,
                needed: 0,
                available: input.len(),
            });
        }
    }
    Ok(offset)
}
