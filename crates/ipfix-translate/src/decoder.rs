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

//! The top-level IPFIX decoder.
//!
//! Parses the message header, verifies the per-exporter sequence number,
//! walks the flowsets and dispatches them to the template compiler, the
//! option-template compiler or the data executor. Every error is bounded to
//! the flowset or datagram that raised it; processing always continues with
//! the next datagram.

use std::net::IpAddr;

use byteorder::{ByteOrder, NetworkEndian};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    exporter::ExporterDomain,
    extension::{Extension, ExtensionConfig},
    ie::Catalog,
    ipfix::{
        MessageHeader, SetHeader, TemplateRecord, DATA_SET_MIN_ID, IPFIX_HEADER_LENGTH,
        IPFIX_OPTIONS_TEMPLATE_SET_ID, IPFIX_TEMPLATE_SET_ID,
    },
    options, record,
    record::{RecordView, EARLIEST_SANE_TIME, FLAG_SAMPLED},
    sequencer::{self, RecordScratch},
    sink::{FlowSource, SinkHandle},
    template::{self, TemplateScratch, TranslationTable},
    wire::{
        deserializer::MessageHeaderParsingError, LocatedParsingError, ReadablePdu, Span,
    },
};

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_ICMPV6: u8 = 58;

/// Decoder configuration.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Log every emitted record.
    pub verbose: bool,
    /// Sampling rate applied when the exporter announced no sampler.
    pub default_sampling: u32,
    /// When non-zero, overrides every announced sampling rate.
    pub overwrite_sampling: u32,
    pub extensions: ExtensionConfig,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            default_sampling: 1,
            overwrite_sampling: 0,
            extensions: ExtensionConfig::default(),
        }
    }
}

/// Conditions that abort an entire datagram. Everything else is logged and
/// bounded to the flowset that raised it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PacketProcessingError {
    TooShort(usize),
    HeaderError(MessageHeaderParsingError),
    /// A zero set length makes locating the next set impossible.
    ZeroLengthSet { offset: usize },
    SetLengthExceedsRemaining { length: u16, remaining: usize },
    /// The caller must rotate the output block and may retry.
    OutputBufferFull { needed: usize },
}

impl std::fmt::Display for PacketProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "too little data for an IPFIX message: {len}"),
            Self::HeaderError(e) => write!(f, "{e}"),
            Self::ZeroLengthSet { offset } => {
                write!(f, "flowset zero length error at offset {offset}")
            }
            Self::SetLengthExceedsRemaining { length, remaining } => write!(
                f,
                "flowset length error: expected bytes: {length} > buffer size: {remaining}"
            ),
            Self::OutputBufferFull { needed } => {
                write!(f, "output buffer full: {needed} more bytes needed")
            }
        }
    }
}

impl std::error::Error for PacketProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::HeaderError(e) => Some(e),
            _ => None,
        }
    }
}

/// Translates IPFIX datagrams into flow records.
///
/// Owns the element-catalog index and the template-compilation scratch, so
/// one decoder serves one thread; decoders on different threads must not
/// share a [`FlowSource`].
#[derive(Debug)]
pub struct IpfixDecoder {
    config: DecoderConfig,
    catalog: Catalog,
    scratch: TemplateScratch,
    processed_records: u64,
}

impl Default for IpfixDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl IpfixDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            catalog: Catalog::new(),
            scratch: TemplateScratch::default(),
            processed_records: 0,
        }
    }

    pub const fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Records and option records digested so far.
    pub const fn processed_records(&self) -> u64 {
        self.processed_records
    }

    /// Consume one UDP datagram. Emitted records, statistics and state
    /// changes all go through `fs`; the error only reports why the rest of a
    /// datagram was dropped.
    pub fn process_packet(
        &mut self,
        buf: &[u8],
        fs: &mut FlowSource,
    ) -> Result<(), PacketProcessingError> {
        if buf.len() < usize::from(IPFIX_HEADER_LENGTH) {
            error!("too little data for an IPFIX message: {}", buf.len());
            return Err(PacketProcessingError::TooShort(buf.len()));
        }
        let header = match MessageHeader::from_wire(Span::new(buf)) {
            Ok((_, header)) => header,
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                error!("invalid IPFIX message header: {}", e.error());
                return Err(PacketProcessingError::HeaderError(e.error().clone()));
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(PacketProcessingError::TooShort(buf.len()));
            }
        };

        let (exporters, mut sink) = fs.parts();
        let exporter = exporters.get_or_create(header.observation_domain_id(), &mut sink);
        exporter.packets += 1;

        // Sequence check: IPFIX counts data records, so the expected value
        // advanced once per emitted record. 2^32 wrap is absorbed as both
        // counters overflow. Always resync.
        if header.sequence_number() != exporter.packet_sequence {
            if exporter.data_records != 0 {
                sink.stats.sequence_failure += 1;
                exporter.sequence_failure += 1;
                debug!(
                    "[{}] sequence check failed: expected {}, got {}",
                    exporter.info.id,
                    exporter.packet_sequence,
                    header.sequence_number()
                );
            }
            exporter.packet_sequence = header.sequence_number();
        }

        let mut remaining = &buf[usize::from(IPFIX_HEADER_LENGTH)..];
        let mut offset = usize::from(IPFIX_HEADER_LENGTH);
        while remaining.len() >= 4 {
            let set_header = match SetHeader::from_wire(Span::new(remaining)) {
                Ok((_, set_header)) => set_header,
                Err(_) => {
                    error!("flowset zero length error");
                    return Err(PacketProcessingError::ZeroLengthSet { offset });
                }
            };
            let length = usize::from(set_header.length());
            if length <= 4 {
                // padding closes the message
                break;
            }
            if length > remaining.len() {
                error!(
                    "flowset length error: expected bytes: {} > buffer size: {}",
                    length,
                    remaining.len()
                );
                return Err(PacketProcessingError::SetLengthExceedsRemaining {
                    length: set_header.length(),
                    remaining: remaining.len(),
                });
            }
            let payload = &remaining[4..length];
            match set_header.id() {
                IPFIX_TEMPLATE_SET_ID => {
                    exporter.template_records += 1;
                    self.process_template_set(exporter, &mut sink, payload);
                }
                IPFIX_OPTIONS_TEMPLATE_SET_ID => {
                    exporter.template_records += 1;
                    self.process_options_template_set(exporter, payload);
                }
                id if id < DATA_SET_MIN_ID => {
                    warn!("invalid flowset id: {id}, skip flowset");
                }
                id => {
                    if exporter.templates.contains_key(&id) {
                        self.process_data_set(
                            exporter,
                            &mut sink,
                            header.export_time(),
                            id,
                            payload,
                        )?;
                        exporter.data_records += 1;
                    } else if exporter.has_option_table(id) {
                        self.processed_records += 1;
                        options::process_option_data(exporter, &mut sink, id, payload);
                    } else {
                        debug!(
                            "[{}] no table for id {id}, skip data flowset",
                            exporter.info.id
                        );
                    }
                }
            }
            remaining = &remaining[length..];
            offset += length;
        }
        if remaining.len() < 4 && remaining.iter().any(|b| *b != 0) {
            exporter.padding_errors += 1;
            debug!(
                "[{}] non-zero padding after last flowset",
                exporter.info.id
            );
        }
        Ok(())
    }

    /// A template flowset can contain multiple records; a field count of
    /// zero inside a record withdraws that template id.
    fn process_template_set(
        &mut self,
        exporter: &mut ExporterDomain,
        sink: &mut SinkHandle<'_>,
        payload: &[u8],
    ) {
        let mut buf = Span::new(payload);
        while buf.fragment().len() >= 4 {
            let (t, record) = match TemplateRecord::from_wire(buf) {
                Ok(value) => value,
                Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                    warn!(
                        "[{}] template record error: {}, abort flowset",
                        exporter.info.id,
                        e.error()
                    );
                    return;
                }
                Err(nom::Err::Incomplete(_)) => {
                    warn!("[{}] truncated template record, abort flowset", exporter.info.id);
                    return;
                }
            };
            buf = t;
            if record.is_withdrawal() {
                self.withdraw_template(exporter, sink, record.id());
            } else {
                self.add_or_refresh_template(exporter, sink, &record);
            }
        }
    }

    fn withdraw_template(
        &mut self,
        exporter: &mut ExporterDomain,
        sink: &mut SinkHandle<'_>,
        id: u16,
    ) {
        if id == IPFIX_TEMPLATE_SET_ID {
            info!("[{}] withdraw all templates", exporter.info.id);
            exporter.templates.clear();
            sink.reinit_extension_maps();
            return;
        }
        match exporter.templates.remove(&id) {
            Some(table) => {
                info!("[{}] withdraw template id: {id}", exporter.info.id);
                sink.remove_extension_map(table.extension_map.map_id());
            }
            None => {
                warn!(
                    "[{}] withdraw template id: {id}: translation table not found",
                    exporter.info.id
                );
            }
        }
    }

    fn add_or_refresh_template(
        &mut self,
        exporter: &mut ExporterDomain,
        sink: &mut SinkHandle<'_>,
        record: &TemplateRecord,
    ) {
        let id = record.id();
        if id < DATA_SET_MIN_ID {
            warn!("[{}] invalid template id {id}, skip record", exporter.info.id);
            return;
        }
        self.scratch.reset(record.field_specifiers().len());
        let mut any_matched = false;
        for (i, spec) in record.field_specifiers().iter().enumerate() {
            if let Some(ext) = template::map_element(&self.catalog, &mut self.scratch, i, spec) {
                any_matched = true;
                if ext != Extension::Common && self.config.extensions.enabled(ext) {
                    self.scratch.common_extensions.insert(ext);
                }
            }
        }
        if !any_matched || !template::compact_input_order(&mut self.scratch.input_order) {
            debug!(
                "[{}] template {id} contains no decodable fields, skip",
                exporter.info.id
            );
            return;
        }

        // the router IP and receive time are collector-side values, never
        // announced in a template
        if self.config.extensions.enabled(Extension::RouterIpV4) {
            self.scratch.common_extensions.insert(Extension::RouterIpV4);
        }
        if self.config.extensions.enabled(Extension::Received) {
            self.scratch.common_extensions.insert(Extension::Received);
        }

        let exporter_is_ipv6 = exporter.is_ipv6();
        if exporter.templates.contains_key(&id) {
            debug!("[{}] refresh template {id}", exporter.info.id);
        } else {
            info!("[{}] add template {id}", exporter.info.id);
        }
        let table = exporter
            .templates
            .entry(id)
            .or_insert_with(|| TranslationTable::new(id));
        template::setup_translation_table(table, &self.catalog, &self.scratch, exporter_is_ipv6);
        if table.map_changed {
            sink.add_extension_map(&mut table.extension_map);
            table.map_changed = false;
        }
        let reordered = template::reorder_sequencer(&mut table.sequencer, &self.scratch.input_order);
        let map_id = table.extension_map.map_id();
        if let Err(e) = reordered {
            error!(
                "[{}] failed to reorder sequencer: {e}, remove table id: {id}",
                exporter.info.id
            );
            exporter.templates.remove(&id);
            sink.remove_extension_map(map_id);
        }
    }

    fn process_options_template_set(&mut self, exporter: &mut ExporterDomain, payload: &[u8]) {
        self.processed_records += 1;
        let mut buf = Span::new(payload);
        // anything shorter than one field specifier is padding
        while buf.fragment().len() > 3 {
            match crate::ipfix::OptionsTemplateRecord::from_wire(buf) {
                Ok((t, record)) => {
                    buf = t;
                    options::process_option_template(exporter, &record);
                }
                Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                    warn!(
                        "[{}] option template error: {}, abort flowset",
                        exporter.info.id,
                        e.error()
                    );
                    return;
                }
                Err(nom::Err::Incomplete(_)) => {
                    warn!(
                        "[{}] truncated option template, abort flowset",
                        exporter.info.id
                    );
                    return;
                }
            }
        }
    }

    /// Walk one data flowset, translating every record through the
    /// template's sequencer into the sink's output block.
    fn process_data_set(
        &mut self,
        exporter: &mut ExporterDomain,
        sink: &mut SinkHandle<'_>,
        export_time: u32,
        set_id: u16,
        payload: &[u8],
    ) -> Result<(), PacketProcessingError> {
        let Some(table) = exporter.templates.get(&set_id) else {
            return Ok(());
        };
        debug!(
            "[{}] process data flowset size: {}",
            exporter.info.id,
            payload.len()
        );

        let sampling_rate = u64::from(if self.config.overwrite_sampling > 0 {
            self.config.overwrite_sampling
        } else if let Some(interval) = exporter.default_sampler_interval() {
            interval
        } else {
            self.config.default_sampling
        });
        let record_flags = table.flags | if sampling_rate != 1 { FLAG_SAMPLED } else { 0 };
        let record_size = usize::from(table.output_record_size);

        let mut input = payload;
        let mut emitted: u64 = 0;
        let result = loop {
            // anything shorter than 4 bytes is rounding padding
            if input.len() < 4 {
                break Ok(());
            }
            if !sink.check_buffer_space(record_size) {
                error!("output buffer size error, abort record processing");
                break Err(PacketProcessingError::OutputBufferFull {
                    needed: record_size,
                });
            }
            self.processed_records += 1;

            let base = sink.block.alloc(record_size);
            let mut scratch = RecordScratch::default();
            {
                let out = sink.block.record_mut(base, record_size);
                record::put_u16(out, record::OFFSET_TYPE, record::COMMON_RECORD_TYPE);
                record::put_u16(out, record::OFFSET_SIZE, table.output_record_size);
                out[record::OFFSET_FLAGS] = record_flags;
                out[record::OFFSET_NFVERSION] = 10;
                record::put_u16(out, record::OFFSET_EXT_MAP, table.extension_map.map_id());
                record::put_u16(out, record::OFFSET_EXPORTER_SYSID, exporter.info.sysid);
            }

            let consumed = {
                let out = sink.block.record_mut(base, record_size);
                match sequencer::execute(
                    &table.sequencer,
                    input,
                    out,
                    export_time,
                    sampling_rate,
                    &mut scratch,
                ) {
                    Ok(consumed) => consumed,
                    Err(e) => {
                        error!("[{}] {e}, abort flowset", exporter.info.id);
                        sink.block.rollback(base);
                        break Ok(());
                    }
                }
            };

            {
                let out = sink.block.record_mut(base, record_size);

                // ICMP type/code historically rides in the dst port field
                if let Some(type_code) = scratch.icmp_type_code {
                    let prot = out[record::OFFSET_PROT];
                    if prot == IPPROTO_ICMP || prot == IPPROTO_ICMPV6 {
                        record::put_u16(out, record::OFFSET_SRC_PORT, 0);
                        record::put_u16(out, record::OFFSET_DST_PORT, type_code);
                    }
                }

                if let Some(received_offset) = table.received_offset {
                    record::put_u64(out, usize::from(received_offset), sink.received_ms);
                }

                // a record-carried system-init time beats the option one
                if scratch.sys_up_time != 0 && scratch.has_time_milli {
                    scratch.flow_start += scratch.sys_up_time;
                    scratch.flow_end += scratch.sys_up_time;
                } else if exporter.sys_up_time != 0 && scratch.has_time_milli {
                    scratch.flow_start += exporter.sys_up_time;
                    scratch.flow_end += exporter.sys_up_time;
                }
                if scratch.flow_start != 0 && scratch.duration != 0 && scratch.flow_end == 0 {
                    scratch.flow_end = scratch.flow_start + scratch.duration;
                }

                let mut first = (scratch.flow_start / 1000) as u32;
                let mut msec_first = (scratch.flow_start % 1000) as u16;
                let mut last = (scratch.flow_end / 1000) as u32;
                let mut msec_last = (scratch.flow_end % 1000) as u16;
                if first < EARLIEST_SANE_TIME || (last != 0 && last < EARLIEST_SANE_TIME) {
                    debug!("zero date before 1996-01-01");
                    first = 0;
                    msec_first = 0;
                    last = 0;
                    msec_last = 0;
                    scratch.flow_start = 0;
                    scratch.flow_end = 0;
                }
                record::put_u32(out, record::OFFSET_FIRST, first);
                record::put_u16(out, record::OFFSET_MSEC_FIRST, msec_first);
                record::put_u32(out, record::OFFSET_LAST, last);
                record::put_u16(out, record::OFFSET_MSEC_LAST, msec_last);

                if let Some(router_offset) = table.router_ip_offset {
                    let o = usize::from(router_offset);
                    match exporter.info.ip {
                        IpAddr::V4(ip) => record::put_u32(out, o, u32::from(ip)),
                        IpAddr::V6(ip) => {
                            let octets = ip.octets();
                            record::put_u64(out, o, NetworkEndian::read_u64(&octets[0..8]));
                            record::put_u64(out, o + 8, NetworkEndian::read_u64(&octets[8..16]));
                        }
                    }
                }
            }

            if scratch.flow_start != 0 && scratch.flow_start < sink.stats.first_seen {
                sink.stats.first_seen = scratch.flow_start;
            }
            if scratch.flow_end > sink.stats.last_seen {
                sink.stats.last_seen = scratch.flow_end;
            }

            let prot = sink.block.bytes()[base + record::OFFSET_PROT];
            let packets = scratch.packets + scratch.out_packets;
            let bytes = scratch.bytes + scratch.out_bytes;
            match prot {
                IPPROTO_ICMP => {
                    sink.stats.flows_icmp += 1;
                    sink.stats.packets_icmp += packets;
                    sink.stats.bytes_icmp += bytes;
                }
                IPPROTO_TCP => {
                    sink.stats.flows_tcp += 1;
                    sink.stats.packets_tcp += packets;
                    sink.stats.bytes_tcp += bytes;
                }
                IPPROTO_UDP => {
                    sink.stats.flows_udp += 1;
                    sink.stats.packets_udp += packets;
                    sink.stats.bytes_udp += bytes;
                }
                _ => {
                    sink.stats.flows_other += 1;
                    sink.stats.packets_other += packets;
                    sink.stats.bytes_other += bytes;
                }
            }
            sink.stats.flows += 1;
            sink.stats.packets += packets;
            sink.stats.bytes += bytes;

            if self.config.verbose {
                let view = RecordView::new(&sink.block.bytes()[base..base + record_size]);
                debug!("{view}");
            }

            sink.block.commit();
            emitted += 1;
            input = &input[consumed..];

            // alloc never exceeds the cap, but a block that somehow did
            // would corrupt everything downstream
            if sink.block.len() > sink.block.capacity() {
                error!("output buffer overflow, flush buffer and skip records");
                sink.block.reset();
                break Ok(());
            }
        };
        exporter.packet_sequence = exporter.packet_sequence.wrapping_add(emitted as u32);
        exporter.flows += emitted;
        result
    }
}
