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

//! Per-exporter state.
//!
//! An exporter is identified by `(observation domain id, peer IP)`. It owns
//! the translation tables compiled from its templates, its sampler state and
//! its sequence counters. Exporters are created on the first packet and are
//! never evicted during a session.

use std::{collections::HashMap, net::IpAddr};

use byteorder::{ByteOrder, NetworkEndian};
use tracing::{debug, info};

use crate::{sink::SinkHandle, template::TranslationTable};

/// Sampler id of the default/standard sampler announced without a selector
/// id (elements #34/#35).
pub const DEFAULT_SAMPLER_ID: i32 = -1;

/// Identity of an exporter, flushed to the sink once the exporter is known.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ExporterInfo {
    /// Observation domain id.
    pub id: u32,
    pub ip: IpAddr,
    /// Export protocol version; always 10 here.
    pub version: u16,
    /// Collector-assigned id, stable for the process lifetime. The sink
    /// assigns it on the first flush and never reuses it.
    pub sysid: u16,
}

/// `(offset, length)` of one recognized field inside an option data record.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct OptionTag {
    pub offset: u16,
    pub length: u16,
}

impl OptionTag {
    pub const fn new(offset: u16, length: u16) -> Self {
        Self { offset, length }
    }

    pub const fn is_set(&self) -> bool {
        self.length != 0
    }

    /// Big-endian unsigned value of this field within `data`, or `None` when
    /// the record is too short. Lengths outside 1..=8 read as zero.
    pub fn extract(&self, data: &[u8]) -> Option<u64> {
        let offset = usize::from(self.offset);
        let length = usize::from(self.length);
        if offset + length > data.len() {
            return None;
        }
        match length {
            1..=8 => Some(NetworkEndian::read_uint(&data[offset..offset + length], length)),
            _ => Some(0),
        }
    }
}

/// Identity of one sampler of an exporter, flushed to the sink on insert and
/// on change.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SamplerInfo {
    pub exporter_sysid: u16,
    /// [`DEFAULT_SAMPLER_ID`] for the standard sampler.
    pub id: i32,
    pub mode: u16,
    pub interval: u32,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Sampler {
    pub info: SamplerInfo,
}

/// Field locations of a sampler-describing option template, keyed by the
/// option template id. Filled by the option-template compiler and consulted
/// when option data arrives.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SamplerOption {
    pub table_id: u16,
    pub flags: u8,
    pub id: OptionTag,
    pub mode: OptionTag,
    pub interval: OptionTag,
}

impl SamplerOption {
    /// Standard sampling interval, element #34.
    pub const STD_INTERVAL: u8 = 0x01;
    /// Standard sampling algorithm, element #35.
    pub const STD_ALGORITHM: u8 = 0x02;
    /// Per-sampler id, elements #48/#302.
    pub const SAMPLER_ID: u8 = 0x04;
    /// Per-sampler mode, elements #49/#304.
    pub const SAMPLER_MODE: u8 = 0x08;
    /// Per-sampler interval, elements #50/#305.
    pub const SAMPLER_INTERVAL: u8 = 0x10;

    pub const STD_MASK: u8 = Self::STD_INTERVAL | Self::STD_ALGORITHM;
    pub const SAMPLER_MASK: u8 = Self::SAMPLER_ID | Self::SAMPLER_MODE | Self::SAMPLER_INTERVAL;

    pub fn has_sampler_fields(&self) -> bool {
        self.flags & Self::SAMPLER_MASK != 0
    }

    pub fn has_std_fields(&self) -> bool {
        self.flags & Self::STD_MASK != 0
    }
}

/// State of one `(observation domain, peer IP)` pair.
#[derive(Debug)]
pub struct ExporterDomain {
    pub info: ExporterInfo,
    /// Packets this exporter delivered.
    pub packets: u64,
    /// Flow records this exporter delivered.
    pub flows: u64,
    pub sequence_failure: u32,
    pub padding_errors: u32,
    /// Expected sequence number of the next message. IPFIX counts data
    /// records, so the executor advances it once per emitted record; 32-bit
    /// wrap is absorbed by the arithmetic.
    pub packet_sequence: u32,
    pub template_records: u64,
    pub data_records: u64,
    /// Most recent system-init time extracted from option data, msec.
    pub sys_up_time: u64,
    /// Where to find the system-init time in option data records, once an
    /// option template announced it.
    pub sysup_option: Option<OptionTag>,
    pub templates: HashMap<u16, TranslationTable>,
    pub samplers: Vec<Sampler>,
    pub sampler_options: Vec<SamplerOption>,
}

impl ExporterDomain {
    pub fn new(observation_domain_id: u32, ip: IpAddr) -> Self {
        Self {
            info: ExporterInfo {
                id: observation_domain_id,
                ip,
                version: 10,
                sysid: 0,
            },
            packets: 0,
            flows: 0,
            sequence_failure: 0,
            padding_errors: 0,
            packet_sequence: 0,
            template_records: 0,
            data_records: 0,
            sys_up_time: 0,
            sysup_option: None,
            templates: HashMap::new(),
            samplers: Vec::new(),
            sampler_options: Vec::new(),
        }
    }

    pub fn is_ipv6(&self) -> bool {
        self.info.ip.is_ipv6()
    }

    /// Interval of the default sampler, when one was announced.
    pub fn default_sampler_interval(&self) -> Option<u32> {
        self.samplers
            .iter()
            .find(|s| s.info.id == DEFAULT_SAMPLER_ID)
            .map(|s| s.info.interval)
    }

    /// Whether a data flowset with this id carries option data this exporter
    /// knows how to read.
    pub fn has_option_table(&self, table_id: u16) -> bool {
        self.sysup_option.is_some()
            || self.sampler_options.iter().any(|o| o.table_id == table_id)
    }

    pub fn sampler_option(&self, table_id: u16) -> Option<&SamplerOption> {
        self.sampler_options.iter().find(|o| o.table_id == table_id)
    }

    /// Install or refresh a sampler descriptor. The sink only sees a flush
    /// when mode or interval actually changed.
    pub fn insert_sampler(&mut self, sink: &mut SinkHandle<'_>, id: i32, mode: u16, interval: u32) {
        if let Some(sampler) = self.samplers.iter_mut().find(|s| s.info.id == id) {
            if sampler.info.mode != mode || sampler.info.interval != interval {
                sampler.info.mode = mode;
                sampler.info.interval = interval;
                sink.flush_sampler(&sampler.info);
                info!(
                    "[{}] update sampler id: {id}, mode: {mode}, interval: {interval}",
                    self.info.id
                );
            } else {
                debug!("[{}] sampler id {id} unchanged", self.info.id);
            }
            return;
        }
        let sampler = Sampler {
            info: SamplerInfo {
                exporter_sysid: self.info.sysid,
                id,
                mode,
                interval,
            },
        };
        sink.flush_sampler(&sampler.info);
        self.samplers.push(sampler);
        info!(
            "[{}] add sampler id: {id}, mode: {mode}, interval: {interval}",
            self.info.id
        );
    }

    /// Install or replace the sampler-option descriptor for one option
    /// template id.
    pub fn insert_sampler_option(&mut self, option: SamplerOption) {
        if let Some(existing) = self
            .sampler_options
            .iter_mut()
            .find(|o| o.table_id == option.table_id)
        {
            debug!(
                "[{}] replace sampler option table id {}",
                self.info.id, option.table_id
            );
            *existing = option;
        } else {
            debug!(
                "[{}] new sampler option table id {}",
                self.info.id, option.table_id
            );
            self.sampler_options.push(option);
        }
    }
}

/// All observation domains seen by one flow source.
#[derive(Debug, Default)]
pub struct ExporterRegistry {
    exporters: Vec<ExporterDomain>,
}

impl ExporterRegistry {
    /// Look up the exporter for `(observation domain, peer)`; a miss creates
    /// it and flushes its info record to the sink, which assigns the sysid.
    pub fn get_or_create(
        &mut self,
        observation_domain_id: u32,
        sink: &mut SinkHandle<'_>,
    ) -> &mut ExporterDomain {
        let peer = sink.peer;
        if let Some(i) = self
            .exporters
            .iter()
            .position(|e| e.info.id == observation_domain_id && e.info.ip == peer)
        {
            return &mut self.exporters[i];
        }
        let mut exporter = ExporterDomain::new(observation_domain_id, peer);
        sink.flush_exporter(&mut exporter.info);
        info!(
            "new exporter: sysid: {}, observation domain {} from: {}",
            exporter.info.sysid, observation_domain_id, peer
        );
        self.exporters.push(exporter);
        self.exporters.last_mut().expect("just pushed")
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExporterDomain> {
        self.exporters.iter()
    }

    pub fn len(&self) -> usize {
        self.exporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty()
    }
}
