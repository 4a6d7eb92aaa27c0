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

//! The sink side of the decoder: the flow source.
//!
//! A [`FlowSource`] owns everything one stream of datagrams feeds into: the
//! output block records are appended to, the statistics record, the exporter
//! registry and the extension-map registry. The caller sets `peer` and
//! `received` before each `process_packet` call and rotates the output block
//! whenever it fills up. One `FlowSource` must only ever be driven from one
//! thread at a time.

use std::net::IpAddr;

use bytes::BytesMut;
use chrono::{DateTime, Utc};

use crate::{
    exporter::{ExporterInfo, ExporterRegistry, SamplerInfo},
    extension::{ExtensionMap, INIT_MAP_ID},
    record::RecordView,
};

/// Default capacity of an output block.
pub const DEFAULT_BLOCK_CAPACITY: usize = 1024 * 1024;

/// The output buffer flow records are appended to, plus its block header
/// bookkeeping (byte size and record count).
#[derive(Debug)]
pub struct OutputBlock {
    buf: BytesMut,
    capacity: usize,
    num_records: u32,
}

impl OutputBlock {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            num_records: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn num_records(&self) -> u32 {
        self.num_records
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Whether one more record of `need` bytes fits.
    pub fn has_space(&self, need: usize) -> bool {
        self.buf.len() + need <= self.capacity
    }

    /// Reserve a zero-filled record region and return its offset.
    pub(crate) fn alloc(&mut self, size: usize) -> usize {
        let base = self.buf.len();
        self.buf.resize(base + size, 0);
        base
    }

    pub(crate) fn record_mut(&mut self, base: usize, size: usize) -> &mut [u8] {
        &mut self.buf[base..base + size]
    }

    pub(crate) fn commit(&mut self) {
        self.num_records += 1;
    }

    /// Abandon an allocated but not yet committed record.
    pub(crate) fn rollback(&mut self, base: usize) {
        self.buf.truncate(base);
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.num_records = 0;
    }

    /// Walk the emitted records.
    pub fn records(&self) -> impl Iterator<Item = RecordView<'_>> {
        let mut offset = 0usize;
        std::iter::from_fn(move || {
            if offset + 4 > self.buf.len() {
                return None;
            }
            let view = RecordView::new(&self.buf[offset..]);
            let size = usize::from(view.size());
            if size < 4 || offset + size > self.buf.len() {
                return None;
            }
            offset += size;
            Some(RecordView::new(&self.buf[offset - size..offset]))
        })
    }
}

/// Statistics over everything a flow source has seen.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StatRecord {
    pub flows: u64,
    pub packets: u64,
    pub bytes: u64,
    pub flows_tcp: u64,
    pub flows_udp: u64,
    pub flows_icmp: u64,
    pub flows_other: u64,
    pub packets_tcp: u64,
    pub packets_udp: u64,
    pub packets_icmp: u64,
    pub packets_other: u64,
    pub bytes_tcp: u64,
    pub bytes_udp: u64,
    pub bytes_icmp: u64,
    pub bytes_other: u64,
    pub sequence_failure: u32,
    /// Earliest flow start observed, msec since the epoch.
    pub first_seen: u64,
    /// Latest flow end observed, msec since the epoch.
    pub last_seen: u64,
}

impl Default for StatRecord {
    fn default() -> Self {
        Self {
            flows: 0,
            packets: 0,
            bytes: 0,
            flows_tcp: 0,
            flows_udp: 0,
            flows_icmp: 0,
            flows_other: 0,
            packets_tcp: 0,
            packets_udp: 0,
            packets_icmp: 0,
            packets_other: 0,
            bytes_tcp: 0,
            bytes_udp: 0,
            bytes_icmp: 0,
            bytes_other: 0,
            sequence_failure: 0,
            first_seen: u64::MAX,
            last_seen: 0,
        }
    }
}

/// Registry of extension maps the sink has been told about. Map ids are
/// assigned on first registration and stay stable afterwards.
#[derive(Debug, Default)]
pub struct ExtensionMapRegistry {
    maps: Vec<ExtensionMap>,
    next_map_id: u16,
}

impl ExtensionMapRegistry {
    pub fn maps(&self) -> &[ExtensionMap] {
        &self.maps
    }

    pub fn get(&self, map_id: u16) -> Option<&ExtensionMap> {
        self.maps.iter().find(|m| m.map_id() == map_id)
    }

    fn add(&mut self, map: &mut ExtensionMap) {
        if map.map_id() == INIT_MAP_ID {
            map.set_map_id(self.next_map_id);
            self.next_map_id += 1;
        }
        if let Some(existing) = self.maps.iter_mut().find(|m| m.map_id() == map.map_id()) {
            *existing = map.clone();
        } else {
            self.maps.push(map.clone());
        }
    }

    fn remove(&mut self, map_id: u16) {
        self.maps.retain(|m| m.map_id() != map_id);
    }

    fn reinit(&mut self) {
        self.maps.clear();
    }
}

/// Everything the decoder feeds for one stream of datagrams.
#[derive(Debug)]
pub struct FlowSource {
    /// Address the current datagram came from.
    pub peer: IpAddr,
    /// Receive time of the current datagram.
    pub received: DateTime<Utc>,
    pub block: OutputBlock,
    pub stats: StatRecord,
    exporters: ExporterRegistry,
    maps: ExtensionMapRegistry,
    exporter_infos: Vec<ExporterInfo>,
    sampler_infos: Vec<SamplerInfo>,
    next_sysid: u16,
}

impl FlowSource {
    pub fn new(peer: IpAddr, block_capacity: usize) -> Self {
        Self {
            peer,
            received: Utc::now(),
            block: OutputBlock::new(block_capacity),
            stats: StatRecord::default(),
            exporters: ExporterRegistry::default(),
            maps: ExtensionMapRegistry::default(),
            exporter_infos: Vec::new(),
            sampler_infos: Vec::new(),
            next_sysid: 1,
        }
    }

    pub fn exporters(&self) -> &ExporterRegistry {
        &self.exporters
    }

    pub fn extension_maps(&self) -> &ExtensionMapRegistry {
        &self.maps
    }

    /// Exporter-info records flushed so far, in flush order.
    pub fn flushed_exporters(&self) -> &[ExporterInfo] {
        &self.exporter_infos
    }

    /// Sampler-info records flushed so far, in flush order.
    pub fn flushed_samplers(&self) -> &[SamplerInfo] {
        &self.sampler_infos
    }

    /// Split into the exporter registry and a handle over the remaining sink
    /// state, so both sides can be borrowed at once.
    pub(crate) fn parts(&mut self) -> (&mut ExporterRegistry, SinkHandle<'_>) {
        let received_ms = self.received.timestamp_millis() as u64;
        (
            &mut self.exporters,
            SinkHandle {
                peer: self.peer,
                received_ms,
                block: &mut self.block,
                stats: &mut self.stats,
                maps: &mut self.maps,
                exporter_infos: &mut self.exporter_infos,
                sampler_infos: &mut self.sampler_infos,
                next_sysid: &mut self.next_sysid,
            },
        )
    }
}

/// Mutable view over a [`FlowSource`] minus its exporter registry.
#[derive(Debug)]
pub struct SinkHandle<'a> {
    pub peer: IpAddr,
    /// Receive time of the current datagram, msec since the epoch.
    pub received_ms: u64,
    pub block: &'a mut OutputBlock,
    pub stats: &'a mut StatRecord,
    maps: &'a mut ExtensionMapRegistry,
    exporter_infos: &'a mut Vec<ExporterInfo>,
    sampler_infos: &'a mut Vec<SamplerInfo>,
    next_sysid: &'a mut u16,
}

impl SinkHandle<'_> {
    pub fn check_buffer_space(&self, need: usize) -> bool {
        self.block.has_space(need)
    }

    /// Record the exporter identity; assigns the sysid on first flush.
    pub fn flush_exporter(&mut self, info: &mut ExporterInfo) {
        if info.sysid == 0 {
            info.sysid = *self.next_sysid;
            *self.next_sysid += 1;
        }
        self.exporter_infos.push(*info);
    }

    pub fn flush_sampler(&mut self, info: &SamplerInfo) {
        self.sampler_infos.push(*info);
    }

    /// Register a new or refreshed extension map; assigns the map id on
    /// first registration.
    pub fn add_extension_map(&mut self, map: &mut ExtensionMap) {
        self.maps.add(map);
    }

    pub fn remove_extension_map(&mut self, map_id: u16) {
        self.maps.remove(map_id);
    }

    pub fn reinit_extension_maps(&mut self) {
        self.maps.reinit();
    }
}
