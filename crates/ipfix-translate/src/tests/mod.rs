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

//! End-to-end tests driving whole datagrams through the decoder.

use std::net::IpAddr;

use crate::{
    decoder::{DecoderConfig, IpfixDecoder, PacketProcessingError},
    extension::Extension,
    ie,
    sequencer::Opcode,
    sink::FlowSource,
    template::VARIABLE_LENGTH,
};

const PEER: [u8; 4] = [192, 0, 2, 1];
const RECEIVED_SECS: i64 = 1_700_000_100;

fn flow_source() -> FlowSource {
    let mut fs = FlowSource::new(IpAddr::from(PEER), 1024 * 1024);
    fs.received = chrono::DateTime::from_timestamp(RECEIVED_SECS, 0).unwrap();
    fs
}

fn message(export_time: u32, sequence: u32, domain: u32, sets: &[Vec<u8>]) -> Vec<u8> {
    let length = 16 + sets.iter().map(Vec::len).sum::<usize>();
    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&10u16.to_be_bytes());
    out.extend_from_slice(&(length as u16).to_be_bytes());
    out.extend_from_slice(&export_time.to_be_bytes());
    out.extend_from_slice(&sequence.to_be_bytes());
    out.extend_from_slice(&domain.to_be_bytes());
    for set in sets {
        out.extend_from_slice(set);
    }
    out
}

fn set(id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&((payload.len() + 4) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// `(element id, length, enterprise number)` triples, in wire order.
fn template_set(template_id: u16, fields: &[(u16, u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&template_id.to_be_bytes());
    payload.extend_from_slice(&(fields.len() as u16).to_be_bytes());
    for (element, length, pen) in fields {
        if *pen != 0 {
            payload.extend_from_slice(&(element | 0x8000).to_be_bytes());
            payload.extend_from_slice(&length.to_be_bytes());
            payload.extend_from_slice(&pen.to_be_bytes());
        } else {
            payload.extend_from_slice(&element.to_be_bytes());
            payload.extend_from_slice(&length.to_be_bytes());
        }
    }
    set(2, &payload)
}

fn withdrawal_set(template_id: u16) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&template_id.to_be_bytes());
    payload.extend_from_slice(&0u16.to_be_bytes());
    set(2, &payload)
}

fn options_template_set(
    template_id: u16,
    scopes: &[(u16, u16)],
    options: &[(u16, u16)],
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&template_id.to_be_bytes());
    payload.extend_from_slice(&((scopes.len() + options.len()) as u16).to_be_bytes());
    payload.extend_from_slice(&(scopes.len() as u16).to_be_bytes());
    for (element, length) in scopes.iter().chain(options) {
        payload.extend_from_slice(&element.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());
    }
    set(3, &payload)
}

/// Template id 256: absolute-millisecond times, an IPv4 5-tuple and 4-byte
/// delta counters. Output layout: addresses at 32/36, packets at 40, bytes
/// at 48, router IP at 56, receive time at 60, 68 bytes total.
fn base_template() -> Vec<u8> {
    template_set(
        256,
        &[
            (ie::FLOW_START_MILLISECONDS, 8, 0),
            (ie::FLOW_END_MILLISECONDS, 8, 0),
            (ie::PROTOCOL_IDENTIFIER, 1, 0),
            (ie::SOURCE_TRANSPORT_PORT, 2, 0),
            (ie::DESTINATION_TRANSPORT_PORT, 2, 0),
            (ie::SOURCE_IPV4_ADDRESS, 4, 0),
            (ie::DESTINATION_IPV4_ADDRESS, 4, 0),
            (ie::PACKET_DELTA_COUNT, 4, 0),
            (ie::OCTET_DELTA_COUNT, 4, 0),
        ],
    )
}

#[allow(clippy::too_many_arguments)]
fn base_record(
    start: u64,
    end: u64,
    prot: u8,
    src_port: u16,
    dst_port: u16,
    src: u32,
    dst: u32,
    packets: u32,
    bytes: u32,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&start.to_be_bytes());
    out.extend_from_slice(&end.to_be_bytes());
    out.push(prot);
    out.extend_from_slice(&src_port.to_be_bytes());
    out.extend_from_slice(&dst_port.to_be_bytes());
    out.extend_from_slice(&src.to_be_bytes());
    out.extend_from_slice(&dst.to_be_bytes());
    out.extend_from_slice(&packets.to_be_bytes());
    out.extend_from_slice(&bytes.to_be_bytes());
    out
}

#[test]
fn test_template_add_and_single_ipv4_record() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();

    let record = base_record(
        1_700_000_000_000,
        1_700_000_000_500,
        6,
        443,
        33000,
        0x0102_0304,
        0x0506_0708,
        10,
        1500,
    );
    let msg = message(
        1_700_000_001,
        0,
        1,
        &[base_template(), set(256, &record)],
    );
    decoder.process_packet(&msg, &mut fs).unwrap();

    assert_eq!(fs.block.num_records(), 1);
    let view = fs.block.records().next().unwrap();
    assert_eq!(view.record_type(), crate::record::COMMON_RECORD_TYPE);
    assert_eq!(view.nfversion(), 10);
    assert_eq!(view.size(), 68);
    assert_eq!(view.size() % 4, 0);
    assert_eq!(view.first(), 1_700_000_000);
    assert_eq!(view.msec_first(), 0);
    assert_eq!(view.last(), 1_700_000_000);
    assert_eq!(view.msec_last(), 500);
    assert_eq!(view.prot(), 6);
    assert_eq!(view.src_port(), 443);
    assert_eq!(view.dst_port(), 33000);
    assert_eq!(view.exporter_sysid(), 1);
    assert_eq!(view.u32_at(32), 0x0102_0304);
    assert_eq!(view.u32_at(36), 0x0506_0708);
    assert_eq!(view.u64_at(40), 10);
    assert_eq!(view.u64_at(48), 1500);
    // the collector-side values
    assert_eq!(view.u32_at(56), u32::from_be_bytes(PEER));
    assert_eq!(view.u64_at(60), RECEIVED_SECS as u64 * 1000);

    // one registered map listing router IP and receive time
    let maps = fs.extension_maps().maps();
    assert_eq!(maps.len(), 1);
    assert_eq!(
        maps[0].ids(),
        &[Extension::RouterIpV4, Extension::Received]
    );
    assert_eq!(view.ext_map(), maps[0].map_id());

    assert_eq!(fs.stats.flows, 1);
    assert_eq!(fs.stats.flows_tcp, 1);
    assert_eq!(fs.stats.packets, 10);
    assert_eq!(fs.stats.bytes, 1500);
    assert_eq!(fs.stats.first_seen, 1_700_000_000_000);
    assert_eq!(fs.stats.last_seen, 1_700_000_000_500);
}

#[test]
fn test_sequencer_consumption_matches_template_wire_size() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let msg = message(1_700_000_001, 0, 1, &[base_template()]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    let exporter = fs.exporters().iter().next().unwrap();
    let table = &exporter.templates[&256];
    assert_eq!(table.input_record_size(), 37);
    assert_eq!(table.output_record_size, 68);
}

#[test]
fn test_template_refresh_widens_counter() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let msg = message(1_700_000_001, 0, 1, &[base_template()]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    // same id, octetDeltaCount widened 4 -> 8
    let refreshed = template_set(
        256,
        &[
            (ie::FLOW_START_MILLISECONDS, 8, 0),
            (ie::FLOW_END_MILLISECONDS, 8, 0),
            (ie::PROTOCOL_IDENTIFIER, 1, 0),
            (ie::SOURCE_TRANSPORT_PORT, 2, 0),
            (ie::DESTINATION_TRANSPORT_PORT, 2, 0),
            (ie::SOURCE_IPV4_ADDRESS, 4, 0),
            (ie::DESTINATION_IPV4_ADDRESS, 4, 0),
            (ie::PACKET_DELTA_COUNT, 4, 0),
            (ie::OCTET_DELTA_COUNT, 8, 0),
        ],
    );
    let mut record = Vec::new();
    record.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    record.extend_from_slice(&1_700_000_000_500u64.to_be_bytes());
    record.push(6);
    record.extend_from_slice(&443u16.to_be_bytes());
    record.extend_from_slice(&33000u16.to_be_bytes());
    record.extend_from_slice(&0x0102_0304u32.to_be_bytes());
    record.extend_from_slice(&0x0506_0708u32.to_be_bytes());
    record.extend_from_slice(&10u32.to_be_bytes());
    record.extend_from_slice(&(1u64 << 32).to_be_bytes());
    let msg = message(1_700_000_002, 0, 1, &[refreshed, set(256, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    assert_eq!(fs.block.num_records(), 1);
    let view = fs.block.records().next().unwrap();
    assert_eq!(view.u64_at(48), 1u64 << 32);
    // identical extension set: the map was not re-registered
    assert_eq!(fs.extension_maps().maps().len(), 1);
}

#[test]
fn test_template_withdrawal_discards_data() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let msg = message(1_700_000_001, 0, 1, &[base_template()]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    assert_eq!(fs.extension_maps().maps().len(), 1);

    let record = base_record(0, 0, 6, 1, 2, 3, 4, 5, 6);
    let msg = message(
        1_700_000_002,
        0,
        1,
        &[withdrawal_set(256), set(256, &record)],
    );
    decoder.process_packet(&msg, &mut fs).unwrap();

    assert_eq!(fs.block.num_records(), 0);
    assert!(fs.extension_maps().maps().is_empty());
    let exporter = fs.exporters().iter().next().unwrap();
    assert!(exporter.templates.is_empty());
}

#[test]
fn test_withdraw_all_clears_every_template() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let second = template_set(
        257,
        &[
            (ie::FLOW_START_MILLISECONDS, 8, 0),
            (ie::FLOW_END_MILLISECONDS, 8, 0),
            (ie::SOURCE_IPV4_ADDRESS, 4, 0),
            (ie::DESTINATION_IPV4_ADDRESS, 4, 0),
            (ie::PACKET_DELTA_COUNT, 4, 0),
            (ie::OCTET_DELTA_COUNT, 4, 0),
        ],
    );
    let msg = message(1_700_000_001, 0, 1, &[base_template(), second]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    let msg = message(1_700_000_002, 0, 1, &[withdrawal_set(2)]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    let exporter = fs.exporters().iter().next().unwrap();
    assert!(exporter.templates.is_empty());
    assert!(fs.extension_maps().maps().is_empty());
}

#[test]
fn test_standard_sampler_scales_counters() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();

    // standard sampling: algorithm #35, interval #34
    let options = options_template_set(
        300,
        &[(149, 4)],
        &[(ie::SAMPLING_ALGORITHM, 1), (ie::SAMPLING_INTERVAL, 4)],
    );
    let mut option_data = Vec::new();
    option_data.extend_from_slice(&1u32.to_be_bytes()); // scope
    option_data.push(2); // algorithm
    option_data.extend_from_slice(&1000u32.to_be_bytes()); // interval
    option_data.extend_from_slice(&[0; 3]); // padding

    let record = base_record(
        1_700_000_000_000,
        1_700_000_000_500,
        17,
        53,
        4242,
        1,
        2,
        3,
        300,
    );
    let msg = message(
        1_700_000_001,
        0,
        1,
        &[
            base_template(),
            options,
            set(300, &option_data),
            set(256, &record),
        ],
    );
    decoder.process_packet(&msg, &mut fs).unwrap();

    let sampler = fs.flushed_samplers().last().unwrap();
    assert_eq!(sampler.id, crate::exporter::DEFAULT_SAMPLER_ID);
    assert_eq!(sampler.interval, 1000);

    assert_eq!(fs.block.num_records(), 1);
    let view = fs.block.records().next().unwrap();
    assert_eq!(view.u64_at(40), 3000);
    assert_eq!(view.u64_at(48), 300_000);
    assert_ne!(view.flags() & crate::record::FLAG_SAMPLED, 0);
}

#[test]
fn test_individual_sampler_is_recorded_but_not_applied() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();

    let options = options_template_set(
        301,
        &[(149, 4)],
        &[
            (ie::SELECTOR_ID, 4),
            (ie::SELECTOR_ALGORITHM, 2),
            (ie::SAMPLING_PACKET_INTERVAL, 4),
        ],
    );
    let mut option_data = Vec::new();
    option_data.extend_from_slice(&1u32.to_be_bytes());
    option_data.extend_from_slice(&7u32.to_be_bytes());
    option_data.extend_from_slice(&2u16.to_be_bytes());
    option_data.extend_from_slice(&1000u32.to_be_bytes());

    let record = base_record(1_700_000_000_000, 1_700_000_000_500, 17, 53, 4242, 1, 2, 3, 300);
    let msg = message(
        1_700_000_001,
        0,
        1,
        &[
            base_template(),
            options,
            set(301, &option_data),
            set(256, &record),
        ],
    );
    decoder.process_packet(&msg, &mut fs).unwrap();

    // only the sampler announced with id -1 scales counters
    let sampler = fs.flushed_samplers().last().unwrap();
    assert_eq!(sampler.id, 7);
    let view = fs.block.records().next().unwrap();
    assert_eq!(view.u64_at(40), 3);
    assert_eq!(view.flags() & crate::record::FLAG_SAMPLED, 0);
}

#[test]
fn test_overwrite_sampling_beats_announced_sampler() {
    let mut decoder = IpfixDecoder::new(DecoderConfig {
        overwrite_sampling: 10,
        ..Default::default()
    });
    let mut fs = flow_source();
    let record = base_record(1_700_000_000_000, 1_700_000_000_500, 6, 1, 2, 3, 4, 5, 100);
    let msg = message(1_700_000_001, 0, 1, &[base_template(), set(256, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    let view = fs.block.records().next().unwrap();
    assert_eq!(view.u64_at(40), 50);
    assert_eq!(view.u64_at(48), 1000);
}

#[test]
fn test_sampling_rates_scale_large_counters() {
    for rate in [1u32, 64, 1000] {
        let mut decoder = IpfixDecoder::new(DecoderConfig {
            default_sampling: rate,
            ..Default::default()
        });
        let mut fs = flow_source();
        let template = template_set(
            256,
            &[
                (ie::FLOW_START_MILLISECONDS, 8, 0),
                (ie::FLOW_END_MILLISECONDS, 8, 0),
                (ie::SOURCE_IPV4_ADDRESS, 4, 0),
                (ie::DESTINATION_IPV4_ADDRESS, 4, 0),
                (ie::PACKET_DELTA_COUNT, 8, 0),
                (ie::OCTET_DELTA_COUNT, 8, 0),
            ],
        );
        let value = 1u64 << 40;
        let mut record = Vec::new();
        record.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
        record.extend_from_slice(&1_700_000_000_500u64.to_be_bytes());
        record.extend_from_slice(&1u32.to_be_bytes());
        record.extend_from_slice(&2u32.to_be_bytes());
        record.extend_from_slice(&value.to_be_bytes());
        record.extend_from_slice(&value.to_be_bytes());
        let msg = message(1_700_000_001, 0, 1, &[template, set(256, &record)]);
        decoder.process_packet(&msg, &mut fs).unwrap();
        let view = fs.block.records().next().unwrap();
        assert_eq!(view.u64_at(40), value * u64::from(rate));
        assert_eq!(view.u64_at(48), value * u64::from(rate));
    }
}

#[test]
fn test_sequence_gap_counted_once_and_resynced() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let record = base_record(1_700_000_000_000, 1_700_000_000_500, 6, 1, 2, 3, 4, 5, 6);

    let msg = message(1_700_000_001, 100, 1, &[base_template(), set(256, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    assert_eq!(fs.stats.sequence_failure, 0);

    // gap: expected 101, got 150
    let msg = message(1_700_000_002, 150, 1, &[set(256, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    assert_eq!(fs.stats.sequence_failure, 1);

    // resynced: 150 + 1 emitted record
    let msg = message(1_700_000_003, 151, 1, &[set(256, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    assert_eq!(fs.stats.sequence_failure, 1);
    let exporter = fs.exporters().iter().next().unwrap();
    assert_eq!(exporter.sequence_failure, 1);
    assert_eq!(exporter.packet_sequence, 152);
}

#[test]
fn test_padding_is_not_an_error() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();

    // a header-only flowset is padding, as are trailing zero bytes
    let mut sets = vec![base_template()];
    sets.push(vec![0x01, 0x00, 0x00, 0x04]);
    let mut msg = message(1_700_000_001, 0, 1, &sets);
    let new_len = (msg.len() + 3) as u16;
    msg[2..4].copy_from_slice(&new_len.to_be_bytes());
    msg.extend_from_slice(&[0, 0, 0]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    assert_eq!(fs.block.num_records(), 0);
    let exporter = fs.exporters().iter().next().unwrap();
    assert_eq!(exporter.padding_errors, 0);
    assert!(exporter.templates.contains_key(&256));
}

#[test]
fn test_flowset_length_beyond_datagram_is_fatal() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let mut bogus = Vec::new();
    bogus.extend_from_slice(&256u16.to_be_bytes());
    bogus.extend_from_slice(&100u16.to_be_bytes());
    bogus.extend_from_slice(&[0u8; 16]);
    let msg = message(1_700_000_001, 0, 1, &[bogus]);
    let err = decoder.process_packet(&msg, &mut fs).unwrap_err();
    assert!(matches!(
        err,
        PacketProcessingError::SetLengthExceedsRemaining { length: 100, .. }
    ));
    assert_eq!(fs.block.num_records(), 0);
}

#[test]
fn test_zero_length_flowset_is_fatal() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let bogus = vec![0x01, 0x00, 0x00, 0x00, 0xde, 0xad];
    let msg = message(1_700_000_001, 0, 1, &[bogus]);
    let err = decoder.process_packet(&msg, &mut fs).unwrap_err();
    assert!(matches!(err, PacketProcessingError::ZeroLengthSet { .. }));
}

#[test]
fn test_truncated_template_record_aborts_flowset() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    // claims 5 fields, carries 1
    let mut payload = Vec::new();
    payload.extend_from_slice(&256u16.to_be_bytes());
    payload.extend_from_slice(&5u16.to_be_bytes());
    payload.extend_from_slice(&ie::SOURCE_IPV4_ADDRESS.to_be_bytes());
    payload.extend_from_slice(&4u16.to_be_bytes());
    let msg = message(1_700_000_001, 0, 1, &[set(2, &payload)]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    let exporter = fs.exporters().iter().next().unwrap();
    assert!(exporter.templates.is_empty());
}

#[test]
fn test_reverse_elements_feed_out_counters() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let template = template_set(
        270,
        &[
            (ie::FLOW_START_MILLISECONDS, 8, 0),
            (ie::FLOW_END_MILLISECONDS, 8, 0),
            (ie::SOURCE_IPV4_ADDRESS, 4, 0),
            (ie::DESTINATION_IPV4_ADDRESS, 4, 0),
            (ie::PACKET_DELTA_COUNT, 4, 0),
            (ie::OCTET_DELTA_COUNT, 4, 0),
            (
                ie::PACKET_TOTAL_COUNT,
                8,
                crate::REVERSE_INFORMATION_ELEMENT_PEN,
            ),
            (
                ie::OCTET_TOTAL_COUNT,
                8,
                crate::REVERSE_INFORMATION_ELEMENT_PEN,
            ),
        ],
    );
    let mut record = Vec::new();
    record.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    record.extend_from_slice(&1_700_000_000_500u64.to_be_bytes());
    record.extend_from_slice(&1u32.to_be_bytes());
    record.extend_from_slice(&2u32.to_be_bytes());
    record.extend_from_slice(&10u32.to_be_bytes()); // packets
    record.extend_from_slice(&1500u32.to_be_bytes()); // bytes
    record.extend_from_slice(&20u64.to_be_bytes()); // reverse packets
    record.extend_from_slice(&3000u64.to_be_bytes()); // reverse bytes
    let msg = message(1_700_000_001, 0, 1, &[template, set(270, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    let maps = fs.extension_maps().maps();
    assert_eq!(
        maps[0].ids(),
        &[
            Extension::OutPackets,
            Extension::OutBytes,
            Extension::RouterIpV4,
            Extension::Received,
        ]
    );
    let view = fs.block.records().next().unwrap();
    // forward counters at 40/48, reverse at 56/64
    assert_eq!(view.u64_at(40), 10);
    assert_eq!(view.u64_at(48), 1500);
    assert_eq!(view.u64_at(56), 20);
    assert_eq!(view.u64_at(64), 3000);
    assert_eq!(fs.stats.packets, 30);
    assert_eq!(fs.stats.bytes, 4500);
}

#[test]
fn test_icmp_type_code_relocates_to_dst_port() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let template = template_set(
        280,
        &[
            (ie::PROTOCOL_IDENTIFIER, 1, 0),
            (ie::ICMP_TYPE_CODE_IPV4, 2, 0),
            (ie::SOURCE_TRANSPORT_PORT, 2, 0),
            (ie::DESTINATION_TRANSPORT_PORT, 2, 0),
        ],
    );
    let mut record = Vec::new();
    record.push(1); // ICMP
    record.extend_from_slice(&0x0303u16.to_be_bytes());
    record.extend_from_slice(&1234u16.to_be_bytes());
    record.extend_from_slice(&9u16.to_be_bytes());
    let msg = message(1_700_000_001, 0, 1, &[template, set(280, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    let view = fs.block.records().next().unwrap();
    assert_eq!(view.prot(), 1);
    assert_eq!(view.src_port(), 0);
    assert_eq!(view.dst_port(), 0x0303);
    assert_eq!(fs.stats.flows_icmp, 1);
}

#[test]
fn test_non_icmp_record_keeps_ports() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let template = template_set(
        281,
        &[
            (ie::PROTOCOL_IDENTIFIER, 1, 0),
            (ie::ICMP_TYPE_CODE_IPV4, 2, 0),
            (ie::SOURCE_TRANSPORT_PORT, 2, 0),
            (ie::DESTINATION_TRANSPORT_PORT, 2, 0),
        ],
    );
    let mut record = Vec::new();
    record.push(6); // TCP
    record.extend_from_slice(&0x0303u16.to_be_bytes());
    record.extend_from_slice(&1234u16.to_be_bytes());
    record.extend_from_slice(&80u16.to_be_bytes());
    let msg = message(1_700_000_001, 0, 1, &[template, set(281, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    let view = fs.block.records().next().unwrap();
    assert_eq!(view.src_port(), 1234);
    assert_eq!(view.dst_port(), 80);
}

#[test]
fn test_prehistoric_times_are_zeroed() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    // 100_000 msec after the epoch is long before 1996
    let record = base_record(100_000, 200_000, 6, 1, 2, 3, 4, 5, 6);
    let msg = message(1_700_000_001, 0, 1, &[base_template(), set(256, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    let view = fs.block.records().next().unwrap();
    assert_eq!(view.first(), 0);
    assert_eq!(view.msec_first(), 0);
    assert_eq!(view.last(), 0);
    assert_eq!(view.msec_last(), 0);
    assert_eq!(fs.stats.first_seen, u64::MAX);
    assert_eq!(fs.stats.last_seen, 0);
}

#[test]
fn test_sysup_relative_times_use_option_init_time() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let template = template_set(
        290,
        &[
            (ie::FLOW_START_SYS_UP_TIME, 4, 0),
            (ie::FLOW_END_SYS_UP_TIME, 4, 0),
            (ie::PROTOCOL_IDENTIFIER, 1, 0),
            (ie::SOURCE_IPV4_ADDRESS, 4, 0),
            (ie::DESTINATION_IPV4_ADDRESS, 4, 0),
            (ie::PACKET_DELTA_COUNT, 4, 0),
            (ie::OCTET_DELTA_COUNT, 4, 0),
        ],
    );
    let options = options_template_set(
        291,
        &[(149, 4)],
        &[(ie::SYSTEM_INIT_TIME_MILLISECONDS, 8)],
    );
    let mut option_data = Vec::new();
    option_data.extend_from_slice(&1u32.to_be_bytes());
    option_data.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());

    let mut record = Vec::new();
    record.extend_from_slice(&1000u32.to_be_bytes());
    record.extend_from_slice(&2000u32.to_be_bytes());
    record.push(6);
    record.extend_from_slice(&1u32.to_be_bytes());
    record.extend_from_slice(&2u32.to_be_bytes());
    record.extend_from_slice(&5u32.to_be_bytes());
    record.extend_from_slice(&600u32.to_be_bytes());

    let msg = message(
        1_700_000_001,
        0,
        1,
        &[template, options, set(291, &option_data), set(290, &record)],
    );
    decoder.process_packet(&msg, &mut fs).unwrap();

    let view = fs.block.records().next().unwrap();
    assert_eq!(view.first(), 1_700_000_001);
    assert_eq!(view.msec_first(), 0);
    assert_eq!(view.last(), 1_700_000_002);
    assert_eq!(view.msec_last(), 0);
}

#[test]
fn test_variable_length_fields_are_stepped_over() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let template = template_set(
        295,
        &[
            (ie::SOURCE_TRANSPORT_PORT, 2, 0),
            (94, VARIABLE_LENGTH, 0),
            (ie::DESTINATION_TRANSPORT_PORT, 2, 0),
        ],
    );
    let mut payload = Vec::new();
    // first record: 5-byte blob
    payload.extend_from_slice(&1u16.to_be_bytes());
    payload.push(5);
    payload.extend_from_slice(&[0xaa; 5]);
    payload.extend_from_slice(&2u16.to_be_bytes());
    // second record: empty blob
    payload.extend_from_slice(&3u16.to_be_bytes());
    payload.push(0);
    payload.extend_from_slice(&4u16.to_be_bytes());
    let msg = message(1_700_000_001, 0, 1, &[template, set(295, &payload)]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    assert_eq!(fs.block.num_records(), 2);
    let mut records = fs.block.records();
    let first = records.next().unwrap();
    assert_eq!(first.src_port(), 1);
    assert_eq!(first.dst_port(), 2);
    let second = records.next().unwrap();
    assert_eq!(second.src_port(), 3);
    assert_eq!(second.dst_port(), 4);
}

#[test]
fn test_output_buffer_full_aborts_datagram() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = FlowSource::new(IpAddr::from(PEER), 32);
    let record = base_record(1_700_000_000_000, 1_700_000_000_500, 6, 1, 2, 3, 4, 5, 6);
    let msg = message(1_700_000_001, 0, 1, &[base_template(), set(256, &record)]);
    let err = decoder.process_packet(&msg, &mut fs).unwrap_err();
    assert!(matches!(
        err,
        PacketProcessingError::OutputBufferFull { needed: 68 }
    ));
    assert_eq!(fs.block.num_records(), 0);
}

#[test]
fn test_two_records_in_one_flowset() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let mut payload = base_record(1_700_000_000_000, 1_700_000_000_500, 6, 1, 2, 3, 4, 5, 6);
    payload.extend_from_slice(&base_record(
        1_700_000_001_000,
        1_700_000_001_500,
        17,
        7,
        8,
        9,
        10,
        11,
        12,
    ));
    let msg = message(1_700_000_001, 0, 1, &[base_template(), set(256, &payload)]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    assert_eq!(fs.block.num_records(), 2);
    assert_eq!(fs.stats.flows, 2);
    assert_eq!(fs.stats.flows_tcp, 1);
    assert_eq!(fs.stats.flows_udp, 1);
    let exporter = fs.exporters().iter().next().unwrap();
    assert_eq!(exporter.flows, 2);
    assert_eq!(exporter.packet_sequence, 2);
    assert_eq!(fs.block.len(), 2 * 68);
}

#[test]
fn test_unknown_data_flowset_is_skipped() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let msg = message(1_700_000_001, 0, 1, &[set(999, &[1, 2, 3, 4, 5, 6])]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    assert_eq!(fs.block.num_records(), 0);
}

#[test]
fn test_reserved_flowset_id_is_skipped() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let msg = message(1_700_000_001, 0, 1, &[set(9, &[0u8; 8]), base_template()]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    // processing continued past the reserved set
    let exporter = fs.exporters().iter().next().unwrap();
    assert!(exporter.templates.contains_key(&256));
}

#[test]
fn test_exporters_are_per_observation_domain() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let msg = message(1_700_000_001, 0, 1, &[base_template()]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    let msg = message(1_700_000_001, 0, 2, &[base_template()]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    assert_eq!(fs.exporters().len(), 2);
    assert_eq!(fs.flushed_exporters().len(), 2);
    assert_eq!(fs.flushed_exporters()[0].sysid, 1);
    assert_eq!(fs.flushed_exporters()[1].sysid, 2);
}

#[test]
fn test_all_skip_template_is_abandoned() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let template = template_set(296, &[(9999, 4, 0), (9998, 2, 0)]);
    let msg = message(1_700_000_001, 0, 1, &[template]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    let exporter = fs.exporters().iter().next().unwrap();
    assert!(exporter.templates.is_empty());
    assert!(fs.extension_maps().maps().is_empty());
}

#[test]
fn test_ipv6_addresses_and_flag() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let template = template_set(
        297,
        &[
            (ie::FLOW_START_MILLISECONDS, 8, 0),
            (ie::FLOW_END_MILLISECONDS, 8, 0),
            (ie::SOURCE_IPV6_ADDRESS, 16, 0),
            (ie::DESTINATION_IPV6_ADDRESS, 16, 0),
            (ie::PACKET_DELTA_COUNT, 4, 0),
            (ie::OCTET_DELTA_COUNT, 4, 0),
        ],
    );
    let src = 0x2001_0db8_0000_0000_0000_0000_0000_0001u128;
    let dst = 0x2001_0db8_0000_0000_0000_0000_0000_0002u128;
    let mut record = Vec::new();
    record.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    record.extend_from_slice(&1_700_000_000_500u64.to_be_bytes());
    record.extend_from_slice(&src.to_be_bytes());
    record.extend_from_slice(&dst.to_be_bytes());
    record.extend_from_slice(&5u32.to_be_bytes());
    record.extend_from_slice(&600u32.to_be_bytes());
    let msg = message(1_700_000_001, 0, 1, &[template, set(297, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    let view = fs.block.records().next().unwrap();
    assert_ne!(view.flags() & crate::record::FLAG_IPV6_ADDR, 0);
    // v6 addresses land as two 64-bit words each, high half first
    assert_eq!(view.u64_at(32), (src >> 64) as u64);
    assert_eq!(view.u64_at(40), src as u64);
    assert_eq!(view.u64_at(48), (dst >> 64) as u64);
    assert_eq!(view.u64_at(56), dst as u64);
}

#[test]
fn test_disabled_extensions_shrink_the_record() {
    let mut config = DecoderConfig::default();
    config
        .extensions
        .set_enabled(Extension::RouterIpV4, false);
    config.extensions.set_enabled(Extension::Received, false);
    let mut decoder = IpfixDecoder::new(config);
    let mut fs = flow_source();
    let record = base_record(
        1_700_000_000_000,
        1_700_000_000_500,
        6,
        443,
        33000,
        1,
        2,
        10,
        1500,
    );
    let msg = message(1_700_000_001, 0, 1, &[base_template(), set(256, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();

    let view = fs.block.records().next().unwrap();
    assert_eq!(view.size(), 56);
    let maps = fs.extension_maps().maps();
    assert_eq!(maps.len(), 1);
    assert!(maps[0].ids().is_empty());
    assert_eq!(maps[0].extension_size(), 0);
}

#[test]
fn test_rejected_datagram_does_not_poison_the_next() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let bogus = vec![0x01, 0x00, 0x00, 0x00, 0xde, 0xad];
    let msg = message(1_700_000_001, 0, 1, &[bogus]);
    assert!(decoder.process_packet(&msg, &mut fs).is_err());

    let record = base_record(1_700_000_000_000, 1_700_000_000_500, 6, 1, 2, 3, 4, 5, 6);
    let msg = message(1_700_000_002, 0, 1, &[base_template(), set(256, &record)]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    assert_eq!(fs.block.num_records(), 1);
}

#[test]
fn test_sequencer_has_dyn_skip_for_variable_field() {
    let mut decoder = IpfixDecoder::default();
    let mut fs = flow_source();
    let template = template_set(
        298,
        &[
            (ie::SOURCE_TRANSPORT_PORT, 2, 0),
            (94, VARIABLE_LENGTH, 0),
            (ie::DESTINATION_TRANSPORT_PORT, 2, 0),
        ],
    );
    let msg = message(1_700_000_001, 0, 1, &[template]);
    decoder.process_packet(&msg, &mut fs).unwrap();
    let exporter = fs.exporters().iter().next().unwrap();
    let table = &exporter.templates[&298];
    assert!(table.sequencer.iter().any(|s| s.opcode == Opcode::DynSkip));
}
