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

//! The information-element catalog.
//!
//! Maps `(element id, wire length)` to a sequencer opcode pair, an output
//! width and the extension the element contributes to. Elements the catalog
//! does not list are stepped over, never decoded.

use std::collections::HashMap;

use crate::{
    extension::Extension,
    sequencer::Opcode::{self, *},
};

// IANA information element identifiers the catalog knows about.
pub const OCTET_DELTA_COUNT: u16 = 1;
pub const PACKET_DELTA_COUNT: u16 = 2;
pub const PROTOCOL_IDENTIFIER: u16 = 4;
pub const IP_CLASS_OF_SERVICE: u16 = 5;
pub const TCP_CONTROL_BITS: u16 = 6;
pub const SOURCE_TRANSPORT_PORT: u16 = 7;
pub const SOURCE_IPV4_ADDRESS: u16 = 8;
pub const SOURCE_IPV4_PREFIX_LENGTH: u16 = 9;
pub const INGRESS_INTERFACE: u16 = 10;
pub const DESTINATION_TRANSPORT_PORT: u16 = 11;
pub const DESTINATION_IPV4_ADDRESS: u16 = 12;
pub const DESTINATION_IPV4_PREFIX_LENGTH: u16 = 13;
pub const EGRESS_INTERFACE: u16 = 14;
pub const IP_NEXT_HOP_IPV4_ADDRESS: u16 = 15;
pub const BGP_SOURCE_AS_NUMBER: u16 = 16;
pub const BGP_DESTINATION_AS_NUMBER: u16 = 17;
pub const BGP_NEXT_HOP_IPV4_ADDRESS: u16 = 18;
pub const FLOW_END_SYS_UP_TIME: u16 = 21;
pub const FLOW_START_SYS_UP_TIME: u16 = 22;
pub const POST_OCTET_DELTA_COUNT: u16 = 23;
pub const POST_PACKET_DELTA_COUNT: u16 = 24;
pub const SOURCE_IPV6_ADDRESS: u16 = 27;
pub const DESTINATION_IPV6_ADDRESS: u16 = 28;
pub const SOURCE_IPV6_PREFIX_LENGTH: u16 = 29;
pub const DESTINATION_IPV6_PREFIX_LENGTH: u16 = 30;
pub const ICMP_TYPE_CODE_IPV4: u16 = 32;
pub const SAMPLING_INTERVAL: u16 = 34;
pub const SAMPLING_ALGORITHM: u16 = 35;
pub const SAMPLER_ID: u16 = 48;
pub const SAMPLER_MODE: u16 = 49;
pub const SAMPLER_RANDOM_INTERVAL: u16 = 50;
pub const POST_IP_CLASS_OF_SERVICE: u16 = 55;
pub const SOURCE_MAC_ADDRESS: u16 = 56;
pub const POST_DESTINATION_MAC_ADDRESS: u16 = 57;
pub const VLAN_ID: u16 = 58;
pub const POST_VLAN_ID: u16 = 59;
pub const FLOW_DIRECTION: u16 = 61;
pub const IP_NEXT_HOP_IPV6_ADDRESS: u16 = 62;
pub const BGP_NEXT_HOP_IPV6_ADDRESS: u16 = 63;
pub const MPLS_TOP_LABEL_STACK_SECTION: u16 = 70;
pub const MPLS_LABEL_STACK_SECTION_2: u16 = 71;
pub const MPLS_LABEL_STACK_SECTION_3: u16 = 72;
pub const MPLS_LABEL_STACK_SECTION_4: u16 = 73;
pub const MPLS_LABEL_STACK_SECTION_5: u16 = 74;
pub const MPLS_LABEL_STACK_SECTION_6: u16 = 75;
pub const MPLS_LABEL_STACK_SECTION_7: u16 = 76;
pub const MPLS_LABEL_STACK_SECTION_8: u16 = 77;
pub const MPLS_LABEL_STACK_SECTION_9: u16 = 78;
pub const MPLS_LABEL_STACK_SECTION_10: u16 = 79;
pub const DESTINATION_MAC_ADDRESS: u16 = 80;
pub const POST_SOURCE_MAC_ADDRESS: u16 = 81;
pub const OCTET_TOTAL_COUNT: u16 = 85;
pub const PACKET_TOTAL_COUNT: u16 = 86;
pub const FORWARDING_STATUS: u16 = 89;
pub const FLOW_END_REASON: u16 = 136;
pub const ICMP_TYPE_CODE_IPV6: u16 = 139;
pub const FLOW_START_SECONDS: u16 = 150;
pub const FLOW_END_SECONDS: u16 = 151;
pub const FLOW_START_MILLISECONDS: u16 = 152;
pub const FLOW_END_MILLISECONDS: u16 = 153;
pub const FLOW_START_DELTA_MICROSECONDS: u16 = 158;
pub const FLOW_END_DELTA_MICROSECONDS: u16 = 159;
pub const SYSTEM_INIT_TIME_MILLISECONDS: u16 = 160;
pub const FLOW_DURATION_MILLISECONDS: u16 = 161;
pub const POST_OCTET_TOTAL_COUNT: u16 = 171;
pub const POST_PACKET_TOTAL_COUNT: u16 = 172;
pub const POST_NAT_SOURCE_IPV4_ADDRESS: u16 = 225;
pub const POST_NAT_DESTINATION_IPV4_ADDRESS: u16 = 226;
pub const POST_NAPT_SOURCE_TRANSPORT_PORT: u16 = 227;
pub const POST_NAPT_DESTINATION_TRANSPORT_PORT: u16 = 228;
pub const NAT_EVENT: u16 = 230;
pub const INGRESS_VRF_ID: u16 = 234;
pub const EGRESS_VRF_ID: u16 = 235;
pub const BIFLOW_DIRECTION: u16 = 239;
pub const SELECTOR_ID: u16 = 302;
pub const SELECTOR_ALGORITHM: u16 = 304;
pub const SAMPLING_PACKET_INTERVAL: u16 = 305;

/// One catalog entry; several entries may share an element id and differ on
/// the accepted wire length.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ElementEntry {
    pub id: u16,
    pub input_length: u16,
    pub output_length: u16,
    /// Opcode when the template announced the element.
    pub copy_op: Opcode,
    /// Opcode when the output layout expects the element but the template
    /// did not announce it.
    pub zero_op: Opcode,
    pub extension: Extension,
}

const fn e(
    id: u16,
    input_length: u16,
    output_length: u16,
    copy_op: Opcode,
    zero_op: Opcode,
    extension: Extension,
) -> ElementEntry {
    ElementEntry {
        id,
        input_length,
        output_length,
        copy_op,
        zero_op,
        extension,
    }
}

/// The static element catalog. Entries sharing an id are contiguous so a
/// linear scan from the first index finds the length-matching variant.
pub static ELEMENTS: &[ElementEntry] = &[
    e(OCTET_DELTA_COUNT, 4, 8, Move32Sampling, Zero64, Extension::Common),
    e(OCTET_DELTA_COUNT, 8, 8, Move64Sampling, Zero64, Extension::Common),
    e(PACKET_DELTA_COUNT, 4, 8, Move32Sampling, Zero64, Extension::Common),
    e(PACKET_DELTA_COUNT, 8, 8, Move64Sampling, Zero64, Extension::Common),
    e(OCTET_TOTAL_COUNT, 4, 8, Move32Sampling, Zero64, Extension::Common),
    e(OCTET_TOTAL_COUNT, 8, 8, Move64Sampling, Zero64, Extension::Common),
    e(OCTET_TOTAL_COUNT, 6, 8, Move48Sampling, Zero64, Extension::Common),
    e(PACKET_TOTAL_COUNT, 4, 8, Move32Sampling, Zero64, Extension::Common),
    e(PACKET_TOTAL_COUNT, 8, 8, Move64Sampling, Zero64, Extension::Common),
    e(PACKET_TOTAL_COUNT, 6, 8, Move48Sampling, Zero64, Extension::Common),
    e(FORWARDING_STATUS, 1, 1, Move8, Zero8, Extension::Common),
    e(PROTOCOL_IDENTIFIER, 1, 1, Move8, Zero8, Extension::Common),
    e(IP_CLASS_OF_SERVICE, 1, 1, Move8, Zero8, Extension::Common),
    e(TCP_CONTROL_BITS, 1, 1, Move8, Zero8, Extension::Common),
    e(TCP_CONTROL_BITS, 2, 1, MoveFlags, Zero8, Extension::Common),
    e(SOURCE_TRANSPORT_PORT, 2, 2, Move16, Zero16, Extension::Common),
    e(SOURCE_IPV4_ADDRESS, 4, 4, Move32, Zero32, Extension::Common),
    e(SOURCE_IPV4_PREFIX_LENGTH, 1, 1, Move8, Zero8, Extension::Multiple),
    e(INGRESS_INTERFACE, 4, 4, Move32, Zero32, Extension::IoSnmp4),
    e(INGRESS_INTERFACE, 2, 2, Move16, Zero16, Extension::IoSnmp2),
    e(DESTINATION_TRANSPORT_PORT, 2, 2, Move16, Zero16, Extension::Common),
    e(DESTINATION_IPV4_ADDRESS, 4, 4, Move32, Zero32, Extension::Common),
    e(DESTINATION_IPV4_PREFIX_LENGTH, 1, 1, Move8, Zero8, Extension::Multiple),
    e(EGRESS_INTERFACE, 4, 4, Move32, Zero32, Extension::IoSnmp4),
    e(EGRESS_INTERFACE, 2, 2, Move16, Zero16, Extension::IoSnmp2),
    e(IP_NEXT_HOP_IPV4_ADDRESS, 4, 4, Move32, Zero32, Extension::NextHopV4),
    e(BGP_SOURCE_AS_NUMBER, 4, 4, Move32, Zero32, Extension::As4),
    e(BGP_SOURCE_AS_NUMBER, 2, 2, Move16, Zero16, Extension::As2),
    e(BGP_DESTINATION_AS_NUMBER, 4, 4, Move32, Zero32, Extension::As4),
    e(BGP_DESTINATION_AS_NUMBER, 2, 2, Move16, Zero16, Extension::As2),
    e(BGP_NEXT_HOP_IPV4_ADDRESS, 4, 4, Move32, Zero32, Extension::BgpNextHopV4),
    e(FLOW_END_SYS_UP_TIME, 4, 4, TimeMilli32, Nop, Extension::Common),
    e(FLOW_START_SYS_UP_TIME, 4, 4, TimeMilli32, Nop, Extension::Common),
    e(POST_OCTET_DELTA_COUNT, 8, 8, Move64Sampling, Zero64, Extension::OutBytes),
    e(POST_OCTET_DELTA_COUNT, 4, 8, Move32Sampling, Zero64, Extension::OutBytes),
    e(POST_PACKET_DELTA_COUNT, 8, 8, Move64Sampling, Zero64, Extension::OutPackets),
    e(POST_PACKET_DELTA_COUNT, 4, 8, Move32Sampling, Zero64, Extension::OutPackets),
    e(SOURCE_IPV6_ADDRESS, 16, 16, Move128, Zero128, Extension::Common),
    e(DESTINATION_IPV6_ADDRESS, 16, 16, Move128, Zero128, Extension::Common),
    e(SOURCE_IPV6_PREFIX_LENGTH, 1, 1, Move8, Zero8, Extension::Multiple),
    e(DESTINATION_IPV6_PREFIX_LENGTH, 1, 1, Move8, Zero8, Extension::Multiple),
    e(ICMP_TYPE_CODE_IPV4, 2, 2, SaveIcmp, Nop, Extension::Common),
    e(ICMP_TYPE_CODE_IPV6, 2, 2, SaveIcmp, Nop, Extension::Common),
    e(POST_IP_CLASS_OF_SERVICE, 1, 1, Move8, Zero8, Extension::Multiple),
    e(SOURCE_MAC_ADDRESS, 6, 8, MoveMac, Zero64, Extension::Mac1),
    e(POST_DESTINATION_MAC_ADDRESS, 6, 8, MoveMac, Zero64, Extension::Mac1),
    e(VLAN_ID, 2, 2, Move16, Zero16, Extension::Vlan),
    e(POST_VLAN_ID, 2, 2, Move16, Zero16, Extension::Vlan),
    e(FLOW_DIRECTION, 1, 1, Move8, Zero8, Extension::Multiple),
    e(BIFLOW_DIRECTION, 1, 1, Move8, Zero8, Extension::Common),
    e(FLOW_END_REASON, 1, 1, Move8, Zero8, Extension::Common),
    e(IP_NEXT_HOP_IPV6_ADDRESS, 16, 16, Move128, Zero128, Extension::NextHopV6),
    e(BGP_NEXT_HOP_IPV6_ADDRESS, 16, 16, Move128, Zero128, Extension::BgpNextHopV6),
    e(MPLS_TOP_LABEL_STACK_SECTION, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(MPLS_LABEL_STACK_SECTION_2, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(MPLS_LABEL_STACK_SECTION_3, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(MPLS_LABEL_STACK_SECTION_4, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(MPLS_LABEL_STACK_SECTION_5, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(MPLS_LABEL_STACK_SECTION_6, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(MPLS_LABEL_STACK_SECTION_7, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(MPLS_LABEL_STACK_SECTION_8, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(MPLS_LABEL_STACK_SECTION_9, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(MPLS_LABEL_STACK_SECTION_10, 3, 4, MoveMpls, Zero32, Extension::Mpls),
    e(DESTINATION_MAC_ADDRESS, 6, 8, MoveMac, Zero64, Extension::Mac2),
    e(POST_SOURCE_MAC_ADDRESS, 6, 8, MoveMac, Zero64, Extension::Mac2),
    e(FLOW_START_MILLISECONDS, 8, 8, TimeMilli64, Nop, Extension::Common),
    e(FLOW_END_MILLISECONDS, 8, 8, TimeMilli64, Nop, Extension::Common),
    e(FLOW_START_SECONDS, 4, 4, TimeSeconds, Zero32, Extension::Common),
    e(FLOW_END_SECONDS, 4, 4, TimeSeconds, Zero32, Extension::Common),
    e(FLOW_START_DELTA_MICROSECONDS, 4, 4, TimeDeltaMicro, Zero32, Extension::Common),
    e(FLOW_END_DELTA_MICROSECONDS, 4, 4, TimeDeltaMicro, Zero32, Extension::Common),
    e(SYSTEM_INIT_TIME_MILLISECONDS, 8, 8, SystemInitTime, Nop, Extension::Common),
    e(FLOW_DURATION_MILLISECONDS, 4, 4, DurationMilli, Nop, Extension::Common),
    e(POST_OCTET_TOTAL_COUNT, 4, 8, Move32Sampling, Zero64, Extension::OutBytes),
    e(POST_OCTET_TOTAL_COUNT, 8, 8, Move64Sampling, Zero64, Extension::OutBytes),
    e(POST_OCTET_TOTAL_COUNT, 6, 8, Move48Sampling, Zero64, Extension::OutBytes),
    e(POST_PACKET_TOTAL_COUNT, 4, 8, Move32Sampling, Zero64, Extension::OutPackets),
    e(POST_PACKET_TOTAL_COUNT, 8, 8, Move64Sampling, Zero64, Extension::OutPackets),
    e(POST_PACKET_TOTAL_COUNT, 6, 8, Move48Sampling, Zero64, Extension::OutPackets),
    e(NAT_EVENT, 1, 1, Move8, Zero8, Extension::NatCommon),
    e(INGRESS_VRF_ID, 4, 4, Move32, Zero32, Extension::NatCommon),
    e(EGRESS_VRF_ID, 4, 4, Move32, Zero32, Extension::NatCommon),
    e(POST_NAT_SOURCE_IPV4_ADDRESS, 4, 4, Move32, Zero32, Extension::XlateIpV4),
    e(POST_NAT_DESTINATION_IPV4_ADDRESS, 4, 4, Move32, Zero32, Extension::XlateIpV4),
    e(POST_NAPT_SOURCE_TRANSPORT_PORT, 2, 2, Move16, Zero16, Extension::XlatePorts),
    e(POST_NAPT_DESTINATION_TRANSPORT_PORT, 2, 2, Move16, Zero16, Extension::XlatePorts),
];

/// Corresponding forward element for each element reachable through the
/// reverse-information-element PEN
/// ([RFC 5103](https://www.rfc-editor.org/rfc/rfc5103)).
pub static REVERSE_ELEMENTS: &[(u16, u16)] = &[
    (OCTET_TOTAL_COUNT, POST_OCTET_TOTAL_COUNT),
    (PACKET_TOTAL_COUNT, POST_PACKET_TOTAL_COUNT),
    (OCTET_DELTA_COUNT, POST_OCTET_DELTA_COUNT),
    (PACKET_DELTA_COUNT, POST_PACKET_DELTA_COUNT),
];

pub fn reverse_element(id: u16) -> u16 {
    for (forward, reverse) in REVERSE_ELEMENTS {
        if *forward == id {
            return *reverse;
        }
    }
    id
}

/// Index over [`ELEMENTS`], built once per decoder.
#[derive(Debug, Clone)]
pub struct Catalog {
    first_index: HashMap<u16, usize>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let mut first_index = HashMap::new();
        for (i, entry) in ELEMENTS.iter().enumerate() {
            first_index.entry(entry.id).or_insert(i);
        }
        Self { first_index }
    }

    pub fn entry(&self, index: usize) -> &'static ElementEntry {
        &ELEMENTS[index]
    }

    /// Index of the first entry for an element id.
    pub fn first_index(&self, id: u16) -> Option<usize> {
        self.first_index.get(&id).copied()
    }

    /// Index of the entry matching both element id and wire length.
    pub fn find(&self, id: u16, length: u16) -> Option<usize> {
        let mut index = self.first_index(id)?;
        while index < ELEMENTS.len() && ELEMENTS[index].id == id {
            if ELEMENTS[index].input_length == length {
                return Some(index);
            }
            index += 1;
        }
        None
    }
}
