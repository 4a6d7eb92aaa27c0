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

//! The template compiler.
//!
//! A template record is compiled into a [`TranslationTable`]: the layout of
//! the output record, the extension map describing it, and the sequencer that
//! produces it. Slots are first emitted in the canonical output order of the
//! record layout, then reordered to follow the wire order of the template so
//! the executor can walk the input linearly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    extension::{Extension, ExtensionMap, ExtensionSet, INIT_MAP_ID},
    ie::{self, Catalog},
    record::{
        BYTE_OFFSET_FIRST, FLAG_BYTES_64, FLAG_IPV6_ADDR, FLAG_IPV6_EXP, FLAG_IPV6_NH,
        FLAG_IPV6_NHB, FLAG_PKG_64,
    },
    sequencer::{Slot, StackTarget},
    FieldSpecifier, CERT_PEN, REVERSE_INFORMATION_ELEMENT_PEN,
};

/// Wire length announcing a variable-length field (RFC 7011 section 7).
pub const VARIABLE_LENGTH: u16 = 65535;

/// Time-stamp family a template encodes flow times in.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum TimeEncoding {
    DeltaMicroseconds,
    AbsoluteMilliseconds,
    SysUpRelative,
    AbsoluteSeconds,
    #[default]
    Missing,
}

/// Everything needed to translate data records of one template id.
#[derive(Debug, Clone)]
pub struct TranslationTable {
    pub id: u16,
    /// When the template was last added or refreshed.
    pub updated: DateTime<Utc>,
    /// Flag bits every output record of this template starts from.
    pub flags: u8,
    pub output_record_size: u16,
    pub time_encoding: TimeEncoding,
    /// Where the executor stamps the exporter's IP; the space is reserved
    /// here but carries no wire input.
    pub router_ip_offset: Option<u16>,
    /// Where the executor stamps the packet receive time.
    pub received_offset: Option<u16>,
    pub extension_map: ExtensionMap,
    /// The map must be (re-)registered with the sink.
    pub map_changed: bool,
    pub sequencer: Vec<Slot>,
}

impl TranslationTable {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            updated: Utc::now(),
            flags: 0,
            output_record_size: 0,
            time_encoding: TimeEncoding::Missing,
            router_ip_offset: None,
            received_offset: None,
            extension_map: ExtensionMap::default(),
            map_changed: true,
            sequencer: Vec::new(),
        }
    }

    /// Input bytes one fixed-size data record consumes; variable-length
    /// fields contribute only their smallest encoding.
    pub fn input_record_size(&self) -> usize {
        self.sequencer
            .iter()
            .map(|s| {
                usize::from(s.input_length)
                    + s.skip_count as usize
                    + usize::from(s.opcode == crate::sequencer::Opcode::DynSkip)
            })
            .sum()
    }
}

/// Catalog entry resolved for an element announced by the current template.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FoundEntry {
    pub catalog_index: usize,
    pub length: u16,
}

/// One field of the template in wire order.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum InputField {
    /// A catalog-matched element.
    Element { id: u16, length: u16 },
    /// Undecoded bytes of known length.
    Skip { length: u32 },
    /// Undecoded variable-length field.
    VariableSkip,
}

/// Scratch state while one template record is compiled. Owned by the decoder
/// so template parsing on different decoders never interferes.
#[derive(Debug, Default)]
pub(crate) struct TemplateScratch {
    pub found: HashMap<u16, FoundEntry>,
    pub input_order: Vec<InputField>,
    pub common_extensions: ExtensionSet,
}

impl TemplateScratch {
    pub(crate) fn reset(&mut self, field_count: usize) {
        self.found.clear();
        self.input_order.clear();
        self.input_order
            .resize(field_count, InputField::Skip { length: 0 });
        self.common_extensions.clear();
    }
}

/// Resolve one template field against the catalog. Returns the extension the
/// element contributes to, or `None` when the field is skipped.
pub(crate) fn map_element(
    catalog: &Catalog,
    scratch: &mut TemplateScratch,
    order: usize,
    spec: &FieldSpecifier,
) -> Option<Extension> {
    let length = spec.length();
    scratch.input_order[order] = if length == VARIABLE_LENGTH {
        InputField::VariableSkip
    } else {
        InputField::Skip {
            length: u32::from(length),
        }
    };

    let mut id = spec.element_id();
    match spec.enterprise_number() {
        0 => {}
        CERT_PEN => {
            debug!("skip CERT Coordination Centre element {id}");
            return None;
        }
        REVERSE_INFORMATION_ELEMENT_PEN => {
            id = ie::reverse_element(id);
        }
        pen => {
            debug!("skip enterprise id {pen}, element {id}");
            return None;
        }
    }

    let Some(index) = catalog.find(id, length) else {
        debug!("skip element {id}, length {length}");
        return None;
    };
    scratch.input_order[order] = InputField::Element { id, length };
    scratch.found.insert(
        id,
        FoundEntry {
            catalog_index: index,
            length,
        },
    );
    Some(catalog.entry(index).extension)
}

/// Merge adjacent fixed-length skips into single holes. Returns whether any
/// decodable field survives; a template of nothing but skips is abandoned.
pub(crate) fn compact_input_order(input_order: &mut Vec<InputField>) -> bool {
    let mut i = 0;
    while i < input_order.len() {
        while i + 1 < input_order.len() {
            let (InputField::Skip { length: a }, InputField::Skip { length: b }) =
                (input_order[i], input_order[i + 1])
            else {
                break;
            };
            input_order[i] = InputField::Skip { length: a + b };
            input_order.remove(i + 1);
        }
        i += 1;
    }
    input_order
        .iter()
        .any(|f| matches!(f, InputField::Element { .. }))
}

/// Append one slot for `element` in canonical output order. The copy opcode
/// is used when the template announced the element, the zero opcode
/// otherwise; `offset`, when given, advances by the element's output width.
pub(crate) fn push_sequence(
    table: &mut TranslationTable,
    catalog: &Catalog,
    found: &HashMap<u16, FoundEntry>,
    element: u16,
    mut offset: Option<&mut u16>,
    stack: Option<StackTarget>,
) {
    let output_offset = offset.as_deref().copied();
    let index = match found.get(&element) {
        Some(entry) => {
            let cat = catalog.entry(entry.catalog_index);
            table.sequencer.push(Slot {
                opcode: cat.copy_op,
                element: Some(element),
                input_length: entry.length,
                skip_count: 0,
                output_offset,
                stack,
            });
            entry.catalog_index
        }
        None => {
            let Some(index) = catalog.first_index(element) else {
                return;
            };
            let cat = catalog.entry(index);
            table.sequencer.push(Slot {
                opcode: cat.zero_op,
                element: Some(element),
                input_length: 0,
                skip_count: 0,
                output_offset,
                stack: None,
            });
            index
        }
    };
    if let Some(offset) = offset.as_deref_mut() {
        *offset += catalog.entry(index).output_length;
    }
}

/// Rebuild the table for the current template: emit the sequencer in
/// canonical output order, lay out the output record, and refresh the
/// extension map (marking it changed when its contents moved).
pub(crate) fn setup_translation_table(
    table: &mut TranslationTable,
    catalog: &Catalog,
    scratch: &TemplateScratch,
    exporter_is_ipv6: bool,
) {
    let found = &scratch.found;
    table.sequencer = Vec::new();
    table.updated = Utc::now();
    // IPFIX only has 64-bit counters in this layout
    table.flags = FLAG_PKG_64 | FLAG_BYTES_64;
    table.time_encoding = TimeEncoding::Missing;
    table.router_ip_offset = None;
    table.received_offset = None;

    // Time stamps: the first family present wins. The 8 bytes at
    // BYTE_OFFSET_FIRST stay reserved for first/last either way; the slots
    // themselves only feed the scratch.
    if found.contains_key(&ie::FLOW_START_DELTA_MICROSECONDS) {
        push_sequence(
            table,
            catalog,
            found,
            ie::FLOW_START_DELTA_MICROSECONDS,
            None,
            Some(StackTarget::FlowStart),
        );
        push_sequence(
            table,
            catalog,
            found,
            ie::FLOW_END_DELTA_MICROSECONDS,
            None,
            Some(StackTarget::FlowEnd),
        );
        table.time_encoding = TimeEncoding::DeltaMicroseconds;
    } else if found.contains_key(&ie::FLOW_START_MILLISECONDS) {
        push_sequence(
            table,
            catalog,
            found,
            ie::FLOW_START_MILLISECONDS,
            None,
            Some(StackTarget::FlowStart),
        );
        push_sequence(
            table,
            catalog,
            found,
            ie::FLOW_END_MILLISECONDS,
            None,
            Some(StackTarget::FlowEnd),
        );
        push_sequence(
            table,
            catalog,
            found,
            ie::FLOW_DURATION_MILLISECONDS,
            None,
            Some(StackTarget::Duration),
        );
        table.time_encoding = TimeEncoding::AbsoluteMilliseconds;
    } else if found.contains_key(&ie::FLOW_START_SYS_UP_TIME) {
        push_sequence(
            table,
            catalog,
            found,
            ie::FLOW_START_SYS_UP_TIME,
            None,
            Some(StackTarget::FlowStart),
        );
        push_sequence(
            table,
            catalog,
            found,
            ie::FLOW_END_SYS_UP_TIME,
            None,
            Some(StackTarget::FlowEnd),
        );
        push_sequence(
            table,
            catalog,
            found,
            ie::SYSTEM_INIT_TIME_MILLISECONDS,
            None,
            Some(StackTarget::SysUpTime),
        );
        table.time_encoding = TimeEncoding::SysUpRelative;
    } else if found.contains_key(&ie::FLOW_START_SECONDS) {
        push_sequence(
            table,
            catalog,
            found,
            ie::FLOW_START_SECONDS,
            None,
            Some(StackTarget::FlowStart),
        );
        push_sequence(
            table,
            catalog,
            found,
            ie::FLOW_END_SECONDS,
            None,
            Some(StackTarget::FlowEnd),
        );
        table.time_encoding = TimeEncoding::AbsoluteSeconds;
    } else {
        debug!("[{}] no known time stamp format", table.id);
    }
    let mut offset: u16 = BYTE_OFFSET_FIRST + 8;

    push_sequence(table, catalog, found, ie::FORWARDING_STATUS, Some(&mut offset), None);
    push_sequence(table, catalog, found, ie::TCP_CONTROL_BITS, Some(&mut offset), None);
    push_sequence(table, catalog, found, ie::PROTOCOL_IDENTIFIER, Some(&mut offset), None);
    push_sequence(table, catalog, found, ie::IP_CLASS_OF_SERVICE, Some(&mut offset), None);
    push_sequence(table, catalog, found, ie::SOURCE_TRANSPORT_PORT, Some(&mut offset), None);
    push_sequence(table, catalog, found, ie::DESTINATION_TRANSPORT_PORT, Some(&mut offset), None);
    // exporter sysid, stamped by the executor
    offset += 2;
    push_sequence(table, catalog, found, ie::BIFLOW_DIRECTION, Some(&mut offset), None);
    push_sequence(table, catalog, found, ie::FLOW_END_REASON, Some(&mut offset), None);

    // Addresses: IPv4 wins when both families are announced; a template with
    // neither still reserves an all-zero IPv4 pair.
    let ipv6_template = if found.contains_key(&ie::SOURCE_IPV4_ADDRESS) {
        push_sequence(table, catalog, found, ie::SOURCE_IPV4_ADDRESS, Some(&mut offset), None);
        push_sequence(table, catalog, found, ie::DESTINATION_IPV4_ADDRESS, Some(&mut offset), None);
        false
    } else if found.contains_key(&ie::SOURCE_IPV6_ADDRESS) {
        push_sequence(table, catalog, found, ie::SOURCE_IPV6_ADDRESS, Some(&mut offset), None);
        push_sequence(table, catalog, found, ie::DESTINATION_IPV6_ADDRESS, Some(&mut offset), None);
        table.flags |= FLAG_IPV6_ADDR;
        true
    } else {
        push_sequence(table, catalog, found, ie::SOURCE_IPV4_ADDRESS, Some(&mut offset), None);
        push_sequence(table, catalog, found, ie::DESTINATION_IPV4_ADDRESS, Some(&mut offset), None);
        false
    };

    // Counters: prefer total over delta when both are announced.
    if found.contains_key(&ie::PACKET_TOTAL_COUNT) {
        push_sequence(table, catalog, found, ie::PACKET_TOTAL_COUNT, Some(&mut offset), Some(StackTarget::Packets));
    } else {
        push_sequence(table, catalog, found, ie::PACKET_DELTA_COUNT, Some(&mut offset), Some(StackTarget::Packets));
    }
    if found.contains_key(&ie::OCTET_TOTAL_COUNT) {
        push_sequence(table, catalog, found, ie::OCTET_TOTAL_COUNT, Some(&mut offset), Some(StackTarget::Bytes));
    } else {
        push_sequence(table, catalog, found, ie::OCTET_DELTA_COUNT, Some(&mut offset), Some(StackTarget::Bytes));
    }

    // Optional extensions, in extension-id order.
    let mut ids = Vec::new();
    for ext in Extension::OPTIONAL {
        if !scratch.common_extensions.contains(*ext) {
            continue;
        }
        let mut actual = *ext;
        match ext {
            Extension::IoSnmp2 | Extension::IoSnmp4 => {
                push_sequence(table, catalog, found, ie::INGRESS_INTERFACE, Some(&mut offset), None);
                push_sequence(table, catalog, found, ie::EGRESS_INTERFACE, Some(&mut offset), None);
            }
            Extension::As2 | Extension::As4 => {
                push_sequence(table, catalog, found, ie::BGP_SOURCE_AS_NUMBER, Some(&mut offset), None);
                push_sequence(table, catalog, found, ie::BGP_DESTINATION_AS_NUMBER, Some(&mut offset), None);
            }
            Extension::Multiple => {
                push_sequence(table, catalog, found, ie::POST_IP_CLASS_OF_SERVICE, Some(&mut offset), None);
                push_sequence(table, catalog, found, ie::FLOW_DIRECTION, Some(&mut offset), None);
                if ipv6_template {
                    push_sequence(table, catalog, found, ie::SOURCE_IPV6_PREFIX_LENGTH, Some(&mut offset), None);
                    push_sequence(table, catalog, found, ie::DESTINATION_IPV6_PREFIX_LENGTH, Some(&mut offset), None);
                } else {
                    push_sequence(table, catalog, found, ie::SOURCE_IPV4_PREFIX_LENGTH, Some(&mut offset), None);
                    push_sequence(table, catalog, found, ie::DESTINATION_IPV4_PREFIX_LENGTH, Some(&mut offset), None);
                }
            }
            Extension::NextHopV4 => {
                push_sequence(table, catalog, found, ie::IP_NEXT_HOP_IPV4_ADDRESS, Some(&mut offset), None);
            }
            Extension::NextHopV6 => {
                push_sequence(table, catalog, found, ie::IP_NEXT_HOP_IPV6_ADDRESS, Some(&mut offset), None);
                table.flags |= FLAG_IPV6_NH;
            }
            Extension::BgpNextHopV4 => {
                push_sequence(table, catalog, found, ie::BGP_NEXT_HOP_IPV4_ADDRESS, Some(&mut offset), None);
            }
            Extension::BgpNextHopV6 => {
                push_sequence(table, catalog, found, ie::BGP_NEXT_HOP_IPV6_ADDRESS, Some(&mut offset), None);
                table.flags |= FLAG_IPV6_NHB;
            }
            Extension::Vlan => {
                push_sequence(table, catalog, found, ie::VLAN_ID, Some(&mut offset), None);
                push_sequence(table, catalog, found, ie::POST_VLAN_ID, Some(&mut offset), None);
            }
            Extension::OutPackets => {
                if found.contains_key(&ie::POST_PACKET_TOTAL_COUNT) {
                    push_sequence(table, catalog, found, ie::POST_PACKET_TOTAL_COUNT, Some(&mut offset), Some(StackTarget::OutPackets));
                } else {
                    push_sequence(table, catalog, found, ie::POST_PACKET_DELTA_COUNT, Some(&mut offset), Some(StackTarget::OutPackets));
                }
            }
            Extension::OutBytes => {
                if found.contains_key(&ie::POST_OCTET_TOTAL_COUNT) {
                    push_sequence(table, catalog, found, ie::POST_OCTET_TOTAL_COUNT, Some(&mut offset), Some(StackTarget::OutBytes));
                } else {
                    push_sequence(table, catalog, found, ie::POST_OCTET_DELTA_COUNT, Some(&mut offset), Some(StackTarget::OutBytes));
                }
            }
            Extension::Mac1 => {
                push_sequence(table, catalog, found, ie::SOURCE_MAC_ADDRESS, Some(&mut offset), None);
                push_sequence(table, catalog, found, ie::POST_DESTINATION_MAC_ADDRESS, Some(&mut offset), None);
            }
            Extension::Mac2 => {
                push_sequence(table, catalog, found, ie::DESTINATION_MAC_ADDRESS, Some(&mut offset), None);
                push_sequence(table, catalog, found, ie::POST_SOURCE_MAC_ADDRESS, Some(&mut offset), None);
            }
            Extension::Mpls => {
                for element in [
                    ie::MPLS_TOP_LABEL_STACK_SECTION,
                    ie::MPLS_LABEL_STACK_SECTION_2,
                    ie::MPLS_LABEL_STACK_SECTION_3,
                    ie::MPLS_LABEL_STACK_SECTION_4,
                    ie::MPLS_LABEL_STACK_SECTION_5,
                    ie::MPLS_LABEL_STACK_SECTION_6,
                    ie::MPLS_LABEL_STACK_SECTION_7,
                    ie::MPLS_LABEL_STACK_SECTION_8,
                    ie::MPLS_LABEL_STACK_SECTION_9,
                    ie::MPLS_LABEL_STACK_SECTION_10,
                ] {
                    push_sequence(table, catalog, found, element, Some(&mut offset), None);
                }
            }
            Extension::NatCommon => {
                push_sequence(table, catalog, found, ie::NAT_EVENT, Some(&mut offset), None);
                // 3 pad bytes after the 1-byte event
                offset += 3;
                push_sequence(table, catalog, found, ie::EGRESS_VRF_ID, Some(&mut offset), None);
                push_sequence(table, catalog, found, ie::INGRESS_VRF_ID, Some(&mut offset), None);
            }
            Extension::XlateIpV4 => {
                push_sequence(table, catalog, found, ie::POST_NAT_SOURCE_IPV4_ADDRESS, Some(&mut offset), None);
                push_sequence(table, catalog, found, ie::POST_NAT_DESTINATION_IPV4_ADDRESS, Some(&mut offset), None);
            }
            Extension::XlatePorts => {
                push_sequence(table, catalog, found, ie::POST_NAPT_SOURCE_TRANSPORT_PORT, Some(&mut offset), None);
                push_sequence(table, catalog, found, ie::POST_NAPT_DESTINATION_TRANSPORT_PORT, Some(&mut offset), None);
            }
            Extension::RouterIpV4 | Extension::RouterIpV6 => {
                // not announced in templates; space is reserved here and the
                // executor stamps the exporter's address
                table.router_ip_offset = Some(offset);
                if exporter_is_ipv6 {
                    offset += 16;
                    table.flags |= FLAG_IPV6_EXP;
                    actual = Extension::RouterIpV6;
                } else {
                    offset += 4;
                    table.flags &= !FLAG_IPV6_EXP;
                    actual = Extension::RouterIpV4;
                }
            }
            Extension::RouterId => {
                // carries no value in IPFIX
            }
            Extension::Received => {
                table.received_offset = Some(offset);
                offset += 8;
            }
            Extension::Common => {}
        }
        ids.push(actual);
    }
    table.map_changed = table.extension_map.replace_ids(ids)
        || table.extension_map.map_id() == INIT_MAP_ID;

    table.output_record_size = offset;

    // For NetFlow-historical reasons, ICMP type/code ends up in the
    // destination-port field. Capture it; the executor relocates it when the
    // record's protocol turns out to be ICMP.
    if let Some(entry) = found.get(&ie::ICMP_TYPE_CODE_IPV4) {
        if entry.length == 2 {
            push_sequence(table, catalog, found, ie::ICMP_TYPE_CODE_IPV4, None, Some(StackTarget::IcmpTypeCode));
        }
    }
    if let Some(entry) = found.get(&ie::ICMP_TYPE_CODE_IPV6) {
        if entry.length == 2 {
            push_sequence(table, catalog, found, ie::ICMP_TYPE_CODE_IPV6, None, Some(StackTarget::IcmpTypeCode));
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReorderError {
    /// A decodable wire field has no sequencer slot and no previous slot to
    /// fold its length into.
    UnmatchedLeadingElement(u16),
}

impl std::fmt::Display for ReorderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnmatchedLeadingElement(id) => {
                write!(f, "no sequencer slot for leading element {id}")
            }
        }
    }
}

impl std::error::Error for ReorderError {}

/// Rewrite the canonical-order sequencer so slots execute in wire order,
/// inserting skip slots for undecoded fields. Slots without wire input
/// (zero fills) drift behind all input-consuming slots.
pub(crate) fn reorder_sequencer(
    sequencer: &mut Vec<Slot>,
    input_order: &[InputField],
) -> Result<(), ReorderError> {
    let mut n = 0usize;
    for field in input_order {
        match *field {
            InputField::VariableSkip => {
                sequencer.insert(n, Slot::dyn_skip());
                n += 1;
            }
            InputField::Skip { length } => {
                if n == 0 {
                    sequencer.insert(0, Slot::skip(length));
                    n = 1;
                } else {
                    sequencer[n - 1].skip_count += length;
                }
            }
            InputField::Element { id, length } => {
                if sequencer.get(n).map(|s| s.element) == Some(Some(id)) {
                    n += 1;
                    continue;
                }
                match (n + 1..sequencer.len()).find(|&j| sequencer[j].element == Some(id)) {
                    Some(j) => {
                        sequencer.swap(n, j);
                        n += 1;
                    }
                    None => {
                        // the element appeared twice on the wire, or lost the
                        // canonical pick of its family: degrade to a skip
                        if n == 0 {
                            return Err(ReorderError::UnmatchedLeadingElement(id));
                        }
                        sequencer[n - 1].skip_count += u32::from(length);
                    }
                }
            }
        }
    }
    Ok(())
}
