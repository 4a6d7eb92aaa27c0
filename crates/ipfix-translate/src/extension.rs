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

//! Output-record extensions and extension maps.
//!
//! The fixed part of an output record (see [`crate::record`]) is followed by
//! a variable set of extensions. Which extensions a record class carries is
//! described by an [`ExtensionMap`] that is registered with the sink and
//! referenced by id from every record.

use serde::{Deserialize, Serialize};

/// Map id of an extension map that has not been registered with a sink yet.
pub const INIT_MAP_ID: u16 = u16::MAX;

/// Identifies one extension of the output record. The discriminant order is
/// the order extensions appear in the data part of a record; extension maps
/// are strictly ordered by it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Extension {
    /// The fixed record part; not listed in extension maps.
    Common = 0,
    /// 2-byte SNMP input/output interface indices
    IoSnmp2 = 1,
    /// 4-byte SNMP input/output interface indices
    IoSnmp4 = 2,
    /// 2-byte source/destination BGP AS numbers
    As2 = 3,
    /// 4-byte source/destination BGP AS numbers
    As4 = 4,
    /// post-TOS, flow direction and src/dst prefix lengths
    Multiple = 5,
    NextHopV4 = 6,
    NextHopV6 = 7,
    BgpNextHopV4 = 8,
    BgpNextHopV6 = 9,
    /// input/output VLAN ids
    Vlan = 10,
    /// output packet counter (sampling corrected, 64 bit)
    OutPackets = 11,
    /// output byte counter (sampling corrected, 64 bit)
    OutBytes = 12,
    /// source MAC / post destination MAC
    Mac1 = 13,
    /// destination MAC / post source MAC
    Mac2 = 14,
    /// MPLS labels 1..10
    Mpls = 15,
    /// NAT event, egress and ingress VRF ids
    NatCommon = 16,
    /// post-NAT translated source/destination IPv4 addresses
    XlateIpV4 = 17,
    /// post-NAPT translated source/destination ports
    XlatePorts = 18,
    RouterIpV4 = 19,
    RouterIpV6 = 20,
    /// Engine type/id of the sending router. Carries no value in IPFIX and
    /// is never emitted; the variant only reserves its place in the id space.
    RouterId = 21,
    /// Packet receive time stamped by the collector
    Received = 22,
}

impl Extension {
    pub const COUNT: usize = 23;

    /// Optional extensions in the order they are laid out in a record. The
    /// fixed common part is not listed.
    pub const OPTIONAL: &'static [Extension] = &[
        Extension::IoSnmp2,
        Extension::IoSnmp4,
        Extension::As2,
        Extension::As4,
        Extension::Multiple,
        Extension::NextHopV4,
        Extension::NextHopV6,
        Extension::BgpNextHopV4,
        Extension::BgpNextHopV6,
        Extension::Vlan,
        Extension::OutPackets,
        Extension::OutBytes,
        Extension::Mac1,
        Extension::Mac2,
        Extension::Mpls,
        Extension::NatCommon,
        Extension::XlateIpV4,
        Extension::XlatePorts,
        Extension::RouterIpV4,
        Extension::RouterIpV6,
        Extension::RouterId,
        Extension::Received,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bytes this extension occupies in an output record.
    pub const fn size(self) -> u16 {
        match self {
            Extension::Common => 0,
            Extension::IoSnmp2 => 4,
            Extension::IoSnmp4 => 8,
            Extension::As2 => 4,
            Extension::As4 => 8,
            Extension::Multiple => 4,
            Extension::NextHopV4 => 4,
            Extension::NextHopV6 => 16,
            Extension::BgpNextHopV4 => 4,
            Extension::BgpNextHopV6 => 16,
            Extension::Vlan => 4,
            Extension::OutPackets => 8,
            Extension::OutBytes => 8,
            Extension::Mac1 => 16,
            Extension::Mac2 => 16,
            Extension::Mpls => 40,
            Extension::NatCommon => 12,
            Extension::XlateIpV4 => 8,
            Extension::XlatePorts => 4,
            Extension::RouterIpV4 => 4,
            Extension::RouterIpV6 => 16,
            Extension::RouterId => 4,
            Extension::Received => 8,
        }
    }
}

/// Per-extension enable switches, a configuration input. Disabled extensions
/// never make it into an extension map even when the template announces the
/// corresponding elements.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    enabled: [bool; Extension::COUNT],
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            enabled: [true; Extension::COUNT],
        }
    }
}

impl ExtensionConfig {
    pub fn enabled(&self, extension: Extension) -> bool {
        self.enabled[extension.index()]
    }

    pub fn set_enabled(&mut self, extension: Extension, enabled: bool) {
        self.enabled[extension.index()] = enabled;
    }
}

/// The set of optional extensions a template contributes, collected while
/// compiling the template.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExtensionSet {
    present: [bool; Extension::COUNT],
}

impl ExtensionSet {
    pub(crate) fn clear(&mut self) {
        self.present = [false; Extension::COUNT];
    }

    pub(crate) fn insert(&mut self, extension: Extension) -> bool {
        let seen = self.present[extension.index()];
        self.present[extension.index()] = true;
        !seen
    }

    pub(crate) fn contains(&self, extension: Extension) -> bool {
        self.present[extension.index()]
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.present.iter().any(|p| *p)
    }
}

/// Enumerates which optional extensions a class of output records carries.
/// Registered with the sink; every emitted record references its map by id.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExtensionMap {
    map_id: u16,
    extension_size: u16,
    ids: Vec<Extension>,
}

impl Default for ExtensionMap {
    fn default() -> Self {
        Self {
            map_id: INIT_MAP_ID,
            extension_size: 0,
            ids: Vec::new(),
        }
    }
}

impl ExtensionMap {
    pub const fn map_id(&self) -> u16 {
        self.map_id
    }

    pub(crate) fn set_map_id(&mut self, map_id: u16) {
        self.map_id = map_id;
    }

    /// Summed byte size of all listed extensions in an output record.
    pub const fn extension_size(&self) -> u16 {
        self.extension_size
    }

    pub fn ids(&self) -> &[Extension] {
        &self.ids
    }

    /// Replace the id list. Returns whether contents changed, which obliges
    /// the caller to re-register the map with the sink.
    pub(crate) fn replace_ids(&mut self, ids: Vec<Extension>) -> bool {
        let changed = self.ids != ids;
        self.extension_size = ids.iter().map(|e| e.size()).sum();
        self.ids = ids;
        changed
    }
}
