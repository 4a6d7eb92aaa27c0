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

//! Option templates and option data.
//!
//! Only two kinds of options matter to the core: sampler descriptions and
//! the exporter's system-init time. The compiler records where those fields
//! sit inside option data records; the data side extracts them and installs
//! sampler descriptors.

use tracing::{debug, error};

use crate::{
    exporter::{ExporterDomain, OptionTag, SamplerOption, DEFAULT_SAMPLER_ID},
    ie,
    ipfix::OptionsTemplateRecord,
    sink::SinkHandle,
};

/// Digest an options template: remember the offsets of recognized sampler
/// and system-init-time fields for later data-driven extraction.
pub(crate) fn process_option_template(
    exporter: &mut ExporterDomain,
    record: &OptionsTemplateRecord,
) {
    let mut option = SamplerOption {
        table_id: record.id(),
        ..Default::default()
    };

    // scope fields only contribute to the offset
    let mut offset: u16 = 0;
    for scope in record.scope_field_specifiers() {
        offset = offset.wrapping_add(scope.length());
    }

    for field in record.field_specifiers() {
        let length = field.length();
        if field.enterprise_number() == 0 {
            match field.element_id() {
                // standard sampling
                ie::SAMPLING_INTERVAL => {
                    option.interval = OptionTag::new(offset, length);
                    option.flags |= SamplerOption::STD_INTERVAL;
                }
                ie::SAMPLING_ALGORITHM => {
                    option.mode = OptionTag::new(offset, length);
                    option.flags |= SamplerOption::STD_ALGORITHM;
                }
                // individual samplers; #48/#49/#50 are the deprecated forms
                ie::SAMPLER_ID | ie::SELECTOR_ID => {
                    option.id = OptionTag::new(offset, length);
                    option.flags |= SamplerOption::SAMPLER_ID;
                }
                ie::SAMPLER_MODE | ie::SELECTOR_ALGORITHM => {
                    option.mode = OptionTag::new(offset, length);
                    option.flags |= SamplerOption::SAMPLER_MODE;
                }
                ie::SAMPLER_RANDOM_INTERVAL | ie::SAMPLING_PACKET_INTERVAL => {
                    option.interval = OptionTag::new(offset, length);
                    option.flags |= SamplerOption::SAMPLER_INTERVAL;
                }
                ie::SYSTEM_INIT_TIME_MILLISECONDS => {
                    exporter.sysup_option = Some(OptionTag::new(offset, length));
                }
                _ => {}
            }
        }
        offset = offset.wrapping_add(length);
    }

    if option.has_sampler_fields() || option.has_std_fields() {
        exporter.insert_sampler_option(option);
    } else {
        debug!(
            "[{}] no sampling information in option template {}",
            exporter.info.id,
            record.id()
        );
    }
}

/// Digest one option data flowset: extract the system-init time first, then
/// sampler values per the matching sampler-option descriptor.
pub(crate) fn process_option_data(
    exporter: &mut ExporterDomain,
    sink: &mut SinkHandle<'_>,
    table_id: u16,
    data: &[u8],
) {
    if let Some(tag) = exporter.sysup_option {
        match tag.extract(data) {
            Some(value) => {
                exporter.sys_up_time = value;
                debug!("[{}] extracted SysUpTime: {value}", exporter.info.id);
            }
            None => {
                error!(
                    "[{}] not enough data for SysUpTime option",
                    exporter.info.id
                );
                return;
            }
        }
    }

    let Some(option) = exporter.sampler_option(table_id).copied() else {
        debug!("[{}] no sampler option for table {table_id}", exporter.info.id);
        return;
    };

    if option.has_sampler_fields() {
        let values = (
            option.id.extract(data),
            option.mode.extract(data),
            option.interval.extract(data),
        );
        let (Some(id), Some(mode), Some(interval)) = values else {
            error!(
                "[{}] not enough data for sampler option record",
                exporter.info.id
            );
            return;
        };
        exporter.insert_sampler(sink, id as i32, mode as u16, interval as u32);
    }

    if option.has_std_fields() {
        let values = (option.mode.extract(data), option.interval.extract(data));
        let (Some(mode), Some(interval)) = values else {
            error!(
                "[{}] not enough data for standard sampling option record",
                exporter.info.id
            );
            return;
        };
        exporter.insert_sampler(sink, DEFAULT_SAMPLER_ID, mode as u16, interval as u32);
    }
}
