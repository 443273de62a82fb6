//! Minimal HID report descriptor walker.
//!
//! This is **not** a report parser. It walks the short items of a report descriptor
//! just far enough to answer two questions used by HID discovery:
//! - which usages does the device declare (to spot Joystick / Game Pad collections),
//! - how long is its largest input report (the frame length for that device).
//!
//! ## Item handling
//! - Global: Usage Page, Report Size, Report ID, Report Count, Push, Pop
//! - Local: Usage, Usage Minimum, Usage Maximum (4-byte usages carry their own page)
//! - Main: Input adds `size * count` bits to the current report; every main item
//!   resolves the pending local usages against the current usage page
//! - Long items are skipped
//!
//! A report declaring more than [`MAX_INPUT_REPORT_LEN`] bytes is malformed.
//!
//! Input report lengths follow `hidapi` read semantics: when the device uses report
//! IDs, the ID byte is part of the report and counted; otherwise it is not.

use std::collections::BTreeMap;
use thiserror::Error;

/// Generic Desktop Controls usage page.
pub const PAGE_GENERIC_DESKTOP: u16 = 0x01;
/// Simulation Controls usage page.
pub const PAGE_SIMULATION: u16 = 0x02;
/// Generic Desktop: Joystick.
pub const USAGE_JOYSTICK: u16 = 0x04;
/// Generic Desktop: Game Pad.
pub const USAGE_GAME_PAD: u16 = 0x05;

/// Longest input report accepted, report ID byte included.
pub const MAX_INPUT_REPORT_LEN: usize = u16::MAX as usize;

/// Payload bits one report may declare before the walker gives up.
const MAX_INPUT_REPORT_BITS: u64 = (MAX_INPUT_REPORT_LEN as u64 - 1) * 8;

/// A declared usage or usage range on one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageRange {
    pub page: u16,
    pub min: u16,
    pub max: u16,
}

impl UsageRange {
    #[inline]
    pub fn contains(&self, page: u16, usage: u16) -> bool {
        self.page == page && (self.min..=self.max).contains(&usage)
    }
}

/// What the walker learned from a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportDescriptor {
    usages: Vec<UsageRange>,
    max_input_report_len: usize,
}

impl ReportDescriptor {
    /// Walk `bytes`.
    ///
    /// On a malformed descriptor the error still carries what was learned up to the
    /// offending item (see [`DescriptorError::partial`]).
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        Walker::default().run(bytes)
    }

    pub fn usages(&self) -> &[UsageRange] {
        &self.usages
    }

    /// True if any declared usage is `(page, usage)`.
    pub fn declares(&self, page: u16, usage: u16) -> bool {
        self.usages.iter().any(|u| u.contains(page, usage))
    }

    /// True for Generic Desktop Joystick or Game Pad.
    pub fn declares_game_controller(&self) -> bool {
        self.declares(PAGE_GENERIC_DESKTOP, USAGE_JOYSTICK)
            || self.declares(PAGE_GENERIC_DESKTOP, USAGE_GAME_PAD)
    }

    /// Largest input report in bytes (0 if the descriptor declares no inputs).
    pub fn max_input_report_len(&self) -> usize {
        self.max_input_report_len
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed report descriptor at byte {offset}: {reason}")]
pub struct DescriptorError {
    pub offset: usize,
    pub reason: &'static str,
    pub partial: ReportDescriptor,
}

#[derive(Clone, Copy, Default)]
struct Globals {
    usage_page: u16,
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

#[derive(Default)]
struct Walker {
    globals: Globals,
    stack: Vec<Globals>,
    /// Pending local usages as `(value, data_size)`.
    usages: Vec<(u32, usize)>,
    usage_min: Option<(u32, usize)>,
    usage_max: Option<(u32, usize)>,
    declared: Vec<UsageRange>,
    input_bits: BTreeMap<u8, u64>,
    uses_report_ids: bool,
}

impl Walker {
    fn run(mut self, bytes: &[u8]) -> Result<ReportDescriptor, DescriptorError> {
        if bytes.is_empty() {
            return Err(self.fail(0, "empty descriptor"));
        }

        let mut i = 0usize;
        while i < bytes.len() {
            let prefix = bytes[i];

            if prefix == 0xFE {
                // Long item: [0xFE][size][tag][data...]
                let Some(&size) = bytes.get(i + 1) else {
                    return Err(self.fail(i, "truncated long item"));
                };
                let end = i + 3 + size as usize;
                if end > bytes.len() {
                    return Err(self.fail(i, "truncated long item"));
                }
                i = end;
                continue;
            }

            let size = match prefix & 0x03 {
                3 => 4,
                n => n as usize,
            };
            let kind = (prefix >> 2) & 0x03;
            let tag = prefix >> 4;

            let Some(data) = bytes.get(i + 1..i + 1 + size) else {
                return Err(self.fail(i, "truncated item"));
            };
            let value = data
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32);

            match kind {
                0 => {
                    if let Err(reason) = self.main(tag) {
                        return Err(self.fail(i, reason));
                    }
                }
                1 => {
                    if let Err(reason) = self.global(tag, value) {
                        return Err(self.fail(i, reason));
                    }
                }
                2 => self.local(tag, value, size),
                _ => return Err(self.fail(i, "reserved item type")),
            }

            i += 1 + size;
        }

        Ok(self.finish())
    }

    fn main(&mut self, tag: u8) -> Result<(), &'static str> {
        // Input
        if tag == 0x8 {
            // u32 * u32 always fits in u64
            let bits = u64::from(self.globals.report_size) * u64::from(self.globals.report_count);
            let total = self.input_bits.entry(self.globals.report_id).or_insert(0);
            match total.checked_add(bits) {
                Some(sum) if sum <= MAX_INPUT_REPORT_BITS => *total = sum,
                _ => return Err("input report too long"),
            }
        }
        self.resolve_locals();
        Ok(())
    }

    fn global(&mut self, tag: u8, value: u32) -> Result<(), &'static str> {
        match tag {
            0x0 => self.globals.usage_page = value as u16,
            0x7 => self.globals.report_size = value,
            0x8 => {
                self.globals.report_id = value as u8;
                self.uses_report_ids = true;
            }
            0x9 => self.globals.report_count = value,
            0xA => self.stack.push(self.globals),
            0xB => match self.stack.pop() {
                Some(g) => self.globals = g,
                None => return Err("pop without push"),
            },
            // logical/physical extents, units, exponent
            _ => {}
        }
        Ok(())
    }

    fn local(&mut self, tag: u8, value: u32, size: usize) {
        match tag {
            0x0 => self.usages.push((value, size)),
            0x1 => self.usage_min = Some((value, size)),
            0x2 => self.usage_max = Some((value, size)),
            // designators, strings, delimiters
            _ => {}
        }
    }

    /// Usages wider than two bytes carry their page in the high half.
    fn split(&self, value: u32, size: usize) -> (u16, u16) {
        if size == 4 {
            ((value >> 16) as u16, value as u16)
        } else {
            (self.globals.usage_page, value as u16)
        }
    }

    fn resolve_locals(&mut self) {
        let pending = std::mem::take(&mut self.usages);
        for (value, size) in pending {
            let (page, id) = self.split(value, size);
            self.declared.push(UsageRange {
                page,
                min: id,
                max: id,
            });
        }

        if let (Some((lo, lo_size)), Some((hi, hi_size))) =
            (self.usage_min.take(), self.usage_max.take())
        {
            let (page, min) = self.split(lo, lo_size);
            let (_, max) = self.split(hi, hi_size);
            if min <= max {
                self.declared.push(UsageRange { page, min, max });
            }
        }
    }

    fn max_len(&self) -> usize {
        let id_byte = usize::from(self.uses_report_ids);
        self.input_bits
            .values()
            .filter(|&&bits| bits > 0)
            .map(|&bits| bits.div_ceil(8) as usize + id_byte)
            .max()
            .unwrap_or(0)
    }

    fn finish(mut self) -> ReportDescriptor {
        // Usages left dangling without a closing main item still count as declared.
        self.resolve_locals();
        ReportDescriptor {
            max_input_report_len: self.max_len(),
            usages: self.declared,
        }
    }

    fn fail(self, offset: usize, reason: &'static str) -> DescriptorError {
        DescriptorError {
            offset,
            reason,
            partial: self.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_input::{
        GAMEPAD_DESCRIPTOR as GAMEPAD, PEDALS_DESCRIPTOR as PEDALS,
    };

    #[test]
    fn gamepad_is_recognised() {
        let d = ReportDescriptor::parse(GAMEPAD).unwrap();
        assert!(d.declares_game_controller());
        assert!(d.declares(0x09, 16));
        assert!(!d.declares(0x09, 17));
        assert_eq!(d.max_input_report_len(), 6);
    }

    #[test]
    fn pedals_are_not_a_game_controller() {
        let d = ReportDescriptor::parse(PEDALS).unwrap();
        assert!(!d.declares_game_controller());
        assert!(d.declares(PAGE_SIMULATION, 0xBA));
        // 6 payload bytes + report ID
        assert_eq!(d.max_input_report_len(), 7);
    }

    #[test]
    fn extended_usage_carries_its_page() {
        // Usage Page (Simulation), Usage (Generic Desktop: Joystick) as a 4-byte usage
        let bytes = [0x05, 0x02, 0x0B, 0x04, 0x00, 0x01, 0x00, 0xA1, 0x01, 0xC0];
        let d = ReportDescriptor::parse(&bytes).unwrap();
        assert!(d.declares_game_controller());
    }

    #[test]
    fn largest_report_wins() {
        let bytes = [
            0x85, 0x01, 0x75, 0x08, 0x95, 0x02, 0x81, 0x02, // id 1: 2 bytes
            0x85, 0x02, 0x75, 0x08, 0x95, 0x09, 0x81, 0x02, // id 2: 9 bytes
            0x91, 0x02, // Output is not counted
        ];
        let d = ReportDescriptor::parse(&bytes).unwrap();
        assert_eq!(d.max_input_report_len(), 10);
    }

    #[test]
    fn push_pop_restores_globals() {
        let bytes = [
            0x75, 0x08, 0x95, 0x01, // 8 bits x 1
            0xA4, // Push
            0x95, 0x04, 0x81, 0x02, // 4 bytes
            0xB4, // Pop
            0x81, 0x02, // 1 byte
        ];
        let d = ReportDescriptor::parse(&bytes).unwrap();
        assert_eq!(d.max_input_report_len(), 5);
    }

    #[test]
    fn truncated_descriptor_keeps_partial_length() {
        let mut bytes = GAMEPAD[..22].to_vec(); // through the button Input item
        bytes.push(0x26); // Logical Maximum with missing data
        let err = ReportDescriptor::parse(&bytes).unwrap_err();
        assert_eq!(err.offset, 22);
        assert_eq!(err.partial.max_input_report_len(), 2);
        assert!(err.partial.declares_game_controller());
    }

    #[test]
    fn empty_and_unbalanced_pop_fail() {
        assert!(ReportDescriptor::parse(&[]).is_err());
        assert_eq!(
            ReportDescriptor::parse(&[0xB4]).unwrap_err().reason,
            "pop without push"
        );
    }

    #[test]
    fn oversized_input_report_is_malformed() {
        // Game Pad with Report Size and Report Count of 0xFFFFFFFF
        let huge = [
            0x05, 0x01, 0x09, 0x05, 0xA1, 0x01, 0x77, 0xFF, 0xFF, 0xFF, 0xFF, 0x97, 0xFF, 0xFF,
            0xFF, 0xFF, 0x81, 0x02, 0xC0,
        ];
        let err = ReportDescriptor::parse(&huge).unwrap_err();
        assert_eq!(err.offset, 16);
        assert_eq!(err.reason, "input report too long");
        assert_eq!(err.partial.max_input_report_len(), 0);

        // Two items that each fit but together overflow the limit.
        let split = [
            0x75, 0x08, 0x96, 0x00, 0x80, // 8 bits x 0x8000
            0x81, 0x02, 0x81, 0x02,
        ];
        let err = ReportDescriptor::parse(&split).unwrap_err();
        assert_eq!(err.offset, 7);
        assert_eq!(err.partial.max_input_report_len(), 0x8000);
    }

    #[test]
    fn largest_allowed_report() {
        // 0xFFFE bytes of payload plus the report ID byte
        let bytes = [0x85, 0x01, 0x75, 0x08, 0x96, 0xFE, 0xFF, 0x81, 0x02];
        let d = ReportDescriptor::parse(&bytes).unwrap();
        assert_eq!(d.max_input_report_len(), MAX_INPUT_REPORT_LEN);
    }

    #[test]
    fn long_items_are_skipped() {
        let bytes = [0xFE, 0x02, 0x10, 0xAA, 0xBB, 0x05, 0x01, 0x09, 0x04, 0xA1, 0x01];
        let d = ReportDescriptor::parse(&bytes).unwrap();
        assert!(d.declares(PAGE_GENERIC_DESKTOP, USAGE_JOYSTICK));
    }
}
