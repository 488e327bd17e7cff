// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Linear addressing over paged transceiver EEPROMs.
//!
//! A module's memory is presented as one flat byte range cut into 128-byte
//! slices.  Slices 0 and 1 are the lower and upper halves of the primary
//! device's 256-byte window.  What follows depends on the module class:
//!
//! - Single-address modules (QSFP, CMIS) expose upper page `n` as slice
//!   `n + 1`, selected through the page register at the primary address.
//! - Dual-address modules (SFP) place the diagnostic device at 0x51 after
//!   the primary window.  Slice 2 is its lower half, slice 3 its upper half
//!   at page 0, and slice `n + 3` its upper page `n`.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::engine::PageHalf;
use crate::engine::HALF_PAGE;
use crate::ports::PortClass;

/// The primary I2C address of every module.
pub const PRIMARY_ADDR: u8 = 0x50;

/// The diagnostic address of dual-address modules.
pub const DIAG_ADDR: u8 = 0x51;

/// The page-select register, present at any pageable address.
pub const PAGE_SELECT_REG: u8 = 0x7f;

/// Upper pages addressable through the page-select register.
pub const ARCH_PAGES: usize = 256;

/// SFF-8024 identifier for QSFP-DD, which uses the CMIS memory map.
pub const ID_QSFP_DD: u8 = 0x18;

const ONE_ADDR_FLAGS: usize = 0x02;
const QSFP_NOT_PAGEABLE: u8 = 1 << 2;
const CMIS_NOT_PAGEABLE: u8 = 1 << 7;
const TWO_ADDR_PAGEABLE_REG: usize = 0x40;
const TWO_ADDR_PAGEABLE: u8 = 1 << 4;
const TWO_ADDR_DIAG_REG: usize = 92;
const TWO_ADDR_DIAG_SUPPORTED: u8 = 1 << 6;

/// What a module's EEPROM looks like from the host.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
pub struct EepromLayout {
    pub class: PortClass,
    /// The module honors the page-select register.
    pub pageable: bool,
    /// A dual-address module answers at the diagnostic address.
    pub secondary: bool,
    /// Total bytes addressable through the flat view.
    pub size: usize,
}

impl EepromLayout {
    pub fn single_address(pageable: bool) -> Self {
        let pages = if pageable { 1 + ARCH_PAGES } else { 2 };
        EepromLayout {
            class: PortClass::Qsfp,
            pageable,
            secondary: false,
            size: pages * HALF_PAGE,
        }
    }

    pub fn dual_address(secondary: bool, pageable: bool) -> Self {
        let pages = match (secondary, pageable) {
            (false, _) => 2,
            (true, false) => 4,
            (true, true) => 3 + ARCH_PAGES,
        };
        EepromLayout {
            class: PortClass::Sfp,
            pageable,
            secondary,
            size: pages * HALF_PAGE,
        }
    }

    /// The layout assumed before a module has been probed.
    pub fn unprobed(class: PortClass) -> Self {
        match class {
            PortClass::Qsfp => Self::single_address(false),
            PortClass::Sfp => Self::dual_address(false, false),
        }
    }

    /// Work out the layout from the lower half of the primary device.
    pub fn detect(class: PortClass, lower: &[u8; HALF_PAGE]) -> Self {
        match class {
            PortClass::Qsfp => {
                let mask = if lower[0] == ID_QSFP_DD {
                    CMIS_NOT_PAGEABLE
                } else {
                    QSFP_NOT_PAGEABLE
                };
                Self::single_address(lower[ONE_ADDR_FLAGS] & mask == 0)
            }
            PortClass::Sfp => Self::dual_address(
                lower[TWO_ADDR_DIAG_REG] & TWO_ADDR_DIAG_SUPPORTED != 0,
                lower[TWO_ADDR_PAGEABLE_REG] & TWO_ADDR_PAGEABLE != 0,
            ),
        }
    }

    /// Where a slice of the flat view lives on the wire.
    pub fn locate(&self, slice: usize) -> SliceLocation {
        let direct = |slave_addr, half| SliceLocation {
            slave_addr,
            half,
            select: None,
        };
        match (slice, self.class) {
            (0, _) => direct(PRIMARY_ADDR, PageHalf::Lower),
            (1, _) => direct(PRIMARY_ADDR, PageHalf::Upper),
            (n, PortClass::Qsfp) => SliceLocation {
                slave_addr: PRIMARY_ADDR,
                half: PageHalf::Upper,
                select: Some(page_number(n - 1)),
            },
            (2, PortClass::Sfp) => direct(DIAG_ADDR, PageHalf::Lower),
            (n, PortClass::Sfp) => SliceLocation {
                slave_addr: DIAG_ADDR,
                half: PageHalf::Upper,
                select: Some(page_number(n - 3)),
            },
        }
    }

    /// The address whose page register is left non-zero after reading a
    /// high page.
    pub fn paged_addr(&self) -> u8 {
        match self.class {
            PortClass::Qsfp => PRIMARY_ADDR,
            PortClass::Sfp => DIAG_ADDR,
        }
    }
}

// Slices past the last architectural page are clipped by the layout size
// before they get here.
fn page_number(n: usize) -> u8 {
    u8::try_from(n).unwrap_or(u8::MAX)
}

/// The device, half and page that back one slice.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SliceLocation {
    pub slave_addr: u8,
    pub half: PageHalf,
    /// Page to write to the page-select register before reading.
    pub select: Option<u8>,
}

/// Split `[offset, offset + len)` into per-slice pieces, clipped to `size`.
///
/// Each item is `(slice, offset within slice, length)`.
pub fn slices(
    offset: usize,
    len: usize,
    size: usize,
) -> impl Iterator<Item = (usize, usize, usize)> {
    let end = offset.saturating_add(len).min(size);
    let mut pos = offset;
    std::iter::from_fn(move || {
        if pos >= end {
            return None;
        }
        let slice = pos / HALF_PAGE;
        let within = pos % HALF_PAGE;
        let n = (HALF_PAGE - within).min(end - pos);
        pos += n;
        Some((slice, within, n))
    })
}
