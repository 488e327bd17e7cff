// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Cached copies of the CPLD status words and FPGA version registers.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use std::time::Instant;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::attr::PortAttr;
use crate::ports::PortClass;
use crate::ports::PortDescriptor;
use crate::region::RegionKind;
use crate::region::RegionTable;
use crate::FpgaResult;

pub const VERSION_REG: u32 = 0x0;
pub const SFP_GPIO_DATA_EN: u32 = 0x1000;
pub const SFP_GPIO_DATA_OUT: u32 = 0x1004;
pub const SFP_GPIO_DATA_IN: u32 = 0x1008;
/// One bit per QSFP port, clear when a module is present.
pub const QSFP_PRESENT_REG: u32 = 0x1500;
pub const QSFP_LPMODE_REG: u32 = 0x1550;
/// One bit per QSFP port, clear while the module is held in reset.
pub const QSFP_RESET_REG: u32 = 0x1560;

/// How long a snapshot stays fresh.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(500);

/// An FPGA firmware version, as read from register 0.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
pub struct FpgaVersion {
    pub major: u8,
    pub minor: u8,
}

impl From<u32> for FpgaVersion {
    fn from(raw: u32) -> Self {
        FpgaVersion {
            major: ((raw >> 8) & 0x7f) as u8,
            minor: (raw & 0xff) as u8,
        }
    }
}

impl fmt::Display for FpgaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The raw status words for one FPGA.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RegionStatus {
    pub present: u32,
    pub lpmode: u32,
    pub reset: u32,
    pub gpio_out: u32,
    pub gpio_in: u32,
    pub version: Option<u32>,
}

/// Decoded status of one port.
///
/// Signals that don't apply to the port's class are `None`.  When no module
/// is present, the remaining signals carry their absent defaults rather than
/// whatever the hardware reports.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct PortStatus {
    pub port: u8,
    pub class: PortClass,
    pub present: bool,
    pub lp_mode: Option<bool>,
    /// True while the module is held in reset.
    pub reset: Option<bool>,
    pub tx_disable: Option<bool>,
    pub tx_fault: Option<bool>,
    pub rx_los: Option<bool>,
}

fn bit(word: u32, n: u8) -> bool {
    (word >> n) & 1 == 1
}

impl PortStatus {
    pub fn decode(desc: &PortDescriptor, raw: &RegionStatus) -> Self {
        let mut status = PortStatus {
            port: desc.port,
            class: desc.class,
            present: false,
            lp_mode: None,
            reset: None,
            tx_disable: None,
            tx_fault: None,
            rx_los: None,
        };
        // Signals read from hardware only while a module is plugged in.
        let signal = |attr: PortAttr, live: bool, present: bool| {
            if present {
                Some(live)
            } else {
                attr.absent_default()
            }
        };
        match desc.gpio {
            None => {
                let i = desc.index;
                let on = !bit(raw.present, i);
                status.present = on;
                status.lp_mode =
                    signal(PortAttr::LpMode, bit(raw.lpmode, i), on);
                status.reset =
                    signal(PortAttr::Reset, !bit(raw.reset, i), on);
            }
            Some(gpio) => {
                let on = !bit(raw.gpio_in, gpio.absent);
                status.present = on;
                status.tx_disable = signal(
                    PortAttr::TxDisable,
                    bit(raw.gpio_in, gpio.tx_disable),
                    on,
                );
                let fault = bit(raw.gpio_in, gpio.tx_fault);
                status.tx_fault = signal(PortAttr::TxFault, fault, on);
                let los = bit(raw.gpio_in, gpio.rx_los);
                status.rx_los = signal(PortAttr::RxLos, los, on);
            }
        }
        status
    }
}

/// A time-stamped snapshot of every FPGA's status words.
#[derive(Debug)]
pub struct StatusCache {
    max_age: Duration,
    last_updated: Option<Instant>,
    regions: BTreeMap<RegionKind, RegionStatus>,
}

impl StatusCache {
    pub fn new(max_age: Duration) -> Self {
        StatusCache {
            max_age,
            last_updated: None,
            regions: BTreeMap::new(),
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_updated {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= self.max_age,
        }
    }

    /// Force the next lookup to go to hardware.
    pub fn invalidate(&mut self) {
        self.last_updated = None;
    }

    /// Re-read the status words if the snapshot is older than the maximum
    /// age.  Returns whether hardware was touched.
    pub fn refresh_if_stale(
        &mut self,
        table: &RegionTable,
        now: Instant,
    ) -> FpgaResult<bool> {
        if !self.is_stale(now) {
            return Ok(false);
        }
        self.refresh(table, now)?;
        Ok(true)
    }

    /// Read the status words from hardware.  The snapshot is only replaced
    /// if every read succeeds.
    pub fn refresh(&mut self, table: &RegionTable, now: Instant) -> FpgaResult<()> {
        let mut fresh = BTreeMap::new();
        for kind in [RegionKind::Udb, RegionKind::Ldb] {
            let w = &table.get(kind)?.window;
            let mut s = RegionStatus {
                present: w.read32(QSFP_PRESENT_REG)?,
                ..Default::default()
            };
            if kind == RegionKind::Ldb {
                s.gpio_out = w.read32(SFP_GPIO_DATA_OUT)?;
                s.gpio_in = w.read32(SFP_GPIO_DATA_IN)?;
            }
            s.lpmode = w.read32(QSFP_LPMODE_REG)?;
            s.reset = w.read32(QSFP_RESET_REG)?;
            fresh.insert(kind, s);
        }
        for kind in [RegionKind::Udb, RegionKind::Ldb, RegionKind::Smb] {
            if let Ok(m) = table.get(kind) {
                let version = m.window.read32(VERSION_REG)?;
                fresh.entry(kind).or_default().version = Some(version);
            }
        }
        self.regions = fresh;
        self.last_updated = Some(now);
        Ok(())
    }

    pub fn region(&self, kind: RegionKind) -> RegionStatus {
        self.regions.get(&kind).copied().unwrap_or_default()
    }

    pub fn port(&self, desc: &PortDescriptor) -> PortStatus {
        PortStatus::decode(desc, &self.region(desc.region))
    }

    pub fn version(&self, kind: RegionKind) -> Option<FpgaVersion> {
        self.regions
            .get(&kind)
            .and_then(|s| s.version)
            .map(FpgaVersion::from)
    }
}
