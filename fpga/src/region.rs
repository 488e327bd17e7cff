// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Locating the three FPGAs on the PCIe bus.

use std::collections::BTreeMap;
use std::path::Path;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;

use crate::regs::DevMemWindow;
use crate::regs::RegisterWindow;
use crate::FpgaError;
use crate::FpgaResult;

pub const PCI_VENDOR_ID: u16 = 0x1113;
pub const PCI_DEVICE_ID: u16 = 0x8664;

/// Size of the register window used when regions come from the static table.
pub const DEFAULT_WINDOW_SIZE: u64 = 0x10_0000;

/// The three FPGAs on the board, told apart by PCI subsystem ID.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RegionKind {
    /// Upper daughter board: QSFP ports 1-32.
    Udb,
    /// Lower daughter board: QSFP ports 33-64 and SFP ports 65-66.
    Ldb,
    /// System management board.
    Smb,
}

impl RegionKind {
    pub fn from_subsystem_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(RegionKind::Udb),
            1 => Some(RegionKind::Ldb),
            2 => Some(RegionKind::Smb),
            _ => None,
        }
    }

    pub fn subsystem_id(self) -> u16 {
        match self {
            RegionKind::Udb => 0,
            RegionKind::Ldb => 1,
            RegionKind::Smb => 2,
        }
    }

    /// The BAR0 address firmware assigns this FPGA on a stock board.
    pub fn default_base(self) -> u64 {
        match self {
            RegionKind::Udb => 0xfb70_0000,
            RegionKind::Ldb => 0xfb40_0000,
            RegionKind::Smb => 0xfb10_0000,
        }
    }

    /// The port-carrying FPGAs must be present; the SMB is optional.
    pub fn required(self) -> bool {
        !matches!(self, RegionKind::Smb)
    }

    fn cpld_offsets(self) -> (u32, Option<u32>) {
        match self {
            RegionKind::Udb => (0x400, Some(0x500)),
            RegionKind::Ldb => (0x400, Some(0x500)),
            RegionKind::Smb => (0x200, None),
        }
    }
}

/// One FPGA's register window, as found at discovery time.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct FpgaRegion {
    pub kind: RegionKind,
    /// Physical address of BAR0.
    pub base: u64,
    /// Length of the register window in bytes.
    pub size: u64,
    pub cpld1_offset: u32,
    pub cpld2_offset: Option<u32>,
}

impl FpgaRegion {
    pub fn new(kind: RegionKind, base: u64, size: u64) -> Self {
        let (cpld1_offset, cpld2_offset) = kind.cpld_offsets();
        FpgaRegion {
            kind,
            base,
            size,
            cpld1_offset,
            cpld2_offset,
        }
    }

    /// The region at its stock address.
    pub fn with_defaults(kind: RegionKind) -> Self {
        Self::new(kind, kind.default_base(), DEFAULT_WINDOW_SIZE)
    }
}

/// The regions at their stock addresses, used when PCI discovery isn't
/// available.
pub fn static_regions() -> Vec<FpgaRegion> {
    use strum::IntoEnumIterator;
    RegionKind::iter().map(FpgaRegion::with_defaults).collect()
}

// sysfs renders IDs and addresses as "0x"-prefixed hex.
fn parse_hex(s: &str) -> FpgaResult<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| FpgaError::Discovery(format!("bad hex value {s:?}: {e}")))
}

fn read_hex(dir: &Path, name: &str) -> FpgaResult<u64> {
    let path = dir.join(name);
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| FpgaError::io(format!("reading {}", path.display()), e))?;
    parse_hex(&contents)
}

// The first line of a device's `resource` file describes BAR0 as
// "start end flags".
fn read_bar0(dir: &Path) -> FpgaResult<(u64, u64)> {
    let path = dir.join("resource");
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| FpgaError::io(format!("reading {}", path.display()), e))?;
    let line = contents.lines().next().unwrap_or_default();
    let mut fields = line.split_whitespace();
    let (Some(start), Some(end)) = (fields.next(), fields.next()) else {
        return Err(FpgaError::Discovery(format!(
            "malformed resource line in {}: {line:?}",
            path.display()
        )));
    };
    let start = parse_hex(start)?;
    let end = parse_hex(end)?;
    if start == 0 || end < start {
        return Err(FpgaError::Discovery(format!(
            "BAR0 unassigned in {}",
            path.display()
        )));
    }
    Ok((start, end - start + 1))
}

/// Walk `<sysfs_root>/bus/pci/devices` looking for our FPGAs.
///
/// Both daughter-board FPGAs must be found.  The SMB FPGA is optional.
pub fn discover(log: &Logger, sysfs_root: &Path) -> FpgaResult<Vec<FpgaRegion>> {
    let devices = sysfs_root.join("bus/pci/devices");
    let entries = std::fs::read_dir(&devices).map_err(|e| {
        FpgaError::io(format!("listing {}", devices.display()), e)
    })?;

    let mut found = BTreeMap::new();
    for entry in entries {
        let dir = entry
            .map_err(|e| FpgaError::io(format!("listing {}", devices.display()), e))?
            .path();
        if read_hex(&dir, "vendor").ok() != Some(u64::from(PCI_VENDOR_ID))
            || read_hex(&dir, "device").ok() != Some(u64::from(PCI_DEVICE_ID))
        {
            continue;
        }
        let subsys = read_hex(&dir, "subsystem_device")?;
        let Some(kind) = u16::try_from(subsys)
            .ok()
            .and_then(RegionKind::from_subsystem_id)
        else {
            warn!(log, "ignoring FPGA with unknown subsystem id";
                "device" => %dir.display(), "subsystem" => subsys);
            continue;
        };
        let (base, size) = read_bar0(&dir)?;
        debug!(log, "found FPGA";
            "kind" => %kind,
            "device" => %dir.display(),
            "base" => format!("{base:#x}"),
            "size" => format!("{size:#x}"));
        found.insert(kind, FpgaRegion::new(kind, base, size));
    }

    for kind in [RegionKind::Udb, RegionKind::Ldb] {
        if !found.contains_key(&kind) {
            return Err(FpgaError::RegionMissing(kind));
        }
    }
    if !found.contains_key(&RegionKind::Smb) {
        info!(log, "SMB FPGA not found, its version will be unavailable");
    }
    Ok(found.into_values().collect())
}

/// A discovered region paired with the window used to reach it.
pub struct MappedRegion {
    pub region: FpgaRegion,
    pub window: Box<dyn RegisterWindow>,
}

/// All of the FPGAs the platform can reach, keyed by kind.
#[derive(Default)]
pub struct RegionTable {
    regions: BTreeMap<RegionKind, MappedRegion>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: FpgaRegion, window: Box<dyn RegisterWindow>) {
        self.regions
            .insert(region.kind, MappedRegion { region, window });
    }

    /// Open a `/dev/mem` window for each region.
    pub fn open_devmem(
        regions: &[FpgaRegion],
        devmem: &Path,
    ) -> FpgaResult<Self> {
        let mut table = RegionTable::new();
        for region in regions {
            let window = DevMemWindow::open(devmem, region.base, region.size)?;
            table.insert(*region, Box::new(window));
        }
        Ok(table)
    }

    pub fn get(&self, kind: RegionKind) -> FpgaResult<&MappedRegion> {
        self.regions
            .get(&kind)
            .ok_or(FpgaError::RegionMissing(kind))
    }

    fn contains(&self, kind: RegionKind) -> bool {
        self.regions.contains_key(&kind)
    }

    pub fn regions(&self) -> impl Iterator<Item = &FpgaRegion> {
        self.regions.values().map(|m| &m.region)
    }

    /// Check that every required region is present.
    pub fn validate(&self) -> FpgaResult<()> {
        match [RegionKind::Udb, RegionKind::Ldb]
            .into_iter()
            .find(|k| !self.contains(*k))
        {
            Some(kind) => Err(FpgaError::RegionMissing(kind)),
            None => Ok(()),
        }
    }
}
