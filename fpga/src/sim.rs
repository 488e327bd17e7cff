// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A simulated board: three FPGAs whose I2C controllers run transactions
//! against in-memory transceiver modules.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde::Deserialize;
use serde::Serialize;

use crate::eeprom::DIAG_ADDR;
use crate::eeprom::ID_QSFP_DD;
use crate::eeprom::PAGE_SELECT_REG;
use crate::eeprom::PRIMARY_ADDR;
use crate::engine::EngineRegs;
use crate::engine::PageHalf;
use crate::engine::HALF_PAGE;
use crate::engine::STATUS_OK;
use crate::ports::PortTable;
use crate::region::FpgaRegion;
use crate::region::RegionKind;
use crate::region::RegionTable;
use crate::regs::RegisterWindow;
use crate::status::QSFP_PRESENT_REG;
use crate::status::QSFP_RESET_REG;
use crate::status::SFP_GPIO_DATA_IN;
use crate::status::SFP_GPIO_DATA_OUT;
use crate::status::VERSION_REG;
use crate::FpgaError;
use crate::FpgaResult;

/// Status the simulated controller reports when no device answers.
pub const STATUS_NACK: u32 = 2;

const ENGINE_BANKS: u32 = 34;
const ENGINE_STRIDE: u32 = 0x100;
const CONFIG1_BASE: u32 = 0x2054;
const STATUS_BASE: u32 = 0x2060;
const CONFIG0_READ_ENABLE: u32 = 0x1000_0000;

/// The contents of one simulated half page.  Every (address, page, half)
/// gets distinct data so misdirected reads are caught.
pub fn pattern(addr: u8, page: u8, half: PageHalf) -> [u8; HALF_PAGE] {
    let base = page
        .wrapping_mul(31)
        .wrapping_add(if half == PageHalf::Upper { 0x80 } else { 0 })
        .wrapping_add(if addr == DIAG_ADDR { 0x45 } else { 0 });
    let mut data = [0u8; HALF_PAGE];
    for (i, b) in data.iter_mut().enumerate() {
        *b = base.wrapping_add(i as u8);
    }
    data
}

// One I2C device: a fixed lower half and a set of selectable upper pages.
#[derive(Clone, Debug)]
struct SimDevice {
    addr: u8,
    lower: [u8; HALF_PAGE],
    upper: BTreeMap<u8, [u8; HALF_PAGE]>,
    pageable: bool,
    page: u8,
}

impl SimDevice {
    fn new(addr: u8, pageable: bool) -> Self {
        SimDevice {
            addr,
            lower: pattern(addr, 0, PageHalf::Lower),
            upper: BTreeMap::new(),
            pageable,
            page: 0,
        }
    }

    fn read(&self, half: PageHalf) -> [u8; HALF_PAGE] {
        match half {
            PageHalf::Lower => self.lower,
            PageHalf::Upper => self
                .upper
                .get(&self.page)
                .copied()
                .unwrap_or_else(|| pattern(self.addr, self.page, half)),
        }
    }

    fn write(&mut self, offset: u8, value: u8) {
        if offset == PAGE_SELECT_REG {
            if self.pageable {
                self.page = value;
            }
            return;
        }
        let page = self.page;
        let addr = self.addr;
        let half = usize::from(offset);
        if half < HALF_PAGE {
            self.lower[half] = value;
        } else {
            self.upper
                .entry(page)
                .or_insert_with(|| pattern(addr, page, PageHalf::Upper))
                [half - HALF_PAGE] = value;
        }
    }
}

/// A pluggable module.
#[derive(Clone, Debug)]
pub struct SimModule {
    primary: SimDevice,
    diag: Option<SimDevice>,
}

impl SimModule {
    /// A QSFP28-style module, flat or paged.
    pub fn qsfp(pageable: bool) -> Self {
        let mut primary = SimDevice::new(PRIMARY_ADDR, pageable);
        primary.lower[0] = 0x11;
        primary.lower[2] = if pageable { 0 } else { 1 << 2 };
        SimModule {
            primary,
            diag: None,
        }
    }

    /// A QSFP-DD module using the CMIS memory map.
    pub fn qsfp_dd(pageable: bool) -> Self {
        let mut primary = SimDevice::new(PRIMARY_ADDR, pageable);
        primary.lower[0] = ID_QSFP_DD;
        // Bit 2 means nothing to CMIS; set it to be sure it's ignored.
        primary.lower[2] = if pageable { 1 << 2 } else { 1 << 7 };
        SimModule {
            primary,
            diag: None,
        }
    }

    /// An SFP, optionally with a diagnostic device at 0x51.
    pub fn sfp(diag: bool, pageable: bool) -> Self {
        let mut primary = SimDevice::new(PRIMARY_ADDR, false);
        primary.lower[0] = 0x03;
        primary.lower[0x40] = if pageable { 1 << 4 } else { 0 };
        primary.lower[92] = if diag { 1 << 6 } else { 0 };
        SimModule {
            primary,
            diag: diag.then(|| SimDevice::new(DIAG_ADDR, pageable)),
        }
    }

    fn device(&self, addr: u8) -> Option<&SimDevice> {
        match addr {
            PRIMARY_ADDR => Some(&self.primary),
            DIAG_ADDR => self.diag.as_ref(),
            _ => None,
        }
    }

    fn device_mut(&mut self, addr: u8) -> Option<&mut SimDevice> {
        match addr {
            PRIMARY_ADDR => Some(&mut self.primary),
            DIAG_ADDR => self.diag.as_mut(),
            _ => None,
        }
    }

    /// The page currently selected at `addr`.
    pub fn selected_page(&self, addr: u8) -> Option<u8> {
        self.device(addr).map(|d| d.page)
    }
}

/// One register-level I2C transaction seen by the simulated controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimEvent {
    Read {
        index: u8,
        addr: u8,
        half: PageHalf,
        /// The page the device had selected when it was read.
        page: u8,
    },
    Write {
        index: u8,
        addr: u8,
        offset: u8,
        value: u8,
    },
}

impl SimEvent {
    pub fn index(&self) -> u8 {
        match self {
            SimEvent::Read { index, .. } | SimEvent::Write { index, .. } => {
                *index
            }
        }
    }

    pub fn is_page_select(&self) -> bool {
        matches!(self, SimEvent::Write { offset, .. } if *offset == PAGE_SELECT_REG)
    }
}

#[derive(Debug)]
struct SimState {
    kind: RegionKind,
    regs: BTreeMap<u32, u32>,
    modules: BTreeMap<u8, SimModule>,
    events: Vec<SimEvent>,
    reads: BTreeMap<u32, usize>,
    stalled: bool,
    forced_status: Option<u32>,
    fail_after: Option<usize>,
}

impl SimState {
    fn reg(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    fn set_bit(&mut self, offset: u32, bit: u8, on: bool) {
        let word = self.reg(offset);
        let word = if on { word | (1 << bit) } else { word & !(1 << bit) };
        self.regs.insert(offset, word);
    }

    // Which controller bank, if any, has register `base` at `offset`.
    fn bank(offset: u32, base: u32) -> Option<u8> {
        let rel = offset.checked_sub(base)?;
        if rel % ENGINE_STRIDE != 0 || rel / ENGINE_STRIDE >= ENGINE_BANKS {
            return None;
        }
        u8::try_from(rel / ENGINE_STRIDE).ok()
    }

    fn run_transaction(&mut self, index: u8) {
        let regs = EngineRegs::for_index(index);
        if self.stalled {
            return;
        }
        if let Some(status) = self.forced_status {
            self.regs.insert(regs.status, status);
            return;
        }
        if let Some(n) = self.fail_after.as_mut() {
            if *n == 0 {
                self.regs.insert(regs.status, STATUS_NACK);
                return;
            }
            *n -= 1;
        }

        let config0 = self.reg(regs.config0);
        let addr = ((config0 >> 8) & 0xff) as u8;
        let offset = (self.reg(regs.config1) & 0xff) as u8;
        let Some(module) = self.modules.get_mut(&index) else {
            self.regs.insert(regs.status, STATUS_NACK);
            return;
        };

        if config0 & CONFIG0_READ_ENABLE != 0 {
            let half = if offset & 0x80 != 0 {
                PageHalf::Upper
            } else {
                PageHalf::Lower
            };
            let Some(dev) = module.device(addr) else {
                self.regs.insert(regs.status, STATUS_NACK);
                return;
            };
            let data = dev.read(half);
            let page = dev.page;
            self.events.push(SimEvent::Read {
                index,
                addr,
                half,
                page,
            });
            for (w, chunk) in data.chunks_exact(4).enumerate() {
                let word =
                    u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                self.regs.insert(regs.read_data + 4 * w as u32, word);
            }
        } else {
            let value = (self.regs.get(&regs.write_data).copied().unwrap_or(0) & 0xff) as u8;
            let Some(dev) = module.device_mut(addr) else {
                self.regs.insert(regs.status, STATUS_NACK);
                return;
            };
            dev.write(offset, value);
            self.events.push(SimEvent::Write {
                index,
                addr,
                offset,
                value,
            });
        }
        self.regs.insert(regs.status, STATUS_OK);
    }
}

/// One simulated FPGA.  Clones share state, so a test can keep a handle
/// while the platform owns another.
#[derive(Clone, Debug)]
pub struct SimFpga {
    inner: Arc<Mutex<SimState>>,
}

impl SimFpga {
    pub fn new(kind: RegionKind, version: u32) -> Self {
        let mut state = SimState {
            kind,
            regs: BTreeMap::new(),
            modules: BTreeMap::new(),
            events: Vec::new(),
            reads: BTreeMap::new(),
            stalled: false,
            forced_status: None,
            fail_after: None,
        };
        state.regs.insert(VERSION_REG, version);
        if kind != RegionKind::Smb {
            // Nothing plugged in and nothing held in reset.
            state.regs.insert(QSFP_PRESENT_REG, u32::MAX);
            state.regs.insert(QSFP_RESET_REG, u32::MAX);
        }
        SimFpga {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn kind(&self) -> RegionKind {
        self.lock().kind
    }

    pub fn reg(&self, offset: u32) -> u32 {
        self.lock().reg(offset)
    }

    pub fn set_reg(&self, offset: u32, value: u32) {
        self.lock().regs.insert(offset, value);
    }

    pub fn set_bit(&self, offset: u32, bit: u8, on: bool) {
        self.lock().set_bit(offset, bit, on);
    }

    pub fn insert_module(&self, index: u8, module: SimModule) {
        self.lock().modules.insert(index, module);
    }

    pub fn remove_module(&self, index: u8) -> Option<SimModule> {
        self.lock().modules.remove(&index)
    }

    pub fn with_module<T>(
        &self,
        index: u8,
        f: impl FnOnce(&mut SimModule) -> T,
    ) -> Option<T> {
        self.lock().modules.get_mut(&index).map(f)
    }

    /// Stop the controller from ever reporting completion.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Make every transaction complete with `status`.
    pub fn force_status(&self, status: Option<u32>) {
        self.lock().forced_status = status;
    }

    /// Let `n` more transactions succeed, then NACK the rest.
    pub fn fail_after(&self, n: Option<usize>) {
        self.lock().fail_after = n;
    }

    /// How many times register `offset` has been read.
    pub fn reads_of(&self, offset: u32) -> usize {
        self.lock().reads.get(&offset).copied().unwrap_or(0)
    }

    /// Drain the transaction log.
    pub fn take_events(&self) -> Vec<SimEvent> {
        std::mem::take(&mut self.lock().events)
    }
}

impl RegisterWindow for SimFpga {
    fn read32(&self, offset: u32) -> FpgaResult<u32> {
        let mut st = self.lock();
        *st.reads.entry(offset).or_default() += 1;
        Ok(st.reg(offset))
    }

    fn write32(&self, offset: u32, value: u32) -> FpgaResult<()> {
        let mut st = self.lock();
        // Status bits are write-one-to-clear.
        if st.kind != RegionKind::Smb
            && SimState::bank(offset, STATUS_BASE).is_some()
        {
            let old = st.reg(offset);
            st.regs.insert(offset, old & !value);
            return Ok(());
        }
        st.regs.insert(offset, value);
        if st.kind == RegionKind::Ldb && offset == SFP_GPIO_DATA_OUT {
            // The tx_disable outputs loop back to their input lines.
            for bit in [11, 3] {
                st.set_bit(SFP_GPIO_DATA_IN, bit, (value >> bit) & 1 == 1);
            }
        }
        if st.kind != RegionKind::Smb {
            if let Some(index) = SimState::bank(offset, CONFIG1_BASE) {
                st.run_transaction(index);
            }
        }
        Ok(())
    }

    fn write8(&self, offset: u32, value: u8) -> FpgaResult<()> {
        let mut st = self.lock();
        let word = offset & !3;
        let shift = 8 * (offset & 3);
        let old = st.reg(word);
        st.regs
            .insert(word, (old & !(0xff << shift)) | (u32::from(value) << shift));
        Ok(())
    }
}

/// Which family of module to plug into a simulated port.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimModuleKind {
    Qsfp,
    QsfpDd,
    Sfp,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SimModuleConfig {
    pub port: u8,
    pub kind: SimModuleKind,
    #[serde(default)]
    pub pageable: bool,
    /// SFP only: whether the module answers at the diagnostic address.
    #[serde(default)]
    pub diag: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SimVersions {
    pub udb: u32,
    pub ldb: u32,
    pub smb: Option<u32>,
}

impl Default for SimVersions {
    fn default() -> Self {
        SimVersions {
            udb: 0x0203,
            ldb: 0x0203,
            smb: Some(0x0101),
        }
    }
}

/// Description of a simulated board, usually loaded from TOML.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SimConfig {
    #[serde(default)]
    pub versions: SimVersions,
    #[serde(default)]
    pub modules: Vec<SimModuleConfig>,
}

/// A full simulated board.
#[derive(Clone, Debug)]
pub struct SimBoard {
    pub udb: SimFpga,
    pub ldb: SimFpga,
    pub smb: Option<SimFpga>,
    ports: PortTable,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new(&SimVersions::default())
    }
}

impl SimBoard {
    pub fn new(versions: &SimVersions) -> Self {
        let board = SimBoard {
            udb: SimFpga::new(RegionKind::Udb, versions.udb),
            ldb: SimFpga::new(RegionKind::Ldb, versions.ldb),
            smb: versions.smb.map(|v| SimFpga::new(RegionKind::Smb, v)),
            ports: PortTable::default(),
        };
        for gpio in board.ports.iter().filter_map(|d| d.gpio) {
            board.ldb.set_bit(SFP_GPIO_DATA_IN, gpio.absent, true);
        }
        board
    }

    pub fn from_config(config: &SimConfig) -> FpgaResult<Self> {
        let board = SimBoard::new(&config.versions);
        for m in &config.modules {
            let module = match m.kind {
                SimModuleKind::Qsfp => SimModule::qsfp(m.pageable),
                SimModuleKind::QsfpDd => SimModule::qsfp_dd(m.pageable),
                SimModuleKind::Sfp => SimModule::sfp(m.diag, m.pageable),
            };
            board.insert(m.port, module)?;
        }
        Ok(board)
    }

    pub fn fpga(&self, kind: RegionKind) -> Option<&SimFpga> {
        match kind {
            RegionKind::Udb => Some(&self.udb),
            RegionKind::Ldb => Some(&self.ldb),
            RegionKind::Smb => self.smb.as_ref(),
        }
    }

    fn port_fpga(&self, port: u8) -> FpgaResult<(&SimFpga, u8, Option<u8>)> {
        let desc = self.ports.get(port)?;
        let fpga = self
            .fpga(desc.region)
            .ok_or(FpgaError::RegionMissing(desc.region))?;
        Ok((fpga, desc.index, desc.gpio.map(|g| g.absent)))
    }

    /// Plug a module into `port` and assert its presence signal.
    pub fn insert(&self, port: u8, module: SimModule) -> FpgaResult<()> {
        self.set_present(port, true)?;
        let (fpga, index, _) = self.port_fpga(port)?;
        fpga.insert_module(index, module);
        Ok(())
    }

    /// Pull the module out of `port`.
    pub fn remove(&self, port: u8) -> FpgaResult<Option<SimModule>> {
        self.set_present(port, false)?;
        let (fpga, index, _) = self.port_fpga(port)?;
        Ok(fpga.remove_module(index))
    }

    /// Drive the presence signal for `port` without touching the module.
    pub fn set_present(&self, port: u8, present: bool) -> FpgaResult<()> {
        let (fpga, index, absent_bit) = self.port_fpga(port)?;
        match absent_bit {
            Some(bit) => fpga.set_bit(SFP_GPIO_DATA_IN, bit, !present),
            None => fpga.set_bit(QSFP_PRESENT_REG, index, !present),
        }
        Ok(())
    }

    pub fn with_module<T>(
        &self,
        port: u8,
        f: impl FnOnce(&mut SimModule) -> T,
    ) -> FpgaResult<Option<T>> {
        let (fpga, index, _) = self.port_fpga(port)?;
        Ok(fpga.with_module(index, f))
    }

    /// Drain the transaction log of the FPGA that owns `port`, keeping only
    /// that port's events.
    pub fn take_events(&self, port: u8) -> FpgaResult<Vec<SimEvent>> {
        let (fpga, index, _) = self.port_fpga(port)?;
        Ok(fpga
            .take_events()
            .into_iter()
            .filter(|e| e.index() == index)
            .collect())
    }

    /// A region table whose windows are handles onto this board.
    pub fn region_table(&self) -> RegionTable {
        let mut table = RegionTable::new();
        for fpga in [Some(&self.udb), Some(&self.ldb), self.smb.as_ref()]
            .into_iter()
            .flatten()
        {
            table.insert(
                FpgaRegion::with_defaults(fpga.kind()),
                Box::new(fpga.clone()),
            );
        }
        table
    }
}
