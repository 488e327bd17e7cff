// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The platform context: every FPGA, every port, and the single lock that
//! serializes access to them.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;

use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;

use crate::attr::parse_dev_class;
use crate::attr::parse_flag;
use crate::attr::FpgaAttr;
use crate::attr::PortAttr;
use crate::eeprom;
use crate::eeprom::EepromLayout;
use crate::eeprom::PAGE_SELECT_REG;
use crate::eeprom::PRIMARY_ADDR;
use crate::engine::I2cEngine;
use crate::engine::PageHalf;
use crate::engine::PollPolicy;
use crate::ports::PortDescriptor;
use crate::ports::PortTable;
use crate::region::RegionKind;
use crate::region::RegionTable;
use crate::status::FpgaVersion;
use crate::status::PortStatus;
use crate::status::StatusCache;
use crate::status::DEFAULT_MAX_AGE;
use crate::status::QSFP_LPMODE_REG;
use crate::status::QSFP_RESET_REG;
use crate::status::SFP_GPIO_DATA_EN;
use crate::status::SFP_GPIO_DATA_OUT;
use crate::FpgaError;
use crate::FpgaResult;

// CPLD registers touched during bring-up, relative to each CPLD's offset.
const CPLD_PORT_ENABLE: u32 = 0xb0;
const CPLD_PRESENT_INIT: u32 = 0xb8;
const CPLD_SFP_ENABLE: u32 = 0xbd;
const SFP_GPIO_DIRECTION: u32 = 0x707;

/// Run-time tunables for a [`Platform`].
#[derive(Clone, Copy, Debug)]
pub struct PlatformConfig {
    pub poll: PollPolicy,
    pub status_max_age: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            poll: PollPolicy::default(),
            status_max_age: DEFAULT_MAX_AGE,
        }
    }
}

#[derive(Debug)]
struct PortState {
    layout: Option<EepromLayout>,
    dev_class: u32,
}

struct PlatformState {
    status: StatusCache,
    ports: Vec<PortState>,
}

impl PlatformState {
    fn port(&mut self, desc: &PortDescriptor) -> &mut PortState {
        &mut self.ports[usize::from(desc.port - 1)]
    }
}

/// Owns the region table, the port table and all mutable driver state.
///
/// Every operation that touches hardware or cached state takes the one
/// internal lock for its whole duration, so transactions on different ports
/// never interleave.
pub struct Platform {
    log: Logger,
    regions: RegionTable,
    ports: PortTable,
    poll: PollPolicy,
    state: Mutex<PlatformState>,
}

impl Platform {
    pub fn new(
        log: &Logger,
        regions: RegionTable,
        config: PlatformConfig,
    ) -> FpgaResult<Self> {
        regions.validate()?;
        let ports = PortTable::default();
        let state = PlatformState {
            status: StatusCache::new(config.status_max_age),
            ports: ports
                .iter()
                .map(|p| PortState {
                    layout: None,
                    dev_class: p.class.dev_class(),
                })
                .collect(),
        };
        Ok(Platform {
            log: log.new(o!("unit" => "fpga")),
            regions,
            ports,
            poll: config.poll,
            state: Mutex::new(state),
        })
    }

    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enable the port CPLDs and the SFP GPIO lines.
    pub fn init_hardware(&self) -> FpgaResult<()> {
        let mut st = self.lock();
        let ldb = self.regions.get(RegionKind::Ldb)?;
        ldb.window.write32(SFP_GPIO_DATA_EN, SFP_GPIO_DIRECTION)?;

        for (reg, value) in [(CPLD_PORT_ENABLE, 0xff), (CPLD_PRESENT_INIT, 0x00)]
        {
            for kind in [RegionKind::Ldb, RegionKind::Udb] {
                let m = self.regions.get(kind)?;
                let cplds = std::iter::once(m.region.cpld1_offset)
                    .chain(m.region.cpld2_offset);
                for cpld in cplds {
                    for i in 0..=1 {
                        m.window.write8(cpld + reg + i, value)?;
                    }
                }
            }
        }
        ldb.window
            .write8(ldb.region.cpld1_offset + CPLD_SFP_ENABLE, 0x3)?;

        st.status.invalidate();
        info!(self.log, "transceiver CPLDs initialized");
        Ok(())
    }

    // Bring the status snapshot up to date.  Ports seen empty lose their
    // cached EEPROM layout, so a replacement module is probed afresh.
    fn refresh_status(&self, st: &mut PlatformState) -> FpgaResult<()> {
        if st.status.refresh_if_stale(&self.regions, Instant::now())? {
            for desc in self.ports.iter() {
                if !st.status.port(desc).present {
                    st.port(desc).layout = None;
                }
            }
        }
        Ok(())
    }

    pub fn port_status(&self, port: u8) -> FpgaResult<PortStatus> {
        let desc = self.ports.get(port)?;
        let mut st = self.lock();
        self.refresh_status(&mut st)?;
        Ok(st.status.port(desc))
    }

    pub fn all_port_status(&self) -> FpgaResult<Vec<PortStatus>> {
        let mut st = self.lock();
        self.refresh_status(&mut st)?;
        Ok(self.ports.iter().map(|d| st.status.port(d)).collect())
    }

    fn check_attr(desc: &PortDescriptor, attr: PortAttr) -> FpgaResult<()> {
        if attr.applies_to(desc.class) {
            Ok(())
        } else {
            Err(FpgaError::InvalidAttribute(format!(
                "{attr} on {} port {}",
                desc.class, desc.port
            )))
        }
    }

    /// Read a port attribute, rendered the way sysfs would.
    pub fn attr_read(&self, port: u8, attr: PortAttr) -> FpgaResult<String> {
        let desc = self.ports.get(port)?;
        Self::check_attr(desc, attr)?;
        let mut st = self.lock();

        let flag = match attr {
            PortAttr::Name => {
                return Ok(format!("{}\n", desc.class.optoe_name()))
            }
            PortAttr::PortName => return Ok(format!("{}\n", desc.name())),
            PortAttr::DevClass => {
                return Ok(format!("{}\n", st.port(desc).dev_class))
            }
            _ => {
                self.refresh_status(&mut st)?;
                let s = st.status.port(desc);
                match attr {
                    PortAttr::Present => Some(s.present),
                    PortAttr::LpMode => s.lp_mode,
                    PortAttr::Reset => s.reset,
                    PortAttr::TxDisable => s.tx_disable,
                    PortAttr::TxFault => s.tx_fault,
                    PortAttr::RxLos => s.rx_los,
                    _ => None,
                }
            }
        };
        flag.map(|v| format!("{}\n", u8::from(v)))
            .ok_or_else(|| FpgaError::InvalidAttribute(attr.to_string()))
    }

    /// Write a port attribute from its sysfs text form.
    pub fn attr_write(
        &self,
        port: u8,
        attr: PortAttr,
        text: &str,
    ) -> FpgaResult<()> {
        let desc = self.ports.get(port)?;
        Self::check_attr(desc, attr)?;
        if !attr.writable() {
            return Err(FpgaError::ReadOnly(attr.to_string()));
        }

        if attr == PortAttr::DevClass {
            let class = parse_dev_class(text)?;
            self.lock().port(desc).dev_class = class;
            return Ok(());
        }

        let value = parse_flag(text)?;
        let mut st = self.lock();
        self.refresh_status(&mut st)?;
        let raw = st.status.region(desc.region);
        let (reg, current, bit, set) = match (attr, desc.gpio) {
            (PortAttr::LpMode, None) => {
                (QSFP_LPMODE_REG, raw.lpmode, desc.index, value)
            }
            // The register bit is clear while the module is held in reset.
            (PortAttr::Reset, None) => {
                (QSFP_RESET_REG, raw.reset, desc.index, !value)
            }
            (PortAttr::TxDisable, Some(gpio)) => {
                (SFP_GPIO_DATA_OUT, raw.gpio_out, gpio.tx_disable, value)
            }
            _ => return Err(FpgaError::InvalidAttribute(attr.to_string())),
        };
        let updated = if set {
            current | (1 << bit)
        } else {
            current & !(1 << bit)
        };

        debug!(self.log, "writing port control";
            "port" => port,
            "attr" => %attr,
            "value" => value,
            "reg" => format!("{reg:#x}"),
            "word" => format!("{updated:#010x}"));
        let result = self
            .regions
            .get(desc.region)?
            .window
            .write32(reg, updated);
        st.status.invalidate();
        result
    }

    /// Read a platform attribute.
    pub fn fpga_attr_read(&self, attr: FpgaAttr) -> FpgaResult<String> {
        let kind = attr.region();
        let mut st = self.lock();
        self.refresh_status(&mut st)?;
        st.status
            .version(kind)
            .map(|v| format!("{v}\n"))
            .ok_or(FpgaError::RegionMissing(kind))
    }

    /// The firmware version of every FPGA present.
    pub fn versions(&self) -> FpgaResult<BTreeMap<RegionKind, FpgaVersion>> {
        let mut st = self.lock();
        self.refresh_status(&mut st)?;
        Ok(self
            .regions
            .regions()
            .filter_map(|r| st.status.version(r.kind).map(|v| (r.kind, v)))
            .collect())
    }

    fn engine(&self, desc: &PortDescriptor) -> FpgaResult<I2cEngine<'_>> {
        let window = self.regions.get(desc.region)?.window.as_ref();
        Ok(I2cEngine::new(window, desc.port, desc.index, self.poll))
    }

    fn ensure_present(
        &self,
        st: &mut PlatformState,
        desc: &PortDescriptor,
    ) -> FpgaResult<()> {
        self.refresh_status(st)?;
        if st.status.port(desc).present {
            Ok(())
        } else {
            Err(FpgaError::NotPresent { port: desc.port })
        }
    }

    // Return the cached layout, probing the module if there is none.
    fn layout(
        &self,
        st: &mut PlatformState,
        desc: &PortDescriptor,
    ) -> FpgaResult<EepromLayout> {
        if let Some(layout) = st.port(desc).layout {
            return Ok(layout);
        }
        let lower = self.engine(desc)?.read_half(PRIMARY_ADDR, PageHalf::Lower)?;
        let layout = EepromLayout::detect(desc.class, &lower);
        debug!(self.log, "probed EEPROM layout";
            "port" => desc.port,
            "identifier" => format!("{:#04x}", lower[0]),
            "pageable" => layout.pageable,
            "secondary" => layout.secondary,
            "size" => layout.size);
        st.port(desc).layout = Some(layout);
        Ok(layout)
    }

    /// The EEPROM layout of the module in `port`, probing it if needed.
    pub fn eeprom_layout(&self, port: u8) -> FpgaResult<EepromLayout> {
        let desc = self.ports.get(port)?;
        let mut st = self.lock();
        self.ensure_present(&mut st, desc)?;
        self.layout(&mut st, desc)
    }

    /// Size of the flat EEPROM view.  Empty ports report the size of an
    /// unpaged module of their class.
    pub fn eeprom_size(&self, port: u8) -> FpgaResult<usize> {
        let desc = self.ports.get(port)?;
        let mut st = self.lock();
        self.refresh_status(&mut st)?;
        if !st.status.port(desc).present {
            return Ok(EepromLayout::unprobed(desc.class).size);
        }
        Ok(self.layout(&mut st, desc)?.size)
    }

    /// Forget what we know about the module in `port` and probe it again.
    pub fn refresh_layout(&self, port: u8) -> FpgaResult<EepromLayout> {
        let desc = self.ports.get(port)?;
        let mut st = self.lock();
        st.port(desc).layout = None;
        st.status.invalidate();
        self.ensure_present(&mut st, desc)?;
        self.layout(&mut st, desc)
    }

    /// Read `len` bytes of the flat EEPROM view starting at `offset`.
    ///
    /// Reads are clipped at the end of the device.  If a transaction fails
    /// after some data has been read, the data read so far is returned.
    pub fn eeprom_read(
        &self,
        port: u8,
        offset: usize,
        len: usize,
    ) -> FpgaResult<Vec<u8>> {
        let desc = self.ports.get(port)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut st = self.lock();
        self.ensure_present(&mut st, desc)?;
        let layout = self.layout(&mut st, desc)?;
        let engine = self.engine(desc)?;

        let mut out = Vec::with_capacity(len.min(layout.size));
        let mut selected = 0u8;
        let mut failure = None;
        for (slice, within, n) in eeprom::slices(offset, len, layout.size) {
            let loc = layout.locate(slice);
            if let Some(page) = loc.select {
                if let Err(e) =
                    engine.write_byte(loc.slave_addr, PAGE_SELECT_REG, page)
                {
                    failure = Some(e);
                    break;
                }
                selected = page;
            }
            match engine.read_half(loc.slave_addr, loc.half) {
                Ok(data) => out.extend_from_slice(&data[within..within + n]),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if selected > 0 && layout.pageable {
            let addr = layout.paged_addr();
            if let Err(e) = engine.write_byte(addr, PAGE_SELECT_REG, 0) {
                warn!(self.log, "failed to restore page select";
                    "port" => port,
                    "addr" => format!("{addr:#04x}"),
                    "error" => %e);
                return Err(FpgaError::PageRestore { port });
            }
        }

        match failure {
            Some(e) if out.is_empty() => Err(e),
            Some(e) => {
                warn!(self.log, "short EEPROM read";
                    "port" => port,
                    "offset" => offset,
                    "requested" => len,
                    "read" => out.len(),
                    "error" => %e);
                Ok(out)
            }
            None => Ok(out),
        }
    }

    /// Write to the module's primary address.  Only single-byte writes reach
    /// the device; anything else is accepted and discarded.  Returns the
    /// number of bytes consumed.
    pub fn eeprom_write(
        &self,
        port: u8,
        offset: usize,
        data: &[u8],
    ) -> FpgaResult<usize> {
        let desc = self.ports.get(port)?;
        let [value] = data else {
            if !data.is_empty() {
                debug!(self.log, "ignoring multi-byte EEPROM write";
                    "port" => port, "len" => data.len());
            }
            return Ok(data.len());
        };
        let offset = u8::try_from(offset).map_err(|_| {
            FpgaError::InvalidValue(format!(
                "EEPROM write offset {offset} is beyond the device window"
            ))
        })?;

        let mut st = self.lock();
        self.ensure_present(&mut st, desc)?;
        self.engine(desc)?.write_byte(desc.slave_addr, offset, *value)?;
        Ok(1)
    }
}
