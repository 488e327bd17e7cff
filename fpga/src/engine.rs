// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The I2C controller embedded in each daughter-board FPGA.
//!
//! Every port has its own bank of controller registers.  A transaction either
//! reads one 128-byte half page from a device into the port's read window, or
//! writes one byte from the port's write window to a device register.  The
//! FPGA signals completion through the port's status register, which we poll.

use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

use crate::regs::RegisterWindow;
use crate::FpgaError;
use crate::FpgaResult;

/// Bytes moved by a single read transaction.
pub const HALF_PAGE: usize = 128;

/// 32-bit words in each data window.
pub const DATA_WORDS: u32 = (HALF_PAGE / 4) as u32;

/// Status value reporting a successful transaction.
pub const STATUS_OK: u32 = 1;

const STATUS_CLEAR: u32 = 0x3;
const CONFIG0_READ: u32 = 0x1000_0080;
const CONFIG0_WRITE: u32 = 0x1;
const CONFIG1_TRIGGER: u32 = 0x8000_0000;

/// Which half of a device's 256-byte address window to read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PageHalf {
    Lower,
    Upper,
}

impl PageHalf {
    fn trigger_offset(self) -> u32 {
        match self {
            PageHalf::Lower => 0x00,
            PageHalf::Upper => 0x80,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum I2cOp {
    Read(PageHalf),
    Write { offset: u8, value: u8 },
}

/// One transaction against one device on one port.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionRequest {
    pub slave_addr: u8,
    pub op: I2cOp,
}

impl TransactionRequest {
    pub fn read(slave_addr: u8, half: PageHalf) -> Self {
        TransactionRequest {
            slave_addr,
            op: I2cOp::Read(half),
        }
    }

    pub fn write(slave_addr: u8, offset: u8, value: u8) -> Self {
        TransactionRequest {
            slave_addr,
            op: I2cOp::Write { offset, value },
        }
    }

    fn config0(&self) -> u32 {
        let addr = u32::from(self.slave_addr) << 8;
        match self.op {
            I2cOp::Read(_) => CONFIG0_READ | addr,
            I2cOp::Write { .. } => CONFIG0_WRITE | addr,
        }
    }

    fn config1(&self) -> u32 {
        match self.op {
            I2cOp::Read(half) => CONFIG1_TRIGGER + half.trigger_offset(),
            I2cOp::Write { offset, .. } => CONFIG1_TRIGGER + u32::from(offset),
        }
    }
}

/// The controller registers for one port, given its index within its FPGA.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EngineRegs {
    pub profile: u32,
    pub config0: u32,
    pub config1: u32,
    pub status: u32,
    pub read_data: u32,
    pub write_data: u32,
}

impl EngineRegs {
    pub fn for_index(index: u8) -> Self {
        let i = u32::from(index);
        EngineRegs {
            profile: 0x2008 + 0x100 * i,
            config0: 0x2050 + 0x100 * i,
            config1: 0x2054 + 0x100 * i,
            status: 0x2060 + 0x100 * i,
            read_data: 0xa000 + 0x200 * i,
            write_data: 0x5000 + 0x200 * i,
        }
    }
}

/// How to wait for the controller to finish a transaction.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PollPolicy {
    /// Sleep between reads of the status register.
    pub interval: Duration,
    /// Sleep after completion before the data window is trusted.
    pub settle: Duration,
    /// Give up after this long.  `None` polls forever.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: Duration::from_micros(15),
            settle: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(1)),
        }
    }
}

impl PollPolicy {
    /// A policy that never sleeps, for driving fakes.
    pub fn immediate() -> Self {
        PollPolicy {
            interval: Duration::ZERO,
            settle: Duration::ZERO,
            timeout: Some(Duration::from_millis(50)),
        }
    }
}

/// The controller for a single port.
pub struct I2cEngine<'a> {
    window: &'a dyn RegisterWindow,
    regs: EngineRegs,
    port: u8,
    policy: PollPolicy,
}

impl<'a> I2cEngine<'a> {
    pub fn new(
        window: &'a dyn RegisterWindow,
        port: u8,
        index: u8,
        policy: PollPolicy,
    ) -> Self {
        I2cEngine {
            window,
            regs: EngineRegs::for_index(index),
            port,
            policy,
        }
    }

    /// Run one transaction and return the raw completion status.
    pub fn execute(&self, req: &TransactionRequest) -> FpgaResult<u32> {
        self.window.write32(self.regs.profile, 0)?;

        match req.op {
            I2cOp::Read(_) => self.zero_window(self.regs.read_data)?,
            I2cOp::Write { value, .. } => {
                self.zero_window(self.regs.write_data)?;
                self.window
                    .write32(self.regs.write_data, u32::from(value))?;
            }
        }

        self.window.write32(self.regs.status, STATUS_CLEAR)?;
        self.window.write32(self.regs.config0, req.config0())?;
        self.window.write32(self.regs.config1, req.config1())?;

        let status = self.wait_for_completion()?;
        if !self.policy.settle.is_zero() {
            std::thread::sleep(self.policy.settle);
        }
        Ok(status)
    }

    fn zero_window(&self, base: u32) -> FpgaResult<()> {
        (0..DATA_WORDS).try_for_each(|w| self.window.write32(base + 4 * w, 0))
    }

    fn wait_for_completion(&self) -> FpgaResult<u32> {
        let start = Instant::now();
        loop {
            let status = self.window.read32(self.regs.status)?;
            if status != 0 {
                return Ok(status);
            }
            if let Some(limit) = self.policy.timeout {
                let waited = start.elapsed();
                if waited >= limit {
                    return Err(FpgaError::Timeout {
                        port: self.port,
                        waited,
                    });
                }
            }
            if !self.policy.interval.is_zero() {
                std::thread::sleep(self.policy.interval);
            }
        }
    }

    fn check(&self, status: u32) -> FpgaResult<()> {
        if status == STATUS_OK {
            Ok(())
        } else {
            Err(FpgaError::Busy {
                port: self.port,
                status,
            })
        }
    }

    /// Read one half page from the device at `slave_addr`.
    pub fn read_half(
        &self,
        slave_addr: u8,
        half: PageHalf,
    ) -> FpgaResult<[u8; HALF_PAGE]> {
        let status =
            self.execute(&TransactionRequest::read(slave_addr, half))?;
        self.check(status)?;

        let mut data = [0u8; HALF_PAGE];
        for (w, chunk) in data.chunks_exact_mut(4).enumerate() {
            let word = self.window.read32(self.regs.read_data + 4 * w as u32)?;
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(data)
    }

    /// Write one byte to register `offset` of the device at `slave_addr`.
    pub fn write_byte(
        &self,
        slave_addr: u8,
        offset: u8,
        value: u8,
    ) -> FpgaResult<()> {
        let status = self
            .execute(&TransactionRequest::write(slave_addr, offset, value))?;
        self.check(status)
    }
}
