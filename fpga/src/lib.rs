// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Access to the transceiver-control FPGAs on the AS9736-64D.
//!
//! Three FPGAs sit behind PCIe.  The UDB and LDB each own one I2C controller
//! per front-panel port plus the CPLDs that carry presence, low-power and
//! reset signals; the SMB only reports a firmware version.  [`Platform`]
//! ties the register windows, the per-port I2C engines, the status cache
//! and the paged EEPROM view together behind a single lock.

pub mod attr;
pub mod eeprom;
pub mod engine;
mod error;
pub mod platform;
pub mod ports;
pub mod region;
pub mod regs;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod status;

pub use attr::FpgaAttr;
pub use attr::PortAttr;
pub use error::FpgaError;
pub use error::FpgaResult;
pub use platform::Platform;
pub use platform::PlatformConfig;
pub use ports::PortClass;
pub use region::RegionKind;
