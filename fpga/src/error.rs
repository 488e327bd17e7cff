// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::time::Duration;

use thiserror::Error;

use crate::region::RegionKind;

/// A specialized Result type for FPGA operations
pub type FpgaResult<T> = Result<T, FpgaError>;

/// Error type conveying additional information about FPGA errors
#[derive(Error, Debug)]
pub enum FpgaError {
    /// The requested port number isn't part of the platform.
    #[error("No such port: {0}")]
    NoSuchPort(u8),
    /// The port exists, but no transceiver is plugged into it.
    #[error("Port {port}: no transceiver present")]
    NotPresent { port: u8 },
    /// The I2C engine finished a transaction with a status other than
    /// success.  The engine is not retried.
    #[error("Port {port}: I2C transaction failed with status {status:#x}")]
    Busy { port: u8, status: u32 },
    /// The I2C engine never reported completion.
    #[error("Port {port}: I2C transaction incomplete after {waited:?}")]
    Timeout { port: u8, waited: Duration },
    /// The attribute doesn't exist, or doesn't apply to this port's class.
    #[error("Invalid attribute: {}", .0)]
    InvalidAttribute(String),
    /// An attempt was made to write a read-only attribute.
    #[error("Attribute {} is read-only", .0)]
    ReadOnly(String),
    /// The value supplied couldn't be parsed or is out of range.
    #[error("Invalid value: {}", .0)]
    InvalidValue(String),
    /// Data was read, but the page-select register could not be returned to
    /// page 0 afterwards.
    #[error("Port {port}: failed to restore page select to 0")]
    PageRestore { port: u8 },
    /// One of the FPGAs wasn't found during discovery.
    #[error("FPGA region {} not found", .0)]
    RegionMissing(RegionKind),
    /// Device discovery failed for some other reason.
    #[error("Discovery failed: {}", .0)]
    Discovery(String),
    /// An OS-level failure while accessing a device.
    #[error("I/O error at {ctx}: {err}")]
    Io { ctx: String, err: std::io::Error },
}

impl FpgaError {
    pub fn io(ctx: impl ToString, err: std::io::Error) -> Self {
        FpgaError::Io {
            ctx: ctx.to_string(),
            err,
        }
    }

    /// The errno a sysfs attribute would have returned for this failure.
    pub fn errno(&self) -> libc::c_int {
        match self {
            FpgaError::NoSuchPort(_) => libc::ENOENT,
            FpgaError::NotPresent { .. } => libc::ENODEV,
            FpgaError::Busy { .. } => libc::EBUSY,
            FpgaError::Timeout { .. } => libc::ETIMEDOUT,
            FpgaError::InvalidAttribute(_) => libc::EINVAL,
            FpgaError::ReadOnly(_) => libc::EPERM,
            FpgaError::InvalidValue(_) => libc::EINVAL,
            FpgaError::PageRestore { .. } => libc::EBUSY,
            FpgaError::RegionMissing(_) => libc::ENODEV,
            FpgaError::Discovery(_) => libc::ENODEV,
            // OS errors we can't name collapse to EIO.
            FpgaError::Io { err, .. } => err
                .raw_os_error()
                .filter(|e| name_of(*e).is_some())
                .unwrap_or(libc::EIO),
        }
    }

    /// The symbolic name of [`FpgaError::errno`].
    pub fn errno_name(&self) -> &'static str {
        name_of(self.errno()).unwrap_or("EIO")
    }
}

fn name_of(errno: libc::c_int) -> Option<&'static str> {
    let name = match errno {
        libc::ENOENT => "ENOENT",
        libc::ENODEV => "ENODEV",
        libc::ENXIO => "ENXIO",
        libc::EBUSY => "EBUSY",
        libc::ETIMEDOUT => "ETIMEDOUT",
        libc::EINVAL => "EINVAL",
        libc::EPERM => "EPERM",
        libc::EACCES => "EACCES",
        libc::ENOMEM => "ENOMEM",
        libc::EFAULT => "EFAULT",
        libc::EIO => "EIO",
        _ => return None,
    };
    Some(name)
}
