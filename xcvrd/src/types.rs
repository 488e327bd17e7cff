// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout `xcvrd`.

use std::convert;

use dropshot::ErrorStatusCode;
use dropshot::HttpError;
use fpga::FpgaError;

pub type XcvrdResult<T> = Result<T, XcvrdError>;

#[derive(Debug, thiserror::Error)]
pub enum XcvrdError {
    #[error(transparent)]
    Fpga(#[from] FpgaError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Error: {0}")]
    Other(String),
}

// Carry the errno a sysfs attribute would have returned as the error code, so
// clients can tell an empty port from a wedged controller.
fn errno_error(status_code: ErrorStatusCode, e: &FpgaError) -> HttpError {
    let message = e.to_string();
    HttpError {
        status_code,
        error_code: Some(e.errno_name().to_string()),
        internal_message: message.clone(),
        external_message: message,
        headers: None,
    }
}

impl convert::From<XcvrdError> for HttpError {
    fn from(o: XcvrdError) -> HttpError {
        match o {
            XcvrdError::Fpga(ref e) => match e {
                FpgaError::NoSuchPort(_)
                | FpgaError::NotPresent { .. }
                | FpgaError::RegionMissing(_) => {
                    errno_error(ErrorStatusCode::NOT_FOUND, e)
                }
                FpgaError::InvalidAttribute(_) | FpgaError::InvalidValue(_) => {
                    errno_error(ErrorStatusCode::BAD_REQUEST, e)
                }
                FpgaError::ReadOnly(_) => {
                    errno_error(ErrorStatusCode::FORBIDDEN, e)
                }
                FpgaError::Busy { .. } | FpgaError::PageRestore { .. } => {
                    errno_error(ErrorStatusCode::SERVICE_UNAVAILABLE, e)
                }
                FpgaError::Timeout { .. } => {
                    errno_error(ErrorStatusCode::GATEWAY_TIMEOUT, e)
                }
                FpgaError::Discovery(_) | FpgaError::Io { .. } => {
                    errno_error(ErrorStatusCode::INTERNAL_SERVER_ERROR, e)
                }
            },
            XcvrdError::Config(e) => HttpError::for_internal_error(e),
            XcvrdError::Other(e) => HttpError::for_internal_error(e),
        }
    }
}

impl convert::From<toml::de::Error> for XcvrdError {
    fn from(err: toml::de::Error) -> Self {
        XcvrdError::Config(err.to_string())
    }
}

impl convert::From<tokio::task::JoinError> for XcvrdError {
    fn from(err: tokio::task::JoinError) -> Self {
        XcvrdError::Other(format!("platform task failed: {err}"))
    }
}
