// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Names and access rules for the text attributes.

use std::str::FromStr;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::ports::PortClass;
use crate::region::RegionKind;
use crate::FpgaError;
use crate::FpgaResult;

/// A per-port text attribute.
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
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PortAttr {
    Present,
    LpMode,
    Reset,
    TxDisable,
    TxFault,
    RxLos,
    Name,
    PortName,
    DevClass,
}

impl PortAttr {
    pub fn applies_to(self, class: PortClass) -> bool {
        match self {
            PortAttr::LpMode | PortAttr::Reset => class == PortClass::Qsfp,
            PortAttr::TxDisable | PortAttr::TxFault | PortAttr::RxLos => {
                class == PortClass::Sfp
            }
            _ => true,
        }
    }

    pub fn writable(self) -> bool {
        matches!(
            self,
            PortAttr::LpMode
                | PortAttr::Reset
                | PortAttr::TxDisable
                | PortAttr::DevClass
        )
    }

    /// The value reported when no module is plugged in.  Fault-style signals
    /// read as asserted.
    pub fn absent_default(self) -> Option<bool> {
        match self {
            PortAttr::LpMode | PortAttr::Reset | PortAttr::TxDisable => {
                Some(false)
            }
            PortAttr::TxFault | PortAttr::RxLos => Some(true),
            _ => None,
        }
    }

    /// Look up an attribute by its sysfs name.
    pub fn parse(name: &str) -> FpgaResult<Self> {
        Self::from_str(name)
            .map_err(|_| FpgaError::InvalidAttribute(name.to_string()))
    }
}

/// A platform-wide text attribute.
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
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FpgaAttr {
    UdbVersion,
    LdbVersion,
    SmbVersion,
}

impl FpgaAttr {
    pub fn region(self) -> RegionKind {
        match self {
            FpgaAttr::UdbVersion => RegionKind::Udb,
            FpgaAttr::LdbVersion => RegionKind::Ldb,
            FpgaAttr::SmbVersion => RegionKind::Smb,
        }
    }

    pub fn parse(name: &str) -> FpgaResult<Self> {
        Self::from_str(name)
            .map_err(|_| FpgaError::InvalidAttribute(name.to_string()))
    }
}

// Strip the optional sign, radix prefix and trailing newline the way the
// kernel's string-to-integer helpers do.
fn parse_int(text: &str, radix: u32) -> FpgaResult<i64> {
    let s = text.trim_end_matches('\n');
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let s = if radix == 16 {
        s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
    } else {
        s
    };
    if s.is_empty() || s.starts_with(['+', '-']) {
        return Err(FpgaError::InvalidValue(text.to_string()));
    }
    let v = i64::from_str_radix(s, radix)
        .map_err(|_| FpgaError::InvalidValue(text.to_string()))?;
    Ok(if neg { -v } else { v })
}

/// Parse a status-bit value.  Written as hex; any non-zero value sets the
/// bit.
pub fn parse_flag(text: &str) -> FpgaResult<bool> {
    parse_int(text, 16).map(|v| v != 0)
}

/// Parse a decimal `dev_class` value.
pub fn parse_dev_class(text: &str) -> FpgaResult<u32> {
    let v = parse_int(text, 10)?;
    u32::try_from(v).map_err(|_| FpgaError::InvalidValue(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_names() {
        assert_eq!(PortAttr::parse("lp_mode").unwrap(), PortAttr::LpMode);
        assert_eq!(PortAttr::parse("rx_los").unwrap(), PortAttr::RxLos);
        assert_eq!(PortAttr::DevClass.to_string(), "dev_class");
        assert!(matches!(
            PortAttr::parse("eeprom_size"),
            Err(FpgaError::InvalidAttribute(_))
        ));
        assert_eq!(FpgaAttr::parse("smb_version").unwrap().region(), RegionKind::Smb);
    }

    #[test]
    fn test_absent_defaults() {
        assert_eq!(PortAttr::TxFault.absent_default(), Some(true));
        assert_eq!(PortAttr::RxLos.absent_default(), Some(true));
        assert_eq!(PortAttr::LpMode.absent_default(), Some(false));
        assert_eq!(PortAttr::Reset.absent_default(), Some(false));
        assert_eq!(PortAttr::Present.absent_default(), None);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1\n").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("a").unwrap());
        assert!(parse_flag("0x10").unwrap());
        assert!(parse_flag("-1").unwrap());
        assert!(parse_flag("").is_err());
        assert!(parse_flag("on").is_err());
        assert!(parse_flag("1 ").is_err());
    }

    #[test]
    fn test_parse_dev_class() {
        assert_eq!(parse_dev_class("2\n").unwrap(), 2);
        assert_eq!(parse_dev_class("10").unwrap(), 10);
        assert!(parse_dev_class("0x2").is_err());
        assert!(parse_dev_class("-1").is_err());
    }
}
