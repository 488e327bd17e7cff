// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The front-panel port map.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::attr::PortAttr;
use crate::eeprom::PRIMARY_ADDR;
use crate::region::RegionKind;
use crate::FpgaError;
use crate::FpgaResult;

pub const QSFP_PORTS_PER_FPGA: u8 = 32;
pub const FIRST_SFP_PORT: u8 = 65;
pub const NUM_PORTS: u8 = 66;

/// The transceiver family a port accepts.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PortClass {
    /// Single-address modules: QSFP, QSFP28, QSFP-DD.
    Qsfp,
    /// Dual-address modules: SFP, SFP+.
    Sfp,
}

impl PortClass {
    /// The optoe device class number.
    pub fn dev_class(self) -> u32 {
        match self {
            PortClass::Qsfp => 1,
            PortClass::Sfp => 2,
        }
    }

    /// The optoe driver name for modules of this class.
    pub fn optoe_name(self) -> &'static str {
        match self {
            PortClass::Qsfp => "optoe1",
            PortClass::Sfp => "optoe2",
        }
    }
}

/// The bits on the LDB's GPIO lines that carry one SFP port's signals.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct SfpGpio {
    pub rx_los: u8,
    pub tx_fault: u8,
    pub absent: u8,
    pub tx_disable: u8,
}

impl SfpGpio {
    /// The four signals sit on consecutive bits starting at `shift`.
    const fn at(shift: u8) -> Self {
        SfpGpio {
            rx_los: shift,
            tx_fault: shift + 1,
            absent: shift + 2,
            tx_disable: shift + 3,
        }
    }
}

/// Everything fixed about one front-panel port.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct PortDescriptor {
    /// Front-panel number, starting at 1.
    pub port: u8,
    pub region: RegionKind,
    /// Index within the owning FPGA, which selects the I2C controller bank
    /// and, for QSFP ports, the bit in the CPLD status words.
    pub index: u8,
    pub class: PortClass,
    pub slave_addr: u8,
    /// GPIO bit assignments, for SFP ports only.
    pub gpio: Option<SfpGpio>,
}

impl PortDescriptor {
    pub fn name(&self) -> String {
        format!("port{}", self.port)
    }

    /// The attributes this port exposes.
    pub fn attributes(&self) -> impl Iterator<Item = PortAttr> + '_ {
        use strum::IntoEnumIterator;
        PortAttr::iter().filter(|a| a.applies_to(self.class))
    }
}

fn descriptor(port: u8) -> PortDescriptor {
    let (region, index) = if port <= QSFP_PORTS_PER_FPGA {
        (RegionKind::Udb, port - 1)
    } else {
        (RegionKind::Ldb, port - QSFP_PORTS_PER_FPGA - 1)
    };
    let (class, gpio) = match port {
        65 => (PortClass::Sfp, Some(SfpGpio::at(8))),
        66 => (PortClass::Sfp, Some(SfpGpio::at(0))),
        _ => (PortClass::Qsfp, None),
    };
    PortDescriptor {
        port,
        region,
        index,
        class,
        slave_addr: PRIMARY_ADDR,
        gpio,
    }
}

/// The full set of front-panel ports.
#[derive(Clone, Debug)]
pub struct PortTable {
    ports: Vec<PortDescriptor>,
}

impl Default for PortTable {
    fn default() -> Self {
        PortTable {
            ports: (1..=NUM_PORTS).map(descriptor).collect(),
        }
    }
}

impl PortTable {
    pub fn get(&self, port: u8) -> FpgaResult<&PortDescriptor> {
        port.checked_sub(1)
            .and_then(|i| self.ports.get(usize::from(i)))
            .ok_or(FpgaError::NoSuchPort(port))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_map() {
        let table = PortTable::default();
        assert_eq!(table.len(), 66);

        let p = table.get(1).unwrap();
        assert_eq!((p.region, p.index, p.class), (RegionKind::Udb, 0, PortClass::Qsfp));
        let p = table.get(32).unwrap();
        assert_eq!((p.region, p.index), (RegionKind::Udb, 31));
        let p = table.get(33).unwrap();
        assert_eq!((p.region, p.index), (RegionKind::Ldb, 0));
        let p = table.get(64).unwrap();
        assert_eq!((p.region, p.index), (RegionKind::Ldb, 31));

        let p = table.get(65).unwrap();
        assert_eq!((p.region, p.index, p.class), (RegionKind::Ldb, 32, PortClass::Sfp));
        assert_eq!(p.gpio.unwrap().tx_disable, 11);
        assert_eq!(p.gpio.unwrap().rx_los, 8);
        let p = table.get(66).unwrap();
        assert_eq!(p.index, 33);
        assert_eq!(p.gpio.unwrap().absent, 2);
        assert_eq!(p.name(), "port66");

        assert!(matches!(table.get(0), Err(FpgaError::NoSuchPort(0))));
        assert!(matches!(table.get(67), Err(FpgaError::NoSuchPort(67))));
    }

    #[test]
    fn test_port_attributes_by_class() {
        let table = PortTable::default();
        let qsfp: Vec<_> = table.get(5).unwrap().attributes().collect();
        assert!(qsfp.contains(&PortAttr::LpMode));
        assert!(!qsfp.contains(&PortAttr::TxFault));
        let sfp: Vec<_> = table.get(65).unwrap().attributes().collect();
        assert!(sfp.contains(&PortAttr::RxLos));
        assert!(!sfp.contains(&PortAttr::Reset));
        assert!(sfp.contains(&PortAttr::Present));
    }
}
