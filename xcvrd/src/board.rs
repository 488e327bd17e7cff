// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Locate the FPGAs and stand up the platform.

use anyhow::Context;
use fpga::region;
use fpga::region::RegionTable;
use fpga::Platform;
use slog::info;
use slog::Logger;

use crate::config::Config;
use crate::config::Discovery;

cfg_if::cfg_if! {
    if #[cfg(feature = "sim")] {
        fn sim_regions(log: &Logger, config: &Config) -> anyhow::Result<RegionTable> {
            use fpga::sim::SimBoard;
            use fpga::sim::SimConfig;

            let sim = match &config.sim_config {
                Some(path) => {
                    let text = std::fs::read_to_string(path)
                        .with_context(|| format!("reading {path}"))?;
                    toml::from_str::<SimConfig>(&text)
                        .with_context(|| format!("parsing {path}"))?
                }
                None => SimConfig::default(),
            };
            info!(log, "running against a simulated board";
                "modules" => sim.modules.len());
            Ok(SimBoard::from_config(&sim)?.region_table())
        }
    } else {
        fn sim_regions(_log: &Logger, _config: &Config) -> anyhow::Result<RegionTable> {
            anyhow::bail!("xcvrd was built without simulation support")
        }
    }
}

fn regions(log: &Logger, config: &Config) -> anyhow::Result<RegionTable> {
    let found = match config.discovery {
        Discovery::Pci => region::discover(log, &config.sysfs_root)
            .context("searching PCI sysfs for FPGAs")?,
        Discovery::Static => region::static_regions(),
        Discovery::Sim => return sim_regions(log, config),
    };
    for r in &found {
        info!(log, "mapping FPGA";
            "kind" => %r.kind,
            "base" => format!("{:#x}", r.base),
            "size" => format!("{:#x}", r.size));
    }
    RegionTable::open_devmem(&found, &config.devmem_path)
        .with_context(|| format!("opening {}", config.devmem_path.display()))
}

/// Build the platform described by `config`, bringing the hardware up if
/// asked to.
pub(crate) fn open(log: &Logger, config: &Config) -> anyhow::Result<Platform> {
    let platform = Platform::new(log, regions(log, config)?, config.platform_config())
        .context("creating FPGA platform")?;
    if config.init_hardware {
        platform
            .init_hardware()
            .context("initializing transceiver CPLDs")?;
    }
    Ok(platform)
}
