// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `xcvrd`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use fpga::engine::PollPolicy;
use fpga::PlatformConfig;
use serde::Deserialize;

use crate::types::XcvrdError;
use crate::types::XcvrdResult;

/// How the daemon finds the FPGAs' register windows.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Discovery {
    /// Search PCI sysfs for the FPGAs' vendor, device and subsystem IDs.
    #[default]
    Pci,
    /// Use the board's stock BAR0 addresses.
    Static,
    /// Run against a simulated board.
    Sim,
}

/// The run-time settings for the daemon, assembled from built-in defaults,
/// an optional TOML file, and finally the command line.
#[derive(Debug)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: common::logging::LogFormat,

    /// List of addresses on which the api_server should listen.
    pub listen_addresses: Vec<SocketAddr>,

    pub discovery: Discovery,

    /// Root of the sysfs tree searched during PCI discovery.
    pub sysfs_root: PathBuf,

    /// Device through which the register windows are mapped.
    pub devmem_path: PathBuf,

    /// Enable the port CPLDs and SFP GPIO lines at startup.
    pub init_hardware: bool,

    /// How long to wait on the I2C controllers.
    pub poll: PollPolicy,

    /// How stale the cached presence and control bits may get.
    pub status_max_age: Duration,

    /// TOML description of the simulated board, for `Discovery::Sim`.
    pub sim_config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let localhost = SocketAddr::new(
            std::net::IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
            ::common::DEFAULT_XCVRD_PORT,
        );
        let platform = PlatformConfig::default();
        Config {
            log_file: None,
            log_format: common::logging::LogFormat::Json,
            listen_addresses: vec![localhost],
            discovery: Discovery::default(),
            sysfs_root: PathBuf::from("/sys"),
            devmem_path: PathBuf::from("/dev/mem"),
            init_hardware: true,
            poll: platform.poll,
            status_max_age: platform.status_max_age,
            sim_config: None,
        }
    }
}

impl Config {
    pub fn platform_config(&self) -> PlatformConfig {
        PlatformConfig {
            poll: self.poll,
            status_max_age: self.status_max_age,
        }
    }
}

/// The on-disk form of the configuration.  Every setting is optional; a
/// missing setting keeps its default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    log_file: Option<String>,
    log_format: Option<common::logging::LogFormat>,
    listen_addresses: Option<Vec<SocketAddr>>,
    discovery: Option<Discovery>,
    sysfs_root: Option<PathBuf>,
    devmem_path: Option<PathBuf>,
    init_hardware: Option<bool>,
    poll_interval_us: Option<u64>,
    poll_settle_us: Option<u64>,
    /// Zero means wait forever.
    poll_timeout_ms: Option<u64>,
    status_max_age_ms: Option<u64>,
    sim_config: Option<String>,
}

fn poll_timeout(ms: u64) -> Option<Duration> {
    (ms != 0).then(|| Duration::from_millis(ms))
}

fn update_from_str(text: &str, config: &mut Config) -> XcvrdResult<()> {
    let file: ConfigFile = toml::from_str(text)?;

    if let Some(log_file) = file.log_file {
        config.log_file = Some(log_file);
    }
    if let Some(log_format) = file.log_format {
        config.log_format = log_format;
    }
    if let Some(list) = file.listen_addresses {
        config.listen_addresses = list;
    }
    if let Some(discovery) = file.discovery {
        config.discovery = discovery;
    }
    if let Some(root) = file.sysfs_root {
        config.sysfs_root = root;
    }
    if let Some(path) = file.devmem_path {
        config.devmem_path = path;
    }
    if let Some(init) = file.init_hardware {
        config.init_hardware = init;
    }
    if let Some(us) = file.poll_interval_us {
        config.poll.interval = Duration::from_micros(us);
    }
    if let Some(us) = file.poll_settle_us {
        config.poll.settle = Duration::from_micros(us);
    }
    if let Some(ms) = file.poll_timeout_ms {
        config.poll.timeout = poll_timeout(ms);
    }
    if let Some(ms) = file.status_max_age_ms {
        config.status_max_age = Duration::from_millis(ms);
    }
    if let Some(sim) = file.sim_config {
        config.sim_config = Some(sim);
    }
    Ok(())
}

fn update_from_file(path: &str, config: &mut Config) -> XcvrdResult<()> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        XcvrdError::Config(format!("reading config file {path}: {e}"))
    })?;
    update_from_str(&text, config)
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(opts: &crate::Opt, config: &mut Config) -> XcvrdResult<()> {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    if let Some(list) = &opts.listen_addresses {
        config.listen_addresses = list.to_vec();
    }

    if let Some(discovery) = opts.discovery {
        config.discovery = discovery;
    }

    if let Some(root) = &opts.sysfs_root {
        config.sysfs_root = root.clone();
    }

    if let Some(path) = &opts.devmem_path {
        config.devmem_path = path.clone();
    }

    if opts.skip_init {
        config.init_hardware = false;
    }

    if let Some(ms) = opts.poll_timeout_ms {
        config.poll.timeout = poll_timeout(ms);
    }

    if let Some(ms) = opts.status_max_age_ms {
        config.status_max_age = Duration::from_millis(ms);
    }

    if let Some(sim) = &opts.sim_config {
        config.sim_config = Some(sim.to_string());
    }

    Ok(())
}

/// This builds a Config struct containing the tunable settings used to
/// adjust the daemon's behavior.  Settings from the config file, if one is
/// named, override the defaults; command-line options override both.
pub(crate) fn build_config(opts: &crate::Opt) -> XcvrdResult<Config> {
    let mut config = Config::default();
    if let Some(path) = &opts.config_file {
        update_from_file(path, &mut config)?;
    }
    update_from_cli(opts, &mut config)?;

    if config.listen_addresses.is_empty() {
        return Err(XcvrdError::Config(
            "at least one listen address is required".to_string(),
        ));
    }
    Ok(config)
}
