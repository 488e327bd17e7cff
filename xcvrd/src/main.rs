// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Main application entry point for `xcvrd`, the transceiver control daemon.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use anyhow::Context;
use fpga::FpgaResult;
use fpga::Platform;
use futures::stream::StreamExt;
use libc::c_int;
use signal_hook::consts::SIGHUP;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGQUIT;
use signal_hook::consts::SIGTERM;
use signal_hook::consts::SIGUSR1;
use signal_hook_tokio::Signals;
use slog::error;
use slog::info;
use slog::warn;
use structopt::StructOpt;

use crate::config::Discovery;
use crate::types::XcvrdResult;

mod api_server;
mod board;
mod config;
mod types;

#[derive(Debug, StructOpt)]
#[structopt(name = "xcvrd", about = "transceiver control daemon")]
pub(crate) enum Args {
    /// Run the transceiver API server.
    Run(Opt),
    /// Generate an OpenAPI specification for the transceiver server.
    Openapi,
}

#[derive(Clone, Debug, Default, StructOpt)]
#[structopt(name = "xcvrd", about = "transceiver control daemon")]
pub(crate) struct Opt {
    #[structopt(long, help = "TOML file with daemon settings")]
    config_file: Option<String>,

    #[structopt(
        long,
        about = "send log data to the named file rather than stdout"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<common::logging::LogFormat>,

    #[structopt(
        long,
        help = "IP addresses and ports on which to expose the API server"
    )]
    listen_addresses: Option<Vec<SocketAddr>>,

    #[structopt(
        long,
        help = "how to find the FPGAs: 'pci', 'static' or 'sim'"
    )]
    discovery: Option<Discovery>,

    #[structopt(long, parse(from_os_str), help = "root of the sysfs tree")]
    sysfs_root: Option<PathBuf>,

    #[structopt(
        long,
        parse(from_os_str),
        help = "device used to map the FPGA register windows"
    )]
    devmem_path: Option<PathBuf>,

    #[structopt(long, help = "leave the port CPLDs as they are at startup")]
    skip_init: bool,

    #[structopt(
        long,
        help = "give up on an I2C transaction after this many milliseconds \
            (0 waits forever)"
    )]
    poll_timeout_ms: Option<u64>,

    #[structopt(
        long,
        help = "re-read presence and control bits when older than this"
    )]
    status_max_age_ms: Option<u64>,

    #[structopt(long, help = "TOML file describing the simulated board")]
    sim_config: Option<String>,
}

/// The main context object for running all of `xcvrd`.
pub struct Xcvrd {
    // Time this object was created.
    start_time: chrono::DateTime<chrono::Utc>,
    // Options from the command line, re-applied on every config refresh.
    opts: Opt,
    pub config: Mutex<config::Config>,
    pub log: slog::Logger,
    pub platform: Arc<Platform>,
}

impl Xcvrd {
    fn new(
        log: slog::Logger,
        opts: Opt,
        config: config::Config,
    ) -> anyhow::Result<Self> {
        let platform = board::open(&log, &config)?;
        Ok(Self::with_platform(log, opts, config, platform))
    }

    fn with_platform(
        log: slog::Logger,
        opts: Opt,
        config: config::Config,
        platform: Platform,
    ) -> Self {
        Xcvrd {
            start_time: chrono::Utc::now(),
            opts,
            config: Mutex::new(config),
            log,
            platform: Arc::new(platform),
        }
    }

    fn config(&self) -> MutexGuard<'_, config::Config> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a platform operation on a blocking thread.  Engine transactions
    /// sleep while they poll, and must not stall the request executor.
    pub async fn run_blocking<T, F>(&self, f: F) -> XcvrdResult<T>
    where
        F: FnOnce(&Platform) -> FpgaResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let platform = Arc::clone(&self.platform);
        Ok(tokio::task::spawn_blocking(move || f(&platform)).await??)
    }
}

/// Re-read the config file and apply the command line over it again.
fn handle_refresh(xcvrd: &Xcvrd, tx: &tokio::sync::watch::Sender<()>) {
    match config::build_config(&xcvrd.opts) {
        Ok(new_config) => {
            let mut curr_config = xcvrd.config();
            *curr_config = new_config;
            info!(xcvrd.log, "refreshed config: {:#?}", curr_config);
        }
        Err(e) => {
            error!(xcvrd.log, "failed to refresh config: {e:?}");
            return;
        }
    }

    // Let the config consumers know that something has changed
    if let Err(e) = tx.send(()) {
        error!(xcvrd.log, "failed to send config update: {e:}");
    }
}

async fn handle_signals(
    xcvrd: &Xcvrd,
    mut signals: Signals,
    tx: tokio::sync::watch::Sender<()>,
) {
    let log = xcvrd.log.new(slog::o!("unit" => "signal_handler"));
    let handle = signals.handle();

    while let Some(signal) = signals.next().await {
        match signal {
            SIGTERM | SIGQUIT | SIGINT | SIGHUP => {
                info!(log, "received signal"; "sig" => signal);
                handle.close();
                return;
            }
            SIGUSR1 => {
                info!(log, "handling config refresh");
                handle_refresh(xcvrd, &tx)
            }
            _ => warn!(log, "ignoring signal"; "sig" => signal),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_args();

    match args {
        Args::Openapi => print_openapi(),
        Args::Run(opt) => run_xcvrd(opt).await,
    }
}

fn print_openapi() -> anyhow::Result<()> {
    crate::api_server::http_api()
        .openapi(
            "Transceiver Control Daemon",
            semver::Version::new(0, 1, 0),
        )
        .description("API for managing FPGA-attached switch transceivers")
        .write(&mut std::io::stdout())
        .context("writing OpenAPI specification")
}

async fn run_xcvrd(opt: Opt) -> anyhow::Result<()> {
    let config = config::build_config(&opt)?;

    let log =
        common::logging::init("xcvrd", &config.log_file, config.log_format)?;
    info!(log, "xcvrd config: {config:#?}");

    let xcvrd = Arc::new(Xcvrd::new(log, opt, config)?);
    let (tx, rx) = tokio::sync::watch::channel(());

    // Install the handler before the servers come up, so an early refresh
    // is queued rather than killing the process.
    const SIGNALS: &[c_int] = &[SIGTERM, SIGQUIT, SIGINT, SIGHUP, SIGUSR1];
    let signals =
        Signals::new(SIGNALS).context("installing signal handlers")?;

    let api_server_manager = tokio::task::spawn(
        api_server::api_server_manager(xcvrd.clone(), rx),
    );

    // Wait for a signal to exit.  Dropping the sender stops the servers.
    handle_signals(&xcvrd, signals, tx).await;

    api_server_manager
        .await
        .context("while shutting down the api_server_manager")?;

    info!(xcvrd.log, "done");
    Ok(())
}
