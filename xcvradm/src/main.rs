// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::io::{stdout, Write};

use anyhow::Context;
use colored::*;
use structopt::*;
use tabwriter::TabWriter;

use crate::client::Client;

mod client;
mod eeprom;
mod port;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "xcvradm",
    about = "provides a command-line interface to the transceiver control daemon",
    version = "0.1.0"
)]
struct GlobalOpts {
    #[structopt(short, long, help = "xcvrd's hostname or IP address")]
    host: Option<String>,

    #[structopt(help = "xcvrd's TCP port", short, long)]
    port: Option<u16>,

    #[structopt(subcommand)]
    cmd: Commands,
}

#[derive(Debug, StructOpt)]
enum Commands {
    /// List every port with its presence and control signals.
    Ports,
    /// Show one port.
    Port {
        #[structopt(parse(try_from_str = parse_port))]
        port: u8,
    },
    /// Read a port attribute, or a platform attribute if no port is given.
    Get(port::Get),
    /// Write a port attribute.
    Set(port::Set),
    /// Read, write and inspect module EEPROMs.
    Eeprom(eeprom::Eeprom),
    /// Show the firmware version of each FPGA.
    Versions,
}

/// Accept `12` or `port12`.
pub fn parse_port(s: &str) -> anyhow::Result<u8> {
    let digits = s.strip_prefix("port").unwrap_or(s);
    digits
        .parse()
        .with_context(|| format!("'{s}' is not a port; use 1-66 or port<N>"))
}

/// Parse an integer in decimal, or hex with a `0x` prefix.
pub fn parse_int(s: &str) -> anyhow::Result<usize> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .with_context(|| format!("'{s}' is not a number"))
}

async fn versions_cmd(client: &Client) -> anyhow::Result<()> {
    let versions = client
        .fpga_versions()
        .await
        .context("failed to get FPGA versions")?;
    let mut tw = TabWriter::new(stdout());
    writeln!(tw, "{}\t{}", "FPGA".underline(), "Version".underline())?;
    for v in versions {
        writeln!(tw, "{}\t{}", v.region, v.version)?;
    }
    tw.flush()?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = GlobalOpts::from_args();
    let port = opts.port.unwrap_or(common::DEFAULT_XCVRD_PORT);
    let host = opts.host.unwrap_or_else(|| "localhost".to_string());
    let client = Client::new(&format!("http://{host}:{port}"));

    match opts.cmd {
        Commands::Ports => port::list_cmd(&client).await,
        Commands::Port { port } => port::show_cmd(&client, port).await,
        Commands::Get(g) => port::get_cmd(&client, g).await,
        Commands::Set(s) => port::set_cmd(&client, s).await,
        Commands::Eeprom(e) => eeprom::eeprom_cmd(&client, e).await,
        Commands::Versions => versions_cmd(&client).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("7").unwrap(), 7);
        assert_eq!(parse_port("port66").unwrap(), 66);
        assert!(parse_port("qsfp1").is_err());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("256").unwrap(), 256);
        assert_eq!(parse_int("0x7f").unwrap(), 127);
        assert!(parse_int("seven").is_err());
    }
}
