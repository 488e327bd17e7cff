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
use crate::client::PortInfo;
use crate::parse_port;

#[derive(Debug, StructOpt)]
pub struct Get {
    /// The attribute to read, e.g. `present` or `udb_version`.
    attr: String,
    /// The port to read it from.  Omit for platform attributes.
    #[structopt(parse(try_from_str = parse_port))]
    port: Option<u8>,
}

#[derive(Debug, StructOpt)]
pub struct Set {
    #[structopt(parse(try_from_str = parse_port))]
    port: u8,
    /// The attribute to write: `lp_mode`, `reset`, `tx_disable` or
    /// `dev_class`.
    attr: String,
    /// Hex for control bits, decimal for `dev_class`.
    value: String,
}

// Render an optional signal, with "-" where it doesn't apply to the port.
fn flag(v: Option<bool>) -> String {
    match v {
        Some(true) => String::from("1"),
        Some(false) => String::from("0"),
        None => String::from("-"),
    }
}

fn print_port_header(tw: &mut TabWriter<std::io::Stdout>) -> anyhow::Result<()> {
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        "Port".underline(),
        "Class".underline(),
        "FPGA".underline(),
        "Present".underline(),
        "LP mode".underline(),
        "Reset".underline(),
        "Tx disable".underline(),
        "Tx fault".underline(),
        "Rx LOS".underline(),
    )
    .map_err(|e| e.into())
}

fn print_port_row(
    tw: &mut TabWriter<std::io::Stdout>,
    p: &PortInfo,
) -> anyhow::Result<()> {
    let s = &p.status;
    let present = if s.present {
        "yes".green()
    } else {
        "no".normal()
    };
    writeln!(
        tw,
        "{}\t{}\t{}/{}\t{}\t{}\t{}\t{}\t{}\t{}",
        p.name,
        p.class,
        p.region,
        p.index,
        present,
        flag(s.lp_mode),
        flag(s.reset),
        flag(s.tx_disable),
        flag(s.tx_fault),
        flag(s.rx_los),
    )
    .map_err(|e| e.into())
}

pub async fn list_cmd(client: &Client) -> anyhow::Result<()> {
    let ports = client.port_list().await.context("failed to list ports")?;
    let mut tw = TabWriter::new(stdout());
    print_port_header(&mut tw)?;
    for p in &ports {
        print_port_row(&mut tw, p)?;
    }
    tw.flush()?;
    Ok(())
}

pub async fn show_cmd(client: &Client, port: u8) -> anyhow::Result<()> {
    let p = client.port_get(port).await?;
    let mut tw = TabWriter::new(stdout());
    print_port_header(&mut tw)?;
    print_port_row(&mut tw, &p)?;
    tw.flush()?;
    let attrs: Vec<String> =
        p.attributes.iter().map(|a| a.to_string()).collect();
    println!("\nAttributes: {}", attrs.join(", "));
    Ok(())
}

pub async fn get_cmd(client: &Client, get: Get) -> anyhow::Result<()> {
    let value = match get.port {
        Some(port) => client.port_attr_get(port, &get.attr).await,
        None => client.fpga_attr_get(&get.attr).await,
    }
    .with_context(|| format!("failed to read {}", get.attr))?;
    println!("{value}");
    Ok(())
}

pub async fn set_cmd(client: &Client, set: Set) -> anyhow::Result<()> {
    client
        .port_attr_set(set.port, &set.attr, &set.value)
        .await
        .with_context(|| format!("failed to set {} on port{}", set.attr, set.port))
}
