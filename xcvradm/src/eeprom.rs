// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use anyhow::Context;
use fpga::eeprom::EepromLayout;
use structopt::*;

use crate::client::Client;
use crate::parse_int;
use crate::parse_port;

#[derive(Debug, StructOpt)]
pub enum Eeprom {
    /// Hex dump part or all of a module's EEPROM.
    Dump {
        #[structopt(parse(try_from_str = parse_port))]
        port: u8,
        /// Offset into the flat view, decimal or 0x-prefixed hex.
        #[structopt(short, long, default_value = "0", parse(try_from_str = parse_int))]
        offset: usize,
        /// Bytes to read.  Defaults to the rest of the device.
        #[structopt(short, long, parse(try_from_str = parse_int))]
        len: Option<usize>,
    },
    /// Write bytes to the module's primary address, one transaction per
    /// byte.
    Write {
        #[structopt(parse(try_from_str = parse_port))]
        port: u8,
        #[structopt(parse(try_from_str = parse_int))]
        offset: usize,
        /// Byte values, decimal or 0x-prefixed hex.
        #[structopt(required = true, parse(try_from_str = parse_byte))]
        bytes: Vec<u8>,
    },
    /// Show how the module's EEPROM is laid out.
    Layout {
        #[structopt(parse(try_from_str = parse_port))]
        port: u8,
    },
    /// Forget the cached layout and probe the module again.
    Refresh {
        #[structopt(parse(try_from_str = parse_port))]
        port: u8,
    },
}

fn parse_byte(s: &str) -> anyhow::Result<u8> {
    let v = parse_int(s)?;
    u8::try_from(v).with_context(|| format!("{s} does not fit in a byte"))
}

/// Format `data` as lines of 16 bytes, addressed from `offset`.
pub fn hexdump(offset: usize, data: &[u8]) -> Vec<String> {
    data.chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            let hex: Vec<String> =
                chunk.iter().map(|b| format!("{b:02x}")).collect();
            let ascii: String = chunk
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() || b == b' ' {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            format!("{:08x}: {:<47}  |{ascii}|", offset + 16 * i, hex.join(" "))
        })
        .collect()
}

fn print_layout(port: u8, layout: &EepromLayout) {
    println!("Port:      port{port}");
    println!("Class:     {}", layout.class);
    println!("Pageable:  {}", layout.pageable);
    println!("Diag addr: {}", layout.secondary);
    println!("Size:      {} bytes", layout.size);
}

pub async fn eeprom_cmd(client: &Client, cmd: Eeprom) -> anyhow::Result<()> {
    match cmd {
        Eeprom::Dump { port, offset, len } => {
            let data = client
                .eeprom_read(port, offset, len)
                .await
                .context("failed to read EEPROM")?;
            for line in hexdump(data.offset, &data.data) {
                println!("{line}");
            }
            if let Some(len) = len {
                if data.data.len() < len {
                    eprintln!(
                        "read {} of {len} bytes requested",
                        data.data.len()
                    );
                }
            }
        }
        Eeprom::Write {
            port,
            offset,
            bytes,
        } => {
            for (i, b) in bytes.iter().enumerate() {
                client
                    .eeprom_write(port, offset + i, std::slice::from_ref(b))
                    .await
                    .with_context(|| {
                        format!("failed to write offset {:#x}", offset + i)
                    })?;
            }
        }
        Eeprom::Layout { port } => {
            let layout = client.eeprom_layout(port).await?;
            print_layout(port, &layout);
        }
        Eeprom::Refresh { port } => {
            let layout = client.eeprom_refresh(port).await?;
            print_layout(port, &layout);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hexdump() {
        let data: Vec<u8> = (0x41..0x41 + 20).collect();
        let lines = hexdump(0x80, &data);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "00000080: 41 42 43 44 45 46 47 48 49 4a 4b 4c 4d 4e 4f 50  |ABCDEFGHIJKLMNOP|"
        );
        assert_eq!(
            lines[1],
            format!("00000090: {:<47}  |QRST|", "51 52 53 54")
        );
        assert!(hexdump(0, &[]).is_empty());
    }

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("0xff").unwrap(), 255);
        assert!(parse_byte("256").is_err());
    }
}
