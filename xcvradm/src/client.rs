// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A thin client for the `xcvrd` HTTP API.

use anyhow::Context;
use fpga::eeprom::EepromLayout;
use fpga::status::FpgaVersion;
use fpga::status::PortStatus;
use fpga::PortAttr;
use fpga::PortClass;
use fpga::RegionKind;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, Deserialize)]
pub struct PortInfo {
    pub port: u8,
    pub name: String,
    pub class: PortClass,
    pub region: RegionKind,
    pub index: u8,
    pub attributes: Vec<PortAttr>,
    pub status: PortStatus,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AttributeValue {
    pub value: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EepromData {
    pub offset: usize,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
struct EepromWrite<'a> {
    offset: usize,
    data: &'a [u8],
}

#[derive(Clone, Debug, Deserialize)]
struct EepromWriteResult {
    written: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FpgaVersionInfo {
    pub region: RegionKind,
    pub version: FpgaVersion,
}

// The body dropshot sends with an error status.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: Option<String>,
    message: String,
}

pub struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base: &str) -> Self {
        Client {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    // Turn an error response into something worth printing.
    async fn check(
        resp: reqwest::Response,
    ) -> anyhow::Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match resp.json::<ErrorBody>().await {
            Ok(ErrorBody {
                error_code: Some(code),
                message,
            }) => anyhow::bail!("{message} ({code})"),
            Ok(ErrorBody { message, .. }) => anyhow::bail!("{message}"),
            Err(_) => anyhow::bail!("request failed: {status}"),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("contacting xcvrd at {}", self.base))?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn port_list(&self) -> anyhow::Result<Vec<PortInfo>> {
        self.get("/ports").await
    }

    pub async fn port_get(&self, port: u8) -> anyhow::Result<PortInfo> {
        self.get(&format!("/ports/{port}")).await
    }

    pub async fn port_attr_get(
        &self,
        port: u8,
        attr: &str,
    ) -> anyhow::Result<String> {
        let v: AttributeValue =
            self.get(&format!("/ports/{port}/attributes/{attr}")).await?;
        Ok(v.value)
    }

    pub async fn port_attr_set(
        &self,
        port: u8,
        attr: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        let resp = self
            .http
            .put(self.url(&format!("/ports/{port}/attributes/{attr}")))
            .json(&AttributeValue {
                value: value.to_string(),
            })
            .send()
            .await?;
        Self::check(resp).await.map(|_| ())
    }

    pub async fn eeprom_read(
        &self,
        port: u8,
        offset: usize,
        len: Option<usize>,
    ) -> anyhow::Result<EepromData> {
        let mut path = format!("/ports/{port}/eeprom?offset={offset}");
        if let Some(len) = len {
            path.push_str(&format!("&len={len}"));
        }
        self.get(&path).await
    }

    pub async fn eeprom_write(
        &self,
        port: u8,
        offset: usize,
        data: &[u8],
    ) -> anyhow::Result<usize> {
        let resp = self
            .http
            .put(self.url(&format!("/ports/{port}/eeprom")))
            .json(&EepromWrite { offset, data })
            .send()
            .await?;
        let result: EepromWriteResult = Self::check(resp).await?.json().await?;
        Ok(result.written)
    }

    pub async fn eeprom_layout(&self, port: u8) -> anyhow::Result<EepromLayout> {
        self.get(&format!("/ports/{port}/eeprom/layout")).await
    }

    pub async fn eeprom_refresh(
        &self,
        port: u8,
    ) -> anyhow::Result<EepromLayout> {
        let resp = self
            .http
            .post(self.url(&format!("/ports/{port}/eeprom/refresh")))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn fpga_attr_get(&self, attr: &str) -> anyhow::Result<String> {
        let v: AttributeValue =
            self.get(&format!("/fpga/attributes/{attr}")).await?;
        Ok(v.value)
    }

    pub async fn fpga_versions(&self) -> anyhow::Result<Vec<FpgaVersionInfo>> {
        self.get("/fpga/versions").await
    }
}
