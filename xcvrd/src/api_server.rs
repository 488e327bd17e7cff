// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! `xcvrd` HTTP API types and endpoint functions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use dropshot::endpoint;
use dropshot::HttpError;
use dropshot::HttpResponseOk;
use dropshot::HttpResponseUpdatedNoContent;
use dropshot::Path;
use dropshot::Query;
use dropshot::RequestContext;
use dropshot::TypedBody;
use fpga::eeprom::EepromLayout;
use fpga::ports::PortDescriptor;
use fpga::status::FpgaVersion;
use fpga::status::PortStatus;
use fpga::FpgaAttr;
use fpga::PortAttr;
use fpga::PortClass;
use fpga::RegionKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::{debug, error, info, o};

use crate::Xcvrd;

type ApiServer = dropshot::HttpServer<Arc<Xcvrd>>;

/// Identifies a front-panel port.
#[derive(Deserialize, Serialize, JsonSchema)]
pub struct PortPathParams {
    /// The port number, starting at 1.
    pub port: u8,
}

/// Identifies one attribute of a front-panel port.
#[derive(Deserialize, Serialize, JsonSchema)]
pub struct PortAttrPathParams {
    /// The port number, starting at 1.
    pub port: u8,
    /// The attribute name, e.g. `lp_mode`.
    pub attr: String,
}

/// Identifies a platform attribute.
#[derive(Deserialize, Serialize, JsonSchema)]
pub struct FpgaAttrPathParams {
    /// The attribute name, e.g. `udb_version`.
    pub attr: String,
}

/// Everything known about one port.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct PortInfo {
    pub port: u8,
    /// The port's name, `port<N>`.
    pub name: String,
    pub class: PortClass,
    /// The FPGA that owns the port.
    pub region: RegionKind,
    /// The port's index within its FPGA.
    pub index: u8,
    /// The attributes this port exposes.
    pub attributes: Vec<PortAttr>,
    pub status: PortStatus,
}

impl PortInfo {
    fn new(desc: &PortDescriptor, status: PortStatus) -> Self {
        PortInfo {
            port: desc.port,
            name: desc.name(),
            class: desc.class,
            region: desc.region,
            index: desc.index,
            attributes: desc.attributes().collect(),
            status,
        }
    }
}

/// The value of an attribute, in its text form without the trailing
/// newline.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct AttributeValue {
    pub value: String,
}

impl AttributeValue {
    fn from_text(text: String) -> Self {
        AttributeValue {
            value: text.trim_end_matches('\n').to_string(),
        }
    }
}

/// Selects a range of a module's EEPROM.
#[derive(Deserialize, Serialize, JsonSchema)]
pub struct EepromRange {
    /// Offset into the flat EEPROM view.  Defaults to 0.
    pub offset: Option<usize>,
    /// Bytes to read.  Defaults to everything from `offset` to the end of
    /// the device.
    pub len: Option<usize>,
}

/// Bytes read from a module's EEPROM.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct EepromData {
    pub offset: usize,
    /// The bytes read.  May be shorter than requested at the end of the
    /// device, or when a transaction failed part way through.
    pub data: Vec<u8>,
}

/// Bytes to write to a module's EEPROM.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct EepromWrite {
    pub offset: usize,
    /// Only single-byte writes reach the module.
    pub data: Vec<u8>,
}

/// The result of an EEPROM write.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct EepromWriteResult {
    /// Bytes consumed, which is always the length of the request.
    pub written: usize,
}

/// The firmware version of one FPGA.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct FpgaVersionInfo {
    pub region: RegionKind,
    pub version: FpgaVersion,
}

/// Return the version of the `xcvrd` server itself.
#[endpoint {
    method = GET,
    path = "/xcvrd-version",
}]
async fn xcvrd_version(
    _rqctx: RequestContext<Arc<Xcvrd>>,
) -> Result<HttpResponseOk<String>, HttpError> {
    Ok(HttpResponseOk(env!("CARGO_PKG_VERSION").to_string()))
}

/// Return the server uptime, in seconds.
#[endpoint {
    method = GET,
    path = "/xcvrd-uptime",
}]
async fn xcvrd_uptime(
    rqctx: RequestContext<Arc<Xcvrd>>,
) -> Result<HttpResponseOk<i64>, HttpError> {
    let xcvrd = rqctx.context();
    let uptime = (chrono::Utc::now() - xcvrd.start_time).num_seconds();
    Ok(HttpResponseOk(uptime))
}

/// List every front-panel port with its current status.
#[endpoint {
    method = GET,
    path = "/ports",
}]
async fn port_list(
    rqctx: RequestContext<Arc<Xcvrd>>,
) -> Result<HttpResponseOk<Vec<PortInfo>>, HttpError> {
    let xcvrd = rqctx.context();
    xcvrd
        .run_blocking(|p| {
            let status = p.all_port_status()?;
            Ok(p.ports()
                .iter()
                .zip(status)
                .map(|(d, s)| PortInfo::new(d, s))
                .collect())
        })
        .await
        .map(HttpResponseOk)
        .map_err(HttpError::from)
}

/// Return one port and its current status.
#[endpoint {
    method = GET,
    path = "/ports/{port}",
}]
async fn port_get(
    rqctx: RequestContext<Arc<Xcvrd>>,
    path: Path<PortPathParams>,
) -> Result<HttpResponseOk<PortInfo>, HttpError> {
    let xcvrd = rqctx.context();
    let port = path.into_inner().port;
    xcvrd
        .run_blocking(move |p| {
            let desc = p.ports().get(port)?;
            Ok(PortInfo::new(desc, p.port_status(port)?))
        })
        .await
        .map(HttpResponseOk)
        .map_err(HttpError::from)
}

/// Read a port attribute.
#[endpoint {
    method = GET,
    path = "/ports/{port}/attributes/{attr}",
}]
async fn port_attr_get(
    rqctx: RequestContext<Arc<Xcvrd>>,
    path: Path<PortAttrPathParams>,
) -> Result<HttpResponseOk<AttributeValue>, HttpError> {
    let xcvrd = rqctx.context();
    let PortAttrPathParams { port, attr } = path.into_inner();
    xcvrd
        .run_blocking(move |p| p.attr_read(port, PortAttr::parse(&attr)?))
        .await
        .map(|text| HttpResponseOk(AttributeValue::from_text(text)))
        .map_err(HttpError::from)
}

/// Write a port attribute.
///
/// Control bits take a hexadecimal value, where anything non-zero sets the
/// bit.  `dev_class` takes a decimal integer.
#[endpoint {
    method = PUT,
    path = "/ports/{port}/attributes/{attr}",
}]
async fn port_attr_set(
    rqctx: RequestContext<Arc<Xcvrd>>,
    path: Path<PortAttrPathParams>,
    body: TypedBody<AttributeValue>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    let xcvrd = rqctx.context();
    let PortAttrPathParams { port, attr } = path.into_inner();
    let value = body.into_inner().value;
    debug!(xcvrd.log, "setting port attribute";
        "port" => port, "attr" => &attr, "value" => &value);
    xcvrd
        .run_blocking(move |p| {
            p.attr_write(port, PortAttr::parse(&attr)?, &value)
        })
        .await
        .map(|_| HttpResponseUpdatedNoContent())
        .map_err(HttpError::from)
}

/// Read from a module's EEPROM through the flat, paged view.
#[endpoint {
    method = GET,
    path = "/ports/{port}/eeprom",
}]
async fn eeprom_read(
    rqctx: RequestContext<Arc<Xcvrd>>,
    path: Path<PortPathParams>,
    query: Query<EepromRange>,
) -> Result<HttpResponseOk<EepromData>, HttpError> {
    let xcvrd = rqctx.context();
    let port = path.into_inner().port;
    let range = query.into_inner();
    let offset = range.offset.unwrap_or(0);
    xcvrd
        .run_blocking(move |p| {
            let len = match range.len {
                Some(len) => len,
                None => p.eeprom_size(port)?.saturating_sub(offset),
            };
            p.eeprom_read(port, offset, len)
        })
        .await
        .map(|data| HttpResponseOk(EepromData { offset, data }))
        .map_err(HttpError::from)
}

/// Write to a module's EEPROM.
#[endpoint {
    method = PUT,
    path = "/ports/{port}/eeprom",
}]
async fn eeprom_write(
    rqctx: RequestContext<Arc<Xcvrd>>,
    path: Path<PortPathParams>,
    body: TypedBody<EepromWrite>,
) -> Result<HttpResponseOk<EepromWriteResult>, HttpError> {
    let xcvrd = rqctx.context();
    let port = path.into_inner().port;
    let EepromWrite { offset, data } = body.into_inner();
    xcvrd
        .run_blocking(move |p| p.eeprom_write(port, offset, &data))
        .await
        .map(|written| HttpResponseOk(EepromWriteResult { written }))
        .map_err(HttpError::from)
}

/// Return the layout of a module's EEPROM, probing the module if needed.
#[endpoint {
    method = GET,
    path = "/ports/{port}/eeprom/layout",
}]
async fn eeprom_layout(
    rqctx: RequestContext<Arc<Xcvrd>>,
    path: Path<PortPathParams>,
) -> Result<HttpResponseOk<EepromLayout>, HttpError> {
    let xcvrd = rqctx.context();
    let port = path.into_inner().port;
    xcvrd
        .run_blocking(move |p| p.eeprom_layout(port))
        .await
        .map(HttpResponseOk)
        .map_err(HttpError::from)
}

/// Discard the cached layout of a module's EEPROM and probe it again.
#[endpoint {
    method = POST,
    path = "/ports/{port}/eeprom/refresh",
}]
async fn eeprom_refresh(
    rqctx: RequestContext<Arc<Xcvrd>>,
    path: Path<PortPathParams>,
) -> Result<HttpResponseOk<EepromLayout>, HttpError> {
    let xcvrd = rqctx.context();
    let port = path.into_inner().port;
    xcvrd
        .run_blocking(move |p| p.refresh_layout(port))
        .await
        .map(HttpResponseOk)
        .map_err(HttpError::from)
}

/// Read a platform attribute.
#[endpoint {
    method = GET,
    path = "/fpga/attributes/{attr}",
}]
async fn fpga_attr_get(
    rqctx: RequestContext<Arc<Xcvrd>>,
    path: Path<FpgaAttrPathParams>,
) -> Result<HttpResponseOk<AttributeValue>, HttpError> {
    let xcvrd = rqctx.context();
    let attr = path.into_inner().attr;
    xcvrd
        .run_blocking(move |p| p.fpga_attr_read(FpgaAttr::parse(&attr)?))
        .await
        .map(|text| HttpResponseOk(AttributeValue::from_text(text)))
        .map_err(HttpError::from)
}

/// Return the firmware version of every FPGA found.
#[endpoint {
    method = GET,
    path = "/fpga/versions",
}]
async fn fpga_versions(
    rqctx: RequestContext<Arc<Xcvrd>>,
) -> Result<HttpResponseOk<Vec<FpgaVersionInfo>>, HttpError> {
    let xcvrd = rqctx.context();
    xcvrd
        .run_blocking(|p| p.versions())
        .await
        .map(|versions| {
            HttpResponseOk(
                versions
                    .into_iter()
                    .map(|(region, version)| FpgaVersionInfo { region, version })
                    .collect(),
            )
        })
        .map_err(HttpError::from)
}

pub fn http_api() -> dropshot::ApiDescription<Arc<Xcvrd>> {
    let mut api = dropshot::ApiDescription::new();
    api.register(xcvrd_version).unwrap();
    api.register(xcvrd_uptime).unwrap();
    api.register(port_list).unwrap();
    api.register(port_get).unwrap();
    api.register(port_attr_get).unwrap();
    api.register(port_attr_set).unwrap();
    api.register(eeprom_read).unwrap();
    api.register(eeprom_write).unwrap();
    api.register(eeprom_layout).unwrap();
    api.register(eeprom_refresh).unwrap();
    api.register(fpga_attr_get).unwrap();
    api.register(fpga_versions).unwrap();
    api
}

fn launch_server(
    xcvrd: Arc<Xcvrd>,
    addr: SocketAddr,
) -> anyhow::Result<ApiServer> {
    let config_dropshot = dropshot::ConfigDropshot {
        bind_address: addr,
        default_request_body_max_bytes: 10240,
        default_handler_task_mode: dropshot::HandlerTaskMode::Detached,
        log_headers: vec![],
    };
    let log = xcvrd
        .log
        .new(o!("unit" => "api-server", "listen" => addr.to_string()));

    info!(log, "starting api server");
    dropshot::HttpServerStarter::new(&config_dropshot, http_api(), xcvrd, &log)
        .map(|s| s.start())
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}

async fn close_server(log: &slog::Logger, addr: SocketAddr, server: ApiServer) {
    info!(log, "closing api server on {addr}");
    if let Err(e) = server.close().await {
        error!(log, "error closing api server on {addr}: {e:?}");
    }
}

/// Keep one api server running per configured listen address.  The set is
/// re-evaluated each time `rx` fires, and every server is closed once the
/// sender goes away.
pub async fn api_server_manager(
    xcvrd: Arc<Xcvrd>,
    mut rx: tokio::sync::watch::Receiver<()>,
) {
    let log = xcvrd.log.new(o!("unit" => "api-server-manager"));
    let mut active = HashMap::<SocketAddr, ApiServer>::new();

    loop {
        let active_addrs = active.keys().cloned().collect::<Vec<SocketAddr>>();
        let config_addrs = xcvrd.config().listen_addresses.to_vec();
        let (add, remove) = common::purge_common(&config_addrs, &active_addrs);

        for addr in remove {
            if let Some(server) = active.remove(&addr) {
                close_server(&log, addr, server).await;
            }
        }
        for addr in add {
            match launch_server(xcvrd.clone(), addr) {
                Ok(server) => {
                    active.insert(addr, server);
                }
                Err(e) => {
                    error!(log, "failed to launch api server on {addr}: {e:?}")
                }
            }
        }

        if rx.changed().await.is_err() {
            break;
        }
    }

    for (addr, server) in active {
        close_server(&log, addr, server).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::Opt;
    use fpga::engine::PollPolicy;
    use fpga::sim::SimBoard;
    use fpga::sim::SimModule;
    use fpga::Platform;
    use fpga::PlatformConfig;
    use pretty_assertions::assert_eq;
    use slog::Drain;
    use std::time::Duration;

    fn logger() -> slog::Logger {
        let decorator =
            slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        slog::Logger::root(drain, slog::o!())
    }

    struct TestServer {
        board: SimBoard,
        server: ApiServer,
        client: reqwest::Client,
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("http://{}{path}", self.server.local_addr())
        }

        async fn get<T: serde::de::DeserializeOwned>(
            &self,
            path: &str,
        ) -> reqwest::Result<T> {
            self.client
                .get(self.url(path))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
        }
    }

    fn start() -> TestServer {
        let log = logger();
        let board = SimBoard::default();
        let platform = Platform::new(
            &log,
            board.region_table(),
            PlatformConfig {
                poll: PollPolicy::immediate(),
                status_max_age: Duration::ZERO,
            },
        )
        .unwrap();
        let config = Config {
            listen_addresses: vec!["127.0.0.1:0".parse().unwrap()],
            ..Config::default()
        };
        let xcvrd = Arc::new(Xcvrd::with_platform(
            log,
            Opt::default(),
            config,
            platform,
        ));
        let server =
            launch_server(xcvrd, "127.0.0.1:0".parse().unwrap()).unwrap();
        TestServer {
            board,
            server,
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_openapi_description() {
        let mut out = Vec::new();
        http_api()
            .openapi("xcvrd", semver::Version::new(0, 1, 0))
            .write(&mut out)
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert!(doc["paths"]["/ports/{port}/eeprom"]["get"].is_object());
        assert!(doc["paths"]["/fpga/versions"]["get"].is_object());
    }

    #[tokio::test]
    async fn test_ports_and_attributes() {
        let ts = start();
        ts.board.insert(65, SimModule::sfp(true, true)).unwrap();

        let ports: Vec<PortInfo> = ts.get("/ports").await.unwrap();
        assert_eq!(ports.len(), 66);
        assert!(ports[64].status.present);
        assert!(!ports[0].status.present);

        let value: AttributeValue =
            ts.get("/ports/66/attributes/rx_los").await.unwrap();
        assert_eq!(value.value, "1");

        let resp = ts
            .client
            .put(ts.url("/ports/65/attributes/tx_disable"))
            .json(&AttributeValue {
                value: "1".to_string(),
            })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);
        let value: AttributeValue =
            ts.get("/ports/65/attributes/tx_disable").await.unwrap();
        assert_eq!(value.value, "1");

        let resp = ts
            .client
            .get(ts.url("/ports/1/attributes/tx_fault"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error_code"], "EINVAL");
    }

    #[tokio::test]
    async fn test_eeprom_access() {
        let ts = start();
        ts.board.insert(5, SimModule::qsfp(true)).unwrap();

        let layout: EepromLayout =
            ts.get("/ports/5/eeprom/layout").await.unwrap();
        assert_eq!(layout.size, 32896);

        let data: EepromData =
            ts.get("/ports/5/eeprom?offset=256&len=16").await.unwrap();
        assert_eq!(data.offset, 256);
        assert_eq!(data.data.len(), 16);

        let whole: EepromData = ts.get("/ports/5/eeprom").await.unwrap();
        assert_eq!(whole.data.len(), 32896);

        let resp = ts
            .client
            .get(ts.url("/ports/6/eeprom?len=1"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error_code"], "ENODEV");
    }

    #[tokio::test]
    async fn test_versions() {
        let ts = start();
        let versions: Vec<FpgaVersionInfo> =
            ts.get("/fpga/versions").await.unwrap();
        assert_eq!(versions.len(), 3);
        let udb: AttributeValue =
            ts.get("/fpga/attributes/udb_version").await.unwrap();
        assert_eq!(udb.value, "2.3");
    }
}
