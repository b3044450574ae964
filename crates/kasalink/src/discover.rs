// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Broadcast discovery over both generations' probe ports: XOR-encrypted
//! sysinfo on 9999, the framed SMART probe on 20002. Each response is
//! decoded per port, mapped to connection parameters and a device class,
//! and optionally authenticated on the spot.

use crate::device::{Device, UnauthenticatedDevice};
use crate::device_factory;
use dashmap::DashMap;
use futures::future::BoxFuture;
use kasalink_core::credentials::Credentials;
use kasalink_core::errors::{KasaConnectionError, KasaError, KasaResult};
use kasalink_device_config::{ConnectionParameters, DeviceConfig, DeviceFamily, EncryptionType};
use kasalink_transport::crypto::{discovery_cipher, xor};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

pub const IOT_DISCOVERY_PORT: u16 = 9999;
pub const SMART_DISCOVERY_PORT: u16 = 20002;

const IOT_PROBE: &str = r#"{"system":{"get_sysinfo":null}}"#;
const RECEIVE_BUFFER: usize = 16 * 1024;

pub type OnDiscovered = Arc<dyn Fn(Arc<dyn Device>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Decoded SMART discovery record (the `result` body of a port-20002
/// response).
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryResult {
  pub device_type: String,
  #[serde(default)]
  pub device_model: String,
  #[serde(default)]
  pub ip: String,
  #[serde(default)]
  pub mac: String,
  #[serde(default)]
  pub device_id: String,
  #[serde(default)]
  pub hw_ver: Option<String>,
  #[serde(default)]
  pub fw_ver: Option<String>,
  #[serde(default)]
  pub mgt_encrypt_schm: EncryptionScheme,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncryptionScheme {
  #[serde(default)]
  pub is_support_https: Option<bool>,
  #[serde(default)]
  pub encrypt_type: Option<String>,
  #[serde(default)]
  pub http_port: Option<u16>,
  #[serde(default)]
  pub lv: Option<u8>,
}

impl DiscoveryResult {
  /// Map the advertised scheme to connection parameters.
  pub fn connection_parameters(&self) -> KasaResult<ConnectionParameters> {
    let encrypt_type = self.mgt_encrypt_schm.encrypt_type.as_deref().ok_or_else(|| {
      KasaError::UnsupportedDevice(format!(
        "{} advertises no encryption scheme",
        self.device_type
      ))
    })?;
    ConnectionParameters::from_values(
      &self.device_type,
      encrypt_type,
      self.mgt_encrypt_schm.lv,
      self.mgt_encrypt_schm.is_support_https.unwrap_or(false),
    )
  }
}

#[derive(Clone)]
pub struct DiscoverOptions {
  /// Broadcast (or unicast) target address.
  pub target: String,
  /// Wall-clock receive window. Zero returns immediately with whatever has
  /// already arrived (nothing).
  pub timeout: Duration,
  /// How many times each probe is transmitted.
  pub discovery_packets: usize,
  /// Login material for the per-device authentication follow-up.
  pub credentials: Option<Credentials>,
  /// Invoked for each device in receipt order.
  pub on_discovered: Option<OnDiscovered>,
  /// Probe ports, overridable for test fixtures and exotic firmware.
  pub iot_port: u16,
  pub smart_port: u16,
}

impl Default for DiscoverOptions {
  fn default() -> Self {
    Self {
      target: "255.255.255.255".to_owned(),
      timeout: Duration::from_secs(5),
      discovery_packets: 3,
      credentials: None,
      on_discovered: None,
      iot_port: IOT_DISCOVERY_PORT,
      smart_port: SMART_DISCOVERY_PORT,
    }
  }
}

pub struct Discover;

impl Discover {
  /// Broadcast both probes and collect responders until the timeout. The
  /// result is keyed by IP; duplicates from repeated probe packets are
  /// suppressed.
  pub async fn discover(options: DiscoverOptions) -> KasaResult<HashMap<String, Arc<dyn Device>>> {
    let results: DashMap<String, Arc<dyn Device>> = DashMap::new();
    Self::run(&options, |ip, device| {
      results.insert(ip, device);
      false
    })
    .await?;
    Ok(results.into_iter().collect())
  }

  /// Unicast variant: returns the first device the host answers as, or a
  /// timeout error.
  pub async fn discover_single(host: &str, options: DiscoverOptions) -> KasaResult<Arc<dyn Device>> {
    let options = DiscoverOptions {
      target: host.to_owned(),
      ..options
    };
    let mut found: Option<Arc<dyn Device>> = None;
    Self::run(&options, |_ip, device| {
      found = Some(device);
      true
    })
    .await?;
    found.ok_or_else(|| {
      KasaConnectionError::Timeout(host.to_owned(), options.timeout.as_secs()).into()
    })
  }

  /// Probe, receive, decode; `deliver` returns true to stop early.
  async fn run(
    options: &DiscoverOptions,
    mut deliver: impl FnMut(String, Arc<dyn Device>) -> bool,
  ) -> KasaResult<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
      .await
      .map_err(|err| KasaError::Message(format!("Unable to bind discovery socket: {err}")))?;
    socket
      .set_broadcast(true)
      .map_err(|err| KasaError::Message(format!("Unable to enable broadcast: {err}")))?;

    let iot_probe = xor::encrypt(IOT_PROBE.as_bytes());
    let nonce: [u8; 6] = rand::thread_rng().r#gen();
    let smart_probe = discovery_cipher::probe_header(&nonce);

    for _ in 0..options.discovery_packets {
      if let Err(err) = socket
        .send_to(&iot_probe, (options.target.as_str(), options.iot_port))
        .await
      {
        debug!("IOT probe to {} failed: {}", options.target, err);
      }
      if let Err(err) = socket
        .send_to(&smart_probe, (options.target.as_str(), options.smart_port))
        .await
      {
        debug!("SMART probe to {} failed: {}", options.target, err);
      }
    }

    let deadline = Instant::now() + options.timeout;
    let mut seen: HashSet<String> = HashSet::new();
    let mut buffer = vec![0u8; RECEIVE_BUFFER];

    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      if remaining.is_zero() {
        break;
      }
      let (received, addr) = match timeout(remaining, socket.recv_from(&mut buffer)).await {
        Ok(Ok(received)) => received,
        Ok(Err(err)) => {
          debug!("Discovery receive error: {}", err);
          continue;
        }
        Err(_) => break,
      };
      let ip = addr.ip().to_string();
      if !seen.insert(ip.clone()) {
        continue;
      }

      let datagram = &buffer[..received];
      let device = match addr.port() {
        port if port == options.iot_port => Self::handle_iot_response(&ip, datagram, options),
        port if port == options.smart_port => {
          match Self::handle_smart_response(&ip, datagram, options) {
            Ok(pending) => {
              // Authentication runs outside the decode path so one slow
              // device cannot wedge parsing of its own datagram.
              Ok(Self::authenticate_discovered(pending, options).await)
            }
            Err(err) => Err(err),
          }
        }
        port => {
          trace!("Ignoring datagram from unexpected port {}", port);
          seen.remove(&ip);
          continue;
        }
      };

      match device {
        Ok(device) => {
          debug!("Discovered {} ({:?})", ip, device.device_type());
          if let Some(callback) = &options.on_discovered {
            callback(device.clone()).await;
          }
          if deliver(ip, device) {
            return Ok(());
          }
        }
        Err(err) => {
          warn!("Unable to use discovery response from {}: {}", ip, err);
        }
      }
    }
    Ok(())
  }

  fn handle_iot_response(
    ip: &str,
    datagram: &[u8],
    _options: &DiscoverOptions,
  ) -> KasaResult<Arc<dyn Device>> {
    let decrypted = xor::decrypt(datagram);
    let info: Value =
      serde_json::from_slice(&decrypted).map_err(|err| KasaError::json(ip, &err))?;
    let sys_info = info
      .pointer("/system/get_sysinfo")
      .cloned()
      .ok_or_else(|| KasaError::UnsupportedDevice(format!("{ip} sent no sysinfo")))?;

    let family = iot_family(&sys_info);
    let config = DeviceConfig::builder(
      ip,
      ConnectionParameters::new(family, EncryptionType::Xor),
    )
    .finish();
    let device = device_factory::connect(&config)?;
    device.update_from_discover_info(info);
    Ok(device)
  }

  fn handle_smart_response(
    ip: &str,
    datagram: &[u8],
    options: &DiscoverOptions,
  ) -> KasaResult<PendingSmartDevice> {
    let nonce = discovery_cipher::parse_header(datagram)?;
    let body = discovery_cipher::unwrap_body(&nonce, &datagram[discovery_cipher::HEADER_LEN..])?;
    let envelope: Value =
      serde_json::from_slice(&body).map_err(|err| KasaError::json(ip, &err))?;
    let result_value = envelope.get("result").cloned().unwrap_or(envelope);
    let result: DiscoveryResult = serde_json::from_value(result_value.clone())
      .map_err(|err| KasaError::json(ip, &err))?;

    let params = result.connection_parameters()?;
    let mut builder = DeviceConfig::builder(ip, params);
    if let Some(port) = result.mgt_encrypt_schm.http_port {
      builder = builder.port_override(port);
    }
    if let Some(credentials) = &options.credentials {
      builder = builder.credentials(credentials.clone());
    }
    let config = builder.finish();
    Ok(PendingSmartDevice {
      config,
      info: result_value,
    })
  }

  /// Authentication follow-up for SMART devices: with credentials, run one
  /// update; a login failure still delivers the device, as a sentinel that
  /// carries the discovery info.
  async fn authenticate_discovered(
    pending: PendingSmartDevice,
    options: &DiscoverOptions,
  ) -> Arc<dyn Device> {
    let device = match device_factory::connect(&pending.config) {
      Ok(device) => device,
      Err(err) => {
        warn!("{}: {}", pending.config.host(), err);
        return Arc::new(UnauthenticatedDevice::new(pending.config, pending.info));
      }
    };
    device.update_from_discover_info(pending.info.clone());
    if options.credentials.is_none() {
      return device;
    }
    match device.update().await {
      Ok(()) => device,
      Err(KasaError::Authentication(err)) => {
        info!(
          "Authentication with {} failed ({}), delivering unauthenticated device",
          pending.config.host(),
          err
        );
        Arc::new(UnauthenticatedDevice::new(pending.config, pending.info))
      }
      Err(err) => {
        warn!(
          "Update of discovered device {} failed: {}",
          pending.config.host(),
          err
        );
        device
      }
    }
  }
}

struct PendingSmartDevice {
  config: DeviceConfig,
  info: Value,
}

fn iot_family(sys_info: &Value) -> DeviceFamily {
  let type_field = sys_info
    .get("type")
    .or_else(|| sys_info.get("mic_type"))
    .and_then(Value::as_str)
    .unwrap_or_default();
  if let Ok(family) = DeviceFamily::from_str(type_field) {
    return family;
  }
  if type_field.to_ascii_lowercase().contains("bulb") {
    DeviceFamily::IotSmartBulb
  } else {
    DeviceFamily::IotSmartPlugSwitch
  }
}
