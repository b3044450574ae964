// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::connection::ConnectionParameters;
use getset::{CopyGetters, Getters};
use kasalink_core::credentials::Credentials;
use kasalink_core::errors::{KasaError, KasaResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which login material a serialized config should carry. Exactly one of
/// credentials and credentials hash ever lands on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsOutput {
  /// Emit the username/password pair, never the hash.
  Credentials,
  /// Emit the opaque reconnect hash, never the pair.
  Hash,
  /// Emit neither.
  None,
}

/// Everything needed to reconnect to a device without rediscovery.
///
/// The injected HTTP client is shared by the caller across devices and is
/// never serialized; the library must not close it.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct DeviceConfig {
  #[getset(get = "pub")]
  host: String,
  #[getset(get_copy = "pub")]
  port_override: Option<u16>,
  #[getset(get_copy = "pub")]
  timeout: Duration,
  #[getset(get = "pub")]
  credentials: Option<Credentials>,
  #[getset(get = "pub")]
  credentials_hash: Option<String>,
  #[getset(get = "pub")]
  connection: ConnectionParameters,
  #[getset(get = "pub")]
  http_client: Option<reqwest::Client>,
}

// The HTTP client is connection plumbing, not configuration; it is excluded
// from comparison the same way it is excluded from serialization.
impl PartialEq for DeviceConfig {
  fn eq(&self, other: &Self) -> bool {
    self.host == other.host
      && self.port_override == other.port_override
      && self.timeout == other.timeout
      && self.credentials == other.credentials
      && self.credentials_hash == other.credentials_hash
      && self.connection == other.connection
  }
}

impl DeviceConfig {
  pub fn builder(host: &str, connection: ConnectionParameters) -> DeviceConfigBuilder {
    DeviceConfigBuilder::new(host, connection)
  }

  /// Port to connect to: the override if set, otherwise the given
  /// transport default.
  pub fn port_or(&self, default: u16) -> u16 {
    self.port_override.unwrap_or(default)
  }

  /// Serialize with the default rule: emit credentials when present,
  /// otherwise the hash.
  pub fn to_dict(&self) -> Value {
    let output = if self.credentials.is_some() {
      CredentialsOutput::Credentials
    } else {
      CredentialsOutput::Hash
    };
    self.to_dict_with(output)
  }

  pub fn to_dict_with(&self, output: CredentialsOutput) -> Value {
    let dict = DeviceConfigDict {
      host: self.host.clone(),
      port_override: self.port_override,
      timeout: self.timeout.as_secs(),
      credentials: match output {
        CredentialsOutput::Credentials => self.credentials.clone(),
        _ => None,
      },
      credentials_hash: match output {
        CredentialsOutput::Hash => self.credentials_hash.clone(),
        _ => None,
      },
      connection_type: self.connection,
    };
    serde_json::to_value(&dict).expect("config dict fields always serialize")
  }

  /// Strict deserialization: unknown fields and a credentials/hash pair
  /// stored together are both typed errors.
  pub fn from_dict(value: &Value) -> KasaResult<Self> {
    let dict: DeviceConfigDict = serde_json::from_value(value.clone())
      .map_err(|err| KasaError::Config(format!("Invalid device config: {err}")))?;
    if dict.credentials.is_some() && dict.credentials_hash.is_some() {
      return Err(KasaError::Config(
        "Config may carry credentials or credentials_hash, not both".to_owned(),
      ));
    }
    Ok(Self {
      host: dict.host,
      port_override: dict.port_override,
      timeout: Duration::from_secs(dict.timeout),
      credentials: dict.credentials,
      credentials_hash: dict.credentials_hash,
      connection: dict.connection_type,
      http_client: None,
    })
  }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceConfigDict {
  host: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  port_override: Option<u16>,
  #[serde(default = "default_timeout_secs")]
  timeout: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  credentials: Option<Credentials>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  credentials_hash: Option<String>,
  connection_type: ConnectionParameters,
}

fn default_timeout_secs() -> u64 {
  DEFAULT_TIMEOUT.as_secs()
}

pub struct DeviceConfigBuilder {
  config: DeviceConfig,
}

impl DeviceConfigBuilder {
  pub fn new(host: &str, connection: ConnectionParameters) -> Self {
    Self {
      config: DeviceConfig {
        host: host.to_owned(),
        port_override: None,
        timeout: DEFAULT_TIMEOUT,
        credentials: None,
        credentials_hash: None,
        connection,
        http_client: None,
      },
    }
  }

  pub fn port_override(mut self, port: u16) -> Self {
    self.config.port_override = Some(port);
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.config.timeout = timeout;
    self
  }

  pub fn credentials(mut self, credentials: Credentials) -> Self {
    self.config.credentials = Some(credentials);
    self
  }

  pub fn credentials_hash(mut self, hash: &str) -> Self {
    self.config.credentials_hash = Some(hash.to_owned());
    self
  }

  pub fn http_client(mut self, client: reqwest::Client) -> Self {
    self.config.http_client = Some(client);
    self
  }

  pub fn finish(self) -> DeviceConfig {
    if self.config.credentials.is_some() && self.config.credentials_hash.is_some() {
      warn!(
        "Config for {} has both credentials and a hash; login will use the credentials",
        self.config.host
      );
    }
    self.config
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::connection::{DeviceFamily, EncryptionType};
  use serde_json::json;

  fn connection() -> ConnectionParameters {
    ConnectionParameters::new(DeviceFamily::SmartTapoPlug, EncryptionType::Klap)
      .with_login_version(2)
  }

  #[test]
  fn dict_round_trip_is_identity() {
    let config = DeviceConfig::builder("192.168.0.10", connection())
      .credentials(Credentials::new("user@example.com", "hunter2"))
      .timeout(Duration::from_secs(7))
      .port_override(8080)
      .finish();
    let restored = DeviceConfig::from_dict(&config.to_dict()).expect("round trip");
    assert_eq!(restored, config);
  }

  #[test]
  fn hash_and_credentials_never_serialize_together() {
    let config = DeviceConfig::builder("192.168.0.10", connection())
      .credentials(Credentials::new("user@example.com", "hunter2"))
      .credentials_hash("b2theSB0aGVu")
      .finish();
    let with_creds = config.to_dict_with(CredentialsOutput::Credentials);
    assert!(with_creds.get("credentials").is_some());
    assert!(with_creds.get("credentials_hash").is_none());
    let with_hash = config.to_dict_with(CredentialsOutput::Hash);
    assert!(with_hash.get("credentials").is_none());
    assert_eq!(with_hash["credentials_hash"], json!("b2theSB0aGVu"));
  }

  #[test]
  fn from_dict_rejects_unknown_fields() {
    let dict = json!({
      "host": "192.168.0.10",
      "connection_type": {"device_family": "SMART.TAPOPLUG", "encryption_type": "KLAP"},
      "favorite_color": "blue"
    });
    assert!(DeviceConfig::from_dict(&dict).is_err());
  }

  #[test]
  fn from_dict_rejects_double_login_material() {
    let dict = json!({
      "host": "192.168.0.10",
      "connection_type": {"device_family": "SMART.TAPOPLUG", "encryption_type": "KLAP"},
      "credentials": {"username": "a", "password": "b"},
      "credentials_hash": "aGFzaA=="
    });
    assert!(DeviceConfig::from_dict(&dict).is_err());
  }

  #[test]
  fn timeout_defaults_when_missing() {
    let dict = json!({
      "host": "192.168.0.10",
      "connection_type": {"device_family": "IOT.SMARTPLUGSWITCH", "encryption_type": "XOR"}
    });
    let config = DeviceConfig::from_dict(&dict).expect("valid");
    assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
    assert_eq!(config.port_or(9999), 9999);
  }
}
