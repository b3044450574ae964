// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use kasalink_core::errors::{KasaError, KasaResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Wire encryption family, as reported in discovery `mgt_encrypt_schm`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum EncryptionType {
  #[strum(serialize = "XOR")]
  #[serde(rename = "XOR")]
  Xor,
  #[strum(serialize = "AES")]
  #[serde(rename = "AES")]
  Aes,
  #[strum(serialize = "KLAP")]
  #[serde(rename = "KLAP")]
  Klap,
}

/// Namespaced device family tag, as reported by discovery `device_type`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum DeviceFamily {
  #[strum(serialize = "IOT.SMARTPLUGSWITCH")]
  #[serde(rename = "IOT.SMARTPLUGSWITCH")]
  IotSmartPlugSwitch,
  #[strum(serialize = "IOT.SMARTBULB")]
  #[serde(rename = "IOT.SMARTBULB")]
  IotSmartBulb,
  #[strum(serialize = "IOT.IPCAMERA")]
  #[serde(rename = "IOT.IPCAMERA")]
  IotIpCamera,
  #[strum(serialize = "SMART.KASAPLUG")]
  #[serde(rename = "SMART.KASAPLUG")]
  SmartKasaPlug,
  #[strum(serialize = "SMART.KASASWITCH")]
  #[serde(rename = "SMART.KASASWITCH")]
  SmartKasaSwitch,
  #[strum(serialize = "SMART.KASAHUB")]
  #[serde(rename = "SMART.KASAHUB")]
  SmartKasaHub,
  #[strum(serialize = "SMART.TAPOPLUG")]
  #[serde(rename = "SMART.TAPOPLUG")]
  SmartTapoPlug,
  #[strum(serialize = "SMART.TAPOSWITCH")]
  #[serde(rename = "SMART.TAPOSWITCH")]
  SmartTapoSwitch,
  #[strum(serialize = "SMART.TAPOBULB")]
  #[serde(rename = "SMART.TAPOBULB")]
  SmartTapoBulb,
  #[strum(serialize = "SMART.TAPOHUB")]
  #[serde(rename = "SMART.TAPOHUB")]
  SmartTapoHub,
  #[strum(serialize = "SMART.TAPOROBOVAC")]
  #[serde(rename = "SMART.TAPOROBOVAC")]
  SmartTapoRobovac,
  #[strum(serialize = "SMART.IPCAMERA")]
  #[serde(rename = "SMART.IPCAMERA")]
  SmartIpCamera,
}

impl DeviceFamily {
  pub fn is_iot(&self) -> bool {
    self.to_string().starts_with("IOT.")
  }

  pub fn is_smart(&self) -> bool {
    self.to_string().starts_with("SMART.")
  }

  pub fn is_camera(&self) -> bool {
    matches!(self, DeviceFamily::SmartIpCamera | DeviceFamily::IotIpCamera)
  }

  pub fn is_hub(&self) -> bool {
    matches!(self, DeviceFamily::SmartTapoHub | DeviceFamily::SmartKasaHub)
  }
}

/// Parameters determining how to connect to a device: which transport, which
/// protocol framing, and which login variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionParameters {
  pub device_family: DeviceFamily,
  pub encryption_type: EncryptionType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub login_version: Option<u8>,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub uses_https: bool,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub uses_new_klap: bool,
}

impl ConnectionParameters {
  pub fn new(device_family: DeviceFamily, encryption_type: EncryptionType) -> Self {
    Self {
      device_family,
      encryption_type,
      login_version: None,
      uses_https: false,
      uses_new_klap: false,
    }
  }

  pub fn with_login_version(mut self, login_version: u8) -> Self {
    self.login_version = Some(login_version);
    self
  }

  pub fn with_https(mut self, https: bool) -> Self {
    self.uses_https = https;
    self
  }

  pub fn with_new_klap(mut self, new_klap: bool) -> Self {
    self.uses_new_klap = new_klap;
    self
  }

  /// Build from the raw strings found in a discovery response.
  pub fn from_values(
    device_family: &str,
    encryption_type: &str,
    login_version: Option<u8>,
    https: bool,
  ) -> KasaResult<Self> {
    let family = DeviceFamily::from_str(device_family).map_err(|_| {
      KasaError::Config(format!("Unknown device family '{device_family}'"))
    })?;
    let encryption = EncryptionType::from_str(encryption_type).map_err(|_| {
      KasaError::Config(format!("Unknown encryption type '{encryption_type}'"))
    })?;
    Ok(Self {
      device_family: family,
      encryption_type: encryption,
      login_version,
      uses_https: https,
      uses_new_klap: false,
    })
  }

  pub fn to_dict(&self) -> serde_json::Value {
    serde_json::to_value(self).expect("plain enum/bool fields always serialize")
  }

  pub fn from_dict(value: &serde_json::Value) -> KasaResult<Self> {
    serde_json::from_value(value.clone())
      .map_err(|err| KasaError::Config(format!("Invalid connection parameters: {err}")))
  }
}
