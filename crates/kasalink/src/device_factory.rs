// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Device creation from a [DeviceConfig]: transport per encryption scheme,
//! protocol per family prefix, device struct per family. The returned
//! device has not been updated yet.

use crate::device::Device;
use crate::iot::IotDevice;
use crate::smart::SmartDevice;
use crate::smartcam::SmartCamDevice;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_device_config::{DeviceConfig, DeviceFamily, EncryptionType};
use kasalink_protocol::{IotProtocol, Protocol, SmartCamProtocol, SmartProtocol};
use kasalink_transport::{
  AesTransport, KlapTransport, SslAesTransport, SslTransport, Transport, XorTransport,
};
use std::sync::Arc;

/// Select a transport for `encryption_type` x `https` x `new_klap`. The
/// new-KLAP flag is consumed inside the KLAP transport itself.
pub fn transport_for_config(config: &DeviceConfig) -> KasaResult<Arc<dyn Transport>> {
  let params = config.connection();
  let transport: Arc<dyn Transport> = match (params.encryption_type, params.uses_https) {
    (EncryptionType::Xor, false) => Arc::new(XorTransport::new(config)),
    // HTTPS without payload encryption: the plain TLS transport.
    (EncryptionType::Xor, true) => Arc::new(SslTransport::new(config)?),
    (EncryptionType::Aes, false) => Arc::new(AesTransport::new(config)?),
    (EncryptionType::Aes, true) => Arc::new(SslAesTransport::new(config)?),
    (EncryptionType::Klap, _) => Arc::new(KlapTransport::new(config)?),
  };
  Ok(transport)
}

/// Select protocol framing for the device family prefix.
pub fn protocol_for_config(
  config: &DeviceConfig,
  transport: Arc<dyn Transport>,
) -> Arc<dyn Protocol> {
  let host = config.host();
  match config.connection().device_family {
    family if family.is_iot() => Arc::new(IotProtocol::new(host, transport)),
    DeviceFamily::SmartIpCamera => Arc::new(SmartCamProtocol::new(host, transport)),
    _ => Arc::new(SmartProtocol::new(host, transport)),
  }
}

/// Build an un-updated device for the config. Callers run `update()`
/// themselves when they want live state.
pub fn connect(config: &DeviceConfig) -> KasaResult<Arc<dyn Device>> {
  let transport = transport_for_config(config)?;
  let protocol = protocol_for_config(config, transport);
  let family = config.connection().device_family;
  let device: Arc<dyn Device> = if family.is_iot() {
    IotDevice::new(config.clone(), protocol)
  } else if family == DeviceFamily::SmartIpCamera {
    SmartCamDevice::new(config.clone(), protocol)
  } else if family.is_smart() {
    SmartDevice::new(config.clone(), protocol)
  } else {
    return Err(KasaError::UnsupportedDevice(format!(
      "No device class for family {family} at {}",
      config.host()
    )));
  };
  Ok(device)
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::device_type::DeviceType;
  use kasalink_core::credentials::Credentials;
  use kasalink_device_config::ConnectionParameters;

  fn config(family: DeviceFamily, encryption: EncryptionType) -> DeviceConfig {
    DeviceConfig::builder("127.0.0.1", ConnectionParameters::new(family, encryption))
      .credentials(Credentials::new("user@example.com", "hunter2"))
      .finish()
  }

  #[test]
  fn devices_start_unknown_and_unupdated() {
    let device = connect(&config(DeviceFamily::SmartTapoPlug, EncryptionType::Klap))
      .expect("constructs");
    assert_eq!(device.device_type(), DeviceType::Unknown);
    assert!(device.sys_info().is_err());
    assert!(device.features().is_empty());
  }

  #[test]
  fn family_selects_device_class() {
    for (family, encryption) in [
      (DeviceFamily::IotSmartPlugSwitch, EncryptionType::Xor),
      (DeviceFamily::SmartTapoBulb, EncryptionType::Klap),
      (DeviceFamily::SmartTapoHub, EncryptionType::Aes),
      (DeviceFamily::SmartIpCamera, EncryptionType::Aes),
    ] {
      assert!(connect(&config(family, encryption)).is_ok(), "{family}");
    }
  }
}
