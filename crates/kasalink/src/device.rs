// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Common device surface shared by both generations and the camera
//! variant, plus the sentinel returned when discovery could not
//! authenticate.

use crate::device_type::DeviceType;
use crate::feature::Feature;
use async_trait::async_trait;
use kasalink_core::errors::{KasaAuthenticationError, KasaResult};
use kasalink_device_config::DeviceConfig;
use serde_json::Value;

#[async_trait]
pub trait Device: Send + Sync {
  fn host(&self) -> &str;

  fn config(&self) -> &DeviceConfig;

  /// Inferred kind; [DeviceType::Unknown] until negotiation (or for
  /// unauthenticated sentinels).
  fn device_type(&self) -> DeviceType;

  /// False only for the sentinel a failed discovery login produces.
  fn is_authenticated(&self) -> bool {
    true
  }

  /// Refresh the device and, by default, its children (or parent, when
  /// called on a child).
  async fn update(&self) -> KasaResult<()> {
    self.update_with(true).await
  }

  async fn update_with(&self, update_children_or_parent: bool) -> KasaResult<()>;

  /// Seed state from a discovery payload so basic accessors work before
  /// the first `update()`.
  fn update_from_discover_info(&self, info: Value) {
    let _ = info;
  }

  /// Release the transport. Injected HTTP clients are left untouched.
  async fn disconnect(&self);

  /// Last parsed system-info map. Errors before the data has been fetched.
  fn sys_info(&self) -> KasaResult<Value>;

  /// Last merged raw update payload; Null before the first update.
  fn internal_state(&self) -> Value;

  fn alias(&self) -> Option<String>;

  fn model(&self) -> Option<String>;

  fn device_id(&self) -> Option<String>;

  fn is_on(&self) -> KasaResult<bool>;

  async fn turn_on(&self) -> KasaResult<()>;

  async fn turn_off(&self) -> KasaResult<()>;

  /// Snapshot of the registered features. Empty before the first update.
  fn features(&self) -> Vec<Feature>;

  fn feature(&self, id: &str) -> Option<Feature> {
    self
      .features()
      .into_iter()
      .find(|feature| feature.id() == id)
  }
}

/// What discovery hands back when a device answered but login failed: the
/// discovery info survives, everything else errors.
pub struct UnauthenticatedDevice {
  host: String,
  config: DeviceConfig,
  discovery_info: Value,
}

impl UnauthenticatedDevice {
  pub fn new(config: DeviceConfig, discovery_info: Value) -> Self {
    Self {
      host: config.host().clone(),
      config,
      discovery_info,
    }
  }

  pub fn discovery_info(&self) -> &Value {
    &self.discovery_info
  }

  fn auth_error(&self) -> KasaAuthenticationError {
    KasaAuthenticationError::LoginFailed(
      self.host.clone(),
      "discovery could not authenticate with the provided credentials".to_owned(),
    )
  }
}

#[async_trait]
impl Device for UnauthenticatedDevice {
  fn host(&self) -> &str {
    &self.host
  }

  fn config(&self) -> &DeviceConfig {
    &self.config
  }

  fn device_type(&self) -> DeviceType {
    DeviceType::Unknown
  }

  fn is_authenticated(&self) -> bool {
    false
  }

  async fn update_with(&self, _update_children_or_parent: bool) -> KasaResult<()> {
    Err(self.auth_error().into())
  }

  async fn disconnect(&self) {}

  fn sys_info(&self) -> KasaResult<Value> {
    Ok(self.discovery_info.clone())
  }

  fn internal_state(&self) -> Value {
    self.discovery_info.clone()
  }

  fn alias(&self) -> Option<String> {
    None
  }

  fn model(&self) -> Option<String> {
    self
      .discovery_info
      .get("device_model")
      .and_then(Value::as_str)
      .map(str::to_owned)
  }

  fn device_id(&self) -> Option<String> {
    self
      .discovery_info
      .get("device_id")
      .and_then(Value::as_str)
      .map(str::to_owned)
  }

  fn is_on(&self) -> KasaResult<bool> {
    Err(self.auth_error().into())
  }

  async fn turn_on(&self) -> KasaResult<()> {
    Err(self.auth_error().into())
  }

  async fn turn_off(&self) -> KasaResult<()> {
    Err(self.auth_error().into())
  }

  fn features(&self) -> Vec<Feature> {
    Vec::new()
  }
}
