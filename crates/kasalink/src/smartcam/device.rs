// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Camera flavor of the SMART engine. Negotiation reads the app component
//! list; state reads `getDeviceInfo`. "On" maps to the lens mask being
//! lifted. Streaming itself is out of scope; only the RTSP URL is
//! assembled.

use crate::device::Device;
use crate::device_type::DeviceType;
use crate::feature::{Feature, FeatureType};
use async_trait::async_trait;
use kasalink_core::errors::{KasaAuthenticationError, KasaError, KasaResult};
use kasalink_device_config::DeviceConfig;
use kasalink_protocol::{MethodResult, Protocol, QueryMap, Request};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

const RTSP_PORT: u16 = 554;

struct CamState {
  negotiated: bool,
  components: HashMap<String, u32>,
  device_type: DeviceType,
  internal_state: Value,
  features: Vec<Feature>,
  features_initialized: bool,
}

pub struct SmartCamDevice {
  host: String,
  config: DeviceConfig,
  protocol: Arc<dyn Protocol>,
  update_lock: Mutex<()>,
  state: RwLock<CamState>,
  basic_info: Arc<RwLock<Map<String, Value>>>,
}

impl SmartCamDevice {
  pub fn new(config: DeviceConfig, protocol: Arc<dyn Protocol>) -> Arc<Self> {
    Arc::new(Self {
      host: config.host().clone(),
      config,
      protocol,
      update_lock: Mutex::new(()),
      state: RwLock::new(CamState {
        negotiated: false,
        components: HashMap::new(),
        device_type: DeviceType::Unknown,
        internal_state: Value::Null,
        features: Vec::new(),
        features_initialized: false,
      }),
      basic_info: Arc::new(RwLock::new(Map::new())),
    })
  }

  pub fn components(&self) -> HashMap<String, u32> {
    self
      .state
      .read()
      .expect("device state lock never poisoned")
      .components
      .clone()
  }

  /// RTSP stream URL; credentials are supplied out of band by the player.
  pub fn stream_rtsp_url(&self) -> String {
    format!("rtsp://{}:{}/stream1", self.host, RTSP_PORT)
  }

  async fn negotiate(&self) -> KasaResult<()> {
    let responses = self
      .protocol
      .query(Request::from("getAppComponentList"))
      .await?;
    let raw = unwrap_method(&self.host, &responses, "getAppComponentList")?;
    let components: HashMap<String, u32> = raw
      .pointer("/app_component/app_component_list")
      .and_then(Value::as_array)
      .map(|list| {
        list
          .iter()
          .filter_map(|component| {
            let name = component.get("name").and_then(Value::as_str)?;
            let version = component.get("version").and_then(Value::as_u64).unwrap_or(1);
            Some((name.to_owned(), version as u32))
          })
          .collect()
      })
      .unwrap_or_default();

    let device_type = if components.contains_key("homeBase") {
      DeviceType::Doorbell
    } else {
      DeviceType::Camera
    };
    let mut state = self.state.write().expect("device state lock never poisoned");
    state.components = components;
    state.device_type = device_type;
    state.negotiated = true;
    Ok(())
  }

  async fn fetch_info(&self) -> KasaResult<()> {
    let mut queries = QueryMap::new();
    queries.insert(
      "getDeviceInfo".to_owned(),
      json!({"device_info": {"name": ["basic_info"]}}),
    );
    queries.insert(
      "getLensMaskConfig".to_owned(),
      json!({"lens_mask": {"name": ["lens_mask_info"]}}),
    );
    let responses = self.protocol.query(Request::Map(queries)).await?;

    let info = unwrap_method(&self.host, &responses, "getDeviceInfo")?;
    let basic_info = info
      .pointer("/device_info/basic_info")
      .and_then(Value::as_object)
      .cloned()
      .ok_or_else(|| {
        KasaError::Message(format!("getDeviceInfo missing basic_info for {}", self.host))
      })?;
    *self
      .basic_info
      .write()
      .expect("basic info lock never poisoned") = basic_info;

    let mut merged = Map::new();
    for (method, result) in &responses {
      if let MethodResult::Response(value) = result {
        merged.insert(method.clone(), value.clone());
      }
    }
    let mut state = self.state.write().expect("device state lock never poisoned");
    state.internal_state = Value::Object(merged);
    Ok(())
  }

  fn initialize_features(&self) -> KasaResult<()> {
    let mut features = Vec::new();

    let info = self.basic_info.clone();
    features.push(
      Feature::builder("device_alias", "Device alias", FeatureType::Sensor)
        .getter(Arc::new(move || {
          Ok(
            info
              .read()
              .expect("basic info lock never poisoned")
              .get("device_alias")
              .cloned()
              .unwrap_or(Value::Null),
          )
        }))
        .finish()?,
    );

    let host = self.host.clone();
    features.push(
      Feature::builder("rtsp_url", "RTSP stream URL", FeatureType::Sensor)
        .getter(Arc::new(move || {
          Ok(Value::String(format!("rtsp://{host}:{RTSP_PORT}/stream1")))
        }))
        .finish()?,
    );

    let mut state = self.state.write().expect("device state lock never poisoned");
    state.features = features;
    state.features_initialized = true;
    Ok(())
  }

  async fn set_lens_mask(&self, enabled: bool) -> KasaResult<()> {
    let _guard = self.update_lock.lock().await;
    let enabled = if enabled { "on" } else { "off" };
    let mut queries = QueryMap::new();
    queries.insert(
      "setLensMaskConfig".to_owned(),
      json!({"lens_mask": {"lens_mask_info": {"enabled": enabled}}}),
    );
    let responses = self.protocol.query(Request::Map(queries)).await?;
    unwrap_method(&self.host, &responses, "setLensMaskConfig")?;
    Ok(())
  }
}

#[async_trait]
impl Device for SmartCamDevice {
  fn host(&self) -> &str {
    &self.host
  }

  fn config(&self) -> &DeviceConfig {
    &self.config
  }

  fn device_type(&self) -> DeviceType {
    self
      .state
      .read()
      .expect("device state lock never poisoned")
      .device_type
  }

  async fn update_with(&self, _update_children_or_parent: bool) -> KasaResult<()> {
    if self.config.credentials().is_none() && self.config.credentials_hash().is_none() {
      return Err(KasaAuthenticationError::MissingCredentials(self.host.clone()).into());
    }
    let _guard = self.update_lock.lock().await;
    if !self
      .state
      .read()
      .expect("device state lock never poisoned")
      .negotiated
    {
      self.negotiate().await?;
    }
    self.fetch_info().await?;
    if !self
      .state
      .read()
      .expect("device state lock never poisoned")
      .features_initialized
    {
      self.initialize_features()?;
    }
    Ok(())
  }

  async fn disconnect(&self) {
    self.protocol.close().await;
  }

  fn sys_info(&self) -> KasaResult<Value> {
    let info = self.basic_info.read().expect("basic info lock never poisoned");
    if info.is_empty() {
      return Err(KasaError::NotNegotiated("sys_info".to_owned()));
    }
    Ok(Value::Object(info.clone()))
  }

  fn internal_state(&self) -> Value {
    self
      .state
      .read()
      .expect("device state lock never poisoned")
      .internal_state
      .clone()
  }

  fn alias(&self) -> Option<String> {
    self
      .basic_info
      .read()
      .expect("basic info lock never poisoned")
      .get("device_alias")
      .and_then(Value::as_str)
      .map(str::to_owned)
  }

  fn model(&self) -> Option<String> {
    self
      .basic_info
      .read()
      .expect("basic info lock never poisoned")
      .get("device_model")
      .and_then(Value::as_str)
      .map(str::to_owned)
  }

  fn device_id(&self) -> Option<String> {
    self
      .basic_info
      .read()
      .expect("basic info lock never poisoned")
      .get("dev_id")
      .and_then(Value::as_str)
      .map(str::to_owned)
  }

  fn is_on(&self) -> KasaResult<bool> {
    let state = self.state.read().expect("device state lock never poisoned");
    if !state.negotiated {
      return Err(KasaError::NotNegotiated("is_on".to_owned()));
    }
    // Camera "off" means the lens mask is engaged.
    let masked = state
      .internal_state
      .pointer("/getLensMaskConfig/lens_mask/lens_mask_info/enabled")
      .and_then(Value::as_str)
      .map(|enabled| enabled == "on")
      .unwrap_or(false);
    Ok(!masked)
  }

  async fn turn_on(&self) -> KasaResult<()> {
    self.set_lens_mask(false).await
  }

  async fn turn_off(&self) -> KasaResult<()> {
    self.set_lens_mask(true).await
  }

  fn features(&self) -> Vec<Feature> {
    self
      .state
      .read()
      .expect("device state lock never poisoned")
      .features
      .clone()
  }
}

fn unwrap_method(host: &str, responses: &kasalink_protocol::ResponseMap, method: &str) -> KasaResult<Value> {
  match responses.get(method) {
    Some(MethodResult::Response(value)) => Ok(value.clone()),
    Some(MethodResult::Error(code)) => Err(KasaError::Device {
      host: host.to_owned(),
      code: *code,
    }),
    None => Err(KasaError::Message(format!(
      "Response for {method} missing from {host}"
    ))),
  }
}
