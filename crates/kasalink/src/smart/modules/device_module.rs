// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Always-attached module owning `get_device_info` and the power state.

use crate::feature::{Feature, FeatureCategory, FeatureType};
use crate::module::ModuleData;
use crate::smart::module::{
  info_value, query_helper, SmartModule, SmartModuleContext, SmartModuleDescriptor,
};
use futures::FutureExt;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_protocol::QueryMap;
use serde_json::{json, Value};
use std::sync::Arc;

pub const NAME: &str = "DeviceModule";

pub fn descriptor() -> SmartModuleDescriptor {
  SmartModuleDescriptor {
    name: NAME,
    required_component: None,
    minimum_version: 0,
    constructor: |context| Box::new(DeviceModule { context }),
  }
}

pub struct DeviceModule {
  context: SmartModuleContext,
}

impl SmartModule for DeviceModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn query(&self) -> QueryMap {
    let mut queries = QueryMap::new();
    queries.insert("get_device_info".to_owned(), Value::Null);
    queries
  }

  fn estimated_query_response_size(&self) -> usize {
    1024
  }

  fn post_update_hook(&self, data: &ModuleData) -> KasaResult<()> {
    let info = data.unwrapped()?;
    let Value::Object(info) = info else {
      return Err(KasaError::Message(
        "get_device_info did not return an object".to_owned(),
      ));
    };
    *self
      .context
      .device_info
      .write()
      .expect("device info lock never poisoned") = info;
    Ok(())
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let mut features = Vec::new();

    let info = self.context.device_info.clone();
    features.push(
      Feature::builder("device_id", "Device ID", FeatureType::Sensor)
        .category(FeatureCategory::Debug)
        .getter(Arc::new(move || info_value(&info, "device_id")))
        .finish()?,
    );

    let has_state = info_value(&self.context.device_info, "device_on")
      .map(|value| !value.is_null())
      .unwrap_or(false);
    if has_state {
      let info = self.context.device_info.clone();
      let protocol = self.context.protocol.clone();
      features.push(
        Feature::builder("state", "State", FeatureType::Switch)
          .category(FeatureCategory::Primary)
          .getter(Arc::new(move || info_value(&info, "device_on")))
          .setter(Arc::new(move |value| {
            let protocol = protocol.clone();
            async move {
              let on = value.as_bool().ok_or_else(|| KasaError::FeatureValue {
                id: "state".to_owned(),
                reason: format!("{value} is not a boolean"),
              })?;
              query_helper(&protocol, "set_device_info", json!({"device_on": on})).await?;
              Ok(())
            }
            .boxed()
          }))
          .finish()?,
      );
    }

    let has_rssi = info_value(&self.context.device_info, "rssi")
      .map(|value| !value.is_null())
      .unwrap_or(false);
    if has_rssi {
      let info = self.context.device_info.clone();
      features.push(
        Feature::builder("rssi", "RSSI", FeatureType::Sensor)
          .category(FeatureCategory::Debug)
          .unit("dBm")
          .getter(Arc::new(move || info_value(&info, "rssi")))
          .finish()?,
      );
    }

    let has_ssid = info_value(&self.context.device_info, "ssid")
      .map(|value| !value.is_null())
      .unwrap_or(false);
    if has_ssid {
      let info = self.context.device_info.clone();
      features.push(
        Feature::builder("ssid", "SSID", FeatureType::Sensor)
          .category(FeatureCategory::Debug)
          .getter(Arc::new(move || {
            let encoded = info_value(&info, "ssid")?;
            Ok(decode_b64_field(&encoded))
          }))
          .finish()?,
      );
    }

    Ok(features)
  }
}

/// Device string fields like ssid/nickname arrive base64-encoded; fall back
/// to the raw value when the payload is not valid base64.
pub(crate) fn decode_b64_field(value: &Value) -> Value {
  use base64::engine::general_purpose::STANDARD as BASE64;
  use base64::Engine;
  let Some(encoded) = value.as_str() else {
    return value.clone();
  };
  match BASE64.decode(encoded).map(String::from_utf8) {
    Ok(Ok(decoded)) => Value::String(decoded),
    _ => value.clone(),
  }
}
