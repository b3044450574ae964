// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Device clock readout.

use crate::feature::{Feature, FeatureType};
use crate::module::ModuleData;
use crate::smart::module::{SmartModule, SmartModuleDescriptor};
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_protocol::QueryMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};

pub const NAME: &str = "Time";

pub fn descriptor() -> SmartModuleDescriptor {
  SmartModuleDescriptor {
    name: NAME,
    required_component: Some("time"),
    minimum_version: 0,
    constructor: |_context| {
      Box::new(TimeModule {
        state: Arc::new(RwLock::new(None)),
      })
    },
  }
}

#[derive(Debug, Clone)]
struct TimeState {
  timestamp: i64,
  timezone_offset_min: Option<i64>,
  region: Option<String>,
}

pub struct TimeModule {
  state: Arc<RwLock<Option<TimeState>>>,
}

impl SmartModule for TimeModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn query(&self) -> QueryMap {
    let mut queries = QueryMap::new();
    queries.insert("get_device_time".to_owned(), Value::Null);
    queries
  }

  fn post_update_hook(&self, data: &ModuleData) -> KasaResult<()> {
    let payload = data.unwrapped()?;
    let timestamp = payload
      .get("timestamp")
      .and_then(Value::as_i64)
      .ok_or_else(|| KasaError::Message("get_device_time missing timestamp".to_owned()))?;
    *self.state.write().expect("time state lock never poisoned") = Some(TimeState {
      timestamp,
      timezone_offset_min: payload.get("time_diff").and_then(Value::as_i64),
      region: payload
        .get("region")
        .and_then(Value::as_str)
        .map(str::to_owned),
    });
    Ok(())
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let state = self.state.clone();
    Ok(vec![
      Feature::builder("device_time", "Device time", FeatureType::Sensor)
        .getter(Arc::new(move || {
          state
            .read()
            .expect("time state lock never poisoned")
            .as_ref()
            .map(|time| Value::from(time.timestamp))
            .ok_or_else(|| KasaError::NotNegotiated("device_time".to_owned()))
        }))
        .finish()?,
    ])
  }
}

impl TimeModule {
  /// Unix timestamp in device-local time, with the reported UTC offset.
  pub fn time(&self) -> KasaResult<(i64, Option<i64>)> {
    self
      .state
      .read()
      .expect("time state lock never poisoned")
      .as_ref()
      .map(|time| (time.timestamp, time.timezone_offset_min))
      .ok_or_else(|| KasaError::NotNegotiated("device_time".to_owned()))
  }

  pub fn region(&self) -> Option<String> {
    self
      .state
      .read()
      .expect("time state lock never poisoned")
      .as_ref()
      .and_then(|time| time.region.clone())
  }
}
