// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Cloud binding state for IOT devices.

use crate::feature::{Feature, FeatureType};
use crate::iot::module::{target_query, IotModule, IotModuleDescriptor};
use crate::module::ModuleData;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_protocol::QueryMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const NAME: &str = "Cloud";
pub const TARGET: &str = "cnCloud";

pub fn descriptor() -> IotModuleDescriptor {
  IotModuleDescriptor {
    name: NAME,
    required_feature: None,
    constructor: |_context| {
      Box::new(CloudModule {
        connected: Arc::new(RwLock::new(None)),
      })
    },
  }
}

pub struct CloudModule {
  connected: Arc<RwLock<Option<bool>>>,
}

impl IotModule for CloudModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn query(&self) -> QueryMap {
    target_query(TARGET, "get_info", Value::Null)
  }

  fn minimum_update_interval(&self) -> Duration {
    Duration::from_secs(60)
  }

  fn post_update_hook(&self, data: &ModuleData) -> KasaResult<()> {
    let body = data.unwrapped()?;
    let bound = body
      .pointer("/get_info/binded")
      .and_then(Value::as_i64)
      .ok_or_else(|| KasaError::Message("cnCloud get_info missing binded".to_owned()))?;
    *self.connected.write().expect("cloud lock never poisoned") = Some(bound == 1);
    Ok(())
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let connected = self.connected.clone();
    Ok(vec![
      Feature::builder("cloud_connection", "Cloud connection", FeatureType::BinarySensor)
        .getter(Arc::new(move || {
          connected
            .read()
            .expect("cloud lock never poisoned")
            .map(Value::from)
            .ok_or_else(|| KasaError::NotNegotiated("cloud_connection".to_owned()))
        }))
        .finish()?,
    ])
  }
}
