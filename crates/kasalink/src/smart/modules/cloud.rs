// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Cloud-connection state. Polled sparsely; the answer rarely changes and
//! some firmware is slow to produce it.

use crate::feature::{Feature, FeatureCategory, FeatureType};
use crate::module::ModuleData;
use crate::smart::module::{SmartModule, SmartModuleDescriptor};
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_protocol::QueryMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const NAME: &str = "Cloud";

pub const UPDATE_INTERVAL: Duration = Duration::from_secs(60);

pub fn descriptor() -> SmartModuleDescriptor {
  SmartModuleDescriptor {
    name: NAME,
    required_component: Some("cloud_connect"),
    minimum_version: 0,
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

impl SmartModule for CloudModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn query(&self) -> QueryMap {
    let mut queries = QueryMap::new();
    queries.insert("get_connect_cloud_state".to_owned(), Value::Null);
    queries
  }

  fn minimum_update_interval(&self) -> Duration {
    UPDATE_INTERVAL
  }

  fn post_update_hook(&self, data: &ModuleData) -> KasaResult<()> {
    let payload = data.unwrapped()?;
    let status = payload
      .get("status")
      .and_then(Value::as_i64)
      .ok_or_else(|| KasaError::Message("get_connect_cloud_state missing status".to_owned()))?;
    *self
      .connected
      .write()
      .expect("cloud state lock never poisoned") = Some(status == 0);
    Ok(())
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let connected = self.connected.clone();
    Ok(vec![
      Feature::builder("cloud_connection", "Cloud connection", FeatureType::BinarySensor)
        .category(FeatureCategory::Info)
        .getter(Arc::new(move || {
          connected
            .read()
            .expect("cloud state lock never poisoned")
            .map(Value::from)
            .ok_or_else(|| KasaError::NotNegotiated("cloud_connection".to_owned()))
        }))
        .finish()?,
    ])
  }
}
