// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Countdown timer rules. Not every plug firmware ships the target; the
//! engine's error isolation disables the module on the ones that do not.

use crate::iot::module::{query_helper, target_query, IotModule, IotModuleContext, IotModuleDescriptor};
use crate::module::ModuleData;
use kasalink_core::errors::KasaResult;
use kasalink_protocol::QueryMap;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};

pub const NAME: &str = "Countdown";
pub const TARGET: &str = "count_down";

pub fn descriptor() -> IotModuleDescriptor {
  IotModuleDescriptor {
    name: NAME,
    required_feature: None,
    constructor: |context| {
      Box::new(CountdownModule {
        context,
        rules: Arc::new(RwLock::new(Vec::new())),
      })
    },
  }
}

pub struct CountdownModule {
  context: IotModuleContext,
  rules: Arc<RwLock<Vec<Value>>>,
}

impl IotModule for CountdownModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn query(&self) -> QueryMap {
    target_query(TARGET, "get_rules", Value::Null)
  }

  fn post_update_hook(&self, data: &ModuleData) -> KasaResult<()> {
    let body = data.unwrapped()?;
    let rules = body
      .pointer("/get_rules/rule_list")
      .and_then(Value::as_array)
      .cloned()
      .unwrap_or_default();
    *self.rules.write().expect("countdown lock never poisoned") = rules;
    Ok(())
  }
}

impl CountdownModule {
  pub fn rules(&self) -> Vec<Value> {
    self.rules.read().expect("countdown lock never poisoned").clone()
  }

  /// Schedule a state change `delay` seconds from now.
  pub async fn add_rule(&self, delay_secs: u32, turn_on: bool) -> KasaResult<Value> {
    query_helper(
      &self.context.protocol,
      TARGET,
      "add_rule",
      json!({"enable": 1, "delay": delay_secs, "act": i32::from(turn_on), "name": "countdown"}),
    )
    .await
  }

  pub async fn delete_all_rules(&self) -> KasaResult<()> {
    query_helper(&self.context.protocol, TARGET, "delete_all_rules", Value::Null).await?;
    Ok(())
  }
}
