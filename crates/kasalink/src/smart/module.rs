// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Module contract for SMART devices and the process-wide module registry.

use crate::feature::Feature;
use crate::module::{ModuleData, DEFAULT_ESTIMATED_RESPONSE_SIZE};
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_protocol::{MethodResult, Protocol, QueryMap, Request};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Latest `get_device_info` payload, shared between the device and the
/// modules whose state rides in it (brightness, color temperature, ...).
pub type SharedDeviceInfo = Arc<RwLock<Map<String, Value>>>;

/// Everything a module needs at construction time. The protocol reference
/// is the device's own (a child wrapper for child devices), so module
/// operations land on the right wire path automatically.
#[derive(Clone)]
pub struct SmartModuleContext {
  pub protocol: Arc<dyn Protocol>,
  pub component_version: u32,
  pub device_info: SharedDeviceInfo,
}

pub trait SmartModule: Send + Sync {
  fn name(&self) -> &'static str;

  /// Queries to contribute this cycle; empty when the module is satisfied
  /// by the shared device info.
  fn query(&self) -> QueryMap {
    QueryMap::new()
  }

  /// Estimate for the engine's batch packing.
  fn estimated_query_response_size(&self) -> usize {
    DEFAULT_ESTIMATED_RESPONSE_SIZE
  }

  /// Polling throttle; zero polls every cycle.
  fn minimum_update_interval(&self) -> Duration {
    Duration::ZERO
  }

  /// Parse and cache derived state after a cycle this module queried in.
  fn post_update_hook(&self, data: &ModuleData) -> KasaResult<()> {
    let _ = data;
    Ok(())
  }

  /// Features to register, called exactly once after the first update.
  fn features(&self) -> KasaResult<Vec<Feature>> {
    Ok(Vec::new())
  }
}

/// Registry entry. The registry is a static list walked during component
/// negotiation; a module is attached when its required component is present
/// at or above the minimum version.
pub struct SmartModuleDescriptor {
  pub name: &'static str,
  pub required_component: Option<&'static str>,
  pub minimum_version: u32,
  pub constructor: fn(SmartModuleContext) -> Box<dyn SmartModule>,
}

pub fn default_registry() -> &'static [SmartModuleDescriptor] {
  static REGISTRY: Lazy<Vec<SmartModuleDescriptor>> = Lazy::new(|| {
    vec![
      super::modules::device_module::descriptor(),
      super::modules::child_device::descriptor(),
      super::modules::energy::descriptor(),
      super::modules::brightness::descriptor(),
      super::modules::color_temperature::descriptor(),
      super::modules::time::descriptor(),
      super::modules::cloud::descriptor(),
      super::modules::overheat::descriptor(),
    ]
  });
  &REGISTRY
}

/// Run a single method through the device's protocol and unwrap its result;
/// a per-method error code becomes a typed device error here because the
/// caller asked for exactly this method.
pub(crate) async fn query_helper(
  protocol: &Arc<dyn Protocol>,
  method: &str,
  params: Value,
) -> KasaResult<Value> {
  let mut queries = QueryMap::new();
  queries.insert(method.to_owned(), params);
  let responses = protocol.query(Request::Map(queries)).await?;
  match responses.get(method) {
    Some(MethodResult::Response(value)) => Ok(value.clone()),
    Some(MethodResult::Error(code)) => Err(KasaError::Device {
      host: method.to_owned(),
      code: *code,
    }),
    None => Err(KasaError::Message(format!(
      "Response for {method} missing from device reply"
    ))),
  }
}

/// Read one key out of the shared device info, with the typed
/// not-yet-updated error when the info has not been fetched.
pub(crate) fn info_value(info: &SharedDeviceInfo, key: &str) -> KasaResult<Value> {
  let info = info.read().expect("device info lock never poisoned");
  if info.is_empty() {
    return Err(KasaError::NotNegotiated(key.to_owned()));
  }
  Ok(info.get(key).cloned().unwrap_or(Value::Null))
}
