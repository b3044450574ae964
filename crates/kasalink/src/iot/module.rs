// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Module contract for IOT devices. IOT queries are keyed by wire target
//! (`system`, `emeter`, `cnCloud`, ...) with the command map nested inside.

use crate::feature::Feature;
use crate::module::{ModuleData, DEFAULT_ESTIMATED_RESPONSE_SIZE};
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_protocol::{MethodResult, Protocol, QueryMap, Request};
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Latest sysinfo payload, shared between the device and modules whose
/// state rides in it (led, relay state).
pub type SharedSysInfo = Arc<RwLock<Map<String, Value>>>;

#[derive(Clone)]
pub struct IotModuleContext {
  pub protocol: Arc<dyn Protocol>,
  pub sys_info: SharedSysInfo,
}

pub trait IotModule: Send + Sync {
  fn name(&self) -> &'static str;

  /// Queries keyed by target; empty when satisfied by sysinfo.
  fn query(&self) -> QueryMap {
    QueryMap::new()
  }

  fn estimated_query_response_size(&self) -> usize {
    DEFAULT_ESTIMATED_RESPONSE_SIZE
  }

  fn minimum_update_interval(&self) -> Duration {
    Duration::ZERO
  }

  fn post_update_hook(&self, data: &ModuleData) -> KasaResult<()> {
    let _ = data;
    Ok(())
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    Ok(Vec::new())
  }
}

/// Registry entry. IOT firmware advertises capabilities as a
/// colon-delimited flag string in sysinfo (`"TIM:ENE"`); a module gated on
/// a flag is attached when the flag is present.
pub struct IotModuleDescriptor {
  pub name: &'static str,
  pub required_feature: Option<&'static str>,
  pub constructor: fn(IotModuleContext) -> Box<dyn IotModule>,
}

pub fn default_registry() -> &'static [IotModuleDescriptor] {
  static REGISTRY: Lazy<Vec<IotModuleDescriptor>> = Lazy::new(|| {
    vec![
      super::modules::emeter::descriptor(),
      super::modules::countdown::descriptor(),
      super::modules::cloud::descriptor(),
      super::modules::led::descriptor(),
    ]
  });
  &REGISTRY
}

/// Build a `{target: {command: params}}` query map.
pub fn target_query(target: &str, command: &str, params: Value) -> QueryMap {
  let mut queries = QueryMap::new();
  queries.insert(target.to_owned(), json!({command: params}));
  queries
}

/// Run one target/command pair and unwrap the command body, surfacing the
/// nested `err_code` as a typed error.
pub(crate) async fn query_helper(
  protocol: &Arc<dyn Protocol>,
  target: &str,
  command: &str,
  params: Value,
) -> KasaResult<Value> {
  let responses = protocol
    .query(Request::Map(target_query(target, command, params)))
    .await?;
  let body = match responses.get(target) {
    Some(MethodResult::Response(value)) => value.clone(),
    Some(MethodResult::Error(code)) => {
      return Err(KasaError::Device {
        host: target.to_owned(),
        code: *code,
      });
    }
    None => {
      return Err(KasaError::Message(format!(
        "Response for {target} missing from device reply"
      )));
    }
  };
  let command_body = body.get(command).cloned().unwrap_or(body);
  if let Some(code) = command_body.get("err_code").and_then(Value::as_i64) {
    if code != 0 {
      return Err(KasaError::Device {
        host: format!("{target}.{command}"),
        code: kasalink_core::errors::SmartErrorCode::from_code(code),
      });
    }
  }
  Ok(command_body)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn target_query_shape() {
    let queries = target_query("emeter", "get_realtime", Value::Null);
    assert_eq!(
      Value::Object(queries),
      json!({"emeter": {"get_realtime": null}})
    );
  }
}
