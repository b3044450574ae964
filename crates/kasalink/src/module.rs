// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Engine-side module bookkeeping shared by the SMART and IOT devices:
//! response routing, failure isolation with disable cooldowns, and
//! response-size-driven batch packing.

use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_protocol::{MethodResult, QueryMap, ResponseMap};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

/// Consecutive failed cycles before a module is disabled.
pub const DISABLE_AFTER_ERROR_COUNT: u32 = 3;
/// How long a disabled module sits out before being reconsidered.
pub const MINIMUM_DISABLED_INTERVAL: Duration = Duration::from_secs(60);
/// Response size assumed for modules that do not estimate their own.
pub const DEFAULT_ESTIMATED_RESPONSE_SIZE: usize = 256;

/// The slice of a device-wide response belonging to one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleData {
  responses: ResponseMap,
}

impl ModuleData {
  pub fn new(responses: ResponseMap) -> Self {
    Self { responses }
  }

  pub fn responses(&self) -> &ResponseMap {
    &self.responses
  }

  pub fn is_empty(&self) -> bool {
    self.responses.is_empty()
  }

  /// True when the module polled and every one of its methods failed.
  pub fn all_errors(&self) -> bool {
    !self.responses.is_empty() && self.responses.values().all(MethodResult::is_error)
  }

  pub fn get(&self, method: &str) -> Option<&MethodResult> {
    self.responses.get(method)
  }

  /// Module data view: a single-method module sees that method's body
  /// directly, a multi-method module the filtered sub-map.
  pub fn unwrapped(&self) -> KasaResult<Value> {
    if self.responses.len() == 1 {
      let (method, result) = self
        .responses
        .iter()
        .next()
        .expect("len checked above");
      return match result {
        MethodResult::Response(value) => Ok(value.clone()),
        MethodResult::Error(code) => Err(KasaError::Device {
          host: method.clone(),
          code: *code,
        }),
      };
    }
    let mut map = Map::new();
    for (method, result) in &self.responses {
      if let MethodResult::Response(value) = result {
        map.insert(method.clone(), value.clone());
      }
    }
    Ok(Value::Object(map))
  }
}

/// Per-module engine state: polling throttle, error counter, disable state.
#[derive(Debug)]
pub(crate) struct ModuleRuntime<M: ?Sized> {
  pub(crate) module: Box<M>,
  disabled: bool,
  disabled_at: Option<Instant>,
  error_count: u32,
  last_update_error: Option<String>,
  last_polled: Option<Instant>,
}

impl<M: ?Sized> ModuleRuntime<M> {
  pub(crate) fn new(module: Box<M>) -> Self {
    Self {
      module,
      disabled: false,
      disabled_at: None,
      error_count: 0,
      last_update_error: None,
      last_polled: None,
    }
  }

  pub(crate) fn disabled(&self) -> bool {
    self.disabled
  }

  pub(crate) fn error_count(&self) -> u32 {
    self.error_count
  }

  pub(crate) fn last_update_error(&self) -> Option<&str> {
    self.last_update_error.as_deref()
  }

  /// Whether this module should contribute queries this cycle. Re-enables a
  /// disabled module once its cooldown has elapsed.
  pub(crate) fn should_poll(&mut self, now: Instant, minimum_interval: Duration) -> bool {
    if self.disabled {
      let cooled_down = self
        .disabled_at
        .map(|at| now.duration_since(at) >= MINIMUM_DISABLED_INTERVAL)
        .unwrap_or(true);
      if !cooled_down {
        return false;
      }
      self.disabled = false;
      self.disabled_at = None;
      self.error_count = 0;
    }
    if minimum_interval > Duration::ZERO {
      if let Some(last) = self.last_polled {
        if now.duration_since(last) < minimum_interval {
          return false;
        }
      }
    }
    true
  }

  pub(crate) fn record_polled(&mut self, now: Instant) {
    self.last_polled = Some(now);
  }

  pub(crate) fn record_success(&mut self) {
    self.error_count = 0;
    self.last_update_error = None;
  }

  pub(crate) fn record_failure(&mut self, now: Instant, error: String, name: &str) {
    self.error_count += 1;
    self.last_update_error = Some(error);
    if self.error_count >= DISABLE_AFTER_ERROR_COUNT {
      warn!(
        "Module {} failed {} consecutive cycles, disabling",
        name, self.error_count
      );
      self.disabled = true;
      self.disabled_at = Some(now);
    }
  }
}

/// Pack per-module queries into wire batches so no batch's estimated
/// response exceeds the device budget. A single oversized module still gets
/// a batch of its own.
pub(crate) fn pack_batches(
  queries: Vec<(QueryMap, usize)>,
  max_response_size: usize,
) -> Vec<QueryMap> {
  let mut batches: Vec<QueryMap> = Vec::new();
  let mut current = QueryMap::new();
  let mut current_size = 0usize;
  for (query, estimated_size) in queries {
    if query.is_empty() {
      continue;
    }
    if !current.is_empty() && current_size + estimated_size > max_response_size {
      batches.push(std::mem::take(&mut current));
      current_size = 0;
    }
    for (method, params) in query {
      current.insert(method, params);
    }
    current_size += estimated_size;
  }
  if !current.is_empty() {
    batches.push(current);
  }
  batches
}

/// Route a merged response map back to one module: keep only the methods it
/// asked for.
pub(crate) fn slice_for_module(queries: &QueryMap, responses: &ResponseMap) -> ModuleData {
  let mut slice = ResponseMap::new();
  for method in queries.keys() {
    if let Some(result) = responses.get(method) {
      slice.insert(method.clone(), result.clone());
    }
  }
  ModuleData::new(slice)
}

#[cfg(test)]
mod test {
  use super::*;
  use kasalink_core::errors::SmartErrorCode;
  use serde_json::json;

  fn query(methods: &[&str]) -> QueryMap {
    methods
      .iter()
      .map(|method| (method.to_string(), Value::Null))
      .collect()
  }

  #[test]
  fn packing_respects_budget() {
    let batches = pack_batches(
      vec![
        (query(&["a"]), 300),
        (query(&["b"]), 300),
        (query(&["c"]), 300),
        (query(&["d"]), 300),
      ],
      1024,
    );
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 3);
    assert_eq!(batches[1].len(), 1);
  }

  #[test]
  fn oversized_module_gets_own_batch() {
    let batches = pack_batches(vec![(query(&["a"]), 100), (query(&["b"]), 50_000)], 1024);
    assert_eq!(batches.len(), 2);
  }

  #[test]
  fn empty_queries_are_skipped() {
    let batches = pack_batches(vec![(QueryMap::new(), 256), (query(&["a"]), 256)], 1024);
    assert_eq!(batches.len(), 1);
  }

  #[test]
  fn runtime_disables_after_three_failures_and_cools_down() {
    let mut runtime: ModuleRuntime<str> = ModuleRuntime::new("test".into());
    let start = Instant::now();
    assert!(runtime.should_poll(start, Duration::ZERO));

    for _ in 0..DISABLE_AFTER_ERROR_COUNT {
      runtime.record_failure(start, "err".to_owned(), "test");
    }
    assert!(runtime.disabled());
    assert!(!runtime.should_poll(start + Duration::from_secs(1), Duration::ZERO));

    // After the cooldown the module is reconsidered.
    assert!(runtime.should_poll(start + MINIMUM_DISABLED_INTERVAL + Duration::from_secs(1), Duration::ZERO));
    assert!(!runtime.disabled());
    assert_eq!(runtime.error_count(), 0);
  }

  #[test]
  fn runtime_success_resets_consecutive_count() {
    let mut runtime: ModuleRuntime<str> = ModuleRuntime::new("test".into());
    let now = Instant::now();
    runtime.record_failure(now, "err".to_owned(), "test");
    runtime.record_failure(now, "err".to_owned(), "test");
    runtime.record_success();
    runtime.record_failure(now, "err".to_owned(), "test");
    assert!(!runtime.disabled());
  }

  #[test]
  fn runtime_respects_minimum_interval() {
    let mut runtime: ModuleRuntime<str> = ModuleRuntime::new("test".into());
    let start = Instant::now();
    assert!(runtime.should_poll(start, Duration::from_secs(60)));
    runtime.record_polled(start);
    assert!(!runtime.should_poll(start + Duration::from_secs(30), Duration::from_secs(60)));
    assert!(runtime.should_poll(start + Duration::from_secs(61), Duration::from_secs(60)));
  }

  #[test]
  fn module_data_unwraps_single_method() {
    let mut responses = ResponseMap::new();
    responses.insert(
      "get_energy_usage".to_owned(),
      MethodResult::Response(json!({"power_mw": 1000})),
    );
    let data = ModuleData::new(responses);
    assert_eq!(data.unwrapped().expect("ok"), json!({"power_mw": 1000}));
  }

  #[test]
  fn module_data_error_classification() {
    let mut responses = ResponseMap::new();
    responses.insert(
      "get_energy_usage".to_owned(),
      MethodResult::Error(SmartErrorCode::ParamsError),
    );
    let data = ModuleData::new(responses);
    assert!(data.all_errors());
    assert!(data.unwrapped().is_err());
  }
}
