// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Protocol framing over the wire transports.
//!
//! A protocol turns method-level queries into one or more wire round-trips:
//! flat JSON for the IOT generation, `multipleRequest` batches for SMART
//! devices and cameras. Per-sub-request device errors are surfaced as data
//! in the returned map rather than raised, so a batched update can succeed
//! partially; transient transport errors are retried with backoff, and an
//! invalid session buys one transport reset that does not count against the
//! retry budget.

#[macro_use]
extern crate log;

mod child;
mod iot;
mod smart;
mod smartcam;

pub use child::{ChildProtocolWrapper, ChildWrapperMode};
pub use iot::IotProtocol;
pub use smart::SmartProtocol;
pub use smartcam::SmartCamProtocol;

use async_trait::async_trait;
use kasalink_core::errors::{KasaError, KasaResult, SmartErrorCode};
use kasalink_core::util::json::merge_maps;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Queries keyed by method (SMART) or target (IOT); Null means "no params".
pub type QueryMap = Map<String, Value>;

/// Default retry budget for transient errors.
pub const DEFAULT_RETRY_COUNT: usize = 3;

/// One request: either a bare method name or a method→params map.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
  Method(String),
  Map(QueryMap),
}

impl Request {
  /// Normalize to a map form.
  pub fn into_map(self) -> QueryMap {
    match self {
      Request::Method(method) => {
        let mut map = Map::new();
        map.insert(method, Value::Null);
        map
      }
      Request::Map(map) => map,
    }
  }
}

impl From<&str> for Request {
  fn from(method: &str) -> Self {
    Request::Method(method.to_owned())
  }
}

impl From<String> for Request {
  fn from(method: String) -> Self {
    Request::Method(method)
  }
}

impl From<QueryMap> for Request {
  fn from(map: QueryMap) -> Self {
    Request::Map(map)
  }
}

/// Result of a single method inside a batch: a payload, or the device error
/// code reported for just that method.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
  Response(Value),
  Error(SmartErrorCode),
}

impl MethodResult {
  pub fn is_error(&self) -> bool {
    matches!(self, MethodResult::Error(_))
  }

  pub fn response(&self) -> Option<&Value> {
    match self {
      MethodResult::Response(value) => Some(value),
      MethodResult::Error(_) => None,
    }
  }

  pub fn error_code(&self) -> Option<SmartErrorCode> {
    match self {
      MethodResult::Response(_) => None,
      MethodResult::Error(code) => Some(*code),
    }
  }
}

/// Per-method results of one `query` call.
pub type ResponseMap = HashMap<String, MethodResult>;

/// Fold a response map into one JSON object, recursing into nested payloads
/// so independent sub-keys coexist. Errors are skipped; they are visible to
/// the module engine through the map itself.
pub fn response_map_to_value(responses: &ResponseMap) -> Value {
  let mut merged = Map::new();
  for (method, result) in responses {
    if let MethodResult::Response(value) = result {
      match value {
        Value::Object(obj) => {
          let mut nested = Map::new();
          nested.insert(method.clone(), Value::Object(obj.clone()));
          merge_maps(&mut merged, &nested);
        }
        other => {
          merged.insert(method.clone(), other.clone());
        }
      }
    }
  }
  Value::Object(merged)
}

#[async_trait]
pub trait Protocol: Send + Sync {
  /// Run one logical query (possibly batched on the wire) and return the
  /// per-method results.
  async fn query(&self, request: Request) -> KasaResult<ResponseMap> {
    self.query_with_retries(request, DEFAULT_RETRY_COUNT).await
  }

  async fn query_with_retries(&self, request: Request, retry_count: usize)
    -> KasaResult<ResponseMap>;

  /// Run several pre-split batches sequentially and merge the results into
  /// one map. The engine decides the split points based on its response
  /// size estimates.
  async fn query_batches(&self, batches: Vec<QueryMap>) -> KasaResult<ResponseMap> {
    let mut merged = ResponseMap::new();
    for batch in batches {
      if batch.is_empty() {
        continue;
      }
      let responses = self.query(Request::Map(batch)).await?;
      merged.extend(responses);
    }
    Ok(merged)
  }

  /// Release the underlying transport.
  async fn close(&self);
}

/// Backoff schedule shared by the protocol implementations: transient errors
/// sleep-and-retry up to the budget, an invalid session resets the transport
/// and grants a single extra attempt.
pub(crate) struct RetryState {
  attempts: usize,
  retry_count: usize,
  session_retry_used: bool,
}

impl RetryState {
  pub(crate) fn new(retry_count: usize) -> Self {
    Self {
      attempts: 0,
      retry_count,
      session_retry_used: false,
    }
  }

  /// Decide what to do with an error: Some(delay) means sleep and retry,
  /// None means give up.
  pub(crate) fn handle(&mut self, err: &KasaError) -> Option<Duration> {
    match err {
      KasaError::InvalidSession if !self.session_retry_used => {
        self.session_retry_used = true;
        Some(Duration::ZERO)
      }
      err if err.is_retryable() && self.attempts < self.retry_count => {
        self.attempts += 1;
        // 0.5s, 1s, 2s, then capped.
        let exponent = (self.attempts - 1).min(2) as u32;
        Some(Duration::from_millis(500 * 2u64.pow(exponent)))
      }
      _ => None,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use kasalink_core::errors::KasaConnectionError;

  #[test]
  fn request_normalization() {
    let from_name = Request::from("component_nego").into_map();
    assert_eq!(from_name.get("component_nego"), Some(&Value::Null));

    let mut map = Map::new();
    map.insert("get_device_info".to_owned(), Value::Null);
    assert_eq!(Request::from(map.clone()).into_map(), map);
  }

  #[test]
  fn retry_state_budget() {
    let mut state = RetryState::new(2);
    let transient: KasaError =
      KasaConnectionError::Timeout("1.2.3.4".to_owned(), 5).into();
    assert_eq!(state.handle(&transient), Some(Duration::from_millis(500)));
    assert_eq!(state.handle(&transient), Some(Duration::from_millis(1000)));
    assert_eq!(state.handle(&transient), None);
  }

  #[test]
  fn session_retry_is_free_and_single() {
    let mut state = RetryState::new(0);
    assert_eq!(state.handle(&KasaError::InvalidSession), Some(Duration::ZERO));
    assert_eq!(state.handle(&KasaError::InvalidSession), None);
  }

  #[test]
  fn response_map_folding_recurses() {
    let mut responses = ResponseMap::new();
    responses.insert(
      "system".to_owned(),
      MethodResult::Response(serde_json::json!({"get_sysinfo": {"relay_state": 1}})),
    );
    responses.insert(
      "emeter".to_owned(),
      MethodResult::Error(SmartErrorCode::ParamsError),
    );
    let value = response_map_to_value(&responses);
    assert_eq!(
      value,
      serde_json::json!({"system": {"get_sysinfo": {"relay_state": 1}}})
    );
  }
}
