// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! `multipleRequest` framing for SMART (Tapo and newer Kasa) devices.

use crate::{MethodResult, Protocol, Request, ResponseMap, RetryState};
use async_trait::async_trait;
use kasalink_core::errors::{
  KasaAuthenticationError, KasaError, KasaProtocolError, KasaResult, SmartErrorCode,
};
use kasalink_transport::Transport;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::sleep;

/// Methods per wire batch. Firmware rejects overlong request lists well
/// before the response size budget kicks in.
pub const DEFAULT_BATCH_SIZE: usize = 5;

pub struct SmartProtocol {
  transport: Arc<dyn Transport>,
  host: String,
  batch_size: usize,
}

impl SmartProtocol {
  pub fn new(host: &str, transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      host: host.to_owned(),
      batch_size: DEFAULT_BATCH_SIZE,
    }
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  async fn send_with_retries(&self, payload: &Value, retry_count: usize) -> KasaResult<Value> {
    let request = payload.to_string();
    let mut retry_state = RetryState::new(retry_count);
    loop {
      let result = self
        .transport
        .send(&request)
        .await
        .and_then(|response| check_whole_response(&self.host, response));
      match result {
        Ok(response) => return Ok(response),
        Err(err) => match retry_state.handle(&err) {
          Some(delay) => {
            if matches!(err, KasaError::InvalidSession) {
              debug!("Resetting transport to {} after expired session", self.host);
              self.transport.reset().await;
            } else {
              debug!("Retrying {} after {:?}: {}", self.host, delay, err);
            }
            if !delay.is_zero() {
              sleep(delay).await;
            }
          }
          None => return Err(err),
        },
      }
    }
  }

  async fn execute_chunk(
    &self,
    chunk: &[(String, Value)],
    retry_count: usize,
  ) -> KasaResult<ResponseMap> {
    let payload = if chunk.len() == 1 {
      let (method, params) = &chunk[0];
      json!({"method": method, "params": params})
    } else {
      let requests: Vec<Value> = chunk
        .iter()
        .map(|(method, params)| json!({"method": method, "params": params}))
        .collect();
      json!({"method": "multipleRequest", "params": {"requests": requests}})
    };

    let envelope = self.send_with_retries(&payload, retry_count).await?;
    let result = envelope.get("result").cloned().unwrap_or(Value::Null);

    if chunk.len() == 1 {
      let mut responses = ResponseMap::new();
      responses.insert(chunk[0].0.clone(), MethodResult::Response(result));
      return Ok(responses);
    }
    parse_sub_responses(&self.host, &result)
  }
}

#[async_trait]
impl Protocol for SmartProtocol {
  async fn query_with_retries(
    &self,
    request: Request,
    retry_count: usize,
  ) -> KasaResult<ResponseMap> {
    let queries: Vec<(String, Value)> = request.into_map().into_iter().collect();
    if queries.is_empty() {
      return Ok(ResponseMap::new());
    }
    let mut merged = ResponseMap::new();
    for chunk in queries.chunks(self.batch_size) {
      merged.extend(self.execute_chunk(chunk, retry_count).await?);
    }
    Ok(merged)
  }

  async fn close(&self) {
    self.transport.close().await;
  }
}

/// Interpret the whole-response `error_code` of a SMART envelope.
pub(crate) fn check_whole_response(host: &str, response: Value) -> KasaResult<Value> {
  let raw = response.get("error_code").and_then(Value::as_i64).unwrap_or(0);
  let code = SmartErrorCode::from_code(raw);
  if code.is_success() {
    Ok(response)
  } else if code.is_session_error() {
    Err(KasaError::InvalidSession)
  } else if code.is_auth_error() {
    Err(KasaAuthenticationError::LoginFailed(host.to_owned(), code.to_string()).into())
  } else {
    Err(KasaError::Device {
      host: host.to_owned(),
      code,
    })
  }
}

/// Split a `multipleRequest` result into per-method results. Sub-request
/// errors become data, not errors, so sibling methods survive.
pub(crate) fn parse_sub_responses(host: &str, result: &Value) -> KasaResult<ResponseMap> {
  // Most firmware nests the list under "responses"; a few strip models
  // return the bare list.
  let responses = match result {
    Value::Array(list) => list.as_slice(),
    Value::Object(_) => result
      .get("responses")
      .and_then(Value::as_array)
      .map(Vec::as_slice)
      .ok_or_else(|| {
        KasaError::from(KasaProtocolError::MissingKey(
          host.to_owned(),
          "result.responses".to_owned(),
        ))
      })?,
    _ => {
      return Err(
        KasaProtocolError::ResponseDecode(host.to_owned(), "batch result is not a list".to_owned())
          .into(),
      );
    }
  };

  let mut map = ResponseMap::new();
  for entry in responses {
    let Some(method) = entry.get("method").and_then(Value::as_str) else {
      warn!("Skipping batch response without a method name from {}", host);
      continue;
    };
    let code = entry.get("error_code").and_then(Value::as_i64).unwrap_or(0);
    let code = SmartErrorCode::from_code(code);
    let result = if code.is_success() {
      MethodResult::Response(entry.get("result").cloned().unwrap_or(Value::Null))
    } else {
      debug!("Method {} on {} reported {}", method, host, code);
      MethodResult::Error(code)
    };
    map.insert(method.to_owned(), result);
  }
  Ok(map)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn sub_response_errors_are_data() {
    let result = json!({
      "responses": [
        {"method": "get_device_info", "result": {"device_on": true}, "error_code": 0},
        {"method": "get_energy_usage", "error_code": -1008}
      ]
    });
    let parsed = parse_sub_responses("1.2.3.4", &result).expect("parses");
    assert_eq!(parsed.len(), 2);
    assert!(!parsed["get_device_info"].is_error());
    assert_eq!(
      parsed["get_energy_usage"].error_code(),
      Some(SmartErrorCode::ParamsError)
    );
  }

  #[test]
  fn bare_list_results_are_accepted() {
    let result = json!([
      {"method": "get_device_info", "result": {}, "error_code": 0}
    ]);
    let parsed = parse_sub_responses("1.2.3.4", &result).expect("parses");
    assert!(parsed.contains_key("get_device_info"));
  }

  #[test]
  fn whole_response_classification() {
    assert!(check_whole_response("h", json!({"error_code": 0, "result": {}})).is_ok());
    assert!(matches!(
      check_whole_response("h", json!({"error_code": 9999})),
      Err(KasaError::InvalidSession)
    ));
    assert!(matches!(
      check_whole_response("h", json!({"error_code": -1301})),
      Err(KasaError::Device { .. })
    ));
  }
}
