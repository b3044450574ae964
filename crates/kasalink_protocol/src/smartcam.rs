// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Camera flavor of the SMART framing. Cameras use the same
//! `multipleRequest` outer shape but mixed-case method names
//! (`getDeviceInfo`), reject null `params`, and report sub-results matched
//! by method name.

use crate::smart::{check_whole_response, parse_sub_responses};
use crate::{MethodResult, Protocol, Request, ResponseMap, RetryState};
use async_trait::async_trait;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_transport::Transport;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::sleep;

pub struct SmartCamProtocol {
  transport: Arc<dyn Transport>,
  host: String,
}

impl SmartCamProtocol {
  pub fn new(host: &str, transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      host: host.to_owned(),
    }
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  fn request_entry(method: &str, params: &Value) -> Value {
    // Cameras reject an explicit null params field.
    match params {
      Value::Null => json!({"method": method}),
      params => json!({"method": method, "params": params}),
    }
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
}

#[async_trait]
impl Protocol for SmartCamProtocol {
  async fn query_with_retries(
    &self,
    request: Request,
    retry_count: usize,
  ) -> KasaResult<ResponseMap> {
    let queries: Vec<(String, Value)> = request.into_map().into_iter().collect();
    if queries.is_empty() {
      return Ok(ResponseMap::new());
    }

    if let [(method, params)] = queries.as_slice() {
      let payload = Self::request_entry(method, params);
      let envelope = self.send_with_retries(&payload, retry_count).await?;
      let mut responses = ResponseMap::new();
      responses.insert(
        method.clone(),
        MethodResult::Response(envelope.get("result").cloned().unwrap_or(Value::Null)),
      );
      return Ok(responses);
    }

    let requests: Vec<Value> = queries
      .iter()
      .map(|(method, params)| Self::request_entry(method, params))
      .collect();
    let payload = json!({"method": "multipleRequest", "params": {"requests": requests}});
    let envelope = self.send_with_retries(&payload, retry_count).await?;
    let result = envelope.get("result").cloned().unwrap_or(Value::Null);
    parse_sub_responses(&self.host, &result)
  }

  async fn close(&self) {
    self.transport.close().await;
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn null_params_are_omitted() {
    let entry = SmartCamProtocol::request_entry("getDeviceInfo", &Value::Null);
    assert_eq!(entry, json!({"method": "getDeviceInfo"}));
    let entry = SmartCamProtocol::request_entry(
      "getDeviceInfo",
      &json!({"device_info": {"name": ["basic_info"]}}),
    );
    assert!(entry.get("params").is_some());
  }
}
