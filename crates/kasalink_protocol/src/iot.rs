// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Flat-JSON framing for the IOT (legacy Kasa) generation. One request per
//! round-trip; batching happens by merging targets into a single document.

use crate::{MethodResult, Protocol, Request, ResponseMap, RetryState};
use async_trait::async_trait;
use kasalink_core::errors::{KasaError, KasaProtocolError, KasaResult, SmartErrorCode};
use kasalink_transport::Transport;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::sleep;

pub struct IotProtocol {
  transport: Arc<dyn Transport>,
  host: String,
}

impl IotProtocol {
  pub fn new(host: &str, transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      host: host.to_owned(),
    }
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  async fn send_with_retries(&self, payload: &Value, retry_count: usize) -> KasaResult<Value> {
    let request = payload.to_string();
    let mut retry_state = RetryState::new(retry_count);
    loop {
      match self.transport.send(&request).await {
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
impl Protocol for IotProtocol {
  async fn query_with_retries(
    &self,
    request: Request,
    retry_count: usize,
  ) -> KasaResult<ResponseMap> {
    let queries = request.into_map();
    if queries.is_empty() {
      return Ok(ResponseMap::new());
    }
    let payload = Value::Object(queries);
    let response = self.send_with_retries(&payload, retry_count).await?;

    let Value::Object(targets) = response else {
      return Err(
        KasaProtocolError::ResponseDecode(self.host.clone(), "response is not an object".to_owned())
          .into(),
      );
    };

    let mut map = ResponseMap::new();
    for (target, body) in targets {
      // A target-level err_code means the whole module is missing; command
      // level codes stay in the payload for the module to inspect.
      let code = body.get("err_code").and_then(Value::as_i64).unwrap_or(0);
      if code != 0 {
        debug!("Target {} on {} reported err_code {}", target, self.host, code);
        map.insert(target, MethodResult::Error(SmartErrorCode::from_code(code)));
      } else {
        map.insert(target, MethodResult::Response(body));
      }
    }
    Ok(map)
  }

  async fn close(&self) {
    self.transport.close().await;
  }
}
