// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Protocol adapter that routes a child device's requests through its
//! parent's transport. Wrapping adds no round-trips: a batch of child
//! queries still travels as one `control_child` request.

use crate::smart::parse_sub_responses;
use crate::{MethodResult, Protocol, Request, ResponseMap};
use async_trait::async_trait;
use kasalink_core::errors::{KasaError, KasaProtocolError, KasaResult, SmartErrorCode};
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildWrapperMode {
  /// SMART hubs/strips: nest under `control_child`/`requestData`.
  Smart,
  /// IOT strips: tag the flat request with `context.child_ids`.
  Iot,
}

pub struct ChildProtocolWrapper {
  child_id: String,
  parent: Arc<dyn Protocol>,
  mode: ChildWrapperMode,
}

impl ChildProtocolWrapper {
  pub fn new(child_id: &str, parent: Arc<dyn Protocol>, mode: ChildWrapperMode) -> Self {
    Self {
      child_id: child_id.to_owned(),
      parent,
      mode,
    }
  }

  pub fn child_id(&self) -> &str {
    &self.child_id
  }

  fn child_gone(&self) -> KasaError {
    KasaError::ChildDeviceGone(self.child_id.clone())
  }

  async fn query_smart(
    &self,
    queries: Vec<(String, Value)>,
    retry_count: usize,
  ) -> KasaResult<ResponseMap> {
    let request_data = if let [(method, params)] = queries.as_slice() {
      json!({"method": method, "params": params})
    } else {
      let requests: Vec<Value> = queries
        .iter()
        .map(|(method, params)| json!({"method": method, "params": params}))
        .collect();
      json!({"method": "multipleRequest", "params": {"requests": requests}})
    };

    let mut control = Map::new();
    control.insert(
      "control_child".to_owned(),
      json!({"device_id": self.child_id, "requestData": request_data}),
    );
    let parent_responses = match self
      .parent
      .query_with_retries(Request::Map(control), retry_count)
      .await
    {
      Ok(responses) => responses,
      Err(KasaError::Device {
        code: SmartErrorCode::DeviceNotFound,
        ..
      }) => return Err(self.child_gone()),
      Err(err) => return Err(err),
    };

    let control_result = parent_responses.get("control_child").ok_or_else(|| {
      KasaError::from(KasaProtocolError::MissingKey(
        self.child_id.clone(),
        "control_child".to_owned(),
      ))
    })?;

    let value = match control_result {
      MethodResult::Error(SmartErrorCode::DeviceNotFound) => return Err(self.child_gone()),
      // The parent rejected the wrapped call as a whole; every child method
      // failed this cycle.
      MethodResult::Error(code) => {
        return Ok(
          queries
            .into_iter()
            .map(|(method, _)| (method, MethodResult::Error(*code)))
            .collect(),
        );
      }
      MethodResult::Response(value) => value,
    };

    let response_data = value.get("responseData").unwrap_or(value);
    let code = response_data
      .get("error_code")
      .and_then(Value::as_i64)
      .map(SmartErrorCode::from_code)
      .unwrap_or(SmartErrorCode::Success);
    if code == SmartErrorCode::DeviceNotFound {
      return Err(self.child_gone());
    }
    if !code.is_success() {
      return Ok(
        queries
          .into_iter()
          .map(|(method, _)| (method, MethodResult::Error(code)))
          .collect(),
      );
    }

    let responses = if let [(method, _)] = queries.as_slice() {
      let mut map = ResponseMap::new();
      map.insert(
        method.clone(),
        MethodResult::Response(response_data.get("result").cloned().unwrap_or(Value::Null)),
      );
      map
    } else {
      let result = response_data.get("result").cloned().unwrap_or(Value::Null);
      parse_sub_responses(&self.child_id, &result)?
    };

    if responses
      .values()
      .any(|result| result.error_code() == Some(SmartErrorCode::DeviceNotFound))
    {
      return Err(self.child_gone());
    }
    Ok(responses)
  }

  async fn query_iot(
    &self,
    mut queries: Map<String, Value>,
    retry_count: usize,
  ) -> KasaResult<ResponseMap> {
    queries.insert(
      "context".to_owned(),
      json!({"child_ids": [self.child_id]}),
    );
    let mut responses = self
      .parent
      .query_with_retries(Request::Map(queries), retry_count)
      .await?;
    responses.remove("context");
    Ok(responses)
  }
}

#[async_trait]
impl Protocol for ChildProtocolWrapper {
  async fn query_with_retries(
    &self,
    request: Request,
    retry_count: usize,
  ) -> KasaResult<ResponseMap> {
    let queries = request.into_map();
    if queries.is_empty() {
      return Ok(ResponseMap::new());
    }
    match self.mode {
      ChildWrapperMode::Smart => {
        self
          .query_smart(queries.into_iter().collect(), retry_count)
          .await
      }
      ChildWrapperMode::Iot => self.query_iot(queries, retry_count).await,
    }
  }

  /// The parent owns the transport; a child going away must not tear the
  /// shared session down.
  async fn close(&self) {}
}

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::Mutex;

  /// Parent protocol that records the wrapped request and plays back a
  /// canned response.
  struct RecordingParent {
    seen: Mutex<Vec<QueryEntry>>,
    response: ResponseMap,
  }

  type QueryEntry = Map<String, Value>;

  #[async_trait]
  impl Protocol for RecordingParent {
    async fn query_with_retries(
      &self,
      request: Request,
      _retry_count: usize,
    ) -> KasaResult<ResponseMap> {
      self.seen.lock().expect("test mutex").push(request.into_map());
      Ok(self.response.clone())
    }

    async fn close(&self) {}
  }

  fn smart_parent(response: ResponseMap) -> Arc<RecordingParent> {
    Arc::new(RecordingParent {
      seen: Mutex::new(Vec::new()),
      response,
    })
  }

  #[tokio::test]
  async fn smart_batch_travels_as_one_control_child() {
    let mut parent_response = ResponseMap::new();
    parent_response.insert(
      "control_child".to_owned(),
      MethodResult::Response(json!({
        "responseData": {
          "error_code": 0,
          "result": {
            "responses": [
              {"method": "get_device_info", "result": {"device_on": true}, "error_code": 0},
              {"method": "get_energy_usage", "result": {"power_mw": 500}, "error_code": 0}
            ]
          }
        }
      })),
    );
    let parent = smart_parent(parent_response);
    let wrapper = ChildProtocolWrapper::new("child-1", parent.clone(), ChildWrapperMode::Smart);

    let mut queries = Map::new();
    queries.insert("get_device_info".to_owned(), Value::Null);
    queries.insert("get_energy_usage".to_owned(), Value::Null);
    let responses = wrapper.query(Request::Map(queries)).await.expect("query");

    assert_eq!(responses.len(), 2);
    assert!(!responses["get_device_info"].is_error());

    let seen = parent.seen.lock().expect("test mutex");
    assert_eq!(seen.len(), 1, "one wrapped round trip");
    let wrapped = &seen[0]["control_child"];
    assert_eq!(wrapped["device_id"], json!("child-1"));
    assert_eq!(wrapped["requestData"]["method"], json!("multipleRequest"));
  }

  #[tokio::test]
  async fn device_not_found_translates_to_child_gone() {
    let mut parent_response = ResponseMap::new();
    parent_response.insert(
      "control_child".to_owned(),
      MethodResult::Response(json!({
        "responseData": {"error_code": -2600}
      })),
    );
    let wrapper = ChildProtocolWrapper::new(
      "child-err",
      smart_parent(parent_response),
      ChildWrapperMode::Smart,
    );
    let result = wrapper.query(Request::from("get_device_info")).await;
    assert!(matches!(result, Err(KasaError::ChildDeviceGone(id)) if id == "child-err"));
  }

  #[tokio::test]
  async fn iot_mode_tags_context() {
    let mut parent_response = ResponseMap::new();
    parent_response.insert(
      "system".to_owned(),
      MethodResult::Response(json!({"get_sysinfo": {"relay_state": 0}})),
    );
    let parent = smart_parent(parent_response);
    let wrapper = ChildProtocolWrapper::new("800600...01", parent.clone(), ChildWrapperMode::Iot);

    let mut queries = Map::new();
    queries.insert("system".to_owned(), json!({"get_sysinfo": null}));
    let responses = wrapper.query(Request::Map(queries)).await.expect("query");
    assert!(responses.contains_key("system"));
    assert!(!responses.contains_key("context"));

    let seen = parent.seen.lock().expect("test mutex");
    assert_eq!(seen[0]["context"]["child_ids"], json!(["800600...01"]));
  }
}
