// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Scriptable SMART device: answers `component_nego`, `get_device_info`,
//! `multipleRequest`, child control and the module getters, with per-method
//! error injection and session-expiry injection.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_transport::Transport;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub struct FakeChildState {
  pub info: Map<String, Value>,
  pub components: Vec<(String, u32)>,
  pub extras: HashMap<String, Value>,
}

impl FakeChildState {
  pub fn plug(device_id: &str, on: bool) -> Self {
    let mut info = Map::new();
    info.insert("device_id".to_owned(), json!(device_id));
    info.insert("category".to_owned(), json!("plug.powerstrip.sub-plug"));
    info.insert("device_on".to_owned(), json!(on));
    info.insert("nickname".to_owned(), json!(BASE64.encode(format!("Socket {device_id}"))));
    Self {
      info,
      components: vec![("device".to_owned(), 1)],
      extras: HashMap::new(),
    }
  }

  pub fn plug_with_energy(device_id: &str, power_mw: i64) -> Self {
    let mut child = Self::plug(device_id, true);
    child.components.push(("energy_monitoring".to_owned(), 1));
    child.extras.insert(
      "get_energy_usage".to_owned(),
      json!({"today_energy": 10, "month_energy": 100, "current_power": power_mw}),
    );
    child
  }

  pub fn sensor(device_id: &str) -> Self {
    let mut info = Map::new();
    info.insert("device_id".to_owned(), json!(device_id));
    info.insert("category".to_owned(), json!("subg.trigger.contact-sensor"));
    info.insert("nickname".to_owned(), json!(BASE64.encode("Door sensor")));
    Self {
      info,
      components: vec![("device".to_owned(), 1)],
      extras: HashMap::new(),
    }
  }
}

/// Device-side state and request handler, shared between the in-process
/// transport and the KLAP HTTP server.
pub struct FakeSmartState {
  pub components: Vec<(String, u32)>,
  pub device_info: Mutex<Map<String, Value>>,
  pub extras: Mutex<HashMap<String, Value>>,
  pub method_errors: Mutex<HashMap<String, i64>>,
  pub children: Mutex<Vec<FakeChildState>>,
}

impl FakeSmartState {
  pub fn new(components: &[(&str, u32)], device_info: Value) -> Self {
    let info = device_info
      .as_object()
      .cloned()
      .expect("device info fixture is an object");
    Self {
      components: components
        .iter()
        .map(|(id, version)| (id.to_string(), *version))
        .collect(),
      device_info: Mutex::new(info),
      extras: Mutex::new(HashMap::new()),
      method_errors: Mutex::new(HashMap::new()),
      children: Mutex::new(Vec::new()),
    }
  }

  /// A dimmable color bulb, enough components to exercise most modules.
  pub fn bulb() -> Self {
    let state = Self::new(
      &[
        ("device", 2),
        ("brightness", 1),
        ("color_temperature", 1),
        ("time", 1),
        ("cloud_connect", 1),
        ("overheat_protection", 1),
      ],
      json!({
        "device_id": "8022ABCDEF",
        "model": "L530E",
        "type": "SMART.TAPOBULB",
        "device_on": true,
        "brightness": 50,
        "color_temp": 2700,
        "color_temp_range": [2500, 6500],
        "overheat_status": "normal",
        "rssi": -44,
        "signal_level": 3,
        "ssid": BASE64.encode("#TestNet"),
        "nickname": BASE64.encode("Living Room Bulb"),
      }),
    );
    state.put_extra("get_device_time", json!({"timestamp": 1700000000i64, "time_diff": 60, "region": "Europe/Berlin"}));
    state.put_extra("get_connect_cloud_state", json!({"status": 0}));
    state
  }

  /// An energy-reporting plug.
  pub fn plug_with_energy() -> Self {
    let state = Self::new(
      &[("device", 2), ("energy_monitoring", 2), ("time", 1)],
      json!({
        "device_id": "8031FEDCBA",
        "model": "P110",
        "type": "SMART.TAPOPLUG",
        "device_on": true,
        "on_time": 120,
        "overheated": false,
        "rssi": -51,
        "nickname": BASE64.encode("Desk Plug"),
      }),
    );
    state.put_extra("get_device_time", json!({"timestamp": 1700000000i64, "time_diff": 60}));
    state.put_extra(
      "get_energy_usage",
      json!({"today_energy": 18, "month_energy": 420, "current_power": 2700}),
    );
    state.put_extra("get_current_power", json!({"current_power": 2700}));
    state
  }

  /// A child-bearing device; device type (strip vs hub) falls out of the
  /// children's categories.
  pub fn with_children(children: Vec<FakeChildState>) -> Self {
    let state = Self::new(
      &[("device", 2), ("child_device", 1), ("control_child", 1)],
      json!({
        "device_id": "8006PARENT",
        "model": "P300",
        "type": "SMART.TAPOPLUG",
        "device_on": true,
        "nickname": BASE64.encode("Power Strip"),
      }),
    );
    *state.children.lock().expect("test mutex") = children;
    state
  }

  pub fn put_extra(&self, method: &str, response: Value) {
    self
      .extras
      .lock()
      .expect("test mutex")
      .insert(method.to_owned(), response);
  }

  pub fn set_method_error(&self, method: &str, code: i64) {
    self
      .method_errors
      .lock()
      .expect("test mutex")
      .insert(method.to_owned(), code);
  }

  pub fn clear_method_error(&self, method: &str) {
    self.method_errors.lock().expect("test mutex").remove(method);
  }

  pub fn device_on(&self) -> bool {
    self
      .device_info
      .lock()
      .expect("test mutex")
      .get("device_on")
      .and_then(Value::as_bool)
      .unwrap_or(false)
  }

  /// Handle one decrypted wire payload and produce the response envelope.
  pub fn handle_payload(&self, payload: &Value) -> Value {
    let method = payload.get("method").and_then(Value::as_str).unwrap_or("");
    if method == "multipleRequest" {
      let responses: Vec<Value> = payload
        .pointer("/params/requests")
        .and_then(Value::as_array)
        .map(|requests| {
          requests
            .iter()
            .map(|request| {
              let method = request.get("method").and_then(Value::as_str).unwrap_or("");
              let params = request.get("params").cloned().unwrap_or(Value::Null);
              match self.handle_method(method, &params) {
                Ok(result) => json!({"method": method, "result": result, "error_code": 0}),
                Err(code) => json!({"method": method, "error_code": code}),
              }
            })
            .collect()
        })
        .unwrap_or_default();
      return json!({"error_code": 0, "result": {"responses": responses}});
    }

    let params = payload.get("params").cloned().unwrap_or(Value::Null);
    match self.handle_method(method, &params) {
      Ok(result) => json!({"error_code": 0, "result": result}),
      Err(code) => json!({"error_code": code}),
    }
  }

  fn handle_method(&self, method: &str, params: &Value) -> Result<Value, i64> {
    if let Some(code) = self.method_errors.lock().expect("test mutex").get(method) {
      return Err(*code);
    }
    match method {
      "component_nego" => {
        let list: Vec<Value> = self
          .components
          .iter()
          .map(|(id, version)| json!({"id": id, "ver_code": version}))
          .collect();
        Ok(json!({"component_list": list}))
      }
      "get_device_info" => Ok(Value::Object(
        self.device_info.lock().expect("test mutex").clone(),
      )),
      "set_device_info" => {
        let mut info = self.device_info.lock().expect("test mutex");
        if let Some(updates) = params.as_object() {
          for (key, value) in updates {
            info.insert(key.clone(), value.clone());
          }
        }
        Ok(Value::Null)
      }
      "get_child_device_list" => {
        let children = self.children.lock().expect("test mutex");
        let list: Vec<Value> = children
          .iter()
          .map(|child| Value::Object(child.info.clone()))
          .collect();
        let sum = list.len();
        Ok(json!({"child_device_list": list, "start_index": 0, "sum": sum}))
      }
      "get_child_device_component_list" => {
        let children = self.children.lock().expect("test mutex");
        let list: Vec<Value> = children
          .iter()
          .map(|child| {
            let components: Vec<Value> = child
              .components
              .iter()
              .map(|(id, version)| json!({"id": id, "ver_code": version}))
              .collect();
            json!({
              "device_id": child.info.get("device_id").cloned().unwrap_or(Value::Null),
              "component_list": components
            })
          })
          .collect();
        Ok(json!({"child_component_list": list}))
      }
      "control_child" => self.handle_control_child(params),
      "device_reboot" | "device_reset" => Ok(Value::Null),
      other => {
        if let Some(extra) = self.extras.lock().expect("test mutex").get(other) {
          return Ok(extra.clone());
        }
        Err(-1002)
      }
    }
  }

  fn handle_control_child(&self, params: &Value) -> Result<Value, i64> {
    let device_id = params
      .get("device_id")
      .and_then(Value::as_str)
      .unwrap_or("");
    let request_data = params.get("requestData").cloned().unwrap_or(Value::Null);

    let children = self.children.lock().expect("test mutex");
    let Some(child) = children.iter().find(|child| {
      child.info.get("device_id").and_then(Value::as_str) == Some(device_id)
    }) else {
      return Err(-2600);
    };

    let method = request_data.get("method").and_then(Value::as_str).unwrap_or("");
    let response_data = if method == "multipleRequest" {
      let responses: Vec<Value> = request_data
        .pointer("/params/requests")
        .and_then(Value::as_array)
        .map(|requests| {
          requests
            .iter()
            .map(|request| {
              let method = request.get("method").and_then(Value::as_str).unwrap_or("");
              match child_method(child, method) {
                Ok(result) => json!({"method": method, "result": result, "error_code": 0}),
                Err(code) => json!({"method": method, "error_code": code}),
              }
            })
            .collect()
        })
        .unwrap_or_default();
      json!({"error_code": 0, "result": {"responses": responses}})
    } else {
      match child_method(child, method) {
        Ok(result) => json!({"error_code": 0, "result": result}),
        Err(code) => json!({"error_code": code}),
      }
    };
    Ok(json!({"responseData": response_data}))
  }
}

fn child_method(child: &FakeChildState, method: &str) -> Result<Value, i64> {
  match method {
    "get_device_info" => Ok(Value::Object(child.info.clone())),
    "component_nego" => {
      let list: Vec<Value> = child
        .components
        .iter()
        .map(|(id, version)| json!({"id": id, "ver_code": version}))
        .collect();
      Ok(json!({"component_list": list}))
    }
    other => child.extras.get(other).cloned().ok_or(-1002),
  }
}

/// In-process transport over a [FakeSmartState], with wire accounting.
pub struct FakeSmartTransport {
  pub state: FakeSmartState,
  pub wire_requests: Mutex<Vec<Value>>,
  pub reset_count: AtomicU32,
  invalid_session_remaining: AtomicU32,
}

impl FakeSmartTransport {
  pub fn new(state: FakeSmartState) -> Self {
    Self {
      state,
      wire_requests: Mutex::new(Vec::new()),
      reset_count: AtomicU32::new(0),
      invalid_session_remaining: AtomicU32::new(0),
    }
  }

  /// Fail the next `count` sends with an expired session.
  pub fn inject_invalid_session(&self, count: u32) {
    self.invalid_session_remaining.store(count, Ordering::SeqCst);
  }

  pub fn wire_request_count(&self) -> usize {
    self.wire_requests.lock().expect("test mutex").len()
  }

  pub fn multiple_request_count(&self) -> usize {
    self
      .wire_requests
      .lock()
      .expect("test mutex")
      .iter()
      .filter(|payload| payload.get("method").and_then(Value::as_str) == Some("multipleRequest"))
      .count()
  }

  /// Wire payloads that queried the given method, directly or batched.
  pub fn requests_for_method(&self, method: &str) -> usize {
    self
      .wire_requests
      .lock()
      .expect("test mutex")
      .iter()
      .filter(|payload| {
        if payload.get("method").and_then(Value::as_str) == Some(method) {
          return true;
        }
        payload
          .pointer("/params/requests")
          .and_then(Value::as_array)
          .map(|requests| {
            requests
              .iter()
              .any(|request| request.get("method").and_then(Value::as_str) == Some(method))
          })
          .unwrap_or(false)
      })
      .count()
  }
}

#[async_trait]
impl Transport for FakeSmartTransport {
  fn default_port(&self) -> u16 {
    80
  }

  fn credentials_hash(&self) -> Option<String> {
    None
  }

  async fn send(&self, request: &str) -> KasaResult<Value> {
    let payload: Value = serde_json::from_str(request).expect("wire payload is JSON");
    self
      .wire_requests
      .lock()
      .expect("test mutex")
      .push(payload.clone());

    let pending = self.invalid_session_remaining.load(Ordering::SeqCst);
    if pending > 0 {
      self
        .invalid_session_remaining
        .store(pending - 1, Ordering::SeqCst);
      return Err(KasaError::InvalidSession);
    }

    Ok(self.state.handle_payload(&payload))
  }

  async fn reset(&self) {
    self.reset_count.fetch_add(1, Ordering::SeqCst);
  }

  async fn close(&self) {}
}
