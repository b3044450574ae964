// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Scriptable IOT device: flat-JSON targets, sysinfo with children, child
//! context routing, per-target error injection.

use async_trait::async_trait;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_transport::Transport;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct FakeIotTransport {
  pub sys_info: Mutex<Map<String, Value>>,
  /// Realtime emeter readings: key None for the device itself, Some(id)
  /// for a strip socket.
  pub emeter: Mutex<HashMap<Option<String>, Value>>,
  pub target_errors: Mutex<HashMap<String, i64>>,
  pub wire_requests: Mutex<Vec<Value>>,
}

impl FakeIotTransport {
  pub fn new(sys_info: Value) -> Self {
    Self {
      sys_info: Mutex::new(sys_info.as_object().cloned().expect("sysinfo fixture is an object")),
      emeter: Mutex::new(HashMap::new()),
      target_errors: Mutex::new(HashMap::new()),
      wire_requests: Mutex::new(Vec::new()),
    }
  }

  pub fn hs100_plug() -> Self {
    Self::new(json!({
      "alias": "Desk plug",
      "model": "HS100(EU)",
      "type": "IOT.SMARTPLUGSWITCH",
      "deviceId": "8006AF35",
      "relay_state": 1,
      "led_off": 0,
      "rssi": -61,
      "feature": "TIM",
      "sw_ver": "1.2.5"
    }))
  }

  pub fn hs110_plug_with_energy() -> Self {
    let fake = Self::new(json!({
      "alias": "Washer",
      "model": "HS110(EU)",
      "type": "IOT.SMARTPLUGSWITCH",
      "deviceId": "8006BEEF",
      "relay_state": 1,
      "led_off": 0,
      "rssi": -58,
      "feature": "TIM:ENE"
    }));
    fake.set_emeter(
      None,
      json!({"voltage_mv": 230100, "current_ma": 120, "power_mw": 27600, "total_wh": 12400, "err_code": 0}),
    );
    fake
  }

  pub fn hs300_strip(socket_count: usize) -> Self {
    let children: Vec<Value> = (0..socket_count)
      .map(|index| {
        json!({
          "id": format!("8006STRIP{index:02}"),
          "alias": format!("Socket {index}"),
          "state": i32::from(index % 2 == 0),
          "on_time": 10 * index
        })
      })
      .collect();
    let fake = Self::new(json!({
      "alias": "Power strip",
      "model": "HS300(EU)",
      "type": "IOT.SMARTPLUGSWITCH",
      "deviceId": "8006CAFE",
      "feature": "TIM:ENE",
      "children": children,
      "child_num": socket_count
    }));
    for index in 0..socket_count {
      fake.set_emeter(
        Some(format!("8006STRIP{index:02}")),
        json!({"voltage_mv": 229900, "power_mw": 1000 * (index as i64 + 1), "err_code": 0}),
      );
    }
    fake
  }

  pub fn set_emeter(&self, child_id: Option<String>, realtime: Value) {
    self.emeter.lock().expect("test mutex").insert(child_id, realtime);
  }

  pub fn set_target_error(&self, target: &str, code: i64) {
    self
      .target_errors
      .lock()
      .expect("test mutex")
      .insert(target.to_owned(), code);
  }

  pub fn wire_request_count(&self) -> usize {
    self.wire_requests.lock().expect("test mutex").len()
  }

  /// Wire requests carrying a child context.
  pub fn child_request_count(&self) -> usize {
    self
      .wire_requests
      .lock()
      .expect("test mutex")
      .iter()
      .filter(|payload| payload.get("context").is_some())
      .count()
  }

  fn handle_target(
    &self,
    target: &str,
    commands: &Value,
    child_id: Option<&str>,
  ) -> Result<Value, i64> {
    if let Some(code) = self.target_errors.lock().expect("test mutex").get(target) {
      return Err(*code);
    }
    let mut results = Map::new();
    let Some(commands) = commands.as_object() else {
      return Err(-1003);
    };
    for (command, params) in commands {
      let result = match (target, command.as_str()) {
        ("system", "get_sysinfo") => {
          let info = self.sys_info.lock().expect("test mutex").clone();
          Value::Object(info)
        }
        ("system", "set_relay_state") => {
          let state = params.get("state").and_then(Value::as_i64).unwrap_or(0);
          let mut info = self.sys_info.lock().expect("test mutex");
          match child_id {
            Some(child_id) => {
              if let Some(children) = info.get_mut("children").and_then(Value::as_array_mut) {
                for child in children {
                  if child.get("id").and_then(Value::as_str) == Some(child_id) {
                    child["state"] = json!(state);
                  }
                }
              }
            }
            None => {
              info.insert("relay_state".to_owned(), json!(state));
            }
          }
          json!({"err_code": 0})
        }
        ("emeter", "get_realtime") => {
          let emeter = self.emeter.lock().expect("test mutex");
          match emeter.get(&child_id.map(str::to_owned)) {
            Some(realtime) => realtime.clone(),
            None => json!({"err_code": -1, "err_msg": "module not support"}),
          }
        }
        ("count_down", "get_rules") => json!({"rule_list": [], "err_code": 0}),
        ("cnCloud", "get_info") => json!({"binded": 1, "err_code": 0}),
        _ => json!({"err_code": -2, "err_msg": "member not support"}),
      };
      results.insert(command.clone(), result);
    }
    Ok(Value::Object(results))
  }
}

#[async_trait]
impl Transport for FakeIotTransport {
  fn default_port(&self) -> u16 {
    9999
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

    let child_id = payload
      .pointer("/context/child_ids/0")
      .and_then(Value::as_str)
      .map(str::to_owned);

    let Some(targets) = payload.as_object() else {
      return Err(KasaError::Message("request is not an object".to_owned()));
    };
    let mut response = Map::new();
    for (target, commands) in targets {
      if target == "context" {
        continue;
      }
      match self.handle_target(target, commands, child_id.as_deref()) {
        Ok(result) => {
          response.insert(target.clone(), result);
        }
        Err(code) => {
          response.insert(
            target.clone(),
            json!({"err_code": code, "err_msg": "module not support"}),
          );
        }
      }
    }
    Ok(Value::Object(response))
  }

  async fn reset(&self) {}

  async fn close(&self) {}
}
