// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! JSON helpers used when folding batched responses together.

use serde_json::{Map, Value};

/// Merge `update` into `base`. Nested objects merge recursively so
/// independent sub-keys coexist; everything else is last-write-wins.
pub fn merge(base: &mut Value, update: &Value) {
  match (base, update) {
    (Value::Object(base_map), Value::Object(update_map)) => {
      merge_maps(base_map, update_map);
    }
    (base_slot, update_value) => {
      *base_slot = update_value.clone();
    }
  }
}

/// Map-level variant of [merge].
pub fn merge_maps(base: &mut Map<String, Value>, update: &Map<String, Value>) {
  for (key, update_value) in update {
    match (base.get_mut(key), update_value) {
      (Some(Value::Object(base_child)), Value::Object(update_child)) => {
        merge_maps(base_child, update_child);
      }
      _ => {
        base.insert(key.clone(), update_value.clone());
      }
    }
  }
}

/// Pull a required object out of a response payload.
pub fn object<'a>(value: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
  value.get(key).and_then(Value::as_object)
}

#[cfg(test)]
mod test {
  use super::*;
  use serde_json::json;

  #[test]
  fn merge_recurses_into_objects() {
    let mut base = json!({"system": {"get_sysinfo": {"relay_state": 0}}, "time": 1});
    merge(
      &mut base,
      &json!({"system": {"set_relay_state": {"err_code": 0}}, "time": 2}),
    );
    assert_eq!(
      base,
      json!({
        "system": {
          "get_sysinfo": {"relay_state": 0},
          "set_relay_state": {"err_code": 0}
        },
        "time": 2
      })
    );
  }

  #[test]
  fn merge_overwrites_scalars_with_objects() {
    let mut base = json!({"a": 1});
    merge(&mut base, &json!({"a": {"b": 2}}));
    assert_eq!(base, json!({"a": {"b": 2}}));
  }
}
