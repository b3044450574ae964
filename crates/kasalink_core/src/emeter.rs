// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Container for energy-meter readings.
//!
//! Newer firmware postfixes reading keys with the unit (`power_mw`), older
//! firmware reports bare keys in base units (`power`, in watts). This
//! container converts transparently between the two so callers can ask for
//! either form regardless of what the device sent.

use serde_json::{Map, Value};

const VALID_KEYS: &[&str] = &[
  "voltage_mv",
  "power_mw",
  "current_ma",
  "energy_wh",
  "total_wh",
  "voltage",
  "power",
  "current",
  "total",
  "energy",
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmeterStatus {
  data: Map<String, Value>,
}

impl EmeterStatus {
  pub fn new(data: Map<String, Value>) -> Self {
    Self { data }
  }

  pub fn from_value(value: &Value) -> Option<Self> {
    value.as_object().map(|map| Self::new(map.clone()))
  }

  /// Look up a reading, scaling between suffixed and unsuffixed keys when
  /// only the twin form is present. Unknown keys return None, as does a
  /// valid key with no stored twin.
  pub fn get(&self, key: &str) -> Option<f64> {
    if let Some(value) = self.data.get(key) {
      return value.as_f64();
    }
    if !VALID_KEYS.contains(&key) {
      return None;
    }
    if let Some(prefix_len) = key.find('_') {
      // Suffixed key requested, upscale the bare reading.
      let bare = &key[..prefix_len];
      return self.data.get(bare).and_then(Value::as_f64).map(|v| v * 1000.0);
    }
    // Bare key requested, downscale the suffixed reading.
    for (stored, value) in &self.data {
      if stored.starts_with(key) && stored.contains('_') {
        return value.as_f64().map(|v| v / 1000.0);
      }
    }
    debug!("No emeter value available for '{}'", key);
    None
  }

  /// Voltage in volts.
  pub fn voltage(&self) -> Option<f64> {
    self.get("voltage")
  }

  /// Power in watts.
  pub fn power(&self) -> Option<f64> {
    self.get("power")
  }

  /// Current in amperes.
  pub fn current(&self) -> Option<f64> {
    self.get("current")
  }

  /// Total consumption in kWh.
  pub fn total(&self) -> Option<f64> {
    self.get("total")
  }

  pub fn raw(&self) -> &Map<String, Value> {
    &self.data
  }
}
