// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Device kinds as presented to users, inferred after component
//! negotiation rather than taken from the family tag alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
  Plug,
  Bulb,
  Strip,
  StripSocket,
  WallSwitch,
  Dimmer,
  LightStrip,
  Sensor,
  Hub,
  Fan,
  Thermostat,
  Camera,
  Doorbell,
  Vacuum,
  Unknown,
}

impl DeviceType {
  /// SMART family inference from the negotiated component set. Children are
  /// classified separately; `all_children_are_plugs` only matters when the
  /// device bears children.
  pub fn from_smart_components(
    family: &str,
    components: &HashMap<String, u32>,
    has_children: bool,
    all_children_are_plugs: bool,
  ) -> DeviceType {
    if family == "SMART.TAPOHUB" || family == "SMART.KASAHUB" {
      return DeviceType::Hub;
    }
    if family == "SMART.IPCAMERA" {
      return if components.contains_key("homeBase") {
        DeviceType::Doorbell
      } else {
        DeviceType::Camera
      };
    }
    if family == "SMART.TAPOROBOVAC" {
      return DeviceType::Vacuum;
    }
    if has_children && components.contains_key("control_child") {
      return if all_children_are_plugs {
        DeviceType::Strip
      } else {
        DeviceType::Hub
      };
    }
    if components.contains_key("light_strip") {
      return DeviceType::LightStrip;
    }
    if components.contains_key("color_temperature") {
      return DeviceType::Bulb;
    }
    if components.contains_key("brightness") {
      return DeviceType::Dimmer;
    }
    if family == "SMART.KASASWITCH" || family == "SMART.TAPOSWITCH" {
      return DeviceType::WallSwitch;
    }
    DeviceType::Plug
  }

  /// IOT inference from a sysinfo payload.
  pub fn from_iot_sys_info(sys_info: &Value) -> DeviceType {
    let type_field = sys_info
      .get("type")
      .or_else(|| sys_info.get("mic_type"))
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_ascii_lowercase();

    if sys_info
      .get("dev_name")
      .and_then(Value::as_str)
      .map(|name| name.contains("Dimmer"))
      .unwrap_or(false)
    {
      return DeviceType::Dimmer;
    }
    if type_field.contains("smartplug") {
      return if sys_info.get("children").is_some() {
        DeviceType::Strip
      } else {
        DeviceType::Plug
      };
    }
    if type_field.contains("smartbulb") {
      return if sys_info.get("length").is_some() {
        DeviceType::LightStrip
      } else {
        DeviceType::Bulb
      };
    }
    if type_field.contains("camera") {
      return DeviceType::Camera;
    }
    DeviceType::Unknown
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use serde_json::json;
  use test_case::test_case;

  fn components(ids: &[&str]) -> HashMap<String, u32> {
    ids.iter().map(|id| (id.to_string(), 1)).collect()
  }

  #[test_case("SMART.TAPOHUB", &[], DeviceType::Hub ; "hub by family")]
  #[test_case("SMART.IPCAMERA", &["homeBase"], DeviceType::Doorbell ; "doorbell by home base")]
  #[test_case("SMART.IPCAMERA", &[], DeviceType::Camera ; "camera without home base")]
  #[test_case("SMART.TAPOBULB", &["light_strip", "color_temperature"], DeviceType::LightStrip ; "light strip")]
  #[test_case("SMART.TAPOBULB", &["color_temperature", "brightness"], DeviceType::Bulb ; "bulb")]
  #[test_case("SMART.TAPOSWITCH", &["brightness"], DeviceType::Dimmer ; "dimmer")]
  #[test_case("SMART.TAPOPLUG", &[], DeviceType::Plug ; "plain plug")]
  fn smart_inference(family: &str, component_ids: &[&str], expected: DeviceType) {
    assert_eq!(
      DeviceType::from_smart_components(family, &components(component_ids), false, false),
      expected
    );
  }

  #[test]
  fn smart_strip_requires_plug_children() {
    let comps = components(&["control_child"]);
    assert_eq!(
      DeviceType::from_smart_components("SMART.TAPOPLUG", &comps, true, true),
      DeviceType::Strip
    );
    assert_eq!(
      DeviceType::from_smart_components("SMART.TAPOPLUG", &comps, true, false),
      DeviceType::Hub
    );
  }

  #[test_case(json!({"type": "IOT.SMARTPLUGSWITCH", "model": "HS100"}), DeviceType::Plug ; "plug")]
  #[test_case(json!({"type": "IOT.SMARTPLUGSWITCH", "children": []}), DeviceType::Strip ; "strip")]
  #[test_case(json!({"mic_type": "IOT.SMARTBULB"}), DeviceType::Bulb ; "bulb via mic type")]
  #[test_case(json!({"type": "IOT.SMARTBULB", "length": 16}), DeviceType::LightStrip ; "light strip by length")]
  #[test_case(json!({"type": "IOT.SMARTPLUGSWITCH", "dev_name": "Wi-Fi Smart Dimmer"}), DeviceType::Dimmer ; "dimmer by name")]
  #[test_case(json!({}), DeviceType::Unknown ; "empty sysinfo")]
  fn iot_inference(sys_info: Value, expected: DeviceType) {
    assert_eq!(DeviceType::from_iot_sys_info(&sys_info), expected);
  }
}
