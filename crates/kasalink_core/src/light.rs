// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Value records shared by the light-capable device modules.

use crate::errors::{KasaError, KasaResult};
use getset::CopyGetters;
use serde::{Deserialize, Serialize};

/// Hue/saturation/value triple as the devices report it: hue in degrees,
/// saturation and value in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters, Serialize, Deserialize)]
pub struct HSV {
  #[getset(get_copy = "pub")]
  hue: u16,
  #[getset(get_copy = "pub")]
  saturation: u8,
  #[getset(get_copy = "pub")]
  value: u8,
}

impl HSV {
  pub fn new(hue: u16, saturation: u8, value: u8) -> KasaResult<Self> {
    if hue > 360 {
      return Err(KasaError::FeatureValue {
        id: "hue".to_owned(),
        reason: format!("{hue} is not in range [0, 360]"),
      });
    }
    if saturation > 100 {
      return Err(KasaError::FeatureValue {
        id: "saturation".to_owned(),
        reason: format!("{saturation} is not in range [0, 100]"),
      });
    }
    if value > 100 {
      return Err(KasaError::FeatureValue {
        id: "value".to_owned(),
        reason: format!("{value} is not in range [0, 100]"),
      });
    }
    Ok(Self {
      hue,
      saturation,
      value,
    })
  }
}

/// Color temperature bounds in kelvin, as advertised by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters, Serialize, Deserialize)]
pub struct ColorTempRange {
  #[getset(get_copy = "pub")]
  min: u32,
  #[getset(get_copy = "pub")]
  max: u32,
}

impl ColorTempRange {
  pub const fn new(min: u32, max: u32) -> Self {
    Self { min, max }
  }

  pub fn contains(&self, temp: u32) -> bool {
    (self.min..=self.max).contains(&temp)
  }
}

/// Desired or reported light state. All fields other than the power state
/// are optional; a transition of None means "switch immediately".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LightState {
  #[serde(rename = "on_off", with = "int_bool")]
  pub light_on: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub transition: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hue: Option<u16>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub saturation: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub brightness: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub color_temp: Option<u32>,
}

// Devices encode booleans as 0/1 in light state payloads.
mod int_bool {
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = u8::deserialize(deserializer)?;
    Ok(value != 0)
  }
}
