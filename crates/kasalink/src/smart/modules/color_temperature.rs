// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Color temperature control for bulbs. The device advertises its usable
//! kelvin range in `color_temp_range`; the feature range is read from the
//! first update, which has happened by the time features are built.

use crate::feature::{Feature, FeatureCategory, FeatureType};
use crate::smart::module::{
  info_value, query_helper, SmartModule, SmartModuleContext, SmartModuleDescriptor,
};
use futures::FutureExt;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_core::light::ColorTempRange;
use serde_json::{json, Value};
use std::sync::Arc;

pub const NAME: &str = "ColorTemperature";

const DEFAULT_RANGE: ColorTempRange = ColorTempRange::new(2500, 6500);

pub fn descriptor() -> SmartModuleDescriptor {
  SmartModuleDescriptor {
    name: NAME,
    required_component: Some("color_temperature"),
    minimum_version: 0,
    constructor: |context| Box::new(ColorTemperatureModule { context }),
  }
}

pub struct ColorTemperatureModule {
  context: SmartModuleContext,
}

impl ColorTemperatureModule {
  fn advertised_range(&self) -> ColorTempRange {
    info_value(&self.context.device_info, "color_temp_range")
      .ok()
      .and_then(|value| {
        let list = value.as_array()?;
        let min = list.first()?.as_u64()? as u32;
        let max = list.get(1)?.as_u64()? as u32;
        Some(ColorTempRange::new(min, max))
      })
      .unwrap_or(DEFAULT_RANGE)
  }
}

impl SmartModule for ColorTemperatureModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let range = self.advertised_range();
    let info = self.context.device_info.clone();
    let protocol = self.context.protocol.clone();
    Ok(vec![
      Feature::builder("color_temperature", "Color temperature", FeatureType::Number)
        .category(FeatureCategory::Primary)
        .range(range.min() as i64, range.max() as i64)
        .unit("K")
        .getter(Arc::new(move || info_value(&info, "color_temp")))
        .setter(Arc::new(move |value| {
          let protocol = protocol.clone();
          async move {
            let kelvin = value.as_i64().ok_or_else(|| KasaError::FeatureValue {
              id: "color_temperature".to_owned(),
              reason: format!("{value} is not a number"),
            })?;
            query_helper(&protocol, "set_device_info", json!({"color_temp": kelvin})).await?;
            Ok(())
          }
          .boxed()
        }))
        .finish()?,
    ])
  }
}

/// Extract the range a device reports, if any, for callers outside the
/// feature path.
pub fn range_from_info(info: &Value) -> Option<ColorTempRange> {
  let list = info.get("color_temp_range")?.as_array()?;
  let min = list.first()?.as_u64()? as u32;
  let max = list.get(1)?.as_u64()? as u32;
  Some(ColorTempRange::new(min, max))
}
