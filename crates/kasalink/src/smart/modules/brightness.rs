// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Brightness control. The reading rides in `get_device_info`, so this
//! module contributes no queries of its own.

use crate::feature::{Feature, FeatureCategory, FeatureType};
use crate::smart::module::{
  info_value, query_helper, SmartModule, SmartModuleContext, SmartModuleDescriptor,
};
use futures::FutureExt;
use kasalink_core::errors::{KasaError, KasaResult};
use serde_json::json;
use std::sync::Arc;

pub const NAME: &str = "Brightness";

const BRIGHTNESS_MIN: i64 = 1;
const BRIGHTNESS_MAX: i64 = 100;

pub fn descriptor() -> SmartModuleDescriptor {
  SmartModuleDescriptor {
    name: NAME,
    required_component: Some("brightness"),
    minimum_version: 0,
    constructor: |context| Box::new(BrightnessModule { context }),
  }
}

pub struct BrightnessModule {
  context: SmartModuleContext,
}

impl SmartModule for BrightnessModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let info = self.context.device_info.clone();
    let protocol = self.context.protocol.clone();
    Ok(vec![
      Feature::builder("brightness", "Brightness", FeatureType::Number)
        .category(FeatureCategory::Primary)
        .range(BRIGHTNESS_MIN, BRIGHTNESS_MAX)
        .unit("%")
        .getter(Arc::new(move || info_value(&info, "brightness")))
        .setter(Arc::new(move |value| {
          let protocol = protocol.clone();
          async move {
            let level = value.as_i64().ok_or_else(|| KasaError::FeatureValue {
              id: "brightness".to_owned(),
              reason: format!("{value} is not a number"),
            })?;
            query_helper(&protocol, "set_device_info", json!({"brightness": level})).await?;
            Ok(())
          }
          .boxed()
        }))
        .finish()?,
    ])
  }
}
