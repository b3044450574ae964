// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Status LED control. The state rides in sysinfo (`led_off`), so this
//! module contributes no queries.

use crate::feature::{Feature, FeatureType};
use crate::iot::module::{query_helper, IotModule, IotModuleContext, IotModuleDescriptor};
use futures::FutureExt;
use kasalink_core::errors::{KasaError, KasaResult};
use serde_json::{json, Value};
use std::sync::Arc;

pub const NAME: &str = "Led";

pub fn descriptor() -> IotModuleDescriptor {
  IotModuleDescriptor {
    name: NAME,
    required_feature: None,
    constructor: |context| Box::new(LedModule { context }),
  }
}

pub struct LedModule {
  context: IotModuleContext,
}

impl IotModule for LedModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let has_led = self
      .context
      .sys_info
      .read()
      .expect("sysinfo lock never poisoned")
      .contains_key("led_off");
    if !has_led {
      return Ok(Vec::new());
    }

    let sys_info = self.context.sys_info.clone();
    let protocol = self.context.protocol.clone();
    Ok(vec![
      Feature::builder("led", "LED", FeatureType::Switch)
        .getter(Arc::new(move || {
          let info = sys_info.read().expect("sysinfo lock never poisoned");
          if info.is_empty() {
            return Err(KasaError::NotNegotiated("led".to_owned()));
          }
          let led_off = info.get("led_off").and_then(Value::as_i64).unwrap_or(0);
          Ok(Value::from(led_off == 0))
        }))
        .setter(Arc::new(move |value| {
          let protocol = protocol.clone();
          async move {
            let on = value.as_bool().ok_or_else(|| KasaError::FeatureValue {
              id: "led".to_owned(),
              reason: format!("{value} is not a boolean"),
            })?;
            query_helper(
              &protocol,
              "system",
              "set_led_off",
              json!({"off": i32::from(!on)}),
            )
            .await?;
            Ok(())
          }
          .boxed()
        }))
        .finish()?,
    ])
  }
}
