// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Overheat reporting. Firmware disagrees on the field shape: some devices
//! report a plain boolean `overheated`, others a tri-state
//! `overheat_status` where only `normal` counts as not overheated.

use crate::feature::{Feature, FeatureType};
use crate::smart::module::{SmartModule, SmartModuleContext, SmartModuleDescriptor};
use kasalink_core::errors::KasaResult;
use serde_json::Value;
use std::sync::Arc;

pub const NAME: &str = "OverheatProtection";

pub fn descriptor() -> SmartModuleDescriptor {
  SmartModuleDescriptor {
    name: NAME,
    required_component: Some("overheat_protection"),
    minimum_version: 0,
    constructor: |context| Box::new(OverheatModule { context }),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverheatStatus {
  Normal,
  CoolingDown,
  Overheated,
  Unknown,
}

impl OverheatStatus {
  pub fn is_overheated(&self) -> bool {
    !matches!(self, OverheatStatus::Normal)
  }
}

/// Interpret either reporting shape from a device info payload.
pub fn status_from_info(info: &Value) -> Option<OverheatStatus> {
  if let Some(status) = info.get("overheat_status").and_then(Value::as_str) {
    return Some(match status {
      "normal" => OverheatStatus::Normal,
      "cool_down" | "cooldown" => OverheatStatus::CoolingDown,
      "overheated" => OverheatStatus::Overheated,
      other => {
        debug!("Unrecognized overheat_status '{}'", other);
        OverheatStatus::Unknown
      }
    });
  }
  info.get("overheated").and_then(Value::as_bool).map(|overheated| {
    if overheated {
      OverheatStatus::Overheated
    } else {
      OverheatStatus::Normal
    }
  })
}

pub struct OverheatModule {
  context: SmartModuleContext,
}

impl SmartModule for OverheatModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let info = self.context.device_info.clone();
    Ok(vec![
      Feature::builder("overheated", "Overheated", FeatureType::BinarySensor)
        .getter(Arc::new(move || {
          // Read the full info map so both field shapes are visible.
          let snapshot = {
            let guard = info.read().expect("device info lock never poisoned");
            Value::Object(guard.clone())
          };
          Ok(
            status_from_info(&snapshot)
              .map(|status| Value::from(status.is_overheated()))
              .unwrap_or(Value::Null),
          )
        }))
        .finish()?,
    ])
  }
}
