// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Energy monitoring for devices advertising the `energy_monitoring`
//! component (P110 and friends).

use crate::feature::{Feature, FeatureType};
use crate::module::ModuleData;
use crate::smart::module::{SmartModule, SmartModuleContext, SmartModuleDescriptor};
use kasalink_core::emeter::EmeterStatus;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_protocol::{MethodResult, QueryMap};
use serde_json::{json, Map, Value};
use std::sync::{Arc, RwLock};

pub const NAME: &str = "Energy";

pub fn descriptor() -> SmartModuleDescriptor {
  SmartModuleDescriptor {
    name: NAME,
    required_component: Some("energy_monitoring"),
    minimum_version: 0,
    constructor: |context| {
      Box::new(EnergyModule {
        context,
        state: Arc::new(RwLock::new(None)),
      })
    },
  }
}

#[derive(Debug, Clone)]
struct EnergyState {
  realtime: EmeterStatus,
  today_energy_wh: Option<f64>,
  month_energy_wh: Option<f64>,
}

pub struct EnergyModule {
  context: SmartModuleContext,
  state: Arc<RwLock<Option<EnergyState>>>,
}

type SharedEnergyState = Arc<RwLock<Option<EnergyState>>>;

fn read_state<T>(
  state: &SharedEnergyState,
  id: &str,
  read: impl Fn(&EnergyState) -> T,
) -> KasaResult<T> {
  state
    .read()
    .expect("energy state lock never poisoned")
    .as_ref()
    .map(read)
    .ok_or_else(|| KasaError::NotNegotiated(id.to_owned()))
}

impl SmartModule for EnergyModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn query(&self) -> QueryMap {
    let mut queries = QueryMap::new();
    queries.insert("get_energy_usage".to_owned(), Value::Null);
    if self.context.component_version >= 2 {
      queries.insert("get_current_power".to_owned(), Value::Null);
    }
    queries
  }

  fn estimated_query_response_size(&self) -> usize {
    2048
  }

  fn post_update_hook(&self, data: &ModuleData) -> KasaResult<()> {
    let usage = match data.get("get_energy_usage") {
      Some(MethodResult::Response(value)) => value.clone(),
      Some(MethodResult::Error(code)) => {
        return Err(KasaError::Device {
          host: "get_energy_usage".to_owned(),
          code: *code,
        });
      }
      None => Value::Null,
    };

    // current_power rides in get_energy_usage on older component versions
    // and in get_current_power on newer ones.
    let current_power_mw = data
      .get("get_current_power")
      .and_then(MethodResult::response)
      .and_then(|value| value.get("current_power"))
      .or_else(|| usage.get("current_power"))
      .and_then(Value::as_f64);

    let mut readings = Map::new();
    if let Some(power) = current_power_mw {
      readings.insert("power_mw".to_owned(), json!(power));
    }
    if let Some(energy) = usage.get("today_energy").and_then(Value::as_f64) {
      readings.insert("energy_wh".to_owned(), json!(energy));
    }

    *self.state.write().expect("energy state lock never poisoned") = Some(EnergyState {
      realtime: EmeterStatus::new(readings),
      today_energy_wh: usage.get("today_energy").and_then(Value::as_f64),
      month_energy_wh: usage.get("month_energy").and_then(Value::as_f64),
    });
    Ok(())
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let mut features = Vec::new();

    let state = self.state.clone();
    features.push(
      Feature::builder("current_consumption", "Current consumption", FeatureType::Sensor)
        .unit("W")
        .precision_hint(1)
        .getter(Arc::new(move || {
          read_state(&state, "current_consumption", |energy| {
            energy.realtime.power().map(|power| json!(power)).unwrap_or(Value::Null)
          })
        }))
        .finish()?,
    );

    let state = self.state.clone();
    features.push(
      Feature::builder("consumption_today", "Today's consumption", FeatureType::Sensor)
        .unit("Wh")
        .getter(Arc::new(move || {
          read_state(&state, "consumption_today", |energy| {
            energy.today_energy_wh.map(|wh| json!(wh)).unwrap_or(Value::Null)
          })
        }))
        .finish()?,
    );

    let state = self.state.clone();
    features.push(
      Feature::builder(
        "consumption_this_month",
        "This month's consumption",
        FeatureType::Sensor,
      )
      .unit("Wh")
      .getter(Arc::new(move || {
        read_state(&state, "consumption_this_month", |energy| {
          energy.month_energy_wh.map(|wh| json!(wh)).unwrap_or(Value::Null)
        })
      }))
      .finish()?,
    );

    Ok(features)
  }
}

impl EnergyModule {
  /// Latest realtime readings.
  pub fn realtime(&self) -> KasaResult<EmeterStatus> {
    read_state(&self.state, "realtime", |energy| energy.realtime.clone())
  }
}
