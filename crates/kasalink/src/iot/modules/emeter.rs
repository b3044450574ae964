// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Energy meter for IOT devices advertising the `ENE` feature flag. The
//! realtime payload differs between hardware revisions (unit-suffixed vs
//! bare keys); [EmeterStatus] absorbs the difference.

use crate::feature::{Feature, FeatureType};
use crate::iot::module::{
  query_helper, target_query, IotModule, IotModuleContext, IotModuleDescriptor,
};
use crate::module::ModuleData;
use kasalink_core::emeter::EmeterStatus;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_protocol::QueryMap;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};

pub const NAME: &str = "Emeter";
pub const TARGET: &str = "emeter";

pub fn descriptor() -> IotModuleDescriptor {
  IotModuleDescriptor {
    name: NAME,
    required_feature: Some("ENE"),
    constructor: |context| {
      Box::new(EmeterModule {
        context,
        status: Arc::new(RwLock::new(None)),
      })
    },
  }
}

pub struct EmeterModule {
  context: IotModuleContext,
  status: Arc<RwLock<Option<EmeterStatus>>>,
}

impl IotModule for EmeterModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn query(&self) -> QueryMap {
    target_query(TARGET, "get_realtime", Value::Null)
  }

  fn estimated_query_response_size(&self) -> usize {
    // get_realtime plus headroom for the stat queries piggybacked by
    // operations.
    1024
  }

  fn post_update_hook(&self, data: &ModuleData) -> KasaResult<()> {
    let body = data.unwrapped()?;
    let realtime = body
      .get("get_realtime")
      .and_then(Value::as_object)
      .ok_or_else(|| KasaError::Message("emeter response missing get_realtime".to_owned()))?;
    if realtime.get("err_code").and_then(Value::as_i64).unwrap_or(0) != 0 {
      return Err(KasaError::Message("get_realtime reported an error".to_owned()));
    }
    *self.status.write().expect("emeter lock never poisoned") =
      Some(EmeterStatus::new(realtime.clone()));
    Ok(())
  }

  fn features(&self) -> KasaResult<Vec<Feature>> {
    let mut features = Vec::new();

    let status = self.status.clone();
    features.push(
      Feature::builder("current_consumption", "Current consumption", FeatureType::Sensor)
        .unit("W")
        .precision_hint(1)
        .getter(Arc::new(move || {
          read_reading(&status, "current_consumption", EmeterStatus::power)
        }))
        .finish()?,
    );

    let status = self.status.clone();
    features.push(
      Feature::builder("voltage", "Voltage", FeatureType::Sensor)
        .unit("V")
        .precision_hint(1)
        .getter(Arc::new(move || read_reading(&status, "voltage", EmeterStatus::voltage)))
        .finish()?,
    );

    let status = self.status.clone();
    features.push(
      Feature::builder("consumption_total", "Total consumption", FeatureType::Sensor)
        .unit("kWh")
        .precision_hint(3)
        .getter(Arc::new(move || {
          read_reading(&status, "consumption_total", EmeterStatus::total)
        }))
        .finish()?,
    );

    Ok(features)
  }
}

fn read_reading(
  status: &Arc<RwLock<Option<EmeterStatus>>>,
  id: &str,
  read: impl Fn(&EmeterStatus) -> Option<f64>,
) -> KasaResult<Value> {
  status
    .read()
    .expect("emeter lock never poisoned")
    .as_ref()
    .map(|readings| read(readings).map(Value::from).unwrap_or(Value::Null))
    .ok_or_else(|| KasaError::NotNegotiated(id.to_owned()))
}

impl EmeterModule {
  /// Latest realtime readings.
  pub fn realtime(&self) -> KasaResult<EmeterStatus> {
    self
      .status
      .read()
      .expect("emeter lock never poisoned")
      .clone()
      .ok_or_else(|| KasaError::NotNegotiated("emeter".to_owned()))
  }

  /// Per-day consumption for one month.
  pub async fn get_daily_stats(&self, year: i32, month: u32) -> KasaResult<Value> {
    query_helper(
      &self.context.protocol,
      TARGET,
      "get_daystat",
      json!({"year": year, "month": month}),
    )
    .await
  }

  /// Per-month consumption for one year.
  pub async fn get_monthly_stats(&self, year: i32) -> KasaResult<Value> {
    query_helper(&self.context.protocol, TARGET, "get_monthstat", json!({"year": year})).await
  }

  /// Clear the device-side statistics.
  pub async fn erase_stats(&self) -> KasaResult<()> {
    query_helper(&self.context.protocol, TARGET, "erase_emeter_stat", Value::Null).await?;
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use kasalink_protocol::{MethodResult, Protocol, Request, ResponseMap};

  struct NullProtocol;

  #[async_trait::async_trait]
  impl Protocol for NullProtocol {
    async fn query_with_retries(
      &self,
      _request: Request,
      _retry_count: usize,
    ) -> KasaResult<ResponseMap> {
      Ok(ResponseMap::new())
    }

    async fn close(&self) {}
  }

  fn module() -> EmeterModule {
    EmeterModule {
      context: IotModuleContext {
        protocol: Arc::new(NullProtocol),
        sys_info: crate::iot::module::SharedSysInfo::default(),
      },
      status: Arc::new(RwLock::new(None)),
    }
  }

  #[test]
  fn realtime_parsing_handles_suffixed_keys() {
    let emeter = module();
    let mut responses = ResponseMap::new();
    responses.insert(
      TARGET.to_owned(),
      MethodResult::Response(json!({
        "get_realtime": {"voltage_mv": 231234, "power_mw": 1234, "err_code": 0}
      })),
    );
    emeter
      .post_update_hook(&ModuleData::new(responses))
      .expect("parses");
    let status = emeter.realtime().expect("cached");
    assert_eq!(status.power(), Some(1.234));
    assert_eq!(status.voltage(), Some(231.234));
  }

  #[test]
  fn unparsed_state_errors_as_not_updated() {
    assert!(matches!(
      module().realtime(),
      Err(KasaError::NotNegotiated(_))
    ));
  }
}
