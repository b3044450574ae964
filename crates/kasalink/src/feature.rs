// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Uniform read/write handles over module-owned values.
//!
//! A feature carries typed read and write closures rather than attribute
//! names; the closures capture whatever shared state the owning module uses
//! internally, so reading a feature never needs the device lock.

use futures::future::BoxFuture;
use kasalink_core::errors::{KasaError, KasaResult};
use serde_json::Value;
use std::sync::Arc;

pub type FeatureGetter = Arc<dyn Fn() -> KasaResult<Value> + Send + Sync>;
pub type FeatureSetter = Arc<dyn Fn(Value) -> BoxFuture<'static, KasaResult<()>> + Send + Sync>;

/// How a value should be presented and validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FeatureType {
  /// Informative read-only value.
  Sensor,
  /// Read-only boolean.
  BinarySensor,
  /// Boolean setting.
  Switch,
  /// Fire-and-forget trigger.
  Action,
  /// Numeric setting constrained by `range`.
  Number,
  /// Setting constrained to `choices`.
  Choice,
  Unknown,
}

/// Grouping hint for downstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FeatureCategory {
  /// Directly controls device state (power, brightness).
  Primary,
  /// Changes behavior without immediate state changes.
  Config,
  /// Interesting information.
  Info,
  /// Verbose information, hidden by default in most UIs.
  Debug,
}

#[derive(Clone)]
pub struct Feature {
  id: String,
  name: String,
  feature_type: FeatureType,
  category: FeatureCategory,
  unit: Option<String>,
  range: Option<(i64, i64)>,
  choices: Option<Vec<String>>,
  precision_hint: Option<u8>,
  getter: Option<FeatureGetter>,
  setter: Option<FeatureSetter>,
}

impl std::fmt::Debug for Feature {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Feature")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("type", &self.feature_type)
      .field("category", &self.category)
      .finish()
  }
}

impl Feature {
  pub fn builder(id: &str, name: &str, feature_type: FeatureType) -> FeatureBuilder {
    FeatureBuilder::new(id, name, feature_type)
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn feature_type(&self) -> FeatureType {
    self.feature_type
  }

  pub fn category(&self) -> FeatureCategory {
    self.category
  }

  pub fn unit(&self) -> Option<&str> {
    self.unit.as_deref()
  }

  pub fn range(&self) -> Option<(i64, i64)> {
    self.range
  }

  pub fn choices(&self) -> Option<&[String]> {
    self.choices.as_deref()
  }

  pub fn precision_hint(&self) -> Option<u8> {
    self.precision_hint
  }

  pub fn is_settable(&self) -> bool {
    self.setter.is_some()
  }

  /// Current value. Actions have no value and read as a marker string.
  pub fn value(&self) -> KasaResult<Value> {
    if self.feature_type == FeatureType::Action {
      return Ok(Value::String("<Action>".to_owned()));
    }
    let getter = self.getter.as_ref().ok_or_else(|| KasaError::FeatureValue {
      id: self.id.clone(),
      reason: "feature has no getter".to_owned(),
    })?;
    getter()
  }

  /// Validate and write a value. Numbers must lie inside the current range,
  /// choices must be a current choice; features without a setter reject the
  /// write outright.
  pub async fn set_value(&self, value: Value) -> KasaResult<()> {
    let setter = self.setter.as_ref().ok_or_else(|| KasaError::FeatureValue {
      id: self.id.clone(),
      reason: "tried to set a read-only feature".to_owned(),
    })?;

    match self.feature_type {
      FeatureType::Number => {
        let number = value.as_i64().ok_or_else(|| KasaError::FeatureValue {
          id: self.id.clone(),
          reason: format!("{value} is not a number"),
        })?;
        if let Some((min, max)) = self.range {
          if number < min || number > max {
            return Err(KasaError::FeatureValue {
              id: self.id.clone(),
              reason: format!("{number} out of range [{min}, {max}]"),
            });
          }
        }
      }
      FeatureType::Choice => {
        let choice = value.as_str().ok_or_else(|| KasaError::FeatureValue {
          id: self.id.clone(),
          reason: format!("{value} is not a string"),
        })?;
        let allowed = self.choices.as_deref().unwrap_or_default();
        if !allowed.iter().any(|candidate| candidate == choice) {
          return Err(KasaError::FeatureValue {
            id: self.id.clone(),
            reason: format!("'{choice}' not in {allowed:?}"),
          });
        }
      }
      _ => {}
    }

    setter(value).await
  }
}

pub struct FeatureBuilder {
  feature: Feature,
  category_set: bool,
}

impl FeatureBuilder {
  pub fn new(id: &str, name: &str, feature_type: FeatureType) -> Self {
    Self {
      feature: Feature {
        id: id.to_owned(),
        name: name.to_owned(),
        feature_type,
        category: FeatureCategory::Info,
        unit: None,
        range: None,
        choices: None,
        precision_hint: None,
        getter: None,
        setter: None,
      },
      category_set: false,
    }
  }

  pub fn category(mut self, category: FeatureCategory) -> Self {
    self.feature.category = category;
    self.category_set = true;
    self
  }

  pub fn unit(mut self, unit: &str) -> Self {
    self.feature.unit = Some(unit.to_owned());
    self
  }

  pub fn range(mut self, min: i64, max: i64) -> Self {
    self.feature.range = Some((min, max));
    self
  }

  pub fn choices(mut self, choices: &[&str]) -> Self {
    self.feature.choices = Some(choices.iter().map(|choice| choice.to_string()).collect());
    self
  }

  pub fn precision_hint(mut self, digits: u8) -> Self {
    self.feature.precision_hint = Some(digits);
    self
  }

  pub fn getter(mut self, getter: FeatureGetter) -> Self {
    self.feature.getter = Some(getter);
    self
  }

  pub fn setter(mut self, setter: FeatureSetter) -> Self {
    self.feature.setter = Some(setter);
    self
  }

  pub fn finish(mut self) -> KasaResult<Feature> {
    if !self.category_set {
      self.feature.category = if self.feature.setter.is_some() {
        FeatureCategory::Config
      } else {
        FeatureCategory::Info
      };
    }
    if matches!(
      self.feature.feature_type,
      FeatureType::Sensor | FeatureType::BinarySensor
    ) {
      if self.feature.setter.is_some() {
        return Err(KasaError::FeatureValue {
          id: self.feature.id.clone(),
          reason: "read-only feature type defines a setter".to_owned(),
        });
      }
      if self.feature.category == FeatureCategory::Config {
        return Err(KasaError::FeatureValue {
          id: self.feature.id.clone(),
          reason: "read-only feature type in category Config".to_owned(),
        });
      }
    }
    Ok(self.feature)
  }
}

/// Shorthand for a read-only sensor over a shared getter closure.
pub fn sensor(id: &str, name: &str, getter: FeatureGetter) -> KasaResult<Feature> {
  Feature::builder(id, name, FeatureType::Sensor)
    .getter(getter)
    .finish()
}

#[cfg(test)]
mod test {
  use super::*;
  use futures::FutureExt;
  use serde_json::json;
  use std::sync::atomic::{AtomicI64, Ordering};

  fn number_feature(range: (i64, i64), sink: Arc<AtomicI64>) -> Feature {
    Feature::builder("brightness", "Brightness", FeatureType::Number)
      .range(range.0, range.1)
      .getter(Arc::new(|| Ok(json!(42))))
      .setter(Arc::new(move |value| {
        let sink = sink.clone();
        async move {
          sink.store(value.as_i64().unwrap_or(-1), Ordering::SeqCst);
          Ok(())
        }
        .boxed()
      }))
      .finish()
      .expect("valid feature")
  }

  #[tokio::test]
  async fn number_boundaries() {
    let sink = Arc::new(AtomicI64::new(0));
    let feature = number_feature((1, 100), sink.clone());

    feature.set_value(json!(1)).await.expect("min accepted");
    feature.set_value(json!(100)).await.expect("max accepted");
    assert_eq!(sink.load(Ordering::SeqCst), 100);

    assert!(feature.set_value(json!(0)).await.is_err());
    assert!(feature.set_value(json!(101)).await.is_err());
    assert!(feature.set_value(json!("50")).await.is_err());
  }

  #[tokio::test]
  async fn choice_membership() {
    let feature = Feature::builder("effect", "Light effect", FeatureType::Choice)
      .choices(&["Off", "Aurora", "Bubbling Cauldron"])
      .getter(Arc::new(|| Ok(json!("Off"))))
      .setter(Arc::new(|_| async { Ok(()) }.boxed()))
      .finish()
      .expect("valid feature");

    feature.set_value(json!("Aurora")).await.expect("in choices");
    assert!(feature.set_value(json!("Disco")).await.is_err());
  }

  #[tokio::test]
  async fn read_only_feature_rejects_writes() {
    let feature = sensor("rssi", "RSSI", Arc::new(|| Ok(json!(-40)))).expect("valid");
    assert!(feature.set_value(json!(1)).await.is_err());
    assert_eq!(feature.value().expect("readable"), json!(-40));
  }

  #[test]
  fn sensor_with_setter_is_rejected() {
    let result = Feature::builder("bad", "Bad", FeatureType::Sensor)
      .getter(Arc::new(|| Ok(Value::Null)))
      .setter(Arc::new(|_| async { Ok(()) }.boxed()))
      .finish();
    assert!(result.is_err());
  }

  #[test]
  fn binary_sensor_rejects_config_category() {
    let result = Feature::builder("bad", "Bad", FeatureType::BinarySensor)
      .category(FeatureCategory::Config)
      .getter(Arc::new(|| Ok(Value::Null)))
      .finish();
    assert!(result.is_err());
  }

  #[test]
  fn default_category_tracks_setter() {
    let read_only = sensor("a", "A", Arc::new(|| Ok(Value::Null))).expect("valid");
    assert_eq!(read_only.category(), FeatureCategory::Info);

    let writable = Feature::builder("b", "B", FeatureType::Switch)
      .getter(Arc::new(|| Ok(json!(true))))
      .setter(Arc::new(|_| async { Ok(()) }.boxed()))
      .finish()
      .expect("valid");
    assert_eq!(writable.category(), FeatureCategory::Config);
  }
}
