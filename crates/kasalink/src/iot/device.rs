// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The IOT (legacy Kasa) device engine. Negotiation is a sysinfo fetch:
//! capabilities come from the colon-delimited feature flag string, children
//! from the `children` list, and every update cycle re-reads sysinfo
//! alongside whatever the modules ask for.

use crate::clock::{Clock, SystemClock};
use crate::device::Device;
use crate::device_type::DeviceType;
use crate::feature::{Feature, FeatureCategory, FeatureType};
use crate::iot::module::{
  default_registry, query_helper, IotModule, IotModuleContext, SharedSysInfo,
};
use crate::module::{pack_batches, slice_for_module, ModuleRuntime};
use async_trait::async_trait;
use futures::FutureExt;
use kasalink_core::errors::{KasaError, KasaResult};
use kasalink_core::util::json::merge;
use kasalink_device_config::DeviceConfig;
use kasalink_protocol::{
  response_map_to_value, ChildProtocolWrapper, ChildWrapperMode, MethodResult, Protocol,
  QueryMap, Request, ResponseMap,
};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;
use tokio::sync::Mutex;

/// Response budgets per hardware class: bulbs choke well before plugs do.
pub const MAX_RESPONSE_SIZE_PLUG: usize = 16 * 1024;
pub const MAX_RESPONSE_SIZE_BULB: usize = 4 * 1024;

const SYSINFO_ESTIMATED_SIZE: usize = 1024;

struct IotState {
  negotiated: bool,
  feature_flags: HashSet<String>,
  modules: Vec<ModuleRuntime<dyn IotModule>>,
  features: Vec<Feature>,
  features_initialized: bool,
  children: Vec<Arc<IotDevice>>,
  internal_state: Value,
  last_update: Option<Instant>,
  device_type: DeviceType,
  max_response_size: usize,
  discovery_info: Option<Value>,
}

pub struct IotDevice {
  host: String,
  config: DeviceConfig,
  protocol: Arc<dyn Protocol>,
  clock: Arc<dyn Clock>,
  update_lock: Mutex<()>,
  state: RwLock<IotState>,
  sys_info: SharedSysInfo,
  parent: Option<Weak<IotDevice>>,
  child_id: Option<String>,
  self_weak: Weak<IotDevice>,
}

impl IotDevice {
  pub fn new(config: DeviceConfig, protocol: Arc<dyn Protocol>) -> Arc<Self> {
    Self::with_clock(config, protocol, Arc::new(SystemClock))
  }

  pub fn with_clock(
    config: DeviceConfig,
    protocol: Arc<dyn Protocol>,
    clock: Arc<dyn Clock>,
  ) -> Arc<Self> {
    Arc::new_cyclic(|self_weak| Self {
      host: config.host().clone(),
      config,
      protocol,
      clock,
      update_lock: Mutex::new(()),
      state: RwLock::new(IotState {
        negotiated: false,
        feature_flags: HashSet::new(),
        modules: Vec::new(),
        features: Vec::new(),
        features_initialized: false,
        children: Vec::new(),
        internal_state: Value::Null,
        last_update: None,
        device_type: DeviceType::Unknown,
        max_response_size: MAX_RESPONSE_SIZE_PLUG,
        discovery_info: None,
      }),
      sys_info: SharedSysInfo::default(),
      parent: None,
      child_id: None,
      self_weak: self_weak.clone(),
    })
  }

  fn new_child(parent: &Arc<IotDevice>, child_id: &str, info: Map<String, Value>) -> Arc<Self> {
    let protocol: Arc<dyn Protocol> = Arc::new(ChildProtocolWrapper::new(
      child_id,
      parent.protocol.clone(),
      ChildWrapperMode::Iot,
    ));
    let flags = parent.read_state(|state| state.feature_flags.clone());
    let child = Arc::new_cyclic(|self_weak| Self {
      host: parent.host.clone(),
      config: parent.config.clone(),
      protocol: protocol.clone(),
      clock: parent.clock.clone(),
      update_lock: Mutex::new(()),
      state: RwLock::new(IotState {
        negotiated: true,
        feature_flags: flags.clone(),
        modules: Vec::new(),
        features: Vec::new(),
        features_initialized: false,
        children: Vec::new(),
        internal_state: Value::Object(info.clone()),
        last_update: None,
        device_type: DeviceType::StripSocket,
        max_response_size: parent.read_state(|state| state.max_response_size),
        discovery_info: None,
      }),
      sys_info: Arc::new(RwLock::new(info)),
      parent: Some(Arc::downgrade(parent)),
      child_id: Some(child_id.to_owned()),
      self_weak: self_weak.clone(),
    });
    child.attach_modules(&flags);
    if let Err(err) = child.initialize_features() {
      warn!("Feature initialization for socket {} failed: {}", child_id, err);
    }
    child
  }

  pub fn children(&self) -> Vec<Arc<IotDevice>> {
    self.read_state(|state| state.children.clone())
  }

  pub fn child_id(&self) -> Option<&str> {
    self.child_id.as_deref()
  }

  pub fn feature_flags(&self) -> HashSet<String> {
    self.read_state(|state| state.feature_flags.clone())
  }

  /// Discovery payload this device was built from, if any.
  pub fn discovery_info(&self) -> Option<Value> {
    self.read_state(|state| state.discovery_info.clone())
  }

  pub fn has_emeter(&self) -> bool {
    self.read_state(|state| state.feature_flags.contains("ENE"))
  }

  pub fn last_update_time(&self) -> Option<Instant> {
    self.read_state(|state| state.last_update)
  }

  pub fn module_disabled(&self, name: &str) -> Option<bool> {
    self.read_state(|state| {
      state
        .modules
        .iter()
        .find(|runtime| runtime.module.name() == name)
        .map(|runtime| runtime.disabled())
    })
  }

  fn read_state<T>(&self, read: impl FnOnce(&IotState) -> T) -> T {
    read(&self.state.read().expect("device state lock never poisoned"))
  }

  fn write_state<T>(&self, write: impl FnOnce(&mut IotState) -> T) -> T {
    write(&mut self.state.write().expect("device state lock never poisoned"))
  }

  /// Digest a fresh sysinfo payload: capability flags, device type and the
  /// matching response budget.
  fn apply_sys_info(&self, sys_info: &Map<String, Value>) {
    *self
      .sys_info
      .write()
      .expect("sysinfo lock never poisoned") = sys_info.clone();

    let flags: HashSet<String> = sys_info
      .get("feature")
      .and_then(Value::as_str)
      .map(|flags| flags.split(':').map(str::to_owned).collect())
      .unwrap_or_default();

    let device_type = if self.child_id.is_some() {
      DeviceType::StripSocket
    } else {
      DeviceType::from_iot_sys_info(&Value::Object(sys_info.clone()))
    };
    let max_response_size = match device_type {
      DeviceType::Bulb | DeviceType::LightStrip => MAX_RESPONSE_SIZE_BULB,
      _ => MAX_RESPONSE_SIZE_PLUG,
    };

    self.write_state(|state| {
      state.feature_flags = flags;
      state.device_type = device_type;
      state.max_response_size = max_response_size;
    });
  }

  fn attach_modules(&self, flags: &HashSet<String>) {
    let mut runtimes = Vec::new();
    for descriptor in default_registry() {
      if let Some(flag) = descriptor.required_feature {
        if !flags.contains(flag) {
          continue;
        }
      }
      trace!("Attaching module {} to {}", descriptor.name, self.host);
      let module = (descriptor.constructor)(IotModuleContext {
        protocol: self.protocol.clone(),
        sys_info: self.sys_info.clone(),
      });
      runtimes.push(ModuleRuntime::new(module));
    }
    self.write_state(|state| state.modules = runtimes);
  }

  async fn negotiate(&self) -> KasaResult<()> {
    let mut queries = QueryMap::new();
    queries.insert("system".to_owned(), json!({"get_sysinfo": null}));
    let responses = self.protocol.query(Request::Map(queries)).await?;
    let sys_info = sys_info_from_responses(&self.host, &responses)?;
    self.apply_sys_info(&sys_info);
    let flags = self.read_state(|state| state.feature_flags.clone());
    self.attach_modules(&flags);
    self.write_state(|state| state.negotiated = true);
    debug!(
      "Negotiated {} with feature flags {:?}",
      self.host,
      self.feature_flags()
    );
    Ok(())
  }

  async fn run_update_cycle(&self) -> KasaResult<ResponseMap> {
    let now = self.clock.now();

    let mut cycle: Vec<(Option<usize>, QueryMap, usize)> = Vec::new();
    if self.child_id.is_none() {
      // The device itself always re-reads sysinfo; children get theirs
      // pushed from the parent's copy.
      let mut sysinfo_query = QueryMap::new();
      sysinfo_query.insert("system".to_owned(), json!({"get_sysinfo": null}));
      cycle.push((None, sysinfo_query, SYSINFO_ESTIMATED_SIZE));
    }

    self.write_state(|state| {
      for (index, runtime) in state.modules.iter_mut().enumerate() {
        let interval = runtime.module.minimum_update_interval();
        if !runtime.should_poll(now, interval) {
          continue;
        }
        let queries = runtime.module.query();
        if queries.is_empty() {
          continue;
        }
        runtime.record_polled(now);
        let estimate = runtime.module.estimated_query_response_size();
        cycle.push((Some(index), queries, estimate));
      }
    });

    let max_response_size = self.read_state(|state| state.max_response_size);
    let batches = pack_batches(
      cycle
        .iter()
        .map(|(_, queries, estimate)| (queries.clone(), *estimate))
        .collect(),
      max_response_size,
    );
    trace!(
      "Update cycle for {}: {} queries in {} batches",
      self.host,
      cycle.len(),
      batches.len()
    );

    let responses = self.protocol.query_batches(batches).await?;

    if self.child_id.is_none() {
      let sys_info = sys_info_from_responses(&self.host, &responses)?;
      self.apply_sys_info(&sys_info);
    }

    let merged = response_map_to_value(&responses);
    self.write_state(|state| {
      if !state.internal_state.is_object() {
        state.internal_state = json!({});
      }
      merge(&mut state.internal_state, &merged);

      for (index, queries, _) in &cycle {
        let Some(index) = index else {
          continue;
        };
        let data = slice_for_module(queries, &responses);
        let runtime = &mut state.modules[*index];
        let name = runtime.module.name();
        if data.all_errors() {
          let detail = format!("all queries failed for {name}");
          runtime.record_failure(now, detail, name);
          continue;
        }
        match runtime.module.post_update_hook(&data) {
          Ok(()) => runtime.record_success(),
          Err(err) => {
            let name = runtime.module.name();
            runtime.record_failure(now, err.to_string(), name);
          }
        }
      }
      state.last_update = Some(now);
    });
    Ok(responses)
  }

  async fn update_impl(&self, update_children: bool) -> KasaResult<()> {
    let _guard = self.update_lock.lock().await;

    if !self.read_state(|state| state.negotiated) {
      self.negotiate().await?;
    }

    self.run_update_cycle().await?;

    if self.child_id.is_none() {
      self.refresh_children();
    }

    if !self.read_state(|state| state.features_initialized) {
      self.initialize_features()?;
    }

    if update_children {
      for child in self.children() {
        if let Err(err) = Box::pin(child.update_impl(false)).await {
          warn!(
            "Updating socket {} of {} failed: {}",
            child.child_id().unwrap_or("?"),
            self.host,
            err
          );
        }
      }
    }
    Ok(())
  }

  /// Create children from sysinfo on the first update; push refreshed
  /// entries afterwards. A socket's pushed info is the parent sysinfo with
  /// the child entry folded over it, so child accessors behave like a
  /// standalone plug's.
  fn refresh_children(&self) {
    let entries: Vec<Map<String, Value>> = {
      let sys_info = self.sys_info.read().expect("sysinfo lock never poisoned");
      sys_info
        .get("children")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_object).cloned().collect())
        .unwrap_or_default()
    };
    if entries.is_empty() {
      return;
    }

    let have_children = !self.read_state(|state| state.children.is_empty());
    if !have_children {
      let Some(parent) = self.self_weak.upgrade() else {
        return;
      };
      let mut children = Vec::with_capacity(entries.len());
      for entry in &entries {
        let Some(child_id) = entry.get("id").and_then(Value::as_str) else {
          warn!("Child entry without id on {}", self.host);
          continue;
        };
        children.push(IotDevice::new_child(
          &parent,
          child_id,
          self.child_info(entry),
        ));
      }
      debug!("Initialized {} sockets for {}", children.len(), self.host);
      self.write_state(|state| state.children = children);
    } else {
      let children = self.children();
      for entry in &entries {
        let Some(child_id) = entry.get("id").and_then(Value::as_str) else {
          continue;
        };
        if let Some(child) = children
          .iter()
          .find(|child| child.child_id() == Some(child_id))
        {
          child.push_parent_info(self.child_info(entry));
        }
      }
    }
  }

  fn child_info(&self, entry: &Map<String, Value>) -> Map<String, Value> {
    let mut info = self
      .sys_info
      .read()
      .expect("sysinfo lock never poisoned")
      .clone();
    info.remove("children");
    for (key, value) in entry {
      info.insert(key.clone(), value.clone());
    }
    info
  }

  fn push_parent_info(&self, info: Map<String, Value>) {
    *self
      .sys_info
      .write()
      .expect("sysinfo lock never poisoned") = info.clone();
    self.write_state(|state| state.internal_state = Value::Object(info));
  }

  fn initialize_features(&self) -> KasaResult<()> {
    let mut features: Vec<Feature> = Vec::new();

    // Device-level features first, in the order users expect to see them.
    let sys_info = self.sys_info.clone();
    let protocol = self.protocol.clone();
    features.push(
      Feature::builder("state", "State", FeatureType::Switch)
        .category(FeatureCategory::Primary)
        .getter(Arc::new(move || {
          let info = sys_info.read().expect("sysinfo lock never poisoned");
          if info.is_empty() {
            return Err(KasaError::NotNegotiated("state".to_owned()));
          }
          Ok(Value::from(relay_state(&info)))
        }))
        .setter(Arc::new(move |value| {
          let protocol = protocol.clone();
          async move {
            let on = value.as_bool().ok_or_else(|| KasaError::FeatureValue {
              id: "state".to_owned(),
              reason: format!("{value} is not a boolean"),
            })?;
            query_helper(&protocol, "system", "set_relay_state", json!({"state": i32::from(on)}))
              .await?;
            Ok(())
          }
          .boxed()
        }))
        .finish()?,
    );

    let sys_info = self.sys_info.clone();
    features.push(
      Feature::builder("rssi", "RSSI", FeatureType::Sensor)
        .category(FeatureCategory::Debug)
        .unit("dBm")
        .getter(Arc::new(move || {
          let info = sys_info.read().expect("sysinfo lock never poisoned");
          if info.is_empty() {
            return Err(KasaError::NotNegotiated("rssi".to_owned()));
          }
          Ok(info.get("rssi").cloned().unwrap_or(Value::Null))
        }))
        .finish()?,
    );

    let module_features: Vec<KasaResult<Vec<Feature>>> =
      self.read_state(|state| state.modules.iter().map(|r| r.module.features()).collect());
    for batch in module_features {
      for feature in batch? {
        if features.iter().any(|existing| existing.id() == feature.id()) {
          return Err(KasaError::Message(format!(
            "Duplicate feature id {} on {}",
            feature.id(),
            self.host
          )));
        }
        features.push(feature);
      }
    }
    debug!("Registered {} features for {}", features.len(), self.host);
    self.write_state(|state| {
      state.features = features;
      state.features_initialized = true;
    });
    Ok(())
  }

  pub async fn set_relay_state(&self, on: bool) -> KasaResult<()> {
    let _guard = self.update_lock.lock().await;
    query_helper(
      &self.protocol,
      "system",
      "set_relay_state",
      json!({"state": i32::from(on)}),
    )
    .await?;
    Ok(())
  }

  pub async fn reboot(&self, delay_secs: u32) -> KasaResult<()> {
    let _guard = self.update_lock.lock().await;
    query_helper(&self.protocol, "system", "reboot", json!({"delay": delay_secs})).await?;
    Ok(())
  }

  pub async fn set_alias(&self, alias: &str) -> KasaResult<()> {
    let _guard = self.update_lock.lock().await;
    query_helper(&self.protocol, "system", "set_dev_alias", json!({"alias": alias})).await?;
    Ok(())
  }

  fn info_field(&self, key: &str) -> Option<Value> {
    let info = self.sys_info.read().expect("sysinfo lock never poisoned");
    info.get(key).cloned()
  }
}

#[async_trait]
impl Device for IotDevice {
  fn host(&self) -> &str {
    &self.host
  }

  fn config(&self) -> &DeviceConfig {
    &self.config
  }

  fn device_type(&self) -> DeviceType {
    self.read_state(|state| state.device_type)
  }

  fn update_from_discover_info(&self, info: Value) {
    // The discovery payload for IOT devices is a full sysinfo response, so
    // accessors work before the first update.
    let sys_info = info
      .pointer("/system/get_sysinfo")
      .and_then(Value::as_object)
      .cloned()
      .or_else(|| info.as_object().cloned());
    if let Some(sys_info) = sys_info {
      self.apply_sys_info(&sys_info);
    }
    self.write_state(|state| state.discovery_info = Some(info));
  }

  async fn update_with(&self, update_children_or_parent: bool) -> KasaResult<()> {
    if let Some(parent) = &self.parent {
      if update_children_or_parent {
        if let Some(parent) = parent.upgrade() {
          Box::pin(parent.update_impl(false)).await?;
        }
      }
      return Box::pin(self.update_impl(false)).await;
    }
    self.update_impl(update_children_or_parent).await
  }

  async fn disconnect(&self) {
    self.protocol.close().await;
  }

  fn sys_info(&self) -> KasaResult<Value> {
    let info = self.sys_info.read().expect("sysinfo lock never poisoned");
    if info.is_empty() {
      return Err(KasaError::NotNegotiated("sys_info".to_owned()));
    }
    Ok(Value::Object(info.clone()))
  }

  fn internal_state(&self) -> Value {
    self.read_state(|state| state.internal_state.clone())
  }

  fn alias(&self) -> Option<String> {
    self
      .info_field("alias")
      .and_then(|value| value.as_str().map(str::to_owned))
  }

  fn model(&self) -> Option<String> {
    self
      .info_field("model")
      .and_then(|value| value.as_str().map(str::to_owned))
  }

  fn device_id(&self) -> Option<String> {
    self
      .info_field("deviceId")
      .and_then(|value| value.as_str().map(str::to_owned))
  }

  fn is_on(&self) -> KasaResult<bool> {
    if self.device_type() == DeviceType::Strip {
      let children = self.children();
      if !children.is_empty() {
        return Ok(children.iter().any(|child| child.is_on().unwrap_or(false)));
      }
    }
    let info = self.sys_info.read().expect("sysinfo lock never poisoned");
    if info.is_empty() {
      return Err(KasaError::NotNegotiated("is_on".to_owned()));
    }
    Ok(relay_state(&info))
  }

  async fn turn_on(&self) -> KasaResult<()> {
    self.set_relay_state(true).await
  }

  async fn turn_off(&self) -> KasaResult<()> {
    self.set_relay_state(false).await
  }

  fn features(&self) -> Vec<Feature> {
    self.read_state(|state| state.features.clone())
  }
}

/// Plugs report `relay_state`, strip sockets `state`, bulbs a nested
/// light state.
fn relay_state(info: &Map<String, Value>) -> bool {
  if let Some(state) = info.get("relay_state").and_then(Value::as_i64) {
    return state == 1;
  }
  if let Some(state) = info.get("state").and_then(Value::as_i64) {
    return state == 1;
  }
  info
    .get("light_state")
    .and_then(|light| light.get("on_off"))
    .and_then(Value::as_i64)
    .map(|on| on == 1)
    .unwrap_or(false)
}

fn sys_info_from_responses(host: &str, responses: &ResponseMap) -> KasaResult<Map<String, Value>> {
  let system = match responses.get("system") {
    Some(MethodResult::Response(value)) => value,
    Some(MethodResult::Error(code)) => {
      return Err(KasaError::Device {
        host: host.to_owned(),
        code: *code,
      });
    }
    None => {
      return Err(KasaError::Message(format!(
        "sysinfo missing from response for {host}"
      )));
    }
  };
  system
    .get("get_sysinfo")
    .and_then(Value::as_object)
    .cloned()
    .ok_or_else(|| KasaError::Message(format!("get_sysinfo missing from response for {host}")))
}
