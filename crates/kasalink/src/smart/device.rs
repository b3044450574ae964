// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The SMART device engine: component negotiation, module attachment,
//! merged update cycles with response-size-aware batch splitting, feature
//! registration, and the child arena for strips and hubs.

use crate::clock::{Clock, SystemClock};
use crate::device::Device;
use crate::device_type::DeviceType;
use crate::feature::Feature;
use crate::module::{pack_batches, slice_for_module, ModuleRuntime};
use crate::smart::module::{
  default_registry, query_helper, SharedDeviceInfo, SmartModule, SmartModuleContext,
};
use crate::smart::modules::child_device::{CHILD_COMPONENT_METHOD, CHILD_LIST_METHOD};
use crate::smart::modules::device_module::decode_b64_field;
use async_trait::async_trait;
use kasalink_core::errors::{KasaAuthenticationError, KasaError, KasaResult};
use kasalink_core::util::json::merge;
use kasalink_device_config::DeviceConfig;
use kasalink_protocol::{
  response_map_to_value, ChildProtocolWrapper, ChildWrapperMode, MethodResult, Protocol,
  QueryMap, Request, ResponseMap,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;
use tokio::sync::Mutex;

/// Conservative default budget for a SMART response; the engine splits
/// update batches so one response stays under it.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 10 * 1024;

struct SmartState {
  negotiated: bool,
  components: HashMap<String, u32>,
  components_raw: Value,
  modules: Vec<ModuleRuntime<dyn SmartModule>>,
  features: Vec<Feature>,
  features_initialized: bool,
  children: Vec<Arc<SmartDevice>>,
  internal_state: Value,
  last_update: Option<Instant>,
  device_type: DeviceType,
  discovery_info: Option<Value>,
}

pub struct SmartDevice {
  host: String,
  config: DeviceConfig,
  protocol: Arc<dyn Protocol>,
  clock: Arc<dyn Clock>,
  max_response_size: usize,
  // Serializes updates and module operations per device (one in-flight
  // request at a time); the state lock below is only held for short
  // synchronous sections.
  update_lock: Mutex<()>,
  state: RwLock<SmartState>,
  device_info: SharedDeviceInfo,
  parent: Option<Weak<SmartDevice>>,
  child_id: Option<String>,
  self_weak: Weak<SmartDevice>,
}

impl SmartDevice {
  pub fn new(config: DeviceConfig, protocol: Arc<dyn Protocol>) -> Arc<Self> {
    Self::with_options(config, protocol, Arc::new(SystemClock), DEFAULT_MAX_RESPONSE_SIZE)
  }

  pub fn with_options(
    config: DeviceConfig,
    protocol: Arc<dyn Protocol>,
    clock: Arc<dyn Clock>,
    max_response_size: usize,
  ) -> Arc<Self> {
    Arc::new_cyclic(|self_weak| Self {
      host: config.host().clone(),
      config,
      protocol,
      clock,
      max_response_size,
      update_lock: Mutex::new(()),
      state: RwLock::new(SmartState {
        negotiated: false,
        components: HashMap::new(),
        components_raw: Value::Null,
        modules: Vec::new(),
        features: Vec::new(),
        features_initialized: false,
        children: Vec::new(),
        internal_state: Value::Null,
        last_update: None,
        device_type: DeviceType::Unknown,
        discovery_info: None,
      }),
      device_info: SharedDeviceInfo::default(),
      parent: None,
      child_id: None,
      self_weak: self_weak.clone(),
    })
  }

  /// Build a child that routes through the parent's transport. Children
  /// arrive pre-negotiated: the parent already knows their component list.
  fn new_child(
    parent: &Arc<SmartDevice>,
    child_id: &str,
    components: HashMap<String, u32>,
    info: Map<String, Value>,
  ) -> Arc<Self> {
    let protocol: Arc<dyn Protocol> = Arc::new(ChildProtocolWrapper::new(
      child_id,
      parent.protocol.clone(),
      ChildWrapperMode::Smart,
    ));
    let device_type = child_device_type(&info);
    let child = Arc::new_cyclic(|self_weak| Self {
      host: parent.host.clone(),
      config: parent.config.clone(),
      protocol: protocol.clone(),
      clock: parent.clock.clone(),
      max_response_size: parent.max_response_size,
      update_lock: Mutex::new(()),
      state: RwLock::new(SmartState {
        negotiated: true,
        components: components.clone(),
        components_raw: Value::Null,
        modules: Vec::new(),
        features: Vec::new(),
        features_initialized: false,
        children: Vec::new(),
        internal_state: Value::Object(info.clone()),
        last_update: None,
        device_type,
        discovery_info: None,
      }),
      device_info: Arc::new(RwLock::new(info)),
      parent: Some(Arc::downgrade(parent)),
      child_id: Some(child_id.to_owned()),
      self_weak: self_weak.clone(),
    });
    child.attach_modules(&components);
    if let Err(err) = child.initialize_features() {
      warn!("Feature initialization for child {} failed: {}", child_id, err);
    }
    child
  }

  pub fn children(&self) -> Vec<Arc<SmartDevice>> {
    self.read_state(|state| state.children.clone())
  }

  pub fn child_id(&self) -> Option<&str> {
    self.child_id.as_deref()
  }

  pub fn components(&self) -> HashMap<String, u32> {
    self.read_state(|state| state.components.clone())
  }

  /// Raw component negotiation payload, as the device sent it.
  pub fn components_raw(&self) -> Value {
    self.read_state(|state| state.components_raw.clone())
  }

  /// Discovery record this device was built from, if any.
  pub fn discovery_info(&self) -> Option<Value> {
    self.read_state(|state| state.discovery_info.clone())
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

  pub fn has_module(&self, name: &str) -> bool {
    self.read_state(|state| {
      state
        .modules
        .iter()
        .any(|runtime| runtime.module.name() == name)
    })
  }

  fn read_state<T>(&self, read: impl FnOnce(&SmartState) -> T) -> T {
    read(&self.state.read().expect("device state lock never poisoned"))
  }

  fn write_state<T>(&self, write: impl FnOnce(&mut SmartState) -> T) -> T {
    write(&mut self.state.write().expect("device state lock never poisoned"))
  }

  fn require_credentials(&self) -> KasaResult<()> {
    if self.config.credentials().is_none() && self.config.credentials_hash().is_none() {
      return Err(
        KasaAuthenticationError::MissingCredentials(self.host.clone()).into(),
      );
    }
    Ok(())
  }

  async fn negotiate(&self) -> KasaResult<()> {
    let responses = self.protocol.query(Request::from("component_nego")).await?;
    let raw = match responses.get("component_nego") {
      Some(MethodResult::Response(value)) => value.clone(),
      Some(MethodResult::Error(code)) => {
        return Err(KasaError::Device {
          host: self.host.clone(),
          code: *code,
        });
      }
      None => {
        return Err(KasaError::Message(format!(
          "component_nego missing from response for {}",
          self.host
        )));
      }
    };

    let components = parse_component_list(&raw);
    debug!(
      "Negotiated {} components with {}",
      components.len(),
      self.host
    );
    self.write_state(|state| {
      state.components = components.clone();
      state.components_raw = raw;
      state.negotiated = true;
    });
    self.attach_modules(&components);
    Ok(())
  }

  fn attach_modules(&self, components: &HashMap<String, u32>) {
    let mut runtimes = Vec::new();
    for descriptor in default_registry() {
      let version = match descriptor.required_component {
        None => 0,
        Some(component) => match components.get(component) {
          Some(version) if *version >= descriptor.minimum_version => *version,
          _ => continue,
        },
      };
      trace!("Attaching module {} to {}", descriptor.name, self.host);
      let module = (descriptor.constructor)(SmartModuleContext {
        protocol: self.protocol.clone(),
        component_version: version,
        device_info: self.device_info.clone(),
      });
      runtimes.push(ModuleRuntime::new(module));
    }
    self.write_state(|state| state.modules = runtimes);
  }

  /// One steady-state update cycle: interval-gated query collection,
  /// size-aware batching, dispatch, routing, failure bookkeeping.
  async fn run_update_cycle(&self) -> KasaResult<ResponseMap> {
    let now = self.clock.now();

    // (module index, queries, estimated size) for this cycle.
    let cycle: Vec<(usize, QueryMap, usize)> = self.write_state(|state| {
      state
        .modules
        .iter_mut()
        .enumerate()
        .filter_map(|(index, runtime)| {
          let interval = runtime.module.minimum_update_interval();
          if !runtime.should_poll(now, interval) {
            return None;
          }
          let queries = runtime.module.query();
          if queries.is_empty() {
            return None;
          }
          runtime.record_polled(now);
          let estimate = runtime.module.estimated_query_response_size();
          Some((index, queries, estimate))
        })
        .collect()
    });

    let batches = pack_batches(
      cycle
        .iter()
        .map(|(_, queries, estimate)| (queries.clone(), *estimate))
        .collect(),
      self.max_response_size,
    );
    trace!(
      "Update cycle for {}: {} modules in {} batches",
      self.host,
      cycle.len(),
      batches.len()
    );

    // A transport-level failure aborts the whole update here, leaving
    // internal_state untouched.
    let responses = self.protocol.query_batches(batches).await?;

    let merged = response_map_to_value(&responses);
    self.write_state(|state| {
      if !state.internal_state.is_object() {
        state.internal_state = json!({});
      }
      merge(&mut state.internal_state, &merged);

      for (index, queries, _) in &cycle {
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
    self.require_credentials()?;
    let _guard = self.update_lock.lock().await;

    if !self.read_state(|state| state.negotiated) {
      self.negotiate().await?;
    }

    let responses = self.run_update_cycle().await?;

    if responses.contains_key(CHILD_LIST_METHOD) {
      self.refresh_children(&responses).await?;
    } else if self.parent.is_none() {
      // Childless devices classify straight from family and components.
      self.write_state(|state| {
        state.device_type = DeviceType::from_smart_components(
          &self.config.connection().device_family.to_string(),
          &state.components,
          false,
          false,
        );
      });
    }

    if !self.read_state(|state| state.features_initialized) {
      self.initialize_features()?;
    }

    if update_children && self.read_state(|state| state.device_type) == DeviceType::Hub {
      // Hub children answer their own queries through the child wrapper;
      // one child failing must not fail the others. A child the device no
      // longer knows is shed from the arena.
      for child in self.children() {
        match Box::pin(child.update_impl(false)).await {
          Ok(()) => {}
          Err(KasaError::ChildDeviceGone(child_id)) => {
            info!("Child {} no longer on {}, removing", child_id, self.host);
            self.write_state(|state| {
              state
                .children
                .retain(|candidate| candidate.child_id() != Some(child_id.as_str()));
            });
          }
          Err(err) => {
            warn!(
              "Updating child {} of {} failed: {}",
              child.child_id().unwrap_or("?"),
              self.host,
              err
            );
          }
        }
      }
    }
    Ok(())
  }

  /// Create or refresh the child arena from the child-list responses.
  /// Strips push the per-child info downward; hubs let children poll.
  async fn refresh_children(&self, responses: &ResponseMap) -> KasaResult<()> {
    let Some(MethodResult::Response(child_list)) = responses.get(CHILD_LIST_METHOD) else {
      return Ok(());
    };
    let entries: Vec<Map<String, Value>> = child_list
      .get("child_device_list")
      .and_then(Value::as_array)
      .map(|list| {
        list
          .iter()
          .filter_map(Value::as_object)
          .cloned()
          .collect()
      })
      .unwrap_or_default();

    let have_children = !self.read_state(|state| state.children.is_empty());
    if !have_children {
      let component_map = responses
        .get(CHILD_COMPONENT_METHOD)
        .and_then(MethodResult::response)
        .map(parse_child_components)
        .unwrap_or_default();

      let Some(parent) = self.self_weak.upgrade() else {
        return Ok(());
      };
      let mut children = Vec::with_capacity(entries.len());
      for info in &entries {
        let Some(child_id) = info.get("device_id").and_then(Value::as_str) else {
          warn!("Child entry without device_id on {}", self.host);
          continue;
        };
        let components = component_map.get(child_id).cloned().unwrap_or_default();
        children.push(SmartDevice::new_child(&parent, child_id, components, info.clone()));
      }
      debug!("Initialized {} children for {}", children.len(), self.host);
      self.write_state(|state| state.children = children);
    } else {
      // Parent-pushed refresh path.
      let children = self.children();
      for info in &entries {
        let Some(child_id) = info.get("device_id").and_then(Value::as_str) else {
          continue;
        };
        if let Some(child) = children
          .iter()
          .find(|child| child.child_id() == Some(child_id))
        {
          child.push_parent_info(info.clone());
        }
      }
    }

    // Knowing the children lets us finally classify strip vs hub.
    let children = self.children();
    let all_plugs = !children.is_empty()
      && children.iter().all(|child| {
        matches!(
          child.device_type(),
          DeviceType::Plug | DeviceType::StripSocket
        )
      });
    self.write_state(|state| {
      state.device_type = DeviceType::from_smart_components(
        &self.config.connection().device_family.to_string(),
        &state.components,
        !children.is_empty(),
        all_plugs,
      );
    });
    Ok(())
  }

  /// Parent-pushed state for strip sockets: the pushed info must look the
  /// same as what a standalone query would have produced.
  fn push_parent_info(&self, info: Map<String, Value>) {
    *self
      .device_info
      .write()
      .expect("device info lock never poisoned") = info.clone();
    self.write_state(|state| state.internal_state = Value::Object(info));
  }

  fn initialize_features(&self) -> KasaResult<()> {
    let mut features: Vec<Feature> = Vec::new();
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

  fn info_field(&self, key: &str) -> Option<Value> {
    let info = self.device_info.read().expect("device info lock never poisoned");
    info.get(key).cloned()
  }

  pub async fn set_state(&self, on: bool) -> KasaResult<()> {
    let _guard = self.update_lock.lock().await;
    query_helper(&self.protocol, "set_device_info", json!({"device_on": on})).await?;
    Ok(())
  }

  pub async fn reboot(&self, delay_secs: u32) -> KasaResult<()> {
    let _guard = self.update_lock.lock().await;
    query_helper(&self.protocol, "device_reboot", json!({"delay": delay_secs})).await?;
    Ok(())
  }

  pub async fn factory_reset(&self) -> KasaResult<()> {
    let _guard = self.update_lock.lock().await;
    query_helper(&self.protocol, "device_reset", Value::Null).await?;
    Ok(())
  }

  pub async fn set_alias(&self, alias: &str) -> KasaResult<()> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    let _guard = self.update_lock.lock().await;
    query_helper(
      &self.protocol,
      "set_device_info",
      json!({"nickname": BASE64.encode(alias)}),
    )
    .await?;
    Ok(())
  }

  /// Set hue/saturation (and optionally value) on color-capable devices.
  pub async fn set_hsv(&self, hsv: kasalink_core::light::HSV) -> KasaResult<()> {
    let _guard = self.update_lock.lock().await;
    query_helper(
      &self.protocol,
      "set_device_info",
      json!({
        "hue": hsv.hue(),
        "saturation": hsv.saturation(),
        "brightness": hsv.value(),
        "color_temp": 0,
      }),
    )
    .await?;
    Ok(())
  }

  /// Scan for access points the device can see. The device pages results
  /// ten at a time.
  pub async fn wifi_scan(&self) -> KasaResult<Vec<Value>> {
    let _guard = self.update_lock.lock().await;
    let mut networks = Vec::new();
    let mut start_index = 0u64;
    loop {
      let response = query_helper(
        &self.protocol,
        "get_wireless_scan_info",
        json!({"start_index": start_index}),
      )
      .await?;
      if let Some(list) = response.get("ap_list").and_then(Value::as_array) {
        networks.extend(list.iter().cloned());
      }
      let total = response.get("sum").and_then(Value::as_u64).unwrap_or(0);
      start_index += 10;
      if total <= start_index {
        return Ok(networks);
      }
    }
  }

  /// Join a wifi network. The device applies the settings immediately
  /// instead of answering, so a timeout here is expected and swallowed.
  pub async fn wifi_join(&self, ssid: &str, password: &str, key_type: &str) -> KasaResult<()> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    let Some(credentials) = self.config.credentials() else {
      return Err(KasaAuthenticationError::MissingCredentials(self.host.clone()).into());
    };
    let time = self.read_state(|state| {
      state
        .internal_state
        .get("get_device_time")
        .cloned()
        .unwrap_or(Value::Null)
    });
    let payload = json!({
      "account": {
        "username": BASE64.encode(credentials.username()),
        "password": BASE64.encode(credentials.password()),
      },
      "wireless": {
        "key_type": key_type,
        "password": BASE64.encode(password),
        "ssid": BASE64.encode(ssid),
      },
      "time": time,
    });
    let _guard = self.update_lock.lock().await;
    let mut queries = QueryMap::new();
    queries.insert("set_qs_info".to_owned(), payload);
    match self.protocol.query_with_retries(Request::Map(queries), 0).await {
      Ok(_) => Ok(()),
      Err(err @ KasaError::Device { .. }) => Err(err),
      Err(err) => {
        debug!("No reply to wifi join from {} ({}), expected", self.host, err);
        Ok(())
      }
    }
  }

  /// Replace the account credentials stored on the device.
  pub async fn update_credentials(&self, username: &str, password: &str) -> KasaResult<()> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    let time = self.read_state(|state| {
      state
        .internal_state
        .get("get_device_time")
        .cloned()
        .unwrap_or(Value::Null)
    });
    let _guard = self.update_lock.lock().await;
    query_helper(
      &self.protocol,
      "set_qs_info",
      json!({
        "account": {
          "username": BASE64.encode(username),
          "password": BASE64.encode(password),
        },
        "time": time,
      }),
    )
    .await?;
    Ok(())
  }
}

#[async_trait]
impl Device for SmartDevice {
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
    let info = self.device_info.read().expect("device info lock never poisoned");
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
      .info_field("nickname")
      .map(|value| decode_b64_field(&value))
      .and_then(|value| value.as_str().map(str::to_owned))
  }

  fn model(&self) -> Option<String> {
    self
      .info_field("model")
      .and_then(|value| value.as_str().map(str::to_owned))
  }

  fn device_id(&self) -> Option<String> {
    self
      .info_field("device_id")
      .and_then(|value| value.as_str().map(str::to_owned))
  }

  fn is_on(&self) -> KasaResult<bool> {
    let info = self.device_info.read().expect("device info lock never poisoned");
    if info.is_empty() {
      return Err(KasaError::NotNegotiated("is_on".to_owned()));
    }
    Ok(info.get("device_on").and_then(Value::as_bool).unwrap_or(false))
  }

  async fn turn_on(&self) -> KasaResult<()> {
    self.set_state(true).await
  }

  async fn turn_off(&self) -> KasaResult<()> {
    self.set_state(false).await
  }

  fn features(&self) -> Vec<Feature> {
    self.read_state(|state| state.features.clone())
  }
}

fn parse_component_list(raw: &Value) -> HashMap<String, u32> {
  raw
    .get("component_list")
    .and_then(Value::as_array)
    .map(|list| {
      list
        .iter()
        .filter_map(|component| {
          let id = component.get("id").and_then(Value::as_str)?;
          let version = component.get("ver_code").and_then(Value::as_u64).unwrap_or(1);
          Some((id.to_owned(), version as u32))
        })
        .collect()
    })
    .unwrap_or_default()
}

fn parse_child_components(raw: &Value) -> HashMap<String, HashMap<String, u32>> {
  raw
    .get("child_component_list")
    .and_then(Value::as_array)
    .map(|list| {
      list
        .iter()
        .filter_map(|entry| {
          let id = entry.get("device_id").and_then(Value::as_str)?;
          Some((id.to_owned(), parse_component_list(entry)))
        })
        .collect()
    })
    .unwrap_or_default()
}

/// Children report a `category` string rather than a component set.
fn child_device_type(info: &Map<String, Value>) -> DeviceType {
  let category = info
    .get("category")
    .and_then(Value::as_str)
    .unwrap_or_default();
  if category.contains("plug") {
    DeviceType::StripSocket
  } else if category.contains("sensor") {
    DeviceType::Sensor
  } else if category.contains("thermostat") {
    DeviceType::Thermostat
  } else if category.is_empty() {
    DeviceType::Unknown
  } else {
    debug!("Unrecognized child category '{}'", category);
    DeviceType::Unknown
  }
}
