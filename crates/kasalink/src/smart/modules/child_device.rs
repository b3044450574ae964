// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Queries for child-bearing devices (strips and hubs). The module only
//! contributes the child list queries; the device engine consumes the
//! responses to build and refresh its child arena.

use crate::smart::module::{SmartModule, SmartModuleDescriptor};
use kasalink_protocol::QueryMap;
use serde_json::Value;

pub const NAME: &str = "ChildDevice";

pub const CHILD_LIST_METHOD: &str = "get_child_device_list";
pub const CHILD_COMPONENT_METHOD: &str = "get_child_device_component_list";

pub fn descriptor() -> SmartModuleDescriptor {
  SmartModuleDescriptor {
    name: NAME,
    required_component: Some("child_device"),
    minimum_version: 0,
    constructor: |_context| Box::new(ChildDeviceModule {}),
  }
}

pub struct ChildDeviceModule {}

impl SmartModule for ChildDeviceModule {
  fn name(&self) -> &'static str {
    NAME
  }

  fn query(&self) -> QueryMap {
    let mut queries = QueryMap::new();
    queries.insert(CHILD_LIST_METHOD.to_owned(), Value::Null);
    queries.insert(CHILD_COMPONENT_METHOD.to_owned(), Value::Null);
    queries
  }

  fn estimated_query_response_size(&self) -> usize {
    4096
  }
}
