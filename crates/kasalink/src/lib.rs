// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Discover, authenticate and control TP-Link Kasa/Tapo smart home devices.
//!
//! The library speaks both device generations: the legacy IOT line (XOR
//! framing, flat JSON) and the SMART line (KLAP or AES sessions,
//! `multipleRequest` batching), plus the HTTPS camera variants. Devices are
//! composed of feature modules discovered through component negotiation;
//! one `update()` merges every module's queries into as few wire round
//! trips as the device's response budget allows and routes the results back
//! to the modules that asked for them.
//!
//! Entry points: [Discover] for finding devices on the local network,
//! [device_factory::connect] for reconnecting with a stored
//! [DeviceConfig](kasalink_device_config::DeviceConfig).

#[macro_use]
extern crate log;

#[macro_use]
extern crate strum_macros;

pub mod clock;
pub mod device;
pub mod device_factory;
pub mod device_type;
pub mod discover;
pub mod feature;
pub mod iot;
pub mod module;
pub mod smart;
pub mod smartcam;

pub use clock::{Clock, SystemClock};
pub use device::{Device, UnauthenticatedDevice};
pub use device_type::DeviceType;
pub use discover::{Discover, DiscoverOptions, DiscoveryResult};
pub use feature::{Feature, FeatureCategory, FeatureType};

pub use kasalink_core::credentials::Credentials;
pub use kasalink_core::emeter::EmeterStatus;
pub use kasalink_core::errors::{KasaError, KasaResult, SmartErrorCode};
pub use kasalink_core::light::{ColorTempRange, LightState, HSV};
pub use kasalink_device_config::{
  ConnectionParameters, DeviceConfig, DeviceFamily, EncryptionType,
};
