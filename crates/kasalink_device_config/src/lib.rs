// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Connection descriptors for Kasalink devices.
//!
//! A [DeviceConfig] carries everything needed to reconnect to a device
//! without running discovery again: address, timeout, login material and the
//! [ConnectionParameters] that select transport and protocol. It is the only
//! serializable artifact the library owns.

#[macro_use]
extern crate log;

#[macro_use]
extern crate strum_macros;

mod connection;
mod device_config;

pub use connection::{ConnectionParameters, DeviceFamily, EncryptionType};
pub use device_config::{CredentialsOutput, DeviceConfig, DeviceConfigBuilder};
