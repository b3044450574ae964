// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! SMART (Tapo and newer Kasa) device engine.

pub mod device;
pub mod module;
pub mod modules;

pub use device::SmartDevice;
pub use module::{SmartModule, SmartModuleContext, SmartModuleDescriptor};
