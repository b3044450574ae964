// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

pub mod brightness;
pub mod child_device;
pub mod cloud;
pub mod color_temperature;
pub mod device_module;
pub mod energy;
pub mod overheat;
pub mod time;
