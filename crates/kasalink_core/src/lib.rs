// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Shared building blocks for the Kasalink library.
//!
//! This crate holds everything the transport, protocol and device layers have
//! in common: the error taxonomy, device-reported error codes, login
//! credentials, and the small value records (emeter readings, light state)
//! that cross layer boundaries.

#[macro_use]
extern crate log;

pub mod credentials;
pub mod emeter;
pub mod errors;
pub mod light;
pub mod util;

pub use credentials::Credentials;
pub use emeter::EmeterStatus;
pub use errors::{KasaError, KasaResult, SmartErrorCode};
pub use light::{ColorTempRange, LightState, HSV};
