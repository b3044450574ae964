// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Shared fakes: a scriptable SMART device state usable both behind an
//! in-process transport and behind the real KLAP HTTP server, plus an IOT
//! responder.

pub mod fake_iot;
pub mod fake_smart;
pub mod klap_server;
pub mod udp_responder;

#[allow(unused_imports)]
pub use fake_iot::FakeIotTransport;
#[allow(unused_imports)]
pub use fake_smart::{FakeChildState, FakeSmartState, FakeSmartTransport};
