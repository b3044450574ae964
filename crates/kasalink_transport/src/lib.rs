// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Wire transports for both TP-Link device generations.
//!
//! A transport owns one device's session: it runs the handshake its
//! encryption scheme requires, encrypts/decrypts single request blobs, and
//! tracks cookies, tokens and sequence counters. Session expiry surfaces as
//! [KasaError::InvalidSession](kasalink_core::errors::KasaError) so the
//! protocol layer above can reset and retry without exception control flow.

#[macro_use]
extern crate log;

pub mod crypto;
mod http_session;

mod aes_transport;
mod klap_transport;
mod ssl_aes_transport;
mod ssl_transport;
mod xor_transport;

pub use aes_transport::AesTransport;
pub use http_session::HttpSession;
pub use klap_transport::KlapTransport;
pub use ssl_aes_transport::SslAesTransport;
pub use ssl_transport::SslTransport;
pub use xor_transport::{XorMode, XorTransport};

use async_trait::async_trait;
use kasalink_core::errors::KasaResult;
use serde_json::Value;

/// Default port used only by the SMART discovery probe; the transports
/// themselves never bind it.
pub const DISCOVERY_PORT: u16 = 20002;

/// One transport instance per device. `send` runs the handshake lazily, so a
/// freshly constructed transport is cheap until first use.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Port used when the config carries no override.
  fn default_port(&self) -> u16;

  /// Opaque, stable reconnect material a caller can persist instead of the
  /// password. None when the scheme has no login.
  fn credentials_hash(&self) -> Option<String>;

  /// Perform the handshake if needed, send one encrypted request, return
  /// the decrypted response payload.
  async fn send(&self, request: &str) -> KasaResult<Value>;

  /// Forget all session state; the next send re-handshakes.
  async fn reset(&self);

  /// Release sockets and any owned HTTP client.
  async fn close(&self);
}
