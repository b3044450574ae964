// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Login material for authenticated transports (AES/KLAP).

use getset::Getters;
use serde::{Deserialize, Serialize};

/// Username/password pair used by the AES and KLAP transports.
///
/// Some firmware accepts a well-known pair when the device has never been
/// bound to a cloud account; [Credentials::default_credentials] returns it,
/// and the KLAP handshake falls back to it (and then to
/// [Credentials::blank]) when the provided pair fails the seed check.
#[derive(Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct Credentials {
  #[getset(get = "pub")]
  username: String,
  #[getset(get = "pub")]
  password: String,
}

impl Credentials {
  pub fn new(username: &str, password: &str) -> Self {
    Self {
      username: username.to_owned(),
      password: password.to_owned(),
    }
  }

  /// The pair some firmware accepts when no account has been bound.
  pub fn default_credentials() -> Self {
    Self::new("kasa@tp-link.net", "kasaSetup")
  }

  /// Empty pair, the last resort of the KLAP fallback chain.
  pub fn blank() -> Self {
    Self::new("", "")
  }

  pub fn is_blank(&self) -> bool {
    self.username.is_empty() && self.password.is_empty()
  }
}

// Manual impl so the password never lands in logs.
impl std::fmt::Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials")
      .field("username", &self.username)
      .field("password", &"****")
      .finish()
  }
}
