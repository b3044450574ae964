// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Plain HTTPS transport used by some camera firmware revisions: no payload
//! encryption, just a login for an `stok` path token and JSON bodies over
//! TLS with a self-signed certificate.

use crate::aes_transport::check_envelope_code;
use crate::http_session::HttpSession;
use crate::Transport;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kasalink_core::credentials::Credentials;
use kasalink_core::errors::{KasaError, KasaProtocolError, KasaResult};
use kasalink_device_config::DeviceConfig;
use serde_json::{json, Value};
use tokio::sync::Mutex;

pub const SSL_DEFAULT_PORT: u16 = 443;

pub struct SslTransport {
  http: HttpSession,
  credentials: Credentials,
  stok: Mutex<Option<String>>,
}

impl SslTransport {
  pub fn new(config: &DeviceConfig) -> KasaResult<Self> {
    let credentials = config
      .credentials()
      .clone()
      .unwrap_or_else(Credentials::blank);
    Ok(Self {
      http: HttpSession::from_config(config, SSL_DEFAULT_PORT, true)?,
      credentials,
      stok: Mutex::new(None),
    })
  }

  async fn login(&self) -> KasaResult<String> {
    let request = json!({
      "method": "login",
      "params": {
        "username": self.credentials.username(),
        "password": BASE64.encode(self.credentials.password()),
      }
    });
    debug!("Logging in to {} over plain TLS", self.http.host());
    let response = self.http.post_json("/", &request).await?;
    check_envelope_code(self.http.host(), &response)?;
    response
      .pointer("/result/stok")
      .and_then(Value::as_str)
      .map(str::to_owned)
      .ok_or_else(|| {
        KasaError::from(KasaProtocolError::MissingKey(
          self.http.host().to_owned(),
          "result.stok".to_owned(),
        ))
      })
  }
}

#[async_trait]
impl Transport for SslTransport {
  fn default_port(&self) -> u16 {
    SSL_DEFAULT_PORT
  }

  fn credentials_hash(&self) -> Option<String> {
    let material = json!({
      "un": self.credentials.username(),
      "pwd": self.credentials.password()
    });
    Some(BASE64.encode(material.to_string()))
  }

  async fn send(&self, request: &str) -> KasaResult<Value> {
    let request: Value =
      serde_json::from_str(request).map_err(|err| KasaError::json(self.http.host(), &err))?;
    for attempt in 0..2 {
      let mut stok = self.stok.lock().await;
      if stok.is_none() {
        *stok = Some(self.login().await?);
      }
      let token = stok.as_ref().expect("token populated above").clone();
      drop(stok);

      let response = self
        .http
        .post_json(&format!("/stok={token}/ds"), &request)
        .await?;
      match check_envelope_code(self.http.host(), &response) {
        Err(KasaError::InvalidSession) if attempt == 0 => {
          debug!("stok for {} no longer valid, logging in again", self.http.host());
          *self.stok.lock().await = None;
          self.http.clear_cookie();
        }
        Err(err) => return Err(err),
        Ok(()) => return Ok(response),
      }
    }
    Err(KasaError::InvalidSession)
  }

  async fn reset(&self) {
    *self.stok.lock().await = None;
    self.http.clear_cookie();
  }

  async fn close(&self) {
    self.reset().await;
  }
}
