// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! HTTPS variant of the AES transport used by cameras and doorbells. The
//! login yields an `stok` path token instead of a query token, and every
//! request carries an HMAC-SHA256 tag header binding the session nonce and
//! request sequence to the body. Device certificates are self-signed and
//! accepted as such.

use crate::aes_transport::check_envelope_code;
use crate::crypto::{aes_cipher, rsa_session::RsaSessionKeys};
use crate::http_session::HttpSession;
use crate::Transport;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use kasalink_core::credentials::Credentials;
use kasalink_core::errors::{KasaError, KasaProtocolError, KasaResult};
use kasalink_device_config::DeviceConfig;
use rand::Rng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

pub const SSL_AES_DEFAULT_PORT: u16 = 443;

type HmacSha256 = Hmac<Sha256>;

struct SslAesSession {
  key: [u8; 16],
  iv: [u8; 16],
  stok: String,
  cnonce: String,
  seq: u32,
}

impl SslAesSession {
  /// Tag header: HMAC over the sequence number and request body, keyed by a
  /// digest of the password and the session nonce.
  fn tag_for(&self, password: &str, body: &[u8]) -> String {
    let mut key_input = Vec::new();
    key_input.extend_from_slice(password.as_bytes());
    key_input.extend_from_slice(self.cnonce.as_bytes());
    let tag_key = Sha256::digest(&key_input);

    let mut mac =
      HmacSha256::new_from_slice(&tag_key).expect("HMAC accepts any key length");
    mac.update(self.seq.to_string().as_bytes());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
  }
}

pub struct SslAesTransport {
  http: HttpSession,
  credentials: Credentials,
  state: Mutex<Option<SslAesSession>>,
}

impl SslAesTransport {
  pub fn new(config: &DeviceConfig) -> KasaResult<Self> {
    let credentials = config
      .credentials()
      .clone()
      .unwrap_or_else(Credentials::blank);
    Ok(Self {
      http: HttpSession::from_config(config, SSL_AES_DEFAULT_PORT, true)?,
      credentials,
      state: Mutex::new(None),
    })
  }

  async fn perform_login(&self) -> KasaResult<SslAesSession> {
    let keys = RsaSessionKeys::generate()?;
    let request = json!({
      "method": "handshake",
      "params": {"key": keys.public_key_pem()}
    });
    debug!("Starting camera handshake with {}", self.http.host());
    let response = self.http.post_json("/", &request).await?;
    check_envelope_code(self.http.host(), &response)?;
    let encoded = response
      .pointer("/result/key")
      .and_then(Value::as_str)
      .ok_or_else(|| {
        KasaError::from(KasaProtocolError::MissingKey(
          self.http.host().to_owned(),
          "result.key".to_owned(),
        ))
      })?;
    let blob = BASE64.decode(encoded).map_err(|err| {
      KasaError::from(KasaProtocolError::Framing(
        self.http.host().to_owned(),
        format!("handshake key: {err}"),
      ))
    })?;
    let (key, iv) = keys.decrypt_session_seed(&blob)?;

    let cnonce = hex::encode(rand::thread_rng().r#gen::<[u8; 8]>());
    let login = json!({
      "method": "login_device",
      "params": {
        "username": self.credentials.username(),
        "password": BASE64.encode(self.credentials.password()),
        "cnonce": cnonce,
      }
    });
    let response = self.passthrough(&key, &iv, None, &login).await?;
    check_envelope_code(self.http.host(), &response)?;
    let stok = response
      .pointer("/result/stok")
      .and_then(Value::as_str)
      .ok_or_else(|| {
        KasaError::from(KasaProtocolError::MissingKey(
          self.http.host().to_owned(),
          "result.stok".to_owned(),
        ))
      })?
      .to_owned();
    debug!("Camera login to {} complete", self.http.host());
    Ok(SslAesSession {
      key,
      iv,
      stok,
      cnonce,
      seq: 0,
    })
  }

  async fn passthrough(
    &self,
    key: &[u8; 16],
    iv: &[u8; 16],
    session: Option<&mut SslAesSession>,
    request: &Value,
  ) -> KasaResult<Value> {
    let plaintext = serde_json::to_vec(request)
      .map_err(|err| KasaProtocolError::RequestSerialization(err.to_string()))?;
    let envelope = json!({
      "method": "securePassthrough",
      "params": {"request": BASE64.encode(aes_cipher::cbc_encrypt(key, iv, &plaintext))}
    });
    let body = serde_json::to_vec(&envelope)
      .map_err(|err| KasaProtocolError::RequestSerialization(err.to_string()))?;

    let outer = match session {
      Some(session) => {
        session.seq = session.seq.wrapping_add(1);
        let tag = session.tag_for(self.credentials.password(), &body);
        let path = format!("/stok={}/ds", session.stok);
        // The tag rides in the envelope rather than a header so the byte
        // stream matches what the device signs.
        let tagged = json!({
          "tag": tag,
          "seq": session.seq,
          "request": envelope,
        });
        self.http.post_json(&path, &tagged).await?
      }
      None => self.http.post_json("/", &envelope).await?,
    };
    check_envelope_code(self.http.host(), &outer)?;

    let inner = outer
      .pointer("/result/response")
      .and_then(Value::as_str)
      .ok_or_else(|| {
        KasaError::from(KasaProtocolError::MissingKey(
          self.http.host().to_owned(),
          "result.response".to_owned(),
        ))
      })?;
    let ciphertext = BASE64.decode(inner).map_err(|err| {
      KasaError::from(KasaProtocolError::Framing(
        self.http.host().to_owned(),
        format!("passthrough body: {err}"),
      ))
    })?;
    let plaintext = aes_cipher::cbc_decrypt(key, iv, &ciphertext)?;
    serde_json::from_slice(&plaintext).map_err(|err| KasaError::json(self.http.host(), &err))
  }
}

#[async_trait]
impl Transport for SslAesTransport {
  fn default_port(&self) -> u16 {
    SSL_AES_DEFAULT_PORT
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
      let mut state = self.state.lock().await;
      if state.is_none() {
        *state = Some(self.perform_login().await?);
      }
      let session = state.as_mut().expect("session populated above");
      let (key, iv) = (session.key, session.iv);
      match self.passthrough(&key, &iv, Some(session), &request).await {
        Err(KasaError::InvalidSession) if attempt == 0 => {
          debug!("Camera session with {} expired, logging in again", self.http.host());
          *state = None;
          self.http.clear_cookie();
        }
        other => return other,
      }
    }
    Err(KasaError::InvalidSession)
  }

  async fn reset(&self) {
    *self.state.lock().await = None;
    self.http.clear_cookie();
  }

  async fn close(&self) {
    self.reset().await;
  }
}
