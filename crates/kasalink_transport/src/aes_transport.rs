// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! AES transport for SMART devices: RSA key exchange, `login_device` token,
//! then AES-CBC `securePassthrough` envelopes over plain HTTP.

use crate::crypto::{aes_cipher, klap_cipher, rsa_session::RsaSessionKeys};
use crate::http_session::HttpSession;
use crate::Transport;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kasalink_core::credentials::Credentials;
use kasalink_core::errors::{
  KasaAuthenticationError, KasaError, KasaProtocolError, KasaResult, SmartErrorCode,
};
use kasalink_device_config::DeviceConfig;
use serde_json::{json, Value};
use tokio::sync::Mutex;

pub const AES_DEFAULT_PORT: u16 = 80;

enum AesSession {
  Fresh,
  LoggedIn {
    key: [u8; 16],
    iv: [u8; 16],
    token: String,
  },
}

pub struct AesTransport {
  http: HttpSession,
  credentials: Credentials,
  login_version: u8,
  state: Mutex<AesSession>,
}

impl AesTransport {
  pub fn new(config: &DeviceConfig) -> KasaResult<Self> {
    let credentials = resolve_credentials(config)?;
    let login_version = config.connection().login_version.unwrap_or(2);
    Ok(Self {
      http: HttpSession::from_config(config, AES_DEFAULT_PORT, false)?,
      credentials,
      login_version,
      state: Mutex::new(AesSession::Fresh),
    })
  }

  async fn handshake(&self) -> KasaResult<([u8; 16], [u8; 16])> {
    let keys = RsaSessionKeys::generate()?;
    let request = json!({
      "method": "handshake",
      "params": {"key": keys.public_key_pem()}
    });
    debug!("Starting AES handshake with {}", self.http.host());
    let response = self.http.post_json("/app", &request).await?;
    check_envelope_code(self.http.host(), &response)?;

    let encoded = response
      .pointer("/result/key")
      .and_then(Value::as_str)
      .ok_or_else(|| missing_key(self.http.host(), "result.key"))?;
    let blob = BASE64
      .decode(encoded)
      .map_err(|err| framing(self.http.host(), &format!("handshake key: {err}")))?;
    keys.decrypt_session_seed(&blob)
  }

  async fn login(&self, key: &[u8; 16], iv: &[u8; 16]) -> KasaResult<String> {
    // Login version 2 hashes the username before encoding; version 1 sends
    // both fields as plain base64. Field order matters to some firmware, so
    // both variants keep username first.
    let username = match self.login_version {
      1 => BASE64.encode(self.credentials.username()),
      _ => {
        let digest = klap_cipher::sha1(self.credentials.username().as_bytes());
        BASE64.encode(hex::encode(digest))
      }
    };
    let password = BASE64.encode(self.credentials.password());
    let request = json!({
      "method": "login_device",
      "params": {"username": username, "password": password}
    });

    let response = self.passthrough(key, iv, None, &request).await?;
    check_envelope_code(self.http.host(), &response)?;
    response
      .pointer("/result/token")
      .and_then(Value::as_str)
      .map(str::to_owned)
      .ok_or_else(|| missing_key(self.http.host(), "result.token"))
  }

  async fn passthrough(
    &self,
    key: &[u8; 16],
    iv: &[u8; 16],
    token: Option<&str>,
    request: &Value,
  ) -> KasaResult<Value> {
    let plaintext = serde_json::to_vec(request)
      .map_err(|err| KasaProtocolError::RequestSerialization(err.to_string()))?;
    let envelope = json!({
      "method": "securePassthrough",
      "params": {"request": BASE64.encode(aes_cipher::cbc_encrypt(key, iv, &plaintext))}
    });
    let path = match token {
      Some(token) => format!("/app?token={token}"),
      None => "/app".to_owned(),
    };
    let outer = self.http.post_json(&path, &envelope).await?;
    check_envelope_code(self.http.host(), &outer)?;

    let inner = outer
      .pointer("/result/response")
      .and_then(Value::as_str)
      .ok_or_else(|| missing_key(self.http.host(), "result.response"))?;
    let ciphertext = BASE64
      .decode(inner)
      .map_err(|err| framing(self.http.host(), &format!("passthrough body: {err}")))?;
    let plaintext = aes_cipher::cbc_decrypt(key, iv, &ciphertext)?;
    serde_json::from_slice(&plaintext).map_err(|err| KasaError::json(self.http.host(), &err))
  }

  async fn ensure_session(&self) -> KasaResult<([u8; 16], [u8; 16], String)> {
    let mut state = self.state.lock().await;
    if let AesSession::LoggedIn { key, iv, token } = &*state {
      return Ok((*key, *iv, token.clone()));
    }
    let (key, iv) = self.handshake().await?;
    let token = self.login(&key, &iv).await?;
    debug!("AES login to {} complete", self.http.host());
    *state = AesSession::LoggedIn {
      key,
      iv,
      token: token.clone(),
    };
    Ok((key, iv, token))
  }
}

#[async_trait]
impl Transport for AesTransport {
  fn default_port(&self) -> u16 {
    AES_DEFAULT_PORT
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
    // An expired session gets exactly one in-transport re-handshake before
    // the error propagates.
    for attempt in 0..2 {
      let (key, iv, token) = self.ensure_session().await?;
      match self.passthrough(&key, &iv, Some(&token), &request).await {
        Err(KasaError::InvalidSession) if attempt == 0 => {
          debug!("Session with {} expired, re-handshaking", self.http.host());
          self.reset().await;
        }
        other => return other,
      }
    }
    Err(KasaError::InvalidSession)
  }

  async fn reset(&self) {
    *self.state.lock().await = AesSession::Fresh;
    self.http.clear_cookie();
  }

  async fn close(&self) {
    self.reset().await;
  }
}

fn resolve_credentials(config: &DeviceConfig) -> KasaResult<Credentials> {
  if let Some(hash) = config.credentials_hash() {
    let decoded = BASE64
      .decode(hash)
      .map_err(|_| KasaError::Config("credentials_hash is not valid base64".to_owned()))?;
    let material: Value = serde_json::from_slice(&decoded)
      .map_err(|_| KasaError::Config("credentials_hash does not decode to login material".to_owned()))?;
    let username = material.get("un").and_then(Value::as_str).unwrap_or_default();
    let password = material.get("pwd").and_then(Value::as_str).unwrap_or_default();
    return Ok(Credentials::new(username, password));
  }
  Ok(config.credentials().clone().unwrap_or_else(Credentials::blank))
}

/// Interpret a whole-envelope `error_code`: session errors become
/// [KasaError::InvalidSession], auth errors authentication failures, the
/// rest device errors.
pub(crate) fn check_envelope_code(host: &str, response: &Value) -> KasaResult<()> {
  let raw = response.get("error_code").and_then(Value::as_i64).unwrap_or(0);
  let code = SmartErrorCode::from_code(raw);
  if code.is_success() {
    return Ok(());
  }
  if code.is_session_error() {
    return Err(KasaError::InvalidSession);
  }
  if code.is_auth_error() {
    return Err(
      KasaAuthenticationError::LoginFailed(host.to_owned(), code.to_string()).into(),
    );
  }
  Err(KasaError::Device {
    host: host.to_owned(),
    code,
  })
}

fn missing_key(host: &str, key: &str) -> KasaError {
  KasaProtocolError::MissingKey(host.to_owned(), key.to_owned()).into()
}

fn framing(host: &str, detail: &str) -> KasaError {
  KasaProtocolError::Framing(host.to_owned(), detail.to_owned()).into()
}
