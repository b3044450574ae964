// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! KLAP transport: two-stage seeded handshake, then digest-framed AES
//! requests on `/app/request?seq=N`. No token; the session lives in the
//! `TP_SESSIONID` cookie and the derived cipher state.

use crate::crypto::klap_cipher::{
  auth_hash_for_version, handshake1_server_hash, handshake2_payload, KlapCipher,
};
use crate::http_session::HttpSession;
use crate::Transport;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kasalink_core::credentials::Credentials;
use kasalink_core::errors::{
  KasaAuthenticationError, KasaConnectionError, KasaError, KasaProtocolError, KasaResult,
  SmartErrorCode,
};
use kasalink_device_config::DeviceConfig;
use rand::Rng;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const KLAP_DEFAULT_PORT: u16 = 80;

// Re-handshake slightly before the device would drop us.
const SESSION_EXPIRY_GUARD: Duration = Duration::from_secs(2);

struct KlapSession {
  cipher: KlapCipher,
  expires_at: Option<Instant>,
}

impl KlapSession {
  fn is_expired(&self) -> bool {
    self
      .expires_at
      .map(|deadline| Instant::now() >= deadline)
      .unwrap_or(false)
  }
}

pub struct KlapTransport {
  http: HttpSession,
  credentials: Option<Credentials>,
  auth_hash_override: Option<[u8; 32]>,
  login_version: u8,
  new_klap: bool,
  state: Mutex<Option<KlapSession>>,
}

impl KlapTransport {
  pub fn new(config: &DeviceConfig) -> KasaResult<Self> {
    let auth_hash_override = match config.credentials_hash() {
      Some(hash) => {
        let decoded = BASE64
          .decode(hash)
          .map_err(|_| KasaError::Config("credentials_hash is not valid base64".to_owned()))?;
        let hash: [u8; 32] = decoded.try_into().map_err(|_| {
          KasaError::Config("KLAP credentials_hash must decode to 32 bytes".to_owned())
        })?;
        Some(hash)
      }
      None => None,
    };
    Ok(Self {
      http: HttpSession::from_config(config, KLAP_DEFAULT_PORT, false)?,
      credentials: config.credentials().clone(),
      auth_hash_override,
      login_version: config.connection().login_version.unwrap_or(2),
      new_klap: config.connection().uses_new_klap,
      state: Mutex::new(None),
    })
  }

  /// Auth-hash candidates in fallback order: configured material first,
  /// then the well-known default pair, then blank credentials.
  fn auth_hash_candidates(&self) -> Vec<(&'static str, [u8; 32])> {
    let mut candidates = Vec::with_capacity(3);
    if let Some(hash) = self.auth_hash_override {
      candidates.push(("configured hash", hash));
    } else if let Some(credentials) = &self.credentials {
      candidates.push((
        "provided credentials",
        auth_hash_for_version(credentials, self.login_version),
      ));
    }
    candidates.push((
      "default credentials",
      auth_hash_for_version(&Credentials::default_credentials(), self.login_version),
    ));
    candidates.push((
      "blank credentials",
      auth_hash_for_version(&Credentials::blank(), self.login_version),
    ));
    candidates
  }

  async fn perform_handshake(&self) -> KasaResult<KlapSession> {
    let local_seed: [u8; 16] = rand::thread_rng().r#gen();
    debug!("Starting KLAP handshake with {}", self.http.host());

    let (status, body) = self
      .http
      .post_bytes("/app/handshake1", local_seed.to_vec())
      .await?;
    if status != 200 {
      return Err(KasaConnectionError::HttpStatus(self.http.host().to_owned(), status).into());
    }
    if body.len() < 48 {
      return Err(
        KasaProtocolError::Framing(
          self.http.host().to_owned(),
          format!("handshake1 response has {} bytes, expected 48", body.len()),
        )
        .into(),
      );
    }
    let (remote_seed, server_hash) = body.split_at(16);
    let server_hash = &server_hash[..32];

    let mut auth_hash = None;
    for (label, candidate) in self.auth_hash_candidates() {
      if handshake1_server_hash(&local_seed, &candidate) == server_hash {
        if label != "provided credentials" && label != "configured hash" {
          warn!("Device {} authenticated with {}", self.http.host(), label);
        }
        auth_hash = Some(candidate);
        break;
      }
    }
    let Some(auth_hash) = auth_hash else {
      return Err(
        KasaAuthenticationError::HandshakeFailed(self.http.host().to_owned()).into(),
      );
    };

    let (status, _) = self
      .http
      .post_bytes(
        "/app/handshake2",
        handshake2_payload(remote_seed, &auth_hash).to_vec(),
      )
      .await?;
    if status != 200 {
      return Err(
        KasaAuthenticationError::HandshakeFailed(self.http.host().to_owned()).into(),
      );
    }

    let cipher = if self.new_klap {
      KlapCipher::new_chained(&local_seed, remote_seed, &auth_hash)
    } else {
      KlapCipher::new(&local_seed, remote_seed, &auth_hash)
    };
    let expires_at = self
      .http
      .session_timeout()
      .map(|timeout| Instant::now() + timeout.saturating_sub(SESSION_EXPIRY_GUARD));
    debug!(
      "KLAP handshake with {} complete, session timeout {:?}",
      self.http.host(),
      self.http.session_timeout()
    );
    Ok(KlapSession { cipher, expires_at })
  }
}

#[async_trait]
impl Transport for KlapTransport {
  fn default_port(&self) -> u16 {
    KLAP_DEFAULT_PORT
  }

  fn credentials_hash(&self) -> Option<String> {
    if let Some(hash) = self.auth_hash_override {
      return Some(BASE64.encode(hash));
    }
    self
      .credentials
      .as_ref()
      .map(|credentials| BASE64.encode(auth_hash_for_version(credentials, self.login_version)))
  }

  async fn send(&self, request: &str) -> KasaResult<Value> {
    for attempt in 0..2 {
      let mut state = self.state.lock().await;
      let needs_handshake = match state.as_ref() {
        Some(session) => session.is_expired(),
        None => true,
      };
      if needs_handshake {
        *state = Some(self.perform_handshake().await?);
      }
      let session = state.as_mut().expect("session populated above");

      let (payload, seq) = session.cipher.encrypt(request.as_bytes());
      let (status, body) = self
        .http
        .post_bytes(&format!("/app/request?seq={seq}"), payload)
        .await?;
      if status == 403 {
        *state = None;
        self.http.clear_cookie();
        if attempt == 0 {
          debug!("KLAP session with {} rejected, re-handshaking", self.http.host());
          continue;
        }
        return Err(KasaError::InvalidSession);
      }
      if status != 200 {
        return Err(KasaConnectionError::HttpStatus(self.http.host().to_owned(), status).into());
      }

      let plaintext = session.cipher.decrypt(seq, &body)?;
      let response: Value = serde_json::from_slice(&plaintext)
        .map_err(|err| KasaError::json(self.http.host(), &err))?;

      let code = response.get("error_code").and_then(Value::as_i64).unwrap_or(0);
      if SmartErrorCode::from_code(code).is_session_error() {
        *state = None;
        self.http.clear_cookie();
        if attempt == 0 {
          continue;
        }
        return Err(KasaError::InvalidSession);
      }
      return Ok(response);
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

#[cfg(test)]
mod test {
  use super::*;
  use kasalink_device_config::{ConnectionParameters, DeviceFamily, EncryptionType};

  fn config(credentials: Option<Credentials>) -> DeviceConfig {
    let mut builder = DeviceConfig::builder(
      "127.0.0.1",
      ConnectionParameters::new(DeviceFamily::SmartTapoPlug, EncryptionType::Klap)
        .with_login_version(2),
    );
    if let Some(credentials) = credentials {
      builder = builder.credentials(credentials);
    }
    builder.finish()
  }

  #[test]
  fn candidate_chain_covers_fallbacks() {
    let transport =
      KlapTransport::new(&config(Some(Credentials::new("user@example.com", "hunter2"))))
        .expect("constructs");
    let candidates = transport.auth_hash_candidates();
    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates[0].0, "provided credentials");
    assert_eq!(candidates[1].0, "default credentials");
    assert_eq!(candidates[2].0, "blank credentials");
  }

  #[test]
  fn credentials_hash_reconstructs_session_material() {
    let transport =
      KlapTransport::new(&config(Some(Credentials::new("user@example.com", "hunter2"))))
        .expect("constructs");
    let hash = transport.credentials_hash().expect("has login material");

    let restored_config = DeviceConfig::builder(
      "127.0.0.1",
      ConnectionParameters::new(DeviceFamily::SmartTapoPlug, EncryptionType::Klap),
    )
    .credentials_hash(&hash)
    .finish();
    let restored = KlapTransport::new(&restored_config).expect("constructs from hash");
    assert_eq!(restored.credentials_hash().expect("stable"), hash);
    assert_eq!(restored.auth_hash_candidates()[0].0, "configured hash");
  }

  #[test]
  fn bad_credentials_hash_is_rejected() {
    let config = DeviceConfig::builder(
      "127.0.0.1",
      ConnectionParameters::new(DeviceFamily::SmartTapoPlug, EncryptionType::Klap),
    )
    .credentials_hash("dG9vc2hvcnQ=")
    .finish();
    assert!(KlapTransport::new(&config).is_err());
  }
}
