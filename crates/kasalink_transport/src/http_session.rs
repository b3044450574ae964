// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Shared HTTP plumbing for the AES, KLAP and SSL transports: client
//! construction, `TP_SESSIONID` cookie capture, and reqwest error mapping.

use kasalink_core::errors::{KasaConnectionError, KasaError, KasaResult};
use kasalink_device_config::DeviceConfig;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

const SESSION_COOKIE_NAME: &str = "TP_SESSIONID";
const TIMEOUT_ATTRIBUTE: &str = "TIMEOUT";

#[derive(Debug, Clone)]
pub struct SessionCookie {
  value: String,
  timeout: Option<Duration>,
}

impl SessionCookie {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }
}

pub struct HttpSession {
  client: reqwest::Client,
  // Injected clients are shared by the caller across devices; never close
  // or reconfigure them.
  client_is_injected: bool,
  host: String,
  port: u16,
  https: bool,
  timeout: Duration,
  cookie: Mutex<Option<SessionCookie>>,
}

impl HttpSession {
  pub fn from_config(config: &DeviceConfig, default_port: u16, https: bool) -> KasaResult<Self> {
    let (client, injected) = match config.http_client() {
      Some(client) => (client.clone(), true),
      None => {
        let mut builder = reqwest::Client::builder().timeout(config.timeout());
        if https {
          // Device certificates are self-signed; there is nothing to chain
          // them to.
          builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
          .build()
          .map_err(|err| KasaError::Config(format!("HTTP client construction failed: {err}")))?;
        (client, false)
      }
    };
    Ok(Self {
      client,
      client_is_injected: injected,
      host: config.host().clone(),
      port: config.port_or(default_port),
      https,
      timeout: config.timeout(),
      cookie: Mutex::new(None),
    })
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  pub fn client_is_injected(&self) -> bool {
    self.client_is_injected
  }

  pub fn url(&self, path_and_query: &str) -> String {
    let scheme = if self.https { "https" } else { "http" };
    format!("{}://{}:{}{}", scheme, self.host, self.port, path_and_query)
  }

  /// Session timeout advertised on the current cookie, if any.
  pub fn session_timeout(&self) -> Option<Duration> {
    self
      .cookie
      .lock()
      .expect("cookie mutex never poisoned")
      .as_ref()
      .and_then(SessionCookie::timeout)
  }

  pub fn clear_cookie(&self) {
    *self.cookie.lock().expect("cookie mutex never poisoned") = None;
  }

  /// POST raw bytes, returning status and body without interpreting either.
  pub async fn post_bytes(&self, path_and_query: &str, body: Vec<u8>) -> KasaResult<(u16, Vec<u8>)> {
    let mut request = self.client.post(self.url(path_and_query)).body(body);
    if let Some(cookie) = self.cookie.lock().expect("cookie mutex never poisoned").as_ref() {
      request = request.header(COOKIE, format!("{SESSION_COOKIE_NAME}={}", cookie.value));
    }
    let response = request.send().await.map_err(|err| self.map_error(err))?;
    self.capture_cookie(response.headers());
    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|err| self.map_error(err))?
      .to_vec();
    trace!("POST {} -> {} ({} bytes)", path_and_query, status, body.len());
    Ok((status, body))
  }

  /// POST a JSON document; non-2xx statuses are surfaced as errors and the
  /// body is parsed as JSON.
  pub async fn post_json(&self, path_and_query: &str, body: &Value) -> KasaResult<Value> {
    let payload =
      serde_json::to_vec(body).map_err(|err| KasaError::json(&self.host, &err))?;
    let (status, response) = self.post_bytes(path_and_query, payload).await?;
    if !(200..300).contains(&status) {
      return Err(KasaConnectionError::HttpStatus(self.host.clone(), status).into());
    }
    serde_json::from_slice(&response).map_err(|err| KasaError::json(&self.host, &err))
  }

  fn capture_cookie(&self, headers: &reqwest::header::HeaderMap) {
    for header in headers.get_all(SET_COOKIE) {
      let Ok(header) = header.to_str() else {
        continue;
      };
      let Some(value) = cookie_value(header, SESSION_COOKIE_NAME) else {
        continue;
      };
      let timeout = cookie_value(header, TIMEOUT_ATTRIBUTE)
        .and_then(|seconds| seconds.parse::<u64>().ok())
        .map(Duration::from_secs);
      debug!(
        "Captured session cookie for {} (timeout {:?})",
        self.host, timeout
      );
      *self.cookie.lock().expect("cookie mutex never poisoned") = Some(SessionCookie {
        value: value.to_owned(),
        timeout,
      });
    }
  }

  fn map_error(&self, err: reqwest::Error) -> KasaError {
    if err.is_timeout() {
      KasaConnectionError::Timeout(self.host.clone(), self.timeout.as_secs()).into()
    } else if err.is_connect() {
      KasaConnectionError::Unreachable(self.host.clone(), err.to_string()).into()
    } else {
      KasaConnectionError::ConnectionReset(self.host.clone(), err.to_string()).into()
    }
  }
}

/// Pull `name=value` out of a cookie header, attribute matching is
/// case-insensitive on the name.
fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
  header.split(';').find_map(|part| {
    let (key, value) = part.trim().split_once('=')?;
    key.eq_ignore_ascii_case(name).then_some(value)
  })
}
