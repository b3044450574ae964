// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Transport for the IOT generation: no authentication, no session, just
//! the autokey cipher over TCP (length-prefixed) or UDP (bare datagram).

use crate::crypto::xor;
use crate::Transport;
use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use kasalink_core::errors::{KasaConnectionError, KasaError, KasaResult};
use kasalink_device_config::DeviceConfig;
use serde_json::Value;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::timeout;

pub const XOR_DEFAULT_PORT: u16 = 9999;

const UDP_RESPONSE_BUFFER: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XorMode {
  Tcp,
  Udp,
}

pub struct XorTransport {
  host: String,
  port: u16,
  request_timeout: Duration,
  mode: XorMode,
  stream: Mutex<Option<TcpStream>>,
}

impl XorTransport {
  pub fn new(config: &DeviceConfig) -> Self {
    Self::with_mode(config, XorMode::Tcp)
  }

  pub fn with_mode(config: &DeviceConfig, mode: XorMode) -> Self {
    Self {
      host: config.host().clone(),
      port: config.port_or(XOR_DEFAULT_PORT),
      request_timeout: config.timeout(),
      mode,
      stream: Mutex::new(None),
    }
  }

  fn map_io_error(&self, err: std::io::Error) -> KasaError {
    match err.kind() {
      ErrorKind::TimedOut | ErrorKind::WouldBlock => {
        KasaConnectionError::Timeout(self.host.clone(), self.request_timeout.as_secs()).into()
      }
      ErrorKind::ConnectionRefused | ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
        KasaConnectionError::Unreachable(self.host.clone(), err.to_string()).into()
      }
      _ => KasaConnectionError::ConnectionReset(self.host.clone(), err.to_string()).into(),
    }
  }

  fn elapsed(&self) -> KasaError {
    KasaConnectionError::Timeout(self.host.clone(), self.request_timeout.as_secs()).into()
  }

  async fn send_tcp(&self, request: &str) -> KasaResult<Vec<u8>> {
    let mut guard = self.stream.lock().await;
    if guard.is_none() {
      let connect = TcpStream::connect((self.host.as_str(), self.port));
      let stream = timeout(self.request_timeout, connect)
        .await
        .map_err(|_| self.elapsed())?
        .map_err(|err| self.map_io_error(err))?;
      *guard = Some(stream);
    }
    let stream = guard.as_mut().expect("stream populated above");

    let result = self.exchange_tcp(stream, request).await;
    if result.is_err() {
      // Reopen on the next call rather than reusing a stream in an
      // unknown framing state.
      *guard = None;
    }
    result
  }

  async fn exchange_tcp(&self, stream: &mut TcpStream, request: &str) -> KasaResult<Vec<u8>> {
    let body = xor::encrypt(request.as_bytes());
    let mut framed = Vec::with_capacity(4 + body.len());
    let mut length = [0u8; 4];
    BigEndian::write_u32(&mut length, body.len() as u32);
    framed.extend_from_slice(&length);
    framed.extend_from_slice(&body);

    timeout(self.request_timeout, stream.write_all(&framed))
      .await
      .map_err(|_| self.elapsed())?
      .map_err(|err| self.map_io_error(err))?;

    let mut length = [0u8; 4];
    timeout(self.request_timeout, stream.read_exact(&mut length))
      .await
      .map_err(|_| self.elapsed())?
      .map_err(|err| self.map_io_error(err))?;
    let response_len = BigEndian::read_u32(&length) as usize;

    let mut response = vec![0u8; response_len];
    timeout(self.request_timeout, stream.read_exact(&mut response))
      .await
      .map_err(|_| self.elapsed())?
      .map_err(|err| self.map_io_error(err))?;
    Ok(xor::decrypt(&response))
  }

  async fn send_udp(&self, request: &str) -> KasaResult<Vec<u8>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
      .await
      .map_err(|err| self.map_io_error(err))?;
    socket
      .connect((self.host.as_str(), self.port))
      .await
      .map_err(|err| self.map_io_error(err))?;

    socket
      .send(&xor::encrypt(request.as_bytes()))
      .await
      .map_err(|err| self.map_io_error(err))?;

    let mut buffer = vec![0u8; UDP_RESPONSE_BUFFER];
    let received = timeout(self.request_timeout, socket.recv(&mut buffer))
      .await
      .map_err(|_| self.elapsed())?
      .map_err(|err| self.map_io_error(err))?;
    buffer.truncate(received);
    Ok(xor::decrypt(&buffer))
  }
}

#[async_trait]
impl Transport for XorTransport {
  fn default_port(&self) -> u16 {
    XOR_DEFAULT_PORT
  }

  fn credentials_hash(&self) -> Option<String> {
    None
  }

  async fn send(&self, request: &str) -> KasaResult<Value> {
    trace!("{} >> {}", self.host, request);
    let response = match self.mode {
      XorMode::Tcp => self.send_tcp(request).await?,
      XorMode::Udp => self.send_udp(request).await?,
    };
    let decoded: Value =
      serde_json::from_slice(&response).map_err(|err| KasaError::json(&self.host, &err))?;
    trace!("{} << {}", self.host, decoded);
    Ok(decoded)
  }

  async fn reset(&self) {
    *self.stream.lock().await = None;
  }

  async fn close(&self) {
    *self.stream.lock().await = None;
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use kasalink_device_config::{ConnectionParameters, DeviceFamily, EncryptionType};
  use serde_json::json;
  use tokio::net::TcpListener;

  fn config(host: &str, port: u16) -> DeviceConfig {
    DeviceConfig::builder(
      host,
      ConnectionParameters::new(DeviceFamily::IotSmartPlugSwitch, EncryptionType::Xor),
    )
    .port_override(port)
    .timeout(Duration::from_secs(2))
    .finish()
  }

  async fn spawn_tcp_echo_device(response: Value) -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
      let (mut stream, _) = listener.accept().await.expect("accept");
      let mut length = [0u8; 4];
      stream.read_exact(&mut length).await.expect("read length");
      let mut request = vec![0u8; BigEndian::read_u32(&length) as usize];
      stream.read_exact(&mut request).await.expect("read body");
      let _decoded = xor::decrypt(&request);

      let body = xor::encrypt(response.to_string().as_bytes());
      let mut framed = Vec::new();
      let mut length = [0u8; 4];
      BigEndian::write_u32(&mut length, body.len() as u32);
      framed.extend_from_slice(&length);
      framed.extend_from_slice(&body);
      stream.write_all(&framed).await.expect("write response");
    });
    port
  }

  #[tokio::test]
  async fn tcp_round_trip() {
    let response = json!({"system": {"get_sysinfo": {"alias": "plug"}}});
    let port = spawn_tcp_echo_device(response.clone()).await;
    let transport = XorTransport::new(&config("127.0.0.1", port));
    let received = transport
      .send(r#"{"system":{"get_sysinfo":null}}"#)
      .await
      .expect("query succeeds");
    assert_eq!(received, response);
  }

  #[tokio::test]
  async fn unreachable_host_errors() {
    // Port 1 on localhost refuses connections.
    let transport = XorTransport::new(&config("127.0.0.1", 1));
    let result = transport.send(r#"{"system":{"get_sysinfo":null}}"#).await;
    assert!(matches!(result, Err(err) if err.is_retryable()));
  }
}
