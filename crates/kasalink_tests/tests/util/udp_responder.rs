// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! UDP responders standing in for devices during discovery tests, bound to
//! ephemeral ports so the tests need no privileges.

use kasalink_transport::crypto::{discovery_cipher, xor};
use serde_json::{json, Value};
use tokio::net::UdpSocket;

/// IOT-style responder: XOR-encrypted sysinfo reply to any datagram.
pub async fn spawn_iot_responder(sys_info: Value) -> u16 {
  let socket = UdpSocket::bind(("127.0.0.1", 0))
    .await
    .expect("responder binds");
  let port = socket.local_addr().expect("responder addr").port();
  tokio::spawn(async move {
    let mut buffer = vec![0u8; 4096];
    while let Ok((_, from)) = socket.recv_from(&mut buffer).await {
      let response = json!({"system": {"get_sysinfo": sys_info}});
      let encrypted = xor::encrypt(response.to_string().as_bytes());
      let _ = socket.send_to(&encrypted, from).await;
    }
  });
  port
}

/// SMART-style responder: framed, GCM-wrapped discovery record. The
/// response reuses the probe's nonce, as real firmware does.
pub async fn spawn_smart_responder(result: Value) -> u16 {
  let socket = UdpSocket::bind(("127.0.0.1", 0))
    .await
    .expect("responder binds");
  let port = socket.local_addr().expect("responder addr").port();
  tokio::spawn(async move {
    let mut buffer = vec![0u8; 4096];
    while let Ok((received, from)) = socket.recv_from(&mut buffer).await {
      let Ok(nonce) = discovery_cipher::parse_header(&buffer[..received]) else {
        continue;
      };
      let envelope = json!({"error_code": 0, "result": result});
      let Ok(body) = discovery_cipher::wrap_body(&nonce, envelope.to_string().as_bytes()) else {
        continue;
      };
      let mut datagram = discovery_cipher::probe_header(&nonce).to_vec();
      datagram.extend_from_slice(&body);
      let _ = socket.send_to(&datagram, from).await;
    }
  });
  port
}
