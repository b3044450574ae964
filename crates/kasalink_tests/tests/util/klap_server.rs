// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Minimal HTTP/1.1 device speaking the KLAP handshake and request
//! framing over a [FakeSmartState], for exercising the real transport
//! end-to-end.

use super::fake_smart::FakeSmartState;
use kasalink_core::credentials::Credentials;
use kasalink_transport::crypto::klap_cipher::{
  auth_hash_v2, handshake1_server_hash, handshake2_payload, KlapCipher,
};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct FakeKlapServer {
  pub port: u16,
}

struct ServerState {
  device: FakeSmartState,
  auth_hash: [u8; 32],
  // One client at a time is plenty for the tests.
  handshake: Mutex<Option<HandshakeState>>,
}

struct HandshakeState {
  local_seed: [u8; 16],
  remote_seed: [u8; 16],
  cipher: Option<KlapCipher>,
}

impl FakeKlapServer {
  /// Bind an ephemeral port and serve until dropped. The device only
  /// authenticates clients holding `credentials`.
  pub async fn spawn(device: FakeSmartState, credentials: &Credentials) -> Self {
    let listener = TcpListener::bind(("127.0.0.1", 0))
      .await
      .expect("test server binds");
    let port = listener.local_addr().expect("test server addr").port();
    let state = Arc::new(ServerState {
      device,
      auth_hash: auth_hash_v2(credentials),
      handshake: Mutex::new(None),
    });
    tokio::spawn(async move {
      loop {
        let Ok((stream, _)) = listener.accept().await else {
          return;
        };
        let state = state.clone();
        tokio::spawn(async move {
          let _ = serve_connection(stream, state).await;
        });
      }
    });
    Self { port }
  }
}

async fn serve_connection(mut stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
  loop {
    let Some((path, body)) = read_request(&mut stream).await? else {
      return Ok(());
    };
    let (status, response_body, set_cookie) = handle_request(&state, &path, &body);
    let mut response = format!(
      "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: keep-alive\r\n",
      response_body.len()
    );
    if let Some(cookie) = set_cookie {
      response.push_str(&format!("Set-Cookie: {cookie}\r\n"));
    }
    response.push_str("\r\n");
    stream.write_all(response.as_bytes()).await?;
    stream.write_all(&response_body).await?;
  }
}

/// Read one HTTP request; returns None on a cleanly closed connection.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<(String, Vec<u8>)>> {
  let mut header = Vec::new();
  let mut byte = [0u8; 1];
  loop {
    match stream.read(&mut byte).await? {
      0 => {
        return if header.is_empty() {
          Ok(None)
        } else {
          Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed mid-request",
          ))
        };
      }
      _ => header.push(byte[0]),
    }
    if header.ends_with(b"\r\n\r\n") {
      break;
    }
  }
  let header_text = String::from_utf8_lossy(&header);
  let mut lines = header_text.lines();
  let request_line = lines.next().unwrap_or_default();
  let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_owned();
  let content_length = lines
    .filter_map(|line| {
      let (name, value) = line.split_once(':')?;
      name
        .eq_ignore_ascii_case("content-length")
        .then(|| value.trim().parse::<usize>().ok())?
    })
    .next()
    .unwrap_or(0);

  let mut body = vec![0u8; content_length];
  stream.read_exact(&mut body).await?;
  Ok(Some((path, body)))
}

fn handle_request(
  state: &ServerState,
  path: &str,
  body: &[u8],
) -> (&'static str, Vec<u8>, Option<String>) {
  if path == "/app/handshake1" {
    if body.len() != 16 {
      return ("400 Bad Request", Vec::new(), None);
    }
    let mut local_seed = [0u8; 16];
    local_seed.copy_from_slice(body);
    let remote_seed: [u8; 16] = rand::thread_rng().r#gen();

    let mut response = Vec::with_capacity(48);
    response.extend_from_slice(&remote_seed);
    response.extend_from_slice(&handshake1_server_hash(&local_seed, &state.auth_hash));
    *state.handshake.lock().expect("test mutex") = Some(HandshakeState {
      local_seed,
      remote_seed,
      cipher: None,
    });
    return (
      "200 OK",
      response,
      Some("TP_SESSIONID=TESTSESSION;TIMEOUT=1440".to_owned()),
    );
  }

  if path == "/app/handshake2" {
    let mut handshake = state.handshake.lock().expect("test mutex");
    let Some(pending) = handshake.as_mut() else {
      return ("403 Forbidden", Vec::new(), None);
    };
    let expected = handshake2_payload(&pending.remote_seed, &state.auth_hash);
    if body != expected {
      return ("403 Forbidden", Vec::new(), None);
    }
    pending.cipher = Some(KlapCipher::new(
      &pending.local_seed,
      &pending.remote_seed,
      &state.auth_hash,
    ));
    return ("200 OK", Vec::new(), None);
  }

  if let Some(query) = path.strip_prefix("/app/request?seq=") {
    let Ok(seq) = query.parse::<i32>() else {
      return ("400 Bad Request", Vec::new(), None);
    };
    let handshake = state.handshake.lock().expect("test mutex");
    let Some(cipher) = handshake.as_ref().and_then(|pending| pending.cipher.as_ref()) else {
      return ("403 Forbidden", Vec::new(), None);
    };
    let Ok(plaintext) = cipher.decrypt(seq, body) else {
      return ("403 Forbidden", Vec::new(), None);
    };
    let Ok(payload) = serde_json::from_slice::<Value>(&plaintext) else {
      return ("400 Bad Request", Vec::new(), None);
    };
    let response = state.device.handle_payload(&payload);
    let framed = cipher.encrypt_with_seq(seq, response.to_string().as_bytes());
    return ("200 OK", framed, None);
  }

  ("404 Not Found", Vec::new(), None)
}
