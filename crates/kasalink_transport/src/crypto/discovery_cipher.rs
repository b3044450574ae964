// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Framing for the port-20002 SMART discovery datagrams.
//!
//! Probe and response share a 16-byte header: version 0x02, request type
//! 0xF0, a 6-byte nonce and an 8-byte keyed tag over the nonce. Depending on
//! firmware the JSON body after the header is either plaintext or wrapped in
//! AES-128-GCM under a key derived from the shared discovery key, with the
//! GCM nonce derived from the header nonce.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use kasalink_core::errors::{KasaProtocolError, KasaResult};
use sha2::{Digest, Sha256};

pub const HEADER_LEN: usize = 16;
pub const PROBE_VERSION: u8 = 0x02;
pub const PROBE_REQUEST_TYPE: u8 = 0xF0;

// Shared key baked into both ends of the discovery exchange.
const DISCOVERY_SHARED_KEY: &[u8] = b"tpLink_dsc_v2";

fn sha256(data: &[u8]) -> [u8; 32] {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hasher.finalize().into()
}

fn header_tag(nonce: &[u8; 6]) -> [u8; 8] {
  let mut buf = Vec::with_capacity(DISCOVERY_SHARED_KEY.len() + 6);
  buf.extend_from_slice(DISCOVERY_SHARED_KEY);
  buf.extend_from_slice(nonce);
  let digest = sha256(&buf);
  let mut tag = [0u8; 8];
  tag.copy_from_slice(&digest[..8]);
  tag
}

fn body_key() -> [u8; 16] {
  let digest = sha256(DISCOVERY_SHARED_KEY);
  let mut key = [0u8; 16];
  key.copy_from_slice(&digest[..16]);
  key
}

fn gcm_nonce(nonce: &[u8; 6]) -> [u8; 12] {
  let mut buf = Vec::with_capacity(5 + 6);
  buf.extend_from_slice(b"nonce");
  buf.extend_from_slice(nonce);
  let digest = sha256(&buf);
  let mut out = [0u8; 12];
  out.copy_from_slice(&digest[..12]);
  out
}

/// Build the 16-byte probe header for a given nonce.
pub fn probe_header(nonce: &[u8; 6]) -> [u8; HEADER_LEN] {
  let mut header = [0u8; HEADER_LEN];
  header[0] = PROBE_VERSION;
  header[1] = PROBE_REQUEST_TYPE;
  header[2..8].copy_from_slice(nonce);
  header[8..].copy_from_slice(&header_tag(nonce));
  header
}

/// Validate a datagram header and return its nonce.
pub fn parse_header(datagram: &[u8]) -> KasaResult<[u8; 6]> {
  if datagram.len() < HEADER_LEN {
    return Err(
      KasaProtocolError::Framing("discovery".to_owned(), "datagram shorter than header".to_owned())
        .into(),
    );
  }
  if datagram[0] != PROBE_VERSION {
    return Err(
      KasaProtocolError::Framing(
        "discovery".to_owned(),
        format!("unknown version byte {:#04x}", datagram[0]),
      )
      .into(),
    );
  }
  let mut nonce = [0u8; 6];
  nonce.copy_from_slice(&datagram[2..8]);
  Ok(nonce)
}

/// Encrypt a response/probe body under the shared discovery key.
pub fn wrap_body(nonce: &[u8; 6], body: &[u8]) -> KasaResult<Vec<u8>> {
  let cipher = Aes128Gcm::new(&body_key().into());
  cipher
    .encrypt(Nonce::from_slice(&gcm_nonce(nonce)), body)
    .map_err(|_| {
      KasaProtocolError::Framing("discovery".to_owned(), "body encryption failed".to_owned())
        .into()
    })
}

/// Decode a datagram body: plaintext JSON passes through, anything else is
/// treated as a GCM-wrapped payload.
pub fn unwrap_body(nonce: &[u8; 6], body: &[u8]) -> KasaResult<Vec<u8>> {
  if body.first() == Some(&b'{') {
    return Ok(body.to_vec());
  }
  let cipher = Aes128Gcm::new(&body_key().into());
  cipher
    .decrypt(Nonce::from_slice(&gcm_nonce(nonce)), body)
    .map_err(|_| {
      KasaProtocolError::Framing("discovery".to_owned(), "body decryption failed".to_owned())
        .into()
    })
}
