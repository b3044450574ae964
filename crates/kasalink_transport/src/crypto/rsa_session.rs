// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Ephemeral RSA keypair for the AES transport handshake. The device
//! encrypts the 32-byte session seed (AES key + IV) to our public key with
//! OAEP/SHA-1.

use kasalink_core::errors::{KasaError, KasaResult};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

const HANDSHAKE_KEY_BITS: usize = 1024;

pub struct RsaSessionKeys {
  private_key: RsaPrivateKey,
  public_key_pem: String,
}

impl RsaSessionKeys {
  pub fn generate() -> KasaResult<Self> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, HANDSHAKE_KEY_BITS)
      .map_err(|err| KasaError::Message(format!("RSA keygen failed: {err}")))?;
    let public_key_pem = RsaPublicKey::from(&private_key)
      .to_public_key_pem(LineEnding::LF)
      .map_err(|err| KasaError::Message(format!("RSA PEM export failed: {err}")))?;
    Ok(Self {
      private_key,
      public_key_pem,
    })
  }

  /// PEM blob sent in the handshake request's `key` parameter.
  pub fn public_key_pem(&self) -> &str {
    &self.public_key_pem
  }

  /// Decrypt the handshake response into the session (key, iv) pair.
  pub fn decrypt_session_seed(&self, blob: &[u8]) -> KasaResult<([u8; 16], [u8; 16])> {
    let seed = self
      .private_key
      .decrypt(Oaep::new::<Sha1>(), blob)
      .map_err(|err| KasaError::Message(format!("Handshake seed decryption failed: {err}")))?;
    if seed.len() != 32 {
      return Err(KasaError::Message(format!(
        "Handshake seed has {} bytes, expected 32",
        seed.len()
      )));
    }
    let mut key = [0u8; 16];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&seed[..16]);
    iv.copy_from_slice(&seed[16..]);
    Ok((key, iv))
  }
}
