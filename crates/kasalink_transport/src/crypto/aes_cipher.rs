// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! AES-128 helpers shared by the AES and KLAP transports.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use kasalink_core::errors::{KasaProtocolError, KasaResult};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;

pub fn cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
  Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub fn cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> KasaResult<Vec<u8>> {
  Aes128CbcDec::new(key.into(), iv.into())
    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    .map_err(|err| {
      KasaProtocolError::Framing("aes-cbc".to_owned(), format!("bad padding: {err}")).into()
    })
}

pub fn ecb_encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
  Aes128EcbEnc::new(key.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub fn ecb_decrypt(key: &[u8; 16], ciphertext: &[u8]) -> KasaResult<Vec<u8>> {
  Aes128EcbDec::new(key.into())
    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    .map_err(|err| {
      KasaProtocolError::Framing("aes-ecb".to_owned(), format!("bad padding: {err}")).into()
    })
}

#[cfg(test)]
mod test {
  use super::*;

  const KEY: [u8; 16] = *b"0123456789abcdef";
  const IV: [u8; 16] = *b"fedcba9876543210";

  #[test]
  fn cbc_round_trip() {
    let plaintext = br#"{"method":"get_device_info"}"#;
    let ciphertext = cbc_encrypt(&KEY, &IV, plaintext);
    assert_ne!(&ciphertext[..plaintext.len().min(16)], &plaintext[..plaintext.len().min(16)]);
    assert_eq!(ciphertext.len() % 16, 0);
    assert_eq!(cbc_decrypt(&KEY, &IV, &ciphertext).expect("valid padding"), plaintext);
  }

  #[test]
  fn ecb_round_trip() {
    let plaintext = b"exactly 16 bytes";
    let ciphertext = ecb_encrypt(&KEY, plaintext);
    // PKCS#7 always pads, even on block boundaries.
    assert_eq!(ciphertext.len(), 32);
    assert_eq!(ecb_decrypt(&KEY, &ciphertext).expect("valid padding"), plaintext);
  }

  #[test]
  fn cbc_rejects_garbage() {
    assert!(cbc_decrypt(&KEY, &IV, b"not a block multiple").is_err());
  }
}
