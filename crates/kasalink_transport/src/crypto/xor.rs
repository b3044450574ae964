// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The "XOR" scheme used by the IOT generation: a byte-wise autokey cipher
//! seeded with 171, where each ciphertext byte becomes the key for the next
//! plaintext byte.

const INITIAL_KEY: u8 = 171;

pub fn encrypt(plaintext: &[u8]) -> Vec<u8> {
  let mut key = INITIAL_KEY;
  plaintext
    .iter()
    .map(|byte| {
      let cipher_byte = byte ^ key;
      key = cipher_byte;
      cipher_byte
    })
    .collect()
}

pub fn decrypt(ciphertext: &[u8]) -> Vec<u8> {
  let mut key = INITIAL_KEY;
  ciphertext
    .iter()
    .map(|cipher_byte| {
      let plain_byte = cipher_byte ^ key;
      key = *cipher_byte;
      plain_byte
    })
    .collect()
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn round_trips_all_lengths_up_to_4096() {
    let payload: Vec<u8> = (0..4096u32).map(|i| (i * 7 + 3) as u8).collect();
    for len in [0usize, 1, 2, 17, 255, 1024, 4096] {
      let slice = &payload[..len];
      assert_eq!(decrypt(&encrypt(slice)), slice, "length {len}");
    }
  }

  #[test]
  fn matches_known_sysinfo_prefix() {
    // First bytes of the canonical {"system":... probe under the autokey
    // cipher with key 171.
    let encrypted = encrypt(br#"{"system":"#);
    assert_eq!(encrypted[0], b'{' ^ 171);
    assert_eq!(encrypted[1], encrypted[0] ^ b'"');
    assert_eq!(decrypt(&encrypted), br#"{"system":"#);
  }
}
