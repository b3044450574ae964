// Kasalink Rust Source Code File - See https://kasalink.io for more info.
//
// Copyright 2016-2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Cryptographic primitives backing the transports. Everything here is a
//! pure function (or a small stateful cipher) over byte slices; no I/O.

pub mod aes_cipher;
pub mod discovery_cipher;
pub mod klap_cipher;
pub mod rsa_session;
pub mod xor;
