// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Cryptographically strong random bytes for nonces.

use uasc_types::ByteString;

/// Fill the slice with cryptographically strong pseudo random bytes.
pub fn bytes(bytes: &mut [u8]) {
    use rand::RngCore;

    let mut rng = rand::thread_rng();
    rng.fill_bytes(bytes);
}

/// Create a byte string of random bytes, e.g. a nonce.
pub fn byte_string(number_of_bytes: usize) -> ByteString {
    let mut data = vec![0u8; number_of_bytes];
    bytes(&mut data);
    ByteString::from(data)
}
