// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! HMAC signing / verification and the P_SHA pseudo random function used
//! to derive secure channel keys from the exchanged nonces.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use uasc_types::{Error, StatusCode};

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Output size in bytes of SHA-1.
pub const SHA1_SIZE: usize = 20;
/// Output size in bytes of SHA-256.
pub const SHA256_SIZE: usize = 32;

fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any size
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Sign `data` with HMAC-SHA1, writing the 20 byte tag into `signature`.
pub fn hmac_sha1_sign(key: &[u8], data: &[u8], signature: &mut [u8]) -> Result<(), Error> {
    if signature.len() != SHA1_SIZE {
        return Err(Error::new(
            StatusCode::BadSecurityChecksFailed,
            format!("Signature buffer is {} bytes, expected 20", signature.len()),
        ));
    }
    signature.copy_from_slice(&hmac_sha1(key, data));
    Ok(())
}

/// Sign `data` with HMAC-SHA256, writing the 32 byte tag into `signature`.
pub fn hmac_sha256_sign(key: &[u8], data: &[u8], signature: &mut [u8]) -> Result<(), Error> {
    if signature.len() != SHA256_SIZE {
        return Err(Error::new(
            StatusCode::BadSecurityChecksFailed,
            format!("Signature buffer is {} bytes, expected 32", signature.len()),
        ));
    }
    signature.copy_from_slice(&hmac_sha256(key, data));
    Ok(())
}

/// Verify an HMAC-SHA1 tag over `data` in constant time.
pub fn hmac_sha1_verify(key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), Error> {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC key of any size");
    mac.update(data);
    mac.verify_slice(signature).map_err(|_| {
        Error::new(
            StatusCode::BadSecurityChecksFailed,
            "HMAC-SHA1 signature mismatch",
        )
    })
}

/// Verify an HMAC-SHA256 tag over `data` in constant time.
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), Error> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key of any size");
    mac.update(data);
    mac.verify_slice(signature).map_err(|_| {
        Error::new(
            StatusCode::BadSecurityChecksFailed,
            "HMAC-SHA256 signature mismatch",
        )
    })
}

/// The P_SHA pseudo random function from TLS, used by OPC UA to expand the
/// exchanged nonces into key material:
///
/// ```text
/// P_SHA(secret, seed) = HMAC(secret, A(1) || seed) ||
///                       HMAC(secret, A(2) || seed) || ...
/// A(1) = HMAC(secret, seed), A(i) = HMAC(secret, A(i-1))
/// ```
///
/// `hash_size` selects the HMAC: 20 for SHA-1, 32 for SHA-256.
pub fn p_sha(hash_size: usize, secret: &[u8], seed: &[u8], length: usize) -> Vec<u8> {
    let hmac: fn(&[u8], &[u8]) -> Vec<u8> = match hash_size {
        SHA1_SIZE => hmac_sha1,
        SHA256_SIZE => hmac_sha256,
        _ => panic!("Unsupported hash size {}", hash_size),
    };

    let mut result = Vec::with_capacity(length + hash_size);
    // A(i), starting from A(1)
    let mut a = hmac(secret, seed);
    while result.len() < length {
        let mut input = a.clone();
        input.extend_from_slice(seed);
        result.extend_from_slice(&hmac(secret, &input));
        a = hmac(secret, &a);
    }
    result.truncate(length);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_round_trip() {
        let key = b"0123456789abcdef";
        let data = b"some message";
        let mut tag = [0u8; SHA256_SIZE];
        hmac_sha256_sign(key, data, &mut tag).unwrap();
        hmac_sha256_verify(key, data, &tag).unwrap();
        assert!(hmac_sha256_verify(key, b"other message", &tag).is_err());
    }

    #[test]
    fn p_sha_is_deterministic_and_directional() {
        let local = b"aaaaaaaaaaaaaaaa";
        let remote = b"bbbbbbbbbbbbbbbb";
        let k1 = p_sha(SHA256_SIZE, remote, local, 64);
        let k2 = p_sha(SHA256_SIZE, remote, local, 64);
        assert_eq!(k1, k2);
        // Swapping secret and seed must give different material
        assert_ne!(k1, p_sha(SHA256_SIZE, local, remote, 64));
        assert_eq!(k1.len(), 64);
    }

    #[test]
    fn p_sha_prefix_property() {
        // Requesting less output yields a prefix of the longer output
        let secret = b"secret";
        let seed = b"seed";
        let long = p_sha(SHA1_SIZE, secret, seed, 100);
        let short = p_sha(SHA1_SIZE, secret, seed, 40);
        assert_eq!(&long[..40], &short[..]);
    }
}
