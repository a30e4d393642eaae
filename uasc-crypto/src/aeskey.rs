// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Symmetric encryption / decryption wrapper.

use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut,
    KeyIvInit,
};

use uasc_types::{Error, StatusCode};

use super::security_policy::SecurityPolicy;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const AES_BLOCK_SIZE: usize = 16;
const AES128_KEY_SIZE: usize = 16;
const AES256_KEY_SIZE: usize = 32;

type Block = GenericArray<u8, <aes::Aes128 as aes::cipher::BlockSizeUser>::BlockSize>;
type Aes256Key = GenericArray<u8, <aes::Aes256 as aes::cipher::KeySizeUser>::KeySize>;

/// A symmetric key for one direction of a secure channel, AES-128 or
/// AES-256 CBC without padding depending on the policy.
#[derive(Debug)]
pub struct AesKey {
    value: Vec<u8>,
    security_policy: SecurityPolicy,
}

impl AesKey {
    /// Wrap raw key bytes for the given policy.
    pub fn new(security_policy: SecurityPolicy, value: &[u8]) -> AesKey {
        AesKey {
            value: value.to_vec(),
            security_policy,
        }
    }

    /// The raw key bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The cipher block size, 16 for every supported policy.
    pub fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    /// The initialization vector length, one block.
    pub fn iv_length(&self) -> usize {
        AES_BLOCK_SIZE
    }

    /// The key length for the policy.
    pub fn key_length(&self) -> usize {
        match self.security_policy {
            SecurityPolicy::Basic128Rsa15 | SecurityPolicy::Aes128Sha256RsaOaep => AES128_KEY_SIZE,
            SecurityPolicy::Basic256
            | SecurityPolicy::Basic256Sha256
            | SecurityPolicy::Aes256Sha256RsaPss => AES256_KEY_SIZE,
            _ => 0,
        }
    }

    fn validate_args(&self, src: &[u8], iv: &[u8], dst: &mut [u8]) -> Result<(), Error> {
        if dst.len() < src.len() {
            Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!(
                    "Destination buffer is too small, {} < {}",
                    dst.len(),
                    src.len()
                ),
            ))
        } else if iv.len() != self.iv_length() {
            Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!("IV is not the expected size, len = {}", iv.len()),
            ))
        } else if src.len() % self.block_size() != 0 {
            Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!(
                    "Source length {} is not a multiple of the block size",
                    src.len()
                ),
            ))
        } else {
            Ok(())
        }
    }

    /// Encrypt `src` into `dst` with CBC and no padding. The source must be
    /// block aligned. Returns the number of bytes written.
    pub fn encrypt(&self, src: &[u8], iv: &[u8], dst: &mut [u8]) -> Result<usize, Error> {
        self.validate_args(src, iv, dst)?;
        match self.key_length() {
            AES128_KEY_SIZE => {
                Aes128CbcEnc::new(Block::from_slice(&self.value), Block::from_slice(iv))
                    .encrypt_padded_b2b_mut::<NoPadding>(src, dst)
                    .map_err(|e| Error::new(StatusCode::BadUnexpectedError, e.to_string()))?;
            }
            AES256_KEY_SIZE => {
                Aes256CbcEnc::new(Aes256Key::from_slice(&self.value), Block::from_slice(iv))
                    .encrypt_padded_b2b_mut::<NoPadding>(src, dst)
                    .map_err(|e| Error::new(StatusCode::BadUnexpectedError, e.to_string()))?;
            }
            _ => {
                return Err(Error::new(
                    StatusCode::BadUnexpectedError,
                    "Policy has no symmetric cipher",
                ))
            }
        }
        Ok(src.len())
    }

    /// Decrypt `src` into `dst` with CBC and no padding. The source must be
    /// block aligned. Returns the number of bytes written.
    pub fn decrypt(&self, src: &[u8], iv: &[u8], dst: &mut [u8]) -> Result<usize, Error> {
        self.validate_args(src, iv, dst)?;
        match self.key_length() {
            AES128_KEY_SIZE => {
                Aes128CbcDec::new(Block::from_slice(&self.value), Block::from_slice(iv))
                    .decrypt_padded_b2b_mut::<NoPadding>(src, dst)
                    .map_err(|e| Error::new(StatusCode::BadUnexpectedError, e.to_string()))?;
            }
            AES256_KEY_SIZE => {
                Aes256CbcDec::new(Aes256Key::from_slice(&self.value), Block::from_slice(iv))
                    .decrypt_padded_b2b_mut::<NoPadding>(src, dst)
                    .map_err(|e| Error::new(StatusCode::BadUnexpectedError, e.to_string()))?;
            }
            _ => {
                return Err(Error::new(
                    StatusCode::BadUnexpectedError,
                    "Policy has no symmetric cipher",
                ))
            }
        }
        Ok(src.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = AesKey::new(SecurityPolicy::Basic256Sha256, &[7u8; 32]);
        let iv = [3u8; 16];
        let plain = [0x55u8; 64];
        let mut cipher = vec![0u8; 64];
        let written = key.encrypt(&plain, &iv, &mut cipher).unwrap();
        assert_eq!(written, 64);
        assert_ne!(&cipher[..], &plain[..]);

        let mut decrypted = vec![0u8; 64];
        key.decrypt(&cipher, &iv, &mut decrypted).unwrap();
        assert_eq!(&decrypted[..], &plain[..]);
    }

    #[test]
    fn unaligned_source_fails() {
        let key = AesKey::new(SecurityPolicy::Basic128Rsa15, &[7u8; 16]);
        let iv = [3u8; 16];
        let mut dst = vec![0u8; 32];
        assert!(key.encrypt(&[0u8; 15], &iv, &mut dst).is_err());
    }
}
