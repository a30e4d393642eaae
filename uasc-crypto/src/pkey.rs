// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! RSA key wrappers: signing, verification, encryption and decryption with
//! the schemes the security policies name.
//!
//! Every operation builds its signer, verifier or cipher object fresh from
//! the key. Nothing is cached between operations.

use rsa::{
    pkcs1v15,
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
    pss,
    signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier},
    traits::PublicKeyParts,
    Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use sha2::Sha256;

use uasc_types::{Error, StatusCode};

/// Padding schemes for RSA encryption.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RsaPadding {
    /// PKCS#1 v1.5.
    Pkcs1,
    /// OAEP with SHA-1.
    OaepSha1,
    /// OAEP with SHA-256.
    OaepSha256,
}

impl RsaPadding {
    fn overhead(&self) -> usize {
        match self {
            RsaPadding::Pkcs1 => 11,
            RsaPadding::OaepSha1 => 42,
            RsaPadding::OaepSha256 => 66,
        }
    }
}

/// Common size arithmetic for both sides of a key pair.
pub trait KeySize {
    /// The modulus size in bytes. This is the size of every signature and
    /// of every cipher text block.
    fn size(&self) -> usize;

    /// The number of plain text bytes that fit into one encrypted block
    /// under the given padding.
    fn plain_text_block_size(&self, padding: RsaPadding) -> usize {
        self.size() - padding.overhead()
    }

    /// The size of one encrypted block, the modulus size.
    fn cipher_text_block_size(&self) -> usize {
        self.size()
    }

    /// The cipher text size for a plain text of `src_len` bytes: one full
    /// block per started plain text block.
    fn calculate_cipher_text_size(&self, src_len: usize, padding: RsaPadding) -> usize {
        let block_size = self.plain_text_block_size(padding);
        let blocks = src_len.div_ceil(block_size);
        blocks * self.cipher_text_block_size()
    }
}

fn signature_error(context: &str) -> Error {
    Error::new(StatusCode::BadSecurityChecksFailed, context.to_string())
}

/// An RSA private key.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    key: RsaPrivateKey,
}

impl KeySize for PrivateKey {
    fn size(&self) -> usize {
        self.key.size()
    }
}

impl PrivateKey {
    /// Generate a fresh key of `bit_length` bits. Slow for large lengths.
    pub fn new(bit_length: usize) -> Result<PrivateKey, Error> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), bit_length)
            .map_err(|e| Error::new(StatusCode::BadUnexpectedError, e.to_string()))?;
        Ok(PrivateKey { key })
    }

    /// Wrap an existing key.
    pub fn from_rsa(key: RsaPrivateKey) -> PrivateKey {
        PrivateKey { key }
    }

    /// Parse a PKCS#8 PEM encoded key.
    pub fn from_pem(pem: &str) -> Result<PrivateKey, Error> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::new(StatusCode::BadSecurityChecksFailed, e.to_string()))?;
        Ok(PrivateKey { key })
    }

    /// Serialize to PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<String, Error> {
        self.key
            .to_pkcs8_pem(Default::default())
            .map(|s| s.to_string())
            .map_err(|e| Error::new(StatusCode::BadUnexpectedError, e.to_string()))
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.key.to_public_key(),
        }
    }

    /// Borrow the inner key.
    pub fn inner(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// Sign with RSA PKCS#1 v1.5 over SHA-1. The signature is written to
    /// `signature` which must be exactly `size()` bytes.
    pub fn sign_sha1(&self, data: &[u8], signature: &mut [u8]) -> Result<(), Error> {
        let sig = pkcs1v15::SigningKey::<Sha1>::new(self.key.clone()).sign(data);
        Self::copy_signature(&sig.to_bytes(), signature)
    }

    /// Sign with RSA PKCS#1 v1.5 over SHA-256.
    pub fn sign_sha256(&self, data: &[u8], signature: &mut [u8]) -> Result<(), Error> {
        let sig = pkcs1v15::SigningKey::<Sha256>::new(self.key.clone()).sign(data);
        Self::copy_signature(&sig.to_bytes(), signature)
    }

    /// Sign with RSA PSS (MGF1) over SHA-256.
    pub fn sign_sha256_pss(&self, data: &[u8], signature: &mut [u8]) -> Result<(), Error> {
        let sig = pss::SigningKey::<Sha256>::new(self.key.clone())
            .sign_with_rng(&mut rand::thread_rng(), data);
        Self::copy_signature(&sig.to_bytes(), signature)
    }

    fn copy_signature(sig: &[u8], signature: &mut [u8]) -> Result<(), Error> {
        if sig.len() != signature.len() {
            return Err(signature_error("Signature buffer size mismatch"));
        }
        signature.copy_from_slice(sig);
        Ok(())
    }

    /// Decrypt `src`, one modulus sized block at a time, into `dst`.
    /// Returns the total plain text size.
    pub fn decrypt(
        &self,
        padding: RsaPadding,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let cipher_block_size = self.cipher_text_block_size();
        if src.len() % cipher_block_size != 0 {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!(
                    "Cipher text length {} is not a multiple of the block size {}",
                    src.len(),
                    cipher_block_size
                ),
            ));
        }
        let mut out_pos = 0;
        for block in src.chunks(cipher_block_size) {
            let plain = match padding {
                RsaPadding::Pkcs1 => self.key.decrypt(Pkcs1v15Encrypt, block),
                RsaPadding::OaepSha1 => self.key.decrypt(Oaep::new::<Sha1>(), block),
                RsaPadding::OaepSha256 => self.key.decrypt(Oaep::new::<Sha256>(), block),
            }
            .map_err(|_| {
                Error::new(StatusCode::BadSecurityChecksFailed, "RSA decryption failed")
            })?;
            if out_pos + plain.len() > dst.len() {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    "Decrypted data exceeds the destination buffer",
                ));
            }
            dst[out_pos..out_pos + plain.len()].copy_from_slice(&plain);
            out_pos += plain.len();
        }
        Ok(out_pos)
    }
}

/// An RSA public key, typically extracted from a certificate.
#[derive(Debug, Clone)]
pub struct PublicKey {
    key: RsaPublicKey,
}

impl KeySize for PublicKey {
    fn size(&self) -> usize {
        self.key.size()
    }
}

impl PublicKey {
    /// Wrap an existing key.
    pub fn from_rsa(key: RsaPublicKey) -> PublicKey {
        PublicKey { key }
    }

    /// Borrow the inner key.
    pub fn inner(&self) -> &RsaPublicKey {
        &self.key
    }

    /// Verify an RSA PKCS#1 v1.5 SHA-1 signature.
    pub fn verify_sha1(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let sig = pkcs1v15::Signature::try_from(signature)
            .map_err(|_| signature_error("Malformed RSA signature"))?;
        pkcs1v15::VerifyingKey::<Sha1>::new(self.key.clone())
            .verify(data, &sig)
            .map_err(|_| signature_error("RSA SHA-1 signature mismatch"))
    }

    /// Verify an RSA PKCS#1 v1.5 SHA-256 signature.
    pub fn verify_sha256(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let sig = pkcs1v15::Signature::try_from(signature)
            .map_err(|_| signature_error("Malformed RSA signature"))?;
        pkcs1v15::VerifyingKey::<Sha256>::new(self.key.clone())
            .verify(data, &sig)
            .map_err(|_| signature_error("RSA SHA-256 signature mismatch"))
    }

    /// Verify an RSA PSS SHA-256 signature.
    pub fn verify_sha256_pss(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let sig = pss::Signature::try_from(signature)
            .map_err(|_| signature_error("Malformed RSA signature"))?;
        pss::VerifyingKey::<Sha256>::new(self.key.clone())
            .verify(data, &sig)
            .map_err(|_| signature_error("RSA PSS signature mismatch"))
    }

    /// Encrypt `src` into `dst`, slicing it into plain text blocks and
    /// producing one modulus sized block for each. Returns the cipher
    /// text size.
    pub fn encrypt(
        &self,
        padding: RsaPadding,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let plain_block_size = self.plain_text_block_size(padding);
        let cipher_block_size = self.cipher_text_block_size();
        let mut rng = rand::thread_rng();
        let mut out_pos = 0;
        for block in src.chunks(plain_block_size) {
            let cipher = match padding {
                RsaPadding::Pkcs1 => self.key.encrypt(&mut rng, Pkcs1v15Encrypt, block),
                RsaPadding::OaepSha1 => self.key.encrypt(&mut rng, Oaep::new::<Sha1>(), block),
                RsaPadding::OaepSha256 => {
                    self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), block)
                }
            }
            .map_err(|_| {
                Error::new(StatusCode::BadSecurityChecksFailed, "RSA encryption failed")
            })?;
            if cipher.len() != cipher_block_size || out_pos + cipher.len() > dst.len() {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    "Encrypted data exceeds the destination buffer",
                ));
            }
            dst[out_pos..out_pos + cipher.len()].copy_from_slice(&cipher);
            out_pos += cipher.len();
        }
        Ok(out_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    // Key generation is expensive, share one across the tests
    static TEST_KEY: LazyLock<PrivateKey> = LazyLock::new(|| PrivateKey::new(2048).unwrap());

    #[test]
    fn sign_verify_sha256() {
        let key = &*TEST_KEY;
        let public = key.public_key();
        let data = b"message to sign";
        let mut signature = vec![0u8; key.size()];
        key.sign_sha256(data, &mut signature).unwrap();
        public.verify_sha256(data, &signature).unwrap();
        assert!(public.verify_sha256(b"other data", &signature).is_err());
    }

    #[test]
    fn sign_verify_pss() {
        let key = &*TEST_KEY;
        let public = key.public_key();
        let data = b"pss signed";
        let mut signature = vec![0u8; key.size()];
        key.sign_sha256_pss(data, &mut signature).unwrap();
        public.verify_sha256_pss(data, &signature).unwrap();
        assert!(public.verify_sha256_pss(b"tampered", &signature).is_err());
    }

    #[test]
    fn encrypt_decrypt_multi_block() {
        let key = &*TEST_KEY;
        let public = key.public_key();
        // Larger than one plain text block to force block splitting
        let plain = vec![0xabu8; 300];
        let cipher_size = public.calculate_cipher_text_size(plain.len(), RsaPadding::OaepSha1);
        let mut cipher = vec![0u8; cipher_size];
        let written = public
            .encrypt(RsaPadding::OaepSha1, &plain, &mut cipher)
            .unwrap();
        assert_eq!(written, cipher_size);

        let mut decrypted = vec![0u8; cipher_size];
        let len = key
            .decrypt(RsaPadding::OaepSha1, &cipher, &mut decrypted)
            .unwrap();
        assert_eq!(&decrypted[..len], &plain[..]);
    }

    #[test]
    fn pem_round_trip() {
        let key = &*TEST_KEY;
        let pem = key.to_pem().unwrap();
        let restored = PrivateKey::from_pem(&pem).unwrap();
        assert_eq!(restored.size(), key.size());
    }
}
