// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The security policies: algorithm suites negotiated between client and
//! server, and the key derivation tying the exchanged nonces to the
//! symmetric keys of a secure channel.

use std::fmt;
use std::str::FromStr;

use log::error;

use uasc_types::{Error, StatusCode};

use crate::{
    aeskey::AesKey,
    hash,
    pkey::{KeySize, PrivateKey, PublicKey, RsaPadding},
    SecurityKeys,
};

/// URI of the None security policy.
pub const SECURITY_POLICY_NONE_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
/// URI of the Basic128Rsa15 security policy.
pub const SECURITY_POLICY_BASIC_128_RSA_15_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15";
/// URI of the Basic256 security policy.
pub const SECURITY_POLICY_BASIC_256_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256";
/// URI of the Basic256Sha256 security policy.
pub const SECURITY_POLICY_BASIC_256_SHA_256_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";
/// URI of the Aes128-Sha256-RsaOaep security policy.
pub const SECURITY_POLICY_AES_128_SHA_256_RSA_OAEP_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep";
/// URI of the Aes256-Sha256-RsaPss security policy.
pub const SECURITY_POLICY_AES_256_SHA_256_RSA_PSS_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss";

/// The asymmetric signature algorithms policies select.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsymmetricSignatureAlgorithm {
    /// RSA PKCS#1 v1.5 over SHA-1.
    RsaSha1,
    /// RSA PKCS#1 v1.5 over SHA-256.
    RsaSha256,
    /// RSA PSS (MGF1) over SHA-256.
    RsaPssSha256,
}

impl AsymmetricSignatureAlgorithm {
    /// The algorithm URI placed in SignatureData structures.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::RsaPssSha256 => "http://opcfoundation.org/UA/security/rsa-pss-sha2-256",
        }
    }
}

/// A security policy: the complete algorithm suite applied to a secure
/// channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecurityPolicy {
    /// A policy this stack does not recognize.
    Unknown,
    /// No security at all.
    None,
    /// AES-128-CBC, HMAC-SHA1, RSA PKCS#1 v1.5. Deprecated but widespread.
    Basic128Rsa15,
    /// AES-256-CBC, HMAC-SHA1, RSA-OAEP. Deprecated but widespread.
    Basic256,
    /// AES-256-CBC, HMAC-SHA256, RSA-OAEP.
    Basic256Sha256,
    /// AES-128-CBC, HMAC-SHA256, RSA-OAEP.
    Aes128Sha256RsaOaep,
    /// AES-256-CBC, HMAC-SHA256, RSA-PSS / RSA-OAEP-SHA256.
    Aes256Sha256RsaPss,
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128-Sha256-RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256-Sha256-RsaPss",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SecurityPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "None" => Self::None,
            "Basic128Rsa15" => Self::Basic128Rsa15,
            "Basic256" => Self::Basic256,
            "Basic256Sha256" => Self::Basic256Sha256,
            "Aes128-Sha256-RsaOaep" | "Aes128Sha256RsaOaep" => Self::Aes128Sha256RsaOaep,
            "Aes256-Sha256-RsaPss" | "Aes256Sha256RsaPss" => Self::Aes256Sha256RsaPss,
            _ => Self::from_uri(s),
        })
    }
}

impl SecurityPolicy {
    /// Map a policy URI to a policy. Unrecognized URIs become `Unknown`.
    pub fn from_uri(uri: &str) -> SecurityPolicy {
        match uri {
            SECURITY_POLICY_NONE_URI => Self::None,
            SECURITY_POLICY_BASIC_128_RSA_15_URI => Self::Basic128Rsa15,
            SECURITY_POLICY_BASIC_256_URI => Self::Basic256,
            SECURITY_POLICY_BASIC_256_SHA_256_URI => Self::Basic256Sha256,
            SECURITY_POLICY_AES_128_SHA_256_RSA_OAEP_URI => Self::Aes128Sha256RsaOaep,
            SECURITY_POLICY_AES_256_SHA_256_RSA_PSS_URI => Self::Aes256Sha256RsaPss,
            _ => Self::Unknown,
        }
    }

    /// The URI of this policy.
    pub fn to_uri(&self) -> &'static str {
        match self {
            Self::None => SECURITY_POLICY_NONE_URI,
            Self::Basic128Rsa15 => SECURITY_POLICY_BASIC_128_RSA_15_URI,
            Self::Basic256 => SECURITY_POLICY_BASIC_256_URI,
            Self::Basic256Sha256 => SECURITY_POLICY_BASIC_256_SHA_256_URI,
            Self::Aes128Sha256RsaOaep => SECURITY_POLICY_AES_128_SHA_256_RSA_OAEP_URI,
            Self::Aes256Sha256RsaPss => SECURITY_POLICY_AES_256_SHA_256_RSA_PSS_URI,
            Self::Unknown => panic!("Unknown policy has no URI"),
        }
    }

    /// True if this is a policy the stack can actually run.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// The MAC output size in bytes, which is the size of every symmetric
    /// signature.
    pub fn symmetric_signature_size(&self) -> usize {
        match self {
            Self::Basic128Rsa15 | Self::Basic256 => hash::SHA1_SIZE,
            Self::Basic256Sha256 | Self::Aes128Sha256RsaOaep | Self::Aes256Sha256RsaPss => {
                hash::SHA256_SIZE
            }
            _ => 0,
        }
    }

    /// The derived signing key size in bytes.
    pub fn derived_signing_key_size(&self) -> usize {
        match self {
            Self::Basic128Rsa15 => 16,
            Self::Basic256 => 24,
            Self::Basic256Sha256 | Self::Aes128Sha256RsaOaep | Self::Aes256Sha256RsaPss => 32,
            _ => 0,
        }
    }

    /// The derived encryption key size in bytes.
    pub fn derived_encryption_key_size(&self) -> usize {
        match self {
            Self::Basic128Rsa15 | Self::Aes128Sha256RsaOaep => 16,
            Self::Basic256 | Self::Basic256Sha256 | Self::Aes256Sha256RsaPss => 32,
            _ => 0,
        }
    }

    /// The symmetric cipher block size, which is also the IV size.
    pub fn plain_block_size(&self) -> usize {
        match self {
            Self::None | Self::Unknown => 0,
            _ => 16,
        }
    }

    /// The nonce size for OpenSecureChannel exchanges.
    pub fn secure_channel_nonce_length(&self) -> usize {
        match self {
            Self::Basic128Rsa15 => 16,
            Self::Basic256
            | Self::Basic256Sha256
            | Self::Aes128Sha256RsaOaep
            | Self::Aes256Sha256RsaPss => 32,
            _ => 0,
        }
    }

    /// The asymmetric signature algorithm of this policy.
    pub fn asymmetric_signature_algorithm(&self) -> AsymmetricSignatureAlgorithm {
        match self {
            Self::Basic128Rsa15 | Self::Basic256 => AsymmetricSignatureAlgorithm::RsaSha1,
            Self::Basic256Sha256 | Self::Aes128Sha256RsaOaep => {
                AsymmetricSignatureAlgorithm::RsaSha256
            }
            Self::Aes256Sha256RsaPss => AsymmetricSignatureAlgorithm::RsaPssSha256,
            _ => panic!("Policy has no asymmetric signature algorithm"),
        }
    }

    /// The RSA padding used for asymmetric encryption.
    pub fn asymmetric_encryption_padding(&self) -> RsaPadding {
        match self {
            Self::Basic128Rsa15 => RsaPadding::Pkcs1,
            Self::Basic256 | Self::Basic256Sha256 | Self::Aes128Sha256RsaOaep => {
                RsaPadding::OaepSha1
            }
            Self::Aes256Sha256RsaPss => RsaPadding::OaepSha256,
            _ => panic!("Policy has no asymmetric encryption padding"),
        }
    }

    /// Derive the signing key, encryption key and IV for one direction from
    /// the paired nonces using the policy's P_SHA.
    ///
    /// For the local direction `secret` is the remote nonce and `seed` the
    /// local nonce. The remote direction swaps them.
    pub fn make_secure_channel_keys(&self, secret: &[u8], seed: &[u8]) -> SecurityKeys {
        let signing_key_size = self.derived_signing_key_size();
        let encrypting_key_size = self.derived_encryption_key_size();
        let iv_size = self.plain_block_size();

        let hash_size = match self {
            Self::Basic128Rsa15 | Self::Basic256 => hash::SHA1_SIZE,
            _ => hash::SHA256_SIZE,
        };
        let material = hash::p_sha(
            hash_size,
            secret,
            seed,
            signing_key_size + encrypting_key_size + iv_size,
        );

        let signing_key = material[..signing_key_size].to_vec();
        let encrypting_key =
            &material[signing_key_size..signing_key_size + encrypting_key_size];
        let iv = material[signing_key_size + encrypting_key_size..].to_vec();
        (signing_key, AesKey::new(*self, encrypting_key), iv)
    }

    /// Sign `data` with the policy's MAC, writing the tag into `signature`.
    pub fn symmetric_sign(
        &self,
        key: &[u8],
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<(), Error> {
        match self.symmetric_signature_size() {
            hash::SHA1_SIZE => hash::hmac_sha1_sign(key, data, signature),
            hash::SHA256_SIZE => hash::hmac_sha256_sign(key, data, signature),
            _ => Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Policy has no symmetric signature",
            )),
        }
    }

    /// Verify a MAC produced by [`SecurityPolicy::symmetric_sign`].
    pub fn symmetric_verify_signature(
        &self,
        key: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        match self.symmetric_signature_size() {
            hash::SHA1_SIZE => hash::hmac_sha1_verify(key, data, signature),
            hash::SHA256_SIZE => hash::hmac_sha256_verify(key, data, signature),
            _ => Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Policy has no symmetric signature",
            )),
        }
    }

    /// Encrypt with the policy's symmetric cipher.
    pub fn symmetric_encrypt(
        &self,
        key: &AesKey,
        iv: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        key.encrypt(src, iv, dst)
    }

    /// Decrypt with the policy's symmetric cipher.
    pub fn symmetric_decrypt(
        &self,
        key: &AesKey,
        iv: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        key.decrypt(src, iv, dst)
    }

    /// Sign with the policy's asymmetric signature scheme. The signer is
    /// built fresh for this one operation.
    pub fn asymmetric_sign(
        &self,
        key: &PrivateKey,
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<(), Error> {
        match self.asymmetric_signature_algorithm() {
            AsymmetricSignatureAlgorithm::RsaSha1 => key.sign_sha1(data, signature),
            AsymmetricSignatureAlgorithm::RsaSha256 => key.sign_sha256(data, signature),
            AsymmetricSignatureAlgorithm::RsaPssSha256 => key.sign_sha256_pss(data, signature),
        }
    }

    /// Verify a signature made by [`SecurityPolicy::asymmetric_sign`].
    pub fn asymmetric_verify_signature(
        &self,
        verification_key: &PublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        let result = match self.asymmetric_signature_algorithm() {
            AsymmetricSignatureAlgorithm::RsaSha1 => verification_key.verify_sha1(data, signature),
            AsymmetricSignatureAlgorithm::RsaSha256 => {
                verification_key.verify_sha256(data, signature)
            }
            AsymmetricSignatureAlgorithm::RsaPssSha256 => {
                verification_key.verify_sha256_pss(data, signature)
            }
        };
        result.map_err(|e| {
            error!("Asymmetric signature verification failed: {}", e);
            Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Asymmetric signature mismatch",
            )
        })
    }

    /// Asymmetric encrypt with the policy's RSA padding.
    pub fn asymmetric_encrypt(
        &self,
        encryption_key: &PublicKey,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        encryption_key.encrypt(self.asymmetric_encryption_padding(), src, dst)
    }

    /// Asymmetric decrypt with the policy's RSA padding.
    pub fn asymmetric_decrypt(
        &self,
        decryption_key: &PrivateKey,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        decryption_key.decrypt(self.asymmetric_encryption_padding(), src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: [SecurityPolicy; 5] = [
        SecurityPolicy::Basic128Rsa15,
        SecurityPolicy::Basic256,
        SecurityPolicy::Basic256Sha256,
        SecurityPolicy::Aes128Sha256RsaOaep,
        SecurityPolicy::Aes256Sha256RsaPss,
    ];

    #[test]
    fn uri_round_trip() {
        for policy in POLICIES.iter().chain([SecurityPolicy::None].iter()) {
            assert_eq!(SecurityPolicy::from_uri(policy.to_uri()), *policy);
        }
        assert_eq!(
            SecurityPolicy::from_uri("http://something/else"),
            SecurityPolicy::Unknown
        );
    }

    #[test]
    fn key_derivation_directions_differ() {
        for policy in &POLICIES {
            let local_nonce = vec![1u8; policy.secure_channel_nonce_length()];
            let remote_nonce = vec![2u8; policy.secure_channel_nonce_length()];
            let (sig_l, enc_l, iv_l) =
                policy.make_secure_channel_keys(&remote_nonce, &local_nonce);
            let (sig_r, _, iv_r) = policy.make_secure_channel_keys(&local_nonce, &remote_nonce);

            assert_eq!(sig_l.len(), policy.derived_signing_key_size());
            assert_eq!(enc_l.value().len(), policy.derived_encryption_key_size());
            assert_eq!(iv_l.len(), policy.plain_block_size());
            assert_ne!(sig_l, sig_r);
            assert_ne!(iv_l, iv_r);
        }
    }

    #[test]
    fn symmetric_sign_and_verify() {
        for policy in &POLICIES {
            let key = vec![9u8; policy.derived_signing_key_size()];
            let data = b"chunk bytes to protect";
            let mut signature = vec![0u8; policy.symmetric_signature_size()];
            policy.symmetric_sign(&key, data, &mut signature).unwrap();
            policy
                .symmetric_verify_signature(&key, data, &signature)
                .unwrap();
            assert!(policy
                .symmetric_verify_signature(&key, b"forged", &signature)
                .is_err());
        }
    }
}
