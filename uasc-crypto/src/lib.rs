// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

#![warn(missing_docs)]

//! Cryptography for the secure conversation: security policies, PSHA key
//! derivation, symmetric and asymmetric signing and encryption, X.509
//! certificate handling and the trust store.

pub mod aeskey;
pub mod certificate_store;
pub mod hash;
pub mod pkey;
pub mod random;
pub mod security_policy;
pub mod user_identity;
pub mod x509;

pub use aeskey::AesKey;
pub use certificate_store::CertificateStore;
pub use pkey::{KeySize, PrivateKey, PublicKey, RsaPadding};
pub use security_policy::SecurityPolicy;
pub use user_identity::{
    create_signature_data, make_issued_identity_token, make_user_name_identity_token,
    verify_signature_data,
};
pub use x509::{create_self_signed, Thumbprint, X509};

/// The keys derived for one direction of a secure channel: signing key,
/// encryption key and initialization vector.
pub type SecurityKeys = (Vec<u8>, AesKey, Vec<u8>);
