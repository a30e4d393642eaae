// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! X.509 certificate wrapper over DER bytes, thumbprints, and a self signed
//! certificate builder used by tests and samples.

use std::str::FromStr;

use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{Decode, Encode},
    name::Name,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
    Certificate,
};

use uasc_types::{ByteString, Error, StatusCode};

use crate::pkey::{PrivateKey, PublicKey};

/// The SHA-1 digest of the DER form of a certificate, used on the wire to
/// identify the receiver's certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbprint {
    value: [u8; Self::THUMBPRINT_SIZE],
}

impl Thumbprint {
    /// The size of a thumbprint in bytes.
    pub const THUMBPRINT_SIZE: usize = 20;

    /// Compute the thumbprint of DER certificate bytes.
    pub fn new(der: &[u8]) -> Thumbprint {
        let mut digest = Sha1::new();
        digest.update(der);
        Thumbprint {
            value: digest.finalize().into(),
        }
    }

    /// The thumbprint bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The thumbprint as a ByteString.
    pub fn as_byte_string(&self) -> ByteString {
        ByteString::from(&self.value[..])
    }
}

fn cert_error(context: impl Into<String>) -> Error {
    Error::new(StatusCode::BadCertificateInvalid, context.into())
}

/// An X.509 certificate.
#[derive(Debug, Clone)]
pub struct X509 {
    cert: Certificate,
    der: Vec<u8>,
}

impl PartialEq for X509 {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl X509 {
    /// Parse a certificate from DER bytes.
    pub fn from_der(der: &[u8]) -> Result<X509, Error> {
        let cert = Certificate::from_der(der).map_err(|e| cert_error(e.to_string()))?;
        Ok(X509 {
            cert,
            der: der.to_vec(),
        })
    }

    /// Parse a certificate from a ByteString, as carried in security
    /// headers and session messages.
    pub fn from_byte_string(bytes: &ByteString) -> Result<X509, Error> {
        if bytes.is_null() {
            Err(cert_error("Certificate is a null byte string"))
        } else {
            Self::from_der(bytes.as_ref())
        }
    }

    /// The DER bytes as a ByteString.
    pub fn as_byte_string(&self) -> ByteString {
        ByteString::from(&self.der[..])
    }

    /// The DER bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The SHA-1 thumbprint of the DER bytes.
    pub fn thumbprint(&self) -> Thumbprint {
        Thumbprint::new(&self.der)
    }

    /// Extract the RSA public key.
    pub fn public_key(&self) -> Result<PublicKey, Error> {
        let spki_der = self
            .cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| cert_error(e.to_string()))?;
        let key = rsa::RsaPublicKey::from_public_key_der(&spki_der)
            .map_err(|e| cert_error(format!("Certificate has no usable RSA key: {}", e)))?;
        Ok(PublicKey::from_rsa(key))
    }

    /// True if the current time falls inside the certificate's validity
    /// period.
    pub fn is_time_valid(&self) -> bool {
        let validity = &self.cert.tbs_certificate.validity;
        let now = std::time::SystemTime::now();
        validity.not_before.to_system_time() <= now && now <= validity.not_after.to_system_time()
    }

    /// The subject name in RFC 4514 form.
    pub fn subject_name(&self) -> String {
        self.cert.tbs_certificate.subject.to_string()
    }
}

/// Build a self signed application instance certificate for the given key,
/// valid for `valid_days` days. Used by tests and by samples that have no
/// provisioned certificate.
pub fn create_self_signed(
    private_key: &PrivateKey,
    common_name: &str,
    valid_days: u64,
) -> Result<X509, Error> {
    let serial_number = SerialNumber::from(1u32);
    let validity = Validity::from_now(std::time::Duration::from_secs(valid_days * 24 * 3600))
        .map_err(|e| cert_error(e.to_string()))?;
    let subject =
        Name::from_str(&format!("CN={}", common_name)).map_err(|e| cert_error(e.to_string()))?;
    let spki_der = private_key
        .inner()
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| cert_error(e.to_string()))?;
    let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())
        .map_err(|e| cert_error(e.to_string()))?;

    let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key.inner().clone());
    let builder = CertificateBuilder::new(
        Profile::Root,
        serial_number,
        validity,
        subject,
        spki,
        &signer,
    )
    .map_err(|e| cert_error(e.to_string()))?;
    let cert = builder
        .build::<rsa::pkcs1v15::Signature>()
        .map_err(|e| cert_error(e.to_string()))?;
    let der = cert.to_der().map_err(|e| cert_error(e.to_string()))?;
    Ok(X509 { cert, der })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkey::KeySize;
    use std::sync::LazyLock;

    static TEST_PAIR: LazyLock<(PrivateKey, X509)> = LazyLock::new(|| {
        let key = PrivateKey::new(2048).unwrap();
        let cert = create_self_signed(&key, "uasc test", 365).unwrap();
        (key, cert)
    });

    #[test]
    fn der_round_trip() {
        let (_, cert) = &*TEST_PAIR;
        let restored = X509::from_byte_string(&cert.as_byte_string()).unwrap();
        assert_eq!(&restored, cert);
        assert_eq!(restored.thumbprint(), cert.thumbprint());
    }

    #[test]
    fn public_key_matches() {
        let (key, cert) = &*TEST_PAIR;
        let public = cert.public_key().unwrap();
        assert_eq!(public.size(), key.size());

        // The extracted key verifies what the private key signs
        let mut signature = vec![0u8; key.size()];
        key.sign_sha256(b"payload", &mut signature).unwrap();
        public.verify_sha256(b"payload", &signature).unwrap();
    }

    #[test]
    fn thumbprint_is_20_bytes() {
        let (_, cert) = &*TEST_PAIR;
        assert_eq!(cert.thumbprint().value().len(), Thumbprint::THUMBPRINT_SIZE);
    }

    #[test]
    fn fresh_cert_is_time_valid() {
        let (_, cert) = &*TEST_PAIR;
        assert!(cert.is_time_valid());
    }
}
