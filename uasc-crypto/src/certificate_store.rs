// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The trust store: holds the application instance certificate and private
//! key, and decides whether remote certificates are acceptable.

use log::{error, warn};

use uasc_types::{Error, StatusCode};

use crate::{
    pkey::PrivateKey,
    x509::{Thumbprint, X509},
};

/// Holds the application's own certificate and key and the set of trusted
/// peer thumbprints.
///
/// Certificates are checked for time validity and trust. In permissive mode
/// unknown certificates are accepted with a warning, which is useful for
/// tests and first-contact scenarios where trust is established out of
/// band.
pub struct CertificateStore {
    own_cert: Option<X509>,
    own_key: Option<PrivateKey>,
    trusted: Vec<Thumbprint>,
    trust_unknown_certs: bool,
    check_time: bool,
}

impl CertificateStore {
    /// Create an empty store that rejects everything.
    pub fn new() -> CertificateStore {
        CertificateStore {
            own_cert: None,
            own_key: None,
            trusted: Vec::new(),
            trust_unknown_certs: false,
            check_time: true,
        }
    }

    /// Create a store with an application certificate and key.
    pub fn new_with_keypair(cert: X509, key: PrivateKey) -> CertificateStore {
        CertificateStore {
            own_cert: Some(cert),
            own_key: Some(key),
            trusted: Vec::new(),
            trust_unknown_certs: false,
            check_time: true,
        }
    }

    /// Accept certificates that are not explicitly trusted.
    pub fn set_trust_unknown_certs(&mut self, trust: bool) {
        self.trust_unknown_certs = trust;
    }

    /// Toggle the validity period check.
    pub fn set_check_time(&mut self, check: bool) {
        self.check_time = check;
    }

    /// Explicitly trust the certificate with this thumbprint.
    pub fn trust_cert(&mut self, cert: &X509) {
        self.trusted.push(cert.thumbprint());
    }

    /// The application instance certificate.
    pub fn read_own_cert(&self) -> Result<X509, Error> {
        self.own_cert.clone().ok_or_else(|| {
            Error::new(
                StatusCode::BadConfigurationError,
                "No application instance certificate is configured",
            )
        })
    }

    /// The application instance private key.
    pub fn read_own_pkey(&self) -> Result<PrivateKey, Error> {
        self.own_key.clone().ok_or_else(|| {
            Error::new(
                StatusCode::BadConfigurationError,
                "No application instance private key is configured",
            )
        })
    }

    /// Validate a remote certificate, rejecting it when it is outside its
    /// validity period or not trusted.
    pub fn validate_remote_certificate(&self, cert: &X509) -> Result<(), Error> {
        if self.check_time && !cert.is_time_valid() {
            error!(
                "Certificate {} is expired or not yet valid",
                cert.subject_name()
            );
            return Err(Error::new(
                StatusCode::BadCertificateTimeInvalid,
                "Certificate is outside its validity period",
            ));
        }
        let thumbprint = cert.thumbprint();
        if self.trusted.contains(&thumbprint) {
            return Ok(());
        }
        if self.trust_unknown_certs {
            warn!(
                "Trusting unknown certificate {} because the store is permissive",
                cert.subject_name()
            );
            return Ok(());
        }
        error!("Certificate {} is not trusted", cert.subject_name());
        Err(Error::new(
            StatusCode::BadCertificateUntrusted,
            "Certificate is not trusted",
        ))
    }
}

impl Default for CertificateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x509::create_self_signed;

    #[test]
    fn trust_decisions() {
        let key = PrivateKey::new(2048).unwrap();
        let cert = create_self_signed(&key, "peer", 30).unwrap();

        let mut store = CertificateStore::new();
        assert_eq!(
            store
                .validate_remote_certificate(&cert)
                .unwrap_err()
                .status(),
            StatusCode::BadCertificateUntrusted
        );

        store.trust_cert(&cert);
        store.validate_remote_certificate(&cert).unwrap();

        let mut permissive = CertificateStore::new();
        permissive.set_trust_unknown_certs(true);
        permissive.validate_remote_certificate(&cert).unwrap();
    }

    #[test]
    fn own_keypair() {
        let key = PrivateKey::new(2048).unwrap();
        let cert = create_self_signed(&key, "own", 30).unwrap();
        let store = CertificateStore::new_with_keypair(cert.clone(), key);
        assert_eq!(store.read_own_cert().unwrap(), cert);
        store.read_own_pkey().unwrap();

        assert!(CertificateStore::new().read_own_cert().is_err());
    }
}
