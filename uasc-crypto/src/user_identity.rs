// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! User identity token packaging for ActivateSession: the legacy secret
//! encryption applied to passwords and issued tokens, and the signature
//! data exchanged to prove key ownership.

use log::error;

use uasc_types::{
    ByteString, Error, IssuedIdentityToken, StatusCode, UAString, UserNameIdentityToken,
    UserTokenPolicy,
};

use crate::{
    pkey::{KeySize, PrivateKey, RsaPadding},
    security_policy::SecurityPolicy,
    x509::X509,
};

/// URI of the RSA PKCS#1 v1.5 token encryption algorithm.
pub const RSA_15_URI: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
/// URI of the RSA OAEP (SHA-1) token encryption algorithm.
pub const RSA_OAEP_URI: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep";
/// URI of the RSA OAEP SHA2-256 token encryption algorithm.
pub const RSA_OAEP_SHA2_256_URI: &str =
    "http://opcfoundation.org/UA/security/rsa-oaep-sha2-256";

/// The policy that actually applies to a user token: the policy it declares
/// for itself, or the channel's policy when it declares none.
pub fn token_security_policy(
    policy: &UserTokenPolicy,
    channel_policy: SecurityPolicy,
) -> SecurityPolicy {
    if policy.security_policy_uri.is_null() || policy.security_policy_uri.is_empty() {
        channel_policy
    } else {
        SecurityPolicy::from_uri(policy.security_policy_uri.as_ref())
    }
}

/// Encrypt a secret for transmission inside an identity token, the "legacy
/// secret" scheme: a 4 byte little-endian length of `secret || nonce`, the
/// secret, and the server nonce, all RSA encrypted under the server
/// certificate with the padding the policy selects.
///
/// Returns the cipher and the algorithm URI to put in the token. For the
/// None policy the secret goes out as cleartext with a null URI.
pub fn legacy_secret_encrypt(
    policy: SecurityPolicy,
    server_cert: Option<&X509>,
    server_nonce: &[u8],
    secret: &[u8],
) -> Result<(ByteString, UAString), Error> {
    if policy == SecurityPolicy::None {
        return Ok((ByteString::from(secret), UAString::null()));
    }
    if !policy.is_supported() {
        return Err(Error::new(
            StatusCode::BadSecurityPolicyRejected,
            "Token policy is unknown",
        ));
    }
    let Some(server_cert) = server_cert else {
        error!("Cannot encrypt the token secret, there is no server certificate");
        return Err(Error::new(
            StatusCode::BadCertificateInvalid,
            "No server certificate to encrypt the token under",
        ));
    };

    let padding = policy.asymmetric_encryption_padding();
    let algorithm = match padding {
        RsaPadding::Pkcs1 => RSA_15_URI,
        RsaPadding::OaepSha1 => RSA_OAEP_URI,
        RsaPadding::OaepSha256 => RSA_OAEP_SHA2_256_URI,
    };

    // [ u32 length | secret | nonce ]
    let mut plain = Vec::with_capacity(4 + secret.len() + server_nonce.len());
    plain.extend_from_slice(&((secret.len() + server_nonce.len()) as u32).to_le_bytes());
    plain.extend_from_slice(secret);
    plain.extend_from_slice(server_nonce);

    let public_key = server_cert.public_key()?;
    let mut cipher = vec![0u8; public_key.calculate_cipher_text_size(plain.len(), padding)];
    let size = public_key.encrypt(padding, &plain, &mut cipher)?;
    cipher.truncate(size);
    Ok((ByteString::from(cipher), UAString::from(algorithm)))
}

/// Build a user name identity token for the policy, encrypting the password
/// when the policy requires it.
pub fn make_user_name_identity_token(
    channel_policy: SecurityPolicy,
    policy: &UserTokenPolicy,
    server_cert: Option<&X509>,
    server_nonce: &[u8],
    user_name: &str,
    password: &str,
) -> Result<UserNameIdentityToken, Error> {
    let token_policy = token_security_policy(policy, channel_policy);
    let (password, encryption_algorithm) = legacy_secret_encrypt(
        token_policy,
        server_cert,
        server_nonce,
        password.as_bytes(),
    )?;
    Ok(UserNameIdentityToken {
        policy_id: policy.policy_id.clone(),
        user_name: UAString::from(user_name),
        password,
        encryption_algorithm,
    })
}

/// Build an issued identity token for the policy, encrypting the token data
/// the same way passwords are.
pub fn make_issued_identity_token(
    channel_policy: SecurityPolicy,
    policy: &UserTokenPolicy,
    server_cert: Option<&X509>,
    server_nonce: &[u8],
    token_data: &[u8],
) -> Result<IssuedIdentityToken, Error> {
    let token_policy = token_security_policy(policy, channel_policy);
    let (token_data, encryption_algorithm) =
        legacy_secret_encrypt(token_policy, server_cert, server_nonce, token_data)?;
    Ok(IssuedIdentityToken {
        policy_id: policy.policy_id.clone(),
        token_data,
        encryption_algorithm,
    })
}

/// Create signature data over `cert || nonce` with the policy's asymmetric
/// signature scheme: the client signature on ActivateSession and the
/// identity signature of X.509 tokens.
pub fn create_signature_data(
    signing_key: &PrivateKey,
    policy: SecurityPolicy,
    cert: &ByteString,
    nonce: &ByteString,
) -> Result<uasc_types::SignatureData, Error> {
    if policy == SecurityPolicy::None {
        return Ok(uasc_types::SignatureData::null());
    }
    let data = cert.concat(nonce);
    let mut signature = vec![0u8; signing_key.size()];
    policy.asymmetric_sign(signing_key, data.as_ref(), &mut signature)?;
    Ok(uasc_types::SignatureData {
        algorithm: UAString::from(policy.asymmetric_signature_algorithm().uri()),
        signature: ByteString::from(signature),
    })
}

/// Verify signature data over `cert || nonce`, e.g. the server signature
/// returned by CreateSession. A mismatch maps to
/// `BadApplicationSignatureInvalid`.
pub fn verify_signature_data(
    verification_cert: &X509,
    policy: SecurityPolicy,
    signature: &uasc_types::SignatureData,
    cert: &ByteString,
    nonce: &ByteString,
) -> Result<(), Error> {
    if policy == SecurityPolicy::None {
        return Ok(());
    }
    if signature.signature.is_null() {
        return Err(Error::new(
            StatusCode::BadApplicationSignatureInvalid,
            "Signature is missing",
        ));
    }
    let data = cert.concat(nonce);
    let key = verification_cert.public_key()?;
    policy
        .asymmetric_verify_signature(&key, data.as_ref(), signature.signature.as_ref())
        .map_err(|_| {
            Error::new(
                StatusCode::BadApplicationSignatureInvalid,
                "The nonce signature does not verify against the certificate",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security_policy::SECURITY_POLICY_BASIC_128_RSA_15_URI;
    use crate::x509::create_self_signed;
    use std::sync::LazyLock;
    use uasc_types::UserTokenType;

    static SERVER: LazyLock<(PrivateKey, X509)> = LazyLock::new(|| {
        let key = PrivateKey::new(2048).unwrap();
        let cert = create_self_signed(&key, "server", 30).unwrap();
        (key, cert)
    });

    fn policy(uri: &str) -> UserTokenPolicy {
        UserTokenPolicy {
            policy_id: "username".into(),
            token_type: UserTokenType::UserName,
            issued_token_type: UAString::null(),
            issuer_endpoint_url: UAString::null(),
            security_policy_uri: if uri.is_empty() {
                UAString::null()
            } else {
                uri.into()
            },
        }
    }

    #[test]
    fn encrypted_password_has_cipher_size_and_uri() {
        let (_, cert) = &*SERVER;
        let nonce = [7u8; 32];
        let token = make_user_name_identity_token(
            SecurityPolicy::Basic256Sha256,
            &policy(""),
            Some(cert),
            &nonce,
            "user",
            "s3cr3t",
        )
        .unwrap();
        // RSA-2048 cipher text: one block of 256 bytes
        assert_eq!(token.password.len(), 256);
        assert_eq!(token.encryption_algorithm.as_ref(), RSA_OAEP_URI);

        // The server can get the password back out
        let (key, _) = &*SERVER;
        let mut plain = vec![0u8; 256];
        let n = key
            .decrypt(RsaPadding::OaepSha1, token.password.as_ref(), &mut plain)
            .unwrap();
        let plain = &plain[..n];
        let len = u32::from_le_bytes(plain[..4].try_into().unwrap()) as usize;
        assert_eq!(len, 6 + 32);
        assert_eq!(&plain[4..10], b"s3cr3t");
        assert_eq!(&plain[10..42], &nonce);
    }

    #[test]
    fn cleartext_password_for_none_policy() {
        let token = make_user_name_identity_token(
            SecurityPolicy::None,
            &policy(""),
            None,
            &[],
            "user",
            "open",
        )
        .unwrap();
        assert_eq!(token.password.as_ref(), b"open");
        assert!(token.encryption_algorithm.is_null());
    }

    #[test]
    fn token_policy_overrides_channel_policy() {
        let (_, cert) = &*SERVER;
        let token = make_user_name_identity_token(
            SecurityPolicy::None,
            &policy(SECURITY_POLICY_BASIC_128_RSA_15_URI),
            Some(cert),
            &[1u8; 16],
            "user",
            "pw",
        )
        .unwrap();
        assert_eq!(token.encryption_algorithm.as_ref(), RSA_15_URI);
    }

    #[test]
    fn signature_data_round_trip() {
        let (key, cert) = &*SERVER;
        let signed_cert = ByteString::from(&b"cert bytes"[..]);
        let nonce = ByteString::from(&[5u8; 32][..]);
        for policy in [
            SecurityPolicy::Basic256Sha256,
            SecurityPolicy::Aes256Sha256RsaPss,
        ] {
            let sig = create_signature_data(key, policy, &signed_cert, &nonce).unwrap();
            assert_eq!(
                sig.algorithm.as_ref(),
                policy.asymmetric_signature_algorithm().uri()
            );
            verify_signature_data(cert, policy, &sig, &signed_cert, &nonce).unwrap();

            let wrong_nonce = ByteString::from(&[6u8; 32][..]);
            assert_eq!(
                verify_signature_data(cert, policy, &sig, &signed_cert, &wrong_nonce)
                    .unwrap_err()
                    .status(),
                StatusCode::BadApplicationSignatureInvalid
            );
        }
    }
}
