// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! User identity token structures carried inside ActivateSession.

use super::binary_message;
use crate::{byte_string::ByteString, string::UAString};

/// Identifies the user as anonymous.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnonymousIdentityToken {
    /// The id of the endpoint policy this token was built for.
    pub policy_id: UAString,
}

binary_message!(AnonymousIdentityToken; AnonymousIdentityToken_Encoding_DefaultBinary;
    policy_id);

/// Identifies the user by name and password. The password is encrypted
/// under the server certificate unless the policy disables encryption.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserNameIdentityToken {
    /// The id of the endpoint policy this token was built for.
    pub policy_id: UAString,
    /// The name of the user.
    pub user_name: UAString,
    /// The password, possibly encrypted.
    pub password: ByteString,
    /// URI of the encryption algorithm applied to the password, null for
    /// cleartext.
    pub encryption_algorithm: UAString,
}

binary_message!(UserNameIdentityToken; UserNameIdentityToken_Encoding_DefaultBinary;
    policy_id, user_name, password, encryption_algorithm);

/// Identifies the user by an X.509 certificate. The private key signs the
/// server certificate and nonce in the activate request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct X509IdentityToken {
    /// The id of the endpoint policy this token was built for.
    pub policy_id: UAString,
    /// The DER encoded certificate.
    pub certificate_data: ByteString,
}

binary_message!(X509IdentityToken; X509IdentityToken_Encoding_DefaultBinary;
    policy_id, certificate_data);

/// Identifies the user by a token issued by an external authority, for
/// example a JWT. Encrypted the same way as a password.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IssuedIdentityToken {
    /// The id of the endpoint policy this token was built for.
    pub policy_id: UAString,
    /// The token data, possibly encrypted.
    pub token_data: ByteString,
    /// URI of the encryption algorithm applied to the token, null for
    /// cleartext.
    pub encryption_algorithm: UAString,
}

binary_message!(IssuedIdentityToken; IssuedIdentityToken_Encoding_DefaultBinary;
    policy_id, token_data, encryption_algorithm);
