// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The session service set: CreateSession, ActivateSession, CloseSession,
//! and the generic ServiceFault.

use super::{binary_message, ApplicationDescription, EndpointDescription};
use crate::{
    byte_string::ByteString, diagnostic_info::DiagnosticInfo, extension_object::ExtensionObject,
    node_id::NodeId, request_header::RequestHeader, response_header::ResponseHeader,
    status_code::StatusCode, string::UAString,
};

/// An algorithm identifier and a signature produced with it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureData {
    /// URI of the algorithm used to create the signature.
    pub algorithm: UAString,
    /// The signature bytes.
    pub signature: ByteString,
}

binary_message!(SignatureData; SignatureData_Encoding_DefaultBinary; algorithm, signature);

impl SignatureData {
    /// A null signature, sent when no security is in use.
    pub fn null() -> SignatureData {
        SignatureData::default()
    }

    /// True if neither algorithm nor signature is set.
    pub fn is_null(&self) -> bool {
        self.algorithm.is_null() && self.signature.is_null()
    }
}

/// A software certificate signed by an authority.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedSoftwareCertificate {
    /// The certificate data.
    pub certificate_data: ByteString,
    /// Signature over the certificate data.
    pub signature: ByteString,
}

binary_message!(SignedSoftwareCertificate; SignedSoftwareCertificate_Encoding_DefaultBinary;
    certificate_data, signature);

/// Creates a session on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Description of the client application.
    pub client_description: ApplicationDescription,
    /// URI of the server the client expects to talk to.
    pub server_uri: UAString,
    /// The network address the client used.
    pub endpoint_url: UAString,
    /// Human readable name for the session.
    pub session_name: UAString,
    /// Fresh random bytes, signed by the server to prove it holds the key.
    pub client_nonce: ByteString,
    /// The client application instance certificate.
    pub client_certificate: ByteString,
    /// The session timeout the client would like, in milliseconds.
    pub requested_session_timeout: f64,
    /// Largest response the client will accept, 0 for no limit.
    pub max_response_message_size: u32,
}

binary_message!(CreateSessionRequest; CreateSessionRequest_Encoding_DefaultBinary;
    request_header, client_description, server_uri, endpoint_url, session_name, client_nonce,
    client_certificate, requested_session_timeout, max_response_message_size);

/// Response to [`CreateSessionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// The identifier of the session node in the server address space.
    pub session_id: NodeId,
    /// The secret token the client puts in every subsequent request header.
    pub authentication_token: NodeId,
    /// The session timeout the server granted, in milliseconds.
    pub revised_session_timeout: f64,
    /// Fresh random bytes, signed by the client in ActivateSession.
    pub server_nonce: ByteString,
    /// The server application instance certificate.
    pub server_certificate: ByteString,
    /// The endpoints of the server, for certificate cross-checking.
    pub server_endpoints: Option<Vec<EndpointDescription>>,
    /// Obsolete, servers return an empty list.
    pub server_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
    /// Server signature over the client certificate and nonce.
    pub server_signature: SignatureData,
    /// Largest request the server will accept, 0 for no limit.
    pub max_request_message_size: u32,
}

binary_message!(CreateSessionResponse; CreateSessionResponse_Encoding_DefaultBinary;
    response_header, session_id, authentication_token, revised_session_timeout, server_nonce,
    server_certificate, server_endpoints, server_software_certificates, server_signature,
    max_request_message_size);

/// Activates a created session, providing the user identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivateSessionRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Client signature over the server certificate and nonce.
    pub client_signature: SignatureData,
    /// Obsolete, clients send an empty list.
    pub client_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
    /// Locales in preference order.
    pub locale_ids: Option<Vec<UAString>>,
    /// The user identity token, one of the identity token structures.
    pub user_identity_token: ExtensionObject,
    /// Signature made with the identity token's key, for X.509 identities.
    pub user_token_signature: SignatureData,
}

binary_message!(ActivateSessionRequest; ActivateSessionRequest_Encoding_DefaultBinary;
    request_header, client_signature, client_software_certificates, locale_ids,
    user_identity_token, user_token_signature);

/// Response to [`ActivateSessionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActivateSessionResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// Fresh random bytes for the next activation or renewal.
    pub server_nonce: ByteString,
    /// Results for the software certificates.
    pub results: Option<Vec<StatusCode>>,
    /// Diagnostics for the software certificates.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_message!(ActivateSessionResponse; ActivateSessionResponse_Encoding_DefaultBinary;
    response_header, server_nonce, results, diagnostic_infos);

/// Closes a session.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseSessionRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Whether subscriptions of the session are deleted immediately.
    pub delete_subscriptions: bool,
}

binary_message!(CloseSessionRequest; CloseSessionRequest_Encoding_DefaultBinary;
    request_header, delete_subscriptions);

/// Response to [`CloseSessionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct CloseSessionResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
}

binary_message!(CloseSessionResponse; CloseSessionResponse_Encoding_DefaultBinary;
    response_header);

/// The response a server sends when it cannot process a request at all.
/// The failure is in the header's service result.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceFault {
    /// Common response header.
    pub response_header: ResponseHeader,
}

binary_message!(ServiceFault; ServiceFault_Encoding_DefaultBinary; response_header);
