// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Endpoint discovery structures and the GetEndpoints service.

use super::{binary_message, ApplicationType, MessageSecurityMode, UserTokenType};
use crate::{
    byte_string::ByteString, localized_text::LocalizedText, request_header::RequestHeader,
    response_header::ResponseHeader, string::UAString,
};

/// Describes an application, client or server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplicationDescription {
    /// Globally unique identifier for the application instance.
    pub application_uri: UAString,
    /// Globally unique identifier for the product.
    pub product_uri: UAString,
    /// Human readable name for the application.
    pub application_name: LocalizedText,
    /// The type of application.
    pub application_type: ApplicationType,
    /// URI of the gateway server, if any.
    pub gateway_server_uri: UAString,
    /// URI of the discovery profile supported.
    pub discovery_profile_uri: UAString,
    /// URLs the application can be discovered at.
    pub discovery_urls: Option<Vec<UAString>>,
}

binary_message!(ApplicationDescription; ApplicationDescription_Encoding_DefaultBinary;
    application_uri, product_uri, application_name, application_type, gateway_server_uri,
    discovery_profile_uri, discovery_urls);

/// A user identity token policy an endpoint accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct UserTokenPolicy {
    /// Server assigned identifier for the policy, echoed back in tokens.
    pub policy_id: UAString,
    /// The kind of token.
    pub token_type: UserTokenType,
    /// The kind of issued token, when `token_type` is IssuedToken.
    pub issued_token_type: UAString,
    /// The endpoint issuing the tokens, when `token_type` is IssuedToken.
    pub issuer_endpoint_url: UAString,
    /// Security policy used to encrypt the token. Null means the policy of
    /// the endpoint applies.
    pub security_policy_uri: UAString,
}

binary_message!(UserTokenPolicy; UserTokenPolicy_Encoding_DefaultBinary;
    policy_id, token_type, issued_token_type, issuer_endpoint_url, security_policy_uri);

/// Describes one endpoint of a server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EndpointDescription {
    /// The URL to connect to.
    pub endpoint_url: UAString,
    /// The server behind the endpoint.
    pub server: ApplicationDescription,
    /// The server application instance certificate.
    pub server_certificate: ByteString,
    /// The required message security mode.
    pub security_mode: MessageSecurityMode,
    /// The required security policy URI.
    pub security_policy_uri: UAString,
    /// The user token policies the endpoint accepts.
    pub user_identity_tokens: Option<Vec<UserTokenPolicy>>,
    /// The transport profile, always UA TCP binary here.
    pub transport_profile_uri: UAString,
    /// Relative security of this endpoint against the server's others.
    pub security_level: u8,
}

binary_message!(EndpointDescription; EndpointDescription_Encoding_DefaultBinary;
    endpoint_url, server, server_certificate, security_mode, security_policy_uri,
    user_identity_tokens, transport_profile_uri, security_level);

impl EndpointDescription {
    /// Find the first user token policy of the given type, if the endpoint
    /// has one.
    pub fn find_policy(&self, token_type: UserTokenType) -> Option<&UserTokenPolicy> {
        self.user_identity_tokens
            .as_ref()?
            .iter()
            .find(|policy| policy.token_type == token_type)
    }
}

/// Asks a server for the endpoints it offers.
#[derive(Debug, Clone, PartialEq)]
pub struct GetEndpointsRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// The URL the client used to connect.
    pub endpoint_url: UAString,
    /// Locales to return text in, in preference order.
    pub locale_ids: Option<Vec<UAString>>,
    /// Transport profiles to filter by.
    pub profile_uris: Option<Vec<UAString>>,
}

binary_message!(GetEndpointsRequest; GetEndpointsRequest_Encoding_DefaultBinary;
    request_header, endpoint_url, locale_ids, profile_uris);

/// Response to [`GetEndpointsRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct GetEndpointsResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// The endpoints the server offers.
    pub endpoints: Option<Vec<EndpointDescription>>,
}

binary_message!(GetEndpointsResponse; GetEndpointsResponse_Encoding_DefaultBinary;
    response_header, endpoints);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryDecodable, BinaryEncodable, ContextOwned};

    #[test]
    fn endpoint_description_round_trip() {
        let endpoint = EndpointDescription {
            endpoint_url: "opc.tcp://localhost:4855/".into(),
            server: ApplicationDescription {
                application_uri: "urn:server".into(),
                application_name: LocalizedText::new("en", "server"),
                application_type: ApplicationType::Server,
                ..Default::default()
            },
            server_certificate: ByteString::null(),
            security_mode: MessageSecurityMode::SignAndEncrypt,
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256"
                .into(),
            user_identity_tokens: Some(vec![UserTokenPolicy {
                policy_id: "0".into(),
                token_type: UserTokenType::Anonymous,
                issued_token_type: UAString::null(),
                issuer_endpoint_url: UAString::null(),
                security_policy_uri: UAString::null(),
            }]),
            transport_profile_uri: UAString::null(),
            security_level: 3,
        };
        let ctx_owned = ContextOwned::default();
        let ctx = ctx_owned.context();
        let buf = endpoint.encode_to_vec(&ctx);
        assert_eq!(buf.len(), endpoint.byte_len(&ctx));
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(EndpointDescription::decode(&mut c, &ctx).unwrap(), endpoint);
    }
}
