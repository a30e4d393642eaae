// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The OpenSecureChannel and CloseSecureChannel services.

use super::{binary_message, MessageSecurityMode, SecurityTokenRequestType};
use crate::{
    byte_string::ByteString, date_time::DateTime, request_header::RequestHeader,
    response_header::ResponseHeader,
};

/// The token identifying the keys of a secure channel for a period of its
/// lifetime.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelSecurityToken {
    /// The id the server assigned to the secure channel.
    pub channel_id: u32,
    /// The id of the current token, changes on every renewal.
    pub token_id: u32,
    /// When the token was created, by the server clock.
    pub created_at: DateTime,
    /// The lifetime of the token in milliseconds.
    pub revised_lifetime: u32,
}

binary_message!(ChannelSecurityToken; ChannelSecurityToken_Encoding_DefaultBinary;
    channel_id, token_id, created_at, revised_lifetime);

/// Opens a secure channel, or renews the token of an open one.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// The UA TCP protocol version the client implements.
    pub client_protocol_version: u32,
    /// Issue or Renew.
    pub request_type: SecurityTokenRequestType,
    /// The security mode to apply to messages on the channel.
    pub security_mode: MessageSecurityMode,
    /// Random bytes mixed into the key derivation.
    pub client_nonce: ByteString,
    /// The token lifetime the client would like, in milliseconds.
    pub requested_lifetime: u32,
}

binary_message!(OpenSecureChannelRequest; OpenSecureChannelRequest_Encoding_DefaultBinary;
    request_header, client_protocol_version, request_type, security_mode, client_nonce,
    requested_lifetime);

/// Response to [`OpenSecureChannelRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// The UA TCP protocol version the server implements.
    pub server_protocol_version: u32,
    /// The channel id and new token.
    pub security_token: ChannelSecurityToken,
    /// Random bytes mixed into the key derivation.
    pub server_nonce: ByteString,
}

binary_message!(OpenSecureChannelResponse; OpenSecureChannelResponse_Encoding_DefaultBinary;
    response_header, server_protocol_version, security_token, server_nonce);

/// Closes a secure channel. The server does not respond to this on the
/// wire, the response type exists for symmetry.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseSecureChannelRequest {
    /// Common request header.
    pub request_header: RequestHeader,
}

binary_message!(CloseSecureChannelRequest; CloseSecureChannelRequest_Encoding_DefaultBinary;
    request_header);

/// Response to [`CloseSecureChannelRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct CloseSecureChannelResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
}

binary_message!(CloseSecureChannelResponse; CloseSecureChannelResponse_Encoding_DefaultBinary;
    response_header);
