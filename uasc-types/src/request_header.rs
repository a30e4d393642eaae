// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The header carried by every service request.

use std::io::{Read, Write};

use crate::{
    date_time::DateTime,
    encoding::{BinaryDecodable, BinaryEncodable, EncodingResult},
    extension_object::ExtensionObject,
    node_id::NodeId,
    node_ids::ObjectId,
    string::UAString,
    Context, IntegerId, MessageInfo,
};

/// The header passed with every service request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestHeader {
    /// The secret session identifier returned by CreateSession.
    pub authentication_token: NodeId,
    /// The time the client sent the request.
    pub timestamp: DateTime,
    /// Client assigned identifier correlating the response to the request.
    /// Zero is never assigned.
    pub request_handle: IntegerId,
    /// Bits requesting the server return diagnostics.
    pub return_diagnostics: u32,
    /// An identifier persisted in audit logs.
    pub audit_entry_id: UAString,
    /// How long in milliseconds the client will wait for the response.
    /// Zero means the client does not care.
    pub timeout_hint: u32,
    /// Reserved for future use.
    pub additional_header: ExtensionObject,
}

impl MessageInfo for RequestHeader {
    fn type_id(&self) -> ObjectId {
        ObjectId::RequestHeader_Encoding_DefaultBinary
    }
}

impl BinaryEncodable for RequestHeader {
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        self.authentication_token.byte_len(ctx)
            + self.timestamp.byte_len(ctx)
            + self.request_handle.byte_len(ctx)
            + self.return_diagnostics.byte_len(ctx)
            + self.audit_entry_id.byte_len(ctx)
            + self.timeout_hint.byte_len(ctx)
            + self.additional_header.byte_len(ctx)
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()> {
        self.authentication_token.encode(stream, ctx)?;
        self.timestamp.encode(stream, ctx)?;
        self.request_handle.encode(stream, ctx)?;
        self.return_diagnostics.encode(stream, ctx)?;
        self.audit_entry_id.encode(stream, ctx)?;
        self.timeout_hint.encode(stream, ctx)?;
        self.additional_header.encode(stream, ctx)
    }
}

impl BinaryDecodable for RequestHeader {
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(RequestHeader {
            authentication_token: NodeId::decode(stream, ctx)?,
            timestamp: DateTime::decode(stream, ctx)?,
            request_handle: IntegerId::decode(stream, ctx)?,
            return_diagnostics: u32::decode(stream, ctx)?,
            audit_entry_id: UAString::decode(stream, ctx)?,
            timeout_hint: u32::decode(stream, ctx)?,
            additional_header: ExtensionObject::decode(stream, ctx)?,
        })
    }
}

impl RequestHeader {
    /// Create a header stamped with the current time.
    pub fn new(
        authentication_token: &NodeId,
        request_handle: IntegerId,
        timeout_hint: u32,
    ) -> RequestHeader {
        RequestHeader {
            authentication_token: authentication_token.clone(),
            timestamp: DateTime::now(),
            request_handle,
            return_diagnostics: 0,
            audit_entry_id: UAString::null(),
            timeout_hint,
            additional_header: ExtensionObject::null(),
        }
    }
}
