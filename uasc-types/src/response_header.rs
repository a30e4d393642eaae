// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The header carried by every service response.

use std::io::{Read, Write};

use crate::{
    date_time::DateTime,
    diagnostic_info::DiagnosticInfo,
    encoding::{byte_len_array, BinaryDecodable, BinaryEncodable, EncodingResult},
    extension_object::ExtensionObject,
    node_ids::ObjectId,
    status_code::StatusCode,
    string::UAString,
    Context, IntegerId, MessageInfo,
};

/// The header returned with every service response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseHeader {
    /// The time the server sent the response.
    pub timestamp: DateTime,
    /// The handle the client assigned to the request this answers.
    pub request_handle: IntegerId,
    /// The overall result of the service call.
    pub service_result: StatusCode,
    /// Diagnostics for the service result.
    pub service_diagnostics: DiagnosticInfo,
    /// Strings referenced by index from diagnostics.
    pub string_table: Option<Vec<UAString>>,
    /// Reserved for future use.
    pub additional_header: ExtensionObject,
}

impl MessageInfo for ResponseHeader {
    fn type_id(&self) -> ObjectId {
        ObjectId::ResponseHeader_Encoding_DefaultBinary
    }
}

impl BinaryEncodable for ResponseHeader {
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        self.timestamp.byte_len(ctx)
            + self.request_handle.byte_len(ctx)
            + self.service_result.byte_len(ctx)
            + self.service_diagnostics.byte_len(ctx)
            + byte_len_array(&self.string_table, ctx)
            + self.additional_header.byte_len(ctx)
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()> {
        self.timestamp.encode(stream, ctx)?;
        self.request_handle.encode(stream, ctx)?;
        self.service_result.encode(stream, ctx)?;
        self.service_diagnostics.encode(stream, ctx)?;
        self.string_table.encode(stream, ctx)?;
        self.additional_header.encode(stream, ctx)
    }
}

impl BinaryDecodable for ResponseHeader {
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self> {
        Ok(ResponseHeader {
            timestamp: DateTime::decode(stream, ctx)?,
            request_handle: IntegerId::decode(stream, ctx)?,
            service_result: StatusCode::decode(stream, ctx)?,
            service_diagnostics: DiagnosticInfo::decode(stream, ctx)?,
            string_table: BinaryDecodable::decode(stream, ctx)?,
            additional_header: ExtensionObject::decode(stream, ctx)?,
        })
    }
}
