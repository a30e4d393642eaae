// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The Read service.

use super::{binary_message, TimestampsToReturn};
use crate::{
    data_value::DataValue, diagnostic_info::DiagnosticInfo, node_id::NodeId,
    node_ids::AttributeId, qualified_name::QualifiedName, request_header::RequestHeader,
    response_header::ResponseHeader, string::UAString,
};

/// Names one attribute of one node to read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadValueId {
    /// The node to read.
    pub node_id: NodeId,
    /// The attribute to read, one of the `AttributeId` values.
    pub attribute_id: u32,
    /// Sub range of an array value, null for the whole value.
    pub index_range: UAString,
    /// The data encoding to return the value in, null for binary.
    pub data_encoding: QualifiedName,
}

binary_message!(ReadValueId; ReadValueId_Encoding_DefaultBinary;
    node_id, attribute_id, index_range, data_encoding);

impl From<NodeId> for ReadValueId {
    fn from(node_id: NodeId) -> Self {
        ReadValueId {
            node_id,
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            data_encoding: QualifiedName::null(),
        }
    }
}

/// Reads attribute values from nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Oldest acceptable cached value age in milliseconds.
    pub max_age: f64,
    /// Which timestamps to return.
    pub timestamps_to_return: TimestampsToReturn,
    /// The attributes to read.
    pub nodes_to_read: Option<Vec<ReadValueId>>,
}

binary_message!(ReadRequest; ReadRequest_Encoding_DefaultBinary;
    request_header, max_age, timestamps_to_return, nodes_to_read);

/// Response to [`ReadRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// One result per requested attribute, in request order.
    pub results: Option<Vec<DataValue>>,
    /// Diagnostics per requested attribute.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_message!(ReadResponse; ReadResponse_Encoding_DefaultBinary;
    response_header, results, diagnostic_infos);
