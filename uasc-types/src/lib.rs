// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

#![warn(missing_docs)]

//! The types crate holds the OPC UA binary codec: encoding traits, the
//! built-in wire types (NodeId, Variant, DataValue and friends), the
//! registry mapping binary encoding ids to decoders, and the hand-written
//! service messages the client engine speaks.

/// Limits and constants used across the codec.
pub mod constants {
    /// Maximum number of chunks in a message. 0 means no limit.
    pub const MAX_CHUNK_COUNT: usize = 4096;
    /// Maximum size of a message in bytes. 0 means no limit.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    /// Maximum length in bytes of a string on decode.
    pub const MAX_STRING_LENGTH: usize = 2048 * 1024;
    /// Maximum length in bytes of a byte string on decode.
    pub const MAX_BYTE_STRING_LENGTH: usize = 2048 * 1024;
    /// Maximum number of array elements on decode.
    pub const MAX_ARRAY_LENGTH: usize = 1024 * 1024;
    /// Maximum decoding depth of recursive structures.
    pub const MAX_DECODING_DEPTH: u64 = 10;
    /// Maximum length in bytes of a certificate carried in a security header.
    pub const MAX_CERTIFICATE_LENGTH: usize = 32768;
}

pub mod byte_string;
pub mod context;
pub mod data_value;
pub mod date_time;
pub mod diagnostic_info;
pub mod encoding;
pub mod expanded_node_id;
pub mod extension_object;
pub mod guid;
pub mod localized_text;
pub mod node_id;
pub mod node_ids;
pub mod qualified_name;
pub mod request_header;
pub mod response_header;
pub mod service;
pub mod status_code;
pub mod string;
pub mod variant;

pub use byte_string::ByteString;
pub use context::{Context, ContextOwned, NamespaceMap, TypeRegistry};
pub use data_value::DataValue;
pub use date_time::DateTime;
pub use diagnostic_info::DiagnosticInfo;
pub use encoding::{
    process_decode_io_result, process_encode_io_result, read_bytes, read_f32, read_f64, read_i16,
    read_i32, read_i64, read_u16, read_u32, read_u64, read_u8, write_bytes, write_f32, write_f64,
    write_i16, write_i32, write_i64, write_u16, write_u32, write_u64, write_u8, BinaryDecodable,
    BinaryEncodable, DecodingOptions, DepthGauge, DepthLock, EncodingResult, Error,
    SimpleBinaryDecodable, SimpleBinaryEncodable,
};
pub use expanded_node_id::ExpandedNodeId;
pub use extension_object::{DynEncodable, ExtensionObject, ExtensionObjectBody};
pub use guid::Guid;
pub use localized_text::LocalizedText;
pub use node_id::{Identifier, NodeId};
pub use node_ids::{AttributeId, ObjectId, VariableId};
pub use qualified_name::QualifiedName;
pub use request_header::RequestHeader;
pub use response_header::ResponseHeader;
pub use service::*;
pub use status_code::StatusCode;
pub use string::{UAString, XmlElement};
pub use variant::{Array, Variant, VariantScalarTypeId};

/// This primitive data type is a UInt32 that is used as an identifier, such as a handle.
/// All values, except for 0, are valid.
pub type IntegerId = u32;

/// A Double that defines an interval of time in milliseconds.
pub type Duration = f64;

/// UtcTime is just a DateTime.
pub type UtcTime = DateTime;

/// Trait implemented by every type that carries a binary encoding id,
/// i.e. everything that can be the body of an extension object or a
/// top level service message.
pub trait MessageInfo {
    /// The binary encoding object id for this type.
    fn type_id(&self) -> ObjectId;
}
