//! The request and response message enums and the trait the chunker uses to
//! encode and decode them.

mod request;
mod response;

pub use request::RequestMessage;
pub use response::ResponseMessage;

use std::io::Read;

use uasc_types::{BinaryEncodable, Context, EncodingResult, NodeId, ObjectId};

use crate::comms::message_chunk::MessageChunkType;

/// Trait for the mapping from a message to its chunk type.
pub trait MessageType {
    /// The chunk type this message travels in: OPN, CLO or MSG.
    fn message_type(&self) -> MessageChunkType;
}

/// A top level service message: encodable, tagged with its binary encoding
/// node id, and constructible from a stream given that id.
pub trait Message: BinaryEncodable + MessageType {
    /// The request handle in the message's header.
    fn request_handle(&self) -> u32;

    /// Decode a message of the concrete type named by `object_id`.
    fn decode_by_object_id<S: Read>(
        stream: &mut S,
        object_id: ObjectId,
        ctx: &Context<'_>,
    ) -> EncodingResult<Self>
    where
        Self: Sized;

    /// The node id of the message's binary encoding.
    fn type_id(&self) -> NodeId;
}
