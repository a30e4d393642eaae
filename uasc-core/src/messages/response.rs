use std::io::{Read, Write};

use uasc_types::*;

use crate::comms::message_chunk::MessageChunkType;

use super::{Message, MessageType};

macro_rules! response_enum {
    ($($name:ident: $value:ident; $enc:ident),* $(,)?) => {
        /// Enum of every response message the client can receive.
        #[derive(Debug, PartialEq, Clone)]
        pub enum ResponseMessage {
            $(
                #[doc = stringify!($name)]
                $name(Box<$value>),
            )*
        }

        $(
            impl From<$value> for ResponseMessage {
                fn from(value: $value) -> Self {
                    Self::$name(Box::new(value))
                }
            }
        )*

        impl BinaryEncodable for ResponseMessage {
            fn byte_len(&self, ctx: &Context<'_>) -> usize {
                match self {
                    $( Self::$name(value) => value.byte_len(ctx), )*
                }
            }

            fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()> {
                match self {
                    $( Self::$name(value) => value.encode(stream, ctx), )*
                }
            }
        }

        impl ResponseMessage {
            /// The response header of the message.
            pub fn response_header(&self) -> &ResponseHeader {
                match self {
                    $( Self::$name(value) => &value.response_header, )*
                }
            }

            /// The handle of the request this message answers.
            pub fn request_handle(&self) -> u32 {
                self.response_header().request_handle
            }
        }

        impl Message for ResponseMessage {
            fn request_handle(&self) -> u32 {
                self.response_header().request_handle
            }

            fn decode_by_object_id<S: Read>(
                stream: &mut S,
                object_id: ObjectId,
                ctx: &Context<'_>,
            ) -> EncodingResult<Self> {
                // The first two arms are the hot path: publish and read
                // responses dominate steady state traffic.
                match object_id {
                    $( ObjectId::$enc => Ok($value::decode(stream, ctx)?.into()), )*
                    _ => Err(Error::decoding(format!(
                        "decoding unsupported for object id {:?}",
                        object_id
                    ))),
                }
            }

            fn type_id(&self) -> NodeId {
                match self {
                    $( Self::$name(v) => MessageInfo::type_id(v.as_ref()).into(), )*
                }
            }
        }
    };
}

impl MessageType for ResponseMessage {
    fn message_type(&self) -> MessageChunkType {
        match self {
            Self::OpenSecureChannel(_) => MessageChunkType::OpenSecureChannel,
            Self::CloseSecureChannel(_) => MessageChunkType::CloseSecureChannel,
            _ => MessageChunkType::Message,
        }
    }
}

response_enum! {
    Publish: PublishResponse; PublishResponse_Encoding_DefaultBinary,
    Read: ReadResponse; ReadResponse_Encoding_DefaultBinary,
    OpenSecureChannel: OpenSecureChannelResponse; OpenSecureChannelResponse_Encoding_DefaultBinary,
    CloseSecureChannel: CloseSecureChannelResponse; CloseSecureChannelResponse_Encoding_DefaultBinary,
    GetEndpoints: GetEndpointsResponse; GetEndpointsResponse_Encoding_DefaultBinary,
    CreateSession: CreateSessionResponse; CreateSessionResponse_Encoding_DefaultBinary,
    ActivateSession: ActivateSessionResponse; ActivateSessionResponse_Encoding_DefaultBinary,
    CloseSession: CloseSessionResponse; CloseSessionResponse_Encoding_DefaultBinary,
    CreateSubscription: CreateSubscriptionResponse; CreateSubscriptionResponse_Encoding_DefaultBinary,
    ServiceFault: ServiceFault; ServiceFault_Encoding_DefaultBinary,
}
