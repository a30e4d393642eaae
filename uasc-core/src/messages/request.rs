use std::io::{Read, Write};

use uasc_types::*;

use crate::comms::message_chunk::MessageChunkType;

use super::{Message, MessageType};

macro_rules! request_enum {
    ($($name:ident: $value:ident; $enc:ident),* $(,)?) => {
        /// Enum of every request message the client can send.
        #[derive(Debug, PartialEq, Clone)]
        pub enum RequestMessage {
            $(
                #[doc = stringify!($name)]
                $name(Box<$value>),
            )*
        }

        $(
            impl From<$value> for RequestMessage {
                fn from(value: $value) -> Self {
                    Self::$name(Box::new(value))
                }
            }
        )*

        impl BinaryEncodable for RequestMessage {
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

        impl RequestMessage {
            /// The request header of the message.
            pub fn request_header(&self) -> &RequestHeader {
                match self {
                    $( Self::$name(value) => &value.request_header, )*
                }
            }

            /// The request header of the message, mutably.
            pub fn request_header_mut(&mut self) -> &mut RequestHeader {
                match self {
                    $( Self::$name(value) => &mut value.request_header, )*
                }
            }
        }

        impl Message for RequestMessage {
            fn request_handle(&self) -> u32 {
                self.request_header().request_handle
            }

            fn decode_by_object_id<S: Read>(
                stream: &mut S,
                object_id: ObjectId,
                ctx: &Context<'_>,
            ) -> EncodingResult<Self> {
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

impl MessageType for RequestMessage {
    fn message_type(&self) -> MessageChunkType {
        match self {
            Self::OpenSecureChannel(_) => MessageChunkType::OpenSecureChannel,
            Self::CloseSecureChannel(_) => MessageChunkType::CloseSecureChannel,
            _ => MessageChunkType::Message,
        }
    }
}

request_enum! {
    OpenSecureChannel: OpenSecureChannelRequest; OpenSecureChannelRequest_Encoding_DefaultBinary,
    CloseSecureChannel: CloseSecureChannelRequest; CloseSecureChannelRequest_Encoding_DefaultBinary,
    GetEndpoints: GetEndpointsRequest; GetEndpointsRequest_Encoding_DefaultBinary,
    CreateSession: CreateSessionRequest; CreateSessionRequest_Encoding_DefaultBinary,
    ActivateSession: ActivateSessionRequest; ActivateSessionRequest_Encoding_DefaultBinary,
    CloseSession: CloseSessionRequest; CloseSessionRequest_Encoding_DefaultBinary,
    Read: ReadRequest; ReadRequest_Encoding_DefaultBinary,
    CreateSubscription: CreateSubscriptionRequest; CreateSubscriptionRequest_Encoding_DefaultBinary,
    Publish: PublishRequest; PublishRequest_Encoding_DefaultBinary,
}
