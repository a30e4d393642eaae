// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The hand-written service messages and supporting structures the client
//! engine speaks. Each type carries its binary encoding id through
//! [`MessageInfo`](crate::MessageInfo) and registers a decoder in the
//! process-wide type registry.

/// Implements [`MessageInfo`](crate::MessageInfo), `BinaryEncodable` and
/// `BinaryDecodable` for a struct by encoding its fields in declaration
/// order.
macro_rules! binary_message {
    ($name:ident; $id:ident; $($field:ident),* $(,)?) => {
        impl crate::MessageInfo for $name {
            fn type_id(&self) -> crate::node_ids::ObjectId {
                crate::node_ids::ObjectId::$id
            }
        }

        impl crate::encoding::BinaryEncodable for $name {
            fn byte_len(&self, ctx: &crate::Context<'_>) -> usize {
                0 $(+ crate::encoding::BinaryEncodable::byte_len(&self.$field, ctx))*
            }

            #[allow(unused_variables)]
            fn encode<S: std::io::Write + ?Sized>(
                &self,
                stream: &mut S,
                ctx: &crate::Context<'_>,
            ) -> crate::encoding::EncodingResult<()> {
                $(crate::encoding::BinaryEncodable::encode(&self.$field, stream, ctx)?;)*
                Ok(())
            }
        }

        impl crate::encoding::BinaryDecodable for $name {
            #[allow(unused_variables)]
            fn decode<S: std::io::Read + ?Sized>(
                stream: &mut S,
                ctx: &crate::Context<'_>,
            ) -> crate::encoding::EncodingResult<Self> {
                Ok(Self {
                    $($field: crate::encoding::BinaryDecodable::decode(stream, ctx)?,)*
                })
            }
        }
    };
}

/// Implements the encoding traits for an enumeration transmitted as Int32.
macro_rules! ua_enum {
    ($name:ident; $($variant:ident = $value:literal),* $(,)?) => {
        impl crate::encoding::SimpleBinaryEncodable for $name {
            fn byte_len(&self) -> usize {
                4
            }

            fn encode<S: std::io::Write + ?Sized>(
                &self,
                stream: &mut S,
            ) -> crate::encoding::EncodingResult<()> {
                crate::encoding::write_i32(stream, *self as i32)
            }
        }

        impl crate::encoding::SimpleBinaryDecodable for $name {
            fn decode<S: std::io::Read + ?Sized>(
                stream: &mut S,
                _: &crate::encoding::DecodingOptions,
            ) -> crate::encoding::EncodingResult<Self> {
                let value = crate::encoding::read_i32(stream)?;
                match value {
                    $($value => Ok(Self::$variant),)*
                    _ => Err(crate::encoding::Error::decoding(format!(
                        concat!("Invalid ", stringify!($name), " value {}"),
                        value
                    ))),
                }
            }
        }
    };
}

pub(crate) use binary_message;
pub(crate) use ua_enum;

mod attributes;
mod channel;
mod endpoint;
mod enums;
mod identity;
mod session;
mod subscriptions;

pub use attributes::*;
pub use channel::*;
pub use endpoint::*;
pub use enums::*;
pub use identity::*;
pub use session::*;
pub use subscriptions::*;

use crate::context::{decode_as, TypeRegistry};

/// Register every service type in the registry. Called once when the
/// process-wide registry is built.
pub fn register_types(registry: &mut TypeRegistry) {
    macro_rules! reg {
        ($($ty:ident: $data:expr, $binary:expr;)*) => {
            $(registry.add_binary_type($data, $binary, decode_as::<$ty>);)*
        };
    }

    reg! {
        UserTokenPolicy: 304, 306;
        ApplicationDescription: 308, 310;
        EndpointDescription: 312, 314;
        AnonymousIdentityToken: 319, 321;
        UserNameIdentityToken: 322, 324;
        X509IdentityToken: 325, 327;
        SignedSoftwareCertificate: 344, 346;
        ServiceFault: 395, 397;
        GetEndpointsRequest: 426, 428;
        GetEndpointsResponse: 429, 431;
        ChannelSecurityToken: 441, 443;
        OpenSecureChannelRequest: 444, 446;
        OpenSecureChannelResponse: 447, 449;
        CloseSecureChannelRequest: 450, 452;
        CloseSecureChannelResponse: 453, 455;
        SignatureData: 456, 458;
        CreateSessionRequest: 459, 461;
        CreateSessionResponse: 462, 464;
        ActivateSessionRequest: 465, 467;
        ActivateSessionResponse: 468, 470;
        CloseSessionRequest: 471, 473;
        CloseSessionResponse: 474, 476;
        ReadValueId: 626, 628;
        ReadRequest: 629, 631;
        ReadResponse: 632, 634;
        CreateSubscriptionRequest: 785, 787;
        CreateSubscriptionResponse: 788, 790;
        NotificationMessage: 803, 805;
        MonitoredItemNotification: 806, 808;
        DataChangeNotification: 809, 811;
        StatusChangeNotification: 818, 820;
        SubscriptionAcknowledgement: 821, 823;
        PublishRequest: 824, 826;
        PublishResponse: 827, 829;
        IssuedIdentityToken: 938, 940;
    }
}
