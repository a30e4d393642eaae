// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `ExtensionObject`.

use std::{
    any::Any,
    fmt,
    io::{Cursor, Read, Write},
};

use crate::{
    byte_string::ByteString,
    encoding::{
        read_u8, write_i32, write_u8, BinaryDecodable, BinaryEncodable, EncodingResult, Error,
    },
    node_id::NodeId,
    string::XmlElement,
    Context, MessageInfo,
};

/// Trait for a structure that can be carried inside an extension object and
/// encoded back to binary without static knowledge of its type.
///
/// Automatically implemented for anything that implements [`BinaryEncodable`],
/// [`MessageInfo`], [`Send`], [`Sync`], [`Clone`], [`std::fmt::Debug`] and
/// [`PartialEq`].
pub trait DynEncodable: Any + Send + Sync + std::fmt::Debug {
    /// Encode the structure using OPC UA binary encoding.
    fn encode_binary(
        &self,
        stream: &mut dyn std::io::Write,
        ctx: &Context<'_>,
    ) -> EncodingResult<()>;

    /// The binary byte length of this structure.
    fn byte_len_dyn(&self, ctx: &Context<'_>) -> usize;

    /// The binary encoding id of this structure.
    fn binary_type_id(&self) -> NodeId;

    /// Cast to a dyn Any box, required for downcasting.
    fn as_dyn_any(self: Box<Self>) -> Box<dyn Any + Send + Sync + 'static>;

    /// Cast to a dyn Any trait object, required for downcasting by reference.
    fn as_dyn_any_ref(&self) -> &(dyn Any + Send + Sync);

    /// Clone into a box, required to implement Clone for ExtensionObject.
    fn clone_box(&self) -> Box<dyn DynEncodable>;

    /// Compare with another dynamic value. Invokes PartialEq if `other` has
    /// type `Self`.
    fn dyn_eq(&self, other: &dyn DynEncodable) -> bool;

    /// `std::any::type_name` of the concrete type, useful in logs.
    fn type_name(&self) -> &'static str;
}

impl<T> DynEncodable for T
where
    T: BinaryEncodable + MessageInfo + Any + std::fmt::Debug + Send + Sync + Clone + PartialEq,
{
    fn encode_binary(
        &self,
        stream: &mut dyn std::io::Write,
        ctx: &Context<'_>,
    ) -> EncodingResult<()> {
        BinaryEncodable::encode(self, stream, ctx)
    }

    fn byte_len_dyn(&self, ctx: &Context<'_>) -> usize {
        BinaryEncodable::byte_len(self, ctx)
    }

    fn binary_type_id(&self) -> NodeId {
        MessageInfo::type_id(self).into()
    }

    fn as_dyn_any(self: Box<Self>) -> Box<dyn Any + Send + Sync + 'static> {
        self
    }

    fn as_dyn_any_ref(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn clone_box(&self) -> Box<dyn DynEncodable> {
        Box::new(self.clone())
    }

    fn dyn_eq(&self, other: &dyn DynEncodable) -> bool {
        if let Some(o) = other.as_dyn_any_ref().downcast_ref::<Self>() {
            o == self
        } else {
            false
        }
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl PartialEq for dyn DynEncodable {
    fn eq(&self, other: &dyn DynEncodable) -> bool {
        self.dyn_eq(other)
    }
}

/// The body of an extension object.
#[derive(Debug)]
pub enum ExtensionObjectBody {
    /// No body.
    Null,
    /// A decoded structure the registry knew the type of.
    Decoded(Box<dyn DynEncodable>),
    /// A binary body preserved as raw bytes because the type id is not in
    /// the registry.
    Binary {
        /// The type id the bytes were tagged with.
        type_id: NodeId,
        /// The raw body bytes.
        data: ByteString,
    },
    /// An XML body, stored opaquely.
    Xml {
        /// The type id the element was tagged with.
        type_id: NodeId,
        /// The element text.
        data: XmlElement,
    },
}

impl Clone for ExtensionObjectBody {
    fn clone(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Decoded(body) => Self::Decoded(body.clone_box()),
            Self::Binary { type_id, data } => Self::Binary {
                type_id: type_id.clone(),
                data: data.clone(),
            },
            Self::Xml { type_id, data } => Self::Xml {
                type_id: type_id.clone(),
                data: data.clone(),
            },
        }
    }
}

impl PartialEq for ExtensionObjectBody {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Decoded(l), Self::Decoded(r)) => l.dyn_eq(r.as_ref()),
            (
                Self::Binary {
                    type_id: lt,
                    data: ld,
                },
                Self::Binary {
                    type_id: rt,
                    data: rd,
                },
            ) => lt == rt && ld == rd,
            (
                Self::Xml {
                    type_id: lt,
                    data: ld,
                },
                Self::Xml {
                    type_id: rt,
                    data: rd,
                },
            ) => lt == rt && ld == rd,
            _ => false,
        }
    }
}

/// A structure carried on the wire as a type id, a body discriminator byte
/// and a length prefixed body.
///
/// When the type id is known to the registry, decode produces a typed body.
/// Unknown binary bodies keep their raw bytes so they can be re-encoded
/// unchanged, and XML bodies are always kept opaque.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtensionObject {
    /// The body of the object.
    pub body: ExtensionObjectBody,
}

impl Default for ExtensionObjectBody {
    fn default() -> Self {
        Self::Null
    }
}

impl fmt::Display for ExtensionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            ExtensionObjectBody::Null => write!(f, "ExtensionObject(null)"),
            ExtensionObjectBody::Decoded(body) => {
                write!(f, "ExtensionObject({})", body.type_name())
            }
            ExtensionObjectBody::Binary { type_id, .. } => {
                write!(f, "ExtensionObject(opaque {})", type_id)
            }
            ExtensionObjectBody::Xml { type_id, .. } => {
                write!(f, "ExtensionObject(xml {})", type_id)
            }
        }
    }
}

const BODY_NONE: u8 = 0x0;
const BODY_BYTE_STRING: u8 = 0x1;
const BODY_XML_ELEMENT: u8 = 0x2;

impl BinaryEncodable for ExtensionObject {
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        let type_id = self.type_id();
        let id_len = type_id.byte_len(ctx);
        match &self.body {
            ExtensionObjectBody::Null => id_len + 1,
            ExtensionObjectBody::Decoded(body) => id_len + 1 + 4 + body.byte_len_dyn(ctx),
            ExtensionObjectBody::Binary { data, .. } => id_len + 1 + data.byte_len(ctx),
            ExtensionObjectBody::Xml { data, .. } => id_len + 1 + data.byte_len(ctx),
        }
    }

    fn encode<S: Write + ?Sized>(
        &self,
        mut stream: &mut S,
        ctx: &Context<'_>,
    ) -> EncodingResult<()> {
        let type_id = self.type_id();
        type_id.encode(stream, ctx)?;
        match &self.body {
            ExtensionObjectBody::Null => write_u8(stream, BODY_NONE),
            ExtensionObjectBody::Decoded(body) => {
                write_u8(stream, BODY_BYTE_STRING)?;
                write_i32(stream, body.byte_len_dyn(ctx) as i32)?;
                body.encode_binary(&mut stream as &mut dyn Write, ctx)
            }
            ExtensionObjectBody::Binary { data, .. } => {
                write_u8(stream, BODY_BYTE_STRING)?;
                data.encode(stream, ctx)
            }
            ExtensionObjectBody::Xml { data, .. } => {
                write_u8(stream, BODY_XML_ELEMENT)?;
                data.encode(stream, ctx)
            }
        }
    }
}

impl BinaryDecodable for ExtensionObject {
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self> {
        let type_id = NodeId::decode(stream, ctx)?;
        let encoding_type = read_u8(stream)?;
        match encoding_type {
            BODY_NONE => Ok(ExtensionObject {
                body: ExtensionObjectBody::Null,
            }),
            BODY_BYTE_STRING => {
                let data = ByteString::decode(stream, ctx)?;
                if !ctx.registry().contains(&type_id) {
                    // Unknown type, the raw bytes are preserved so the
                    // object survives a round trip untouched.
                    return Ok(ExtensionObject {
                        body: ExtensionObjectBody::Binary { type_id, data },
                    });
                }
                let _depth_lock = ctx.options().depth_lock()?;
                let mut cursor = Cursor::new(data.as_ref());
                let body = ctx
                    .registry()
                    .decode_binary(&type_id, &mut cursor, ctx)
                    .unwrap_or_else(|| {
                        Err(Error::decoding(format!(
                            "No registry entry for {}",
                            type_id
                        )))
                    })?;
                if cursor.position() as usize != data.len() {
                    return Err(Error::decoding(format!(
                        "Extension object body for {} decoded {} bytes of {}",
                        type_id,
                        cursor.position(),
                        data.len()
                    )));
                }
                Ok(ExtensionObject {
                    body: ExtensionObjectBody::Decoded(body),
                })
            }
            BODY_XML_ELEMENT => {
                let data = XmlElement::decode(stream, ctx)?;
                Ok(ExtensionObject {
                    body: ExtensionObjectBody::Xml { type_id, data },
                })
            }
            other => Err(Error::decoding(format!(
                "Invalid extension object encoding type {}",
                other
            ))),
        }
    }
}

impl ExtensionObject {
    /// An extension object with no body.
    pub fn null() -> ExtensionObject {
        ExtensionObject {
            body: ExtensionObjectBody::Null,
        }
    }

    /// Wrap a typed structure.
    pub fn from_message<T: DynEncodable>(value: T) -> ExtensionObject {
        ExtensionObject {
            body: ExtensionObjectBody::Decoded(Box::new(value)),
        }
    }

    /// True if there is no body.
    pub fn is_null(&self) -> bool {
        matches!(self.body, ExtensionObjectBody::Null)
    }

    /// The type id this object will carry on the wire. Null objects carry
    /// the null node id.
    pub fn type_id(&self) -> NodeId {
        match &self.body {
            ExtensionObjectBody::Null => NodeId::null(),
            ExtensionObjectBody::Decoded(body) => body.binary_type_id(),
            ExtensionObjectBody::Binary { type_id, .. } => type_id.clone(),
            ExtensionObjectBody::Xml { type_id, .. } => type_id.clone(),
        }
    }

    /// Borrow the decoded body as a concrete type, if that is what it is.
    pub fn inner_as<T: DynEncodable>(&self) -> Option<&T> {
        match &self.body {
            ExtensionObjectBody::Decoded(body) => body.as_dyn_any_ref().downcast_ref(),
            _ => None,
        }
    }

    /// Take the decoded body as a concrete type, if that is what it is.
    pub fn into_inner_as<T: DynEncodable>(self) -> Option<Box<T>> {
        match self.body {
            ExtensionObjectBody::Decoded(body) => body.as_dyn_any().downcast().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{service::AnonymousIdentityToken, ContextOwned};

    fn round_trip(eo: &ExtensionObject) -> Vec<u8> {
        let ctx_owned = ContextOwned::default();
        let ctx = ctx_owned.context();
        let buf = eo.encode_to_vec(&ctx);
        assert_eq!(buf.len(), eo.byte_len(&ctx));
        let mut c = Cursor::new(&buf);
        assert_eq!(&ExtensionObject::decode(&mut c, &ctx).unwrap(), eo);
        buf
    }

    #[test]
    fn null_object() {
        let buf = round_trip(&ExtensionObject::null());
        assert_eq!(buf, vec![0x00, 0x00, 0x00]);
    }

    #[test]
    fn typed_body_round_trips_to_typed() {
        let eo = ExtensionObject::from_message(AnonymousIdentityToken {
            policy_id: "anonymous".into(),
        });
        round_trip(&eo);
        let token = eo.inner_as::<AnonymousIdentityToken>().unwrap();
        assert_eq!(token.policy_id.as_ref(), "anonymous");
    }

    #[test]
    fn unknown_type_preserves_raw_bytes() {
        let eo = ExtensionObject {
            body: ExtensionObjectBody::Binary {
                type_id: NodeId::new(4, 777_777u32),
                data: ByteString::from(&[0xde, 0xad, 0xbe, 0xef][..]),
            },
        };
        round_trip(&eo);
    }

    #[test]
    fn xml_body_is_opaque() {
        let eo = ExtensionObject {
            body: ExtensionObjectBody::Xml {
                type_id: NodeId::new(0, 1234u32),
                data: "<a/>".into(),
            },
        };
        round_trip(&eo);
    }

    #[test]
    fn trailing_bytes_in_typed_body_fail() {
        let ctx_owned = ContextOwned::default();
        let ctx = ctx_owned.context();
        let eo = ExtensionObject::from_message(AnonymousIdentityToken {
            policy_id: "anonymous".into(),
        });
        let mut buf = eo.encode_to_vec(&ctx);
        // Grow the declared body length and append a stray byte
        let len = buf.len();
        buf.push(0xff);
        // body length field sits after the 4 byte node id and 1 byte encoding
        let body_len_offset = 5;
        let old_len = u32::from_le_bytes(
            buf[body_len_offset..body_len_offset + 4].try_into().unwrap(),
        );
        buf[body_len_offset..body_len_offset + 4]
            .copy_from_slice(&(old_len + 1).to_le_bytes());
        let _ = len;
        let mut c = Cursor::new(&buf);
        assert!(ExtensionObject::decode(&mut c, &ctx).is_err());
    }
}
