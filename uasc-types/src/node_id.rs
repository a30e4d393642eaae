// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `NodeId`.

use std::{
    self,
    convert::TryFrom,
    fmt,
    io::{Read, Write},
    str::FromStr,
    sync::LazyLock,
};

use crate::{
    byte_string::ByteString,
    encoding::{BinaryDecodable, BinaryEncodable, EncodingResult, Error},
    guid::Guid,
    node_ids::{ObjectId, VariableId},
    read_u16, read_u32, read_u8,
    status_code::StatusCode,
    string::UAString,
    write_u16, write_u32, write_u8, Context,
};

/// The kind of identifier: numeric, string, guid or opaque bytes.
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub enum Identifier {
    /// Numeric identifier, i=123
    Numeric(u32),
    /// String identifier, s=...
    String(UAString),
    /// GUID identifier, g=...
    Guid(Guid),
    /// Opaque identifier, b=...
    ByteString(ByteString),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Identifier::Numeric(v) => write!(f, "i={}", *v),
            Identifier::String(v) => write!(f, "s={}", v),
            Identifier::Guid(v) => write!(f, "g={:?}", v),
            Identifier::ByteString(v) => write!(f, "b={}", v.as_base64()),
        }
    }
}

impl FromStr for Identifier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < 2 {
            return Err(());
        }
        let k = &s[..2];
        let v = &s[2..];
        match k {
            "i=" => v.parse::<u32>().map(|v| v.into()).map_err(|_| ()),
            "s=" => Ok(UAString::from(v).into()),
            "g=" => Guid::from_str(v).map(|v| v.into()).map_err(|_| ()),
            "b=" => ByteString::from_base64(v).map(|v| v.into()).ok_or(()),
            _ => Err(()),
        }
    }
}

impl From<u32> for Identifier {
    fn from(v: u32) -> Self {
        Identifier::Numeric(v)
    }
}

impl<'a> From<&'a str> for Identifier {
    fn from(v: &'a str) -> Self {
        Identifier::String(UAString::from(v))
    }
}

impl From<String> for Identifier {
    fn from(v: String) -> Self {
        Identifier::String(UAString::from(v))
    }
}

impl From<UAString> for Identifier {
    fn from(v: UAString) -> Self {
        Identifier::String(v)
    }
}

impl From<Guid> for Identifier {
    fn from(v: Guid) -> Self {
        Identifier::Guid(v)
    }
}

impl From<ByteString> for Identifier {
    fn from(v: ByteString) -> Self {
        Identifier::ByteString(v)
    }
}

/// Error returned from working with node ids.
#[derive(Debug, thiserror::Error)]
#[error("NodeIdError")]
pub struct NodeIdError;

/// An identifier for a node in the address space of an OPC UA server.
#[derive(PartialEq, Eq, Clone, Debug, Hash, Default)]
pub struct NodeId {
    /// The index of the namespace the identifier lives in.
    pub namespace: u16,
    /// The identifier itself.
    pub identifier: Identifier,
}

impl Default for Identifier {
    fn default() -> Self {
        Identifier::Numeric(0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};{}", self.namespace, self.identifier)
        } else {
            write!(f, "{}", self.identifier)
        }
    }
}

impl BinaryEncodable for NodeId {
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        match &self.identifier {
            Identifier::Numeric(value) => {
                // The compact encodings for small numeric ids
                if self.namespace == 0 && *value <= 255 {
                    2
                } else if self.namespace <= 255 && *value <= 65535 {
                    4
                } else {
                    7
                }
            }
            Identifier::String(value) => 3 + value.byte_len(ctx),
            Identifier::Guid(value) => 3 + value.byte_len(ctx),
            Identifier::ByteString(value) => 3 + value.byte_len(ctx),
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()> {
        match &self.identifier {
            Identifier::Numeric(value) => {
                if self.namespace == 0 && *value <= 255 {
                    // Two byte encoding
                    write_u8(stream, 0x0)?;
                    write_u8(stream, *value as u8)
                } else if self.namespace <= 255 && *value <= 65535 {
                    // Four byte encoding
                    write_u8(stream, 0x1)?;
                    write_u8(stream, self.namespace as u8)?;
                    write_u16(stream, *value as u16)
                } else {
                    // Full numeric encoding
                    write_u8(stream, 0x2)?;
                    write_u16(stream, self.namespace)?;
                    write_u32(stream, *value)
                }
            }
            Identifier::String(value) => {
                write_u8(stream, 0x3)?;
                write_u16(stream, self.namespace)?;
                value.encode(stream, ctx)
            }
            Identifier::Guid(value) => {
                write_u8(stream, 0x4)?;
                write_u16(stream, self.namespace)?;
                value.encode(stream, ctx)
            }
            Identifier::ByteString(value) => {
                write_u8(stream, 0x5)?;
                write_u16(stream, self.namespace)?;
                value.encode(stream, ctx)
            }
        }
    }
}

impl BinaryDecodable for NodeId {
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self> {
        let identifier = read_u8(stream)?;
        let node_id = match identifier {
            0x0 => {
                let value = read_u8(stream)?;
                NodeId::new(0, u32::from(value))
            }
            0x1 => {
                let namespace = read_u8(stream)?;
                let value = read_u16(stream)?;
                NodeId::new(u16::from(namespace), u32::from(value))
            }
            0x2 => {
                let namespace = read_u16(stream)?;
                let value = read_u32(stream)?;
                NodeId::new(namespace, value)
            }
            0x3 => {
                let namespace = read_u16(stream)?;
                let value = UAString::decode(stream, ctx)?;
                NodeId::new(namespace, value)
            }
            0x4 => {
                let namespace = read_u16(stream)?;
                let value = Guid::decode(stream, ctx)?;
                NodeId::new(namespace, value)
            }
            0x5 => {
                let namespace = read_u16(stream)?;
                let value = ByteString::decode(stream, ctx)?;
                NodeId::new(namespace, value)
            }
            _ => {
                return Err(Error::decoding(format!(
                    "Unrecognized node id type {}",
                    identifier
                )));
            }
        };
        Ok(node_id)
    }
}

impl FromStr for NodeId {
    type Err = StatusCode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use regex::Regex;

        // Format specified in Part 6 5.3.1.10:
        //
        // ns=<namespaceindex>;<type>=<value>
        //
        // The ns=0; prefix is omitted for namespace 0.
        static RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^(ns=(?P<ns>[0-9]+);)?(?P<t>[isgb]=.+)$").unwrap());

        let captures = RE.captures(s).ok_or(StatusCode::BadNodeIdInvalid)?;

        let namespace = if let Some(ns) = captures.name("ns") {
            ns.as_str()
                .parse::<u16>()
                .map_err(|_| StatusCode::BadNodeIdInvalid)?
        } else {
            0
        };

        let t = captures.name("t").unwrap();
        Identifier::from_str(t.as_str())
            .map(|t| NodeId::new(namespace, t))
            .map_err(|_| StatusCode::BadNodeIdInvalid)
    }
}

impl From<&NodeId> for NodeId {
    fn from(v: &NodeId) -> Self {
        v.clone()
    }
}

impl From<ObjectId> for NodeId {
    fn from(v: ObjectId) -> Self {
        NodeId::new(0, v as u32)
    }
}

impl From<VariableId> for NodeId {
    fn from(v: VariableId) -> Self {
        NodeId::new(0, v as u32)
    }
}

impl From<(u16, u32)> for NodeId {
    fn from(v: (u16, u32)) -> Self {
        Self::new(v.0, v.1)
    }
}

impl<'a> From<(u16, &'a str)> for NodeId {
    fn from(v: (u16, &'a str)) -> Self {
        Self::new(v.0, UAString::from(v.1))
    }
}

impl PartialEq<(u16, u32)> for NodeId {
    fn eq(&self, other: &(u16, u32)) -> bool {
        self.namespace == other.0
            && matches!(&self.identifier, Identifier::Numeric(v) if v == &other.1)
    }
}

impl PartialEq<ObjectId> for NodeId {
    fn eq(&self, other: &ObjectId) -> bool {
        *self == (0u16, *other as u32)
    }
}

impl NodeId {
    /// Construct a new NodeId from anything that can become an `Identifier`:
    /// u32, Guid, ByteString or string.
    pub fn new<T>(namespace: u16, value: T) -> NodeId
    where
        T: 'static + Into<Identifier>,
    {
        NodeId {
            namespace,
            identifier: value.into(),
        }
    }

    /// A null node id: namespace 0, numeric id 0.
    pub fn null() -> NodeId {
        NodeId::new(0, 0u32)
    }

    /// True if this is the null node id.
    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.identifier == Identifier::Numeric(0)
    }

    /// Extract the ObjectId, providing the node id holds one.
    pub fn as_object_id(&self) -> std::result::Result<ObjectId, NodeIdError> {
        match self.identifier {
            Identifier::Numeric(id) if self.namespace == 0 => {
                ObjectId::try_from(id).map_err(|_| NodeIdError)
            }
            _ => Err(NodeIdError),
        }
    }

    /// The numeric value of the id, if it is numeric.
    pub fn as_u32(&self) -> Option<u32> {
        match &self.identifier {
            Identifier::Numeric(i) => Some(*i),
            _ => None,
        }
    }

    /// True if the id is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self.identifier, Identifier::Numeric(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextOwned;

    fn round_trip(id: &NodeId) -> Vec<u8> {
        let ctx_owned = ContextOwned::default();
        let ctx = ctx_owned.context();
        let buf = id.encode_to_vec(&ctx);
        assert_eq!(buf.len(), id.byte_len(&ctx));
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(&NodeId::decode(&mut c, &ctx).unwrap(), id);
        buf
    }

    #[test]
    fn two_byte_form() {
        let buf = round_trip(&NodeId::new(0, 0x48u32));
        assert_eq!(buf, vec![0x00, 0x48]);
    }

    #[test]
    fn four_byte_form() {
        // ns=0, id=1234 from Part 6
        let buf = round_trip(&NodeId::new(0, 1234u32));
        assert_eq!(buf, vec![0x01, 0x00, 0xd2, 0x04]);
    }

    #[test]
    fn six_byte_form() {
        let buf = round_trip(&NodeId::new(300, 0x1000_0000u32));
        assert_eq!(buf.len(), 7);
        assert_eq!(buf[0], 0x02);
    }

    #[test]
    fn string_form() {
        round_trip(&NodeId::new(2, "Hot水"));
    }

    #[test]
    fn guid_and_bytestring_forms() {
        round_trip(&NodeId::new(1, Guid::new()));
        round_trip(&NodeId::new(1, ByteString::from(&[1u8, 2, 3][..])));
    }

    #[test]
    fn unknown_tag_fails() {
        let ctx_owned = ContextOwned::default();
        let mut c = std::io::Cursor::new(vec![0x6u8, 0, 0]);
        assert!(NodeId::decode(&mut c, &ctx_owned.context()).is_err());
    }

    #[test]
    fn from_str_forms() {
        assert_eq!(
            NodeId::from_str("i=13").unwrap(),
            NodeId::new(0, 13u32)
        );
        assert_eq!(
            NodeId::from_str("ns=2;s=Demo").unwrap(),
            NodeId::new(2, "Demo")
        );
        assert!(NodeId::from_str("nonsense").is_err());
    }
}
