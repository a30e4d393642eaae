// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `ExpandedNodeId`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::{
    encoding::{BinaryDecodable, BinaryEncodable, EncodingResult},
    node_id::{Identifier, NodeId},
    read_u32, read_u8,
    string::UAString,
    write_u16, write_u32, write_u8, Context,
};

/// A NodeId that allows the namespace URI to be specified instead of an
/// index, plus an optional server index.
#[derive(PartialEq, Eq, Clone, Debug, Hash, Default)]
pub struct ExpandedNodeId {
    /// The inner node id.
    pub node_id: NodeId,
    /// Namespace URI. When set, the inner namespace index is transmitted as 0.
    pub namespace_uri: UAString,
    /// Index into the server table, 0 for the local server.
    pub server_index: u32,
}

impl fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // svr=<serverindex>;ns=<namespaceindex>;<type>=<value> per Part 6
        if self.server_index != 0 {
            write!(f, "svr={};", self.server_index)?;
        }
        if !self.namespace_uri.is_empty() {
            write!(f, "nsu={};{}", self.namespace_uri, self.node_id.identifier)
        } else {
            write!(f, "{}", self.node_id)
        }
    }
}

impl BinaryEncodable for ExpandedNodeId {
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        let mut size = self.node_id.byte_len(ctx);
        if !self.namespace_uri.is_empty() {
            size += self.namespace_uri.byte_len(ctx);
        }
        if self.server_index != 0 {
            size += 4;
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()> {
        let mut data_encoding = 0u8;
        if !self.namespace_uri.is_empty() {
            data_encoding |= 0x80;
        }
        if self.server_index != 0 {
            data_encoding |= 0x40;
        }

        // The tag byte of the inner node id carries the uri / server index
        // flags, and the namespace index goes out as 0 when a uri is present.
        match &self.node_id.identifier {
            Identifier::Numeric(value) => {
                if self.node_id.namespace == 0 && *value <= 255 {
                    write_u8(stream, data_encoding)?;
                    write_u8(stream, *value as u8)?;
                } else if self.node_id.namespace <= 255 && *value <= 65535 {
                    write_u8(stream, data_encoding | 0x1)?;
                    let namespace = if !self.namespace_uri.is_empty() {
                        0
                    } else {
                        self.node_id.namespace as u8
                    };
                    write_u8(stream, namespace)?;
                    write_u16(stream, *value as u16)?;
                } else {
                    write_u8(stream, data_encoding | 0x2)?;
                    self.encode_namespace(stream)?;
                    write_u32(stream, *value)?;
                }
            }
            Identifier::String(value) => {
                write_u8(stream, data_encoding | 0x3)?;
                self.encode_namespace(stream)?;
                value.encode(stream, ctx)?;
            }
            Identifier::Guid(value) => {
                write_u8(stream, data_encoding | 0x4)?;
                self.encode_namespace(stream)?;
                value.encode(stream, ctx)?;
            }
            Identifier::ByteString(value) => {
                write_u8(stream, data_encoding | 0x5)?;
                self.encode_namespace(stream)?;
                value.encode(stream, ctx)?;
            }
        }

        if !self.namespace_uri.is_empty() {
            self.namespace_uri.encode(stream, ctx)?;
        }
        if self.server_index != 0 {
            write_u32(stream, self.server_index)?;
        }
        Ok(())
    }
}

impl ExpandedNodeId {
    fn encode_namespace<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        let namespace = if !self.namespace_uri.is_empty() {
            0
        } else {
            self.node_id.namespace
        };
        write_u16(stream, namespace)
    }
}

impl BinaryDecodable for ExpandedNodeId {
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self> {
        let data_encoding = read_u8(stream)?;

        // Shove the tag byte minus the flag bits back in front of the
        // remaining bytes so the inner node id decodes normally.
        let mut chained = std::io::Cursor::new([data_encoding & 0x0f]).chain(&mut *stream);
        let node_id = NodeId::decode(&mut chained, ctx)?;

        let namespace_uri = if data_encoding & 0x80 != 0 {
            UAString::decode(stream, ctx)?
        } else {
            UAString::null()
        };
        let server_index = if data_encoding & 0x40 != 0 {
            read_u32(stream)?
        } else {
            0
        };
        Ok(ExpandedNodeId {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        ExpandedNodeId {
            node_id,
            namespace_uri: UAString::null(),
            server_index: 0,
        }
    }
}

impl ExpandedNodeId {
    /// Create an expanded node id for the local server from an inner id.
    pub fn new(node_id: impl Into<NodeId>) -> ExpandedNodeId {
        ExpandedNodeId {
            node_id: node_id.into(),
            namespace_uri: UAString::null(),
            server_index: 0,
        }
    }

    /// A null expanded node id.
    pub fn null() -> ExpandedNodeId {
        Self::new(NodeId::null())
    }

    /// True if the inner node id is null and no uri or server index is set.
    pub fn is_null(&self) -> bool {
        self.node_id.is_null() && self.namespace_uri.is_null() && self.server_index == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextOwned;

    fn round_trip(id: &ExpandedNodeId) -> Vec<u8> {
        let ctx_owned = ContextOwned::default();
        let ctx = ctx_owned.context();
        let buf = id.encode_to_vec(&ctx);
        assert_eq!(buf.len(), id.byte_len(&ctx));
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(&ExpandedNodeId::decode(&mut c, &ctx).unwrap(), id);
        buf
    }

    #[test]
    fn plain() {
        let buf = round_trip(&ExpandedNodeId::new(NodeId::new(0, 72u32)));
        assert_eq!(buf, vec![0x00, 0x48]);
    }

    #[test]
    fn with_uri() {
        let id = ExpandedNodeId {
            node_id: NodeId::new(0, 256u32),
            namespace_uri: "urn:my:namespace".into(),
            server_index: 0,
        };
        let buf = round_trip(&id);
        // Uri bit set, four byte inner form with namespace transmitted as 0
        assert_eq!(buf[0], 0x80 | 0x1);
        assert_eq!(buf[1], 0);
    }

    #[test]
    fn with_server_index() {
        let id = ExpandedNodeId {
            node_id: NodeId::new(0, 1u32),
            namespace_uri: UAString::null(),
            server_index: 4,
        };
        let buf = round_trip(&id);
        assert_eq!(buf[0], 0x40);
    }

    #[test]
    fn with_both() {
        round_trip(&ExpandedNodeId {
            node_id: NodeId::new(0, "borked"),
            namespace_uri: "urn:elsewhere".into(),
            server_index: 42,
        });
    }
}
