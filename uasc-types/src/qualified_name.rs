// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `QualifiedName`.

use std::io::{Read, Write};

use crate::{
    encoding::{
        read_u16, write_u16, DecodingOptions, EncodingResult, SimpleBinaryDecodable,
        SimpleBinaryEncodable,
    },
    string::UAString,
};

/// A name qualified by a namespace index.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Default)]
pub struct QualifiedName {
    /// The index of the namespace the name belongs to.
    pub namespace_index: u16,
    /// The unqualified name.
    pub name: UAString,
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace_index != 0 {
            write!(f, "{}:{}", self.namespace_index, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

impl SimpleBinaryEncodable for QualifiedName {
    fn byte_len(&self) -> usize {
        2 + self.name.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u16(stream, self.namespace_index)?;
        self.name.encode(stream)
    }
}

impl SimpleBinaryDecodable for QualifiedName {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let namespace_index = read_u16(stream)?;
        let name = UAString::decode(stream, decoding_options)?;
        Ok(QualifiedName {
            namespace_index,
            name,
        })
    }
}

impl<'a> From<&'a str> for QualifiedName {
    fn from(value: &'a str) -> Self {
        QualifiedName {
            namespace_index: 0,
            name: value.into(),
        }
    }
}

impl QualifiedName {
    /// Create a qualified name from an index and name.
    pub fn new(namespace_index: u16, name: impl Into<UAString>) -> QualifiedName {
        QualifiedName {
            namespace_index,
            name: name.into(),
        }
    }

    /// The null qualified name, index 0 and a null name.
    pub fn null() -> QualifiedName {
        QualifiedName {
            namespace_index: 0,
            name: UAString::null(),
        }
    }

    /// True if this is the null qualified name.
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && self.name.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let qn = QualifiedName::new(2, "Pump");
        let buf = qn.encode_to_vec();
        assert_eq!(buf.len(), SimpleBinaryEncodable::byte_len(&qn));
        let mut c = std::io::Cursor::new(buf);
        assert_eq!(
            QualifiedName::decode(&mut c, &DecodingOptions::test()).unwrap(),
            qn
        );
    }
}
