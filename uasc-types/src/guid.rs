// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `Guid`.

use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
};

use uuid::Uuid;

use crate::encoding::{
    process_decode_io_result, process_encode_io_result, DecodingOptions, EncodingResult,
    SimpleBinaryDecodable, SimpleBinaryEncodable,
};

/// A 16-byte globally unique identifier.
///
/// The wire layout is the Microsoft mixed-endian form: the first three
/// fields little-endian, the last eight bytes in order.
#[derive(Eq, PartialEq, Clone, Hash, Default)]
pub struct Guid {
    uuid: Uuid,
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl FromStr for Guid {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(|uuid| Guid { uuid }).map_err(|_| ())
    }
}

impl SimpleBinaryEncodable for Guid {
    fn byte_len(&self) -> usize {
        16
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        // to_bytes_le produces the mixed-endian GUID layout
        process_encode_io_result(stream.write_all(&self.uuid.to_bytes_le()))
    }
}

impl SimpleBinaryDecodable for Guid {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let mut bytes = [0u8; 16];
        process_decode_io_result(stream.read_exact(&mut bytes))?;
        Ok(Guid {
            uuid: Uuid::from_bytes_le(bytes),
        })
    }
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        Guid { uuid }
    }
}

impl Guid {
    /// Create a guid with all bytes zero.
    pub fn null() -> Guid {
        Guid { uuid: Uuid::nil() }
    }

    /// True if all bytes are zero.
    pub fn is_null(&self) -> bool {
        self.uuid.is_nil()
    }

    /// Create a new random guid.
    pub fn new() -> Guid {
        Guid {
            uuid: Uuid::new_v4(),
        }
    }

    /// The guid in big-endian field order.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.uuid.as_bytes()
    }

    /// Create a guid from big-endian field order bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Guid {
        Guid {
            uuid: Uuid::from_bytes(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn mixed_endian_layout() {
        // Example from OPC UA Part 6: 72962B91-FA75-4AE6-8D28-B404DC7DAF63
        let guid = Guid::from_str("72962B91-FA75-4AE6-8D28-B404DC7DAF63").unwrap();
        let expected = [
            0x91, 0x2b, 0x96, 0x72, 0x75, 0xfa, 0xe6, 0x4a, 0x8d, 0x28, 0xb4, 0x04, 0xdc, 0x7d,
            0xaf, 0x63,
        ];
        assert_eq!(guid.encode_to_vec(), expected);
    }

    #[test]
    fn round_trip() {
        let guid = Guid::new();
        let mut c = Cursor::new(guid.encode_to_vec());
        assert_eq!(Guid::decode(&mut c, &DecodingOptions::test()).unwrap(), guid);
    }
}
