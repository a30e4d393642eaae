// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `ByteString`.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::encoding::{
    process_decode_io_result, read_i32, write_i32, DecodingOptions, EncodingResult, Error,
    SimpleBinaryDecodable, SimpleBinaryEncodable,
};

/// A sequence of octets, or null.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default)]
pub struct ByteString {
    /// The raw bytes, `None` for the null byte string.
    pub value: Option<Vec<u8>>,
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        self.value.as_deref().unwrap_or(&[])
    }
}

impl SimpleBinaryEncodable for ByteString {
    fn byte_len(&self) -> usize {
        4 + match self.value {
            Some(ref value) => value.len(),
            None => 0,
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        match self.value {
            Some(ref value) => {
                write_i32(stream, value.len() as i32)?;
                stream.write_all(value).map_err(Error::encoding)
            }
            None => write_i32(stream, -1),
        }
    }
}

impl SimpleBinaryDecodable for ByteString {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let len = read_i32(stream)?;
        if len == -1 {
            Ok(ByteString::null())
        } else if len < -1 {
            Err(Error::decoding(format!(
                "ByteString length {} is invalid",
                len
            )))
        } else if len as usize > decoding_options.max_byte_string_length {
            Err(Error::decoding(format!(
                "ByteString length {} exceeds decoding limit {}",
                len, decoding_options.max_byte_string_length
            )))
        } else {
            let mut value = vec![0u8; len as usize];
            process_decode_io_result(stream.read_exact(&mut value))?;
            Ok(ByteString { value: Some(value) })
        }
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        ByteString {
            value: Some(value.to_vec()),
        }
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        ByteString { value: Some(value) }
    }
}

impl From<&Vec<u8>> for ByteString {
    fn from(value: &Vec<u8>) -> Self {
        ByteString {
            value: Some(value.clone()),
        }
    }
}

impl<const N: usize> From<[u8; N]> for ByteString {
    fn from(value: [u8; N]) -> Self {
        ByteString {
            value: Some(value.to_vec()),
        }
    }
}

impl ByteString {
    /// Returns the null byte string.
    pub fn null() -> ByteString {
        ByteString { value: None }
    }

    /// True if the byte string is null.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// True if the byte string is null or empty.
    pub fn is_empty(&self) -> bool {
        self.value.as_ref().map(|v| v.is_empty()).unwrap_or(true)
    }

    /// The length of the byte string, 0 for null.
    pub fn len(&self) -> usize {
        self.value.as_ref().map(|v| v.len()).unwrap_or(0)
    }

    /// Copy the content into a fresh vector, empty for null.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_ref().to_vec()
    }

    /// Create a byte string from a base64 encoded string.
    pub fn from_base64(data: &str) -> Option<ByteString> {
        STANDARD.decode(data).map(Self::from).ok()
    }

    /// Encode the content as base64, an empty string for null.
    pub fn as_base64(&self) -> String {
        STANDARD.encode(self.as_ref())
    }

    /// Concatenate the contents of two byte strings.
    pub fn concat(&self, other: &ByteString) -> ByteString {
        let mut value = Vec::with_capacity(self.len() + other.len());
        value.extend_from_slice(self.as_ref());
        value.extend_from_slice(other.as_ref());
        ByteString::from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn null_round_trip() {
        let null = ByteString::null();
        assert_eq!(null.encode_to_vec(), vec![0xff, 0xff, 0xff, 0xff]);
        let mut c = Cursor::new(null.encode_to_vec());
        assert!(ByteString::decode(&mut c, &DecodingOptions::test())
            .unwrap()
            .is_null());
    }

    #[test]
    fn value_round_trip() {
        let b = ByteString::from(&[0x01u8, 0x02, 0x03][..]);
        let buf = b.encode_to_vec();
        assert_eq!(buf, vec![0x03, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03]);
        let mut c = Cursor::new(buf);
        assert_eq!(ByteString::decode(&mut c, &DecodingOptions::test()).unwrap(), b);
    }

    #[test]
    fn base64() {
        let b = ByteString::from(&b"ua"[..]);
        assert_eq!(ByteString::from_base64(&b.as_base64()).unwrap(), b);
    }

    #[test]
    fn concat() {
        let l = ByteString::from(&[1u8, 2][..]);
        let r = ByteString::from(&[3u8][..]);
        assert_eq!(l.concat(&r).as_ref(), &[1, 2, 3]);
    }
}
