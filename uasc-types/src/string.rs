// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `UAString`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::encoding::{
    process_decode_io_result, read_i32, write_i32, DecodingOptions, EncodingResult, Error,
    SimpleBinaryDecodable, SimpleBinaryEncodable,
};

/// An OPC UA string is a sequence of UTF-8 characters, or null. The null
/// string and the empty string are distinct values on the wire.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default)]
pub struct UAString {
    /// The inner string value, `None` for the null string.
    pub value: Option<String>,
}

/// An XML element is stored as a string. The stack never interprets the
/// content, XML bodies are opaque.
pub type XmlElement = UAString;

impl fmt::Display for UAString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.value {
            Some(ref value) => write!(f, "{}", value),
            None => write!(f, "[null]"),
        }
    }
}

impl SimpleBinaryEncodable for UAString {
    fn byte_len(&self) -> usize {
        // Length plus the string itself
        4 + match self.value {
            Some(ref value) => value.len(),
            None => 0,
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        match self.value {
            Some(ref value) => {
                write_i32(stream, value.len() as i32)?;
                if !value.is_empty() {
                    stream.write_all(value.as_bytes()).map_err(Error::encoding)?;
                }
                Ok(())
            }
            None => write_i32(stream, -1),
        }
    }
}

impl SimpleBinaryDecodable for UAString {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let len = read_i32(stream)?;
        if len == -1 {
            Ok(UAString::null())
        } else if len < -1 {
            Err(Error::decoding(format!(
                "String length {} is invalid",
                len
            )))
        } else if len as usize > decoding_options.max_string_length {
            Err(Error::decoding(format!(
                "String length {} exceeds decoding limit {}",
                len, decoding_options.max_string_length
            )))
        } else {
            let mut buf = vec![0u8; len as usize];
            process_decode_io_result(stream.read_exact(&mut buf))?;
            // The receiver is lenient about malformed UTF-8, invalid
            // sequences become replacement characters.
            Ok(UAString {
                value: Some(String::from_utf8_lossy(&buf).into_owned()),
            })
        }
    }
}

impl From<&str> for UAString {
    fn from(value: &str) -> Self {
        UAString {
            value: Some(value.to_string()),
        }
    }
}

impl From<&String> for UAString {
    fn from(value: &String) -> Self {
        UAString {
            value: Some(value.clone()),
        }
    }
}

impl From<String> for UAString {
    fn from(value: String) -> Self {
        UAString { value: Some(value) }
    }
}

impl AsRef<str> for UAString {
    fn as_ref(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

impl UAString {
    /// The length of the string in bytes or -1 for null.
    pub fn len(&self) -> isize {
        match self.value {
            Some(ref value) => value.len() as isize,
            None => -1,
        }
    }

    /// Returns true if the string is null, which is distinct from being empty.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Returns true if the string is null or empty.
    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }

    /// Returns the null string.
    pub fn null() -> UAString {
        UAString { value: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(s: &UAString) -> UAString {
        let buf = s.encode_to_vec();
        assert_eq!(buf.len(), SimpleBinaryEncodable::byte_len(s));
        let mut c = Cursor::new(buf);
        UAString::decode(&mut c, &DecodingOptions::test()).unwrap()
    }

    #[test]
    fn null_and_empty_are_distinct() {
        let null = UAString::null();
        assert_eq!(null.encode_to_vec(), vec![0xff, 0xff, 0xff, 0xff]);
        assert!(round_trip(&null).is_null());

        let empty = UAString::from("");
        assert_eq!(empty.encode_to_vec(), vec![0x00, 0x00, 0x00, 0x00]);
        let decoded = round_trip(&empty);
        assert!(!decoded.is_null());
        assert!(decoded.is_empty());
    }

    #[test]
    fn string_round_trip() {
        let s = UAString::from("Hello, world");
        assert_eq!(round_trip(&s), s);
    }

    #[test]
    fn malformed_utf8_is_replaced() {
        // Length 2 followed by an invalid UTF-8 sequence
        let buf = vec![0x02, 0x00, 0x00, 0x00, 0xff, 0xfe];
        let mut c = Cursor::new(buf);
        let s = UAString::decode(&mut c, &DecodingOptions::test()).unwrap();
        assert_eq!(s.as_ref(), "\u{fffd}\u{fffd}");
    }

    #[test]
    fn length_limit() {
        let buf = vec![0xff, 0x00, 0x00, 0x00];
        let mut c = Cursor::new(buf);
        let mut opts = DecodingOptions::test();
        opts.max_string_length = 16;
        assert!(UAString::decode(&mut c, &opts).is_err());
    }
}
