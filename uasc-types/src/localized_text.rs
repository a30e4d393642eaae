// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `LocalizedText`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::{
    encoding::{
        read_u8, write_u8, DecodingOptions, EncodingResult, SimpleBinaryDecodable,
        SimpleBinaryEncodable,
    },
    string::UAString,
};

/// Human readable text with an optional locale identifier. A bitmask leads
/// the encoding: bit 0 = locale present, bit 1 = text present.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Default)]
pub struct LocalizedText {
    /// The locale, e.g. "en".
    pub locale: UAString,
    /// The text in that locale.
    pub text: UAString,
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl SimpleBinaryEncodable for LocalizedText {
    fn byte_len(&self) -> usize {
        let mut size = 1;
        if !self.locale.is_null() {
            size += self.locale.byte_len();
        }
        if !self.text.is_null() {
            size += self.text.byte_len();
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        let mut encoding_mask = 0u8;
        if !self.locale.is_null() {
            encoding_mask |= 0x1;
        }
        if !self.text.is_null() {
            encoding_mask |= 0x2;
        }
        write_u8(stream, encoding_mask)?;
        if !self.locale.is_null() {
            self.locale.encode(stream)?;
        }
        if !self.text.is_null() {
            self.text.encode(stream)?;
        }
        Ok(())
    }
}

impl SimpleBinaryDecodable for LocalizedText {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let encoding_mask = read_u8(stream)?;
        let locale = if encoding_mask & 0x1 != 0 {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        let text = if encoding_mask & 0x2 != 0 {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        Ok(LocalizedText { locale, text })
    }
}

impl<'a> From<&'a str> for LocalizedText {
    fn from(value: &'a str) -> Self {
        LocalizedText {
            locale: UAString::null(),
            text: UAString::from(value),
        }
    }
}

impl LocalizedText {
    /// Create text with a locale.
    pub fn new(locale: &str, text: &str) -> LocalizedText {
        LocalizedText {
            locale: UAString::from(locale),
            text: UAString::from(text),
        }
    }

    /// The null localized text.
    pub fn null() -> LocalizedText {
        LocalizedText {
            locale: UAString::null(),
            text: UAString::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(lt: &LocalizedText) -> Vec<u8> {
        let buf = lt.encode_to_vec();
        assert_eq!(buf.len(), SimpleBinaryEncodable::byte_len(lt));
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(
            &LocalizedText::decode(&mut c, &DecodingOptions::test()).unwrap(),
            lt
        );
        buf
    }

    #[test]
    fn text_only() {
        let buf = round_trip(&LocalizedText::from("abc"));
        assert_eq!(buf[0], 0x2);
    }

    #[test]
    fn locale_and_text() {
        let buf = round_trip(&LocalizedText::new("en", "abc"));
        assert_eq!(buf[0], 0x3);
    }

    #[test]
    fn null() {
        let buf = round_trip(&LocalizedText::null());
        assert_eq!(buf, vec![0x0]);
    }
}
