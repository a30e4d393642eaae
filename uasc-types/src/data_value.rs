// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `DataValue`.

use std::io::{Read, Write};

use bitflags::bitflags;

use crate::{
    date_time::DateTime,
    encoding::{
        read_u8, write_u8, BinaryDecodable, BinaryEncodable, EncodingResult,
    },
    status_code::StatusCode,
    variant::Variant,
    Context,
};

bitflags! {
    /// Mask of the fields present in an encoded data value.
    pub struct DataValueFlags: u8 {
        /// A value is present.
        const HAS_VALUE = 0x1;
        /// A status code is present.
        const HAS_STATUS = 0x2;
        /// A source timestamp is present.
        const HAS_SOURCE_TIMESTAMP = 0x4;
        /// A server timestamp is present.
        const HAS_SERVER_TIMESTAMP = 0x8;
        /// Source timestamp picoseconds are present.
        const HAS_SOURCE_PICOSECONDS = 0x10;
        /// Server timestamp picoseconds are present.
        const HAS_SERVER_PICOSECONDS = 0x20;
    }
}

/// A value with its status and the timestamps it was sourced and received at.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value. BadAttributeIdInvalid and similar mean there is none.
    pub value: Option<Variant>,
    /// The status associated with the value. None means Good.
    pub status: Option<StatusCode>,
    /// The time the value was read from the underlying source.
    pub source_timestamp: Option<DateTime>,
    /// 10 picosecond intervals refining the source timestamp.
    pub source_picoseconds: Option<u16>,
    /// The time the server received the value.
    pub server_timestamp: Option<DateTime>,
    /// 10 picosecond intervals refining the server timestamp.
    pub server_picoseconds: Option<u16>,
}

impl BinaryEncodable for DataValue {
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        let mut size = 1;
        let encoding_mask = self.encoding_mask();
        if encoding_mask.contains(DataValueFlags::HAS_VALUE) {
            size += self.value.as_ref().unwrap().byte_len(ctx);
        }
        if encoding_mask.contains(DataValueFlags::HAS_STATUS) {
            size += 4;
        }
        if encoding_mask.contains(DataValueFlags::HAS_SOURCE_TIMESTAMP) {
            size += 8;
            if encoding_mask.contains(DataValueFlags::HAS_SOURCE_PICOSECONDS) {
                size += 2;
            }
        }
        if encoding_mask.contains(DataValueFlags::HAS_SERVER_TIMESTAMP) {
            size += 8;
            if encoding_mask.contains(DataValueFlags::HAS_SERVER_PICOSECONDS) {
                size += 2;
            }
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()> {
        let encoding_mask = self.encoding_mask();
        write_u8(stream, encoding_mask.bits())?;
        if encoding_mask.contains(DataValueFlags::HAS_VALUE) {
            self.value.as_ref().unwrap().encode(stream, ctx)?;
        }
        if encoding_mask.contains(DataValueFlags::HAS_STATUS) {
            self.status.as_ref().unwrap().encode(stream, ctx)?;
        }
        if encoding_mask.contains(DataValueFlags::HAS_SOURCE_TIMESTAMP) {
            self.source_timestamp.as_ref().unwrap().encode(stream, ctx)?;
            if encoding_mask.contains(DataValueFlags::HAS_SOURCE_PICOSECONDS) {
                self.source_picoseconds.as_ref().unwrap().encode(stream, ctx)?;
            }
        }
        if encoding_mask.contains(DataValueFlags::HAS_SERVER_TIMESTAMP) {
            self.server_timestamp.as_ref().unwrap().encode(stream, ctx)?;
            if encoding_mask.contains(DataValueFlags::HAS_SERVER_PICOSECONDS) {
                self.server_picoseconds.as_ref().unwrap().encode(stream, ctx)?;
            }
        }
        Ok(())
    }
}

impl BinaryDecodable for DataValue {
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self> {
        let encoding_mask = DataValueFlags::from_bits_truncate(read_u8(stream)?);

        let value = if encoding_mask.contains(DataValueFlags::HAS_VALUE) {
            Some(Variant::decode(stream, ctx)?)
        } else {
            None
        };
        let status = if encoding_mask.contains(DataValueFlags::HAS_STATUS) {
            Some(StatusCode::decode(stream, ctx)?)
        } else {
            None
        };
        let (source_timestamp, source_picoseconds) =
            if encoding_mask.contains(DataValueFlags::HAS_SOURCE_TIMESTAMP) {
                let ts = DateTime::decode(stream, ctx)?;
                let ps = if encoding_mask.contains(DataValueFlags::HAS_SOURCE_PICOSECONDS) {
                    Some(u16::decode(stream, ctx)?)
                } else {
                    None
                };
                (Some(ts), ps)
            } else {
                (None, None)
            };
        let (server_timestamp, server_picoseconds) =
            if encoding_mask.contains(DataValueFlags::HAS_SERVER_TIMESTAMP) {
                let ts = DateTime::decode(stream, ctx)?;
                let ps = if encoding_mask.contains(DataValueFlags::HAS_SERVER_PICOSECONDS) {
                    Some(u16::decode(stream, ctx)?)
                } else {
                    None
                };
                (Some(ts), ps)
            } else {
                (None, None)
            };

        Ok(DataValue {
            value,
            status,
            source_timestamp,
            source_picoseconds,
            server_timestamp,
            server_picoseconds,
        })
    }
}

impl From<Variant> for DataValue {
    fn from(value: Variant) -> Self {
        DataValue {
            value: Some(value),
            ..Default::default()
        }
    }
}

impl DataValue {
    /// A data value with nothing set.
    pub fn null() -> DataValue {
        DataValue::default()
    }

    /// A data value holding `value` stamped with the current time for both
    /// source and server.
    pub fn new_now<V: Into<Variant>>(value: V) -> DataValue {
        let now = DateTime::now();
        DataValue {
            value: Some(value.into()),
            status: Some(StatusCode::Good),
            source_timestamp: Some(now),
            server_timestamp: Some(now),
            ..Default::default()
        }
    }

    /// The status of the value, `Good` when none was sent.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::Good)
    }

    /// Compute the encoding mask for the fields that are set. Picosecond
    /// fields are only included when the matching timestamp is.
    fn encoding_mask(&self) -> DataValueFlags {
        let mut encoding_mask = DataValueFlags::empty();
        if self.value.is_some() {
            encoding_mask |= DataValueFlags::HAS_VALUE;
        }
        if self.status.is_some() {
            encoding_mask |= DataValueFlags::HAS_STATUS;
        }
        if self.source_timestamp.is_some() {
            encoding_mask |= DataValueFlags::HAS_SOURCE_TIMESTAMP;
            if self.source_picoseconds.is_some() {
                encoding_mask |= DataValueFlags::HAS_SOURCE_PICOSECONDS;
            }
        }
        if self.server_timestamp.is_some() {
            encoding_mask |= DataValueFlags::HAS_SERVER_TIMESTAMP;
            if self.server_picoseconds.is_some() {
                encoding_mask |= DataValueFlags::HAS_SERVER_PICOSECONDS;
            }
        }
        encoding_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextOwned;

    fn round_trip(dv: &DataValue) {
        let ctx_owned = ContextOwned::default();
        let ctx = ctx_owned.context();
        let buf = dv.encode_to_vec(&ctx);
        assert_eq!(buf.len(), dv.byte_len(&ctx));
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(&DataValue::decode(&mut c, &ctx).unwrap(), dv);
    }

    #[test]
    fn empty() {
        round_trip(&DataValue::null());
    }

    #[test]
    fn all_fields() {
        round_trip(&DataValue {
            value: Some(Variant::Int32(525)),
            status: Some(StatusCode::Good),
            source_timestamp: Some(DateTime::now()),
            source_picoseconds: Some(100),
            server_timestamp: Some(DateTime::now()),
            server_picoseconds: Some(120),
        });
    }

    #[test]
    fn value_only() {
        round_trip(&DataValue::from(Variant::from("x")));
    }
}
