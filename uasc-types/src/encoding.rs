// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Encoding traits and helpers for reading and writing scalar values and
//! other primitives in the OPC UA binary encoding.

use std::{
    error::Error as StdError,
    fmt::{Debug, Display},
    io::{Cursor, Read, Result, Write},
    sync::atomic::{AtomicU64, Ordering},
};

use byteorder::{ByteOrder, LittleEndian};
use log::error;

use crate::{constants, status_code::StatusCode, Context};

/// Result of an encoding or decoding operation.
pub type EncodingResult<T> = std::result::Result<T, Error>;

/// General codec error: a status code plus a dynamic error source, and
/// optionally the request id and handle of the request being processed when
/// the error occurred.
#[derive(Debug)]
pub struct Error {
    status: StatusCode,
    request_id: Option<u32>,
    request_handle: Option<u32>,
    context: Box<dyn StdError + Send + Sync>,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.context)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.context)
    }
}

impl Error {
    /// Create a new error with the given `status` code and `context`.
    pub fn new(status: StatusCode, context: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            status,
            request_id: None,
            request_handle: None,
            context: context.into(),
        }
    }

    /// Create a new `BadDecodingError`.
    pub fn decoding(context: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::new(StatusCode::BadDecodingError, context)
    }

    /// Create a new `BadEncodingError`.
    pub fn encoding(context: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::new(StatusCode::BadEncodingError, context)
    }

    /// Attach request id and request handle to this error.
    pub fn with_context(mut self, request_id: Option<u32>, request_handle: Option<u32>) -> Self {
        self.request_id = request_id;
        self.request_handle = request_handle;
        self
    }

    /// Attach a request id to this error.
    pub fn with_request_id(mut self, id: u32) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Attach a request handle to this error.
    pub fn with_request_handle(mut self, handle: u32) -> Self {
        self.request_handle = Some(handle);
        self
    }

    /// The status code of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Request id and handle, if both are known.
    pub fn full_context(&self) -> Option<(u32, u32)> {
        match (self.request_id, self.request_handle) {
            (Some(id), Some(handle)) => Some((id, handle)),
            _ => None,
        }
    }
}

impl From<Error> for StatusCode {
    fn from(value: Error) -> Self {
        error!("{}", value);
        value.status()
    }
}

impl From<StatusCode> for Error {
    fn from(value: StatusCode) -> Self {
        Error::new(value, value.to_string())
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        value.status().into()
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::decoding(value)
    }
}

/// Holds a reference on the depth gauge. The drop impl ensures the depth is
/// decremented even during a panic unwind.
#[derive(Debug)]
pub struct DepthLock<'a> {
    depth_gauge: &'a DepthGauge,
}

impl Drop for DepthLock<'_> {
    fn drop(&mut self) {
        self.depth_gauge
            .current_depth
            .fetch_sub(1, Ordering::Release);
    }
}

impl<'a> DepthLock<'a> {
    /// Try to increment the depth, failing if the maximum is exceeded.
    /// The returned lock decrements the depth when dropped.
    pub fn obtain(depth_gauge: &'a DepthGauge) -> core::result::Result<DepthLock<'a>, Error> {
        let current = depth_gauge.current_depth.fetch_add(1, Ordering::Acquire);
        let lock = Self { depth_gauge };

        if current >= depth_gauge.max_depth {
            Err(Error::decoding(
                "Decoding aborted, maximum recursion depth reached",
            ))
        } else {
            Ok(lock)
        }
    }
}

/// Recursion guard for potentially recursive structures like Variant and
/// ExtensionObject. Limits how deep the decoder will go before giving up.
#[derive(Debug)]
pub struct DepthGauge {
    max_depth: u64,
    current_depth: AtomicU64,
}

impl Clone for DepthGauge {
    fn clone(&self) -> Self {
        Self {
            max_depth: self.max_depth,
            current_depth: AtomicU64::new(0),
        }
    }
}

impl Default for DepthGauge {
    fn default() -> Self {
        Self::new(constants::MAX_DECODING_DEPTH)
    }
}

impl DepthGauge {
    /// Create a gauge with the given max depth.
    pub fn new(max_depth: u64) -> Self {
        Self {
            max_depth,
            current_depth: AtomicU64::new(0),
        }
    }

    /// Get the max depth of the gauge.
    pub fn max_depth(&self) -> u64 {
        self.max_depth
    }
}

/// Decoding limits and options, propagated from the negotiated channel
/// parameters down to every decode call.
#[derive(Clone, Debug)]
pub struct DecodingOptions {
    /// Time offset between client and server, applied to decoded timestamps
    /// when the client is configured to ignore clock skew.
    pub client_offset: chrono::Duration,
    /// Maximum size of a message in bytes. 0 means no limit.
    pub max_message_size: usize,
    /// Maximum number of chunks in a message. 0 means no limit.
    pub max_chunk_count: usize,
    /// Maximum length in bytes of a string.
    pub max_string_length: usize,
    /// Maximum length in bytes of a byte string.
    pub max_byte_string_length: usize,
    /// Maximum number of array elements.
    pub max_array_length: usize,
    /// Recursion guard for nested structures.
    pub decoding_depth_gauge: DepthGauge,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        DecodingOptions {
            client_offset: chrono::Duration::zero(),
            max_message_size: constants::MAX_MESSAGE_SIZE,
            max_chunk_count: constants::MAX_CHUNK_COUNT,
            max_string_length: constants::MAX_STRING_LENGTH,
            max_byte_string_length: constants::MAX_BYTE_STRING_LENGTH,
            max_array_length: constants::MAX_ARRAY_LENGTH,
            decoding_depth_gauge: DepthGauge::default(),
        }
    }
}

impl DecodingOptions {
    /// Restricted options for decoding payloads that are not expected to
    /// contain large values.
    pub fn minimal() -> Self {
        DecodingOptions {
            max_string_length: 8192,
            max_byte_string_length: 8192,
            max_array_length: 8192,
            decoding_depth_gauge: DepthGauge::new(1),
            ..Default::default()
        }
    }

    /// For test only, makes calls to `DecodingOptions::default()` easier to audit.
    pub fn test() -> Self {
        Self::default()
    }

    /// Get a lease on the recursion depth. Fails if max depth is exceeded.
    pub fn depth_lock(&self) -> core::result::Result<DepthLock<'_>, Error> {
        DepthLock::obtain(&self.decoding_depth_gauge)
    }
}

/// OPC UA binary encoding interface. Anything that encodes to binary
/// implements this.
///
/// Implementations must guarantee that `byte_len` returns exactly the number
/// of bytes `encode` will write, or that `encode` fails.
pub trait BinaryEncodable {
    /// The exact byte length of this value as `encode` would write it.
    #[allow(unused)]
    fn byte_len(&self, ctx: &Context<'_>) -> usize;

    /// Encode the value to the write stream.
    fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()>;

    /// Convenience method for encoding a value straight into a vector of
    /// bytes. Prefer reusing buffers over this outside of tests.
    fn encode_to_vec(&self, ctx: &Context<'_>) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::with_capacity(self.byte_len(ctx)));
        let _ = self.encode(&mut buffer, ctx);
        buffer.into_inner()
    }
}

/// Trait for decoding a type from OPC UA binary.
pub trait BinaryDecodable: Sized {
    /// Decode an instance from the read stream. Implementations should
    /// return `BadDecodingError` as soon as any limit in the decoding
    /// options is exceeded.
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self>;
}

/// Encoding for types that cannot contain dynamically typed values. Used by
/// the core modules to encode raw protocol messages without a context.
pub trait SimpleBinaryEncodable {
    /// The exact byte length of this value as `encode` would write it.
    #[allow(unused)]
    fn byte_len(&self) -> usize;

    /// Encode the value to the write stream.
    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()>;

    /// Convenience method for encoding straight into a vector of bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::with_capacity(self.byte_len()));
        let _ = self.encode(&mut buffer);
        buffer.into_inner()
    }
}

impl<T> BinaryEncodable for T
where
    T: SimpleBinaryEncodable,
{
    fn byte_len(&self, _ctx: &Context<'_>) -> usize {
        SimpleBinaryEncodable::byte_len(self)
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S, _ctx: &Context<'_>) -> EncodingResult<()> {
        SimpleBinaryEncodable::encode(self, stream)
    }
}

/// Decoding for types that cannot contain dynamically typed values.
pub trait SimpleBinaryDecodable: Sized {
    /// Decode an instance from the read stream.
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self>;
}

impl<T> BinaryDecodable for T
where
    T: SimpleBinaryDecodable,
{
    fn decode<S: Read + ?Sized>(stream: &mut S, ctx: &Context<'_>) -> EncodingResult<Self> {
        SimpleBinaryDecodable::decode(stream, ctx.options())
    }
}

/// Converts an IO write error into an EncodingResult.
pub fn process_encode_io_result(result: Result<()>) -> EncodingResult<()> {
    result.map_err(Error::encoding)
}

/// Converts an IO read error into an EncodingResult.
pub fn process_decode_io_result<T>(result: Result<T>) -> EncodingResult<T>
where
    T: Debug,
{
    result.map_err(Error::decoding)
}

impl<T> BinaryEncodable for Option<Vec<T>>
where
    T: BinaryEncodable,
{
    fn byte_len(&self, ctx: &Context<'_>) -> usize {
        let mut size = 4;
        if let Some(ref values) = self {
            size += values.iter().map(|v| v.byte_len(ctx)).sum::<usize>();
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S, ctx: &Context<'_>) -> EncodingResult<()> {
        if let Some(ref values) = self {
            write_i32(stream, values.len() as i32)?;
            for value in values.iter() {
                value.encode(stream, ctx)?;
            }
        } else {
            write_i32(stream, -1)?;
        }
        Ok(())
    }
}

impl<T> BinaryDecodable for Option<Vec<T>>
where
    T: BinaryDecodable,
{
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        ctx: &Context<'_>,
    ) -> EncodingResult<Option<Vec<T>>> {
        let len = read_i32(stream)?;
        if len == -1 {
            Ok(None)
        } else if len < -1 {
            Err(Error::decoding("Array length is negative and invalid"))
        } else if len as usize > ctx.options().max_array_length {
            Err(Error::decoding(format!(
                "Array length {} exceeds decoding limit {}",
                len,
                ctx.options().max_array_length
            )))
        } else {
            let mut values: Vec<T> = Vec::with_capacity(len as usize);
            for _ in 0..len {
                values.push(T::decode(stream, ctx)?);
            }
            Ok(Some(values))
        }
    }
}

/// Length in bytes of an array of encoded values.
pub fn byte_len_array<T: BinaryEncodable>(values: &Option<Vec<T>>, ctx: &Context<'_>) -> usize {
    let mut size = 4;
    if let Some(ref values) = values {
        size += values.iter().map(|v| v.byte_len(ctx)).sum::<usize>();
    }
    size
}

macro_rules! simple_enc_number {
    ($t:ty, $len:expr, $write:ident, $read:ident) => {
        impl SimpleBinaryEncodable for $t {
            fn byte_len(&self) -> usize {
                $len
            }

            fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
                $write(stream, *self)
            }
        }

        impl SimpleBinaryDecodable for $t {
            fn decode<S: Read + ?Sized>(
                stream: &mut S,
                _: &DecodingOptions,
            ) -> EncodingResult<Self> {
                $read(stream)
            }
        }
    };
}

impl SimpleBinaryEncodable for bool {
    fn byte_len(&self) -> usize {
        1
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u8(stream, if *self { 1 } else { 0 })
    }
}

impl SimpleBinaryDecodable for bool {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(read_u8(stream)? == 1)
    }
}

impl SimpleBinaryEncodable for i8 {
    fn byte_len(&self) -> usize {
        1
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        process_encode_io_result(stream.write_all(&[*self as u8]))
    }
}

impl SimpleBinaryDecodable for i8 {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(read_u8(stream)? as i8)
    }
}

impl SimpleBinaryEncodable for u8 {
    fn byte_len(&self) -> usize {
        1
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u8(stream, *self)
    }
}

impl SimpleBinaryDecodable for u8 {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        read_u8(stream)
    }
}

simple_enc_number!(i16, 2, write_i16, read_i16);
simple_enc_number!(u16, 2, write_u16, read_u16);
simple_enc_number!(i32, 4, write_i32, read_i32);
simple_enc_number!(u32, 4, write_u32, read_u32);
simple_enc_number!(i64, 8, write_i64, read_i64);
simple_enc_number!(u64, 8, write_u64, read_u64);
simple_enc_number!(f32, 4, write_f32, read_f32);
simple_enc_number!(f64, 8, write_f64, read_f64);

/// Writes a series of identical bytes to the stream.
pub fn write_bytes<W: Write + ?Sized>(
    stream: &mut W,
    value: u8,
    count: usize,
) -> EncodingResult<usize> {
    for _ in 0..count {
        process_encode_io_result(stream.write_all(&[value]))?;
    }
    Ok(count)
}

/// Writes an unsigned byte to the stream.
pub fn write_u8<T, W: Write + ?Sized>(stream: &mut W, value: T) -> EncodingResult<()>
where
    T: Into<u8>,
{
    let buf: [u8; 1] = [value.into()];
    process_encode_io_result(stream.write_all(&buf))
}

macro_rules! write_number {
    ($name:ident, $t:ty, $len:expr, $write:ident) => {
        #[doc = concat!("Writes a `", stringify!($t), "` to the stream, little-endian.")]
        pub fn $name<T, W: Write + ?Sized>(stream: &mut W, value: T) -> EncodingResult<()>
        where
            T: Into<$t>,
        {
            let mut buf = [0u8; $len];
            LittleEndian::$write(&mut buf, value.into());
            process_encode_io_result(stream.write_all(&buf))
        }
    };
}

write_number!(write_i16, i16, 2, write_i16);
write_number!(write_u16, u16, 2, write_u16);
write_number!(write_i32, i32, 4, write_i32);
write_number!(write_u32, u32, 4, write_u32);
write_number!(write_i64, i64, 8, write_i64);
write_number!(write_u64, u64, 8, write_u64);
write_number!(write_f32, f32, 4, write_f32);
write_number!(write_f64, f64, 8, write_f64);

/// Reads an exact number of bytes from the stream into the buffer.
pub fn read_bytes<R: Read + ?Sized>(stream: &mut R, buf: &mut [u8]) -> EncodingResult<usize> {
    process_decode_io_result(stream.read_exact(buf))?;
    Ok(buf.len())
}

/// Read an unsigned byte from the stream.
pub fn read_u8<R: Read + ?Sized>(stream: &mut R) -> EncodingResult<u8> {
    let mut buf = [0u8];
    process_decode_io_result(stream.read_exact(&mut buf))?;
    Ok(buf[0])
}

macro_rules! read_number {
    ($name:ident, $t:ty, $len:expr, $read:ident) => {
        #[doc = concat!("Reads a `", stringify!($t), "` from the stream, little-endian.")]
        pub fn $name<R: Read + ?Sized>(stream: &mut R) -> EncodingResult<$t> {
            let mut buf = [0u8; $len];
            process_decode_io_result(stream.read_exact(&mut buf))?;
            Ok(LittleEndian::$read(&buf))
        }
    };
}

read_number!(read_i16, i16, 2, read_i16);
read_number!(read_u16, u16, 2, read_u16);
read_number!(read_i32, i32, 4, read_i32);
read_number!(read_u32, u32, 4, read_u32);
read_number!(read_i64, i64, 8, read_i64);
read_number!(read_u64, u64, 8, read_u64);
read_number!(read_f32, f32, 4, read_f32);
read_number!(read_f64, f64, 8, read_f64);

/// Skip `bytes` bytes in the stream.
pub fn skip_bytes<R: Read + ?Sized>(stream: &mut R, bytes: u64) -> EncodingResult<()> {
    std::io::copy(&mut stream.take(bytes), &mut std::io::sink())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_gauge() {
        let dg = DepthGauge::default();
        let max_depth = dg.max_depth();

        {
            let mut locks = Vec::new();
            for _ in 0..max_depth {
                locks.push(DepthLock::obtain(&dg).unwrap());
            }
            // One more than max fails
            assert_eq!(
                DepthLock::obtain(&dg).unwrap_err().status(),
                StatusCode::BadDecodingError
            );
        }

        // Dropping the locks resets the gauge
        let _l = DepthLock::obtain(&dg).unwrap();
    }

    #[test]
    fn primitive_round_trips() {
        let opts = DecodingOptions::test();
        let mut buf = Vec::new();
        SimpleBinaryEncodable::encode(&0x1234_5678_u32, &mut buf).unwrap();
        assert_eq!(buf, [0x78, 0x56, 0x34, 0x12]);
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(
            <u32 as SimpleBinaryDecodable>::decode(&mut c, &opts).unwrap(),
            0x1234_5678
        );

        let mut buf = Vec::new();
        SimpleBinaryEncodable::encode(&(-2i16), &mut buf).unwrap();
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(
            <i16 as SimpleBinaryDecodable>::decode(&mut c, &opts).unwrap(),
            -2
        );

        let mut buf = Vec::new();
        SimpleBinaryEncodable::encode(&1.5f64, &mut buf).unwrap();
        let mut c = std::io::Cursor::new(&buf);
        assert_eq!(
            <f64 as SimpleBinaryDecodable>::decode(&mut c, &opts).unwrap(),
            1.5
        );

        let mut buf = Vec::new();
        SimpleBinaryEncodable::encode(&true, &mut buf).unwrap();
        assert_eq!(buf, [1]);
    }
}
