// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The UA TCP handshake messages: HELLO, ACKNOWLEDGE and ERROR, and the
//! frame constants shared with the chunk types.

use std::io::{Read, Write};

use log::error;

use uasc_types::{
    encoding::{
        process_decode_io_result, process_encode_io_result, read_u32, read_u8, write_u32,
        write_u8, DecodingOptions, EncodingResult, Error, SimpleBinaryDecodable,
        SimpleBinaryEncodable,
    },
    StatusCode, UAString,
};

/// The UA TCP protocol version this stack implements.
pub const PROTOCOL_VERSION: u32 = 0;

/// Message type bytes of a HELLO frame.
pub const HELLO_MESSAGE: &[u8] = b"HEL";
/// Message type bytes of an ACKNOWLEDGE frame.
pub const ACKNOWLEDGE_MESSAGE: &[u8] = b"ACK";
/// Message type bytes of an ERROR frame.
pub const ERROR_MESSAGE: &[u8] = b"ERR";
/// Message type bytes of a service message chunk.
pub const CHUNK_MESSAGE: &[u8] = b"MSG";
/// Message type bytes of an OpenSecureChannel chunk.
pub const OPEN_SECURE_CHANNEL_MESSAGE: &[u8] = b"OPN";
/// Message type bytes of a CloseSecureChannel chunk.
pub const CLOSE_SECURE_CHANNEL_MESSAGE: &[u8] = b"CLO";

/// Chunk flag byte of an intermediate chunk.
pub const CHUNK_INTERMEDIATE: u8 = b'C';
/// Chunk flag byte of the final chunk of a message.
pub const CHUNK_FINAL: u8 = b'F';
/// Chunk flag byte of a final chunk that aborts the message.
pub const CHUNK_FINAL_ERROR: u8 = b'A';

/// Size in bytes of every frame header: 3 type bytes, the flag byte and the
/// frame length.
pub const MESSAGE_HEADER_LEN: usize = 8;

/// Default receive and send buffer size, 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 65536;
/// Default maximum message size, 16 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
/// Default maximum number of chunks in a message.
pub const DEFAULT_MAX_CHUNK_COUNT: usize = 4096;
/// The smallest buffer size either peer may advertise, 8 KiB.
pub const MIN_BUFFER_SIZE: usize = 8192;
/// The smallest chunk size a channel can operate with.
pub const MIN_CHUNK_SIZE: usize = MIN_BUFFER_SIZE;
/// Longest endpoint url accepted in a HELLO.
pub const MAX_ENDPOINT_URL_LENGTH: usize = 4096;

fn write_frame_header<S: Write + ?Sized>(
    stream: &mut S,
    message_type: &[u8],
    frame_size: usize,
) -> EncodingResult<()> {
    process_encode_io_result(stream.write_all(message_type))?;
    write_u8(stream, CHUNK_FINAL)?;
    write_u32(stream, frame_size as u32)
}

fn read_frame_header<S: Read + ?Sized>(
    stream: &mut S,
    expected_type: &[u8],
) -> EncodingResult<u32> {
    let mut message_type = [0u8; 3];
    process_decode_io_result(stream.read_exact(&mut message_type))?;
    if message_type != expected_type {
        return Err(Error::decoding(format!(
            "Expected {:?} message, got {:?}",
            expected_type, message_type
        )));
    }
    let is_final = read_u8(stream)?;
    if is_final != CHUNK_FINAL {
        return Err(Error::decoding("Handshake frame is not marked final"));
    }
    read_u32(stream)
}

/// The first frame a client sends: announces buffer sizes and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    /// Version of the UA TCP protocol the client implements.
    pub protocol_version: u32,
    /// Largest chunk the client can receive.
    pub receive_buffer_size: u32,
    /// Largest chunk the client will send.
    pub send_buffer_size: u32,
    /// Largest whole message the client will accept, 0 for no limit.
    pub max_message_size: u32,
    /// Most chunks per message the client will accept, 0 for no limit.
    pub max_chunk_count: u32,
    /// The url the client used to reach the server.
    pub endpoint_url: UAString,
}

impl SimpleBinaryEncodable for HelloMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN + 20 + self.endpoint_url.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_frame_header(stream, HELLO_MESSAGE, self.byte_len())?;
        write_u32(stream, self.protocol_version)?;
        write_u32(stream, self.receive_buffer_size)?;
        write_u32(stream, self.send_buffer_size)?;
        write_u32(stream, self.max_message_size)?;
        write_u32(stream, self.max_chunk_count)?;
        self.endpoint_url.encode(stream)
    }
}

impl SimpleBinaryDecodable for HelloMessage {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let _frame_size = read_frame_header(stream, HELLO_MESSAGE)?;
        let hello = HelloMessage {
            protocol_version: read_u32(stream)?,
            receive_buffer_size: read_u32(stream)?,
            send_buffer_size: read_u32(stream)?,
            max_message_size: read_u32(stream)?,
            max_chunk_count: read_u32(stream)?,
            endpoint_url: UAString::decode(stream, decoding_options)?,
        };
        if hello.endpoint_url.len() > MAX_ENDPOINT_URL_LENGTH as isize {
            return Err(Error::decoding("Endpoint url exceeds maximum length"));
        }
        Ok(hello)
    }
}

impl HelloMessage {
    /// Create a HELLO for the endpoint with the given limits.
    pub fn new(
        endpoint_url: &str,
        send_buffer_size: usize,
        receive_buffer_size: usize,
        max_message_size: usize,
        max_chunk_count: usize,
    ) -> HelloMessage {
        HelloMessage {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: receive_buffer_size as u32,
            send_buffer_size: send_buffer_size as u32,
            max_message_size: max_message_size as u32,
            max_chunk_count: max_chunk_count as u32,
            endpoint_url: UAString::from(endpoint_url),
        }
    }

    /// True if both advertised buffer sizes meet the protocol minimum.
    pub fn is_valid_buffer_sizes(&self) -> bool {
        self.receive_buffer_size as usize >= MIN_BUFFER_SIZE
            && self.send_buffer_size as usize >= MIN_BUFFER_SIZE
    }
}

/// The server's answer to HELLO: the limits both sides will honor.
#[derive(Debug, Clone, PartialEq)]
pub struct AcknowledgeMessage {
    /// Version of the UA TCP protocol the server implements.
    pub protocol_version: u32,
    /// Largest chunk the server can receive, so the largest the client may
    /// send.
    pub receive_buffer_size: u32,
    /// Largest chunk the server will send.
    pub send_buffer_size: u32,
    /// Largest whole message the server will accept.
    pub max_message_size: u32,
    /// Most chunks per message the server will accept.
    pub max_chunk_count: u32,
}

impl SimpleBinaryEncodable for AcknowledgeMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN + 20
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_frame_header(stream, ACKNOWLEDGE_MESSAGE, self.byte_len())?;
        write_u32(stream, self.protocol_version)?;
        write_u32(stream, self.receive_buffer_size)?;
        write_u32(stream, self.send_buffer_size)?;
        write_u32(stream, self.max_message_size)?;
        write_u32(stream, self.max_chunk_count)?;
        Ok(())
    }
}

impl SimpleBinaryDecodable for AcknowledgeMessage {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let _frame_size = read_frame_header(stream, ACKNOWLEDGE_MESSAGE)?;
        Ok(AcknowledgeMessage {
            protocol_version: read_u32(stream)?,
            receive_buffer_size: read_u32(stream)?,
            send_buffer_size: read_u32(stream)?,
            max_message_size: read_u32(stream)?,
            max_chunk_count: read_u32(stream)?,
        })
    }
}

/// An error frame: the peer is reporting a fatal connection problem.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    /// The status code of the failure.
    pub error: u32,
    /// Human readable reason.
    pub reason: UAString,
}

impl SimpleBinaryEncodable for ErrorMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN + 4 + self.reason.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_frame_header(stream, ERROR_MESSAGE, self.byte_len())?;
        write_u32(stream, self.error)?;
        self.reason.encode(stream)
    }
}

impl SimpleBinaryDecodable for ErrorMessage {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let _frame_size = read_frame_header(stream, ERROR_MESSAGE)?;
        Ok(ErrorMessage {
            error: read_u32(stream)?,
            reason: UAString::decode(stream, decoding_options)?,
        })
    }
}

impl ErrorMessage {
    /// Build an error frame from a status code.
    pub fn from_status_code(status_code: StatusCode) -> ErrorMessage {
        ErrorMessage {
            error: status_code.bits(),
            reason: UAString::from(status_code.to_string()),
        }
    }

    /// The status code carried by the frame.
    pub fn status_code(&self) -> StatusCode {
        let status = StatusCode::from_bits(self.error);
        if status.is_good() && self.error != 0 {
            // Servers occasionally send garbage here, normalize it
            error!("Error frame carries a non-error code {:#x}", self.error);
            StatusCode::BadUnexpectedError
        } else {
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uasc_types::DecodingOptions;

    #[test]
    fn hello_round_trip() {
        let hello = HelloMessage::new(
            "opc.tcp://localhost:4855/",
            DEFAULT_BUFFER_SIZE,
            DEFAULT_BUFFER_SIZE,
            DEFAULT_MAX_MESSAGE_SIZE,
            DEFAULT_MAX_CHUNK_COUNT,
        );
        let buf = hello.encode_to_vec();
        assert_eq!(&buf[..3], b"HEL");
        assert_eq!(buf[3], b'F');
        assert_eq!(
            u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize,
            buf.len()
        );
        let mut c = std::io::Cursor::new(buf);
        let decoded = HelloMessage::decode(&mut c, &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, hello);
        assert!(decoded.is_valid_buffer_sizes());
    }

    #[test]
    fn ack_round_trip() {
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 65536,
            send_buffer_size: 65536,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        let mut c = std::io::Cursor::new(ack.encode_to_vec());
        assert_eq!(
            AcknowledgeMessage::decode(&mut c, &DecodingOptions::test()).unwrap(),
            ack
        );
    }

    #[test]
    fn error_round_trip() {
        let err = ErrorMessage::from_status_code(StatusCode::BadTcpMessageTooLarge);
        let mut c = std::io::Cursor::new(err.encode_to_vec());
        let decoded = ErrorMessage::decode(&mut c, &DecodingOptions::test()).unwrap();
        assert_eq!(decoded.status_code(), StatusCode::BadTcpMessageTooLarge);
    }

    #[test]
    fn small_buffers_are_invalid() {
        let hello = HelloMessage::new("opc.tcp://h", 4096, 4096, 0, 0);
        assert!(!hello.is_valid_buffer_sizes());
    }
}
