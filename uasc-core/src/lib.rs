// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

#![warn(missing_docs)]

//! The core crate holds everything between the byte stream and the typed
//! service messages: UA TCP handshake types, the frame codec, message
//! chunking, and the secure channel that signs and encrypts chunks.

/// Debugging helpers.
pub mod debug {
    use log::{log_enabled, trace};

    /// Dump a buffer in hex and printable characters to the `hex` trace
    /// target. Does nothing unless that target is enabled.
    pub fn log_buffer(message: &str, buf: &[u8]) {
        if !log_enabled!(target: "hex", log::Level::Trace) {
            return;
        }

        trace!(target: "hex", "{}", message);

        let line_len = 32;
        for (i, line) in buf.chunks(line_len).enumerate() {
            let hex: String = line.iter().map(|b| format!(" {:02x}", b)).collect();
            let chars: String = line
                .iter()
                .map(|&b| {
                    if (32..=126).contains(&b) {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            trace!(target: "hex", "{:08x}:{:<width$} {}", i * line_len, hex, chars,
                width = line_len * 3);
        }
    }
}

/// Common OPC UA constants.
pub mod constants {
    /// Default port of an OPC UA server, used when a url does not name one.
    pub const DEFAULT_OPC_UA_SERVER_PORT: u16 = 4840;
}

pub mod comms;
pub mod handle;

pub mod messages;
pub use messages::{Message, MessageType, RequestMessage, ResponseMessage};

/// Tracing macro for obtaining a lock on a `Mutex`, useful when hunting
/// deadlocks.
#[macro_export]
macro_rules! trace_lock {
    ( $x:expr ) => {{
        $x.lock()
    }};
}

/// Tracing macro for obtaining a read lock on a `RwLock`.
#[macro_export]
macro_rules! trace_read_lock {
    ( $x:expr ) => {{
        $x.read()
    }};
}

/// Tracing macro for obtaining a write lock on a `RwLock`.
#[macro_export]
macro_rules! trace_write_lock {
    ( $x:expr ) => {{
        $x.write()
    }};
}

/// Common synchronous locks, re-exported from parking_lot.
pub mod sync {
    /// Read-write lock. Use this if you usually only need to read the value.
    pub type RwLock<T> = parking_lot::RwLock<T>;
    /// Mutually exclusive lock.
    pub type Mutex<T> = parking_lot::Mutex<T>;
}

/// Split an opc.tcp:// endpoint url into host and port, using the default
/// port when the url does not carry one.
pub fn hostname_port_from_url(
    url: &str,
    default_port: u16,
) -> Result<(String, u16), uasc_types::StatusCode> {
    use uasc_types::StatusCode;

    let rest = url
        .strip_prefix("opc.tcp://")
        .ok_or(StatusCode::BadTcpEndpointUrlInvalid)?;
    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty() {
        return Err(StatusCode::BadTcpEndpointUrlInvalid);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| StatusCode::BadTcpEndpointUrlInvalid)?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::hostname_port_from_url;

    #[test]
    fn url_parsing() {
        assert_eq!(
            hostname_port_from_url("opc.tcp://localhost:4855/UA/Server", 4840).unwrap(),
            ("localhost".to_string(), 4855)
        );
        assert_eq!(
            hostname_port_from_url("opc.tcp://192.168.1.9", 4840).unwrap(),
            ("192.168.1.9".to_string(), 4840)
        );
        assert!(hostname_port_from_url("http://localhost", 4840).is_err());
        assert!(hostname_port_from_url("opc.tcp://", 4840).is_err());
    }
}
