// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

#![warn(missing_docs)]

//! The client crate: an async OPC UA client engine. It drives the
//! transport, keeps the secure channel alive and renewed, establishes and
//! activates sessions, and pumps publish requests.

mod retry;
mod session;
mod transport;

pub use retry::{ExponentialBackoff, SessionRetryPolicy};
pub use session::{
    IdentityProvider, IdentityToken, PublishActivity, Session, SessionActivity, SessionConfig,
    SessionEventLoop, SessionInfo, SessionPollResult, SessionState,
};
pub use transport::{
    channel::AsyncSecureChannel, connect::Connector, tcp::TcpConnector,
    tcp::TransportConfiguration, TransportPollResult,
};
