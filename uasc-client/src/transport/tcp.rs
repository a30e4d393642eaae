//! The TCP transport: connection, HELLO/ACK preamble and the poll loop
//! moving chunks in both directions.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, trace, warn};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

use uasc_core::comms::{
    buffer::SendBuffer,
    secure_channel::SecureChannel,
    tcp_codec::{Message, TcpCodec},
    tcp_types::{AcknowledgeMessage, HelloMessage, PROTOCOL_VERSION},
};
use uasc_core::sync::RwLock;
use uasc_core::{hostname_port_from_url, trace_read_lock, RequestMessage};
use uasc_types::{SimpleBinaryEncodable, StatusCode};

use super::{
    connect::{Connector, Transport},
    core::{OutgoingMessage, TransportPollResult, TransportState},
};

/// How long a socket connect may take before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Limits the transport negotiates and enforces.
#[derive(Debug, Clone)]
pub struct TransportConfiguration {
    /// Most responses awaiting reassembly at once.
    pub max_pending_incoming: usize,
    /// Our send buffer size, the largest chunk we want to send.
    pub send_buffer_size: usize,
    /// Our receive buffer size, the largest chunk we accept.
    pub recv_buffer_size: usize,
    /// The largest message we accept.
    pub max_message_size: usize,
    /// The most chunks per message we accept.
    pub max_chunk_count: usize,
}

impl Default for TransportConfiguration {
    fn default() -> Self {
        use uasc_core::comms::tcp_types::{
            DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CHUNK_COUNT, DEFAULT_MAX_MESSAGE_SIZE,
        };
        Self {
            max_pending_incoming: 5,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            recv_buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_chunk_count: DEFAULT_MAX_CHUNK_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TransportCloseState {
    Open,
    Closing(StatusCode),
    Closed(StatusCode),
}

/// The TCP transport of a secure channel. Created by [`TcpConnector`] after
/// the UA TCP preamble has negotiated limits.
pub struct TcpTransport {
    state: TransportState,
    read: FramedRead<ReadHalf<TcpStream>, TcpCodec>,
    write: WriteHalf<TcpStream>,
    send_buffer: SendBuffer,
    should_close: bool,
    closed: TransportCloseState,
}

/// Connects plain TCP sockets and runs the HELLO/ACK preamble.
pub struct TcpConnector;

impl TcpConnector {
    async fn connect_inner(
        secure_channel: &RwLock<SecureChannel>,
        config: &TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<
        (
            FramedRead<ReadHalf<TcpStream>, TcpCodec>,
            WriteHalf<TcpStream>,
            AcknowledgeMessage,
        ),
        StatusCode,
    > {
        let (host, port) = hostname_port_from_url(
            endpoint_url,
            uasc_core::constants::DEFAULT_OPC_UA_SERVER_PORT,
        )?;
        let addr = format!("{}:{}", host, port);
        debug!("Connecting to {} with url {}", addr, endpoint_url);

        let socket = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                error!("Timed out connecting to {}", addr);
                StatusCode::BadTimeout
            })?
            .map_err(|err| {
                error!("Could not connect to host {}: {:?}", addr, err);
                StatusCode::BadCommunicationError
            })?;

        let (reader, mut writer) = tokio::io::split(socket);
        let mut framed_read = {
            let secure_channel = trace_read_lock!(secure_channel);
            FramedRead::new(reader, TcpCodec::new(secure_channel.decoding_options()))
        };

        let hello = HelloMessage::new(
            endpoint_url,
            config.send_buffer_size,
            config.recv_buffer_size,
            config.max_message_size,
            config.max_chunk_count,
        );
        trace!("Sending hello {:?}", hello);
        writer
            .write_all(&hello.encode_to_vec())
            .await
            .map_err(|err| {
                error!("Cannot send hello to server, err = {}", err);
                StatusCode::BadCommunicationError
            })?;

        let ack = match framed_read.next().await {
            Some(Ok(Message::Acknowledge(ack))) => {
                if ack.protocol_version < PROTOCOL_VERSION {
                    error!(
                        "Server protocol version {} is older than ours",
                        ack.protocol_version
                    );
                    return Err(StatusCode::BadProtocolVersionUnsupported);
                }
                if ack.send_buffer_size > hello.receive_buffer_size
                    || ack.receive_buffer_size > hello.send_buffer_size
                {
                    warn!("Acknowledged buffer sizes are larger than what the hello offered");
                }
                trace!("Received acknowledgement {:?}", ack);
                ack
            }
            Some(Ok(Message::Error(error))) => {
                let status = error.status_code();
                error!("Server rejected the hello: {} ({})", status, error.reason);
                return Err(status);
            }
            other => {
                error!("Expected an ACK, got {:?}", other);
                return Err(StatusCode::BadConnectionClosed);
            }
        };

        Ok((framed_read, writer, ack))
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: tokio::sync::mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<TcpTransport, StatusCode> {
        let (framed_read, writer, ack) =
            Self::connect_inner(&channel, &config, endpoint_url).await?;

        // Our sends must fit the peer's receive buffer, and vice versa
        let mut buffer = SendBuffer::new(
            config.send_buffer_size,
            config.max_message_size,
            config.max_chunk_count,
        );
        buffer.revise(
            ack.receive_buffer_size as usize,
            ack.max_message_size as usize,
            ack.max_chunk_count as usize,
        );

        Ok(TcpTransport {
            state: TransportState::new(
                channel,
                outgoing_recv,
                config.max_pending_incoming,
                ack.send_buffer_size.min(config.recv_buffer_size as u32) as usize,
            ),
            read: framed_read,
            write: writer,
            send_buffer: buffer,
            should_close: false,
            closed: TransportCloseState::Open,
        })
    }
}

impl TcpTransport {
    fn handle_incoming_message(
        &mut self,
        incoming: Option<Result<Message, std::io::Error>>,
    ) -> TransportPollResult {
        let Some(incoming) = incoming else {
            return TransportPollResult::Closed(StatusCode::BadConnectionClosed);
        };
        match incoming {
            Ok(message) => match self.state.handle_incoming_message(message) {
                Ok(()) => TransportPollResult::IncomingMessage,
                Err(e) => TransportPollResult::Closed(e),
            },
            Err(err) => {
                error!("Error reading from stream: {}", err);
                TransportPollResult::Closed(StatusCode::BadConnectionClosed)
            }
        }
    }

    async fn wait_for_deadline(deadline: Option<tokio::time::Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn poll_inner(&mut self) -> TransportPollResult {
        // Chunks waiting for security get encoded before anything else so
        // the send buffer drains in order.
        if self.send_buffer.should_encode_chunks() {
            let secure_channel = trace_read_lock!(self.state.secure_channel);
            if let Err(e) = self.send_buffer.encode_next_chunk(&secure_channel) {
                return TransportPollResult::Closed(e.status());
            }
        }

        let deadline = self.state.next_deadline();

        // When there are secured bytes, write them while still listening.
        // Otherwise wait for the next outgoing message. Either way incoming
        // frames and request deadlines are serviced.
        if self.send_buffer.can_read() {
            tokio::select! {
                r = self.send_buffer.read_into_async(&mut self.write) => {
                    if let Err(e) = r {
                        error!("Write to stream failed: {}", e);
                        return TransportPollResult::Closed(StatusCode::BadCommunicationError);
                    }
                    TransportPollResult::OutgoingMessageSent
                }
                incoming = self.read.next() => {
                    self.handle_incoming_message(incoming)
                }
                _ = Self::wait_for_deadline(deadline) => {
                    self.state.timeout_expired_requests();
                    TransportPollResult::RecoverableError(StatusCode::BadRequestTimeout)
                }
            }
        } else {
            if self.should_close {
                debug!("Writer is done, closing the connection cleanly");
                return TransportPollResult::Closed(StatusCode::Good);
            }
            tokio::select! {
                outgoing = self.state.wait_for_outgoing_message() => {
                    let Some((request, request_id)) = outgoing else {
                        return TransportPollResult::Closed(StatusCode::Good);
                    };
                    if matches!(request, RequestMessage::CloseSecureChannel(_)) {
                        // CLO has no response, the connection closes once
                        // the chunk has drained
                        self.should_close = true;
                    }
                    let secure_channel = trace_read_lock!(self.state.secure_channel);
                    match self.send_buffer.write(request_id, &request, &secure_channel) {
                        Ok(_) => TransportPollResult::OutgoingMessage,
                        Err(e) => {
                            drop(secure_channel);
                            if let Some((request_id, request_handle)) = e.full_context() {
                                error!(
                                    "Failed to send request with handle {}: {}",
                                    request_handle,
                                    e.status()
                                );
                                self.state.message_send_failed(request_id, e.status());
                                TransportPollResult::RecoverableError(e.status())
                            } else {
                                TransportPollResult::Closed(e.status())
                            }
                        }
                    }
                }
                incoming = self.read.next() => {
                    self.handle_incoming_message(incoming)
                }
                _ = Self::wait_for_deadline(deadline) => {
                    self.state.timeout_expired_requests();
                    TransportPollResult::RecoverableError(StatusCode::BadRequestTimeout)
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    // Poll is cancel safe: every await inside `poll_inner` is cancel safe
    // and at most one of them completes. Closing is resumable, the state
    // steps from Closing to Closed only after close() finishes.
    async fn poll(&mut self) -> TransportPollResult {
        match self.closed {
            TransportCloseState::Open => {}
            TransportCloseState::Closing(c) => {
                let r = self.state.close(c).await;
                self.closed = TransportCloseState::Closed(r);
                return TransportPollResult::Closed(r);
            }
            TransportCloseState::Closed(c) => {
                return TransportPollResult::Closed(c);
            }
        }

        let r = self.poll_inner().await;
        if let TransportPollResult::Closed(status) = &r {
            self.closed = TransportCloseState::Closing(*status);
            let r = self.state.close(*status).await;
            self.closed = TransportCloseState::Closed(r);
        }
        r
    }
}
