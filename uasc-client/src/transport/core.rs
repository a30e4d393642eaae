//! Transport state shared by transport implementations: the pending request
//! map, chunk reassembly and request timeouts.

use std::sync::Arc;

use hashbrown::HashMap;
use log::{debug, error, warn};
use tokio::time::Instant;

use uasc_core::comms::{
    chunker::Chunker,
    message_chunk::{MessageChunk, MessageIsFinalType},
    secure_channel::SecureChannel,
    tcp_codec,
};
use uasc_core::handle::AtomicHandle;
use uasc_core::sync::RwLock;
use uasc_core::{trace_read_lock, trace_write_lock, RequestMessage, ResponseMessage};
use uasc_types::{DecodingOptions, SimpleBinaryDecodable, StatusCode, UAString};

/// The outcome of polling the transport once.
#[derive(Debug)]
pub enum TransportPollResult {
    /// A message or chunk arrived.
    IncomingMessage,
    /// An outgoing message was accepted and chunked.
    OutgoingMessage,
    /// Secured bytes were written to the socket.
    OutgoingMessageSent,
    /// A request failed without killing the connection.
    RecoverableError(StatusCode),
    /// The connection closed with the given status.
    Closed(StatusCode),
}

/// A request on its way to the transport, with the slot that resolves when
/// the matching response arrives.
pub struct OutgoingMessage {
    /// The request to send.
    pub request: RequestMessage,
    /// Completion slot, `None` for fire and forget messages like
    /// CloseSecureChannel.
    pub callback: Option<tokio::sync::oneshot::Sender<Result<ResponseMessage, StatusCode>>>,
    /// When the request gives up waiting for its response.
    pub deadline: Instant,
}

struct MessageState {
    callback: tokio::sync::oneshot::Sender<Result<ResponseMessage, StatusCode>>,
    deadline: Instant,
}

/// State a transport implementation drives: correlation of responses to
/// requests by request id, reassembly of chunked responses and timeouts.
pub struct TransportState {
    /// The secure channel of the connection.
    pub secure_channel: Arc<RwLock<SecureChannel>>,
    outgoing_recv: tokio::sync::mpsc::Receiver<OutgoingMessage>,
    /// Slots of requests in flight, keyed by the request id stamped into
    /// the chunks' sequence headers.
    pending_requests: HashMap<u32, MessageState>,
    request_ids: AtomicHandle,
    last_received_sequence_number: u32,
    /// Chunks of the response currently being reassembled.
    pending_chunks: Vec<MessageChunk>,
    /// The largest chunk the peer may send us.
    receive_buffer_size: usize,
    max_pending_incoming: usize,
}

impl TransportState {
    /// Create transport state over the given channel and outgoing queue.
    pub fn new(
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: tokio::sync::mpsc::Receiver<OutgoingMessage>,
        max_pending_incoming: usize,
        receive_buffer_size: usize,
    ) -> Self {
        Self {
            secure_channel,
            outgoing_recv,
            pending_requests: HashMap::new(),
            request_ids: AtomicHandle::new(1),
            last_received_sequence_number: 0,
            pending_chunks: Vec::new(),
            receive_buffer_size,
            max_pending_incoming,
        }
    }

    /// Wait for the next outgoing message. Returns `None` when the sending
    /// side of the queue is gone and the transport should close.
    pub async fn wait_for_outgoing_message(&mut self) -> Option<(RequestMessage, u32)> {
        loop {
            let message = self.outgoing_recv.recv().await?;
            let request_id = self.request_ids.next();
            if let Some(callback) = message.callback {
                if self.pending_requests.len() >= self.max_pending_incoming.max(1) * 1000 {
                    // Runaway queue, reject rather than grow without bound
                    warn!("Pending request map is full, rejecting request");
                    let _ = callback.send(Err(StatusCode::BadTooManyOperations));
                    continue;
                }
                self.pending_requests.insert(
                    request_id,
                    MessageState {
                        callback,
                        deadline: message.deadline,
                    },
                );
            }
            return Some((message.request, request_id));
        }
    }

    /// Fail a request that could not be sent.
    pub fn message_send_failed(&mut self, request_id: u32, status: StatusCode) {
        if let Some(state) = self.pending_requests.remove(&request_id) {
            let _ = state.callback.send(Err(status));
        }
    }

    /// The earliest request deadline, for the transport's timeout timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_requests
            .values()
            .map(|state| state.deadline)
            .min()
    }

    /// Cancel every request whose deadline has passed with
    /// `BadRequestTimeout`.
    pub fn timeout_expired_requests(&mut self) {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .pending_requests
            .iter()
            .filter(|(_, state)| state.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            debug!("Request {} timed out", id);
            if let Some(state) = self.pending_requests.remove(&id) {
                let _ = state.callback.send(Err(StatusCode::BadRequestTimeout));
            }
        }
    }

    /// Handle one frame from the codec.
    pub fn handle_incoming_message(&mut self, message: tcp_codec::Message) -> Result<(), StatusCode> {
        match message {
            tcp_codec::Message::Chunk(chunk) => self.process_chunk(chunk),
            tcp_codec::Message::Error(error) => {
                let status = error.status_code();
                error!(
                    "Server sent an error frame, {} ({})",
                    status, error.reason
                );
                Err(status)
            }
            unexpected => {
                error!("Received unexpected frame {:?}", unexpected);
                Err(StatusCode::BadUnexpectedError)
            }
        }
    }

    fn process_chunk(&mut self, chunk: MessageChunk) -> Result<(), StatusCode> {
        if chunk.data.len() > self.receive_buffer_size {
            error!(
                "Chunk of {} bytes exceeds the negotiated receive buffer of {}",
                chunk.data.len(),
                self.receive_buffer_size
            );
            return Err(StatusCode::BadResponseTooLarge);
        }

        // Decryption and verification happen under the channel write lock,
        // which also serializes against key rotation
        let (chunk, decoding_options) = {
            let mut channel = trace_write_lock!(self.secure_channel);
            let chunk = channel.verify_and_remove_security(&chunk.data).map_err(|e| {
                error!("Failed to verify and remove chunk security: {}", e);
                StatusCode::from(e)
            })?;
            (chunk, channel.decoding_options())
        };

        let header = chunk
            .message_header(&decoding_options)
            .map_err(StatusCode::from)?;
        match header.is_final {
            MessageIsFinalType::Intermediate => {
                let max_chunk_count = decoding_options.max_chunk_count;
                if max_chunk_count > 0 && self.pending_chunks.len() >= max_chunk_count {
                    error!(
                        "Message has more than {} chunks, which exceeds the limit",
                        max_chunk_count
                    );
                    return Err(StatusCode::BadEncodingLimitsExceeded);
                }
                self.pending_chunks.push(chunk);
                Ok(())
            }
            MessageIsFinalType::FinalError => {
                warn!("Message is being aborted by the server");
                self.process_abort_chunk(chunk, &decoding_options);
                self.pending_chunks.clear();
                Ok(())
            }
            MessageIsFinalType::Final => {
                self.pending_chunks.push(chunk);
                let chunks = std::mem::take(&mut self.pending_chunks);
                self.process_complete_message(chunks)
            }
        }
    }

    // The body of an abort chunk is a status code and a reason string. It
    // aborts the one message, not the conversation.
    fn process_abort_chunk(&mut self, chunk: MessageChunk, decoding_options: &DecodingOptions) {
        let channel = trace_read_lock!(self.secure_channel);
        let Ok(info) = chunk.chunk_info(&channel) else {
            return;
        };
        drop(channel);
        let mut stream = std::io::Cursor::new(
            &chunk.data[info.body_offset..info.body_offset + info.body_length],
        );
        let status = uasc_types::read_u32(&mut stream)
            .map(StatusCode::from_bits)
            .unwrap_or(StatusCode::BadUnexpectedError);
        let reason = UAString::decode(&mut stream, decoding_options).unwrap_or_default();
        warn!(
            "Request {} aborted by the peer: {} {}",
            info.sequence_header.request_id, status, reason
        );
        if let Some(state) = self
            .pending_requests
            .remove(&info.sequence_header.request_id)
        {
            let _ = state.callback.send(Err(status));
        }
    }

    fn process_complete_message(&mut self, chunks: Vec<MessageChunk>) -> Result<(), StatusCode> {
        let channel = trace_read_lock!(self.secure_channel);
        let last_sequence_number = Chunker::validate_chunks(
            self.last_received_sequence_number.wrapping_add(1),
            &channel,
            &chunks,
        )
        .map_err(StatusCode::from)?;
        self.last_received_sequence_number = last_sequence_number;

        let request_id = chunks[0]
            .chunk_info(&channel)
            .map_err(StatusCode::from)?
            .sequence_header
            .request_id;

        let message: ResponseMessage =
            Chunker::decode(&chunks, &channel, None).map_err(StatusCode::from)?;
        drop(channel);

        match self.pending_requests.remove(&request_id) {
            Some(state) => {
                let _ = state.callback.send(Ok(message));
            }
            None => {
                // A late response whose request already resolved or timed out
                debug!("Discarding response to unknown request id {}", request_id);
            }
        }
        Ok(())
    }

    /// Close the transport: fail all pending requests and drain the queue,
    /// failing queued requests too. Safe to call more than once.
    pub async fn close(&mut self, status: StatusCode) -> StatusCode {
        let fail_status = if status.is_good() {
            StatusCode::BadConnectionClosed
        } else {
            status
        };
        for (_, state) in self.pending_requests.drain() {
            let _ = state.callback.send(Err(fail_status));
        }
        self.outgoing_recv.close();
        while let Ok(message) = self.outgoing_recv.try_recv() {
            if let Some(callback) = message.callback {
                let _ = callback.send(Err(fail_status));
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uasc_core::comms::secure_channel::SecureChannel;
    use uasc_types::{RequestHeader, ResponseHeader, ServiceFault};

    fn new_state() -> (
        TransportState,
        tokio::sync::mpsc::Sender<OutgoingMessage>,
        Arc<RwLock<SecureChannel>>,
    ) {
        let channel = Arc::new(RwLock::new(SecureChannel::new_no_certificate_store()));
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let state = TransportState::new(channel.clone(), rx, 5, 65536);
        (state, tx, channel)
    }

    fn close_channel_request() -> RequestMessage {
        uasc_types::CloseSecureChannelRequest {
            request_header: RequestHeader::new(&uasc_types::NodeId::null(), 1, 1000),
        }
        .into()
    }

    fn fault_chunk(
        channel: &Arc<RwLock<SecureChannel>>,
        sequence_number: u32,
        request_id: u32,
    ) -> tcp_codec::Message {
        use uasc_core::comms::chunker::Chunker;
        let response: uasc_core::ResponseMessage = ServiceFault {
            response_header: ResponseHeader {
                request_handle: request_id,
                service_result: StatusCode::BadNothingToDo,
                ..Default::default()
            },
        }
        .into();
        let channel = channel.read();
        let chunks = Chunker::encode(sequence_number, request_id, 0, 0, 0, &channel, &response)
            .unwrap();
        tcp_codec::Message::Chunk(chunks.into_iter().next().unwrap())
    }

    fn outgoing(
        deadline: tokio::time::Instant,
    ) -> (
        OutgoingMessage,
        tokio::sync::oneshot::Receiver<Result<ResponseMessage, StatusCode>>,
    ) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            OutgoingMessage {
                request: close_channel_request(),
                callback: Some(tx),
                deadline,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn response_resolves_slot_exactly_once() {
        let (mut state, tx, channel) = new_state();
        let (message, rx) = outgoing(Instant::now() + Duration::from_secs(30));
        tx.send(message).await.unwrap();

        let (_, request_id) = state.wait_for_outgoing_message().await.unwrap();
        assert_eq!(request_id, 1);

        state
            .handle_incoming_message(fault_chunk(&channel, 1, request_id))
            .unwrap();
        let result = rx.await.unwrap();
        assert!(result.is_ok());

        // A second response to the same id is silently dropped
        state
            .handle_incoming_message(fault_chunk(&channel, 2, request_id))
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_request_id_is_dropped() {
        let (mut state, _tx, channel) = new_state();
        state
            .handle_incoming_message(fault_chunk(&channel, 1, 99))
            .unwrap();
    }

    #[tokio::test]
    async fn timeout_cancels_only_expired_requests() {
        let (mut state, tx, _channel) = new_state();
        let (expired, expired_rx) = outgoing(Instant::now() - Duration::from_secs(1));
        let (alive, mut alive_rx) = outgoing(Instant::now() + Duration::from_secs(60));
        tx.send(expired).await.unwrap();
        tx.send(alive).await.unwrap();
        state.wait_for_outgoing_message().await.unwrap();
        state.wait_for_outgoing_message().await.unwrap();

        state.timeout_expired_requests();
        assert_eq!(
            expired_rx.await.unwrap().unwrap_err(),
            StatusCode::BadRequestTimeout
        );
        assert!(alive_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_fails_pending_and_queued_requests() {
        let (mut state, tx, _channel) = new_state();
        let (pending, pending_rx) = outgoing(Instant::now() + Duration::from_secs(60));
        tx.send(pending).await.unwrap();
        state.wait_for_outgoing_message().await.unwrap();

        // Still sitting in the queue, never picked up
        let (queued, queued_rx) = outgoing(Instant::now() + Duration::from_secs(60));
        tx.send(queued).await.unwrap();

        state.close(StatusCode::BadConnectionClosed).await;
        assert_eq!(
            pending_rx.await.unwrap().unwrap_err(),
            StatusCode::BadConnectionClosed
        );
        assert_eq!(
            queued_rx.await.unwrap().unwrap_err(),
            StatusCode::BadConnectionClosed
        );
    }

    #[tokio::test]
    async fn error_frame_kills_the_connection() {
        let (mut state, _tx, _channel) = new_state();
        let error = uasc_core::comms::tcp_types::ErrorMessage::from_status_code(
            StatusCode::BadTcpServerTooBusy,
        );
        let e = state
            .handle_incoming_message(tcp_codec::Message::Error(error))
            .unwrap_err();
        assert_eq!(e, StatusCode::BadTcpServerTooBusy);
    }
}
