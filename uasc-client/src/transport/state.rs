//! Client side secure channel state: request handle stamping and the
//! OpenSecureChannel issue / renew exchange.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use log::{debug, error};
use tokio::time::Instant;

use uasc_core::comms::secure_channel::SecureChannel;
use uasc_core::handle::AtomicHandle;
use uasc_core::sync::RwLock;
use uasc_core::{trace_write_lock, RequestMessage, ResponseMessage};
use uasc_crypto::SecurityPolicy;
use uasc_types::{
    ByteString, IntegerId, NodeId, OpenSecureChannelRequest, RequestHeader,
    SecurityTokenRequestType, StatusCode,
};

use super::core::OutgoingMessage;

/// Sender half of the outgoing message queue.
pub type RequestSend = tokio::sync::mpsc::Sender<OutgoingMessage>;

/// A request ready to be queued, with its timeout.
pub(crate) struct Request {
    payload: RequestMessage,
    sender: RequestSend,
    timeout: Duration,
}

impl Request {
    pub(crate) fn new(
        payload: impl Into<RequestMessage>,
        sender: RequestSend,
        timeout: Duration,
    ) -> Self {
        Self {
            payload: payload.into(),
            sender,
            timeout,
        }
    }

    /// Queue the request and wait for its response or failure.
    pub(crate) async fn send(self) -> Result<ResponseMessage, StatusCode> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let message = OutgoingMessage {
            request: self.payload,
            callback: Some(tx),
            deadline: Instant::now() + self.timeout,
        };
        self.sender
            .send(message)
            .await
            .map_err(|_| StatusCode::BadConnectionClosed)?;
        rx.await.map_err(|_| StatusCode::BadConnectionClosed)?
    }

    /// Queue the request without waiting for any response.
    pub(crate) async fn send_no_response(self) -> Result<(), StatusCode> {
        let message = OutgoingMessage {
            request: self.payload,
            callback: None,
            deadline: Instant::now() + self.timeout,
        };
        self.sender
            .send(message)
            .await
            .map_err(|_| StatusCode::BadConnectionClosed)
    }
}

/// Client state machine pieces of the secure channel: the request handle
/// counter, the auth token, and OPN request construction / response
/// processing.
pub struct SecureChannelState {
    secure_channel: Arc<RwLock<SecureChannel>>,
    /// The session authentication token stamped on every request header.
    auth_token: Arc<ArcSwap<NodeId>>,
    request_handle: AtomicHandle,
}

impl SecureChannelState {
    const FIRST_REQUEST_HANDLE: u32 = 1;

    pub(crate) fn new(
        secure_channel: Arc<RwLock<SecureChannel>>,
        auth_token: Arc<ArcSwap<NodeId>>,
    ) -> Self {
        SecureChannelState {
            secure_channel,
            auth_token,
            request_handle: AtomicHandle::new(Self::FIRST_REQUEST_HANDLE),
        }
    }

    /// Stamp a request header: auth token, timestamp, fresh handle, and the
    /// timeout as the hint.
    pub fn make_request_header(&self, timeout: Duration) -> RequestHeader {
        RequestHeader::new(
            &self.auth_token.load(),
            self.request_handle(),
            timeout.as_millis() as u32,
        )
    }

    /// Take the next request handle.
    pub fn request_handle(&self) -> IntegerId {
        self.request_handle.next()
    }

    /// Build the OpenSecureChannel request that issues or renews the
    /// channel, creating a fresh local nonce under the channel lock.
    pub(crate) fn begin_issue_or_renew_secure_channel(
        &self,
        request_type: SecurityTokenRequestType,
        requested_lifetime: u32,
        timeout: Duration,
        sender: RequestSend,
    ) -> Request {
        let request = {
            let mut secure_channel = trace_write_lock!(self.secure_channel);
            let client_nonce = if secure_channel.security_policy() == SecurityPolicy::None {
                ByteString::null()
            } else {
                secure_channel.create_random_nonce();
                secure_channel.local_nonce_as_byte_string()
            };
            debug!("Making OpenSecureChannel({:?}) request", request_type);
            OpenSecureChannelRequest {
                request_header: self.make_request_header(timeout),
                client_protocol_version: uasc_core::comms::tcp_types::PROTOCOL_VERSION,
                request_type,
                security_mode: secure_channel.security_mode(),
                client_nonce,
                requested_lifetime,
            }
        };
        Request::new(request, sender, timeout)
    }

    /// Process the response to an issue or renew: adopt the channel id and
    /// token, take the server nonce and derive the new keys. The swap
    /// happens under the channel write lock, so the next secured chunk in
    /// either direction uses the new material.
    pub(crate) fn end_issue_or_renew_secure_channel(
        &self,
        response: ResponseMessage,
    ) -> Result<(), StatusCode> {
        let ResponseMessage::OpenSecureChannel(response) = response else {
            error!("Expected an OpenSecureChannelResponse");
            return Err(StatusCode::BadUnknownResponse);
        };

        let mut secure_channel = trace_write_lock!(self.secure_channel);
        let token = response.security_token.clone();
        debug!(
            "Adopting security token: channel id {}, token id {}, lifetime {}",
            token.channel_id, token.token_id, token.revised_lifetime
        );
        secure_channel.set_security_token(token);

        if secure_channel.security_policy() != SecurityPolicy::None {
            secure_channel.set_remote_nonce_from_byte_string(&response.server_nonce)?;
            secure_channel.derive_keys();
        }
        Ok(())
    }
}
