//! The client's handle to an open secure channel.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use log::{debug, error};

use uasc_core::comms::secure_channel::{Role, SecureChannel};
use uasc_core::sync::RwLock;
use uasc_core::{trace_read_lock, trace_write_lock, RequestMessage, ResponseMessage};
use uasc_crypto::{CertificateStore, SecurityPolicy};
use uasc_types::{
    ByteString, CloseSecureChannelRequest, ContextOwned, IntegerId, NodeId, RequestHeader,
    SecurityTokenRequestType, StatusCode,
};

use crate::{retry::SessionRetryPolicy, session::SessionInfo};

use super::{
    connect::{Connector, Transport},
    core::OutgoingMessage,
    state::{Request, RequestSend, SecureChannelState},
    tcp::{TcpTransport, TransportConfiguration},
};

// Backstop against the client getting stuck queueing without a transport
// draining the queue.
const MAX_INFLIGHT_MESSAGES: usize = 100_000;

/// How long the OPN exchange itself may take.
const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// A client secure channel: owns the channel security state and the queue
/// feeding the transport, and renews the token when it ages.
pub struct AsyncSecureChannel {
    session_info: SessionInfo,
    session_retry_policy: SessionRetryPolicy,
    /// The channel security state, shared with the transport.
    pub(crate) secure_channel: Arc<RwLock<SecureChannel>>,
    certificate_store: Arc<RwLock<CertificateStore>>,
    transport_config: TransportConfiguration,
    state: SecureChannelState,
    /// Held while a token is being issued or renewed so only one OPN runs.
    issue_channel_lock: tokio::sync::Mutex<()>,
    connector: Box<dyn Connector>,
    channel_lifetime: u32,

    request_send: ArcSwapOption<RequestSend>,
}

/// The event loop of an open channel; polling it drives the transport.
pub struct SecureChannelEventLoop {
    transport: TcpTransport,
}

impl SecureChannelEventLoop {
    /// Drive the transport one step.
    pub async fn poll(&mut self) -> super::core::TransportPollResult {
        self.transport.poll().await
    }
}

impl AsyncSecureChannel {
    /// Create a channel for the endpoint in `session_info`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        certificate_store: Arc<RwLock<CertificateStore>>,
        session_info: SessionInfo,
        session_retry_policy: SessionRetryPolicy,
        auth_token: Arc<ArcSwap<NodeId>>,
        transport_config: TransportConfiguration,
        connector: Box<dyn Connector>,
        channel_lifetime: u32,
        encoding_context: Arc<RwLock<ContextOwned>>,
    ) -> Self {
        let secure_channel = Arc::new(RwLock::new(SecureChannel::new(
            certificate_store.clone(),
            Role::Client,
            encoding_context,
        )));

        Self {
            transport_config,
            issue_channel_lock: tokio::sync::Mutex::new(()),
            state: SecureChannelState::new(secure_channel.clone(), auth_token),
            session_info,
            secure_channel,
            certificate_store,
            session_retry_policy,
            request_send: Default::default(),
            connector,
            channel_lifetime,
        }
    }

    /// Make a request header stamped with the channel's auth token and a
    /// fresh handle.
    pub fn make_request_header(&self, timeout: Duration) -> RequestHeader {
        self.state.make_request_header(timeout)
    }

    /// Take the next request handle on the channel.
    pub fn request_handle(&self) -> IntegerId {
        self.state.request_handle()
    }

    /// The client nonce of the current OPN exchange.
    pub(crate) fn client_nonce(&self) -> ByteString {
        let secure_channel = trace_read_lock!(self.secure_channel);
        secure_channel.local_nonce_as_byte_string()
    }

    /// Adopt the nonce and certificate returned by CreateSession.
    pub(crate) fn update_from_created_session(
        &self,
        nonce: &ByteString,
        certificate: &ByteString,
    ) -> Result<(), StatusCode> {
        let mut secure_channel = trace_write_lock!(self.secure_channel);
        secure_channel.set_remote_nonce_from_byte_string(nonce)?;
        secure_channel.set_remote_cert_from_byte_string(certificate)?;
        Ok(())
    }

    /// The channel's security policy.
    pub fn security_policy(&self) -> SecurityPolicy {
        let secure_channel = trace_read_lock!(self.secure_channel);
        secure_channel.security_policy()
    }

    /// Send a request on the channel and wait for the response. Renews the
    /// security token first when it is due.
    pub async fn send(
        &self,
        request: impl Into<RequestMessage>,
        timeout: Duration,
    ) -> Result<ResponseMessage, StatusCode> {
        let Some(send) = self.request_send.load().as_deref().cloned() else {
            return Err(StatusCode::BadServerNotConnected);
        };

        let should_renew = {
            let secure_channel = trace_read_lock!(self.secure_channel);
            secure_channel.should_renew_security_token()
        };
        if should_renew {
            // Take the issue lock, then re-check: many requests racing here
            // must produce exactly one renewal.
            let guard = self.issue_channel_lock.lock().await;
            let should_renew = {
                let secure_channel = trace_read_lock!(self.secure_channel);
                secure_channel.should_renew_security_token()
            };
            if should_renew {
                let request = self.state.begin_issue_or_renew_secure_channel(
                    SecurityTokenRequestType::Renew,
                    self.channel_lifetime,
                    OPEN_TIMEOUT,
                    send.clone(),
                );
                let response = request.send().await?;
                self.state.end_issue_or_renew_secure_channel(response)?;
            }
            drop(guard);
        }

        Request::new(request, send, timeout).send().await
    }

    /// Establish the connection, retrying per the retry policy. Returns the
    /// event loop of the open channel.
    pub async fn connect(&self) -> Result<SecureChannelEventLoop, StatusCode> {
        self.request_send.store(None);
        let mut backoff = self.session_retry_policy.new_backoff();
        loop {
            match self.connect_no_retry().await {
                Ok(event_loop) => break Ok(event_loop),
                Err(s) => {
                    let Some(delay) = backoff.next() else {
                        break Err(s);
                    };
                    tokio::time::sleep(delay).await
                }
            }
        }
    }

    /// Connect without retrying: transport preamble, then the OPN issue.
    pub async fn connect_no_retry(&self) -> Result<SecureChannelEventLoop, StatusCode> {
        {
            let mut secure_channel = trace_write_lock!(self.secure_channel);
            secure_channel.clear_security_token();
        }

        let (mut transport, send) = self.create_transport().await?;
        let request = self.state.begin_issue_or_renew_secure_channel(
            SecurityTokenRequestType::Issue,
            self.channel_lifetime,
            OPEN_TIMEOUT,
            send.clone(),
        );

        // The transport must be polled while the OPN is in flight
        let request_fut = request.send();
        tokio::pin!(request_fut);
        let response = loop {
            tokio::select! {
                r = &mut request_fut => break r?,
                r = transport.poll() => {
                    if let super::core::TransportPollResult::Closed(e) = r {
                        return Err(e);
                    }
                }
            }
        };

        self.request_send.store(Some(Arc::new(send)));
        self.state.end_issue_or_renew_secure_channel(response)?;

        Ok(SecureChannelEventLoop { transport })
    }

    async fn create_transport(
        &self,
    ) -> Result<(TcpTransport, tokio::sync::mpsc::Sender<OutgoingMessage>), StatusCode> {
        let endpoint_url = self.session_info.endpoint.endpoint_url.clone();
        let security_policy =
            SecurityPolicy::from_str(self.session_info.endpoint.security_policy_uri.as_ref())
                .unwrap_or(SecurityPolicy::Unknown);
        if security_policy == SecurityPolicy::Unknown {
            error!(
                "connect, security policy \"{}\" is unknown",
                self.session_info.endpoint.security_policy_uri.as_ref()
            );
            return Err(StatusCode::BadSecurityPolicyRejected);
        }

        {
            let certificate_store = trace_read_lock!(self.certificate_store);
            let cert = certificate_store.read_own_cert().ok();
            let key = certificate_store.read_own_pkey().ok();
            if security_policy != SecurityPolicy::None && (cert.is_none() || key.is_none()) {
                error!("Policy {} requires an application certificate", security_policy);
                return Err(StatusCode::BadConfigurationError);
            }
            let mut secure_channel = trace_write_lock!(self.secure_channel);
            secure_channel.set_cert(cert);
            secure_channel.set_private_key(key);
            secure_channel.set_security_policy(security_policy);
            secure_channel.set_security_mode(self.session_info.endpoint.security_mode);
            let _ = secure_channel
                .set_remote_cert_from_byte_string(&self.session_info.endpoint.server_certificate);
            debug!(
                "Connect with policy {} and mode {}",
                security_policy, self.session_info.endpoint.security_mode
            );
        }

        let (send, recv) = tokio::sync::mpsc::channel(MAX_INFLIGHT_MESSAGES);
        let transport = self
            .connector
            .connect(
                self.secure_channel.clone(),
                recv,
                self.transport_config.clone(),
                endpoint_url.as_ref(),
            )
            .await?;
        Ok((transport, send))
    }

    /// Queue a CloseSecureChannel. The server does not respond; the
    /// transport closes once the chunk has drained.
    pub async fn close_channel(&self) {
        let msg = CloseSecureChannelRequest {
            request_header: self.state.make_request_header(Duration::from_secs(60)),
        };
        let sender = self.request_send.load().as_deref().cloned();
        if let Some(sender) = sender {
            let request = Request::new(msg, sender, Duration::from_secs(60));
            if let Err(e) = request.send_no_response().await {
                error!("Failed to queue the close channel request: {}", e);
            }
        }
    }
}
