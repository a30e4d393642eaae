//! The session layer: session establishment and activation over a secure
//! channel, the keep alive loop and the publish pump.

mod connect;
mod event_loop;
mod publish;
mod services;

pub use event_loop::{SessionActivity, SessionEventLoop, SessionPollResult};
pub use publish::PublishActivity;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use hashbrown::HashMap;
use log::error;

use uasc_core::sync::{Mutex, RwLock};
use uasc_crypto::{CertificateStore, PrivateKey, X509};
use uasc_types::{
    ApplicationDescription, ByteString, ContextOwned, DecodingOptions, EndpointDescription,
    IntegerId, NamespaceMap, NodeId, PublishResponse, RequestHeader, ResponseHeader, StatusCode,
    UAString,
};

use crate::{
    retry::SessionRetryPolicy,
    transport::{channel::AsyncSecureChannel, connect::Connector, tcp::TransportConfiguration},
};

use uasc_core::ResponseMessage;

/// The endpoint, user identity and locales a session connects with.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// The endpoint to connect to.
    pub endpoint: EndpointDescription,
    /// The identity presented on ActivateSession.
    pub user_identity_token: IdentityToken,
    /// Preferred locales, most preferred first.
    pub preferred_locales: Vec<String>,
}

impl From<EndpointDescription> for SessionInfo {
    fn from(endpoint: EndpointDescription) -> Self {
        Self {
            endpoint,
            user_identity_token: IdentityToken::Anonymous,
            preferred_locales: Vec::new(),
        }
    }
}

/// Optional hook that resolves the user identity for an endpoint when the
/// session activates, e.g. from a credential store. Without one the session
/// uses the static identity in its [`SessionInfo`].
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Produce the identity to activate with for this endpoint.
    async fn user_identity_token(&self, endpoint: &EndpointDescription) -> IdentityToken;
}

/// The user identity a session activates with.
#[derive(Debug, Clone)]
pub enum IdentityToken {
    /// No user identity.
    Anonymous,
    /// A user name and password.
    UserName(String, String),
    /// A token issued by an external authority, e.g. a JWT.
    IssuedToken(Vec<u8>),
    /// An X.509 certificate and its private key.
    X509(Box<X509>, Box<PrivateKey>),
}

/// Observable connection state of the session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionState {
    /// Not connected.
    Disconnected,
    /// Connected and activated.
    Connected,
    /// Connection attempt in progress.
    Connecting,
}

/// Tunables of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout applied to ordinary service calls.
    pub request_timeout: Duration,
    /// Timeout applied to publish requests, typically much longer since
    /// the server parks them.
    pub publish_timeout: Duration,
    /// The session timeout requested from the server, in milliseconds.
    pub session_timeout: f64,
    /// Lifetime requested for secure channel tokens, in milliseconds.
    pub channel_lifetime: u32,
    /// Interval between keep alive reads.
    pub keep_alive_interval: Duration,
    /// Keep alive failures tolerated before the connection is dropped.
    pub max_failed_keep_alive_count: u64,
    /// Number of publish requests kept in flight.
    pub publish_inflight: usize,
    /// Publishing interval requested for the keep alive subscription, in
    /// milliseconds.
    pub default_publishing_interval: f64,
    /// Transport limits.
    pub transport: TransportConfiguration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(60),
            session_timeout: 60_000.0,
            channel_lifetime: 60_000,
            keep_alive_interval: Duration::from_secs(10),
            max_failed_keep_alive_count: 3,
            publish_inflight: 3,
            default_publishing_interval: 1000.0,
            transport: TransportConfiguration::default(),
        }
    }
}

/// Resolve a bad service result in a response header into an error.
pub(crate) fn process_service_result(response_header: &ResponseHeader) -> Result<(), StatusCode> {
    if response_header.service_result.is_bad() {
        Err(response_header.service_result)
    } else {
        Ok(())
    }
}

/// Turn an unexpected response into the status code to report.
pub(crate) fn process_unexpected_response(response: ResponseMessage) -> StatusCode {
    match response {
        ResponseMessage::ServiceFault(fault) => {
            error!(
                "Received a service fault {} for the request",
                fault.response_header.service_result
            );
            fault.response_header.service_result
        }
        _ => {
            error!("Received an unexpected response to the request");
            StatusCode::BadUnknownResponse
        }
    }
}

/// An OPC UA client session over a secure channel.
///
/// The session itself is a passive object; the [`SessionEventLoop`]
/// returned next to it must be polled for anything to happen.
pub struct Session {
    pub(crate) channel: AsyncSecureChannel,
    pub(crate) state_watch_rx: tokio::sync::watch::Receiver<SessionState>,
    pub(crate) state_watch_tx: tokio::sync::watch::Sender<SessionState>,
    pub(crate) certificate_store: Arc<RwLock<CertificateStore>>,
    pub(crate) session_id: Arc<ArcSwap<NodeId>>,
    pub(crate) auth_token: Arc<ArcSwap<NodeId>>,
    pub(crate) session_info: SessionInfo,
    pub(crate) session_name: UAString,
    pub(crate) application_description: ApplicationDescription,
    pub(crate) config: SessionConfig,
    /// The nonce sent in CreateSession, signed by the server.
    pub(crate) session_nonce: Mutex<ByteString>,
    /// Latest received notification sequence number per subscription,
    /// acknowledged in the next publish request.
    pub(crate) publish_acks: Mutex<HashMap<u32, u32>>,
    /// Publish responses are re-broadcast here.
    pub(crate) publish_tx: tokio::sync::broadcast::Sender<Arc<PublishResponse>>,
    pub(crate) should_reconnect: AtomicBool,
    pub(crate) identity_provider: Mutex<Option<Arc<dyn IdentityProvider>>>,
    pub(crate) encoding_context: Arc<RwLock<ContextOwned>>,
}

impl Session {
    /// Create a session and its event loop for the given endpoint.
    pub fn new(
        certificate_store: Arc<RwLock<CertificateStore>>,
        session_info: SessionInfo,
        session_name: impl Into<UAString>,
        application_description: ApplicationDescription,
        session_retry_policy: SessionRetryPolicy,
        decoding_options: DecodingOptions,
        config: SessionConfig,
        connector: Box<dyn Connector>,
    ) -> (Arc<Self>, SessionEventLoop) {
        let auth_token: Arc<ArcSwap<NodeId>> = Arc::default();
        let (state_watch_tx, state_watch_rx) =
            tokio::sync::watch::channel(SessionState::Disconnected);
        let (publish_tx, _) = tokio::sync::broadcast::channel(100);

        let encoding_context = Arc::new(RwLock::new(ContextOwned::new(
            NamespaceMap::new(),
            decoding_options,
        )));

        let session = Arc::new(Session {
            channel: AsyncSecureChannel::new(
                certificate_store.clone(),
                session_info.clone(),
                session_retry_policy.clone(),
                auth_token.clone(),
                config.transport.clone(),
                connector,
                config.channel_lifetime,
                encoding_context.clone(),
            ),
            state_watch_rx,
            state_watch_tx,
            certificate_store,
            session_id: Arc::new(ArcSwap::new(Arc::new(NodeId::null()))),
            auth_token,
            session_info,
            session_name: session_name.into(),
            application_description,
            config,
            session_nonce: Mutex::new(ByteString::null()),
            publish_acks: Mutex::new(HashMap::new()),
            publish_tx,
            should_reconnect: AtomicBool::new(true),
            identity_provider: Mutex::new(None),
            encoding_context,
        });

        let event_loop = SessionEventLoop::new(session.clone(), session_retry_policy);
        (session, event_loop)
    }

    /// The server assigned session id.
    pub fn server_session_id(&self) -> NodeId {
        (**self.session_id.load()).clone()
    }

    /// Subscribe to the stream of publish responses. Every response is
    /// delivered to every subscriber once; slow subscribers lose the
    /// oldest responses first.
    pub fn subscribe_publish_responses(
        &self,
    ) -> tokio::sync::broadcast::Receiver<Arc<PublishResponse>> {
        self.publish_tx.subscribe()
    }

    /// Take the next request handle.
    pub fn request_handle(&self) -> IntegerId {
        self.channel.request_handle()
    }

    /// Make a request header with the session's default timeout.
    pub(crate) fn make_request_header(&self) -> RequestHeader {
        self.channel.make_request_header(self.config.request_timeout)
    }

    /// Wait until the session is connected (or disconnected when
    /// `connected` is false).
    async fn wait_for_state(&self, connected: bool) -> bool {
        let mut rx = self.state_watch_rx.clone();
        let result = rx
            .wait_for(|s| {
                if connected {
                    *s == SessionState::Connected
                } else {
                    *s == SessionState::Disconnected
                }
            })
            .await;
        result.is_ok()
    }

    /// Wait for the session to be connected and activated.
    pub async fn wait_for_connection(&self) -> bool {
        self.wait_for_state(true).await
    }

    /// Disable automatic reconnects, making the event loop end on the next
    /// disconnect.
    pub fn disable_reconnects(&self) {
        self.should_reconnect.store(false, Ordering::Relaxed);
    }

    /// Enable automatic reconnects. On by default.
    pub fn enable_reconnects(&self) {
        self.should_reconnect.store(true, Ordering::Relaxed);
    }

    /// Close the session and the channel, then wait until disconnected.
    pub async fn disconnect(&self) -> Result<(), StatusCode> {
        self.should_reconnect.store(false, Ordering::Relaxed);
        let mut result = Ok(());
        if let Err(e) = self.close_session().await {
            result = Err(e);
            error!("Failed to close session, the channel will be closed anyway: {e}");
        }
        self.channel.close_channel().await;
        self.wait_for_state(false).await;
        result
    }

    /// Get a reference to the channel.
    pub fn channel(&self) -> &AsyncSecureChannel {
        &self.channel
    }

    /// Install the namespace table on the encoding context.
    pub fn set_namespaces(&self, namespaces: NamespaceMap) {
        *self.encoding_context.write().namespaces_mut() = namespaces;
    }

    /// Install an identity provider, consulted on every activation instead
    /// of the static identity token.
    pub fn set_identity_provider(&self, provider: Arc<dyn IdentityProvider>) {
        *self.identity_provider.lock() = Some(provider);
    }
}
