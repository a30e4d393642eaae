//! Session connection: runs the channel open and the all-or-nothing session
//! establishment sequence.

use std::sync::Arc;

use log::error;

use uasc_types::StatusCode;

use crate::transport::channel::SecureChannelEventLoop;
use crate::transport::core::TransportPollResult;

use super::Session;

/// Runs the session establishment sequence on a freshly opened channel.
pub(crate) struct SessionConnector {
    inner: Arc<Session>,
}

impl SessionConnector {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { inner: session }
    }

    /// Open the channel and establish the session. Any failing step aborts
    /// the whole attempt and closes the transport.
    pub(crate) async fn try_connect(&self) -> Result<SecureChannelEventLoop, StatusCode> {
        let mut event_loop = self.inner.channel.connect().await?;

        // The transport must keep being polled while the handshake runs
        let setup = self.setup_session();
        tokio::pin!(setup);
        let result = loop {
            tokio::select! {
                r = &mut setup => break r,
                r = event_loop.poll() => {
                    if let TransportPollResult::Closed(e) = r {
                        return Err(e);
                    }
                }
            }
        };

        match result {
            Ok(()) => Ok(event_loop),
            Err(e) => {
                error!("Session establishment failed: {}", e);
                self.inner.channel.close_channel().await;
                // Drain the transport so the close actually goes out
                loop {
                    if let TransportPollResult::Closed(_) = event_loop.poll().await {
                        break;
                    }
                }
                Err(e)
            }
        }
    }

    // The establishment sequence is all or nothing: create, activate,
    // read the server tables, then the keep alive subscription.
    async fn setup_session(&self) -> Result<(), StatusCode> {
        self.inner.create_session().await?;
        self.inner.activate_session().await?;
        self.inner.read_server_tables().await?;

        // Forget acknowledgements of the previous connection
        self.inner.publish_acks.lock().clear();

        // The keep alive subscription gives the publish pump something to
        // drive even before the application creates its own subscriptions
        self.inner
            .create_subscription(
                self.inner.config.default_publishing_interval,
                100,
                10,
                0,
            )
            .await?;
        Ok(())
    }
}
