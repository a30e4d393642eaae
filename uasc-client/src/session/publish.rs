//! The publish pump: keeps a fixed number of publish requests parked at the
//! server and fans their responses out to subscribers.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, Stream, StreamExt};
use log::{debug, warn};

use uasc_types::{PublishResponse, StatusCode};

use super::Session;

/// What the publish pump did on one turn.
#[derive(Debug, Clone)]
pub enum PublishActivity {
    /// A notification message arrived and was broadcast, with its
    /// subscription id and sequence number.
    Publish(u32, u32),
    /// A keep alive publish response arrived.
    KeepAlive(u32),
    /// A publish request failed with the inner status. The session event
    /// loop decides whether this kills the connection.
    Failed(StatusCode),
}

impl PublishActivity {
    /// True if this failure means the connection is dead rather than one
    /// request having gone wrong.
    pub(crate) fn is_fatal(&self) -> bool {
        match self {
            PublishActivity::Failed(status) => !matches!(
                *status,
                StatusCode::BadTooManyPublishRequests
                    | StatusCode::BadNoSubscription
                    | StatusCode::BadRequestTimeout
            ),
            _ => false,
        }
    }
}

type PublishFuture = BoxFuture<'static, Result<Box<PublishResponse>, StatusCode>>;

/// Drives a fixed number of in-flight publish requests.
pub(crate) struct PublishEventLoop {
    session: Arc<Session>,
    inflight: FuturesUnordered<PublishFuture>,
    /// Lowered temporarily when the server complains about too many
    /// parked publish requests.
    target_inflight: usize,
}

impl PublishEventLoop {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        let target_inflight = session.config.publish_inflight.max(1);
        Self {
            session,
            inflight: FuturesUnordered::new(),
            target_inflight,
        }
    }

    fn spawn_publish(&self) -> PublishFuture {
        let session = self.session.clone();
        async move { session.publish().await }.boxed()
    }

    /// Run the pump as a stream of activity. The stream ends when the
    /// channel reports it is no longer connected, which during an orderly
    /// shutdown is silent.
    pub(crate) fn run(self) -> impl Stream<Item = PublishActivity> {
        futures::stream::unfold(self, |mut pump| async move {
            while pump.inflight.len() < pump.target_inflight {
                pump.inflight.push(pump.spawn_publish());
            }

            match pump.inflight.next().await {
                Some(Ok(response)) => {
                    let activity = pump.handle_response(&response);
                    // Fan out after the acknowledgements were recorded so a
                    // subscriber reacting immediately sees consistent state
                    let _ = pump.session.publish_tx.send(Arc::new(*response));
                    Some((activity, pump))
                }
                Some(Err(status)) => {
                    if status == StatusCode::BadTooManyPublishRequests
                        && pump.target_inflight > 1
                    {
                        pump.target_inflight -= 1;
                        debug!(
                            "Server rejected a parked publish, lowering in-flight count to {}",
                            pump.target_inflight
                        );
                    }
                    Some((PublishActivity::Failed(status), pump))
                }
                None => None,
            }
        })
    }

    fn handle_response(&mut self, response: &PublishResponse) -> PublishActivity {
        let message = &response.notification_message;
        if message.is_keep_alive() {
            return PublishActivity::KeepAlive(response.subscription_id);
        }
        // Record the newest sequence number for the subscription, it goes
        // out in the acknowledgement list of the next publish request
        let mut acks = self.session.publish_acks.lock();
        acks.insert(response.subscription_id, message.sequence_number);
        debug!(
            "Publish response for subscription {}, sequence {}",
            response.subscription_id, message.sequence_number
        );
        PublishActivity::Publish(response.subscription_id, message.sequence_number)
    }
}

impl Drop for PublishEventLoop {
    fn drop(&mut self) {
        if !self.inflight.is_empty() {
            warn!(
                "Publish pump dropped with {} requests in flight",
                self.inflight.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionConfig, SessionInfo};
    use crate::transport::tcp::TcpConnector;
    use crate::SessionRetryPolicy;
    use uasc_core::sync::RwLock;
    use uasc_crypto::CertificateStore;
    use uasc_types::{
        ApplicationDescription, DecodingOptions, EndpointDescription, NotificationMessage,
        ResponseHeader,
    };

    fn test_session() -> Arc<Session> {
        let (session, _event_loop) = Session::new(
            Arc::new(RwLock::new(CertificateStore::new())),
            SessionInfo::from(EndpointDescription {
                endpoint_url: "opc.tcp://localhost:4855/".into(),
                security_policy_uri: uasc_crypto::SecurityPolicy::None.to_uri().into(),
                ..Default::default()
            }),
            "test-session",
            ApplicationDescription::default(),
            SessionRetryPolicy::never(),
            DecodingOptions::test(),
            SessionConfig::default(),
            Box::new(TcpConnector),
        );
        session
    }

    fn publish_response(subscription_id: u32, sequence_number: u32) -> PublishResponse {
        PublishResponse {
            response_header: ResponseHeader::default(),
            subscription_id,
            available_sequence_numbers: None,
            more_notifications: false,
            notification_message: NotificationMessage {
                sequence_number,
                publish_time: uasc_types::DateTime::now(),
                notification_data: Some(vec![uasc_types::ExtensionObject::from_message(
                    uasc_types::DataChangeNotification {
                        monitored_items: None,
                        diagnostic_infos: None,
                    },
                )]),
            },
            results: None,
            diagnostic_infos: None,
        }
    }

    #[tokio::test]
    async fn acknowledgements_reference_the_last_received_sequence() {
        let session = test_session();
        let mut pump = PublishEventLoop::new(session.clone());

        // Responses for subscription 7 arriving out of order: 42, 41, 43
        for seq in [42, 41, 43] {
            pump.handle_response(&publish_response(7, seq));
        }
        let acks = session.publish_acks.lock();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks.get(&7), Some(&43));
    }

    #[tokio::test]
    async fn keep_alives_are_not_acknowledged() {
        let session = test_session();
        let mut pump = PublishEventLoop::new(session.clone());

        let keep_alive = PublishResponse {
            notification_message: NotificationMessage {
                sequence_number: 12,
                ..Default::default()
            },
            ..publish_response(3, 12)
        };
        let activity = pump.handle_response(&keep_alive);
        assert!(matches!(activity, PublishActivity::KeepAlive(3)));
        assert!(session.publish_acks.lock().is_empty());
    }

    #[tokio::test]
    async fn responses_broadcast_to_every_subscriber_exactly_once() {
        let session = test_session();
        let mut rx1 = session.subscribe_publish_responses();
        let mut rx2 = session.subscribe_publish_responses();

        let response = Arc::new(publish_response(7, 43));
        session.publish_tx.send(response.clone()).unwrap();

        assert_eq!(rx1.recv().await.unwrap().subscription_id, 7);
        assert_eq!(rx2.recv().await.unwrap().subscription_id, 7);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn fatal_and_recoverable_failures() {
        assert!(PublishActivity::Failed(StatusCode::BadConnectionClosed).is_fatal());
        assert!(!PublishActivity::Failed(StatusCode::BadTooManyPublishRequests).is_fatal());
        assert!(!PublishActivity::Failed(StatusCode::BadNoSubscription).is_fatal());
        assert!(!PublishActivity::Publish(1, 2).is_fatal());
    }
}
