//! The session event loop: drives the transport, the keep alive reads and
//! the publish pump, reconnecting with backoff when the connection drops.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use log::{error, warn};

use uasc_types::{
    NodeId, ReadValueId, StatusCode, TimestampsToReturn, VariableId, Variant,
};

use crate::retry::{ExponentialBackoff, SessionRetryPolicy};
use crate::transport::channel::SecureChannelEventLoop;
use crate::transport::core::TransportPollResult;

use super::{
    connect::SessionConnector,
    publish::{PublishActivity, PublishEventLoop},
    Session, SessionState,
};

/// Events observable while polling the session.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionPollResult {
    /// The transport made progress.
    Transport(TransportPollResult),
    /// The connection was lost with the inner status.
    ConnectionLost(StatusCode),
    /// A reconnect attempt failed with the inner status.
    ReconnectFailed(StatusCode),
    /// The session connected or reconnected.
    Connected,
    /// The session begins connecting.
    BeginConnect,
    /// A keep alive attempt completed.
    SessionActivity(SessionActivity),
    /// The publish pump made progress.
    Publish(PublishActivity),
}

/// Periodic keep alive outcomes.
#[derive(Debug, Clone)]
pub enum SessionActivity {
    /// The server responded to the keep alive read and reports running.
    KeepAliveSucceeded,
    /// The keep alive failed or the server is in a bad state.
    KeepAliveFailed(StatusCode),
}

struct ConnectedState {
    channel: SecureChannelEventLoop,
    keep_alive: BoxStream<'static, SessionActivity>,
    publish: BoxStream<'static, PublishActivity>,
    failed_keep_alive_count: u64,
}

enum SessionEventLoopState {
    Connected(ConnectedState),
    Connecting(SessionConnector, ExponentialBackoff, Instant),
    Disconnected,
}

/// The event loop that makes a session work. It must be polled, either
/// through [`SessionEventLoop::run`], [`SessionEventLoop::spawn`] or by
/// consuming the stream from [`SessionEventLoop::enter`].
#[must_use = "The session event loop must be started for the session to work"]
pub struct SessionEventLoop {
    inner: Arc<Session>,
    retry: SessionRetryPolicy,
}

impl SessionEventLoop {
    pub(crate) fn new(inner: Arc<Session>, retry: SessionRetryPolicy) -> Self {
        Self { inner, retry }
    }

    /// Run the event loop until the session closes or reconnecting gives
    /// up, returning how it ended.
    pub async fn run(self) -> StatusCode {
        let stream = self.enter();
        tokio::pin!(stream);
        loop {
            match stream.try_next().await {
                Ok(None) => break StatusCode::Good,
                Err(e) => break e,
                _ => (),
            }
        }
    }

    /// Run the event loop on a spawned task.
    pub fn spawn(self) -> tokio::task::JoinHandle<StatusCode> {
        tokio::task::spawn(self.run())
    }

    /// Start the event loop as a stream of session events. The stream ends
    /// with `None` on an orderly close and with an error when a reconnect
    /// attempt fails permanently.
    pub fn enter(self) -> impl Stream<Item = Result<SessionPollResult, StatusCode>> {
        futures::stream::try_unfold(
            (self, SessionEventLoopState::Disconnected),
            |(slf, state)| async move {
                let (event, state) = match state {
                    SessionEventLoopState::Connected(mut state) => {
                        tokio::select! {
                            r = state.channel.poll() => {
                                if let TransportPollResult::Closed(code) = r {
                                    warn!("Transport disconnected: {code}");
                                    let _ = slf.inner.state_watch_tx.send(SessionState::Disconnected);
                                    if !slf.inner.should_reconnect.load(Ordering::Relaxed) {
                                        return Ok(None);
                                    }
                                    (
                                        SessionPollResult::ConnectionLost(code),
                                        SessionEventLoopState::Disconnected,
                                    )
                                } else {
                                    (
                                        SessionPollResult::Transport(r),
                                        SessionEventLoopState::Connected(state),
                                    )
                                }
                            }
                            r = state.keep_alive.next() => {
                                let Some(r) = r else {
                                    error!("Keep alive loop ended unexpectedly");
                                    return Err(StatusCode::BadUnexpectedError);
                                };
                                match &r {
                                    SessionActivity::KeepAliveSucceeded => {
                                        state.failed_keep_alive_count = 0;
                                    }
                                    SessionActivity::KeepAliveFailed(status) => {
                                        state.failed_keep_alive_count += 1;
                                        warn!(
                                            "Keep alive failed ({} in a row): {status}",
                                            state.failed_keep_alive_count
                                        );
                                        let limit = slf.inner.config.max_failed_keep_alive_count;
                                        if limit != 0 && state.failed_keep_alive_count >= limit {
                                            error!("Too many failed keep alives, dropping the connection");
                                            let _ = slf.inner.state_watch_tx.send(SessionState::Disconnected);
                                            if !slf.inner.should_reconnect.load(Ordering::Relaxed) {
                                                return Ok(None);
                                            }
                                            return Ok(Some((
                                                SessionPollResult::ConnectionLost(*status),
                                                (slf, SessionEventLoopState::Disconnected),
                                            )));
                                        }
                                    }
                                }
                                (
                                    SessionPollResult::SessionActivity(r),
                                    SessionEventLoopState::Connected(state),
                                )
                            }
                            r = state.publish.next() => {
                                let Some(r) = r else {
                                    error!("Publish pump ended unexpectedly");
                                    return Err(StatusCode::BadUnexpectedError);
                                };
                                if r.is_fatal() {
                                    // A broken publish pipeline faults the
                                    // channel unless the session is closing
                                    let closing = !slf.inner.should_reconnect.load(Ordering::Relaxed)
                                        || *slf.inner.state_watch_rx.borrow() != SessionState::Connected;
                                    if closing {
                                        (
                                            SessionPollResult::Publish(r),
                                            SessionEventLoopState::Connected(state),
                                        )
                                    } else {
                                        let PublishActivity::Failed(status) = r else {
                                            unreachable!()
                                        };
                                        error!("Publish pipeline failed: {status}");
                                        let _ = slf.inner.state_watch_tx.send(SessionState::Disconnected);
                                        (
                                            SessionPollResult::ConnectionLost(status),
                                            SessionEventLoopState::Disconnected,
                                        )
                                    }
                                } else {
                                    (
                                        SessionPollResult::Publish(r),
                                        SessionEventLoopState::Connected(state),
                                    )
                                }
                            }
                        }
                    }
                    SessionEventLoopState::Disconnected => {
                        let connector = SessionConnector::new(slf.inner.clone());
                        let _ = slf.inner.state_watch_tx.send(SessionState::Connecting);
                        (
                            SessionPollResult::BeginConnect,
                            SessionEventLoopState::Connecting(
                                connector,
                                slf.retry.new_backoff(),
                                Instant::now(),
                            ),
                        )
                    }
                    SessionEventLoopState::Connecting(connector, mut backoff, next_try) => {
                        tokio::time::sleep_until(next_try.into()).await;

                        match connector.try_connect().await {
                            Ok(channel) => {
                                let _ = slf.inner.state_watch_tx.send(SessionState::Connected);
                                (
                                    SessionPollResult::Connected,
                                    SessionEventLoopState::Connected(ConnectedState {
                                        channel,
                                        keep_alive: keep_alive_stream(
                                            slf.inner.clone(),
                                            slf.inner.config.keep_alive_interval,
                                        )
                                        .boxed(),
                                        publish: PublishEventLoop::new(slf.inner.clone())
                                            .run()
                                            .boxed(),
                                        failed_keep_alive_count: 0,
                                    }),
                                )
                            }
                            Err(e) => {
                                warn!("Failed to connect to the server: {e}");
                                match backoff.next() {
                                    Some(delay) => (
                                        SessionPollResult::ReconnectFailed(e),
                                        SessionEventLoopState::Connecting(
                                            connector,
                                            backoff,
                                            Instant::now() + delay,
                                        ),
                                    ),
                                    None => return Err(e),
                                }
                            }
                        }
                    }
                };
                Ok(Some((event, (slf, state))))
            },
        )
    }
}

/// Periodically read Server_ServerStatus_State to prove the session alive.
fn keep_alive_stream(
    session: Arc<Session>,
    interval: std::time::Duration,
) -> impl Stream<Item = SessionActivity> {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    futures::stream::unfold((session, timer), |(session, mut timer)| async move {
        timer.tick().await;
        let result = session
            .read(
                &[ReadValueId::from(NodeId::from(
                    VariableId::Server_ServerStatus_State,
                ))],
                TimestampsToReturn::Server,
                1.0,
            )
            .await;

        let activity = match result.map(|mut values| values.pop()) {
            // ServerState of 0 is Running
            Ok(Some(value)) => match value.value {
                Some(Variant::Int32(0)) => SessionActivity::KeepAliveSucceeded,
                Some(Variant::Int32(state)) => {
                    warn!("Keep alive read a non-running server state {state}");
                    SessionActivity::KeepAliveFailed(StatusCode::BadServerHalted)
                }
                _ => SessionActivity::KeepAliveFailed(StatusCode::BadUnknownResponse),
            },
            Ok(None) => SessionActivity::KeepAliveFailed(StatusCode::BadUnknownResponse),
            Err(e) => SessionActivity::KeepAliveFailed(e),
        };
        Some((activity, (session, timer)))
    })
}
