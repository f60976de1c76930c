// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Live tally streaming for dashboards.
//!
//! This module provides read-only, non-authoritative tally notifications
//! via WebSocket connections. Events are derived from committed store
//! transactions; publishing happens strictly after commit, so a subscriber
//! never observes a count that is later rolled back.
//!
//! # Backpressure
//!
//! Delivery is fan-out over a bounded broadcast channel. A slow subscriber
//! never blocks the publisher or other subscribers: when its buffer
//! overflows, the oldest tally updates are dropped and delivery resumes at
//! the newest retained message. A late count is always superseded by the
//! next one, so freshness wins over completeness.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State as AxumState, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant, interval, sleep};
use tracing::{debug, error, info, warn};

use crate::AppState;

/// Maximum number of events buffered per subscriber. If a client cannot
/// keep up, its oldest events are dropped.
const EVENT_BUFFER_SIZE: usize = 256;

/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Streams with no client activity for this long are closed. A live client
/// answers pings with pongs, which count as activity.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on a single delivery to a subscriber. A client whose socket
/// stays full past this is treated as gone; it never stalls the publisher
/// or other subscribers.
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Live tally event types.
///
/// These are informational only; clients needing authoritative data query
/// the HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Connection confirmation (sent on initial connect).
    Connected {
        /// Server timestamp (ISO 8601).
        timestamp: String,
    },
    /// Current tally at subscription time, so late joiners see the right
    /// value before the first update arrives.
    Snapshot {
        /// The current run, when one is active today.
        run_id: Option<i64>,
        /// The current run's session code.
        session_code: Option<String>,
        /// The current tally (zero when there is no run).
        count: i64,
    },
    /// The tally for a run changed.
    TallyUpdate {
        /// The run whose tally changed.
        run_id: i64,
        /// The post-commit tally.
        count: i64,
    },
    /// A runner registered successfully.
    RegistrationSuccess {
        /// The run registered against.
        run_id: i64,
        /// The post-commit tally.
        count: i64,
        /// The runner that registered.
        runner_name: String,
    },
    /// A run stopped admitting registrations.
    SessionClosed {
        /// The deactivated run.
        run_id: i64,
    },
}

/// Broadcaster fanning tally events out to all connected dashboards.
///
/// This is a lightweight wrapper around `tokio::sync::broadcast`: publishing
/// is non-blocking, and each subscriber owns an independent bounded buffer.
#[derive(Clone)]
pub struct TallyBroadcaster {
    tx: broadcast::Sender<LiveEvent>,
}

impl TallyBroadcaster {
    /// Creates a new broadcaster.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    /// Broadcasts an event to all connected subscribers.
    ///
    /// Never blocks. If no subscriber is connected the event is silently
    /// dropped; dashboards can always re-poll the HTTP surface.
    pub fn broadcast(&self, event: &LiveEvent) {
        match self.tx.send(event.clone()) {
            Ok(count) => {
                debug!(?event, receivers = count, "Broadcast live event");
            }
            Err(_) => {
                debug!(?event, "No receivers for live event");
            }
        }
    }

    /// Subscribes to the event stream.
    ///
    /// Events sent before subscription are not received; the WebSocket
    /// handler compensates with a snapshot on connect.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }
}

impl Default for TallyBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles WebSocket upgrade requests for the live tally stream.
pub async fn live_events_handler(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serializes an event and sends it within the delivery bound; returns false
/// when the client is gone or too far behind to keep.
async fn send_event(
    sender: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    event: &LiveEvent,
) -> bool {
    let json: String = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            error!(?e, "Failed to serialize live event");
            return true;
        }
    };
    match tokio::time::timeout(SEND_TIMEOUT, sender.send(Message::Text(json.into()))).await {
        Ok(result) => result.is_ok(),
        Err(_) => {
            warn!("Subscriber send exceeded its bound, closing stream");
            false
        }
    }
}

/// Drives an individual subscriber connection.
///
/// Sends a connection confirmation and a tally snapshot, then forwards
/// broadcast events until the client disconnects, goes idle, or the stream
/// errors. Keepalive pings go out every 25 seconds; a connection with no
/// client activity for 60 seconds is closed.
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("Client connected to live tally stream");

    let (mut sender, mut receiver) = socket.split();
    let mut rx: broadcast::Receiver<LiveEvent> = state.live_events.subscribe();

    let connected: LiveEvent = LiveEvent::Connected {
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    if !send_event(&mut sender, &connected).await {
        warn!("Failed to send connection confirmation");
        return;
    }

    // Late joiners get the current tally before any updates.
    let snapshot: LiveEvent = match state.calendar.today(&state.store) {
        Ok(status) => LiveEvent::Snapshot {
            run_id: status.run.as_ref().map(|r| r.id),
            session_code: status
                .run
                .as_ref()
                .map(|r| r.session_code.value().to_string()),
            count: status.count,
        },
        Err(e) => {
            error!(error = %e, "Failed to load snapshot for new subscriber");
            LiveEvent::Snapshot {
                run_id: None,
                session_code: None,
                count: 0,
            }
        }
    };
    if !send_event(&mut sender, &snapshot).await {
        return;
    }

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.reset(); // the first tick fires immediately otherwise
    let idle_deadline = sleep(IDLE_TIMEOUT);
    tokio::pin!(idle_deadline);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged; oldest tally updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ping_interval.tick() => {
                let ping = sender.send(Message::Ping(axum::body::Bytes::new()));
                match tokio::time::timeout(SEND_TIMEOUT, ping).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => break,
                }
            }
            () = &mut idle_deadline => {
                info!("Closing idle live stream");
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                    idle_deadline.as_mut().reset(Instant::now() + IDLE_TIMEOUT);
                }
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                    // No commands are accepted over the stream.
                    warn!("Received unexpected message from subscriber, ignoring");
                    idle_deadline.as_mut().reset(Instant::now() + IDLE_TIMEOUT);
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Client sent close frame");
                    break;
                }
                Some(Err(e)) => {
                    error!(?e, "WebSocket receive error");
                    break;
                }
                None => break,
            },
        }
    }

    info!("Client disconnected from live tally stream");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcaster_starts_with_no_receivers() {
        let broadcaster = TallyBroadcaster::new();
        assert_eq!(broadcaster.tx.receiver_count(), 0);
    }

    #[test]
    fn broadcast_without_receivers_does_not_panic() {
        let broadcaster = TallyBroadcaster::new();
        broadcaster.broadcast(&LiveEvent::TallyUpdate {
            run_id: 1,
            count: 1,
        });
    }

    #[test]
    fn broadcast_reaches_a_receiver() {
        let broadcaster = TallyBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.broadcast(&LiveEvent::TallyUpdate {
            run_id: 7,
            count: 3,
        });

        match rx.try_recv() {
            Ok(LiveEvent::TallyUpdate { run_id: 7, count: 3 }) => {}
            other => panic!("Expected TallyUpdate, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_reaches_all_receivers_in_publish_order() {
        let broadcaster = TallyBroadcaster::new();
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        for count in 1..=3 {
            broadcaster.broadcast(&LiveEvent::TallyUpdate { run_id: 1, count });
        }

        for rx in [&mut rx1, &mut rx2] {
            for expected in 1..=3 {
                match rx.try_recv() {
                    Ok(LiveEvent::TallyUpdate { count, .. }) => assert_eq!(count, expected),
                    other => panic!("Expected TallyUpdate {expected}, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn slow_receivers_drop_oldest_and_keep_the_newest() {
        let broadcaster = TallyBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        let overflow: i64 = i64::try_from(EVENT_BUFFER_SIZE).expect("buffer fits i64") + 10;
        for count in 1..=overflow {
            broadcaster.broadcast(&LiveEvent::TallyUpdate { run_id: 1, count });
        }

        // The receiver first learns it lagged, then resumes at the oldest
        // retained event; the newest event is always retained.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
        let mut last: i64 = 0;
        while let Ok(LiveEvent::TallyUpdate { count, .. }) = rx.try_recv() {
            last = count;
        }
        assert_eq!(last, overflow);
    }

    #[test]
    fn event_serialization_is_tagged_snake_case() {
        let event = LiveEvent::RegistrationSuccess {
            run_id: 1,
            count: 2,
            runner_name: String::from("12345678"),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"type\":\"registration_success\""));
        assert!(json.contains("\"runner_name\":\"12345678\""));

        let snapshot = LiveEvent::Snapshot {
            run_id: None,
            session_code: None,
            count: 0,
        };
        let json = serde_json::to_string(&snapshot).expect("serialize");
        assert!(json.contains("\"type\":\"snapshot\""));
    }
}
