//! Fan-out of check messages to real-time subscribers.
//!
//! The hub keeps one bounded queue per connected client. Results are
//! best-effort: a full queue drops the result for that client only, and a
//! closed queue removes the client. Terminal messages (`check-complete`,
//! `check-error`) use slots held back from results, and wait for the client
//! to drain when even those are taken. There is no history for late joiners.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use medpred_core::{CheckErrorPayload, ConnectionId, HubMessage, RunId};

/// A registered subscriber.
struct ClientConnection {
    /// Queue feeding this client's socket task.
    tx: mpsc::Sender<HubMessage>,

    /// When the client registered.
    connected_at: DateTime<Utc>,
}

/// Queue slots per client that only terminal messages may use.
pub const TERMINAL_RESERVE: usize = 4;

/// How long a terminal message waits for room in a full client queue.
pub const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Receiving half handed to a connection handler.
pub struct Subscription {
    /// Identifier to pass back to [`BroadcastHub::unsubscribe`].
    pub id: ConnectionId,

    /// Messages broadcast while registered.
    pub receiver: mpsc::Receiver<HubMessage>,
}

impl Subscription {
    /// Turn the subscription into a stream that unsubscribes when dropped.
    pub fn into_stream(self, hub: Arc<BroadcastHub>) -> SubscriptionStream {
        SubscriptionStream {
            inner: ReceiverStream::new(self.receiver),
            id: Some(self.id),
            hub,
        }
    }
}

/// Hub messages for one client; leaving the hub on drop.
pub struct SubscriptionStream {
    inner: ReceiverStream<HubMessage>,
    id: Option<ConnectionId>,
    hub: Arc<BroadcastHub>,
}

impl SubscriptionStream {
    /// Connection id of this subscriber.
    pub fn id(&self) -> Option<&ConnectionId> {
        self.id.as_ref()
    }
}

impl Stream for SubscriptionStream {
    type Item = HubMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else { return };
        let hub = self.hub.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    hub.unsubscribe(&id).await;
                });
            }
            // Without a runtime the closed queue is pruned on the next publish.
            Err(_) => debug!(connection_id = %id, "No runtime to unsubscribe on drop"),
        }
    }
}

/// Set of connected real-time clients.
pub struct BroadcastHub {
    clients: RwLock<HashMap<ConnectionId, ClientConnection>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl BroadcastHub {
    /// Create a hub whose per-client queues hold `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new client.
    pub async fn subscribe(&self) -> Subscription {
        let id = ConnectionId::generate();
        let (tx, receiver) = mpsc::channel(self.capacity + TERMINAL_RESERVE);

        let mut clients = self.clients.write().await;
        clients.insert(
            id.clone(),
            ClientConnection {
                tx,
                connected_at: Utc::now(),
            },
        );
        info!(connection_id = %id, clients = clients.len(), "Client connected");

        Subscription { id, receiver }
    }

    /// Remove a client. Returns false if it was already gone.
    pub async fn unsubscribe(&self, id: &ConnectionId) -> bool {
        let mut clients = self.clients.write().await;
        match clients.remove(id) {
            Some(client) => {
                let connected_for = Utc::now().signed_duration_since(client.connected_at);
                info!(
                    connection_id = %id,
                    connected_secs = connected_for.num_seconds(),
                    clients = clients.len(),
                    "Client disconnected"
                );
                true
            }
            None => false,
        }
    }

    /// Number of registered clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Messages dropped because a client queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver one decoded worker event as `check-result`.
    pub async fn broadcast(&self, run_id: &RunId, event: Value) -> usize {
        self.publish(HubMessage::CheckResult {
            run_id: run_id.clone(),
            data: event,
        })
        .await
    }

    /// Deliver the terminal `check-error` signal of a run.
    pub async fn broadcast_error(&self, run_id: &RunId, details: CheckErrorPayload) -> usize {
        self.publish(HubMessage::CheckError {
            run_id: run_id.clone(),
            data: details,
        })
        .await
    }

    /// Deliver the terminal `check-complete` signal of a run.
    pub async fn broadcast_complete(&self, run_id: &RunId) -> usize {
        self.publish(HubMessage::CheckComplete {
            run_id: run_id.clone(),
        })
        .await
    }

    /// Deliver a message to every client registered right now.
    ///
    /// Returns the number of clients that accepted it. A terminal message
    /// queued behind a full client counts as accepted.
    pub async fn publish(&self, message: HubMessage) -> usize {
        let terminal = message.is_terminal();
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let clients = self.clients.read().await;
            for (id, client) in clients.iter() {
                if !terminal && client.tx.capacity() <= TERMINAL_RESERVE {
                    if client.tx.is_closed() {
                        closed.push(id.clone());
                    } else {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(connection_id = %id, kind = message.kind(), "Client queue full, dropping message");
                    }
                    continue;
                }

                match client.tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(message)) => {
                        delivered += 1;
                        self.deliver_later(id.clone(), client.tx.clone(), message);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id.clone()),
                }
            }
        }

        if !closed.is_empty() {
            let mut clients = self.clients.write().await;
            for id in &closed {
                clients.remove(id);
                debug!(connection_id = %id, "Pruned closed client");
            }
        }

        debug!(
            kind = message.kind(),
            run_id = %message.run_id(),
            delivered,
            "Broadcast message"
        );
        delivered
    }
}

impl BroadcastHub {
    /// Wait in the background for room to deliver a terminal message.
    fn deliver_later(&self, id: ConnectionId, tx: mpsc::Sender<HubMessage>, message: HubMessage) {
        debug!(connection_id = %id, kind = message.kind(), "Client queue full, waiting to deliver");
        tokio::spawn(async move {
            match tx.send_timeout(message, TERMINAL_SEND_TIMEOUT).await {
                Ok(()) => {}
                Err(mpsc::error::SendTimeoutError::Timeout(message)) => {
                    warn!(connection_id = %id, kind = message.kind(), "Client did not drain its queue, dropping message");
                }
                Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                    debug!(connection_id = %id, "Client left before terminal message");
                }
            }
        });
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let hub = BroadcastHub::new(8);
        let mut a = hub.subscribe().await;
        let mut b = hub.subscribe().await;
        let run_id = RunId::new("run-1");

        assert_eq!(hub.broadcast(&run_id, json!({"row": 1})).await, 2);

        for sub in [&mut a, &mut b] {
            let msg = sub.receiver.recv().await.unwrap();
            assert_eq!(
                msg,
                HubMessage::CheckResult {
                    run_id: run_id.clone(),
                    data: json!({"row": 1})
                }
            );
        }
    }

    #[tokio::test]
    async fn test_no_backlog_for_late_joiners() {
        let hub = BroadcastHub::new(8);
        let run_id = RunId::new("run-1");
        assert_eq!(hub.broadcast(&run_id, json!(1)).await, 0);

        let mut late = hub.subscribe().await;
        hub.broadcast_complete(&run_id).await;

        let msg = late.receiver.recv().await.unwrap();
        assert_eq!(msg.kind(), "check-complete");
        assert!(late.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribed_client_gets_nothing_further() {
        let hub = BroadcastHub::new(8);
        let mut leaving = hub.subscribe().await;
        let mut staying = hub.subscribe().await;
        let run_id = RunId::new("run-1");

        hub.broadcast(&run_id, json!({"n": 1})).await;
        assert!(hub.unsubscribe(&leaving.id).await);
        assert!(!hub.unsubscribe(&leaving.id).await);

        assert_eq!(hub.broadcast(&run_id, json!({"n": 2})).await, 1);
        hub.broadcast_complete(&run_id).await;

        assert_eq!(leaving.receiver.recv().await.unwrap().kind(), "check-result");
        assert!(leaving.receiver.recv().await.is_none());

        let mut kinds = Vec::new();
        while let Ok(msg) = staying.receiver.try_recv() {
            kinds.push(msg.kind());
        }
        assert_eq!(kinds, ["check-result", "check-result", "check-complete"]);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let hub = BroadcastHub::new(8);
        let gone = hub.subscribe().await;
        let _kept = hub.subscribe().await;
        drop(gone);

        assert_eq!(hub.broadcast(&RunId::new("r"), json!(null)).await, 1);
        assert_eq!(hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_terminal_message_survives_full_queue() {
        let hub = BroadcastHub::new(4);
        let mut slow = hub.subscribe().await;
        let run_id = RunId::new("r");

        for n in 0..10 {
            hub.broadcast(&run_id, json!(n)).await;
        }
        assert_eq!(hub.dropped_count(), 6);
        assert_eq!(hub.broadcast_complete(&run_id).await, 1);

        let mut kinds = Vec::new();
        while let Ok(msg) = slow.receiver.try_recv() {
            kinds.push(msg.kind());
        }
        assert_eq!(kinds.len(), 5);
        assert_eq!(kinds.iter().filter(|k| **k == "check-result").count(), 4);
        assert_eq!(kinds.last(), Some(&"check-complete"));
    }

    #[tokio::test]
    async fn test_terminal_message_waits_when_reserve_is_used() {
        let hub = BroadcastHub::new(1);
        let mut slow = hub.subscribe().await;

        hub.broadcast(&RunId::new("a"), json!(0)).await;
        for n in 0..=TERMINAL_RESERVE {
            hub.broadcast_complete(&RunId::new(format!("run-{}", n))).await;
        }
        assert_eq!(hub.dropped_count(), 0);

        let mut completes = 0;
        while completes < TERMINAL_RESERVE + 1 {
            let msg = tokio::time::timeout(Duration::from_secs(5), slow.receiver.recv())
                .await
                .unwrap()
                .unwrap();
            if msg.kind() == "check-complete" {
                completes += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_subscription_stream_unsubscribes_on_drop() {
        let hub = Arc::new(BroadcastHub::new(8));
        let stream = hub.subscribe().await.into_stream(hub.clone());
        assert!(stream.id().is_some());
        assert_eq!(hub.client_count().await, 1);

        drop(stream);
        for _ in 0..100 {
            if hub.client_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let hub = BroadcastHub::new(1);
        let mut slow = hub.subscribe().await;
        let run_id = RunId::new("r");

        assert_eq!(hub.broadcast(&run_id, json!(1)).await, 1);
        assert_eq!(hub.broadcast(&run_id, json!(2)).await, 0);
        assert_eq!(hub.dropped_count(), 1);

        let first = slow.receiver.recv().await.unwrap();
        assert_eq!(
            first,
            HubMessage::CheckResult {
                run_id,
                data: json!(1)
            }
        );
    }
}
