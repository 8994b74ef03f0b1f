//! Per-client connection and recognition-session registry.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;
use voxline_types::ClientId;
use voxline_voice::{RecognitionSession, VoiceError};

/// A frame queued for one client's WebSocket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Binary(Bytes),
    Text(String),
}

type RecognitionSlot = Arc<Mutex<Option<Arc<RecognitionSession>>>>;

struct ClientEntry {
    connection_id: Uuid,
    sender: mpsc::Sender<OutboundFrame>,
    /// Holding the slot lock serializes start/stop for one client.
    recognition: RecognitionSlot,
}

/// Tracks connected clients: their outbound channel and at most one active
/// recognition session each.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    clients: Arc<RwLock<HashMap<ClientId, ClientEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `client_id` and returns its connection ID.
    ///
    /// A previous connection for the same client is replaced; its
    /// recognition session, if any, is stopped.
    pub async fn add_connection(
        &self,
        client_id: ClientId,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> Uuid {
        let connection_id = Uuid::new_v4();
        let entry = ClientEntry {
            connection_id,
            sender,
            recognition: RecognitionSlot::default(),
        };

        let replaced = self.clients.write().await.insert(client_id, entry);
        if let Some(old) = replaced {
            tracing::info!(
                client_id = %client_id,
                replaced = %old.connection_id,
                "replaced existing connection"
            );
            stop_slot(&old.recognition).await;
        }
        connection_id
    }

    /// Whether `connection_id` is still the registered connection for the
    /// client.
    pub async fn is_current(&self, client_id: ClientId, connection_id: Uuid) -> bool {
        self.clients
            .read()
            .await
            .get(&client_id)
            .is_some_and(|entry| entry.connection_id == connection_id)
    }

    /// Removes the client's entry if `connection_id` still owns it, stopping
    /// any recognition session left in it. Returns whether it was removed.
    pub async fn remove_connection(&self, client_id: ClientId, connection_id: Uuid) -> bool {
        let removed = {
            let mut clients = self.clients.write().await;
            match clients.get(&client_id) {
                Some(entry) if entry.connection_id == connection_id => clients.remove(&client_id),
                _ => None, // stale or already removed
            }
        };

        match removed {
            Some(entry) => {
                stop_slot(&entry.recognition).await;
                tracing::debug!(client_id = %client_id, "connection removed");
                true
            }
            None => false,
        }
    }

    pub async fn is_connected(&self, client_id: ClientId) -> bool {
        self.clients.read().await.contains_key(&client_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Queues a frame for the client without waiting.
    ///
    /// Returns `false` when the client is gone or its queue is full; the
    /// frame is dropped in both cases.
    pub async fn send(&self, client_id: ClientId, frame: OutboundFrame) -> bool {
        let clients = self.clients.read().await;
        let Some(entry) = clients.get(&client_id) else {
            tracing::debug!(client_id = %client_id, "dropping frame for disconnected client");
            return false;
        };

        match entry.sender.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    client_id = %client_id,
                    "dropping frame for slow consumer: {}",
                    e
                );
                false
            }
        }
    }

    /// Queues a frame for the client, waiting while its queue is full.
    ///
    /// Frames sent this way are never dropped for a slow consumer, so
    /// ordered streams such as response audio arrive whole. Returns `false`
    /// when the client is gone or its writer has shut down.
    pub async fn send_async(&self, client_id: ClientId, frame: OutboundFrame) -> bool {
        let sender = self
            .clients
            .read()
            .await
            .get(&client_id)
            .map(|entry| entry.sender.clone());
        let Some(sender) = sender else {
            tracing::debug!(client_id = %client_id, "dropping frame for disconnected client");
            return false;
        };

        match sender.send(frame).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(client_id = %client_id, "dropping frame for closed writer");
                false
            }
        }
    }

    /// Starts `session` as the client's recognition session, stopping the
    /// previous one first. On failure the client is left without a session.
    pub async fn start_recognition(
        &self,
        client_id: ClientId,
        session: RecognitionSession,
    ) -> Result<(), VoiceError> {
        let slot = self.slot(client_id).await.ok_or_else(|| {
            VoiceError::InvalidState(format!("client {} is not connected", client_id))
        })?;

        let mut current = slot.lock().await;
        if let Some(previous) = current.take() {
            tracing::info!(client_id = %client_id, "restarting recognition");
            previous.stop().await;
        }

        session.start().await?;
        *current = Some(Arc::new(session));
        Ok(())
    }

    /// Stops the client's recognition session. Returns whether one existed.
    pub async fn stop_recognition(&self, client_id: ClientId) -> bool {
        match self.slot(client_id).await {
            Some(slot) => stop_slot(&slot).await,
            None => false,
        }
    }

    /// The client's active recognition session, if any.
    pub async fn recognition(&self, client_id: ClientId) -> Option<Arc<RecognitionSession>> {
        let slot = self.slot(client_id).await?;
        let session = slot.lock().await.clone();
        session
    }

    /// Routes an audio chunk into the client's recognition session.
    ///
    /// Returns `false` when the client has no active session.
    pub async fn push_audio(&self, client_id: ClientId, chunk: Bytes) -> bool {
        match self.recognition(client_id).await {
            Some(session) => session.push(chunk).await,
            None => {
                tracing::trace!(client_id = %client_id, "no recognition session, dropping audio");
                false
            }
        }
    }

    async fn slot(&self, client_id: ClientId) -> Option<RecognitionSlot> {
        self.clients
            .read()
            .await
            .get(&client_id)
            .map(|entry| entry.recognition.clone())
    }
}

async fn stop_slot(slot: &RecognitionSlot) -> bool {
    let session = slot.lock().await.take();
    match session {
        Some(session) => {
            session.stop().await;
            true
        }
        None => false,
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}
