//! Label transport: where centroid labeling actually runs
//!
//! Architecture:
//! - Pure computation: [`handle_message`] turns a request into a reply
//! - [`ThreadWorker`]: dedicated thread fed through mpsc channels
//! - [`InlineWorker`]: same computation on the caller's thread
//!
//! Every message carries a [`RequestId`]. Replies may arrive out of order;
//! the thread worker parks them until their caller asks. Failures travel
//! back as data (`WorkerPayload::Error`), never as panics across threads.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use super::themes::{label_clusters, ThemeTable};
use super::{ClusterError, ClusterResult};
use crate::storage::GeoCoordinate;

/// Correlation id pairing a reply with its request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Centroids to label, with the center reported for each
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRequest {
    pub centroids: Vec<Vec<f32>>,
    pub centers: Vec<GeoCoordinate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMessage {
    pub request_id: RequestId,
    pub request: LabelRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReply {
    pub request_id: RequestId,
    pub payload: WorkerPayload,
}

/// Reply body. A failure carries its display message under `error` and
/// the typed error under `cause`, so `{"error": message}` readers still work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerPayload {
    Clusters(Vec<ClusterResult>),
    Error { error: String, cause: ClusterError },
}

impl WorkerPayload {
    pub fn failed(cause: ClusterError) -> Self {
        WorkerPayload::Error {
            error: cause.to_string(),
            cause,
        }
    }

    fn into_result(self) -> Result<Vec<ClusterResult>, ClusterError> {
        match self {
            WorkerPayload::Clusters(clusters) => Ok(clusters),
            WorkerPayload::Error { cause, .. } => Err(cause),
        }
    }
}

/// Run one request against the theme table
pub fn handle_message(table: &ThemeTable, message: WorkerMessage) -> WorkerReply {
    let WorkerMessage {
        request_id,
        request,
    } = message;

    let payload = match label_clusters(&request.centroids, &request.centers, table) {
        Ok(clusters) => WorkerPayload::Clusters(clusters),
        Err(error) => WorkerPayload::failed(error),
    };
    WorkerReply {
        request_id,
        payload,
    }
}

/// Which transport carries label requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Thread,
    Inline,
}

/// Submit-then-wait access to centroid labeling
///
/// Every submitted id must be passed to exactly one of [`wait`] or
/// [`abandon`]; until then its reply is held by the transport. Requests
/// cannot be cancelled once submitted, only their replies discarded.
///
/// [`wait`]: LabelTransport::wait
/// [`abandon`]: LabelTransport::abandon
pub trait LabelTransport: Send + Sync {
    fn submit(&self, request: LabelRequest) -> Result<RequestId, ClusterError>;

    /// Block until the reply for `id` is available
    fn wait(&self, id: RequestId) -> Result<Vec<ClusterResult>, ClusterError>;

    /// Drop the reply for `id`, now or whenever it arrives
    fn abandon(&self, id: RequestId);

    fn label(&self, request: LabelRequest) -> Result<Vec<ClusterResult>, ClusterError> {
        let id = self.submit(request)?;
        self.wait(id)
    }
}

/// Build the transport selected in configuration
pub fn transport_for(
    kind: TransportKind,
    table: ThemeTable,
) -> Result<Box<dyn LabelTransport>, ClusterError> {
    Ok(match kind {
        TransportKind::Thread => Box::new(ThreadWorker::spawn(table)?),
        TransportKind::Inline => Box::new(InlineWorker::new(table)),
    })
}

// =============================================================================
// Inline
// =============================================================================

/// Labels on the calling thread at submit time
#[derive(Debug)]
pub struct InlineWorker {
    table: ThemeTable,
    next_id: AtomicU64,
    ready: Mutex<HashMap<RequestId, WorkerPayload>>,
}

impl InlineWorker {
    pub fn new(table: ThemeTable) -> Self {
        Self {
            table,
            next_id: AtomicU64::new(0),
            ready: Mutex::new(HashMap::new()),
        }
    }
}

impl LabelTransport for InlineWorker {
    fn submit(&self, request: LabelRequest) -> Result<RequestId, ClusterError> {
        let request_id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let reply = handle_message(
            &self.table,
            WorkerMessage {
                request_id,
                request,
            },
        );
        self.ready.lock().insert(reply.request_id, reply.payload);
        Ok(request_id)
    }

    fn wait(&self, id: RequestId) -> Result<Vec<ClusterResult>, ClusterError> {
        self.ready
            .lock()
            .remove(&id)
            .ok_or_else(|| ClusterError::Worker(format!("unknown request {}", id.0)))?
            .into_result()
    }

    fn abandon(&self, id: RequestId) {
        self.ready.lock().remove(&id);
    }
}

impl InlineWorker {
    /// Replies submitted but not yet collected
    pub fn held(&self) -> usize {
        self.ready.lock().len()
    }
}

// =============================================================================
// Thread
// =============================================================================

struct Replies {
    receiver: Receiver<WorkerReply>,
    /// Submitted but not yet returned to a caller
    pending: HashSet<RequestId>,
    /// Received out of order, waiting for their caller
    parked: HashMap<RequestId, WorkerPayload>,
}

/// Labels on a dedicated background thread
pub struct ThreadWorker {
    sender: Mutex<Option<Sender<WorkerMessage>>>,
    replies: Mutex<Replies>,
    next_id: AtomicU64,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadWorker {
    /// Start the worker thread
    pub fn spawn(table: ThemeTable) -> Result<Self, ClusterError> {
        let (request_tx, request_rx) = mpsc::channel::<WorkerMessage>();
        let (reply_tx, reply_rx) = mpsc::channel::<WorkerReply>();

        let handle = thread::Builder::new()
            .name("eventsphere-labeler".to_string())
            .spawn(move || {
                for message in request_rx {
                    let reply = handle_message(&table, message);
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                tracing::debug!("label worker stopped");
            })
            .map_err(|e| ClusterError::Worker(format!("failed to start worker thread: {}", e)))?;

        Ok(Self {
            sender: Mutex::new(Some(request_tx)),
            replies: Mutex::new(Replies {
                receiver: reply_rx,
                pending: HashSet::new(),
                parked: HashMap::new(),
            }),
            next_id: AtomicU64::new(0),
            handle: Some(handle),
        })
    }
}

impl LabelTransport for ThreadWorker {
    fn submit(&self, request: LabelRequest) -> Result<RequestId, ClusterError> {
        let request_id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));

        // Register before sending so a fast reply is never unexpected
        self.replies.lock().pending.insert(request_id);

        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender
                .send(WorkerMessage {
                    request_id,
                    request,
                })
                .is_ok(),
            None => false,
        };

        if !sent {
            self.replies.lock().pending.remove(&request_id);
            tracing::error!(request = request_id.0, "label worker is not running");
            return Err(ClusterError::Worker("worker thread is not running".to_string()));
        }
        Ok(request_id)
    }

    fn wait(&self, id: RequestId) -> Result<Vec<ClusterResult>, ClusterError> {
        let mut replies = self.replies.lock();

        loop {
            if let Some(payload) = replies.parked.remove(&id) {
                replies.pending.remove(&id);
                return payload.into_result();
            }
            if !replies.pending.contains(&id) {
                return Err(ClusterError::Worker(format!("unknown request {}", id.0)));
            }

            let reply = replies.receiver.recv().map_err(|_| {
                tracing::error!(request = id.0, "label worker exited before replying");
                ClusterError::Worker("worker thread exited".to_string())
            })?;

            if reply.request_id == id {
                replies.pending.remove(&id);
                return reply.payload.into_result();
            }
            if replies.pending.contains(&reply.request_id) {
                replies.parked.insert(reply.request_id, reply.payload);
            } else {
                tracing::debug!(request = reply.request_id.0, "dropping abandoned reply");
            }
        }
    }

    fn abandon(&self, id: RequestId) {
        let mut replies = self.replies.lock();
        replies.pending.remove(&id);
        replies.parked.remove(&id);
    }
}

impl ThreadWorker {
    /// Requests submitted but not yet waited for or abandoned, and replies
    /// parked for them
    pub fn held(&self) -> (usize, usize) {
        let replies = self.replies.lock();
        (replies.pending.len(), replies.parked.len())
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        self.sender.lock().take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("label worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for ThreadWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWorker")
            .field("pending", &self.replies.lock().pending.len())
            .finish()
    }
}
