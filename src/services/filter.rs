use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;

use crate::domains::envelope::{Envelope, MessageKind};

pub const DEFAULT_PROCESSED_CAPACITY: usize = 1024;

pub type SharedFilter = Arc<Mutex<DeliveryFilter>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    /// Our own dispatch coming back through the hub.
    SelfEcho,
    /// Already surfaced once.
    Duplicate,
    /// Targeted at another participant.
    NotAddressed,
    UnknownKind,
}

impl Verdict {
    pub fn is_deliver(self) -> bool {
        matches!(self, Self::Deliver)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Sent,
    Delivered,
}

/// Processed-set plus recipient policy: an envelope is surfaced at most once,
/// never when we sent it, and only when it is a broadcast or addressed to us.
/// The set is an LRU, so a long session keeps only the most recent ids.
pub struct DeliveryFilter {
    local_id: String,
    processed: LruCache<String, Origin>,
}

impl DeliveryFilter {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self::with_capacity(local_id, DEFAULT_PROCESSED_CAPACITY)
    }

    pub fn with_capacity(local_id: impl Into<String>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            local_id: local_id.into(),
            processed: LruCache::new(capacity),
        }
    }

    pub fn shared(self) -> SharedFilter {
        Arc::new(Mutex::new(self))
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn set_local_id(&mut self, local_id: impl Into<String>) {
        self.local_id = local_id.into();
    }

    /// Must run before the envelope leaves, so the echo is already filterable.
    pub fn record_sent(&mut self, message_id: &str) {
        self.processed.put(message_id.to_string(), Origin::Sent);
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.processed.contains(message_id)
    }

    pub fn verdict(&self, envelope: &Envelope) -> Verdict {
        match self.processed.peek(envelope.message_id()) {
            Some(Origin::Sent) => return Verdict::SelfEcho,
            Some(Origin::Delivered) => return Verdict::Duplicate,
            None => {}
        }
        if envelope.kind() == MessageKind::Unknown {
            return Verdict::UnknownKind;
        }
        if !envelope.is_addressed_to(&self.local_id) {
            return Verdict::NotAddressed;
        }
        Verdict::Deliver
    }

    /// Like [`verdict`](Self::verdict), but remembers delivered ids.
    pub fn accept(&mut self, envelope: &Envelope) -> Verdict {
        let verdict = self.verdict(envelope);
        if verdict.is_deliver() {
            self.processed
                .put(envelope.message_id().to_string(), Origin::Delivered);
        }
        verdict
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}
