//! In-process implementation of [`Broadcaster`].
//!
//! Every process gets its own [`LocalEndpoint`] from a shared [`LocalBus`]. The
//! bus stamps the endpoint's package on every envelope it sends, so senders
//! cannot forge their identity, and enforces permission filters on both sides.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use modproxy_api::{
    Broadcaster, Envelope, Inbox, ProxyError, ProxyResult, ReceiverFilter, RegistrationId,
};
use tracing::{debug, trace};

struct Receiver {
    owner: String,
    filter: ReceiverFilter,
    inbox: Inbox,
}

#[derive(Default)]
struct BusInner {
    permissions: DashMap<String, HashSet<String>>,
    receivers: DashMap<RegistrationId, Receiver>,
    next_id: AtomicU64,
    delivered: AtomicU64,
}

impl BusInner {
    fn holds(&self, package: &str, permission: &str) -> bool {
        self.permissions
            .get(package)
            .is_some_and(|granted| granted.contains(permission))
    }
}

/// Shared in-memory broadcast bus
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `permission` to `package`.
    pub fn grant(&self, package: &str, permission: &str) {
        self.inner
            .permissions
            .entry(package.to_string())
            .or_default()
            .insert(permission.to_string());
    }

    pub fn holds(&self, package: &str, permission: &str) -> bool {
        self.inner.holds(package, permission)
    }

    /// Creates the transport endpoint of the process identified by `package`.
    pub fn endpoint(&self, package: impl Into<String>) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            package: package.into(),
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Number of live receiver registrations across all endpoints.
    pub fn receiver_count(&self) -> usize {
        self.inner.receivers.len()
    }

    /// Total number of envelopes handed to an inbox.
    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::SeqCst)
    }
}

/// A process's view of the [`LocalBus`].
pub struct LocalEndpoint {
    package: String,
    inner: Arc<BusInner>,
    closed: AtomicBool,
}

impl LocalEndpoint {
    /// Detaches the endpoint: its receivers are dropped and further sends fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inner
            .receivers
            .retain(|_, receiver| receiver.owner != self.package);
    }

    fn ensure_open(&self) -> ProxyResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ProxyError::Transport(format!(
                "endpoint {} is closed",
                self.package
            )))
        } else {
            Ok(())
        }
    }
}

impl Broadcaster for LocalEndpoint {
    fn identity(&self) -> &str {
        &self.package
    }

    fn register(&self, filter: ReceiverFilter, inbox: Inbox) -> ProxyResult<RegistrationId> {
        self.ensure_open()?;
        let id = RegistrationId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        debug!("{} registered {} for {}", self.package, id, filter.action);
        self.inner.receivers.insert(
            id,
            Receiver {
                owner: self.package.clone(),
                filter,
                inbox,
            },
        );
        Ok(id)
    }

    fn unregister(&self, id: RegistrationId) {
        self.inner.receivers.remove(&id);
    }

    fn send(&self, mut envelope: Envelope, required_permission: Option<&str>) -> ProxyResult<()> {
        self.ensure_open()?;
        envelope.sender = self.package.clone();

        // Collect first so no map shard lock is held while pushing into inboxes.
        let targets: Vec<(RegistrationId, Inbox)> = self
            .inner
            .receivers
            .iter()
            .filter(|entry| {
                let receiver = entry.value();
                receiver.filter.action == envelope.action
                    && envelope
                        .package
                        .as_deref()
                        .is_none_or(|package| package == receiver.owner)
                    && required_permission
                        .is_none_or(|permission| self.inner.holds(&receiver.owner, permission))
                    && receiver
                        .filter
                        .required_permission
                        .as_deref()
                        .is_none_or(|permission| self.inner.holds(&self.package, permission))
            })
            .map(|entry| (*entry.key(), entry.value().inbox.clone()))
            .collect();

        for (id, inbox) in targets {
            if inbox.send(envelope.clone()).is_ok() {
                self.inner.delivered.fetch_add(1, Ordering::SeqCst);
                trace!("{} -> {}: {}", self.package, id, envelope.action);
            } else {
                debug!("Dropping {} for {}: inbox closed", envelope.action, id);
            }
        }
        Ok(())
    }
}
