use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::ProxyResult;

/// Delivery target of a registered receiver; owned by the receiver's worker context.
pub type Inbox = mpsc::UnboundedSender<Envelope>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receiver#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverFilter {
    pub action: String,
    /// Only envelopes from senders holding this permission are delivered.
    pub required_permission: Option<String>,
}

impl ReceiverFilter {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            required_permission: None,
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = Some(permission.into());
        self
    }
}

/// Broadcast-style pub/sub transport, bound to the identity of one process.
pub trait Broadcaster: Send + Sync {
    /// Package identity of this endpoint. Stamped as `sender` on every send.
    fn identity(&self) -> &str;

    fn register(&self, filter: ReceiverFilter, inbox: Inbox) -> ProxyResult<RegistrationId>;

    fn unregister(&self, id: RegistrationId);

    /// Delivers `envelope` at most once to each matching receiver. With
    /// `required_permission`, only receivers whose owner holds it qualify.
    fn send(&self, envelope: Envelope, required_permission: Option<&str>) -> ProxyResult<()>;
}

/// Receiver registration that unregisters itself when dropped.
#[must_use = "dropping a Registration unregisters the receiver"]
pub struct Registration {
    transport: Arc<dyn Broadcaster>,
    id: RegistrationId,
}

impl Registration {
    pub fn new(
        transport: Arc<dyn Broadcaster>,
        filter: ReceiverFilter,
        inbox: Inbox,
    ) -> ProxyResult<Self> {
        let id = transport.register(filter, inbox)?;
        Ok(Self { transport, id })
    }

    pub fn id(&self) -> RegistrationId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        debug!("Unregistering {}", self.id);
        self.transport.unregister(self.id);
    }
}
