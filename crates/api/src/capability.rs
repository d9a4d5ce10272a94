//! Capability handles to a remote file proxy service.
//!
//! A [`CapabilityHandle`] is owned by the provider process and borrowed by
//! clients. Once the owning process dies ([`ProcessLiveness::kill`]) every call
//! through the handle fails and every linked death callback fires exactly once.

use std::collections::HashMap;
use std::fmt;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};

/// Calls a client may issue against the provider's file proxy.
pub trait FileProxyService: Send + Sync {
    /// Opens a module read-only. `Ok(None)` means the file does not exist.
    fn open_file(&self, raw_path: &str) -> ProxyResult<Option<OwnedFd>>;

    /// Modification time of a module. `Ok(None)` means the file does not exist.
    fn last_modified(&self, raw_path: &str) -> ProxyResult<Option<SystemTime>>;
}

type DeathCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct DeathRecipients {
    next_id: u64,
    callbacks: HashMap<u64, DeathCallback>,
}

/// Liveness of a process that owns capabilities.
pub struct ProcessLiveness {
    name: String,
    token: CancellationToken,
    recipients: Mutex<DeathRecipients>,
}

impl ProcessLiveness {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            token: CancellationToken::new(),
            recipients: Mutex::new(DeathRecipients::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Token cancelled when the process dies.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Marks the process dead and fires every linked callback once.
    ///
    /// Callbacks run on the calling thread after the recipient lock is released,
    /// so they may freely drop their own [`DeathLink`].
    pub fn kill(&self) {
        let callbacks: Vec<DeathCallback> = {
            let mut recipients = self.lock_recipients();
            if self.token.is_cancelled() {
                return;
            }
            self.token.cancel();
            recipients.callbacks.drain().map(|(_, cb)| cb).collect()
        };

        debug!(
            "Process {} died, notifying {} recipient(s)",
            self.name,
            callbacks.len()
        );
        for callback in callbacks {
            callback();
        }
    }

    pub fn recipient_count(&self) -> usize {
        self.lock_recipients().callbacks.len()
    }

    fn link(self: &Arc<Self>, callback: DeathCallback) -> ProxyResult<DeathLink> {
        let mut recipients = self.lock_recipients();
        // Checked under the lock so a concurrent kill() cannot miss this callback.
        if self.token.is_cancelled() {
            return Err(ProxyError::dead_object());
        }
        let id = recipients.next_id;
        recipients.next_id += 1;
        recipients.callbacks.insert(id, callback);
        Ok(DeathLink {
            owner: Arc::downgrade(self),
            id,
        })
    }

    fn unlink(&self, id: u64) {
        self.lock_recipients().callbacks.remove(&id);
    }

    fn lock_recipients(&self) -> MutexGuard<'_, DeathRecipients> {
        self.recipients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ProcessLiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLiveness")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Registration of a death callback. Dropping it unsubscribes the callback.
#[must_use = "dropping a DeathLink unregisters the callback"]
pub struct DeathLink {
    owner: Weak<ProcessLiveness>,
    id: u64,
}

impl Drop for DeathLink {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.unlink(self.id);
        }
    }
}

impl fmt::Debug for DeathLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeathLink").field("id", &self.id).finish()
    }
}

/// Opaque, revocable reference to a [`FileProxyService`] living in another process.
#[derive(Clone)]
pub struct CapabilityHandle {
    service: Arc<dyn FileProxyService>,
    owner: Arc<ProcessLiveness>,
}

impl CapabilityHandle {
    pub fn new(service: Arc<dyn FileProxyService>, owner: Arc<ProcessLiveness>) -> Self {
        Self { service, owner }
    }

    pub fn is_alive(&self) -> bool {
        self.owner.is_alive()
    }

    pub fn owner(&self) -> &Arc<ProcessLiveness> {
        &self.owner
    }

    /// Registers `callback` to run once when the owning process dies.
    ///
    /// Fails with a transport error if the owner is already dead.
    pub fn link_to_death<F>(&self, callback: F) -> ProxyResult<DeathLink>
    where
        F: FnOnce() + Send + 'static,
    {
        self.owner.link(Box::new(callback))
    }

    /// True when both handles refer to the same service instance.
    pub fn same_binder(&self, other: &CapabilityHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.service), Arc::as_ptr(&other.service))
    }

    fn ensure_alive(&self) -> ProxyResult<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(ProxyError::dead_object())
        }
    }
}

impl FileProxyService for CapabilityHandle {
    fn open_file(&self, raw_path: &str) -> ProxyResult<Option<OwnedFd>> {
        self.ensure_alive()?;
        self.service.open_file(raw_path)
    }

    fn last_modified(&self, raw_path: &str) -> ProxyResult<Option<SystemTime>> {
        self.ensure_alive()?;
        self.service.last_modified(raw_path)
    }
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("owner", &self.owner.name())
            .field("alive", &self.is_alive())
            .finish()
    }
}
