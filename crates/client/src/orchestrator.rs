//! Client side of the file proxy discovery protocol.
//!
//! The provider's handle is obtained by broadcasting a request and waiting for an
//! addressed reply on a dedicated worker thread. The handle is cached until the
//! provider process dies; the next call then runs discovery again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use modproxy_api::{
    ACTION_REQUEST, ACTION_RESPONSE, Broadcaster, CapabilityHandle, DeathLink, EXTRA_BINDER,
    EXTRA_BUNDLE, EXTRA_PACKAGE, Envelope, ProxyError, ProxyResult, ReceiverFilter, Registration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;

struct CachedService {
    handle: CapabilityHandle,
    _death_link: DeathLink,
}

#[derive(Default)]
struct ServiceCache {
    /// Bumped on every successful discovery so a late death callback of an
    /// older handle never clears a newer one.
    generation: u64,
    current: Option<CachedService>,
    /// Set while one caller runs discovery; the others wait on `discovered`.
    in_flight: bool,
}

pub struct RequestOrchestrator {
    transport: Arc<dyn Broadcaster>,
    config: ClientConfig,
    cache: Arc<Mutex<ServiceCache>>,
    discovered: Condvar,
    discoveries: AtomicU64,
}

impl RequestOrchestrator {
    pub fn new(transport: Arc<dyn Broadcaster>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            cache: Arc::new(Mutex::new(ServiceCache::default())),
            discovered: Condvar::new(),
            discoveries: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of discovery exchanges started so far.
    pub fn discovery_count(&self) -> u64 {
        self.discoveries.load(Ordering::SeqCst)
    }

    pub fn has_cached_service(&self) -> bool {
        lock(&self.cache).current.is_some()
    }

    /// Returns the cached provider handle, running discovery if there is none.
    ///
    /// Blocks for at most the configured discovery timeout. Only one discovery
    /// runs at a time; concurrent callers share its outcome instead of queueing
    /// their own. Failures are not retried; callers that need resilience call again.
    pub fn get_service(&self) -> ProxyResult<CapabilityHandle> {
        let deadline = Instant::now() + self.config.discovery_timeout();
        let mut cache = lock(&self.cache);
        let mut waited = false;
        loop {
            if let Some(cached) = &cache.current {
                if cached.handle.is_alive() {
                    return Ok(cached.handle.clone());
                }
                cache.current = None;
            }
            if !cache.in_flight {
                if waited {
                    // The discovery we waited for came back empty
                    return Err(ProxyError::ServiceUnavailable);
                }
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("Gave up waiting for a concurrent file proxy request");
                return Err(ProxyError::ServiceUnavailable);
            }
            cache = self
                .discovered
                .wait_timeout(cache, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            waited = true;
        }

        cache.in_flight = true;
        drop(cache);

        let discovered = self.request_service();

        let mut cache = lock(&self.cache);
        cache.in_flight = false;
        let result = discovered.and_then(|handle| self.install(&mut cache, handle));
        drop(cache);
        self.discovered.notify_all();
        result
    }

    fn install(
        &self,
        cache: &mut ServiceCache,
        handle: CapabilityHandle,
    ) -> ProxyResult<CapabilityHandle> {
        cache.generation += 1;
        // Linked before caching so a provider dying right now cannot leave a stale entry
        let death_link = handle
            .link_to_death(clear_on_death(Arc::downgrade(&self.cache), cache.generation))
            .map_err(|e| {
                warn!("Unable to link to file proxy service death: {}", e);
                ProxyError::Transport(format!("link to death failed: {e}"))
            })?;

        cache.current = Some(CachedService {
            handle: handle.clone(),
            _death_link: death_link,
        });
        Ok(handle)
    }

    /// Drops the cached handle, if any.
    pub fn invalidate(&self) {
        lock(&self.cache).current = None;
    }

    fn request_service(&self) -> ProxyResult<CapabilityHandle> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);

        // Register first so the reply cannot arrive before anyone listens.
        // The filter requires the provider's permission, so other apps can't
        // inject code by replying with a fake service.
        let (inbox, replies) = mpsc::unbounded_channel();
        let registration = Registration::new(
            self.transport.clone(),
            ReceiverFilter::new(ACTION_RESPONSE).with_permission(self.config.permission.clone()),
            inbox,
        )?;

        let worker = DiscoveryWorker::spawn(
            &self.config.worker_name,
            self.config.discovery_timeout(),
            replies,
        )?;

        debug!(
            "Requesting file proxy service from {}",
            self.config.provider_package
        );
        let request = Envelope::new(ACTION_REQUEST)
            .with_package(self.config.provider_package.clone())
            .with_string(EXTRA_PACKAGE, self.transport.identity());
        self.transport
            .send(request, Some(&self.config.permission))?;

        let outcome = worker.join();
        drop(registration);

        match outcome? {
            Outcome::Reply(handle) => Ok(handle),
            Outcome::Malformed(reason) => Err(ProxyError::MalformedReply(reason)),
            Outcome::TimedOut => {
                debug!("File proxy request timed out");
                Err(ProxyError::ServiceUnavailable)
            }
            Outcome::Stopped => Err(ProxyError::ServiceUnavailable),
        }
    }
}

/// Death callback clearing the cache, unless a newer discovery replaced the entry.
fn clear_on_death(
    cache: Weak<Mutex<ServiceCache>>,
    generation: u64,
) -> impl FnOnce() + Send + 'static {
    move || {
        debug!("File proxy service has died");
        if let Some(cache) = cache.upgrade() {
            let mut cache = lock(&cache);
            if cache.generation == generation {
                cache.current = None;
            }
        }
    }
}

fn lock(cache: &Mutex<ServiceCache>) -> MutexGuard<'_, ServiceCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Outcome {
    Reply(CapabilityHandle),
    Malformed(String),
    TimedOut,
    Stopped,
}

/// Dedicated thread waiting for one discovery reply.
///
/// Dropping the worker cancels and joins it; its inbox goes away with the
/// thread, so nothing is processed once the exchange is over.
struct DiscoveryWorker {
    cancel: CancellationToken,
    thread: Option<JoinHandle<Outcome>>,
}

impl DiscoveryWorker {
    fn spawn(
        name: &str,
        timeout: Duration,
        mut replies: mpsc::UnboundedReceiver<Envelope>,
    ) -> ProxyResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| ProxyError::Transport(format!("discovery runtime: {e}")))?;

        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    tokio::select! {
                        biased;
                        _ = worker_cancel.cancelled() => Outcome::Stopped,
                        reply = tokio::time::timeout(timeout, next_reply(&mut replies)) => {
                            reply.unwrap_or(Outcome::TimedOut)
                        }
                    }
                })
            })
            .map_err(|e| ProxyError::Transport(format!("discovery worker: {e}")))?;

        Ok(Self {
            cancel,
            thread: Some(thread),
        })
    }

    fn join(mut self) -> ProxyResult<Outcome> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| ProxyError::Transport("discovery worker panicked".to_string())),
            None => Ok(Outcome::Stopped),
        }
    }
}

impl Drop for DiscoveryWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn next_reply(replies: &mut mpsc::UnboundedReceiver<Envelope>) -> Outcome {
    while let Some(envelope) = replies.recv().await {
        if envelope.action != ACTION_RESPONSE {
            continue;
        }
        return parse_reply(&envelope);
    }
    Outcome::Stopped
}

fn parse_reply(envelope: &Envelope) -> Outcome {
    let Some(bundle) = envelope.bundle(EXTRA_BUNDLE) else {
        return Outcome::Malformed(format!("missing {EXTRA_BUNDLE}"));
    };
    match bundle.binder(EXTRA_BINDER) {
        Some(handle) => Outcome::Reply(handle.clone()),
        None => Outcome::Malformed(format!("missing {EXTRA_BINDER}")),
    }
}
