//! Provider-side responder to file proxy discovery requests.

use std::sync::Arc;
use std::thread::JoinHandle;

use modproxy_api::{
    ACTION_REQUEST, ACTION_RESPONSE, Broadcaster, Bundle, EXTRA_BINDER, EXTRA_BUNDLE,
    EXTRA_PACKAGE, Envelope, ProxyError, ProxyResult, ReceiverFilter, Registration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::ServiceRegistry;

pub struct ResponseBroker {
    registry: Arc<ServiceRegistry>,
}

impl ResponseBroker {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Builds the reply to one inbound request, or `None` to drop it.
    ///
    /// The reply is addressed to the requesting package only. An open reply
    /// could be answered by any receiver, and any sender could race it with a
    /// forged handle.
    pub fn on_receive(&self, request: &Envelope) -> Option<Envelope> {
        if request.action != ACTION_REQUEST {
            return None;
        }

        let handle = self.registry.handle();

        let Some(client_package) = request.string(EXTRA_PACKAGE) else {
            debug!("Dropping file proxy request from {}: no client package", request.sender);
            return None;
        };

        let mut bundle = Bundle::new();
        bundle.put_binder(EXTRA_BINDER, handle);

        Some(
            Envelope::new(ACTION_RESPONSE)
                .with_package(client_package)
                .with_bundle(EXTRA_BUNDLE, bundle),
        )
    }

    /// Registers the broker on `transport` and serves requests on a dedicated
    /// worker thread until the returned handle is dropped or the provider dies.
    pub fn register(self, transport: Arc<dyn Broadcaster>) -> ProxyResult<BrokerHandle> {
        let config = self.registry.config().clone();
        debug!(
            "Registering file proxy provider from {}",
            transport.identity()
        );

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| ProxyError::Transport(format!("broker runtime: {e}")))?;

        let (inbox, mut requests) = mpsc::unbounded_channel::<Envelope>();
        let registration =
            Registration::new(transport.clone(), ReceiverFilter::new(ACTION_REQUEST), inbox)?;

        let cancel = self.registry.process().token().child_token();
        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        tokio::select! {
                            biased;
                            _ = worker_cancel.cancelled() => break,
                            request = requests.recv() => {
                                let Some(request) = request else { break };
                                let Some(reply) = self.on_receive(&request) else { continue };
                                debug!(
                                    "Sending file proxy binder to {}",
                                    reply.package.as_deref().unwrap_or_default()
                                );
                                if let Err(e) = transport.send(reply, None) {
                                    warn!("Failed to send file proxy reply: {}", e);
                                }
                            }
                        }
                    }
                });
            })
            .map_err(|e| ProxyError::Transport(format!("broker worker: {e}")))?;

        Ok(BrokerHandle {
            registration: Some(registration),
            cancel,
            worker: Some(worker),
        })
    }
}

/// Running broker. Dropping it unregisters the receiver and stops the worker.
pub struct BrokerHandle {
    registration: Option<Registration>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl BrokerHandle {
    pub fn shutdown(mut self) {
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn stop(&mut self) {
        self.registration.take();
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("File proxy broker worker panicked");
            }
        }
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
