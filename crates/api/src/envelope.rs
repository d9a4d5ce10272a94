//! Payload container carried by the pub/sub transport.

use std::collections::BTreeMap;

use crate::capability::CapabilityHandle;

/// Action of a discovery request sent to the provider.
pub const ACTION_REQUEST: &str = "modproxy.action.REQUEST_DYNAMITE_FILE_PROXY";
/// Action of the provider's reply carrying the service handle.
pub const ACTION_RESPONSE: &str = "modproxy.action.DYNAMITE_FILE_PROXY";

/// Request extra: identity of the requesting package.
pub const EXTRA_PACKAGE: &str = "service_client_package";
/// Reply extra: [`Bundle`] wrapping the service handle.
pub const EXTRA_BUNDLE: &str = "service_bundle";
/// Bundle key of the service handle.
pub const EXTRA_BINDER: &str = "service_binder";

/// Container for capability handles; plain envelopes cannot carry them directly.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    binders: BTreeMap<String, CapabilityHandle>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_binder(&mut self, key: impl Into<String>, handle: CapabilityHandle) {
        self.binders.insert(key.into(), handle);
    }

    pub fn binder(&self, key: &str) -> Option<&CapabilityHandle> {
        self.binders.get(key)
    }
}

#[derive(Debug, Clone)]
pub enum Extra {
    Str(String),
    Bundle(Bundle),
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub action: String,
    /// Identity of the sending package, stamped by the transport on send.
    pub sender: String,
    /// When set, only receivers owned by this package get the envelope.
    pub package: Option<String>,
    extras: BTreeMap<String, Extra>,
}

impl Envelope {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            sender: String::new(),
            package: None,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), Extra::Str(value.into()));
        self
    }

    pub fn with_bundle(mut self, key: impl Into<String>, bundle: Bundle) -> Self {
        self.extras.insert(key.into(), Extra::Bundle(bundle));
        self
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.extras.get(key) {
            Some(Extra::Str(value)) => Some(value),
            _ => None,
        }
    }

    pub fn bundle(&self, key: &str) -> Option<&Bundle> {
        match self.extras.get(key) {
            Some(Extra::Bundle(bundle)) => Some(bundle),
            _ => None,
        }
    }
}
