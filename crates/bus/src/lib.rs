pub mod local;

pub use local::{LocalBus, LocalEndpoint};
