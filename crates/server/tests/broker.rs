mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Storage;
use modproxy_api::{
    ACTION_REQUEST, ACTION_RESPONSE, Broadcaster, EXTRA_BINDER, EXTRA_BUNDLE, EXTRA_PACKAGE,
    Envelope, FileProxyService, ProcessLiveness, ReceiverFilter,
};
use modproxy_bus::LocalBus;
use modproxy_server::{ResponseBroker, ServerConfig, ServiceRegistry};
use tokio::sync::mpsc;

const CLIENT: &str = "com.example.client";

fn broker(config: ServerConfig) -> ResponseBroker {
    let process = ProcessLiveness::new(config.provider_package.clone());
    ResponseBroker::new(Arc::new(ServiceRegistry::new(config, process)))
}

fn request(client: Option<&str>) -> Envelope {
    let envelope = Envelope::new(ACTION_REQUEST);
    match client {
        Some(client) => envelope.with_string(EXTRA_PACKAGE, client),
        None => envelope,
    }
}

#[test]
fn test_reply_is_addressed_to_requester() {
    let storage = Storage::new();
    let broker = broker(storage.config.clone());

    let reply = broker.on_receive(&request(Some(CLIENT))).unwrap();

    assert_eq!(reply.action, ACTION_RESPONSE);
    assert_eq!(reply.package.as_deref(), Some(CLIENT));
    let handle = reply.bundle(EXTRA_BUNDLE).unwrap().binder(EXTRA_BINDER).unwrap();
    assert!(handle.is_alive());
}

#[test]
fn test_service_is_created_lazily_and_reused() {
    let storage = Storage::new();
    let broker = broker(storage.config.clone());
    assert!(!broker.registry().is_initialized());

    let first = broker.on_receive(&request(Some(CLIENT))).unwrap();
    assert!(broker.registry().is_initialized());
    let second = broker.on_receive(&request(Some("com.example.other"))).unwrap();

    let first = first.bundle(EXTRA_BUNDLE).unwrap().binder(EXTRA_BINDER).unwrap();
    let second = second.bundle(EXTRA_BUNDLE).unwrap().binder(EXTRA_BINDER).unwrap();
    assert!(first.same_binder(second));
}

#[test]
fn test_requests_without_identity_or_foreign_action_are_dropped() {
    let storage = Storage::new();
    let broker = broker(storage.config.clone());

    assert!(broker.on_receive(&request(None)).is_none());
    assert!(
        broker
            .on_receive(&Envelope::new("com.example.OTHER").with_string(EXTRA_PACKAGE, CLIENT))
            .is_none()
    );
}

#[test]
fn test_returned_handle_serves_modules() {
    let storage = Storage::new();
    let module = storage.module("m/module.apk", b"dex");
    let broker = broker(storage.config.clone());

    let reply = broker.on_receive(&request(Some(CLIENT))).unwrap();
    let handle = reply.bundle(EXTRA_BUNDLE).unwrap().binder(EXTRA_BINDER).unwrap();

    assert!(handle.open_file(module.to_str().unwrap()).unwrap().is_some());
}

#[tokio::test]
async fn test_registered_broker_replies_only_to_requester() {
    let storage = Storage::new();
    let config = storage.config.clone();
    let bus = LocalBus::new();
    bus.grant(&config.provider_package, &config.permission);

    let provider = bus.endpoint(config.provider_package.clone());
    let client = bus.endpoint(CLIENT);
    let eavesdropper = bus.endpoint("com.example.eavesdropper");

    let permission = config.permission.clone();
    let provider_package = config.provider_package.clone();
    let _broker = broker(config).register(provider).unwrap();

    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    client
        .register(
            ReceiverFilter::new(ACTION_RESPONSE).with_permission(permission.clone()),
            client_tx,
        )
        .unwrap();
    let (spy_tx, mut spy_rx) = mpsc::unbounded_channel();
    eavesdropper
        .register(ReceiverFilter::new(ACTION_RESPONSE), spy_tx)
        .unwrap();

    client
        .send(
            request(Some(CLIENT)).with_package(provider_package.clone()),
            Some(&permission),
        )
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), client_rx.recv())
        .await
        .expect("reply timed out")
        .unwrap();
    assert_eq!(reply.sender, provider_package);
    assert!(reply.bundle(EXTRA_BUNDLE).is_some());
    assert!(spy_rx.try_recv().is_err());
}

#[test]
fn test_broker_shutdown_unregisters() {
    let storage = Storage::new();
    let config = storage.config.clone();
    let bus = LocalBus::new();
    let provider = bus.endpoint(config.provider_package.clone());

    let handle = broker(config).register(provider).unwrap();
    assert_eq!(bus.receiver_count(), 1);
    assert!(handle.is_running());

    handle.shutdown();
    assert_eq!(bus.receiver_count(), 0);
}

#[test]
fn test_provider_death_stops_worker() {
    let storage = Storage::new();
    let config = storage.config.clone();
    let bus = LocalBus::new();
    let provider = bus.endpoint(config.provider_package.clone());
    let broker = broker(config);
    let process = broker.registry().process().clone();

    let handle = broker.register(provider).unwrap();
    process.kill();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while handle.is_running() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!handle.is_running());
}
