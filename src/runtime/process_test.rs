use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{PipeState, ProcessLoop, StateCell, Statistics};
use crate::endpoint::Endpoint;
use crate::fixtures::{self, wait_for, CaptureEndpoint, FailingEndpoint, IDENTITY_SCRIPT};
use crate::listener::{Listener, MemoryListener};
use crate::store::{profile_from_entity, PipeConfig};

const URI: &str = "memory://sensors";

struct LoopHarness {
    listener: Arc<MemoryListener>,
    capture: Arc<CaptureEndpoint>,
    state: Arc<StateCell>,
    statistics: Arc<Statistics>,
    shutdown: broadcast::Sender<()>,
    root_shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Spawn a processing loop over the in-memory transport, optionally with a failing
/// endpoint alongside the capturing one.
fn spawn_loop(with_failing_endpoint: bool) -> LoopHarness {
    let mut entities = vec![fixtures::endpoint_entity("capture-1")];
    if with_failing_endpoint {
        entities.push(fixtures::endpoint_entity("failing-1"));
    }
    let config = PipeConfig {
        uri: URI.to_string(),
        listener: fixtures::listener_entity("listener-1"),
        endpoints: entities,
        profile: profile_from_entity(&fixtures::profile_entity("identity", "identity", IDENTITY_SCRIPT))
            .expect("expected profile to parse"),
        tags: BTreeMap::new(),
    };

    let capture = Arc::new(CaptureEndpoint::default());
    let mut endpoints: HashMap<String, Arc<dyn Endpoint>> = HashMap::new();
    endpoints.insert("capture-1".to_string(), capture.clone());
    if with_failing_endpoint {
        endpoints.insert("failing-1".to_string(), Arc::new(FailingEndpoint));
    }

    let listener = Arc::new(MemoryListener::new(10));
    let channel = listener.new_channel(URI).expect("expected channel to open");
    let state = Arc::new(StateCell::new(PipeState::Running));
    let statistics = Arc::new(Statistics::new(&config));
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let (root_shutdown, root_rx) = broadcast::channel(1);
    let process = ProcessLoop::new(
        config,
        Duration::from_secs(1),
        state.clone(),
        statistics.clone(),
        endpoints,
        channel,
        shutdown_rx,
        root_rx,
    );
    let handle = process.spawn();
    LoopHarness {
        listener,
        capture,
        state,
        statistics,
        shutdown,
        root_shutdown,
        handle,
    }
}

#[tokio::test]
async fn transport_errors_are_counted_and_do_not_stop_the_loop() {
    let harness = spawn_loop(false);
    harness
        .listener
        .raise_error(URI, anyhow::anyhow!("connection reset"))
        .expect("expected error delivery to succeed");
    assert!(
        wait_for(|| harness.statistics.received.snapshot().errors == 1).await,
        "expected the transport error to be counted"
    );

    harness.listener.publish(URI, b"{}".to_vec()).expect("expected publish to succeed");
    assert!(wait_for(|| harness.capture.len() == 1).await, "expected the loop to keep processing after a transport error");

    let _ = harness.shutdown.send(());
    let _ = harness.handle.await;
}

#[tokio::test]
async fn failing_endpoint_does_not_block_its_peers() {
    let harness = spawn_loop(true);
    harness.listener.publish(URI, br#"{"temp": 21}"#.to_vec()).expect("expected publish to succeed");
    assert!(wait_for(|| harness.capture.len() == 1).await, "expected the healthy endpoint to receive the message");

    assert!(
        wait_for(|| {
            harness.statistics.sent["failing-1"].snapshot().errors == 1 && harness.statistics.sent["capture-1"].snapshot().ok == 1
        })
        .await,
        "expected both endpoint outcomes to be counted independently"
    );
    assert_eq!(harness.statistics.processed.snapshot().ok, 1);

    let _ = harness.shutdown.send(());
    let _ = harness.handle.await;
}

#[tokio::test]
async fn cancellation_stops_the_loop_and_releases_the_channel() {
    let harness = spawn_loop(false);
    let _ = harness.shutdown.send(());
    let _ = harness.handle.await;
    assert_eq!(harness.state.load(), PipeState::Stopped, "expected the pipe to be marked stopped");
    assert!(!harness.listener.has_channel(URI), "expected the channel to be released");
}

#[tokio::test]
async fn root_shutdown_stops_the_loop() {
    let harness = spawn_loop(false);
    let _ = harness.root_shutdown.send(());
    let _ = harness.handle.await;
    assert_eq!(harness.state.load(), PipeState::Stopped, "expected the pipe to be marked stopped");
}
