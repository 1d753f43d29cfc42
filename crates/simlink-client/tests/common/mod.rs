//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use simlink_client::{ClientBuilder, ConnectionStateChange, SimClient};
use simlink_transport_traits::{ChannelFeed, ChannelSource, Envelope, OpenInfo};

pub const WAIT: Duration = Duration::from_secs(30);

pub type TestClient = SimClient<ChannelSource>;

/// Client with short delays and a feed that accepts every connect.
pub fn client() -> (TestClient, ChannelFeed) {
    let (source, feed) = ChannelSource::new();
    let client = ClientBuilder::new()
        .with_client_name("integration")
        .with_retry_interval(100)
        .with_reconnect_delay(200)
        .with_shutdown_timeout(1_000)
        .build(source)
        .unwrap();
    (client, feed)
}

pub fn open_envelope() -> Envelope {
    Envelope::open(OpenInfo {
        application_name: "Simulator".to_string(),
        application_version: (11, 0),
        protocol_version: (4, 0),
    })
}

/// Starts `client` and drives its first session to `Available`.
pub async fn start_available(client: &TestClient, feed: &ChannelFeed) {
    client.start().unwrap();
    open_session(client, feed, 1).await;
}

/// Waits for session `session` and sends the ready signal.
pub async fn open_session(client: &TestClient, feed: &ChannelFeed, session: u64) {
    tokio::time::timeout(WAIT, feed.wait_for_session(session))
        .await
        .expect("session never opened");
    feed.push(open_envelope()).unwrap();
    assert!(
        client
            .wait_for_state(simlink_client::ConnectionState::Available, WAIT)
            .await,
        "client never became available"
    );
}

/// Records every connection state change.
pub fn record_states(client: &TestClient) -> Arc<Mutex<Vec<ConnectionStateChange>>> {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    client.on_connection_state(move |change| sink.lock().push(change));
    changes
}

/// Polls `condition` until it holds, advancing paused time between polls.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT, wait)
        .await
        .expect("condition never held");
}

/// Awaits `future` with the shared timeout.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out")
}
