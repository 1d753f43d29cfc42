//! Dispatch tests: handlers, simulator state and request correlation.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{client, eventually, start_available, within};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use simlink_client::ids::{CUSTOM_EVENT_MIN, STATE_DEFINITION_ID, STATE_REQUEST_ID};
use simlink_client::{
    ClientError, InternalEvent, ModeFields, PolledState, RequestKind, SimStateChange,
    SubscriptionOptions,
};
use simlink_transport_traits::{
    DataPeriod, DataType, Envelope, MessageKind, ObjectType, SourceRequest,
};

fn poll(camera_state: u32, altitude: f64) -> Envelope {
    let mut polled = PolledState {
        modes: ModeFields {
            camera_state,
            ..ModeFields::default()
        },
        ..PolledState::default()
    };
    polled.telemetry.altitude = altitude;
    Envelope::sim_object_data(STATE_REQUEST_ID, STATE_DEFINITION_ID, polled.encode())
}

/// Pushes `envelopes` followed by a marker and waits until the marker has
/// been dispatched, so every envelope before it has been handled.
async fn push_and_settle(
    client: &common::TestClient,
    feed: &simlink_transport_traits::ChannelFeed,
    envelopes: Vec<Envelope>,
) {
    const MARKER: u32 = 999_999_999;
    let mut marker = client
        .subscribe_filtered(SubscriptionOptions::new().named("marker"), |env| {
            env.event_id() == Some(MARKER)
        })
        .unwrap();
    feed.push_all(envelopes).unwrap();
    feed.push(Envelope::event(MARKER, 0)).unwrap();
    within(marker.recv()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_internal_events_registered_when_available() {
    let (client, feed) = client();
    start_available(&client, &feed).await;

    let requests = feed.requests();
    for event in InternalEvent::ALL {
        assert!(requests.contains(&SourceRequest::SubscribeToSystemEvent {
            event_id: event.id(),
            name: event.system_event_name().to_string(),
        }));
    }
    assert!(requests.contains(&SourceRequest::RequestDataOnSimObject {
        request_id: STATE_REQUEST_ID,
        define_id: STATE_DEFINITION_ID,
        object_id: 0,
        period: DataPeriod::Second,
    }));
    let datums = requests
        .iter()
        .filter(|r| matches!(r, SourceRequest::AddToDataDefinition { define_id, .. } if *define_id == STATE_DEFINITION_ID))
        .count();
    assert_eq!(datums, simlink_client::state::SIM_STATE_FIELDS.len());

    // Internal registrations stay out of the user-visible registry
    assert_eq!(client.requests().count(), 0);
    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_repeated_pause_notifies_once() {
    let (client, feed) = client();
    let changes = Arc::new(AtomicUsize::new(0));
    let pauses = Arc::new(Mutex::new(Vec::new()));
    {
        let changes = Arc::clone(&changes);
        client.on_sim_state(move |_: &SimStateChange| {
            changes.fetch_add(1, Ordering::SeqCst);
        });
        let pauses = Arc::clone(&pauses);
        client.on_pause(move |paused| pauses.lock().push(paused));
    }
    start_available(&client, &feed).await;

    let pause = InternalEvent::Pause.id();
    push_and_settle(
        &client,
        &feed,
        vec![
            Envelope::event(pause, 1),
            Envelope::event(pause, 1),
            Envelope::event(pause, 1),
        ],
    )
    .await;

    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(*pauses.lock(), vec![true]);
    assert!(client.sim_state().events.paused);

    push_and_settle(&client, &feed, vec![Envelope::event(pause, 0)]).await;
    assert_eq!(changes.load(Ordering::SeqCst), 2);
    assert_eq!(*pauses.lock(), vec![true, false]);

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_only_poll_is_not_a_change() {
    let (client, feed) = client();
    let mut changes = client
        .subscribe_sim_state(SubscriptionOptions::new())
        .unwrap();
    start_available(&client, &feed).await;

    push_and_settle(
        &client,
        &feed,
        vec![poll(2, 1_000.0), poll(2, 1_100.0), poll(2, 1_200.0)],
    )
    .await;

    let change = changes.try_recv().unwrap();
    assert_eq!(change.current.modes.camera_state, 2);
    assert!(changes.try_recv().is_none());
    assert_eq!(client.sim_state().telemetry.altitude, 1_200.0);

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_nan_rate_polls_change_once() {
    let (client, feed) = client();
    let mut changes = client
        .subscribe_sim_state(SubscriptionOptions::new())
        .unwrap();
    start_available(&client, &feed).await;

    let nan_poll = |latitude: f64| {
        let mut polled = PolledState::default();
        polled.modes.camera_state = 2;
        polled.modes.simulation_rate = f64::NAN;
        polled.telemetry.latitude = latitude;
        Envelope::sim_object_data(STATE_REQUEST_ID, STATE_DEFINITION_ID, polled.encode())
    };
    push_and_settle(
        &client,
        &feed,
        (0..4).map(|n| nan_poll(40.0 + f64::from(n))).collect(),
    )
    .await;

    assert!(changes.try_recv().is_some());
    assert!(changes.try_recv().is_none());
    assert!(client.sim_state().modes.simulation_rate.is_nan());

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_short_state_payload_is_counted_and_forwarded() {
    let (client, feed) = client();
    let mut data = client
        .subscribe_kinds(SubscriptionOptions::new(), [MessageKind::SimObjectData])
        .unwrap();
    start_available(&client, &feed).await;

    feed.push(Envelope::sim_object_data(
        STATE_REQUEST_ID,
        STATE_DEFINITION_ID,
        vec![0u8; 12],
    ))
    .unwrap();

    let envelope = within(data.recv()).await.unwrap();
    assert_eq!(envelope.request_id, STATE_REQUEST_ID);
    assert_eq!(client.metrics().decode_failures, 1);
    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_error_envelope_is_skipped() {
    let (client, feed) = client();
    let messages = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&messages);
    client.on_message(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    start_available(&client, &feed).await;
    let before = messages.load(Ordering::SeqCst);

    push_and_settle(
        &client,
        &feed,
        vec![Envelope::failed(
            simlink_transport_traits::SourceError::Decode("bad frame".into()),
        )],
    )
    .await;

    // Only the marker reached the handlers
    assert_eq!(messages.load(Ordering::SeqCst), before + 1);
    assert_eq!(client.metrics().envelopes_errored, 1);
    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_is_isolated() {
    let (client, feed) = client();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    client.on_open(|info| assert_ne!(info.application_name, "Simulator", "boom"));
    client.on_open(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    start_available(&client, &feed).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.metrics().handler_panics, 1);
    assert!(client.is_available());
    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_removed_handler_is_not_called() {
    let (client, feed) = client();
    let views = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&views);
    let id = client.on_view(move |view| sink.lock().push(view));
    start_available(&client, &feed).await;

    let view = InternalEvent::View.id();
    push_and_settle(&client, &feed, vec![Envelope::event(view, 2)]).await;
    assert!(client.remove_handler(id));
    assert!(!client.remove_handler(id));
    push_and_settle(&client, &feed, vec![Envelope::event(view, 3)]).await;

    assert_eq!(*views.lock(), vec![2]);
    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_filename_and_object_events_reach_handlers() {
    let (client, feed) = client();
    let flights = Arc::new(Mutex::new(Vec::new()));
    let objects = Arc::new(Mutex::new(Vec::new()));
    {
        let flights = Arc::clone(&flights);
        client.on_flight_loaded(move |path| flights.lock().push(path.to_string()));
        let objects = Arc::clone(&objects);
        client.on_object_added(move |event| objects.lock().push(event.object_id));
    }
    start_available(&client, &feed).await;

    push_and_settle(
        &client,
        &feed,
        vec![
            Envelope::filename(InternalEvent::FlightLoaded.id(), "flights/KSEA.flt"),
            Envelope::filename(InternalEvent::AircraftLoaded.id(), "aircraft/c172.cfg"),
            Envelope::object(InternalEvent::ObjectAdded.id(), ObjectType::Aircraft, 77),
            Envelope::object(InternalEvent::ObjectRemoved.id(), ObjectType::Aircraft, 78),
        ],
    )
    .await;

    assert_eq!(*flights.lock(), vec!["flights/KSEA.flt".to_string()]);
    assert_eq!(*objects.lock(), vec![77]);
    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_custom_event_subscribed_and_delivered() {
    let (client, feed) = client();
    let id = client.allocate_custom_event("Foo").await.unwrap();
    assert_eq!(id, CUSTOM_EVENT_MIN);
    assert_eq!(client.allocate_custom_event("Foo").await.unwrap(), id);
    assert!(matches!(
        client.allocate_custom_event("pause").await,
        Err(ClientError::ReservedName(_))
    ));

    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fired);
    client.on_custom_event(move |event| sink.lock().push((event.name.to_string(), event.data)));
    let mut foo = client
        .subscribe_custom_event("Foo", SubscriptionOptions::new())
        .await
        .unwrap();

    start_available(&client, &feed).await;
    assert!(feed.requests().contains(&SourceRequest::SubscribeToSystemEvent {
        event_id: id,
        name: "Foo".to_string(),
    }));
    assert!(client.requests().contains(RequestKind::SystemEvent, id));

    feed.push(Envelope::event(id, 9)).unwrap();
    let envelope = within(foo.recv()).await.unwrap();
    assert_eq!(envelope.event_id(), Some(id));
    assert_eq!(*fired.lock(), vec![("Foo".to_string(), 9)]);

    // A name allocated while available is subscribed right away
    let bar = client.allocate_custom_event("Bar").await.unwrap();
    assert!(feed.requests().contains(&SourceRequest::SubscribeToSystemEvent {
        event_id: bar,
        name: "Bar".to_string(),
    }));
    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_requests_need_a_session_and_user_ids() {
    let (client, _feed) = client();
    assert!(matches!(
        client.subscribe_to_system_event(1, "Brakes").await,
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        client.subscribe_to_system_event(1_000_000_000, "Brakes").await,
        Err(ClientError::ReservedId(1_000_000_000))
    ));
    assert!(matches!(
        client
            .request_data_on_sim_object(1, STATE_DEFINITION_ID, 0, DataPeriod::Once)
            .await,
        Err(ClientError::ReservedId(_))
    ));
    assert_eq!(client.requests().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_request_completes_on_answer() {
    let (client, feed) = client();
    start_available(&client, &feed).await;

    client
        .request_data_on_sim_object(7, 3, 0, DataPeriod::Once)
        .await
        .unwrap();
    client
        .request_data_on_sim_object(8, 3, 0, DataPeriod::Second)
        .await
        .unwrap();
    assert_eq!(client.requests().count(), 2);

    push_and_settle(
        &client,
        &feed,
        vec![
            Envelope::sim_object_data(7, 3, vec![0u8; 8]),
            Envelope::sim_object_data(8, 3, vec![0u8; 8]),
            Envelope::sim_object_data(8, 3, vec![0u8; 8]),
        ],
    )
    .await;

    assert!(!client.requests().contains(RequestKind::DataRequest, 7));
    let periodic = client.requests().get(RequestKind::DataRequest, 8).unwrap();
    assert_eq!(periodic.responses(), 2);
    assert_eq!(
        periodic.context.get("period"),
        Some(serde_json::json!("second"))
    );

    client
        .request_data_on_sim_object(8, 3, 0, DataPeriod::Never)
        .await
        .unwrap();
    assert_eq!(client.requests().count(), 0);
    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_data_definition_collects_datums() {
    let (client, feed) = client();
    start_available(&client, &feed).await;

    client
        .add_to_data_definition(3, "PLANE ALTITUDE", "feet", DataType::Float64)
        .await
        .unwrap();
    client
        .add_to_data_definition(3, "AIRSPEED INDICATED", "knots", DataType::Float64)
        .await
        .unwrap();

    let entry = client.requests().get(RequestKind::DataDefinition, 3).unwrap();
    let datums = entry.context.get("datums").unwrap();
    assert_eq!(datums.as_array().map(Vec::len), Some(2));
    assert_eq!(datums[1]["name"], "AIRSPEED INDICATED");

    client.clear_data_definition(3).await.unwrap();
    assert!(!client.requests().contains(RequestKind::DataDefinition, 3));

    eventually(|| {
        feed.requests()
            .contains(&SourceRequest::ClearDataDefinition { define_id: 3 })
    })
    .await;
    client.shutdown().await.unwrap();
}
