use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::protocol::encode_traffic_update;
use tokio::{net::TcpListener, time::timeout};

use super::*;
use crate::fixtures::{intersection, two_intersections, update, vehicle};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct StreamScript {
    frames: Arc<Vec<String>>,
    close_with: Option<(u16, &'static str)>,
}

async fn stream_frames(ws: WebSocketUpgrade, State(script): State<StreamScript>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| play(socket, script))
}

async fn play(mut socket: WebSocket, script: StreamScript) {
    for frame in script.frames.iter() {
        if socket.send(WsMessage::Text(frame.clone())).await.is_err() {
            return;
        }
    }
    if let Some((code, reason)) = script.close_with {
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
        return;
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn spawn_stream_server(script: StreamScript) -> Result<Url> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/ws", get(stream_frames))
        .with_state(script);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(Url::parse(&format!("ws://{addr}/ws"))?)
}

fn config_for(url: Url, initial_delay: Duration) -> ChannelConfig {
    ChannelConfig {
        url,
        reconnect_initial_delay: initial_delay,
        reconnect_max_delay: Duration::from_secs(30),
    }
}

async fn next_event(rx: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("channel event in time")
        .expect("channel still open")
}

#[test]
fn state_machine_permits_only_documented_edges() {
    use ConnectionState::*;
    assert!(Disconnected.permits(Connecting));
    assert!(Connecting.permits(Connected));
    assert!(Connecting.permits(Disconnected));
    assert!(Connected.permits(Disconnected));

    assert!(!Disconnected.permits(Connected));
    assert!(!Connected.permits(Connecting));
    assert!(!Connected.permits(Connected));
}

#[test]
fn backoff_doubles_up_to_the_cap() {
    let max = Duration::from_secs(30);
    assert_eq!(
        next_backoff(Duration::from_millis(500), max),
        Duration::from_secs(1)
    );
    assert_eq!(next_backoff(Duration::from_secs(20), max), max);
    assert_eq!(next_backoff(Duration::MAX, max), max);
}

#[tokio::test]
async fn forwards_updates_in_wire_order_and_skips_other_frames() {
    let first = update(two_intersections(), Vec::new());
    let second = update(
        vec![intersection("int_003", "Broadway & 1st Ave")],
        vec![vehicle("emv_001")],
    );
    let frames = vec![
        encode_traffic_update(&first).expect("encode"),
        r#"{"type":"priority_override","intersection_id":"int_001","vehicle_id":"emv_001"}"#
            .to_string(),
        "Message received: ping".to_string(),
        r#"{"type":"traffic_update","intersections":"not a list","emergency_vehicles":[]}"#
            .to_string(),
        encode_traffic_update(&second).expect("encode"),
    ];
    let url = spawn_stream_server(StreamScript {
        frames: Arc::new(frames),
        close_with: None,
    })
    .await
    .expect("spawn server");

    let (tx, mut rx) = mpsc::channel(16);
    let channel = LiveUpdateChannel::start(config_for(url, Duration::from_millis(50)), tx);

    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Connected)
    );
    let ChannelEvent::Update(got) = next_event(&mut rx).await else {
        panic!("expected first update");
    };
    assert_eq!(got.intersections.len(), 2);
    assert!(got.emergency_vehicles.is_empty());
    let ChannelEvent::Update(got) = next_event(&mut rx).await else {
        panic!("expected second update");
    };
    assert_eq!(got.intersections[0].id.as_str(), "int_003");
    assert_eq!(got.emergency_vehicles[0].id.as_str(), "emv_001");
    assert_eq!(channel.state(), ConnectionState::Connected);

    channel.stop().await;
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Disconnected)
    );
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let url = spawn_stream_server(StreamScript {
        frames: Arc::new(Vec::new()),
        close_with: None,
    })
    .await
    .expect("spawn server");
    let (tx, mut rx) = mpsc::channel(16);
    let channel = LiveUpdateChannel::start(config_for(url, Duration::from_millis(50)), tx);
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Connecting)
    );

    timeout(WAIT, channel.stop()).await.expect("first stop");
    timeout(WAIT, channel.stop()).await.expect("second stop");
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn refused_connection_reports_error_and_stop_cuts_backoff_short() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");

    let (tx, mut rx) = mpsc::channel(16);
    let channel = LiveUpdateChannel::start(config_for(url, Duration::from_secs(60)), tx);

    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Connecting)
    );
    assert!(matches!(
        next_event(&mut rx).await,
        ChannelEvent::Error(ChannelError::Connect { .. })
    ));
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Disconnected)
    );

    timeout(WAIT, channel.stop())
        .await
        .expect("stop interrupts the reconnect wait");
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn server_close_is_reported_and_followed_by_reconnect() {
    let frames = vec![encode_traffic_update(&update(two_intersections(), Vec::new())).expect("encode")];
    let url = spawn_stream_server(StreamScript {
        frames: Arc::new(frames),
        close_with: Some((1001, "restarting")),
    })
    .await
    .expect("spawn server");

    let (tx, mut rx) = mpsc::channel(16);
    let channel = LiveUpdateChannel::start(config_for(url, Duration::from_millis(20)), tx);

    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Connected)
    );
    assert!(matches!(next_event(&mut rx).await, ChannelEvent::Update(_)));
    match next_event(&mut rx).await {
        ChannelEvent::Error(ChannelError::Transport(reason)) => {
            assert!(reason.contains("1001"), "unexpected reason: {reason}");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Disconnected)
    );
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::StateChanged(ConnectionState::Connected)
    );

    channel.stop().await;
}

#[tokio::test]
async fn driver_refuses_transitions_outside_the_state_machine() {
    let (events, mut rx) = mpsc::channel(4);
    let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (_shutdown_tx, shutdown) = watch::channel(false);
    let driver = ConnectionDriver {
        config: config_for(
            Url::parse("ws://127.0.0.1:9/ws").expect("url"),
            Duration::from_millis(10),
        ),
        events,
        state,
        shutdown,
    };

    assert!(driver.transition(ConnectionState::Connected).await);
    assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);
    assert!(rx.try_recv().is_err());

    assert!(driver.transition(ConnectionState::Connecting).await);
    assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
    assert_eq!(
        rx.try_recv().expect("state event"),
        ChannelEvent::StateChanged(ConnectionState::Connecting)
    );

    assert!(driver.transition(ConnectionState::Connected).await);
    assert!(driver.transition(ConnectionState::Connecting).await);
    assert_eq!(*state_rx.borrow(), ConnectionState::Connected);
}
