use std::sync::Arc;
use std::time::Duration;

use axum::extract::WebSocketUpgrade;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::{Value, json};
use signal_bus::{Bus, Subscribable, next};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use waend_client_core::bind::{Binder, Store};
use waend_client_core::model::{ModelEvent, ModelKind};
use waend_client_core::semaphore::{self, Notice};
use waend_client_core::sync::{ChannelSubscriber, SyncChannel, SyncEvent};
use waend_client_core::transport::mock::{MockReply, MockTransport};
use waend_client_core::transport::{HttpClient, Verb};

/// Notify endpoint that reports every client frame and answers the first
/// one with `pushes`.
async fn serve(pushes: Vec<Value>) -> (String, mpsc::UnboundedReceiver<String>) {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let router = Router::new().route(
        "/notify",
        get(move |ws: WebSocketUpgrade| {
            let seen = seen_tx.clone();
            let pushes = pushes.clone();
            async move {
                ws.on_upgrade(move |socket| session(socket, seen, pushes))
                    .into_response()
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    (format!("ws://{addr}/notify"), seen_rx)
}

async fn session(
    mut socket: WebSocket,
    seen: mpsc::UnboundedSender<String>,
    mut pushes: Vec<Value>,
) {
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let _ = seen.send(text);
        for push in pushes.drain(..) {
            if socket.send(WsMessage::Text(push.to_string())).await.is_err() {
                return;
            }
        }
    }
}

fn point(x: i64, y: i64) -> Value {
    json!({"type": "Point", "coordinates": [x, y]})
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("frame in time")
        .expect("server alive");
    serde_json::from_str(&text).expect("json frame")
}

/// A binder over a scripted API serving group `g1` with layer `l1`
/// holding `f1` and `f2`, subscribed through `channel`.
fn group_binder(channel: &Arc<SyncChannel>) -> Arc<Binder> {
    let mock = Arc::new(MockTransport::new());
    mock.on(
        Verb::Get,
        "/user/u1/group/g1",
        MockReply::json(json!({"group": {
            "id": "g1",
            "user_id": "u1",
            "properties": {},
            "layers": [{
                "id": "l1",
                "properties": {},
                "features": [
                    {"id": "f1", "properties": {"a": 1}, "geom": point(1, 1)},
                    {"id": "f2", "properties": {}, "geom": point(2, 2)}
                ]
            }]
        }})),
    );
    Arc::new(Binder::new(
        HttpClient::new(mock),
        "http://api.test",
        Arc::new(Store::new()),
        channel.clone(),
        channel.bus().clone(),
    ))
}

#[test_timeout::tokio_timeout_test(10)]
async fn queued_frames_flush_and_pushes_reach_the_bus() {
    let (url, mut seen) = serve(vec![json!([{"type": "layer", "id": "l1"}, "delete", "f2"])]).await;
    let bus = semaphore::shared();
    let mut sync_rx = bus.subscribe(semaphore::SYNC);
    let channel = SyncChannel::new(bus.clone());

    assert!(!channel.subscribe(ModelKind::Layer, "l1"));
    assert!(!channel.send(vec![json!("hello")]));
    channel.configure(&url).expect("configure");

    assert_eq!(recv(&mut seen).await, json!(["sub", "layer", "l1"]));
    assert_eq!(recv(&mut seen).await, json!(["hello"]));
    assert_eq!(channel.pending(), 0);

    let notice = next(&mut sync_rx).await.expect("sync notice");
    let Notice::Sync(message) = notice.payload else {
        panic!("unexpected notice {:?}", notice.payload);
    };
    assert_eq!(message.channel.id, "l1");
    assert_eq!(message.event, SyncEvent::Delete);
    assert_eq!(message.payload_id(), Some("f2"));

    assert!(channel.is_open());
    assert!(channel.send(vec![json!("after")]));
    assert_eq!(recv(&mut seen).await, json!(["after"]));
}

#[test_timeout::tokio_timeout_test(10)]
async fn pushes_update_the_cache() {
    let layer = json!({"type": "layer", "id": "l1"});
    let (url, mut seen) = serve(vec![
        json!([layer, "update", {"id": "f1", "properties": {"a": 9}, "geom": point(1, 1)}]),
        json!([layer, "create", {"id": "f9", "properties": {}, "geom": point(3, 3)}]),
        json!([layer, "delete", "f2"]),
        json!([layer, "shout", "nobody listens"]),
    ])
    .await;

    let channel = SyncChannel::new(semaphore::shared());
    let binder = group_binder(&channel);
    binder.spawn_sync_listener(channel.pushes());

    binder.get_group("u1", "g1").await.expect("group");
    let l1 = binder.store().get("l1").expect("layer cached");
    let mut layer_events = l1.subscribe();
    channel.configure(&url).expect("configure");

    assert_eq!(recv(&mut seen).await, json!(["sub", "layer", "l1"]));
    let mut changes = 0;
    while changes < 2 {
        if let ModelEvent::Change = next(&mut layer_events).await.expect("layer event") {
            changes += 1;
        }
    }

    let f1 = binder.store().get("f1").expect("f1 kept");
    assert_eq!(f1.get("a"), Some(json!(9)));
    assert!(binder.store().has("f9"));
    assert!(!binder.store().has("f2"));
    let ids: Vec<String> = binder
        .get_features("l1")
        .iter()
        .map(|feature| feature.id().to_string())
        .collect();
    assert_eq!(ids, vec!["f1", "f9"]);
}

#[test_timeout::tokio_timeout_test(10)]
async fn push_bursts_are_applied_in_full() {
    let layer = json!({"type": "layer", "id": "l1"});
    let burst: Vec<Value> = (0..400)
        .map(|n| json!([layer, "create", {"id": format!("p{n}"), "properties": {}}]))
        .collect();
    let (url, mut seen) = serve(burst).await;

    let channel = SyncChannel::new(semaphore::shared());
    let binder = group_binder(&channel);
    binder.get_group("u1", "g1").await.expect("group");
    binder.spawn_sync_listener(channel.pushes());
    channel.configure(&url).expect("configure");
    assert_eq!(recv(&mut seen).await, json!(["sub", "layer", "l1"]));

    while binder.get_features("l1").len() < 402 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(binder.store().has("p0"));
    assert!(binder.store().has("p399"));
}
