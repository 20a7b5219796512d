//! WebSocket feed integration tests. Connect to /ws/feed and assert snapshots and pushes.

use futures_util::StreamExt;
use lane_auction::{api, AuthConfig, CurrentUser, Marketplace, NewShipmentBid, NewVendor, UserId, VendorId};
use serde_json::Value;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

async fn spawn_app(market: Arc<Marketplace>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::create_router(market, AuthConfig::disabled());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, handle)
}

type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: SocketAddr, user_id: u64, role: &str) -> Socket {
    let mut request = format!("ws://{}/ws/feed", addr).into_client_request().unwrap();
    let headers = request.headers_mut();
    headers.insert("X-User-Id", HeaderValue::from_str(&user_id.to_string()).unwrap());
    headers.insert("X-User-Role", HeaderValue::from_str(role).unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(request).await.expect("connect");
    ws
}

async fn next_json(ws: &mut Socket) -> Value {
    let raw = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("message within timeout")
        .expect("one message")
        .expect("ws recv");
    let text = raw.into_text().expect("text frame");
    serde_json::from_str(&text).expect("json")
}

/// Marketplace with lane Delhi→Mumbai and vendors 1 (on the lane) and 2 (no lanes).
fn market() -> (Arc<Marketplace>, VendorId, VendorId) {
    let market = Marketplace::in_memory(UserId(100));
    let admin = CurrentUser::admin(100, "ops");
    let lane = market.create_lane(&admin, "Delhi", "Mumbai").unwrap();
    let on_lane = market
        .create_vendor(
            &admin,
            NewVendor {
                name: "Acme".into(),
                lanes: BTreeSet::from([lane.id]),
                ..Default::default()
            },
        )
        .unwrap();
    let idle = market
        .create_vendor(
            &admin,
            NewVendor {
                name: "Idle".into(),
                ..Default::default()
            },
        )
        .unwrap();
    (Arc::new(market), on_lane.id, idle.id)
}

fn new_bid(market: &Marketplace) -> NewShipmentBid {
    let now = market.now();
    NewShipmentBid {
        pickup_city: "Delhi".into(),
        delivery_city: "Mumbai".into(),
        bid_start: now,
        bid_end: now + 3_600_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn ws_feed_sends_snapshot_on_connect() {
    let (market, _, _) = market();
    let admin = CurrentUser::admin(100, "ops");
    market.create_shipment_bid(&admin, new_bid(&market)).unwrap();
    let (addr, _handle) = spawn_app(market).await;

    let mut ws = connect(addr, 100, "admin").await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "bids");
    let bids = msg["bids"].as_array().unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0]["effectiveStatus"], "OPEN");
}

#[tokio::test]
async fn ws_feed_pushes_new_bid_and_notification_to_eligible_vendor() {
    let (market, on_lane, _) = market();
    let (addr, _handle) = spawn_app(market.clone()).await;

    let mut ws = connect(addr, on_lane.0, "vendor").await;
    let snapshot = next_json(&mut ws).await;
    assert_eq!(snapshot["type"], "bids");
    assert!(snapshot["bids"].as_array().unwrap().is_empty());

    let admin = CurrentUser::admin(100, "ops");
    let created = market.create_shipment_bid(&admin, new_bid(&market)).unwrap();

    let mut saw_bid = false;
    let mut saw_note = false;
    for _ in 0..2 {
        let msg = next_json(&mut ws).await;
        match msg["type"].as_str() {
            Some("bids") => {
                let bids = msg["bids"].as_array().unwrap();
                assert_eq!(bids.len(), 1);
                assert_eq!(bids[0]["id"], created.bid.id.0);
                saw_bid = true;
            }
            Some("notification") => {
                assert_eq!(msg["notification"]["kind"], "new_bid");
                assert_eq!(msg["notification"]["userId"], on_lane.0);
                saw_note = true;
            }
            other => panic!("unexpected message type {:?}", other),
        }
    }
    assert!(saw_bid && saw_note);
}

#[tokio::test]
async fn ws_feed_hides_bids_from_ineligible_vendor() {
    let (market, _, idle) = market();
    let (addr, _handle) = spawn_app(market.clone()).await;

    let mut ws = connect(addr, idle.0, "vendor").await;
    let snapshot = next_json(&mut ws).await;
    assert!(snapshot["bids"].as_array().unwrap().is_empty());

    let admin = CurrentUser::admin(100, "ops");
    market.create_shipment_bid(&admin, new_bid(&market)).unwrap();
    let update = next_json(&mut ws).await;
    assert_eq!(update["type"], "bids");
    assert!(update["bids"].as_array().unwrap().is_empty());
}
