//! REST and WebSocket API for the marketplace.
//!
//! Used by the binary and by integration tests. Create with [`create_router`].
//! Uses Extension for state so the router is `Router<()>` and works with `into_make_service()`.
//! Every route except `/health` sits behind [`authenticate`], which injects the caller's
//! [`CurrentUser`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path,
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::auction::{AuctionError, BidView, CounterResponse, NewShipmentBid, VehicleDetails};
use crate::auth::{authenticate, AuthConfig, CurrentUser};
use crate::error::MarketError;
use crate::lane::{LaneError, LaneUpdate};
use crate::market::Marketplace;
use crate::notify::Notification;
use crate::types::{BidId, LaneId, NotificationId, VendorId};
use crate::vendor::{NewVendor, VendorError, VendorUpdate};

/// Shared app state: one marketplace per process.
#[derive(Clone)]
pub struct AppState {
    pub(crate) market: Arc<Marketplace>,
}

/// Builds the router. Returns `Router<()>` so you can call `.into_make_service()` for `axum::serve`.
pub fn create_router(market: Arc<Marketplace>, auth: AuthConfig) -> Router<()> {
    let state = AppState { market };
    let protected = Router::new()
        .route("/lanes", get(list_lanes).post(create_lane))
        .route("/lanes/:id", put(update_lane).delete(deactivate_lane))
        .route("/vendors", get(list_vendors).post(create_vendor))
        .route("/vendors/:id", put(update_vendor).delete(deactivate_vendor))
        .route("/bids", get(list_bids).post(create_bid))
        .route("/bids/:id", get(get_bid))
        .route("/bids/:id/rank/:vendor_id", get(get_rank))
        .route("/bids/:id/eligible-vendors", get(eligible_vendors))
        .route("/bids/:id/offers", post(place_offer))
        .route("/bids/:id/counter", post(counter_offer))
        .route("/bids/:id/respond", post(respond_to_counter))
        .route("/bids/:id/vehicle", post(submit_vehicle))
        .route("/bids/:id/close", post(close_bid))
        .route("/notifications", get(list_notifications))
        .route("/notifications/:id/read", post(mark_read))
        .route("/ws/feed", get(ws_feed))
        .route_layer(middleware::from_fn_with_state(auth, authenticate));
    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(Extension(state))
}

fn status_for(error: &MarketError) -> StatusCode {
    match error {
        MarketError::Lane(LaneError::DuplicateLane) => StatusCode::CONFLICT,
        MarketError::Lane(LaneError::NotFound(_)) | MarketError::Vendor(VendorError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        MarketError::Lane(_) | MarketError::Vendor(_) => StatusCode::BAD_REQUEST,
        MarketError::Auction(AuctionError::NotWinningVendor | AuctionError::VendorNotEligible) => {
            StatusCode::FORBIDDEN
        }
        MarketError::Auction(e) if e.is_state_violation() => StatusCode::CONFLICT,
        MarketError::Auction(_) => StatusCode::BAD_REQUEST,
        MarketError::Unauthorized(_) => StatusCode::FORBIDDEN,
        MarketError::BidNotFound(_) => StatusCode::NOT_FOUND,
        MarketError::NotPersisted(_) | MarketError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.code(), "message": self.to_string() });
        (status_for(&self), Json(body)).into_response()
    }
}

fn respond<T: Serialize>(result: Result<T, MarketError>) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Deserialize)]
struct CreateLaneRequest {
    origin: String,
    destination: String,
}

async fn list_lanes(Extension(state): Extension<AppState>, Extension(user): Extension<CurrentUser>) -> Response {
    respond(state.market.lanes(&user))
}

async fn create_lane(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateLaneRequest>,
) -> Response {
    match state.market.create_lane(&user, &body.origin, &body.destination) {
        Ok(lane) => (StatusCode::CREATED, Json(lane)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_lane(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
    Json(body): Json<LaneUpdate>,
) -> Response {
    respond(state.market.update_lane(&user, LaneId(id), body))
}

async fn deactivate_lane(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
) -> Response {
    match state.market.deactivate_lane(&user, LaneId(id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_vendors(Extension(state): Extension<AppState>, Extension(user): Extension<CurrentUser>) -> Response {
    respond(state.market.vendors(&user))
}

async fn create_vendor(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<NewVendor>,
) -> Response {
    match state.market.create_vendor(&user, body) {
        Ok(vendor) => (StatusCode::CREATED, Json(vendor)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_vendor(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
    Json(body): Json<VendorUpdate>,
) -> Response {
    respond(state.market.update_vendor(&user, VendorId(id), body))
}

async fn deactivate_vendor(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
) -> Response {
    match state.market.deactivate_vendor(&user, VendorId(id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_bids(Extension(state): Extension<AppState>, Extension(user): Extension<CurrentUser>) -> Response {
    respond(state.market.visible_bids(&user))
}

async fn create_bid(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<NewShipmentBid>,
) -> Response {
    match state.market.create_shipment_bid(&user, body) {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_bid(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
) -> Response {
    respond(state.market.bid(&user, BidId(id)))
}

async fn get_rank(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((id, vendor_id)): Path<(u64, u64)>,
) -> Response {
    #[derive(Serialize)]
    struct Out {
        rank: Option<usize>,
    }
    respond(
        state
            .market
            .rank(&user, BidId(id), VendorId(vendor_id))
            .map(|rank| Out { rank }),
    )
}

async fn eligible_vendors(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
) -> Response {
    respond(state.market.eligible_vendors(&user, BidId(id)))
}

#[derive(Deserialize)]
struct AmountRequest {
    amount: Decimal,
}

async fn place_offer(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
    Json(body): Json<AmountRequest>,
) -> Response {
    respond(state.market.place_offer(&user, BidId(id), body.amount))
}

async fn counter_offer(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
    Json(body): Json<AmountRequest>,
) -> Response {
    respond(state.market.counter_offer(&user, BidId(id), body.amount))
}

#[derive(Deserialize)]
struct RespondRequest {
    response: CounterResponse,
}

async fn respond_to_counter(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
    Json(body): Json<RespondRequest>,
) -> Response {
    respond(state.market.respond_to_counter(&user, BidId(id), body.response))
}

async fn submit_vehicle(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
    Json(body): Json<VehicleDetails>,
) -> Response {
    respond(state.market.submit_vehicle_details(&user, BidId(id), body))
}

async fn close_bid(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
) -> Response {
    respond(state.market.close_bid(&user, BidId(id)))
}

async fn list_notifications(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Response {
    (StatusCode::OK, Json(state.market.notifications(&user))).into_response()
}

async fn mark_read(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<u64>,
) -> Response {
    if state.market.mark_notification_read(&user, NotificationId(id)) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "NotificationNotFound", "message": format!("notification {} not found", id) })),
        )
            .into_response()
    }
}

/// Messages pushed over `/ws/feed`.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum FeedMessage {
    /// Every bid visible to the caller, as of the latest change.
    Bids { bids: Vec<BidView> },
    Notification { notification: Notification },
}

async fn ws_feed(
    ws: WebSocketUpgrade,
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Response {
    ws.on_upgrade(move |socket| feed_session(socket, state.market, user))
}

async fn send_json(socket: &mut WebSocket, msg: &FeedMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("feed message not serializable error={}", e);
            true
        }
    }
}

async fn send_snapshot(socket: &mut WebSocket, market: &Marketplace, user: &CurrentUser) -> bool {
    match market.visible_bids(user) {
        Ok(bids) => send_json(socket, &FeedMessage::Bids { bids }).await,
        Err(e) => {
            warn!("feed snapshot failed user_id={} error={}", user.id, e);
            true
        }
    }
}

async fn feed_session(mut socket: WebSocket, market: Arc<Marketplace>, user: CurrentUser) {
    let mut bids = market.subscribe_bids();
    let mut notifications = market.subscribe_notifications();
    debug!("feed connected user_id={}", user.id);
    if !send_snapshot(&mut socket, &market, &user).await {
        return;
    }
    loop {
        let open = tokio::select! {
            update = bids.recv() => match update {
                Ok(records) => match market.views_from_records(&user, &records) {
                    Ok(views) => send_json(&mut socket, &FeedMessage::Bids { bids: views }).await,
                    Err(e) => {
                        warn!("feed update failed user_id={} error={}", user.id, e);
                        true
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("feed lagged user_id={} skipped={}", user.id, skipped);
                    send_snapshot(&mut socket, &market, &user).await
                }
                Err(RecvError::Closed) => false,
            },
            note = notifications.recv() => match note {
                Ok(notification) if notification.user_id == user.id => {
                    send_json(&mut socket, &FeedMessage::Notification { notification }).await
                }
                Ok(_) => true,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("notification feed lagged user_id={} skipped={}", user.id, skipped);
                    true
                }
                Err(RecvError::Closed) => false,
            },
            incoming = socket.recv() => !matches!(incoming, None | Some(Err(_)) | Some(Ok(Message::Close(_)))),
        };
        if !open {
            break;
        }
    }
    debug!("feed disconnected user_id={}", user.id);
}
