//! Marketplace facade.
//!
//! Every operation follows the same order: check the caller's role, read records from the
//! [`RecordStore`] (typing them through [`crate::record`]), apply a pure transition, write
//! the result back, and only then audit and notify. A rejected or unsaved operation emits
//! no notification.
//!
//! Writes to one bid are serialized by a per-bid lock; lane and vendor writes each have a
//! registry-wide lock so duplicate checks see every committed record.

use crate::audit::{AuditEvent, AuditSink, NullAuditSink, Outcome};
use crate::auction::{AuctionError, BidStatus, BidView, CounterResponse, NewShipmentBid, ShipmentBid, VehicleDetails};
use crate::auth::CurrentUser;
use crate::clock::{Clock, SystemClock};
use crate::error::{MarketError, MarketResult};
use crate::lane::{Lane, LaneRegistry, LaneUpdate};
use crate::matcher::{self, LaneIndex};
use crate::notify::{
    AuctionEvent, Notification, NotificationFeed, NotificationInbox, NotificationSink, Notifier, RankDrop,
};
use crate::record;
use crate::store::{lock, Collection, MemoryStore, RecordStore, StoreError};
use crate::types::{BidId, LaneId, Millis, NotificationId, UserId, VendorId};
use crate::vendor::{NewVendor, Vendor, VendorRegistry, VendorUpdate};
use log::{info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub struct Marketplace {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    inbox: Arc<NotificationInbox>,
    feed: NotificationFeed,
    audit: Arc<dyn AuditSink>,
    lanes_lock: Mutex<()>,
    vendors_lock: Mutex<()>,
    bids_lock: Mutex<()>,
    bid_locks: Mutex<HashMap<BidId, Arc<Mutex<()>>>>,
}

fn require_admin(user: &CurrentUser) -> MarketResult<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(MarketError::Unauthorized("admin role required"))
    }
}

fn require_vendor(user: &CurrentUser) -> MarketResult<VendorId> {
    user.vendor_id()
        .ok_or(MarketError::Unauthorized("vendor role required"))
}

/// Competitors whose rank worsened between two snapshots of [`ShipmentBid::ranks`].
fn rank_drops(before: &[(VendorId, usize)], after: &[(VendorId, usize)], bidder: VendorId) -> Vec<RankDrop> {
    before
        .iter()
        .filter(|(vendor_id, _)| *vendor_id != bidder)
        .filter_map(|&(vendor_id, from)| {
            let (_, to) = after.iter().find(|(v, _)| *v == vendor_id)?;
            (*to > from).then_some(RankDrop { vendor_id, from, to: *to })
        })
        .collect()
}

fn not_persisted(e: StoreError) -> MarketError {
    MarketError::NotPersisted(e)
}

fn unavailable(e: StoreError) -> MarketError {
    MarketError::StoreUnavailable(e)
}

impl Marketplace {
    /// Marketplace over `store`. Admin-addressed notifications go to `admin`.
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, admin: UserId) -> Self {
        let inbox = Arc::new(NotificationInbox::new());
        let feed = NotificationFeed::default();
        let mut notifier = Notifier::new(admin, clock.clone());
        notifier.add_sink(inbox.clone());
        notifier.add_sink(Arc::new(feed.clone()));
        Self {
            store,
            clock,
            notifier,
            inbox,
            feed,
            audit: Arc::new(NullAuditSink),
            lanes_lock: Mutex::new(()),
            vendors_lock: Mutex::new(()),
            bids_lock: Mutex::new(()),
            bid_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh in-memory marketplace on the system clock.
    pub fn in_memory(admin: UserId) -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock), admin)
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Adds a delivery channel (e.g. email or push) next to the in-app inbox.
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier.add_sink(sink);
        self
    }

    pub fn now(&self) -> Millis {
        self.clock.now_millis()
    }

    // ----- lanes -----

    pub fn create_lane(&self, user: &CurrentUser, origin: &str, destination: &str) -> MarketResult<Lane> {
        let resource = json!({ "origin": origin, "destination": destination });
        self.audited(user, "lane_create", resource, || {
            require_admin(user)?;
            let _guard = lock(&self.lanes_lock);
            let mut registry = LaneRegistry::from_lanes(self.load_lanes()?);
            let lane = registry.create(origin, destination, self.now())?;
            self.save(Collection::Lanes, &lane.id.key(), &lane)?;
            info!(
                "lane created lane_id={} code={} origin={} destination={}",
                lane.id, lane.code, lane.origin, lane.destination
            );
            Ok(lane)
        })
    }

    pub fn update_lane(&self, user: &CurrentUser, id: LaneId, update: LaneUpdate) -> MarketResult<Lane> {
        self.audited(user, "lane_update", json!({ "lane_id": id.0 }), || {
            require_admin(user)?;
            let _guard = lock(&self.lanes_lock);
            let mut registry = LaneRegistry::from_lanes(self.load_lanes()?);
            let lane = registry.update(id, &update, self.now())?;
            self.save(Collection::Lanes, &lane.id.key(), &lane)?;
            info!(
                "lane updated lane_id={} code={} active={}",
                lane.id, lane.code, lane.is_active
            );
            Ok(lane)
        })
    }

    /// Soft-deactivates a lane. Unknown or already inactive lanes are a no-op.
    pub fn deactivate_lane(&self, user: &CurrentUser, id: LaneId) -> MarketResult<()> {
        self.audited(user, "lane_deactivate", json!({ "lane_id": id.0 }), || {
            require_admin(user)?;
            let _guard = lock(&self.lanes_lock);
            let mut registry = LaneRegistry::from_lanes(self.load_lanes()?);
            if let Some(lane) = registry.deactivate(id, self.now()) {
                let mut fields = Map::new();
                fields.insert("isActive".into(), Value::Bool(false));
                fields.insert("updatedAt".into(), json!(lane.updated_at));
                self.store
                    .update(Collection::Lanes, &id.key(), fields)
                    .map_err(not_persisted)?;
                info!("lane deactivated lane_id={}", id);
            }
            Ok(())
        })
    }

    /// All lanes, active and inactive, in id order.
    pub fn lanes(&self, _user: &CurrentUser) -> MarketResult<Vec<Lane>> {
        self.load_lanes()
    }

    // ----- vendors -----

    pub fn create_vendor(&self, user: &CurrentUser, new: NewVendor) -> MarketResult<Vendor> {
        self.audited(user, "vendor_create", json!({ "name": new.name }), || {
            require_admin(user)?;
            let _guard = lock(&self.vendors_lock);
            let index = self.lane_index()?;
            let mut registry = VendorRegistry::from_vendors(self.load_vendors()?);
            let vendor = registry.create(new, &index, self.now())?;
            self.save(Collection::Vendors, &vendor.id.key(), &vendor)?;
            info!(
                "vendor created vendor_id={} name={} lanes={}",
                vendor.id,
                vendor.name,
                vendor.lanes.len()
            );
            Ok(vendor)
        })
    }

    pub fn update_vendor(&self, user: &CurrentUser, id: VendorId, update: VendorUpdate) -> MarketResult<Vendor> {
        self.audited(user, "vendor_update", json!({ "vendor_id": id.0 }), || {
            require_admin(user)?;
            let _guard = lock(&self.vendors_lock);
            let index = self.lane_index()?;
            let mut registry = VendorRegistry::from_vendors(self.load_vendors()?);
            let vendor = registry.update(id, update, &index, self.now())?;
            self.save(Collection::Vendors, &vendor.id.key(), &vendor)?;
            info!("vendor updated vendor_id={} lanes={}", vendor.id, vendor.lanes.len());
            Ok(vendor)
        })
    }

    /// Soft-deletes a vendor; it keeps its record and offers but loses all eligibility.
    /// Unknown or already deleted vendors are a no-op.
    pub fn deactivate_vendor(&self, user: &CurrentUser, id: VendorId) -> MarketResult<()> {
        self.audited(user, "vendor_deactivate", json!({ "vendor_id": id.0 }), || {
            require_admin(user)?;
            let _guard = lock(&self.vendors_lock);
            let mut registry = VendorRegistry::from_vendors(self.load_vendors()?);
            if let Some(vendor) = registry.deactivate(id, self.now()) {
                let mut fields = Map::new();
                fields.insert("isDeleted".into(), Value::Bool(true));
                fields.insert("updatedAt".into(), json!(vendor.updated_at));
                self.store
                    .update(Collection::Vendors, &id.key(), fields)
                    .map_err(not_persisted)?;
                info!("vendor deactivated vendor_id={}", id);
            }
            Ok(())
        })
    }

    pub fn vendors(&self, user: &CurrentUser) -> MarketResult<Vec<Vendor>> {
        require_admin(user)?;
        self.load_vendors()
    }

    // ----- bids -----

    /// Opens a new shipment bid and notifies every vendor eligible for its route.
    pub fn create_shipment_bid(&self, user: &CurrentUser, new: NewShipmentBid) -> MarketResult<BidView> {
        let resource = json!({ "pickup": new.pickup_city, "delivery": new.delivery_city });
        self.audited(user, "bid_create", resource, || {
            require_admin(user)?;
            let now = self.now();
            let bid = {
                let _guard = lock(&self.bids_lock);
                let id = self.next_bid_id()?;
                let bid = ShipmentBid::open(id, new, now)?;
                self.save(Collection::Bids, &bid.id.key(), &bid)?;
                bid
            };
            let index = self.lane_index()?;
            let vendors = self.load_vendors()?;
            let eligible: Vec<VendorId> = matcher::eligible_vendors_for_shipment(&bid, &vendors, &index)
                .iter()
                .map(|v| v.id)
                .collect();
            info!(
                "bid opened bid_id={} pickup={} delivery={} bid_end={} eligible_vendors={}",
                bid.id,
                bid.pickup_city,
                bid.delivery_city,
                bid.bid_end,
                eligible.len()
            );
            if eligible.is_empty() {
                warn!("bid has no eligible vendors bid_id={}", bid.id);
            }
            self.notifier.emit(&AuctionEvent::BidOpened {
                bid_id: bid.id,
                route: format!("{} → {}", bid.pickup_city, bid.delivery_city),
                eligible_vendors: eligible,
            });
            Ok(BidView::for_admin(bid, now))
        })
    }

    /// Vendor places (or improves) an offer. Returns the vendor's view with its new rank.
    pub fn place_offer(&self, user: &CurrentUser, bid_id: BidId, amount: Decimal) -> MarketResult<BidView> {
        let resource = json!({ "bid_id": bid_id.0, "amount": amount.to_string() });
        self.audited(user, "offer_place", resource, || {
            let vendor_id = require_vendor(user)?;
            let handle = self.bid_lock(bid_id);
            let _guard = lock(&handle);
            let mut bid = self.load_bid(bid_id)?;
            let vendor = self
                .load_vendor(vendor_id)?
                .ok_or(MarketError::Auction(AuctionError::VendorNotEligible))?;
            let index = self.lane_index()?;
            let now = self.now();
            let before = bid.ranks();
            let rank = bid.place_offer(&vendor, &index, amount, now)?;
            self.save(Collection::Bids, &bid.id.key(), &bid)?;
            info!(
                "offer placed bid_id={} vendor_id={} amount={} rank={} offers={}",
                bid.id,
                vendor.id,
                amount,
                rank,
                bid.offers.len()
            );
            let drops = rank_drops(&before, &bid.ranks(), vendor.id);
            self.notifier.emit(&AuctionEvent::OfferPlaced {
                bid_id: bid.id,
                vendor_id: vendor.id,
                vendor_name: vendor.name.clone(),
                amount,
                rank,
                rank_drops: drops,
            });
            Ok(BidView::for_vendor(bid, vendor_id, now))
        })
    }

    /// Admin sends a counter-offer to the current rank-1 vendor.
    pub fn counter_offer(&self, user: &CurrentUser, bid_id: BidId, amount: Decimal) -> MarketResult<BidView> {
        let resource = json!({ "bid_id": bid_id.0, "amount": amount.to_string() });
        self.audited(user, "counter_offer", resource, || {
            require_admin(user)?;
            let handle = self.bid_lock(bid_id);
            let _guard = lock(&handle);
            let mut bid = self.load_bid(bid_id)?;
            let now = self.now();
            let target = bid.counter(amount, now)?;
            self.save(Collection::Bids, &bid.id.key(), &bid)?;
            info!(
                "counter offer issued bid_id={} vendor_id={} amount={}",
                bid.id, target, amount
            );
            self.notifier.emit(&AuctionEvent::CounterIssued {
                bid_id: bid.id,
                vendor_id: target,
                amount,
            });
            Ok(BidView::for_admin(bid, now))
        })
    }

    /// Targeted vendor accepts or rejects the pending counter-offer.
    pub fn respond_to_counter(
        &self,
        user: &CurrentUser,
        bid_id: BidId,
        response: CounterResponse,
    ) -> MarketResult<BidView> {
        let resource = json!({ "bid_id": bid_id.0, "response": response });
        self.audited(user, "counter_respond", resource, || {
            let vendor_id = require_vendor(user)?;
            let handle = self.bid_lock(bid_id);
            let _guard = lock(&handle);
            let mut bid = self.load_bid(bid_id)?;
            let now = self.now();
            let status = bid.respond_to_counter(vendor_id, response, now)?;
            self.save(Collection::Bids, &bid.id.key(), &bid)?;
            info!(
                "counter offer answered bid_id={} vendor_id={} response={:?} status={}",
                bid.id, vendor_id, response, status
            );
            let event = match status {
                BidStatus::Finalized => AuctionEvent::CounterAccepted {
                    bid_id: bid.id,
                    vendor_id,
                    amount: bid.final_amount.unwrap_or_default(),
                },
                _ => AuctionEvent::CounterRejected {
                    bid_id: bid.id,
                    vendor_id,
                },
            };
            self.notifier.emit(&event);
            Ok(BidView::for_vendor(bid, vendor_id, now))
        })
    }

    /// Winning vendor submits dispatch details for a finalized bid.
    pub fn submit_vehicle_details(
        &self,
        user: &CurrentUser,
        bid_id: BidId,
        details: VehicleDetails,
    ) -> MarketResult<BidView> {
        self.audited(user, "vehicle_submit", json!({ "bid_id": bid_id.0 }), || {
            let vendor_id = require_vendor(user)?;
            let handle = self.bid_lock(bid_id);
            let _guard = lock(&handle);
            let mut bid = self.load_bid(bid_id)?;
            let now = self.now();
            let vehicle_number = details.vehicle_number.trim().to_string();
            bid.submit_vehicle_details(vendor_id, details, now)?;
            self.save(Collection::Bids, &bid.id.key(), &bid)?;
            info!(
                "vehicle assigned bid_id={} vendor_id={} vehicle_number={}",
                bid.id, vendor_id, vehicle_number
            );
            self.notifier.emit(&AuctionEvent::VehicleAssigned {
                bid_id: bid.id,
                vendor_id,
                vehicle_number,
            });
            Ok(BidView::for_vendor(bid, vendor_id, now))
        })
    }

    /// Admin closes an open or negotiating bid without an award.
    pub fn close_bid(&self, user: &CurrentUser, bid_id: BidId) -> MarketResult<BidView> {
        self.audited(user, "bid_close", json!({ "bid_id": bid_id.0 }), || {
            require_admin(user)?;
            let handle = self.bid_lock(bid_id);
            let _guard = lock(&handle);
            let mut bid = self.load_bid(bid_id)?;
            let now = self.now();
            bid.close(now)?;
            self.save(Collection::Bids, &bid.id.key(), &bid)?;
            let participants = bid.participants();
            info!("bid closed bid_id={} participants={}", bid.id, participants.len());
            self.notifier.emit(&AuctionEvent::BidClosed {
                bid_id: bid.id,
                participants,
            });
            Ok(BidView::for_admin(bid, now))
        })
    }

    /// One bid as the caller may see it.
    pub fn bid(&self, user: &CurrentUser, bid_id: BidId) -> MarketResult<BidView> {
        let bid = self.load_bid(bid_id)?;
        let now = self.now();
        match user.vendor_id() {
            None => Ok(BidView::for_admin(bid, now)),
            Some(vendor_id) => {
                let index = self.lane_index()?;
                let vendor = self.load_vendor(vendor_id)?;
                if self.vendor_may_see(vendor_id, vendor.as_ref(), &bid, &index) {
                    Ok(BidView::for_vendor(bid, vendor_id, now))
                } else {
                    Err(MarketError::Unauthorized("bid is not visible to this vendor"))
                }
            }
        }
    }

    /// Bids visible to the caller: every bid for admins; for vendors, bids on their active
    /// lanes plus bids they have offered on.
    pub fn visible_bids(&self, user: &CurrentUser) -> MarketResult<Vec<BidView>> {
        let records = self.store.list(Collection::Bids).map_err(unavailable)?;
        self.views_from_records(user, &records)
    }

    /// Turns raw bid records (e.g. from [`Marketplace::subscribe_bids`]) into the caller's
    /// views, dropping records that fail to parse.
    pub fn views_from_records(&self, user: &CurrentUser, records: &[Value]) -> MarketResult<Vec<BidView>> {
        let mut bids = record::parse_all(records, record::parse_bid);
        bids.sort_by_key(|b| b.id);
        let now = self.now();
        match user.vendor_id() {
            None => Ok(bids.into_iter().map(|b| BidView::for_admin(b, now)).collect()),
            Some(vendor_id) => {
                let index = self.lane_index()?;
                let vendor = self.load_vendor(vendor_id)?;
                Ok(bids
                    .into_iter()
                    .filter(|b| self.vendor_may_see(vendor_id, vendor.as_ref(), b, &index))
                    .map(|b| BidView::for_vendor(b, vendor_id, now))
                    .collect())
            }
        }
    }

    /// Rank of `vendor_id` on the bid. Vendors may only ask about themselves.
    pub fn rank(&self, user: &CurrentUser, bid_id: BidId, vendor_id: VendorId) -> MarketResult<Option<usize>> {
        if let Some(own) = user.vendor_id() {
            if own != vendor_id {
                return Err(MarketError::Unauthorized("vendors may only query their own rank"));
            }
        }
        Ok(self.load_bid(bid_id)?.rank(vendor_id))
    }

    pub fn eligible_vendors(&self, user: &CurrentUser, bid_id: BidId) -> MarketResult<Vec<Vendor>> {
        require_admin(user)?;
        let bid = self.load_bid(bid_id)?;
        let index = self.lane_index()?;
        let vendors = self.load_vendors()?;
        Ok(matcher::eligible_vendors_for_shipment(&bid, &vendors, &index)
            .into_iter()
            .cloned()
            .collect())
    }

    // ----- notifications -----

    /// Caller's notifications, newest first.
    pub fn notifications(&self, user: &CurrentUser) -> Vec<Notification> {
        self.inbox.for_user(user.id)
    }

    /// Marks one of the caller's notifications read. `false` if it is not theirs or unknown.
    pub fn mark_notification_read(&self, user: &CurrentUser, id: NotificationId) -> bool {
        self.inbox.mark_read(user.id, id)
    }

    /// Every notification as it is emitted; filter on `user_id` for one user.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.feed.subscribe()
    }

    /// Raw bid records after every accepted bid write.
    pub fn subscribe_bids(&self) -> broadcast::Receiver<Vec<Value>> {
        self.store.subscribe(Collection::Bids)
    }

    // ----- internals -----

    fn audited<T>(
        &self,
        user: &CurrentUser,
        action: &str,
        resource: Value,
        op: impl FnOnce() -> MarketResult<T>,
    ) -> MarketResult<T> {
        let result = op();
        let (outcome, reason) = match &result {
            Ok(_) => (Outcome::Success, None),
            Err(e @ (MarketError::NotPersisted(_) | MarketError::StoreUnavailable(_))) => {
                warn!("{} failed actor={} error={}", action, user.id, e);
                (Outcome::Error, Some(e.code().to_string()))
            }
            Err(e) => (Outcome::Rejected, Some(e.code().to_string())),
        };
        self.audit.emit(&AuditEvent::now(
            user.id.to_string(),
            action,
            Some(resource),
            outcome,
            reason,
        ));
        result
    }

    fn bid_lock(&self, id: BidId) -> Arc<Mutex<()>> {
        lock(&self.bid_locks).entry(id).or_default().clone()
    }

    fn save<T: Serialize>(&self, collection: Collection, key: &str, value: &T) -> MarketResult<()> {
        let value = serde_json::to_value(value).map_err(|e| not_persisted(StoreError::Io(e.to_string())))?;
        self.store.put(collection, key, value).map_err(not_persisted)
    }

    fn load_lanes(&self) -> MarketResult<Vec<Lane>> {
        let values = self.store.list(Collection::Lanes).map_err(unavailable)?;
        let mut lanes = record::parse_all(&values, record::parse_lane);
        lanes.sort_by_key(|l| l.id);
        Ok(lanes)
    }

    fn lane_index(&self) -> MarketResult<LaneIndex> {
        Ok(self.load_lanes()?.into_iter().collect())
    }

    fn load_vendors(&self) -> MarketResult<Vec<Vendor>> {
        let values = self.store.list(Collection::Vendors).map_err(unavailable)?;
        let mut vendors = record::parse_all(&values, record::parse_vendor);
        vendors.sort_by_key(|v| v.id);
        Ok(vendors)
    }

    fn load_vendor(&self, id: VendorId) -> MarketResult<Option<Vendor>> {
        let value = self.store.get(Collection::Vendors, &id.key()).map_err(unavailable)?;
        Ok(value.as_ref().and_then(record::parse_vendor))
    }

    fn load_bid(&self, id: BidId) -> MarketResult<ShipmentBid> {
        let value = self
            .store
            .get(Collection::Bids, &id.key())
            .map_err(unavailable)?
            .ok_or(MarketError::BidNotFound(id))?;
        record::parse_bid(&value).ok_or(MarketError::BidNotFound(id))
    }

    /// One past the highest id in the store, counting records that no longer parse.
    fn next_bid_id(&self) -> MarketResult<BidId> {
        let values = self.store.list(Collection::Bids).map_err(unavailable)?;
        let max = values
            .iter()
            .filter_map(|v| v.get("id").and_then(Value::as_u64))
            .max()
            .unwrap_or(0);
        Ok(BidId(max + 1))
    }

    fn vendor_may_see(&self, vendor_id: VendorId, vendor: Option<&Vendor>, bid: &ShipmentBid, index: &LaneIndex) -> bool {
        bid.has_offer_from(vendor_id) || vendor.map(|v| matcher::vendor_serves(v, bid, index)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::clock::ManualClock;
    use std::collections::BTreeSet;

    const HOUR: u64 = 3_600_000;

    fn init_log() {
        let _ = env_logger::try_init();
    }

    struct Fixture {
        market: Marketplace,
        store: Arc<MemoryStore>,
        clock: ManualClock,
        audit: InMemoryAuditSink,
        admin: CurrentUser,
    }

    fn fixture() -> Fixture {
        init_log();
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(10 * HOUR);
        let audit = InMemoryAuditSink::new();
        let market = Marketplace::new(store.clone(), Arc::new(clock.clone()), UserId(1))
            .with_audit(Arc::new(audit.clone()));
        Fixture {
            market,
            store,
            clock,
            audit,
            admin: CurrentUser::admin(1, "ops"),
        }
    }

    fn vendor_on(f: &Fixture, name: &str, lanes: &[LaneId]) -> CurrentUser {
        let v = f
            .market
            .create_vendor(
                &f.admin,
                NewVendor {
                    name: name.into(),
                    lanes: lanes.iter().copied().collect::<BTreeSet<_>>(),
                    ..Default::default()
                },
            )
            .unwrap();
        CurrentUser::vendor(v.id, name)
    }

    fn open_bid(f: &Fixture, pickup: &str, delivery: &str) -> BidId {
        let now = f.clock.now_millis();
        f.market
            .create_shipment_bid(
                &f.admin,
                NewShipmentBid {
                    pickup_city: pickup.into(),
                    delivery_city: delivery.into(),
                    bid_start: now,
                    bid_end: now + HOUR,
                    ..Default::default()
                },
            )
            .unwrap()
            .bid
            .id
    }

    #[test]
    fn vendor_cannot_manage_lanes() {
        let f = fixture();
        let vendor = CurrentUser::vendor(VendorId(9), "x");
        let err = f.market.create_lane(&vendor, "Delhi", "Mumbai").unwrap_err();
        assert_eq!(err.code(), "Unauthorized");
        let events = f.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, Outcome::Rejected);
        assert_eq!(events[0].reason.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn duplicate_lane_is_rejected_after_deactivation_allows_recreate() {
        let f = fixture();
        let lane = f.market.create_lane(&f.admin, "Delhi", "Mumbai").unwrap();
        assert_eq!(
            f.market.create_lane(&f.admin, " delhi", "MUMBAI").unwrap_err().code(),
            "DuplicateLane"
        );
        f.market.deactivate_lane(&f.admin, lane.id).unwrap();
        f.market.deactivate_lane(&f.admin, lane.id).unwrap();
        let again = f.market.create_lane(&f.admin, "Delhi", "Mumbai").unwrap();
        assert_ne!(again.id, lane.id);
        let lanes = f.market.lanes(&f.admin).unwrap();
        assert_eq!(lanes.iter().filter(|l| l.is_active).count(), 1);
        assert!(f.market.deactivate_lane(&f.admin, LaneId(99)).is_ok());
        assert_eq!(
            f.market
                .update_lane(&f.admin, LaneId(99), LaneUpdate::default())
                .unwrap_err()
                .code(),
            "LaneNotFound"
        );
    }

    #[test]
    fn new_bid_notifies_only_eligible_vendors() {
        let f = fixture();
        let dm = f.market.create_lane(&f.admin, "Delhi", "Mumbai").unwrap().id;
        let pg = f.market.create_lane(&f.admin, "Pune", "Goa").unwrap().id;
        let a = vendor_on(&f, "A", &[dm]);
        let b = vendor_on(&f, "B", &[pg]);
        let bid = open_bid(&f, "delhi", "mumbai");
        let inbox = f.market.notifications(&a);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].bid_id, bid);
        assert!(f.market.notifications(&b).is_empty());
        let eligible = f.market.eligible_vendors(&f.admin, bid).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].name, "A");
    }

    #[test]
    fn outbid_vendor_is_told_and_views_hide_competitors() {
        let f = fixture();
        let dm = f.market.create_lane(&f.admin, "Delhi", "Mumbai").unwrap().id;
        let a = vendor_on(&f, "A", &[dm]);
        let b = vendor_on(&f, "B", &[dm]);
        let bid = open_bid(&f, "Delhi", "Mumbai");

        f.clock.advance(1_000);
        let view = f.market.place_offer(&a, bid, Decimal::from(50_000)).unwrap();
        assert_eq!(view.my_rank, Some(1));
        f.clock.advance(1_000);
        let view = f.market.place_offer(&b, bid, Decimal::from(48_000)).unwrap();
        assert_eq!(view.my_rank, Some(1));
        assert_eq!(view.bid.offers.len(), 1);
        assert_eq!(view.lowest_offer, Some(Decimal::from(48_000)));

        let kinds: Vec<_> = f.market.notifications(&a).iter().map(|n| n.kind).collect();
        assert!(kinds.contains(&crate::notify::NotificationKind::Outbid));
        assert_eq!(f.market.rank(&a, bid, a.vendor_id().unwrap()).unwrap(), Some(2));
        assert_eq!(
            f.market.rank(&a, bid, b.vendor_id().unwrap()).unwrap_err().code(),
            "Unauthorized"
        );
    }

    #[test]
    fn every_vendor_pushed_down_hears_about_it() {
        use crate::notify::NotificationKind;
        let f = fixture();
        let dm = f.market.create_lane(&f.admin, "Delhi", "Mumbai").unwrap().id;
        let a = vendor_on(&f, "A", &[dm]);
        let b = vendor_on(&f, "B", &[dm]);
        let c = vendor_on(&f, "C", &[dm]);
        let bid = open_bid(&f, "Delhi", "Mumbai");

        let kinds = |u: &CurrentUser| {
            f.market
                .notifications(u)
                .iter()
                .map(|n| n.kind)
                .filter(|k| *k != NotificationKind::NewBid)
                .collect::<Vec<_>>()
        };
        f.clock.advance(1_000);
        f.market.place_offer(&a, bid, Decimal::from(40_000)).unwrap();
        f.market.place_offer(&b, bid, Decimal::from(45_000)).unwrap();
        // A improves its own lead: nobody moves.
        f.market.place_offer(&a, bid, Decimal::from(39_000)).unwrap();
        assert!(kinds(&b).is_empty());

        let view = f.market.place_offer(&c, bid, Decimal::from(38_000)).unwrap();
        assert_eq!(view.my_rank, Some(1));
        assert_eq!(kinds(&a), vec![NotificationKind::Outbid]);
        assert_eq!(kinds(&b), vec![NotificationKind::RankChanged]);
        assert!(kinds(&c).is_empty());
    }

    #[test]
    fn ineligible_vendor_cannot_see_or_bid() {
        let f = fixture();
        let dm = f.market.create_lane(&f.admin, "Delhi", "Mumbai").unwrap().id;
        let pg = f.market.create_lane(&f.admin, "Pune", "Goa").unwrap().id;
        let _a = vendor_on(&f, "A", &[dm]);
        let c = vendor_on(&f, "C", &[pg]);
        let bid = open_bid(&f, "Delhi", "Mumbai");
        assert!(f.market.visible_bids(&c).unwrap().is_empty());
        assert_eq!(f.market.bid(&c, bid).unwrap_err().code(), "Unauthorized");
        assert_eq!(
            f.market.place_offer(&c, bid, Decimal::from(1)).unwrap_err().code(),
            "VendorNotEligible"
        );
        let unknown = CurrentUser::vendor(VendorId(77), "ghost");
        assert_eq!(
            f.market.place_offer(&unknown, bid, Decimal::from(1)).unwrap_err().code(),
            "VendorNotEligible"
        );
    }

    #[test]
    fn vendor_keeps_seeing_bids_it_offered_on_after_lane_deactivation() {
        let f = fixture();
        let dm = f.market.create_lane(&f.admin, "Delhi", "Mumbai").unwrap().id;
        let a = vendor_on(&f, "A", &[dm]);
        let bid = open_bid(&f, "Delhi", "Mumbai");
        f.market.place_offer(&a, bid, Decimal::from(10)).unwrap();
        f.market.deactivate_lane(&f.admin, dm).unwrap();
        assert_eq!(f.market.visible_bids(&a).unwrap().len(), 1);
        assert_eq!(
            f.market.place_offer(&a, bid, Decimal::from(9)).unwrap_err().code(),
            "VendorNotEligible"
        );
    }

    #[test]
    fn failed_write_leaves_bid_unchanged_and_silent() {
        let f = fixture();
        let dm = f.market.create_lane(&f.admin, "Delhi", "Mumbai").unwrap().id;
        let a = vendor_on(&f, "A", &[dm]);
        let bid = open_bid(&f, "Delhi", "Mumbai");
        let before = f.market.notifications(&f.admin).len();

        f.store.set_fail_writes(true);
        let err = f.market.place_offer(&a, bid, Decimal::from(10)).unwrap_err();
        assert_eq!(err.code(), "NotPersisted");
        f.store.set_fail_writes(false);

        assert!(f.market.bid(&f.admin, bid).unwrap().bid.offers.is_empty());
        assert_eq!(f.market.notifications(&f.admin).len(), before);
        let last = f.audit.events().pop().unwrap();
        assert_eq!(last.action, "offer_place");
        assert_eq!(last.outcome, Outcome::Error);
    }

    #[test]
    fn close_is_refused_after_finalization() {
        let f = fixture();
        let dm = f.market.create_lane(&f.admin, "Delhi", "Mumbai").unwrap().id;
        let a = vendor_on(&f, "A", &[dm]);
        let bid = open_bid(&f, "Delhi", "Mumbai");
        f.market.place_offer(&a, bid, Decimal::from(100)).unwrap();
        f.market.counter_offer(&f.admin, bid, Decimal::from(95)).unwrap();
        let view = f.market.respond_to_counter(&a, bid, CounterResponse::Accept).unwrap();
        assert_eq!(view.bid.status, BidStatus::Finalized);
        assert_eq!(view.bid.final_amount, Some(Decimal::from(95)));
        assert_eq!(f.market.close_bid(&f.admin, bid).unwrap_err().code(), "CannotClose");
    }

    #[test]
    fn unknown_bid_is_not_found() {
        let f = fixture();
        assert_eq!(f.market.bid(&f.admin, BidId(5)).unwrap_err().code(), "BidNotFound");
        assert_eq!(
            f.market.counter_offer(&f.admin, BidId(5), Decimal::ONE).unwrap_err().code(),
            "BidNotFound"
        );
    }
}
