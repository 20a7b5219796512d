//! Observer-facing notifications produced by auction transitions.
//!
//! Notifications are a side channel: they are built after a transition has been
//! persisted and delivery is best-effort. A failing sink is logged and skipped; it never
//! reaches the caller of the transition.

use crate::clock::Clock;
use crate::store::lock;
use crate::types::{BidId, Millis, NotificationId, UserId, VendorId};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Live feed capacity per subscriber.
const FEED_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewBid,
    NewOffer,
    Outbid,
    RankChanged,
    CounterOffer,
    CounterAccepted,
    CounterRejected,
    Finalized,
    Assigned,
    BidClosed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub bid_id: BidId,
    pub kind: NotificationKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub timestamp: Millis,
    pub read: bool,
}

/// A competitor whose rank worsened because of a new offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RankDrop {
    pub vendor_id: VendorId,
    pub from: usize,
    pub to: usize,
}

/// A persisted auction transition, as seen by the emitter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuctionEvent {
    BidOpened {
        bid_id: BidId,
        route: String,
        eligible_vendors: Vec<VendorId>,
    },
    OfferPlaced {
        bid_id: BidId,
        vendor_id: VendorId,
        vendor_name: String,
        amount: Decimal,
        rank: usize,
        rank_drops: Vec<RankDrop>,
    },
    CounterIssued {
        bid_id: BidId,
        vendor_id: VendorId,
        amount: Decimal,
    },
    CounterAccepted {
        bid_id: BidId,
        vendor_id: VendorId,
        amount: Decimal,
    },
    CounterRejected {
        bid_id: BidId,
        vendor_id: VendorId,
    },
    VehicleAssigned {
        bid_id: BidId,
        vendor_id: VendorId,
        vehicle_number: String,
    },
    BidClosed {
        bid_id: BidId,
        participants: Vec<VendorId>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Per-user notification list with read flags.
#[derive(Default)]
pub struct NotificationInbox {
    items: Mutex<Vec<Notification>>,
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest first.
    pub fn for_user(&self, user: UserId) -> Vec<Notification> {
        lock(&self.items)
            .iter()
            .rev()
            .filter(|n| n.user_id == user)
            .cloned()
            .collect()
    }

    /// Marks one of the user's notifications read. Returns false if it is not theirs.
    pub fn mark_read(&self, user: UserId, id: NotificationId) -> bool {
        match lock(&self.items).iter_mut().find(|n| n.id == id && n.user_id == user) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }
}

impl NotificationSink for NotificationInbox {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        lock(&self.items).push(notification.clone());
        Ok(())
    }
}

/// Live push of every notification to connected observers.
#[derive(Clone)]
pub struct NotificationFeed {
    tx: broadcast::Sender<Notification>,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self {
            tx: broadcast::channel(FEED_CAPACITY).0,
        }
    }
}

impl NotificationFeed {
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl NotificationSink for NotificationFeed {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        // No connected observers is not a failure.
        let _ = self.tx.send(notification.clone());
        Ok(())
    }
}

/// Turns [`AuctionEvent`]s into addressed notifications and fans them out to sinks.
pub struct Notifier {
    admin: UserId,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new(admin: UserId, clock: Arc<dyn Clock>) -> Self {
        Self {
            admin,
            clock,
            sinks: Vec::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Builds and delivers the notifications for `event`. Never fails.
    pub fn emit(&self, event: &AuctionEvent) {
        let now = self.clock.now_millis();
        for draft in self.drafts(event) {
            let notification = Notification {
                id: NotificationId(self.next_id.fetch_add(1, Ordering::Relaxed)),
                user_id: draft.to,
                bid_id: draft.bid_id,
                kind: draft.kind,
                severity: draft.severity,
                title: draft.title,
                message: draft.message,
                timestamp: now,
                read: false,
            };
            debug!(
                "notification user_id={} bid_id={} kind={:?}",
                notification.user_id, notification.bid_id, notification.kind
            );
            for sink in &self.sinks {
                if let Err(e) = sink.deliver(&notification) {
                    warn!("notification dropped id={} error={}", notification.id, e);
                }
            }
        }
    }

    fn drafts(&self, event: &AuctionEvent) -> Vec<Draft> {
        let admin = self.admin;
        match event {
            AuctionEvent::BidOpened {
                bid_id,
                route,
                eligible_vendors,
            } => eligible_vendors
                .iter()
                .map(|v| Draft {
                    to: (*v).into(),
                    bid_id: *bid_id,
                    kind: NotificationKind::NewBid,
                    severity: Severity::Info,
                    title: "New bid opportunity".into(),
                    message: format!("Shipment #{} on {} is open for offers", bid_id, route),
                })
                .collect(),
            AuctionEvent::OfferPlaced {
                bid_id,
                vendor_id,
                vendor_name,
                amount,
                rank,
                rank_drops,
            } => {
                let mut drafts = vec![Draft {
                    to: admin,
                    bid_id: *bid_id,
                    kind: NotificationKind::NewOffer,
                    severity: Severity::Info,
                    title: "New offer".into(),
                    message: format!("{} offered {} on shipment #{} (L{})", vendor_name, amount, bid_id, rank),
                }];
                for moved in rank_drops.iter().filter(|d| d.vendor_id != *vendor_id) {
                    drafts.push(if moved.from == 1 {
                        Draft {
                            to: moved.vendor_id.into(),
                            bid_id: *bid_id,
                            kind: NotificationKind::Outbid,
                            severity: Severity::Warning,
                            title: "You are no longer L1".into(),
                            message: format!("A lower offer of {} was placed on shipment #{}", amount, bid_id),
                        }
                    } else {
                        Draft {
                            to: moved.vendor_id.into(),
                            bid_id: *bid_id,
                            kind: NotificationKind::RankChanged,
                            severity: Severity::Info,
                            title: "Your rank changed".into(),
                            message: format!("You moved from L{} to L{} on shipment #{}", moved.from, moved.to, bid_id),
                        }
                    });
                }
                drafts
            }
            AuctionEvent::CounterIssued {
                bid_id,
                vendor_id,
                amount,
            } => vec![Draft {
                to: (*vendor_id).into(),
                bid_id: *bid_id,
                kind: NotificationKind::CounterOffer,
                severity: Severity::Warning,
                title: "Counter-offer received".into(),
                message: format!("Admin proposed {} for shipment #{}", amount, bid_id),
            }],
            AuctionEvent::CounterAccepted {
                bid_id,
                vendor_id,
                amount,
            } => vec![
                Draft {
                    to: admin,
                    bid_id: *bid_id,
                    kind: NotificationKind::CounterAccepted,
                    severity: Severity::Success,
                    title: "Counter-offer accepted".into(),
                    message: format!("Vendor {} accepted {} on shipment #{}", vendor_id, amount, bid_id),
                },
                Draft {
                    to: (*vendor_id).into(),
                    bid_id: *bid_id,
                    kind: NotificationKind::Finalized,
                    severity: Severity::Success,
                    title: "Shipment finalized".into(),
                    message: format!("Shipment #{} finalized at {}. Submit vehicle details.", bid_id, amount),
                },
            ],
            AuctionEvent::CounterRejected { bid_id, vendor_id } => vec![Draft {
                to: admin,
                bid_id: *bid_id,
                kind: NotificationKind::CounterRejected,
                severity: Severity::Warning,
                title: "Counter-offer rejected".into(),
                message: format!("Vendor {} rejected the counter on shipment #{}; bidding reopened", vendor_id, bid_id),
            }],
            AuctionEvent::VehicleAssigned {
                bid_id,
                vendor_id,
                vehicle_number,
            } => vec![Draft {
                to: admin,
                bid_id: *bid_id,
                kind: NotificationKind::Assigned,
                severity: Severity::Success,
                title: "Vehicle assigned".into(),
                message: format!("Vendor {} assigned vehicle {} to shipment #{}", vendor_id, vehicle_number, bid_id),
            }],
            AuctionEvent::BidClosed { bid_id, participants } => participants
                .iter()
                .map(|v| Draft {
                    to: (*v).into(),
                    bid_id: *bid_id,
                    kind: NotificationKind::BidClosed,
                    severity: Severity::Info,
                    title: "Bid closed".into(),
                    message: format!("Shipment #{} was closed without award", bid_id),
                })
                .collect(),
        }
    }
}

struct Draft {
    to: UserId,
    bid_id: BidId,
    kind: NotificationKind,
    severity: Severity,
    title: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn deliver(&self, _: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("down".into()))
        }
    }

    fn notifier(inbox: Arc<NotificationInbox>) -> Notifier {
        let mut n = Notifier::new(UserId(100), Arc::new(ManualClock::new(42)));
        n.add_sink(Arc::new(FailingSink));
        n.add_sink(inbox);
        n
    }

    #[test]
    fn new_bid_goes_to_each_eligible_vendor() {
        let inbox = Arc::new(NotificationInbox::new());
        notifier(inbox.clone()).emit(&AuctionEvent::BidOpened {
            bid_id: BidId(1),
            route: "DELHI→MUMBAI".into(),
            eligible_vendors: vec![VendorId(1), VendorId(2)],
        });
        assert_eq!(inbox.for_user(UserId(1)).len(), 1);
        assert_eq!(inbox.for_user(UserId(2)).len(), 1);
        assert!(inbox.for_user(UserId(100)).is_empty());
        assert_eq!(inbox.for_user(UserId(1))[0].timestamp, 42);
    }

    #[test]
    fn outbid_vendor_is_warned() {
        let inbox = Arc::new(NotificationInbox::new());
        notifier(inbox.clone()).emit(&AuctionEvent::OfferPlaced {
            bid_id: BidId(1),
            vendor_id: VendorId(2),
            vendor_name: "Bolt".into(),
            amount: Decimal::from(900),
            rank: 1,
            rank_drops: vec![
                RankDrop {
                    vendor_id: VendorId(1),
                    from: 1,
                    to: 2,
                },
                RankDrop {
                    vendor_id: VendorId(3),
                    from: 2,
                    to: 3,
                },
            ],
        });
        let admin = inbox.for_user(UserId(100));
        assert_eq!(admin.len(), 1);
        assert_eq!(admin[0].kind, NotificationKind::NewOffer);
        let outbid = inbox.for_user(UserId(1));
        assert_eq!(outbid[0].kind, NotificationKind::Outbid);
        assert_eq!(outbid[0].severity, Severity::Warning);
        let moved = inbox.for_user(UserId(3));
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].kind, NotificationKind::RankChanged);
        assert!(moved[0].message.contains("L2 to L3"));
        assert!(inbox.for_user(UserId(2)).is_empty());
    }

    #[test]
    fn acceptance_reaches_both_parties() {
        let inbox = Arc::new(NotificationInbox::new());
        notifier(inbox.clone()).emit(&AuctionEvent::CounterAccepted {
            bid_id: BidId(5),
            vendor_id: VendorId(3),
            amount: Decimal::from(43000),
        });
        assert_eq!(inbox.for_user(UserId(100))[0].kind, NotificationKind::CounterAccepted);
        assert_eq!(inbox.for_user(UserId(3))[0].kind, NotificationKind::Finalized);
    }

    #[test]
    fn mark_read_is_scoped_to_owner() {
        let inbox = Arc::new(NotificationInbox::new());
        notifier(inbox.clone()).emit(&AuctionEvent::CounterRejected {
            bid_id: BidId(5),
            vendor_id: VendorId(3),
        });
        let id = inbox.for_user(UserId(100))[0].id;
        assert!(!inbox.mark_read(UserId(3), id));
        assert!(inbox.mark_read(UserId(100), id));
        assert!(inbox.for_user(UserId(100))[0].read);
    }

    #[test]
    fn feed_delivers_to_subscribers() {
        let feed = NotificationFeed::default();
        let mut rx = feed.subscribe();
        let mut n = Notifier::new(UserId(100), Arc::new(ManualClock::new(0)));
        n.add_sink(Arc::new(feed.clone()));
        n.emit(&AuctionEvent::VehicleAssigned {
            bid_id: BidId(2),
            vendor_id: VendorId(1),
            vehicle_number: "MH12AB1234".into(),
        });
        let got = rx.try_recv().unwrap();
        assert_eq!(got.kind, NotificationKind::Assigned);
        assert_eq!(got.user_id, UserId(100));
    }
}
