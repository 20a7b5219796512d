//! # Lane Auction
//!
//! Reverse-bidding marketplace for road freight: an administrator publishes shipment
//! bids, approved transport vendors compete by offering ever-lower prices, and the
//! administrator negotiates with the lowest bidder until a price is finalized and a
//! vehicle is dispatched.
//!
//! ## Entry point
//!
//! Use [`Marketplace`] for every operation: create lanes and vendors, open bids with
//! [`Marketplace::create_shipment_bid`], then drive the auction with
//! [`Marketplace::place_offer`], [`Marketplace::counter_offer`],
//! [`Marketplace::respond_to_counter`] and [`Marketplace::submit_vehicle_details`].
//!
//! ## Example
//!
//! ```rust
//! use lane_auction::{CurrentUser, Marketplace, NewShipmentBid, NewVendor, UserId};
//! use rust_decimal::Decimal;
//!
//! let market = Marketplace::in_memory(UserId(1));
//! let admin = CurrentUser::admin(1, "ops");
//! let lane = market.create_lane(&admin, "Delhi", "Mumbai").unwrap();
//! let vendor = market
//!     .create_vendor(&admin, NewVendor { name: "Acme".into(), lanes: [lane.id].into(), ..Default::default() })
//!     .unwrap();
//! let now = market.now();
//! let bid = market
//!     .create_shipment_bid(&admin, NewShipmentBid {
//!         pickup_city: "delhi".into(),
//!         delivery_city: "MUMBAI".into(),
//!         bid_start: now,
//!         bid_end: now + 3_600_000,
//!         ..Default::default()
//!     })
//!     .unwrap();
//! let acme = CurrentUser::vendor(vendor.id, "Acme");
//! let view = market.place_offer(&acme, bid.bid.id, Decimal::from(48_000)).unwrap();
//! assert_eq!(view.my_rank, Some(1));
//! ```
//!
//! ## Lower-level API
//!
//! The pure pieces ([`city::normalize`], [`matcher`], [`ShipmentBid`] transitions) can be
//! used directly when you manage storage yourself.

pub mod api;
pub mod auction;
pub mod audit;
pub mod auth;
pub mod city;
pub mod clock;
pub mod config;
pub mod error;
pub mod lane;
pub mod market;
pub mod matcher;
pub mod notify;
pub mod offer_gen;
pub mod persistence;
pub mod record;
pub mod store;
pub mod types;
pub mod vendor;

pub use auction::{BidStatus, BidView, CounterResponse, NewShipmentBid, Offer, ShipmentBid, VehicleDetails};
pub use auth::{AuthConfig, CurrentUser, Role};
pub use config::MarketConfig;
pub use error::{MarketError, MarketResult};
pub use lane::{Lane, LaneUpdate};
pub use market::Marketplace;
pub use notify::{Notification, NotificationKind};
pub use offer_gen::{replay_into_bid, replay_into_market, Generator, GeneratorConfig};
pub use types::{BidId, LaneId, Millis, NotificationId, UserId, VendorId};
pub use vendor::{NewVendor, Vendor, VendorUpdate};
