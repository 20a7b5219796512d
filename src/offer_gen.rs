//! Synthetic offer generator.
//!
//! Deterministic, configurable offer stream for replay tests, demos, and load tests.
//! Same seed ⇒ same sequence of offers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::auction::{AuctionError, ShipmentBid};
use crate::auth::CurrentUser;
use crate::error::MarketError;
use crate::market::Marketplace;
use crate::matcher::LaneIndex;
use crate::types::{BidId, Millis, VendorId};
use crate::vendor::Vendor;

/// Configuration for the synthetic offer generator. Ranges are inclusive.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// RNG seed. Same seed ⇒ same offer stream.
    pub seed: u64,
    /// Number of offers produced by [`Generator::all_offers`].
    pub num_offers: usize,
    /// Vendors are drawn from `1..=num_vendors`.
    pub num_vendors: u64,
    /// Amount range, whole currency units.
    pub amount_min: i64,
    pub amount_max: i64,
    /// Amounts are `amount_min` plus a multiple of this step.
    pub amount_step: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_offers: 100,
            num_vendors: 5,
            amount_min: 40_000,
            amount_max: 60_000,
            amount_step: 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticOffer {
    pub seq: u64,
    pub vendor_id: VendorId,
    pub amount: Decimal,
}

pub struct Generator {
    rng: StdRng,
    config: GeneratorConfig,
    next_seq: u64,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            next_seq: 1,
        }
    }

    pub fn next_offer(&mut self) -> SyntheticOffer {
        let seq = self.next_seq;
        self.next_seq += 1;
        let vendor_id = VendorId(self.rng.gen_range(1..=self.config.num_vendors.max(1)));
        let step = self.config.amount_step.max(1);
        let steps = (self.config.amount_max - self.config.amount_min).max(0) / step;
        let amount = self.config.amount_min + self.rng.gen_range(0..=steps) * step;
        SyntheticOffer {
            seq,
            vendor_id,
            amount: Decimal::from(amount),
        }
    }

    pub fn take_offers(&mut self, n: usize) -> Vec<SyntheticOffer> {
        (0..n).map(|_| self.next_offer()).collect()
    }

    pub fn all_offers(&mut self) -> Vec<SyntheticOffer> {
        self.take_offers(self.config.num_offers)
    }
}

/// Counts from a replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub accepted: usize,
    pub rejected: usize,
}

/// Replays offers straight into a bid, without storage. Offers from vendors not in
/// `vendors` are counted as rejected.
pub fn replay_into_bid(
    bid: &mut ShipmentBid,
    vendors: &[Vendor],
    lanes: &LaneIndex,
    offers: impl IntoIterator<Item = SyntheticOffer>,
    now: Millis,
) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for offer in offers {
        let placed = vendors
            .iter()
            .find(|v| v.id == offer.vendor_id)
            .map(|v| bid.place_offer(v, lanes, offer.amount, now).is_ok())
            .unwrap_or(false);
        if placed {
            summary.accepted += 1;
        } else {
            summary.rejected += 1;
        }
    }
    summary
}

/// Replays offers through the marketplace as the generated vendors. Auction rejections
/// are counted; the first storage or authorization failure stops the replay.
pub fn replay_into_market(
    market: &Marketplace,
    bid_id: BidId,
    offers: impl IntoIterator<Item = SyntheticOffer>,
) -> Result<ReplaySummary, MarketError> {
    let mut summary = ReplaySummary::default();
    for offer in offers {
        let user = CurrentUser::vendor(offer.vendor_id, format!("gen-{}", offer.vendor_id));
        match market.place_offer(&user, bid_id, offer.amount) {
            Ok(_) => summary.accepted += 1,
            Err(MarketError::Auction(AuctionError::VendorNotEligible | AuctionError::AmountNotPositive)) => {
                summary.rejected += 1
            }
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::NewShipmentBid;
    use crate::lane::LaneRegistry;
    use std::collections::BTreeSet;

    #[test]
    fn same_seed_same_stream() {
        let c = GeneratorConfig {
            seed: 42,
            num_offers: 10,
            ..Default::default()
        };
        let a = Generator::new(c.clone()).all_offers();
        let b = Generator::new(c).all_offers();
        assert_eq!(a.len(), 10);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seed_different_stream() {
        let a = Generator::new(GeneratorConfig { seed: 1, num_offers: 8, ..Default::default() }).all_offers();
        let b = Generator::new(GeneratorConfig { seed: 2, num_offers: 8, ..Default::default() }).all_offers();
        assert_ne!(a, b, "different seeds should produce different offers");
    }

    #[test]
    fn amounts_stay_on_the_step_grid() {
        let offers = Generator::new(GeneratorConfig { seed: 7, num_offers: 200, ..Default::default() }).all_offers();
        for o in &offers {
            assert!(o.amount >= Decimal::from(40_000) && o.amount <= Decimal::from(60_000));
            assert_eq!((o.amount - Decimal::from(40_000)) % Decimal::from(500), Decimal::ZERO);
            assert!((1..=5).contains(&o.vendor_id.0));
        }
    }

    #[test]
    fn replay_into_bid_ranks_lowest_first() {
        let mut reg = LaneRegistry::new();
        let lane = reg.create("Delhi", "Mumbai", 0).unwrap().id;
        let index: LaneIndex = reg.lanes().cloned().collect();
        let vendors: Vec<Vendor> = (1..=4)
            .map(|id| Vendor {
                id: VendorId(id),
                name: format!("v{}", id),
                contact_person: String::new(),
                phone: String::new(),
                email: String::new(),
                vehicle_types: BTreeSet::new(),
                lanes: BTreeSet::from([lane]),
                is_deleted: false,
                created_at: 0,
                updated_at: 0,
            })
            .collect();
        let mut bid = ShipmentBid::open(
            BidId(1),
            NewShipmentBid {
                pickup_city: "Delhi".into(),
                delivery_city: "Mumbai".into(),
                bid_start: 0,
                bid_end: 1_000,
                ..Default::default()
            },
            0,
        )
        .unwrap();
        let offers = Generator::new(GeneratorConfig { seed: 3, num_offers: 50, num_vendors: 5, ..Default::default() })
            .all_offers();
        let summary = replay_into_bid(&mut bid, &vendors, &index, offers.clone(), 10);
        assert_eq!(summary.accepted + summary.rejected, 50);
        let expected_rejected = offers.iter().filter(|o| o.vendor_id == VendorId(5)).count();
        assert_eq!(summary.rejected, expected_rejected);
        let min = offers
            .iter()
            .filter(|o| o.vendor_id != VendorId(5))
            .map(|o| o.amount)
            .min();
        assert_eq!(bid.lowest_amount(), min);
    }
}
