//! Shipment bid lifecycle: a reverse (descending-price) auction.
//!
//! ```text
//! OPEN --place_offer--> OPEN
//! OPEN --counter--> NEGOTIATING --accept--> FINALIZED --vehicle details--> ASSIGNED
//!                   NEGOTIATING --reject--> OPEN
//! OPEN | NEGOTIATING --close--> CLOSED
//! ```
//!
//! Lower offers rank better. Each vendor ranks once, by its best offer; ties go to the
//! best offer submitted first.
//! An `OPEN` bid whose end time has passed without offers is effectively `CLOSED`; this is
//! evaluated on read ([`ShipmentBid::effective_status`]) rather than by a scheduler.
//!
//! Every transition validates its guards before mutating, so a rejected call leaves the
//! bid untouched.

use crate::city;
use crate::matcher::{vendor_serves, LaneIndex};
use crate::types::{BidId, Millis, VendorId};
use crate::vendor::Vendor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidStatus {
    #[default]
    Open,
    Negotiating,
    Finalized,
    Assigned,
    Closed,
}

impl std::fmt::Display for BidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BidStatus::Open => "OPEN",
            BidStatus::Negotiating => "NEGOTIATING",
            BidStatus::Finalized => "FINALIZED",
            BidStatus::Assigned => "ASSIGNED",
            BidStatus::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// One competitive price from a vendor. Never mutated once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub vendor_id: VendorId,
    /// Vendor name at submission time.
    pub vendor_name: String,
    pub amount: Decimal,
    pub timestamp: Millis,
}

/// Dispatch details supplied by the winning vendor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDetails {
    pub vehicle_number: String,
    pub driver_name: String,
    pub driver_contact: String,
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub submitted_at: Millis,
}

impl VehicleDetails {
    fn missing_field(&self) -> Option<&'static str> {
        [
            ("vehicleNumber", &self.vehicle_number),
            ("driverName", &self.driver_name),
            ("driverContact", &self.driver_contact),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
    }
}

/// Admin input for a new shipment bid.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewShipmentBid {
    pub pickup_city: String,
    pub delivery_city: String,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub weight: Option<Decimal>,
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub reserved_price: Decimal,
    #[serde(default)]
    pub ceiling_rate: Decimal,
    #[serde(default)]
    pub step_value: Decimal,
    pub bid_start: Millis,
    pub bid_end: Millis,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentBid {
    pub id: BidId,
    /// Free text as entered; normalized only for comparison.
    pub pickup_city: String,
    pub delivery_city: String,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub material: String,
    #[serde(default, deserialize_with = "crate::record::lenient")]
    pub weight: Option<Decimal>,
    #[serde(default, deserialize_with = "crate::record::lenient")]
    pub vehicle_type: Option<String>,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub remarks: String,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub reserved_price: Decimal,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub ceiling_rate: Decimal,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub step_value: Decimal,
    pub bid_start: Millis,
    pub bid_end: Millis,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub status: BidStatus,
    /// In submission order.
    #[serde(default, deserialize_with = "crate::record::lenient_offers")]
    pub offers: Vec<Offer>,
    #[serde(default, deserialize_with = "crate::record::lenient")]
    pub winning_vendor_id: Option<VendorId>,
    #[serde(default, deserialize_with = "crate::record::lenient")]
    pub counter_offer: Option<Decimal>,
    #[serde(default, deserialize_with = "crate::record::lenient")]
    pub final_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "crate::record::lenient")]
    pub vehicle_details: Option<VehicleDetails>,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub created_at: Millis,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub updated_at: Millis,
}

/// Rejected auction operation. The bid is unchanged when one of these is returned.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuctionError {
    #[error("pickup and delivery cities are required")]
    EmptyCity,
    #[error("{0} must not be negative")]
    NegativeParameter(&'static str),
    #[error("bid start must be before bid end")]
    InvalidBidWindow,
    #[error("auction is not open for this action (status {0})")]
    AuctionNotOpen(BidStatus),
    #[error("offers are only accepted between bid start and bid end")]
    OutsideBidWindow,
    #[error("amount must be a positive number")]
    AmountNotPositive,
    #[error("vendor is not approved for this lane")]
    VendorNotEligible,
    #[error("no offers have been placed on this bid")]
    NoOffers,
    #[error("no counter-offer is pending (status {0})")]
    NotNegotiating(BidStatus),
    #[error("only the winning vendor may perform this action")]
    NotWinningVendor,
    #[error("bid is not finalized (status {0})")]
    NotFinalized(BidStatus),
    #[error("dispatch field {0} is required")]
    MissingDispatchField(&'static str),
    #[error("bid cannot be closed from status {0}")]
    CannotClose(BidStatus),
}

impl AuctionError {
    pub fn code(&self) -> &'static str {
        match self {
            AuctionError::EmptyCity => "EmptyCity",
            AuctionError::NegativeParameter(_) => "NegativeParameter",
            AuctionError::InvalidBidWindow => "InvalidBidWindow",
            AuctionError::AuctionNotOpen(_) => "AuctionNotOpen",
            AuctionError::OutsideBidWindow => "OutsideBidWindow",
            AuctionError::AmountNotPositive => "AmountNotPositive",
            AuctionError::VendorNotEligible => "VendorNotEligible",
            AuctionError::NoOffers => "NoOffers",
            AuctionError::NotNegotiating(_) => "NotNegotiating",
            AuctionError::NotWinningVendor => "NotWinningVendor",
            AuctionError::NotFinalized(_) => "NotFinalized",
            AuctionError::MissingDispatchField(_) => "MissingDispatchField",
            AuctionError::CannotClose(_) => "CannotClose",
        }
    }

    /// True for state-guard violations, as opposed to bad input.
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            AuctionError::AuctionNotOpen(_)
                | AuctionError::OutsideBidWindow
                | AuctionError::NoOffers
                | AuctionError::NotNegotiating(_)
                | AuctionError::NotFinalized(_)
                | AuctionError::CannotClose(_)
        )
    }
}

/// Outcome of a counter-offer response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterResponse {
    Accept,
    Reject,
}

impl ShipmentBid {
    /// Validates admin input and opens a new bid.
    pub fn open(id: BidId, new: NewShipmentBid, now: Millis) -> Result<Self, AuctionError> {
        if city::normalize(&new.pickup_city).is_empty() || city::normalize(&new.delivery_city).is_empty() {
            return Err(AuctionError::EmptyCity);
        }
        for (name, value) in [
            ("reservedPrice", new.reserved_price),
            ("ceilingRate", new.ceiling_rate),
            ("stepValue", new.step_value),
        ] {
            if value < Decimal::ZERO {
                return Err(AuctionError::NegativeParameter(name));
            }
        }
        if new.bid_start >= new.bid_end {
            return Err(AuctionError::InvalidBidWindow);
        }
        Ok(Self {
            id,
            pickup_city: new.pickup_city,
            delivery_city: new.delivery_city,
            material: new.material,
            weight: new.weight,
            vehicle_type: new.vehicle_type,
            remarks: new.remarks,
            reserved_price: new.reserved_price,
            ceiling_rate: new.ceiling_rate,
            step_value: new.step_value,
            bid_start: new.bid_start,
            bid_end: new.bid_end,
            status: BidStatus::Open,
            offers: Vec::new(),
            winning_vendor_id: None,
            counter_offer: None,
            final_amount: None,
            vehicle_details: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Status as of `now`. A stored `OPEN` past its end time with no offers reads as
    /// `CLOSED`; with offers it stays `OPEN` so the admin can still resolve it.
    pub fn effective_status(&self, now: Millis) -> BidStatus {
        if self.status == BidStatus::Open && now > self.bid_end && self.offers.is_empty() {
            BidStatus::Closed
        } else {
            self.status
        }
    }

    pub fn within_window(&self, now: Millis) -> bool {
        now >= self.bid_start && now <= self.bid_end
    }

    /// Each vendor's best offer, best first: ascending amount, ties broken by which best
    /// offer was submitted first. Superseded offers do not rank.
    pub fn ranking(&self) -> Vec<&Offer> {
        let mut best: Vec<(usize, &Offer)> = Vec::new();
        for (seq, offer) in self.offers.iter().enumerate() {
            match best.iter_mut().find(|(_, b)| b.vendor_id == offer.vendor_id) {
                Some(entry) if offer.amount < entry.1.amount => *entry = (seq, offer),
                Some(_) => {}
                None => best.push((seq, offer)),
            }
        }
        best.sort_by(|a, b| a.1.amount.cmp(&b.1.amount).then(a.0.cmp(&b.0)));
        best.into_iter().map(|(_, offer)| offer).collect()
    }

    /// Every participant's rank, in first-offer order.
    pub fn ranks(&self) -> Vec<(VendorId, usize)> {
        self.participants()
            .into_iter()
            .filter_map(|v| self.rank(v).map(|r| (v, r)))
            .collect()
    }

    /// 1-based position of the vendor in [`ShipmentBid::ranking`].
    pub fn rank(&self, vendor_id: VendorId) -> Option<usize> {
        self.ranking()
            .iter()
            .position(|o| o.vendor_id == vendor_id)
            .map(|i| i + 1)
    }

    /// Current rank-1 ("L1") offer.
    pub fn leader(&self) -> Option<&Offer> {
        self.ranking().into_iter().next()
    }

    pub fn lowest_amount(&self) -> Option<Decimal> {
        self.leader().map(|o| o.amount)
    }

    pub fn has_offer_from(&self, vendor_id: VendorId) -> bool {
        self.offers.iter().any(|o| o.vendor_id == vendor_id)
    }

    /// Vendors that placed at least one offer, in first-offer order.
    pub fn participants(&self) -> Vec<VendorId> {
        let mut seen = Vec::new();
        for offer in &self.offers {
            if !seen.contains(&offer.vendor_id) {
                seen.push(offer.vendor_id);
            }
        }
        seen
    }

    /// Appends an offer and returns the vendor's new rank.
    ///
    /// Re-bidding appends a new offer; earlier offers from the same vendor stay recorded.
    pub fn place_offer(
        &mut self,
        vendor: &Vendor,
        lanes: &LaneIndex,
        amount: Decimal,
        now: Millis,
    ) -> Result<usize, AuctionError> {
        let status = self.effective_status(now);
        if status != BidStatus::Open {
            return Err(AuctionError::AuctionNotOpen(status));
        }
        if !self.within_window(now) {
            return Err(AuctionError::OutsideBidWindow);
        }
        if amount <= Decimal::ZERO {
            return Err(AuctionError::AmountNotPositive);
        }
        if !vendor_serves(vendor, self, lanes) {
            return Err(AuctionError::VendorNotEligible);
        }
        self.offers.push(Offer {
            vendor_id: vendor.id,
            vendor_name: vendor.name.clone(),
            amount,
            timestamp: now,
        });
        self.updated_at = now;
        // The vendor just bid, so a rank exists.
        Ok(self.rank(vendor.id).unwrap_or(self.offers.len()))
    }

    /// Admin counter-offer to the current rank-1 vendor. Returns that vendor.
    pub fn counter(&mut self, amount: Decimal, now: Millis) -> Result<VendorId, AuctionError> {
        let status = self.effective_status(now);
        if status != BidStatus::Open {
            return Err(AuctionError::AuctionNotOpen(status));
        }
        if amount <= Decimal::ZERO {
            return Err(AuctionError::AmountNotPositive);
        }
        let target = self.leader().map(|o| o.vendor_id).ok_or(AuctionError::NoOffers)?;
        self.status = BidStatus::Negotiating;
        self.counter_offer = Some(amount);
        self.winning_vendor_id = Some(target);
        self.updated_at = now;
        Ok(target)
    }

    /// Targeted vendor accepts (→ `FINALIZED`) or rejects (→ `OPEN`) the counter-offer.
    pub fn respond_to_counter(
        &mut self,
        vendor_id: VendorId,
        response: CounterResponse,
        now: Millis,
    ) -> Result<BidStatus, AuctionError> {
        if self.status != BidStatus::Negotiating {
            return Err(AuctionError::NotNegotiating(self.effective_status(now)));
        }
        if self.winning_vendor_id != Some(vendor_id) {
            return Err(AuctionError::NotWinningVendor);
        }
        match response {
            CounterResponse::Accept => {
                self.final_amount = self.counter_offer;
                self.status = BidStatus::Finalized;
            }
            CounterResponse::Reject => {
                self.counter_offer = None;
                self.winning_vendor_id = None;
                self.status = BidStatus::Open;
            }
        }
        self.updated_at = now;
        Ok(self.status)
    }

    /// Winning vendor records the dispatch vehicle, completing the lifecycle.
    pub fn submit_vehicle_details(
        &mut self,
        vendor_id: VendorId,
        mut details: VehicleDetails,
        now: Millis,
    ) -> Result<(), AuctionError> {
        if self.status != BidStatus::Finalized {
            return Err(AuctionError::NotFinalized(self.effective_status(now)));
        }
        if self.winning_vendor_id != Some(vendor_id) {
            return Err(AuctionError::NotWinningVendor);
        }
        if let Some(field) = details.missing_field() {
            return Err(AuctionError::MissingDispatchField(field));
        }
        details.submitted_at = now;
        self.vehicle_details = Some(details);
        self.status = BidStatus::Assigned;
        self.updated_at = now;
        Ok(())
    }

    /// Administrative termination. Allowed from `OPEN` and `NEGOTIATING` regardless of
    /// other guards; any pending counter-offer is dropped.
    pub fn close(&mut self, now: Millis) -> Result<(), AuctionError> {
        match self.status {
            BidStatus::Open | BidStatus::Negotiating => {
                self.status = BidStatus::Closed;
                self.counter_offer = None;
                self.winning_vendor_id = None;
                self.updated_at = now;
                Ok(())
            }
            other => Err(AuctionError::CannotClose(other)),
        }
    }
}

/// A bid as presented to one user, with lazily evaluated status.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidView {
    #[serde(flatten)]
    pub bid: ShipmentBid,
    pub effective_status: BidStatus,
    pub lowest_offer: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_rank: Option<usize>,
}

impl BidView {
    pub fn for_admin(bid: ShipmentBid, now: Millis) -> Self {
        Self {
            effective_status: bid.effective_status(now),
            lowest_offer: bid.lowest_amount(),
            my_rank: None,
            bid,
        }
    }

    /// Vendor view: competitors' offers are removed, the vendor's rank is filled in.
    pub fn for_vendor(mut bid: ShipmentBid, vendor_id: VendorId, now: Millis) -> Self {
        let effective_status = bid.effective_status(now);
        let lowest_offer = bid.lowest_amount();
        let my_rank = bid.rank(vendor_id);
        bid.offers.retain(|o| o.vendor_id == vendor_id);
        Self {
            bid,
            effective_status,
            lowest_offer,
            my_rank,
        }
    }
}
