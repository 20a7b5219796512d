//! Shipment-to-lane matching.
//!
//! A shipment matches a lane when the lane is active and the normalized pickup and
//! delivery cities equal the lane's normalized origin and destination. Matching is
//! directional and exact; there is no partial or fallback match.

use crate::auction::ShipmentBid;
use crate::city;
use crate::lane::Lane;
use crate::types::LaneId;
use crate::vendor::Vendor;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;

/// Lanes keyed by id, so vendor lane sets resolve without scanning every lane.
#[derive(Clone, Debug, Default)]
pub struct LaneIndex {
    by_id: HashMap<LaneId, Lane>,
}

impl LaneIndex {
    pub fn get(&self, id: LaneId) -> Option<&Lane> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Normalized (origin, destination) of every active lane the vendor references.
    fn vendor_routes(&self, vendor: &Vendor) -> Vec<(String, String)> {
        if vendor.is_deleted {
            return Vec::new();
        }
        vendor
            .lanes
            .iter()
            .filter_map(|id| {
                let lane = self.get(*id);
                if lane.is_none() {
                    debug!("vendor references unknown lane vendor_id={} lane_id={}", vendor.id, id);
                }
                lane
            })
            .filter(|lane| lane.is_active)
            .map(|lane| (city::normalize(&lane.origin), city::normalize(&lane.destination)))
            .filter(|(o, d)| !o.is_empty() && !d.is_empty())
            .collect()
    }
}

impl FromIterator<Lane> for LaneIndex {
    fn from_iter<I: IntoIterator<Item = Lane>>(iter: I) -> Self {
        Self {
            by_id: iter.into_iter().map(|l| (l.id, l)).collect(),
        }
    }
}

/// True if the pickup/delivery pair is served by `lane`.
pub fn route_matches(pickup: &str, delivery: &str, lane: &Lane) -> bool {
    if !lane.is_active {
        return false;
    }
    let pickup = city::normalize(pickup);
    let delivery = city::normalize(delivery);
    !pickup.is_empty()
        && !delivery.is_empty()
        && pickup == city::normalize(&lane.origin)
        && delivery == city::normalize(&lane.destination)
}

pub fn matches(shipment: &ShipmentBid, lane: &Lane) -> bool {
    route_matches(&shipment.pickup_city, &shipment.delivery_city, lane)
}

/// True if `vendor` may bid on `shipment`: it is not deleted and at least one of its
/// lanes matches.
pub fn vendor_serves(vendor: &Vendor, shipment: &ShipmentBid, lanes: &LaneIndex) -> bool {
    let routes = lanes.vendor_routes(vendor);
    serves(&routes, shipment)
}

fn serves(routes: &[(String, String)], shipment: &ShipmentBid) -> bool {
    if routes.is_empty() {
        return false;
    }
    let pickup = city::normalize(&shipment.pickup_city);
    let delivery = city::normalize(&shipment.delivery_city);
    if pickup.is_empty() || delivery.is_empty() {
        return false;
    }
    routes.iter().any(|(o, d)| *o == pickup && *d == delivery)
}

/// Shipments the vendor is eligible to see and bid on.
pub fn eligible_shipments_for_vendor<'a>(
    shipments: &'a [ShipmentBid],
    vendor: &Vendor,
    lanes: &LaneIndex,
) -> Vec<&'a ShipmentBid> {
    let routes = lanes.vendor_routes(vendor);
    shipments.iter().filter(|s| serves(&routes, s)).collect()
}

/// Vendors eligible to bid on `shipment`; used to address new-bid notifications.
pub fn eligible_vendors_for_shipment<'a>(
    shipment: &ShipmentBid,
    vendors: &'a [Vendor],
    lanes: &LaneIndex,
) -> Vec<&'a Vendor> {
    vendors
        .iter()
        .filter(|v| vendor_serves(v, shipment, lanes))
        .collect()
}

/// Matching over untyped records. Anything that cannot be read as a shipment route or a
/// lane is a non-match.
pub fn matches_record(shipment: &Value, lane: &Value) -> bool {
    let (Some(s), Some(l)) = (shipment.as_object(), lane.as_object()) else {
        warn!("match on non-object record");
        return false;
    };
    let field = |obj: &serde_json::Map<String, Value>, key: &str| {
        obj.get(key).map(city::normalize_value).unwrap_or_default()
    };
    let active = match l.get("isActive") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => false,
    };
    let pickup = field(s, "pickupCity");
    let delivery = field(s, "deliveryCity");
    active
        && !pickup.is_empty()
        && !delivery.is_empty()
        && pickup == field(l, "origin")
        && delivery == field(l, "destination")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::{NewShipmentBid, ShipmentBid};
    use crate::lane::LaneRegistry;
    use crate::types::{BidId, VendorId};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn shipment(id: u64, pickup: &str, delivery: &str) -> ShipmentBid {
        ShipmentBid::open(
            BidId(id),
            NewShipmentBid {
                pickup_city: pickup.into(),
                delivery_city: delivery.into(),
                bid_start: 0,
                bid_end: 1_000,
                ..Default::default()
            },
            0,
        )
        .unwrap()
    }

    fn vendor(id: u64, lanes: &[LaneId]) -> Vendor {
        Vendor {
            id: VendorId(id),
            name: format!("vendor-{}", id),
            contact_person: String::new(),
            phone: String::new(),
            email: String::new(),
            vehicle_types: BTreeSet::new(),
            lanes: lanes.iter().copied().collect(),
            is_deleted: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn matching_is_directional() {
        let mut reg = LaneRegistry::new();
        let lane = reg.create("Delhi", "Mumbai", 0).unwrap();
        assert!(matches(&shipment(1, " delhi", "MUMBAI"), &lane));
        assert!(!matches(&shipment(2, "Mumbai", "Delhi"), &lane));
    }

    #[test]
    fn inactive_lane_never_matches() {
        let mut reg = LaneRegistry::new();
        let lane = reg.create("Delhi", "Mumbai", 0).unwrap();
        let inactive = reg.deactivate(lane.id, 1).unwrap();
        assert!(!matches(&shipment(1, "Delhi", "Mumbai"), &inactive));
    }

    #[test]
    fn eligible_vendors_and_shipments_agree() {
        let mut reg = LaneRegistry::new();
        let dm = reg.create("Delhi", "Mumbai", 0).unwrap().id;
        let pg = reg.create("Pune", "Goa", 0).unwrap().id;
        let index: LaneIndex = reg.lanes().cloned().collect();
        let vendors = vec![vendor(1, &[dm]), vendor(2, &[pg]), vendor(3, &[]), vendor(4, &[dm, pg])];
        let shipments = vec![shipment(1, "Delhi", "Mumbai"), shipment(2, "Pune", "Goa"), shipment(3, "Goa", "Pune")];

        let ids: Vec<VendorId> = eligible_vendors_for_shipment(&shipments[0], &vendors, &index)
            .iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec![VendorId(1), VendorId(4)]);

        let seen: Vec<BidId> = eligible_shipments_for_vendor(&shipments, &vendors[3], &index)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(seen, vec![BidId(1), BidId(2)]);
        assert!(eligible_shipments_for_vendor(&shipments, &vendors[2], &index).is_empty());
    }

    #[test]
    fn deleted_vendor_and_unknown_lane_are_not_eligible() {
        let mut reg = LaneRegistry::new();
        let dm = reg.create("Delhi", "Mumbai", 0).unwrap().id;
        let index: LaneIndex = reg.lanes().cloned().collect();
        let mut gone = vendor(1, &[dm]);
        gone.is_deleted = true;
        let dangling = vendor(2, &[LaneId(404)]);
        let s = shipment(1, "Delhi", "Mumbai");
        assert!(!vendor_serves(&gone, &s, &index));
        assert!(!vendor_serves(&dangling, &s, &index));
    }

    #[test]
    fn matches_record_degrades_to_no_match() {
        let lane = json!({"origin": "Delhi", "destination": "Mumbai"});
        assert!(matches_record(&json!({"pickupCity": "delhi", "deliveryCity": "mumbai"}), &lane));
        assert!(!matches_record(&json!({"pickupCity": 7, "deliveryCity": "mumbai"}), &lane));
        assert!(!matches_record(&json!({"pickupCity": "delhi"}), &lane));
        assert!(!matches_record(&json!(null), &lane));
        assert!(!matches_record(
            &json!({"pickupCity": "delhi", "deliveryCity": "mumbai"}),
            &json!({"origin": "Delhi", "destination": "Mumbai", "isActive": false})
        ));
        assert!(!matches_record(&json!({"pickupCity": "", "deliveryCity": ""}), &json!({"origin": "", "destination": ""})));
    }
}
