//! Transport vendors and the lanes they are approved to serve.
//!
//! A vendor's eligibility is derived, never stored: the lanes it references that are
//! currently active ([`Vendor::eligible_lane_ids`]). Deactivating a lane removes it from
//! every vendor's eligibility without touching vendor records.

use crate::matcher::LaneIndex;
use crate::types::{LaneId, Millis, VendorId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub contact_person: String,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub phone: String,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub email: String,
    /// Capability tags, e.g. `"32FT-MXL"`.
    #[serde(default, deserialize_with = "crate::record::lenient_strings")]
    pub vehicle_types: BTreeSet<String>,
    /// Approved lanes. May reference inactive lanes, which grant nothing.
    #[serde(default, deserialize_with = "crate::record::lenient_lane_ids")]
    pub lanes: BTreeSet<LaneId>,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub is_deleted: bool,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub created_at: Millis,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub updated_at: Millis,
}

impl Vendor {
    /// Referenced lanes that exist and are active.
    pub fn eligible_lane_ids(&self, lanes: &LaneIndex) -> BTreeSet<LaneId> {
        if self.is_deleted {
            return BTreeSet::new();
        }
        self.lanes
            .iter()
            .copied()
            .filter(|id| lanes.get(*id).map(|l| l.is_active).unwrap_or(false))
            .collect()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVendor {
    pub name: String,
    #[serde(default)]
    pub contact_person: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub vehicle_types: BTreeSet<String>,
    #[serde(default)]
    pub lanes: BTreeSet<LaneId>,
}

/// Partial vendor update. `None` keeps the current value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub vehicle_types: Option<BTreeSet<String>>,
    #[serde(default)]
    pub lanes: Option<BTreeSet<LaneId>>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VendorError {
    #[error("vendor name is required")]
    EmptyName,
    #[error("lane {0} does not exist")]
    UnknownLane(LaneId),
    #[error("vendor {0} not found")]
    NotFound(VendorId),
}

impl VendorError {
    pub fn code(&self) -> &'static str {
        match self {
            VendorError::EmptyName => "EmptyName",
            VendorError::UnknownLane(_) => "UnknownLane",
            VendorError::NotFound(_) => "VendorNotFound",
        }
    }
}

fn check_lanes(lanes: &BTreeSet<LaneId>, index: &LaneIndex) -> Result<(), VendorError> {
    match lanes.iter().find(|id| index.get(**id).is_none()) {
        Some(id) => Err(VendorError::UnknownLane(*id)),
        None => Ok(()),
    }
}

/// In-memory vendor set. The caller persists returned vendors.
#[derive(Clone, Debug, Default)]
pub struct VendorRegistry {
    vendors: BTreeMap<VendorId, Vendor>,
}

impl VendorRegistry {
    pub fn from_vendors(vendors: impl IntoIterator<Item = Vendor>) -> Self {
        Self {
            vendors: vendors.into_iter().map(|v| (v.id, v)).collect(),
        }
    }

    pub fn get(&self, id: VendorId) -> Option<&Vendor> {
        self.vendors.get(&id)
    }

    pub fn next_id(&self) -> VendorId {
        VendorId(self.vendors.keys().next_back().map(|id| id.0 + 1).unwrap_or(1))
    }

    /// Creates a vendor. Every referenced lane must exist (active or not).
    pub fn create(&mut self, new: NewVendor, lanes: &LaneIndex, now: Millis) -> Result<Vendor, VendorError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(VendorError::EmptyName);
        }
        check_lanes(&new.lanes, lanes)?;
        let vendor = Vendor {
            id: self.next_id(),
            name: name.to_string(),
            contact_person: new.contact_person,
            phone: new.phone,
            email: new.email,
            vehicle_types: new.vehicle_types,
            lanes: new.lanes,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.vendors.insert(vendor.id, vendor.clone());
        Ok(vendor)
    }

    pub fn update(
        &mut self,
        id: VendorId,
        update: VendorUpdate,
        lanes: &LaneIndex,
        now: Millis,
    ) -> Result<Vendor, VendorError> {
        let mut vendor = self.vendors.get(&id).cloned().ok_or(VendorError::NotFound(id))?;
        if let Some(name) = update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(VendorError::EmptyName);
            }
            vendor.name = name.to_string();
        }
        if let Some(new_lanes) = update.lanes {
            check_lanes(&new_lanes, lanes)?;
            vendor.lanes = new_lanes;
        }
        if let Some(v) = update.contact_person {
            vendor.contact_person = v;
        }
        if let Some(v) = update.phone {
            vendor.phone = v;
        }
        if let Some(v) = update.email {
            vendor.email = v;
        }
        if let Some(v) = update.vehicle_types {
            vendor.vehicle_types = v;
        }
        vendor.updated_at = now;
        self.vendors.insert(id, vendor.clone());
        Ok(vendor)
    }

    /// Soft-deletes a vendor. Returns `None` when unknown or already deleted.
    pub fn deactivate(&mut self, id: VendorId, now: Millis) -> Option<Vendor> {
        let vendor = self.vendors.get_mut(&id)?;
        if vendor.is_deleted {
            return None;
        }
        vendor.is_deleted = true;
        vendor.updated_at = now;
        Some(vendor.clone())
    }
}
