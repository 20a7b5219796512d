//! Lane registry: approved origin→destination routes.
//!
//! Lanes are stored with normalized city names. Among active lanes the directed pair
//! (origin, destination) is unique. Lanes are never removed; [`LaneRegistry::deactivate`]
//! clears `is_active` so vendor associations and bid history stay valid.

use crate::city;
use crate::record;
use crate::types::{LaneId, Millis};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Approved route. `origin` and `destination` are normalized and never equal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lane {
    pub id: LaneId,
    pub origin: String,
    pub destination: String,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub code: String,
    #[serde(default = "default_active", deserialize_with = "crate::record::lenient_active")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub created_at: Millis,
    #[serde(default, deserialize_with = "crate::record::or_default")]
    pub updated_at: Millis,
}

fn default_active() -> bool {
    true
}

/// Rejected lane mutation. Each variant is a distinct, user-facing reason.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LaneError {
    #[error("origin and destination cities are required")]
    EmptyCity,
    #[error("origin and destination must differ")]
    SameOriginDestination,
    #[error("this lane already exists")]
    DuplicateLane,
    #[error("lane {0} not found")]
    NotFound(LaneId),
}

impl LaneError {
    pub fn code(&self) -> &'static str {
        match self {
            LaneError::EmptyCity => "EmptyCity",
            LaneError::SameOriginDestination => "SameOriginDestination",
            LaneError::DuplicateLane => "DuplicateLane",
            LaneError::NotFound(_) => "LaneNotFound",
        }
    }
}

/// Fields an administrator may change on a lane. `None` keeps the current value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneUpdate {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Short mnemonic: first three characters of each normalized city, hyphen-joined.
/// Names shorter than three characters are used whole.
pub fn lane_code(origin: &str, destination: &str) -> String {
    let head = |s: &str| s.chars().take(3).collect::<String>();
    format!("{}-{}", head(origin), head(destination))
}

/// Normalizes both cities and checks they are non-empty and distinct.
pub fn validate_route(origin: &str, destination: &str) -> Result<(String, String), LaneError> {
    let origin = city::normalize(origin);
    let destination = city::normalize(destination);
    if origin.is_empty() || destination.is_empty() {
        return Err(LaneError::EmptyCity);
    }
    if origin == destination {
        return Err(LaneError::SameOriginDestination);
    }
    Ok((origin, destination))
}

/// Returns true if an active lane in `lanes` has the same normalized route.
///
/// `lanes` is untrusted: entries that are not objects, lack string `origin`/`destination`,
/// or carry a non-boolean `isActive` are skipped. Routes that fail validation (empty or
/// identical cities) never exist. The lane with id `exclude` is ignored.
pub fn lane_exists(lanes: &[Value], origin: &str, destination: &str, exclude: Option<LaneId>) -> bool {
    let Ok((origin, destination)) = validate_route(origin, destination) else {
        return false;
    };
    lanes.iter().enumerate().any(|(index, entry)| match read_route(entry) {
        Some(route) => {
            route.active
                && (exclude.is_none() || route.id != exclude)
                && city::normalize(route.origin) == origin
                && city::normalize(route.destination) == destination
        }
        None => {
            warn!("skipping malformed lane entry index={} kind={}", index, city::value_kind(entry));
            false
        }
    })
}

struct RawRoute<'a> {
    id: Option<LaneId>,
    origin: &'a str,
    destination: &'a str,
    active: bool,
}

fn read_route(entry: &Value) -> Option<RawRoute<'_>> {
    let obj = entry.as_object()?;
    let origin = obj.get("origin")?.as_str()?;
    let destination = obj.get("destination")?.as_str()?;
    let active = match obj.get("isActive") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => return None,
    };
    let id = obj.get("id").and_then(record::id_from_value);
    Some(RawRoute {
        id: id.map(LaneId),
        origin,
        destination,
        active,
    })
}

/// In-memory lane set with the registry rules. The caller persists returned lanes.
#[derive(Clone, Debug, Default)]
pub struct LaneRegistry {
    lanes: BTreeMap<LaneId, Lane>,
}

impl LaneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lanes(lanes: impl IntoIterator<Item = Lane>) -> Self {
        Self {
            lanes: lanes.into_iter().map(|l| (l.id, l)).collect(),
        }
    }

    pub fn get(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(&id)
    }

    /// All lanes, active or not, ordered by id.
    pub fn lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.values()
    }

    pub fn next_id(&self) -> LaneId {
        LaneId(self.lanes.keys().next_back().map(|id| id.0 + 1).unwrap_or(1))
    }

    /// True if an active lane other than `exclude` serves the (already normalized) route.
    pub fn has_active_route(&self, origin: &str, destination: &str, exclude: Option<LaneId>) -> bool {
        self.lanes.values().any(|l| {
            l.is_active
                && Some(l.id) != exclude
                && city::normalize(&l.origin) == origin
                && city::normalize(&l.destination) == destination
        })
    }

    /// Validates and inserts a new active lane.
    pub fn create(&mut self, origin: &str, destination: &str, now: Millis) -> Result<Lane, LaneError> {
        let (origin, destination) = validate_route(origin, destination)?;
        if self.has_active_route(&origin, &destination, None) {
            return Err(LaneError::DuplicateLane);
        }
        let lane = Lane {
            id: self.next_id(),
            code: lane_code(&origin, &destination),
            origin,
            destination,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.lanes.insert(lane.id, lane.clone());
        Ok(lane)
    }

    /// Applies `update` with the same rules as [`LaneRegistry::create`], excluding the lane
    /// itself from the duplicate check. An inactive result is never a duplicate.
    pub fn update(&mut self, id: LaneId, update: &LaneUpdate, now: Millis) -> Result<Lane, LaneError> {
        let current = self.lanes.get(&id).ok_or(LaneError::NotFound(id))?;
        let origin = update.origin.as_deref().unwrap_or(&current.origin);
        let destination = update.destination.as_deref().unwrap_or(&current.destination);
        let (origin, destination) = validate_route(origin, destination)?;
        let is_active = update.is_active.unwrap_or(current.is_active);
        if is_active && self.has_active_route(&origin, &destination, Some(id)) {
            return Err(LaneError::DuplicateLane);
        }
        let lane = Lane {
            id,
            code: lane_code(&origin, &destination),
            origin,
            destination,
            is_active,
            created_at: current.created_at,
            updated_at: now,
        };
        self.lanes.insert(id, lane.clone());
        Ok(lane)
    }

    /// Soft-deletes a lane. Returns the changed lane, or `None` when the id is unknown or
    /// the lane is already inactive.
    pub fn deactivate(&mut self, id: LaneId, now: Millis) -> Option<Lane> {
        let lane = self.lanes.get_mut(&id)?;
        if !lane.is_active {
            return None;
        }
        lane.is_active = false;
        lane.updated_at = now;
        Some(lane.clone())
    }
}
