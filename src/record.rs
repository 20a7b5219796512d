//! Boundary between untrusted store records and typed entities.
//!
//! Records arrive from the store as `serde_json::Value` and may have been written by
//! other clients. Parsing never fails: a record that cannot be read yields `None` and a
//! warning, and optional fields that are missing or malformed fall back to defaults
//! (no offers, `OPEN` status, active lane, empty lane set). Past this module the core
//! works with well-typed data only.

use crate::auction::{Offer, ShipmentBid};
use crate::city::value_kind;
use crate::lane::{lane_code, Lane};
use crate::types::LaneId;
use crate::vendor::Vendor;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeSet;

/// Deserializes an optional field, mapping malformed values to `None`.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Value::deserialize(deserializer)?;
    if raw.is_null() {
        return Ok(None);
    }
    Ok(serde_json::from_value(raw).ok())
}

/// Deserializes a field that is present but may be `null` or of the wrong type; either
/// becomes `T::default()`.
pub(crate) fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Value::deserialize(deserializer)?;
    if raw.is_null() {
        return Ok(T::default());
    }
    match serde_json::from_value(raw) {
        Ok(v) => Ok(v),
        Err(e) => {
            debug!("malformed field replaced by default error={}", e);
            Ok(T::default())
        }
    }
}

/// Lane `isActive`: `null` reads as active, like a missing field. Any other non-boolean
/// reads as inactive, so an unreadable flag never grants eligibility.
pub(crate) fn lenient_active<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => true,
        Value::Bool(b) => b,
        _ => false,
    })
}

/// Reads a record id given as a number or a numeric string.
pub(crate) fn id_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Vendor lane references. Numeric strings are accepted; other entries are dropped, and a
/// non-array value is an empty set.
pub(crate) fn lenient_lane_ids<'de, D>(deserializer: D) -> Result<BTreeSet<LaneId>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(BTreeSet::new());
    };
    Ok(items.iter().filter_map(id_from_value).map(LaneId).collect())
}

/// Tag lists such as vehicle types. Non-string entries are dropped.
pub(crate) fn lenient_strings<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(BTreeSet::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect())
}

/// Deserializes an offer list, dropping entries that are not valid offers. A missing
/// or non-array value is an empty list.
pub(crate) fn lenient_offers<'de, D>(deserializer: D) -> Result<Vec<Offer>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let Value::Array(items) = raw else {
        return Ok(Vec::new());
    };
    let total = items.len();
    let offers: Vec<Offer> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if offers.len() != total {
        warn!("dropped malformed offers count={}", total - offers.len());
    }
    Ok(offers)
}

fn parse<T: DeserializeOwned>(what: &str, value: &Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("skipping malformed {} record kind={} error={}", what, value_kind(value), e);
            None
        }
    }
}

pub fn parse_lane(value: &Value) -> Option<Lane> {
    let mut lane: Lane = parse("lane", value)?;
    if lane.code.is_empty() {
        lane.code = lane_code(&lane.origin, &lane.destination);
    }
    Some(lane)
}

pub fn parse_vendor(value: &Value) -> Option<Vendor> {
    parse("vendor", value)
}

pub fn parse_bid(value: &Value) -> Option<ShipmentBid> {
    parse("bid", value)
}

/// Parses every record, silently dropping (after logging) those that fail.
pub fn parse_all<T>(values: &[Value], parse_one: fn(&Value) -> Option<T>) -> Vec<T> {
    values.iter().filter_map(parse_one).collect()
}
