//! Boundary error for marketplace operations.
//!
//! Every rejected operation carries a stable reason code ([`MarketError::code`]) and an
//! actionable message (`Display`), so callers can tell "origin and destination must differ"
//! from "this lane already exists" without parsing text.

use crate::auction::AuctionError;
use crate::lane::LaneError;
use crate::store::StoreError;
use crate::types::BidId;
use crate::vendor::VendorError;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error(transparent)]
    Lane(#[from] LaneError),
    #[error(transparent)]
    Vendor(#[from] VendorError),
    #[error(transparent)]
    Auction(#[from] AuctionError),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("bid {0} not found")]
    BidNotFound(BidId),
    /// The store did not accept the write; nothing changed.
    #[error("change was not saved: {0}")]
    NotPersisted(StoreError),
    #[error("records could not be read: {0}")]
    StoreUnavailable(StoreError),
}

impl MarketError {
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::Lane(e) => e.code(),
            MarketError::Vendor(e) => e.code(),
            MarketError::Auction(e) => e.code(),
            MarketError::Unauthorized(_) => "Unauthorized",
            MarketError::BidNotFound(_) => "BidNotFound",
            MarketError::NotPersisted(_) => "NotPersisted",
            MarketError::StoreUnavailable(_) => "StoreUnavailable",
        }
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
