//! Identifiers shared across the marketplace.
//!
//! All identifiers are newtype wrappers over `u64` and serialize as plain numbers.
//! Record-store keys are their decimal string form (see [`LaneId::key`] and friends).

/// Unix timestamp in milliseconds.
pub type Millis = u64;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            /// Record-store key for this id.
            pub fn key(&self) -> String {
                self.0.to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Approved origin→destination route.
    LaneId
);
id_type!(
    /// Transport vendor.
    VendorId
);
id_type!(
    /// Shipment bid (one auction).
    BidId
);
id_type!(
    /// Authenticated user. A vendor account's user id equals its [`VendorId`].
    UserId
);
id_type!(
    /// Notification identifier.
    NotificationId
);

impl From<VendorId> for UserId {
    fn from(id: VendorId) -> Self {
        UserId(id.0)
    }
}
