//! Typed entity ids
//!
//! UUID newtypes so a hold id can never be passed where an offer id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// A buyer's posted need or listed article
    RequestId
);
entity_id!(
    /// A seller's bid against a request
    OfferId
);
entity_id!(
    /// The money-movement record
    HoldId
);
entity_id!(
    /// A commission invoice
    InvoiceId
);
entity_id!(
    /// A marketplace participant (buyer or seller)
    PartyId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_and_roundtrip() {
        let a = HoldId::new();
        let b = HoldId::new();
        assert_ne!(a, b);

        let json = serde_json::to_string(&a).unwrap();
        let back: HoldId = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
        // serde-transparent: serializes as the bare uuid string
        assert_eq!(json, format!("\"{}\"", a.0));
    }
}
