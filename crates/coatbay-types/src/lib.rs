//! Coatbay Types - Canonical domain types for the settlement engine
//!
//! Everything the settlement core persists or moves across a seam lives
//! here: integer minor-unit money, typed ids, the marketplace entities
//! (Request, Offer), the money-movement record (Hold), commission invoices,
//! seller tax profiles, and the error taxonomy.

pub mod error;
pub mod hold;
pub mod ids;
pub mod invoice;
pub mod marketplace;
pub mod money;
pub mod seller;

pub use error::{CoatbayError, Result};
pub use hold::{Hold, HoldKind, HoldStatus};
pub use ids::{HoldId, InvoiceId, OfferId, PartyId, RequestId};
pub use invoice::{Invoice, TaxMode, REVERSE_CHARGE_NOTE};
pub use marketplace::{Offer, OfferStatus, PayoutStatus, Request, RequestStatus};
pub use money::{round_half_up, Currency, Money};
pub use seller::SellerProfile;
