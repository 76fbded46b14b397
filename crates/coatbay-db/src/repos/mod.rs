//! Repositories, one per table
//!
//! Every state transition is a single conditional UPDATE whose affected-row
//! count is the sole race arbiter. No repo ever does SELECT-then-UPDATE.

mod audit;
mod hold;
mod invoice;
mod offer;
mod request;
mod seller;

pub use audit::AuditRepo;
pub use hold::HoldRepo;
pub use invoice::InvoiceRepo;
pub use offer::OfferRepo;
pub use request::RequestRepo;
pub use seller::SellerRepo;
