//! Pure projections from source API payloads to CRM property bags.
//! Nothing in here performs I/O.

pub mod contact;
pub mod order;
pub mod transaction;
