//! Inquiry planning and federated execution.
//!
//! An inquiry resolves its metrics and dimensions, splits per owning
//! source into atomic queries, runs those in parallel against backend
//! connections, and combines the intermediate columnar results inside an
//! ephemeral in-process analytical engine.

mod atomic;
mod combine;
mod inquiry;

pub use atomic::AtomicQuery;
pub use combine::CombineContext;
pub use inquiry::{Inquiry, InquiryRequest};
