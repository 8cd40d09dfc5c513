//! Strata Xactions - long-running background tasks
//!
//! An "extended action" (xaction) is a long-lived background task with start
//! and end times, object/byte counters, an abort token, and a stats snapshot.
//! The demand variant reference-counts its pending work and self-terminates
//! after staying idle, driven by the shared housekeeper. The listing xaction
//! enumerates a bucket page by page behind a client-supplied handle.

pub mod base;
pub mod demand;
pub mod query;
pub mod registry;

pub use base::{Xact, XactBase, XactStats};
pub use demand::XactDemandBase;
pub use query::{BucketEntry, ObjectsListingXact, ObjectsQuery, QueryRegistry};
pub use registry::XactRegistry;
