mod chain;
mod policy;

pub use chain::CollectionId;
pub use policy::{CachePolicy, PolicyError};

pub(crate) use policy::{Body, Residency};
