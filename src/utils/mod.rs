pub mod caching;
pub mod gather;
pub mod math;

pub use caching::{CacheConfig, TimedCache};
pub use gather::{gather, GatherReport};
