//! Bounded on-disk cache of sliced alignment files.

pub mod naming;
pub mod policy;
pub mod scheduler;

pub use naming::{slice_file_name, SliceCache};
pub use policy::{plan_eviction, scan, sweep, CacheEntry, EvictionPlan, SweepReport};
pub use scheduler::CacheScheduler;
