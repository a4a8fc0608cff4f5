pub mod alignment;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod ingest;
pub mod layout;
pub mod reference;
pub mod region;

pub use config::{CacheConfig, TrackConfig};
pub use engine::{TrackEngine, TrackLayout, TrackRequest};
pub use error::{Result, TrackError};
