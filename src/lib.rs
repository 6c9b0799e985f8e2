pub mod alerts;
pub mod api;
pub mod config;
pub mod consumer;
pub mod detect;
pub mod engine;
pub mod errors;
pub mod lifecycle;
pub mod metrics;
pub mod profile;
pub mod realtime;
pub mod storage;

pub use config::Config;
pub use engine::{Engine, IngestOutcome};
pub use lifecycle::LifecycleManager;
