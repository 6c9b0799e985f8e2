pub mod types;
pub mod window;

pub use types::{GeoPoint, MetricType, TransactionMetric};
pub use window::{SlidingWindow, WindowStore};
