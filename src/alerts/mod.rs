pub mod manager;
pub mod types;

pub use manager::AlertManager;
pub use types::{AlertStatus, AnomalyAlert};
