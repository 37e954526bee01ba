pub mod config;
pub mod deadlock;
pub mod inspector;


pub use config::{InspectorConfig, InterestingLineRule};
pub use inspector::Inspector;
