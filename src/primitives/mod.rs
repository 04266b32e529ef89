//! Signal primitives shared by all detectors
//!
//! - **Time of day**: late-night classification with wrap-around past midnight
//! - **Clustering**: grouping purchases that happen close together in time
//! - **Category**: key normalization and comfort-category classification

pub mod category;
pub mod clustering;
pub mod time_of_day;

pub use category::{normalize_key, ComfortClassifier};
pub use clustering::{cluster_timestamps, largest_cluster_size, Cluster};
pub use time_of_day::{classify_time, is_late_night_hour, minute_of_day};
