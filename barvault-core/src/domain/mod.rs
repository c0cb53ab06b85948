//! Domain types shared by connectors, the store and the coordinator.

pub mod bar;
pub mod ids;
pub mod timeframe;
pub mod window;

pub use bar::{sort_dedup_keep_last, to_nanos, Bar};
pub use ids::{JobId, JobIdError};
pub use timeframe::{Timeframe, TimeframeParseError, TimeframeUnit};
pub use window::{TimeWindow, WindowError};
