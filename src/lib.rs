pub mod encoders;
pub mod engine;
pub mod error;
pub mod filters;
pub mod interval;
pub mod job;
pub mod probe;
pub mod progress;
pub mod sidecar_api;
pub mod units;

pub use error::AppError;
pub use interval::{TimeInterval, TimeIntervalCollection};
pub use job::{ConversionOptions, Job, JobKind, JobState};
pub use probe::MediaInfo;
pub use progress::ProgressData;
