//! Backpressure-driven media pipelines: still images paced into timestamped GPU frames,
//! and decoded audio fed to an output device that doubles as the playback clock.

pub mod audio;
pub mod error;
pub mod gpu;
pub mod media;
pub mod settings;
pub mod visual;
pub mod worker;

pub use error::PipelineError;
pub use settings::PipelineConfig;
