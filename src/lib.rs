pub mod color;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod handler;
pub mod jobs;
pub mod server;
pub mod subtitle;
pub mod workspace;

pub use config::{AppConfig, CliOverrides, ConfigLoader};
pub use error::{ServiceError, ServiceResult};
pub use ffmpeg::FfmpegRunner;
pub use server::{router, AppState};
pub use subtitle::SubtitleStyle;
