use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::error::ServiceResult;
use crate::ffmpeg::FfmpegRunner;
use crate::handler;
use crate::workspace::JobDir;

/// 各个 Handler 共享的状态
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ffmpeg: FfmpegRunner,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let ffmpeg = FfmpegRunner::new(&config.ffmpeg);
        Self {
            config: Arc::new(config),
            ffmpeg,
        }
    }

    /// 在工作目录下为本次请求创建暂存目录
    pub async fn job_dir(&self) -> ServiceResult<JobDir> {
        Ok(JobDir::create(&self.config.storage.work_dir).await?)
    }
}

/// 组装全部路由
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.storage.max_upload_bytes();

    Router::new()
        .route("/", get(handler::health_check))
        .route("/health", get(handler::health_check))
        .route("/convert", post(handler::convert_video))
        .route("/create_video", post(handler::create_video))
        .route("/add_subtitle", post(handler::add_subtitle))
        .route("/create_waveform", post(handler::create_waveform))
        .route("/create_spectrogram", post(handler::create_spectrogram))
        .route(
            "/create_audio_visualization",
            post(handler::create_audio_visualization),
        )
        .route(
            "/create_audio_visualization_with_subtitle",
            post(handler::create_audio_visualization_with_subtitle),
        )
        .route("/separate_vocals", post(handler::separate_vocals))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
