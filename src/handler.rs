use axum::{
    extract::{Multipart, Query, State},
    response::{Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::jobs::{
    convert::{self, ConvertParams},
    slideshow::{self, SlideshowParams},
    visualize::{SpectrogramParams, VisualizationParams, WaveformParams},
    vocals::{audio_encoding, VocalsParams},
};
use crate::server::AppState;
use crate::subtitle::{charenc, SubtitleFilter, SubtitleStyle};
use crate::workspace::{
    file_response, sanitize_format, save_field, timestamp, upload_extension, video_media_type,
    JobDir, SavedUpload,
};

/// 一次请求中按字段名归类的上传文件
#[derive(Debug, Default)]
struct Uploads {
    fields: HashMap<String, Vec<SavedUpload>>,
}

impl Uploads {
    /// 逐个读取 multipart 字段并落盘到 `dir`
    async fn collect(multipart: &mut Multipart, dir: &JobDir) -> ServiceResult<Self> {
        let mut uploads = Uploads::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            let dest = dir.unique_file(&upload_extension(field.file_name()));
            let saved = save_field(field, dest).await?;
            uploads.fields.entry(name).or_default().push(saved);
        }
        Ok(uploads)
    }

    /// 必填的单个文件，缺失或为空时返回 400
    fn take_one(&mut self, name: &str) -> ServiceResult<SavedUpload> {
        let upload = self
            .fields
            .remove(name)
            .and_then(|files| files.into_iter().next())
            .ok_or_else(|| ServiceError::bad_request(format!("缺少上传文件: {}", name)))?;
        if upload.size == 0 {
            return Err(ServiceError::bad_request(format!("上传文件为空: {}", name)));
        }
        Ok(upload)
    }

    /// 同名字段的全部文件，保持上传顺序
    fn take_all(&mut self, name: &str) -> Vec<SavedUpload> {
        self.fields.remove(name).unwrap_or_default()
    }
}

/// 过滤背景图：跳过空文件、无文件名或无法识别的图片
async fn usable_backgrounds(candidates: Vec<SavedUpload>) -> Vec<SavedUpload> {
    let mut usable = Vec::with_capacity(candidates.len());
    for (i, img) in candidates.into_iter().enumerate() {
        if img.original_name.is_empty() || img.size == 0 {
            warn!("⚠️  [背景图片] 跳过无效的背景图片 {}（无文件名或内容为空）", i);
            continue;
        }
        match sniff_image(&img.path).await {
            Some(format) => {
                info!("  • 背景图片 {}: {} ({:?})", i, img.original_name, format);
                usable.push(img);
            }
            None => warn!("⚠️  [背景图片] 跳过无法识别格式的图片 {}: {}", i, img.original_name),
        }
    }
    usable
}

/// 读取文件头判断图片格式
async fn sniff_image(path: &Path) -> Option<image::ImageFormat> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut header = [0u8; 64];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
    }
    image::guess_format(&header[..filled]).ok()
}

fn paths(uploads: &[SavedUpload]) -> Vec<&Path> {
    uploads.iter().map(|u| u.path.as_path()).collect()
}

/// 健康检查 Handler
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// 影片格式转换
pub async fn convert_video(
    State(state): State<AppState>,
    Query(params): Query<ConvertParams>,
    mut multipart: Multipart,
) -> ServiceResult<Response> {
    params.validate()?;
    let format = sanitize_format(&params.output_format)?;
    let start = Instant::now();

    let job = state.job_dir().await?;
    let mut uploads = Uploads::collect(&mut multipart, &job).await?;
    let input = uploads.take_one("file")?;
    info!(
        "🎬 [格式转换] 开始处理: {} ({} 字节) → {}",
        input.original_name, input.size, format
    );

    let output = job.unique_file(&format);
    state
        .ffmpeg
        .run("格式转换", &convert::build_args(&params, &input.path, &output))
        .await?;

    info!("✅ [格式转换] 完成，耗时: {:.2}秒", start.elapsed().as_secs_f64());
    let download = format!("converted_{}.{}", input.stem(), format);
    file_response(job, &output, "application/octet-stream", &download).await
}

/// 多张图片加背景音乐合成影片
pub async fn create_video(
    State(state): State<AppState>,
    Query(params): Query<SlideshowParams>,
    mut multipart: Multipart,
) -> ServiceResult<Response> {
    params.validate()?;
    let format = sanitize_format(&params.output_format)?;
    let start = Instant::now();

    let job = state.job_dir().await?;
    let mut uploads = Uploads::collect(&mut multipart, &job).await?;
    let audio = uploads.take_one("audio")?;
    let images: Vec<SavedUpload> = uploads
        .take_all("images")
        .into_iter()
        .filter(|img| img.size > 0)
        .collect();
    if images.is_empty() {
        return Err(ServiceError::bad_request("请至少上传一张图片"));
    }
    info!(
        "🎬 [图片合成] 开始处理: {} 张图片，每张 {} 秒，转场 {:?}",
        images.len(),
        params.duration_per_image,
        params.transition_type
    );

    let output = job.unique_file(&format);
    let args = slideshow::build_args(&params, &paths(&images), &audio.path, &output);
    state.ffmpeg.run("图片合成", &args).await?;

    info!("✅ [图片合成] 完成，耗时: {:.2}秒", start.elapsed().as_secs_f64());
    let download = format!("created_video_{}.{}", timestamp(), format);
    file_response(job, &output, video_media_type(&format), &download).await
}

/// 字幕任务的非样式参数
#[derive(Debug, Clone, Deserialize)]
pub struct SubtitleJobParams {
    #[serde(default = "default_video_format")]
    pub output_format: String,
    /// 字幕文件编码
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_video_format() -> String {
    "mp4".to_string()
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

/// 烧录字幕：`video` 为输入影片，结果写到 `output`
async fn burn_subtitle(
    state: &AppState,
    subtitle: &SavedUpload,
    style: &SubtitleStyle,
    encoding: Option<&str>,
    video: &Path,
    output: &Path,
) -> ServiceResult<()> {
    let defaults = &state.config.subtitle;
    let filter = SubtitleFilter {
        subtitle_path: &subtitle.path,
        style,
        charenc: encoding,
        fonts_dir: defaults.fonts_dir.as_deref(),
        default_font: &defaults.default_font,
    };
    state
        .ffmpeg
        .run("字幕烧录", &filter.to_args(video, output))
        .await
}

/// 把字幕存成带扩展名的文件，libass 依扩展名判断格式
async fn ensure_subtitle_extension(subtitle: SavedUpload) -> ServiceResult<SavedUpload> {
    if subtitle.path.extension().is_some() {
        return Ok(subtitle);
    }
    let renamed = subtitle.path.with_extension("srt");
    tokio::fs::rename(&subtitle.path, &renamed).await?;
    Ok(SavedUpload {
        path: renamed,
        ..subtitle
    })
}

/// 为影片加入字幕
pub async fn add_subtitle(
    State(state): State<AppState>,
    Query(params): Query<SubtitleJobParams>,
    Query(style): Query<SubtitleStyle>,
    mut multipart: Multipart,
) -> ServiceResult<Response> {
    style.validate()?;
    let format = sanitize_format(&params.output_format)?;
    let encoding = charenc(&params.encoding)?;
    let start = Instant::now();

    let job = state.job_dir().await?;
    let mut uploads = Uploads::collect(&mut multipart, &job).await?;
    let video = uploads.take_one("video")?;
    let subtitle = ensure_subtitle_extension(uploads.take_one("subtitle")?).await?;
    info!(
        "🎬 [字幕处理] 开始处理: 影片 {}，字幕 {}",
        video.original_name, subtitle.original_name
    );

    let output = job.unique_file(&format);
    burn_subtitle(&state, &subtitle, &style, encoding.as_deref(), &video.path, &output).await?;

    info!("✅ [字幕处理] 完成，耗时: {:.2}秒", start.elapsed().as_secs_f64());
    let download = format!("subtitled_video_{}.{}", timestamp(), format);
    file_response(job, &output, video_media_type(&format), &download).await
}

/// 音频波形视觉化
pub async fn create_waveform(
    State(state): State<AppState>,
    Query(params): Query<WaveformParams>,
    mut multipart: Multipart,
) -> ServiceResult<Response> {
    params.validate()?;
    let format = sanitize_format(&params.output_format)?;
    let start = Instant::now();

    let job = state.job_dir().await?;
    let mut uploads = Uploads::collect(&mut multipart, &job).await?;
    let audio = uploads.take_one("audio")?;
    info!(
        "🎬 [波形视觉化] 开始处理: {}，模式 {}",
        audio.original_name,
        params.wave_mode.as_str()
    );

    let output = job.unique_file(&format);
    state
        .ffmpeg
        .run("波形视觉化", &params.build_args(&audio.path, &output))
        .await?;

    info!("✅ [波形视觉化] 完成，耗时: {:.2}秒", start.elapsed().as_secs_f64());
    let download = format!("waveform_{}.{}", timestamp(), format);
    file_response(job, &output, video_media_type(&format), &download).await
}

/// 音频频谱视觉化
pub async fn create_spectrogram(
    State(state): State<AppState>,
    Query(params): Query<SpectrogramParams>,
    mut multipart: Multipart,
) -> ServiceResult<Response> {
    params.validate()?;
    let format = sanitize_format(&params.output_format)?;
    let start = Instant::now();

    let job = state.job_dir().await?;
    let mut uploads = Uploads::collect(&mut multipart, &job).await?;
    let audio = uploads.take_one("audio")?;
    info!("🎬 [频谱视觉化] 开始处理: {}", audio.original_name);

    let output = job.unique_file(&format);
    state
        .ffmpeg
        .run("频谱视觉化", &params.build_args(&audio.path, &output))
        .await?;

    info!("✅ [频谱视觉化] 完成，耗时: {:.2}秒", start.elapsed().as_secs_f64());
    let download = format!("spectrogram_{}.{}", timestamp(), format);
    file_response(job, &output, video_media_type(&format), &download).await
}

/// 背景影片 + 视觉化叠加，返回叠加结果路径
async fn render_visualization(
    state: &AppState,
    job: &JobDir,
    params: &VisualizationParams,
    audio: &SavedUpload,
    backgrounds: &[SavedUpload],
    format: &str,
) -> ServiceResult<std::path::PathBuf> {
    let step = Instant::now();
    let background_video = job.unique_file("mp4");
    state
        .ffmpeg
        .run(
            "背景影片",
            &params.background_args(&paths(backgrounds), &background_video),
        )
        .await?;
    if !background_video.exists() {
        return Err(ServiceError::Internal(anyhow::anyhow!("背景影片文件未生成")));
    }
    info!("✅ [音频视觉化] 背景影片完成，耗时: {:.2}秒", step.elapsed().as_secs_f64());

    let step = Instant::now();
    let output = job.unique_file(format);
    state
        .ffmpeg
        .run(
            "音频视觉化",
            &params.overlay_args(&background_video, &audio.path, &output),
        )
        .await?;
    info!("✅ [音频视觉化] 叠加完成，耗时: {:.2}秒", step.elapsed().as_secs_f64());
    Ok(output)
}

/// 多图背景加音频视觉化
pub async fn create_audio_visualization(
    State(state): State<AppState>,
    Query(params): Query<VisualizationParams>,
    mut multipart: Multipart,
) -> ServiceResult<Response> {
    params.validate()?;
    let format = sanitize_format(&params.output_format)?;
    let start = Instant::now();

    let job = state.job_dir().await?;
    let mut uploads = Uploads::collect(&mut multipart, &job).await?;
    let audio = uploads.take_one("audio")?;
    let backgrounds = usable_backgrounds(uploads.take_all("backgrounds")).await;
    if backgrounds.is_empty() {
        return Err(ServiceError::bad_request(
            "无法处理任何背景图片，请确认上传的图片格式正确",
        ));
    }
    info!(
        "🎬 [音频视觉化] 开始处理: {}，{} 张背景图片，类型 {:?}",
        audio.original_name,
        backgrounds.len(),
        params.visualization_type
    );

    let output = render_visualization(&state, &job, &params, &audio, &backgrounds, &format).await?;

    info!("🎉 [音频视觉化] 完成，总耗时: {:.2}秒", start.elapsed().as_secs_f64());
    let download = format!("audio_visualization_{}.{}", timestamp(), format);
    file_response(job, &output, video_media_type(&format), &download).await
}

/// 多图背景、音频视觉化并烧录字幕
pub async fn create_audio_visualization_with_subtitle(
    State(state): State<AppState>,
    Query(params): Query<VisualizationParams>,
    Query(style): Query<SubtitleStyle>,
    Query(job_params): Query<SubtitleJobParams>,
    mut multipart: Multipart,
) -> ServiceResult<Response> {
    params.validate()?;
    style.validate()?;
    let format = sanitize_format(&params.output_format)?;
    let encoding = charenc(&job_params.encoding)?;
    let start = Instant::now();

    let job = state.job_dir().await?;
    let mut uploads = Uploads::collect(&mut multipart, &job).await?;
    let candidates = uploads.take_all("backgrounds");
    if candidates.is_empty() {
        return Err(ServiceError::bad_request("请至少上传一张背景图片"));
    }
    let audio = uploads.take_one("audio")?;
    let subtitle = ensure_subtitle_extension(uploads.take_one("subtitle")?).await?;
    let backgrounds = usable_backgrounds(candidates).await;
    if backgrounds.is_empty() {
        return Err(ServiceError::bad_request(
            "无法处理任何背景图片，请确认上传的图片格式正确",
        ));
    }
    info!(
        "🎬 [视觉化字幕] 开始处理: {}，{} 张背景图片，字幕 {}",
        audio.original_name,
        backgrounds.len(),
        subtitle.original_name
    );

    let visualized =
        render_visualization(&state, &job, &params, &audio, &backgrounds, &format).await?;

    let output = job.unique_file(&format);
    burn_subtitle(&state, &subtitle, &style, encoding.as_deref(), &visualized, &output).await?;

    info!("🎉 [视觉化字幕] 完成，总耗时: {:.2}秒", start.elapsed().as_secs_f64());
    let download = format!("audio_visualization_subtitle_{}.{}", timestamp(), format);
    file_response(job, &output, video_media_type(&format), &download).await
}

/// 人声/伴奏分离
pub async fn separate_vocals(
    State(state): State<AppState>,
    Query(params): Query<VocalsParams>,
    mut multipart: Multipart,
) -> ServiceResult<Response> {
    params.validate()?;
    let format = sanitize_format(&params.output_format)?;
    let encoding = audio_encoding(&format)
        .ok_or_else(|| ServiceError::bad_request(format!("不支持的音频输出格式: {}", format)))?;
    let start = Instant::now();

    let job = state.job_dir().await?;
    let mut uploads = Uploads::collect(&mut multipart, &job).await?;
    let audio = uploads.take_one("audio")?;
    info!(
        "🎬 [人声分离] 开始处理: {}，输出 {}",
        audio.original_name,
        params.vocal_type.as_str()
    );

    let output = job.unique_file(&format);
    state
        .ffmpeg
        .run("人声分离", &params.build_args(&encoding, &audio.path, &output))
        .await?;

    info!("✅ [人声分离] 完成，耗时: {:.2}秒", start.elapsed().as_secs_f64());
    let download = format!("{}_{}.{}", params.vocal_type.as_str(), timestamp(), format);
    file_response(job, &output, encoding.media_type, &download).await
}
