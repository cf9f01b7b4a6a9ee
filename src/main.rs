use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use media_api::{config::ConfigLoader, ffmpeg, router, AppConfig, AppState, CliOverrides};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// 媒体处理服务 - 基于 ffmpeg 的影片转换、合成、字幕与音频视觉化 HTTP 接口
#[derive(Parser, Debug)]
#[command(name = "media-api")]
#[command(about = "媒体处理服务：格式转换、图片合成影片、字幕烧录、音频视觉化、人声分离", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Web 服务模式：启动 HTTP 服务器
    Serve {
        /// 监听地址 host:port（默认读取环境变量 HOST/PORT，否则 0.0.0.0:8000）
        #[arg(short, long)]
        bind: Option<String>,

        /// 配置文件路径（可选，支持 .ini 格式）
        /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
        #[arg(long)]
        config: Option<PathBuf>,

        /// ffmpeg 可执行文件路径，也可通过环境变量 FFMPEG_PATH 设置
        #[arg(long)]
        ffmpeg: Option<PathBuf>,

        /// 暂存目录，也可通过环境变量 MEDIA_API_WORK_DIR 设置
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// 检查 ffmpeg 与字体配置是否可用
    Check {
        /// 配置文件路径（可选）
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 输出路径
        #[arg(default_value = "media-api.ini")]
        path: PathBuf,
    },
}

fn init_tracing(level: &str) {
    // RUST_LOG 优先，其次使用配置中的日志级别
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Serve {
            bind,
            config: config_file,
            ffmpeg,
            work_dir,
        } => {
            let overrides = CliOverrides {
                bind,
                ffmpeg,
                work_dir,
            };
            let config =
                ConfigLoader::load(config_file.as_deref(), &overrides).context("加载配置失败")?;
            init_tracing(&config.log_level);
            start_web_server(config).await?;
        }
        Commands::Check { config: config_file } => {
            let config = ConfigLoader::load(config_file.as_deref(), &CliOverrides::default())
                .context("加载配置失败")?;
            init_tracing(&config.log_level);
            check_environment(&config).await?;
        }
        Commands::InitConfig { path } => {
            init_tracing("info");
            ConfigLoader::create_default_config(&path)?;
            tracing::info!("✅ 已生成默认配置文件: {}", path.display());
        }
    }

    Ok(())
}

async fn check_environment(config: &AppConfig) -> Result<()> {
    let runner = media_api::FfmpegRunner::new(&config.ffmpeg);
    let version = runner
        .version()
        .await
        .with_context(|| format!("ffmpeg 不可用: {}", runner.binary().display()))?;
    tracing::info!("✅ ffmpeg: {}", version);

    let fonts = ffmpeg::font_count().await.context("字体检查失败")?;
    tracing::info!("✅ fontconfig: 找到 {} 个字体", fonts);

    if let Some(dir) = &config.subtitle.fonts_dir {
        if !dir.is_dir() {
            tracing::warn!("⚠️  字体目录不存在: {}", dir.display());
        }
    }
    Ok(())
}

async fn start_web_server(config: AppConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.storage.work_dir)
        .await
        .with_context(|| format!("创建工作目录失败: {}", config.storage.work_dir.display()))?;

    let bind = config.server.bind_addr();
    tracing::info!(
        "配置: ffmpeg={}, 超时={}秒, 并发上限={}, 工作目录={}, 上传上限={}MB",
        config.ffmpeg.binary.display(),
        config.ffmpeg.timeout_secs,
        config.ffmpeg.max_concurrent_jobs,
        config.storage.work_dir.display(),
        config.storage.max_upload_mb
    );

    let app = router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/health", bind);
    tracing::info!("  • 格式转换: POST http://{}/convert", bind);
    tracing::info!("  • 图片合成影片: POST http://{}/create_video", bind);
    tracing::info!("  • 字幕烧录: POST http://{}/add_subtitle", bind);
    tracing::info!("  • 波形视觉化: POST http://{}/create_waveform", bind);
    tracing::info!("  • 频谱视觉化: POST http://{}/create_spectrogram", bind);
    tracing::info!("  • 音频视觉化: POST http://{}/create_audio_visualization", bind);
    tracing::info!(
        "  • 音频视觉化加字幕: POST http://{}/create_audio_visualization_with_subtitle",
        bind
    );
    tracing::info!("  • 人声分离: POST http://{}/separate_vocals", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}
