use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

const SECTION_SERVER: &str = "server";
const SECTION_FFMPEG: &str = "ffmpeg";
const SECTION_STORAGE: &str = "storage";
const SECTION_SUBTITLE: &str = "subtitle";
const SECTION_LOGGING: &str = "logging";

/// HTTP 监听配置
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// ffmpeg 执行相关配置
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegConfig {
    /// ffmpeg 可执行文件（名称或路径）
    pub binary: PathBuf,
    /// 单次 ffmpeg 调用的超时时间（秒）
    pub timeout_secs: u64,
    /// 同时运行的 ffmpeg 进程上限
    pub max_concurrent_jobs: usize,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            timeout_secs: 1800,
            max_concurrent_jobs: 2,
        }
    }
}

/// 暂存目录与上传限制
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub work_dir: PathBuf,
    pub max_upload_mb: u64,
}

impl StorageConfig {
    pub fn max_upload_bytes(&self) -> usize {
        usize::try_from(self.max_upload_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("temp"),
            max_upload_mb: 1024,
        }
    }
}

/// 字幕渲染的默认值
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleDefaults {
    /// 额外字体目录，传给 subtitles 滤镜的 fontsdir
    pub fonts_dir: Option<PathBuf>,
    pub default_font: String,
}

impl Default for SubtitleDefaults {
    fn default() -> Self {
        Self {
            fonts_dir: None,
            default_font: "Arial".to_string(),
        }
    }
}

/// 服务完整配置
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ffmpeg: FfmpegConfig,
    pub storage: StorageConfig,
    pub subtitle: SubtitleDefaults,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ffmpeg: FfmpegConfig::default(),
            storage: StorageConfig::default(),
            subtitle: SubtitleDefaults::default(),
            log_level: "info".to_string(),
        }
    }
}

/// 配置文件中读到的原始值，全部可选
#[derive(Debug, Default, Clone)]
struct PartialConfig {
    host: Option<String>,
    port: Option<u16>,
    binary: Option<PathBuf>,
    timeout_secs: Option<u64>,
    max_concurrent_jobs: Option<usize>,
    work_dir: Option<PathBuf>,
    max_upload_mb: Option<u64>,
    fonts_dir: Option<PathBuf>,
    default_font: Option<String>,
    log_level: Option<String>,
}

impl PartialConfig {
    /// 前者优先，缺失的字段用 `other` 补齐
    fn or(self, other: PartialConfig) -> PartialConfig {
        PartialConfig {
            host: self.host.or(other.host),
            port: self.port.or(other.port),
            binary: self.binary.or(other.binary),
            timeout_secs: self.timeout_secs.or(other.timeout_secs),
            max_concurrent_jobs: self.max_concurrent_jobs.or(other.max_concurrent_jobs),
            work_dir: self.work_dir.or(other.work_dir),
            max_upload_mb: self.max_upload_mb.or(other.max_upload_mb),
            fonts_dir: self.fonts_dir.or(other.fonts_dir),
            default_font: self.default_font.or(other.default_font),
            log_level: self.log_level.or(other.log_level),
        }
    }

    fn resolve(self) -> AppConfig {
        let defaults = AppConfig::default();
        AppConfig {
            server: ServerConfig {
                host: self.host.unwrap_or(defaults.server.host),
                port: self.port.unwrap_or(defaults.server.port),
            },
            ffmpeg: FfmpegConfig {
                binary: self.binary.unwrap_or(defaults.ffmpeg.binary),
                timeout_secs: self.timeout_secs.unwrap_or(defaults.ffmpeg.timeout_secs),
                // 0 会让所有任务永远等待
                max_concurrent_jobs: self
                    .max_concurrent_jobs
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.ffmpeg.max_concurrent_jobs),
            },
            storage: StorageConfig {
                work_dir: self.work_dir.unwrap_or(defaults.storage.work_dir),
                max_upload_mb: self.max_upload_mb.unwrap_or(defaults.storage.max_upload_mb),
            },
            subtitle: SubtitleDefaults {
                fonts_dir: self.fonts_dir.or(defaults.subtitle.fonts_dir),
                default_font: self.default_font.unwrap_or(defaults.subtitle.default_font),
            },
            log_level: self.log_level.unwrap_or(defaults.log_level),
        }
    }
}

/// 命令行传入的覆盖值
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// `host:port` 形式的监听地址
    pub bind: Option<String>,
    pub ffmpeg: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load(config_file: Option<&Path>, cli: &CliOverrides) -> Result<AppConfig> {
        // 显式指定的配置文件必须能读取，默认位置找不到则忽略
        let file_config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations().unwrap_or_default(),
        };

        let env_config = Self::load_from_env(|key| env::var(key).ok());
        let cli_config = Self::from_cli(cli)?;

        Ok(cli_config.or(env_config).or(file_config).resolve())
    }

    fn from_cli(cli: &CliOverrides) -> Result<PartialConfig> {
        let (host, port) = match &cli.bind {
            Some(bind) => {
                let (host, port) = bind
                    .rsplit_once(':')
                    .ok_or_else(|| anyhow::anyhow!("监听地址格式错误，应为 host:port: {}", bind))?;
                let port = port
                    .parse::<u16>()
                    .map_err(|e| anyhow::anyhow!("监听端口无效: {}: {}", port, e))?;
                (Some(host.to_string()), Some(port))
            }
            None => (None, None),
        };

        Ok(PartialConfig {
            host,
            port,
            binary: cli.ffmpeg.clone(),
            work_dir: cli.work_dir.clone(),
            ..PartialConfig::default()
        })
    }

    /// 从环境变量加载配置；`lookup` 便于测试时注入
    fn load_from_env<F>(lookup: F) -> PartialConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        PartialConfig {
            host: non_empty("HOST"),
            port: non_empty("PORT").and_then(|v| v.trim().parse().ok()),
            binary: non_empty("FFMPEG_PATH").map(PathBuf::from),
            timeout_secs: non_empty("MEDIA_API_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()),
            max_concurrent_jobs: non_empty("MEDIA_API_MAX_JOBS").and_then(|v| v.trim().parse().ok()),
            work_dir: non_empty("MEDIA_API_WORK_DIR").map(PathBuf::from),
            max_upload_mb: non_empty("MEDIA_API_MAX_UPLOAD_MB").and_then(|v| v.trim().parse().ok()),
            fonts_dir: non_empty("MEDIA_API_FONTS_DIR").map(PathBuf::from),
            default_font: non_empty("MEDIA_API_DEFAULT_FONT"),
            log_level: non_empty("LOG_LEVEL"),
        }
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<PartialConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut ini = configparser::ini::Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        // 先读对应节，缺失时退回 [DEFAULT]
        let get = |section: &str, key: &str| {
            ini.get(section, key)
                .or_else(|| ini.get("DEFAULT", key))
                .filter(|v| !v.is_empty())
        };

        Ok(PartialConfig {
            host: get(SECTION_SERVER, "host"),
            port: get(SECTION_SERVER, "port").and_then(|v| v.parse().ok()),
            binary: get(SECTION_FFMPEG, "binary").map(PathBuf::from),
            timeout_secs: get(SECTION_FFMPEG, "timeout_secs").and_then(|v| v.parse().ok()),
            max_concurrent_jobs: get(SECTION_FFMPEG, "max_concurrent_jobs").and_then(|v| v.parse().ok()),
            work_dir: get(SECTION_STORAGE, "work_dir").map(PathBuf::from),
            max_upload_mb: get(SECTION_STORAGE, "max_upload_mb").and_then(|v| v.parse().ok()),
            fonts_dir: get(SECTION_SUBTITLE, "fonts_dir").map(PathBuf::from),
            default_font: get(SECTION_SUBTITLE, "default_font"),
            log_level: get(SECTION_LOGGING, "level"),
        })
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<PartialConfig> {
        let mut candidates = vec![
            PathBuf::from("media-api.ini"),
            PathBuf::from(".media-api.ini"),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".media-api.ini"));
        }
        candidates.push(PathBuf::from("/etc/media-api.ini"));

        for candidate in candidates {
            if candidate.exists() {
                return Self::load_from_file(&candidate);
            }
        }

        Err(anyhow::anyhow!("未找到配置文件"))
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = AppConfig::default();
        let mut ini = configparser::ini::Ini::new();
        ini.set(SECTION_SERVER, "host", Some(defaults.server.host));
        ini.set(SECTION_SERVER, "port", Some(defaults.server.port.to_string()));
        ini.set(SECTION_FFMPEG, "binary", Some(defaults.ffmpeg.binary.display().to_string()));
        ini.set(SECTION_FFMPEG, "timeout_secs", Some(defaults.ffmpeg.timeout_secs.to_string()));
        ini.set(
            SECTION_FFMPEG,
            "max_concurrent_jobs",
            Some(defaults.ffmpeg.max_concurrent_jobs.to_string()),
        );
        ini.set(SECTION_STORAGE, "work_dir", Some(defaults.storage.work_dir.display().to_string()));
        ini.set(SECTION_STORAGE, "max_upload_mb", Some(defaults.storage.max_upload_mb.to_string()));
        ini.set(SECTION_SUBTITLE, "fonts_dir", Some(String::new()));
        ini.set(SECTION_SUBTITLE, "default_font", Some(defaults.subtitle.default_font));
        ini.set(SECTION_LOGGING, "level", Some(defaults.log_level));

        ini.write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_listen_on_port_8000() {
        let config = PartialConfig::default().resolve();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.storage.work_dir, PathBuf::from("temp"));
        assert_eq!(config.ffmpeg.binary, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn port_env_overrides_file() {
        let file = PartialConfig {
            port: Some(9000),
            host: Some("127.0.0.1".to_string()),
            ..PartialConfig::default()
        };
        let env = ConfigLoader::load_from_env(env_from(&[("PORT", "8080")]));
        let config = env.or(file).resolve();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn blank_or_invalid_env_values_are_ignored() {
        let env = ConfigLoader::load_from_env(env_from(&[
            ("PORT", "not-a-port"),
            ("FFMPEG_PATH", "   "),
            ("MEDIA_API_MAX_JOBS", "4"),
        ]));
        let config = env.resolve();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.ffmpeg.binary, PathBuf::from("ffmpeg"));
        assert_eq!(config.ffmpeg.max_concurrent_jobs, 4);
    }

    #[test]
    fn zero_concurrency_falls_back_to_default() {
        let partial = PartialConfig {
            max_concurrent_jobs: Some(0),
            ..PartialConfig::default()
        };
        assert_eq!(partial.resolve().ffmpeg.max_concurrent_jobs, 2);
    }

    #[test]
    fn cli_bind_takes_priority() {
        let cli = CliOverrides {
            bind: Some("127.0.0.1:3000".to_string()),
            ..CliOverrides::default()
        };
        let env = ConfigLoader::load_from_env(env_from(&[("PORT", "8080")]));
        let config = ConfigLoader::from_cli(&cli).unwrap().or(env).resolve();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn cli_bind_without_port_is_rejected() {
        let cli = CliOverrides {
            bind: Some("localhost".to_string()),
            ..CliOverrides::default()
        };
        assert!(ConfigLoader::from_cli(&cli).is_err());
    }

    #[test]
    fn ini_file_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media-api.ini");
        ConfigLoader::create_default_config(&path).unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap().resolve();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn ini_sections_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.ini");
        std::fs::write(
            &path,
            "[server]\nport = 9100\n[subtitle]\nfonts_dir = /usr/share/fonts/opentype/noto\ndefault_font = Noto Sans CJK TC\n[logging]\nlevel = debug\n",
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap().resolve();
        assert_eq!(config.server.port, 9100);
        assert_eq!(
            config.subtitle.fonts_dir,
            Some(PathBuf::from("/usr/share/fonts/opentype/noto"))
        );
        assert_eq!(config.subtitle.default_font, "Noto Sans CJK TC");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let result = ConfigLoader::load(
            Some(Path::new("/definitely/not/here.ini")),
            &CliOverrides::default(),
        );
        assert!(result.is_err());
    }
}
