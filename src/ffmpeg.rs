use anyhow::Context;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::FfmpegConfig;
use crate::error::{ServiceError, ServiceResult};

/// 每次调用都带上的参数：不输出进度统计，只记录错误
const BASE_ARGS: &[&str] = &["-hide_banner", "-nostdin", "-nostats", "-loglevel", "error"];

/// 错误信息只保留 stderr 的最后几行
const STDERR_TAIL_LINES: usize = 20;
const STDERR_TAIL_CHARS: usize = 4000;

/// ffmpeg 命令执行器
///
/// 所有任务共享同一个信号量，限制同时运行的 ffmpeg 进程数。
/// 子进程设置了 `kill_on_drop`，请求被取消时编码进程会一起结束。
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: PathBuf,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl FfmpegRunner {
    pub fn new(config: &FfmpegConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// 执行一次 ffmpeg，`args` 不包含程序名
    ///
    /// 非零退出时返回带 stderr 的 [`ServiceError::Ffmpeg`]。
    pub async fn run(&self, job: &str, args: &[OsString]) -> ServiceResult<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("ffmpeg 并发控制已关闭")?;

        debug!("[{}] ffmpeg 参数: {:?}", job, args);
        let start = Instant::now();

        let child = Command::new(&self.binary)
            .args(BASE_ARGS)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("执行 ffmpeg 命令失败: {}", self.binary.display()))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("等待 ffmpeg 结束失败")?,
            Err(_) => {
                error!("[{}] ffmpeg 超时（{} 秒），进程已终止", job, self.timeout.as_secs());
                return Err(ServiceError::Timeout(self.timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr);
            error!("[{}] FFmpeg error ({:?}): {}", job, output.status.code(), stderr);
            return Err(ServiceError::Ffmpeg {
                status: output.status.code(),
                stderr,
            });
        }

        info!("[{}] ffmpeg 完成，耗时: {:.2}秒", job, start.elapsed().as_secs_f64());
        Ok(())
    }

    /// `ffmpeg -version` 的第一行
    pub async fn version(&self) -> anyhow::Result<String> {
        first_line_of(&self.binary, &["-version"]).await
    }
}

/// 检查字体配置是否可用，返回 `fc-list` 列出的字体数量
///
/// fc-list 无法执行或没有任何字体时返回错误。
pub async fn font_count() -> anyhow::Result<usize> {
    count_fonts(Path::new("fc-list"), &[])
        .await
        .context("请确认已安装 fontconfig 与字体")
}

async fn count_fonts(program: &Path, args: &[&str]) -> anyhow::Result<usize> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("执行命令失败: {}", program.display()))?;
    if !output.status.success() {
        anyhow::bail!("{} 退出状态异常: {}", program.display(), output.status);
    }
    let count = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count();
    if count == 0 {
        anyhow::bail!("{} 没有列出任何字体", program.display());
    }
    Ok(count)
}

/// stderr 的最后 [`STDERR_TAIL_LINES`] 行，总长度不超过 [`STDERR_TAIL_CHARS`] 个字符
fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let lines: Vec<&str> = text.trim().lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    let chars = tail.chars().count();
    if chars <= STDERR_TAIL_CHARS {
        tail
    } else {
        tail.chars().skip(chars - STDERR_TAIL_CHARS).collect()
    }
}

async fn first_line_of(program: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("执行命令失败: {}", program.display()))?;
    if !output.status.success() {
        anyhow::bail!("{} 退出状态异常: {}", program.display(), output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_args<const N: usize>(args: [&str; N]) -> Vec<OsString> {
        args.into_iter().map(OsString::from).collect()
    }

    fn runner_for(binary: &str) -> FfmpegRunner {
        FfmpegRunner::new(&FfmpegConfig {
            binary: PathBuf::from(binary),
            timeout_secs: 5,
            max_concurrent_jobs: 1,
        })
    }

    #[tokio::test]
    async fn missing_binary_is_an_internal_error() {
        let runner = runner_for("/nonexistent/ffmpeg-binary");
        let err = runner.run("test", &os_args(["-version"])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reports_stderr() {
        // `false` 忽略所有参数并以 1 退出
        let runner = runner_for("false");
        let err = runner.run("test", &os_args(["-i", "x"])).await.unwrap_err();
        match err {
            ServiceError::Ffmpeg { status, .. } => assert_eq!(status, Some(1)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stderr_keeps_only_the_tail() {
        let raw: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(raw.as_bytes());
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.starts_with("line 80"));
        assert!(tail.ends_with("line 99"));

        let long = "x".repeat(STDERR_TAIL_CHARS * 2);
        assert_eq!(stderr_tail(long.as_bytes()).len(), STDERR_TAIL_CHARS);
    }

    #[test]
    fn progress_output_is_disabled() {
        assert!(BASE_ARGS.contains(&"-nostats"));
        let level = BASE_ARGS.iter().position(|a| *a == "-loglevel").unwrap();
        assert_eq!(BASE_ARGS[level + 1], "error");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn version_is_first_output_line() {
        // echo 把参数原样输出
        let runner = runner_for("echo");
        assert_eq!(runner.version().await.unwrap(), "-version");
        assert!(runner_for("false").version().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fonts_are_counted_and_required() {
        let two = count_fonts(Path::new("printf"), &["Arial.ttf\n\nNoto.otf\n"])
            .await
            .unwrap();
        assert_eq!(two, 2);
        // 没有任何字体、命令失败或不存在都视为错误
        assert!(count_fonts(Path::new("true"), &[]).await.is_err());
        assert!(count_fonts(Path::new("false"), &[]).await.is_err());
        assert!(count_fonts(Path::new("/nonexistent/fc-list"), &[]).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_is_success() {
        let runner = runner_for("true");
        runner.run("test", &os_args(["-y", "out.mp4"])).await.unwrap();
    }
}
