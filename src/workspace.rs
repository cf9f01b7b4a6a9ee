use anyhow::Context;
use axum::{
    body::Body,
    extract::multipart::Field,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use chrono::Local;
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};

/// RFC 5987 attr-char 以外的字符都要编码
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// 单个请求的暂存目录，drop 时连同内容一起删除
#[derive(Debug)]
pub struct JobDir {
    path: PathBuf,
}

impl JobDir {
    /// 在 `root` 下创建一个以 UUID 命名的新目录
    pub async fn create(root: &Path) -> anyhow::Result<Self> {
        let path = root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("创建临时目录失败: {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 目录内一个新的唯一文件路径，`extension` 不含点，可为空
    pub fn unique_file(&self, extension: &str) -> PathBuf {
        let name = Uuid::new_v4().to_string();
        if extension.is_empty() {
            self.path.join(name)
        } else {
            self.path.join(format!("{}.{}", name, extension))
        }
    }
}

impl Drop for JobDir {
    fn drop(&mut self) {
        let remove = || {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("清理临时目录失败 {}: {}", self.path.display(), e);
                }
            }
        };
        // 多线程运行时中让出当前 worker，避免阻塞其他任务
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(remove)
            }
            _ => remove(),
        }
    }
}

/// 已落盘的上传文件
#[derive(Debug, Clone)]
pub struct SavedUpload {
    pub path: PathBuf,
    /// 客户端提供的原始文件名（可能为空）
    pub original_name: String,
    pub size: u64,
}

impl SavedUpload {
    /// 原始文件名第一个 `.` 之前的部分，去掉引号、斜杠与控制字符
    pub fn stem(&self) -> String {
        let stem: String = self
            .original_name
            .split('.')
            .next()
            .unwrap_or_default()
            .chars()
            .filter(|c| !matches!(c, '"' | '\\' | '/') && !c.is_control())
            .collect();
        if stem.is_empty() {
            "file".to_string()
        } else {
            stem
        }
    }
}

/// 把一个 multipart 字段流式写入 `dest`，不把整个文件读进内存
pub async fn save_field(mut field: Field<'_>, dest: PathBuf) -> ServiceResult<SavedUpload> {
    let original_name = field.file_name().unwrap_or_default().to_string();
    let mut file = tokio::fs::File::create(&dest)
        .await
        .with_context(|| format!("创建上传文件失败: {}", dest.display()))?;

    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .with_context(|| format!("写入上传文件失败: {}", dest.display()))?;
    }
    file.flush().await.context("写入上传文件失败")?;

    Ok(SavedUpload {
        path: dest,
        original_name,
        size,
    })
}

/// 取上传文件名的扩展名，只保留安全字符
pub fn upload_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// 校验输出格式：1 到 10 个 ASCII 字母或数字，统一转成小写
pub fn sanitize_format(format: &str) -> ServiceResult<String> {
    let format = format.trim();
    if format.is_empty()
        || format.len() > 10
        || !format.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ServiceError::bad_request(format!("不支持的输出格式: {}", format)));
    }
    Ok(format.to_ascii_lowercase())
}

/// 影片格式对应的 MIME 类型
pub fn video_media_type(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        _ => "video/mp4",
    }
}

/// 下载文件名中的时间戳，格式 `YYYYMMDD_HHMMSS`
pub fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `Content-Disposition` 附件头
///
/// 非 ASCII 文件名额外带上 `filename*=UTF-8''...`，`filename` 中用 `_` 代替。
pub fn content_disposition(download_name: &str) -> String {
    let fallback: String = download_name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if download_name.is_ascii() {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            utf8_percent_encode(download_name, ATTR_CHAR)
        )
    }
}

/// 以附件形式流式返回 `path`
///
/// `job_dir` 随响应体一起移动，响应发送完毕（或连接中断）后目录才被删除。
pub async fn file_response(
    job_dir: JobDir,
    path: &Path,
    media_type: &str,
    download_name: &str,
) -> ServiceResult<Response> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => m,
        _ => {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "输出文件未生成: {}",
                path.display()
            )))
        }
    };
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("打开输出文件失败: {}", path.display()))?;

    info!("📦 输出文件: {} ({} 字节)", download_name, metadata.len());

    let stream = ReaderStream::new(file).map(move |chunk| {
        // 持有 job_dir，直到流结束
        let _hold = &job_dir;
        chunk
    });

    let disposition = content_disposition(download_name);
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(media_type).context("无效的 Content-Type")?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).context("无效的下载文件名")?,
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Disposition"),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn job_dir_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let dir = JobDir::create(root.path()).await.unwrap();
        let path = dir.path().to_path_buf();
        std::fs::write(dir.path().join("input.mp4"), b"data").unwrap();
        assert!(path.exists());

        drop(dir);
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn job_dir_is_removed_on_worker_thread() {
        let root = tempfile::tempdir().unwrap();
        let root_path = root.path().to_path_buf();
        let path = tokio::spawn(async move {
            let dir = JobDir::create(&root_path).await.unwrap();
            std::fs::write(dir.path().join("out.mp4"), b"data").unwrap();
            dir.path().to_path_buf()
        })
        .await
        .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unique_files_do_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let dir = JobDir::create(root.path()).await.unwrap();
        let a = dir.unique_file("mp4");
        let b = dir.unique_file("mp4");
        assert_ne!(a, b);
        assert!(a.starts_with(dir.path()));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert_eq!(dir.unique_file("").extension(), None);
    }

    #[test]
    fn format_must_be_short_alphanumeric() {
        assert_eq!(sanitize_format("MP4").unwrap(), "mp4");
        assert_eq!(sanitize_format(" webm ").unwrap(), "webm");
        assert!(sanitize_format("").is_err());
        assert!(sanitize_format("../mp4").is_err());
        assert!(sanitize_format("mp4;rm").is_err());
        assert!(sanitize_format("abcdefghijk").is_err());
    }

    #[test]
    fn extension_strips_paths_and_odd_characters() {
        assert_eq!(upload_extension(Some("clip.MOV")), "mov");
        assert_eq!(upload_extension(Some("../../etc/passwd")), "");
        assert_eq!(upload_extension(Some("sub.s r t")), "");
        assert_eq!(upload_extension(Some("noext")), "");
        assert_eq!(upload_extension(None), "");
    }

    #[test]
    fn stem_is_text_before_first_dot() {
        let upload = SavedUpload {
            path: PathBuf::from("x"),
            original_name: "holiday.final.mov".to_string(),
            size: 0,
        };
        assert_eq!(upload.stem(), "holiday");

        let unnamed = SavedUpload {
            original_name: String::new(),
            ..upload
        };
        assert_eq!(unnamed.stem(), "file");

        let spaced = SavedUpload {
            original_name: "我的 影片.mp4".to_string(),
            ..unnamed
        };
        assert_eq!(spaced.stem(), "我的 影片");

        let quoted = SavedUpload {
            original_name: "a\"b/c\\d\r\n.mov".to_string(),
            ..spaced
        };
        assert_eq!(quoted.stem(), "abcd");
    }

    #[test]
    fn disposition_keeps_utf8_name() {
        assert_eq!(
            content_disposition("converted_clip.mp4"),
            "attachment; filename=\"converted_clip.mp4\""
        );
        assert_eq!(
            content_disposition("converted_我的影片.mp4"),
            "attachment; filename=\"converted_____.mp4\"; \
             filename*=UTF-8''converted_%E6%88%91%E7%9A%84%E5%BD%B1%E7%89%87.mp4"
        );
    }

    #[test]
    fn video_media_types() {
        assert_eq!(video_media_type("mp4"), "video/mp4");
        assert_eq!(video_media_type("WEBM"), "video/webm");
        assert_eq!(video_media_type("mov"), "video/quicktime");
        assert_eq!(video_media_type("avi"), "video/x-msvideo");
        assert_eq!(video_media_type("flv"), "video/mp4");
    }

    #[tokio::test]
    async fn missing_output_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let dir = JobDir::create(root.path()).await.unwrap();
        let missing = dir.path().join("out.mp4");
        let err = file_response(dir, &missing, "video/mp4", "out.mp4")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("输出文件未生成"));
    }
}
