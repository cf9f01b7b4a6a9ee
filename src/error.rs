use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// 处理请求时可能出现的错误，在 HTTP 边界转换为状态码
#[derive(Error, Debug)]
pub enum ServiceError {
    /// 参数或上传内容不合法
    #[error("{0}")]
    BadRequest(String),

    /// 请求体被拒绝，保留 axum 给出的状态码（如超过大小限制时的 413）
    #[error("{1}")]
    Rejected(StatusCode, String),

    /// ffmpeg 以非零状态退出
    #[error("FFmpeg error: {stderr}")]
    Ffmpeg {
        /// 退出码（被信号终止时为 None）
        status: Option<i32>,
        stderr: String,
    },

    /// ffmpeg 超过配置的时长仍未结束
    #[error("FFmpeg 执行超时（{0} 秒）")]
    Timeout(u64),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServiceError::BadRequest(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Rejected(status, _) => *status,
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Ffmpeg { .. } | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<MultipartError> for ServiceError {
    fn from(e: MultipartError) -> Self {
        let status = e.status();
        let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
            format!("上传内容超过大小限制: {}", e.body_text())
        } else {
            format!("读取上传内容失败: {}", e.body_text())
        };
        ServiceError::Rejected(status, message)
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Internal(e.into())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // anyhow 的 {:#} 会带上整条 context 链
        let detail = match &self {
            ServiceError::Internal(e) => format!("{:#}", e),
            other => other.to_string(),
        };
        if status.is_server_error() {
            error!("请求处理失败 ({}): {}", status, detail);
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(
            ServiceError::bad_request("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::Timeout(5).status_code(), StatusCode::GATEWAY_TIMEOUT);
        let ffmpeg = ServiceError::Ffmpeg {
            status: Some(1),
            stderr: "Invalid data found when processing input".to_string(),
        };
        assert_eq!(ffmpeg.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ffmpeg.to_string(),
            "FFmpeg error: Invalid data found when processing input"
        );
    }

    #[test]
    fn rejected_keeps_its_status() {
        let err = ServiceError::Rejected(StatusCode::PAYLOAD_TOO_LARGE, "too big".to_string());
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.to_string(), "too big");
    }

    #[test]
    fn internal_errors_keep_context_chain() {
        let err: ServiceError = anyhow::anyhow!("disk full").context("保存上传文件失败").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
