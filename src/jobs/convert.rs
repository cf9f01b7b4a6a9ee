use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;

use crate::error::{ServiceError, ServiceResult};

/// 影片格式转换参数
#[derive(Debug, Clone, Deserialize)]
pub struct ConvertParams {
    #[serde(default = "default_format")]
    pub output_format: String,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

fn default_format() -> String {
    "mp4".to_string()
}

impl Default for ConvertParams {
    fn default() -> Self {
        Self {
            output_format: default_format(),
            video_codec: None,
            audio_codec: None,
            width: None,
            height: None,
        }
    }
}

impl ConvertParams {
    pub fn validate(&self) -> ServiceResult<()> {
        for codec in [&self.video_codec, &self.audio_codec].into_iter().flatten() {
            let valid = !codec.is_empty()
                && codec
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(ServiceError::bad_request(format!("编码器名称无效: {}", codec)));
            }
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err(ServiceError::bad_request("width 与 height 必须大于 0"));
        }
        Ok(())
    }

    /// 只有同时指定宽高时才缩放
    pub fn scale(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }
}

/// `ffmpeg -i in [-vf scale=W:H] [-vcodec V] [-acodec A] -y out`
pub fn build_args(params: &ConvertParams, input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
    if let Some((w, h)) = params.scale() {
        args.push("-vf".into());
        args.push(format!("scale={}:{}", w, h).into());
    }
    if let Some(codec) = params.video_codec.as_deref().filter(|c| !c.is_empty()) {
        args.push("-vcodec".into());
        args.push(codec.into());
    }
    if let Some(codec) = params.audio_codec.as_deref().filter(|c| !c.is_empty()) {
        args.push("-acodec".into());
        args.push(codec.into());
    }
    args.push("-y".into());
    args.push(output.into());
    args
}
