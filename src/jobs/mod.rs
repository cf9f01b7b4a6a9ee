//! 各类任务的 ffmpeg 参数构建
//!
//! 这里只拼参数，不碰文件系统也不启动进程，方便单独测试。

pub mod convert;
pub mod slideshow;
pub mod visualize;
pub mod vocals;

use std::ffi::OsString;
use std::path::Path;

/// 编码 H.264 + AAC 的通用输出参数
pub(crate) const H264_AAC_ARGS: &[&str] = &[
    "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a", "192k",
];

/// 为每张图片添加 `-loop 1 -t D -i path`
pub(crate) fn looped_image_inputs(args: &mut Vec<OsString>, images: &[&Path], seconds: f64) {
    for image in images {
        args.extend([
            OsString::from("-loop"),
            OsString::from("1"),
            OsString::from("-t"),
            OsString::from(seconds.to_string()),
            OsString::from("-i"),
            OsString::from(*image),
        ]);
    }
}

/// 可选的输出时长
pub(crate) fn push_duration(args: &mut Vec<OsString>, duration: Option<f64>) {
    if let Some(d) = duration.filter(|d| *d > 0.0) {
        args.push("-t".into());
        args.push(d.to_string().into());
    }
}
