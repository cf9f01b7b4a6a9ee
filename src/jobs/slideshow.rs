use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;

use super::looped_image_inputs;
use crate::error::{ServiceError, ServiceResult};

/// 图片之间的转场效果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionType {
    /// 淡入淡出
    Fade,
    /// 溶解（透明度渐变）
    Dissolve,
}

/// 图片合成影片参数
#[derive(Debug, Clone, Deserialize)]
pub struct SlideshowParams {
    #[serde(default = "default_duration_per_image")]
    pub duration_per_image: f64,
    #[serde(default = "default_format")]
    pub output_format: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_transition_type")]
    pub transition_type: TransitionType,
    #[serde(default = "default_transition_duration")]
    pub transition_duration: f64,
}

fn default_duration_per_image() -> f64 {
    5.0
}
fn default_format() -> String {
    "mp4".to_string()
}
fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}
fn default_transition_type() -> TransitionType {
    TransitionType::Fade
}
fn default_transition_duration() -> f64 {
    2.0
}

impl Default for SlideshowParams {
    fn default() -> Self {
        Self {
            duration_per_image: default_duration_per_image(),
            output_format: default_format(),
            width: default_width(),
            height: default_height(),
            transition_type: default_transition_type(),
            transition_duration: default_transition_duration(),
        }
    }
}

impl SlideshowParams {
    pub fn validate(&self) -> ServiceResult<()> {
        if !(self.duration_per_image.is_finite() && self.duration_per_image > 0.0) {
            return Err(ServiceError::bad_request("duration_per_image 必须大于 0"));
        }
        if !(self.transition_duration.is_finite()
            && self.transition_duration >= 0.0
            && self.transition_duration <= self.duration_per_image)
        {
            return Err(ServiceError::bad_request(format!(
                "transition_duration 必须介于 0 与 duration_per_image ({}) 之间",
                self.duration_per_image
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ServiceError::bad_request("width 与 height 必须大于 0"));
        }
        Ok(())
    }
}

/// 某张图片需要的淡入/淡出
fn fade_chain(params: &SlideshowParams, index: usize, count: usize) -> String {
    let d = params.transition_duration;
    let out_start = params.duration_per_image - d;
    let (prefix, alpha) = match params.transition_type {
        TransitionType::Fade => ("", ""),
        TransitionType::Dissolve => ("format=rgba,", ":alpha=1"),
    };
    let fade_in = format!("fade=t=in:st=0:d={}{}", d, alpha);
    let fade_out = format!("fade=t=out:st={}:d={}{}", out_start, d, alpha);

    // 第一张只淡出，最后一张只淡入，中间的两者都有
    if index == 0 {
        format!("{}{}", prefix, fade_out)
    } else if index == count - 1 {
        format!("{}{}", prefix, fade_in)
    } else {
        format!("{}{},{}", prefix, fade_in, fade_out)
    }
}

/// 构建 filter_complex：缩放补边 → 转场 → 串接
pub fn filter_complex(params: &SlideshowParams, count: usize) -> String {
    let (w, h) = (params.width, params.height);
    let mut graph = String::new();
    for i in 0..count {
        graph.push_str(&format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2[scaled{i}];"
        ));
        graph.push_str(&format!("[scaled{i}]{}[v{i}];", fade_chain(params, i, count)));
    }
    for i in 0..count {
        graph.push_str(&format!("[v{i}]"));
    }
    graph.push_str(&format!("concat=n={count}:v=1:a=0[outv]"));
    graph
}

/// 完整 ffmpeg 参数；音频作为最后一个输入，`-shortest` 以较短者为准
pub fn build_args(
    params: &SlideshowParams,
    images: &[&Path],
    audio: &Path,
    output: &Path,
) -> Vec<OsString> {
    let mut args = Vec::new();
    looped_image_inputs(&mut args, images, params.duration_per_image);
    args.push("-i".into());
    args.push(audio.into());

    args.push("-filter_complex".into());
    args.push(filter_complex(params, images.len()).into());
    args.extend(
        [
            "-map".to_string(),
            "[outv]".to_string(),
            "-map".to_string(),
            format!("{}:a", images.len()),
            "-shortest".to_string(),
        ]
        .map(OsString::from),
    );
    args.extend(
        [
            "-c:v", "libx264", "-preset", "medium", "-profile:v", "high", "-crf", "23",
            "-movflags", "+faststart", "-c:a", "aac", "-b:a", "192k", "-pix_fmt", "yuv420p",
            "-y",
        ]
        .map(OsString::from),
    );
    args.push(output.into());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_image_fade_graph() {
        let params = SlideshowParams {
            width: 1280,
            height: 720,
            ..SlideshowParams::default()
        };
        let graph = filter_complex(&params, 3);
        assert!(graph.starts_with(
            "[0:v]scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2[scaled0];"
        ));
        assert!(graph.contains("[scaled0]fade=t=out:st=3:d=2[v0];"));
        assert!(graph.contains("[scaled1]fade=t=in:st=0:d=2,fade=t=out:st=3:d=2[v1];"));
        assert!(graph.contains("[scaled2]fade=t=in:st=0:d=2[v2];"));
        assert!(graph.ends_with("[v0][v1][v2]concat=n=3:v=1:a=0[outv]"));
    }

    #[test]
    fn dissolve_uses_alpha_fades() {
        let params = SlideshowParams {
            transition_type: TransitionType::Dissolve,
            duration_per_image: 4.0,
            transition_duration: 1.5,
            ..SlideshowParams::default()
        };
        let graph = filter_complex(&params, 2);
        assert!(graph.contains("[scaled0]format=rgba,fade=t=out:st=2.5:d=1.5:alpha=1[v0];"));
        assert!(graph.contains("[scaled1]format=rgba,fade=t=in:st=0:d=1.5:alpha=1[v1];"));
    }

    #[test]
    fn single_image_only_fades_out() {
        let graph = filter_complex(&SlideshowParams::default(), 1);
        assert!(graph.contains("[scaled0]fade=t=out:st=3:d=2[v0];"));
        assert!(graph.ends_with("[v0]concat=n=1:v=1:a=0[outv]"));
    }

    #[test]
    fn audio_is_mapped_after_images() {
        let images = [Path::new("a.png"), Path::new("b.jpg")];
        let args = build_args(
            &SlideshowParams::default(),
            &images,
            Path::new("music.mp3"),
            Path::new("out.mp4"),
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(&args[..6], ["-loop", "1", "-t", "5", "-i", "a.png"]);
        let audio_at = args.iter().position(|a| a == "music.mp3").unwrap();
        assert_eq!(args[audio_at - 1], "-i");
        let map_audio = args.iter().position(|a| a == "2:a").unwrap();
        assert_eq!(args[map_audio - 1], "-map");
        assert!(args.contains(&"+faststart".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn transition_longer_than_image_is_rejected() {
        let params = SlideshowParams {
            duration_per_image: 1.0,
            transition_duration: 2.0,
            ..SlideshowParams::default()
        };
        assert!(params.validate().is_err());
        assert!(SlideshowParams::default().validate().is_ok());
    }
}
