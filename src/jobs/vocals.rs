use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;

use crate::error::{ServiceError, ServiceResult};

/// stereotools 的 mlev/slev 取值范围
const LEVEL_MIN: f64 = 0.015625;
const LEVEL_MAX: f64 = 64.0;

/// 输出人声还是伴奏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VocalPart {
    Vocals,
    Instrumental,
}

impl VocalPart {
    pub fn as_str(self) -> &'static str {
        match self {
            VocalPart::Vocals => "vocals",
            VocalPart::Instrumental => "instrumental",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VocalsParams {
    #[serde(default = "default_format")]
    pub output_format: String,
    #[serde(default = "default_vocal_type")]
    pub vocal_type: VocalPart,
    /// 人声频带上限（Hz）
    #[serde(default = "default_high_freq")]
    pub high_freq: u32,
    /// 人声频带下限（Hz）
    #[serde(default = "default_low_freq")]
    pub low_freq: u32,
    #[serde(default = "default_center_boost")]
    pub center_boost: f64,
    #[serde(default = "default_side_reduction")]
    pub side_reduction: f64,
}

fn default_format() -> String {
    "mp3".to_string()
}
fn default_vocal_type() -> VocalPart {
    VocalPart::Vocals
}
fn default_high_freq() -> u32 {
    4000
}
fn default_low_freq() -> u32 {
    300
}
fn default_center_boost() -> f64 {
    2.0
}
fn default_side_reduction() -> f64 {
    0.7
}

impl Default for VocalsParams {
    fn default() -> Self {
        Self {
            output_format: default_format(),
            vocal_type: default_vocal_type(),
            high_freq: default_high_freq(),
            low_freq: default_low_freq(),
            center_boost: default_center_boost(),
            side_reduction: default_side_reduction(),
        }
    }
}

/// 音频输出格式对应的编码参数与 MIME 类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEncoding {
    pub codec_args: Vec<&'static str>,
    pub media_type: &'static str,
}

/// 按输出格式选择编码器，不支持的格式返回 None
pub fn audio_encoding(format: &str) -> Option<AudioEncoding> {
    let (codec_args, media_type) = match format {
        "mp3" => (vec!["-c:a", "libmp3lame", "-q:a", "0", "-b:a", "320k"], "audio/mpeg"),
        "m4a" => (vec!["-c:a", "aac", "-b:a", "320k"], "audio/mp4"),
        "aac" => (vec!["-c:a", "aac", "-b:a", "320k"], "audio/aac"),
        "wav" => (vec!["-c:a", "pcm_s16le"], "audio/wav"),
        "flac" => (vec!["-c:a", "flac"], "audio/flac"),
        "ogg" => (vec!["-c:a", "libvorbis", "-q:a", "10"], "audio/ogg"),
        _ => return None,
    };
    Some(AudioEncoding {
        codec_args,
        media_type,
    })
}

impl VocalsParams {
    /// 中置与侧边声道的电平
    fn levels(&self) -> (f64, f64) {
        match self.vocal_type {
            VocalPart::Vocals => (self.center_boost, self.side_reduction),
            // 伴奏：压低中置、提升侧边
            VocalPart::Instrumental => (LEVEL_MIN, 1.0 + self.side_reduction),
        }
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.low_freq == 0 || self.low_freq >= self.high_freq {
            return Err(ServiceError::bad_request(format!(
                "频率范围无效：需要 0 < low_freq ({}) < high_freq ({})",
                self.low_freq, self.high_freq
            )));
        }
        let (mid, side) = self.levels();
        for (name, level) in [("center_boost", mid), ("side_reduction", side)] {
            if !(LEVEL_MIN..=LEVEL_MAX).contains(&level) {
                return Err(ServiceError::bad_request(format!(
                    "{} 超出范围 [{}, {}]: {}",
                    name, LEVEL_MIN, LEVEL_MAX, level
                )));
            }
        }
        Ok(())
    }

    pub fn filter_complex(&self) -> String {
        let (mid, side) = self.levels();
        let band = |label: &str| match self.vocal_type {
            VocalPart::Vocals => format!(
                "[{label}]highpass=f={},lowpass=f={}[{label}_filtered];",
                self.low_freq, self.high_freq
            ),
            VocalPart::Instrumental => format!("[{label}]anull[{label}_filtered];"),
        };
        format!(
            "channelsplit=channel_layout=stereo[left][right];{}{}\
             [left_filtered][right_filtered]join=inputs=2:channel_layout=stereo,\
             stereotools=mlev={}:slev={}:mode=1[out]",
            band("left"),
            band("right"),
            mid,
            side,
        )
    }

    pub fn build_args(&self, encoding: &AudioEncoding, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            input.into(),
            "-filter_complex".into(),
            self.filter_complex().into(),
            "-map".into(),
            "[out]".into(),
        ];
        args.extend(encoding.codec_args.iter().map(|a| OsString::from(*a)));
        args.push(output.into());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocals_band_limit_both_channels() {
        let graph = VocalsParams::default().filter_complex();
        assert_eq!(
            graph,
            "channelsplit=channel_layout=stereo[left][right];\
             [left]highpass=f=300,lowpass=f=4000[left_filtered];\
             [right]highpass=f=300,lowpass=f=4000[right_filtered];\
             [left_filtered][right_filtered]join=inputs=2:channel_layout=stereo,\
             stereotools=mlev=2:slev=0.7:mode=1[out]"
        );
    }

    #[test]
    fn instrumental_suppresses_centre() {
        let params = VocalsParams {
            vocal_type: VocalPart::Instrumental,
            ..VocalsParams::default()
        };
        let graph = params.filter_complex();
        assert!(graph.contains("[left]anull[left_filtered];"));
        assert!(graph.contains("stereotools=mlev=0.015625:slev=1.7:mode=1[out]"));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn frequency_range_is_checked() {
        let inverted = VocalsParams {
            low_freq: 5000,
            high_freq: 4000,
            ..VocalsParams::default()
        };
        assert!(inverted.validate().is_err());

        let too_loud = VocalsParams {
            center_boost: 100.0,
            ..VocalsParams::default()
        };
        assert!(too_loud.validate().is_err());
    }

    #[test]
    fn encodings_by_format() {
        let mp3 = audio_encoding("mp3").unwrap();
        assert_eq!(mp3.media_type, "audio/mpeg");
        assert_eq!(mp3.codec_args, ["-c:a", "libmp3lame", "-q:a", "0", "-b:a", "320k"]);
        assert_eq!(audio_encoding("wav").unwrap().media_type, "audio/wav");
        assert!(audio_encoding("mp4").is_none());
    }

    #[test]
    fn args_map_filter_output() {
        let params = VocalsParams::default();
        let encoding = audio_encoding("flac").unwrap();
        let args: Vec<String> = params
            .build_args(&encoding, Path::new("in.wav"), Path::new("out.flac"))
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&args[..3], ["-y", "-i", "in.wav"]);
        assert_eq!(&args[5..7], ["-map", "[out]"]);
        assert_eq!(&args[7..], ["-c:a", "flac", "out.flac"]);
    }
}
