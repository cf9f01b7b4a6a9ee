use serde::Deserialize;
use std::path::Path;

use crate::color::to_ass_color;
use crate::error::{ServiceError, ServiceResult};

/// 字幕样式，字段与查询参数同名
#[derive(Debug, Clone, Deserialize)]
pub struct SubtitleStyle {
    // 字型
    /// 未指定时使用配置中的默认字体
    pub font_name: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "white")]
    pub font_color: String,
    #[serde(default = "opaque")]
    pub font_alpha: f64,

    // 边框
    #[serde(default = "default_border_style")]
    pub border_style: u8,
    #[serde(default = "default_border_size")]
    pub border_size: u32,
    #[serde(default = "black")]
    pub border_color: String,
    #[serde(default = "opaque")]
    pub border_alpha: f64,

    // 阴影
    #[serde(default = "default_shadow_size")]
    pub shadow_size: u32,
    #[serde(default = "black")]
    pub shadow_color: String,
    #[serde(default = "half")]
    pub shadow_alpha: f64,

    // 背景框
    #[serde(default = "enabled")]
    pub background: bool,
    #[serde(default = "black")]
    pub background_color: String,
    #[serde(default = "half")]
    pub background_alpha: f64,

    // 位置
    #[serde(default = "default_margin_vertical")]
    pub margin_vertical: u32,
    /// 1-9，数字键盘布局，2 为底部置中
    #[serde(default = "default_alignment")]
    pub alignment: u8,
}

fn default_font_size() -> u32 {
    24
}
fn default_border_style() -> u8 {
    3
}
fn default_border_size() -> u32 {
    1
}
fn default_shadow_size() -> u32 {
    2
}
fn default_margin_vertical() -> u32 {
    20
}
fn default_alignment() -> u8 {
    2
}
fn white() -> String {
    "white".to_string()
}
fn black() -> String {
    "black".to_string()
}
fn opaque() -> f64 {
    1.0
}
fn half() -> f64 {
    0.5
}
fn enabled() -> bool {
    true
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_name: None,
            font_size: default_font_size(),
            font_color: white(),
            font_alpha: opaque(),
            border_style: default_border_style(),
            border_size: default_border_size(),
            border_color: black(),
            border_alpha: opaque(),
            shadow_size: default_shadow_size(),
            shadow_color: black(),
            shadow_alpha: half(),
            background: enabled(),
            background_color: black(),
            background_alpha: half(),
            margin_vertical: default_margin_vertical(),
            alignment: default_alignment(),
        }
    }
}

/// ASS BorderStyle=3 表示不透明背景框
const BORDER_STYLE_BOX: u8 = 3;

/// force_style 的值里不能出现的字符
const FORBIDDEN_STYLE_CHARS: &[char] = &['\'', ',', ':', ';', '=', '\\', '[', ']'];

impl SubtitleStyle {
    pub fn validate(&self) -> ServiceResult<()> {
        for (name, alpha) in [
            ("font_alpha", self.font_alpha),
            ("border_alpha", self.border_alpha),
            ("shadow_alpha", self.shadow_alpha),
            ("background_alpha", self.background_alpha),
        ] {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(ServiceError::bad_request(format!(
                    "{} 必须介于 0 与 1 之间: {}",
                    name, alpha
                )));
            }
        }
        if !(1..=9).contains(&self.alignment) {
            return Err(ServiceError::bad_request(format!(
                "alignment 必须介于 1 与 9 之间: {}",
                self.alignment
            )));
        }
        if !(1..=4).contains(&self.border_style) {
            return Err(ServiceError::bad_request(format!(
                "border_style 必须介于 1 与 4 之间: {}",
                self.border_style
            )));
        }
        for (name, color) in [
            ("font_color", &self.font_color),
            ("border_color", &self.border_color),
            ("shadow_color", &self.shadow_color),
            ("background_color", &self.background_color),
        ] {
            let hex = color.strip_prefix('#').unwrap_or(color);
            if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ServiceError::bad_request(format!("{} 无效: {}", name, color)));
            }
        }
        if self.font_size == 0 {
            return Err(ServiceError::bad_request("font_size 必须大于 0"));
        }
        if let Some(font) = &self.font_name {
            if font.trim().is_empty() || font.contains(FORBIDDEN_STYLE_CHARS) {
                return Err(ServiceError::bad_request(format!("字型名称无效: {}", font)));
            }
        }
        Ok(())
    }

    /// 生成 `force_style` 的内容（不含外层引号）
    ///
    /// 关闭背景时，BackColour 改用阴影颜色，背景框样式退回为描边加阴影。
    pub fn force_style(&self, default_font: &str) -> String {
        let font = self.font_name.as_deref().unwrap_or(default_font);
        let (border_style, back_colour) = if self.background {
            (
                self.border_style,
                to_ass_color(&self.background_color, self.background_alpha),
            )
        } else {
            let style = if self.border_style == BORDER_STYLE_BOX { 1 } else { self.border_style };
            (style, to_ass_color(&self.shadow_color, self.shadow_alpha))
        };

        [
            format!("Fontname={}", font),
            format!("FontSize={}", self.font_size),
            format!("PrimaryColour=&H{}", to_ass_color(&self.font_color, self.font_alpha)),
            format!("OutlineColour=&H{}", to_ass_color(&self.border_color, self.border_alpha)),
            format!("BackColour=&H{}", back_colour),
            format!("BorderStyle={}", border_style),
            format!("Outline={}", self.border_size),
            format!("Shadow={}", self.shadow_size),
            format!("MarginV={}", self.margin_vertical),
            format!("Alignment={}", self.alignment),
            "Bold=1".to_string(),
        ]
        .join(",")
    }
}

/// 转义滤镜参数里的路径：`\` 统一成 `/`，冒号与单引号加反斜杠
pub fn escape_filter_path(path: &Path) -> String {
    let mut escaped = String::new();
    for c in path.to_string_lossy().chars() {
        match c {
            '\\' => escaped.push('/'),
            ':' => escaped.push_str("\\:"),
            '\'' => escaped.push_str("\\'"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// 校验字幕编码名称，UTF-8 返回 None（无需 charenc）
pub fn charenc(encoding: &str) -> ServiceResult<Option<String>> {
    let encoding = encoding.trim();
    if encoding.is_empty() {
        return Ok(None);
    }
    if !encoding
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ServiceError::bad_request(format!("字幕编码无效: {}", encoding)));
    }
    let normalized = encoding.to_ascii_lowercase().replace(['-', '_'], "");
    if normalized == "utf8" {
        Ok(None)
    } else {
        Ok(Some(encoding.to_string()))
    }
}

/// 烧录字幕所需的全部输入
#[derive(Debug, Clone)]
pub struct SubtitleFilter<'a> {
    pub subtitle_path: &'a Path,
    pub style: &'a SubtitleStyle,
    pub charenc: Option<&'a str>,
    pub fonts_dir: Option<&'a Path>,
    pub default_font: &'a str,
}

impl SubtitleFilter<'_> {
    /// `-vf` 使用的 subtitles 滤镜字符串
    pub fn to_filter(&self) -> String {
        let mut filter = format!("subtitles={}", escape_filter_path(self.subtitle_path));
        if let Some(enc) = self.charenc {
            filter.push_str(&format!(":charenc={}", enc));
        }
        if let Some(dir) = self.fonts_dir {
            filter.push_str(&format!(":fontsdir={}", escape_filter_path(dir)));
        }
        filter.push_str(&format!(
            ":force_style='{}'",
            self.style.force_style(self.default_font)
        ));
        filter
    }

    /// 完整的 ffmpeg 参数：视频重新编码，音频直接复制
    pub fn to_args(&self, video: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        vec![
            "-i".into(),
            video.into(),
            "-vf".into(),
            self.to_filter().into(),
            "-c:v".into(),
            "libx264".into(),
            "-c:a".into(),
            "copy".into(),
            "-y".into(),
            output.into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_style_matches_classic_output() {
        let style = SubtitleStyle::default();
        assert_eq!(
            style.force_style("Arial"),
            "Fontname=Arial,FontSize=24,PrimaryColour=&H00FFFFFF,OutlineColour=&H00000000,\
             BackColour=&H7F000000,BorderStyle=3,Outline=1,Shadow=2,MarginV=20,Alignment=2,Bold=1"
        );
    }

    #[test]
    fn explicit_font_wins_over_default() {
        let style = SubtitleStyle {
            font_name: Some("Noto Sans CJK TC".to_string()),
            ..SubtitleStyle::default()
        };
        assert!(style
            .force_style("Arial")
            .starts_with("Fontname=Noto Sans CJK TC,"));
    }

    #[test]
    fn disabling_background_uses_shadow_colour() {
        let style = SubtitleStyle {
            background: false,
            shadow_color: "#102030".to_string(),
            shadow_alpha: 1.0,
            ..SubtitleStyle::default()
        };
        let forced = style.force_style("Arial");
        assert!(forced.contains("BackColour=&H00302010"));
        assert!(forced.contains("BorderStyle=1"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad_alpha = SubtitleStyle {
            font_alpha: 1.5,
            ..SubtitleStyle::default()
        };
        assert!(bad_alpha.validate().is_err());

        let bad_alignment = SubtitleStyle {
            alignment: 0,
            ..SubtitleStyle::default()
        };
        assert!(bad_alignment.validate().is_err());

        let injected_font = SubtitleStyle {
            font_name: Some("Arial',Bold=0".to_string()),
            ..SubtitleStyle::default()
        };
        assert!(injected_font.validate().is_err());

        let injected_color = SubtitleStyle {
            font_color: "#FFFFFF,Bold=0".to_string(),
            ..SubtitleStyle::default()
        };
        assert!(injected_color.validate().is_err());

        assert!(SubtitleStyle::default().validate().is_ok());
    }

    #[test]
    fn paths_are_escaped_for_filters() {
        assert_eq!(
            escape_filter_path(Path::new("C:\\temp\\a.srt")),
            "C\\:/temp/a.srt"
        );
        assert_eq!(escape_filter_path(Path::new("/tmp/it's.srt")), "/tmp/it\\'s.srt");
    }

    #[test]
    fn utf8_needs_no_charenc() {
        assert_eq!(charenc("utf-8").unwrap(), None);
        assert_eq!(charenc("UTF8").unwrap(), None);
        assert_eq!(charenc("").unwrap(), None);
        assert_eq!(charenc("big5").unwrap(), Some("big5".to_string()));
        assert!(charenc("big5:x").is_err());
    }

    #[test]
    fn filter_includes_optional_parts() {
        let style = SubtitleStyle::default();
        let filter = SubtitleFilter {
            subtitle_path: Path::new("temp/job/sub.srt"),
            style: &style,
            charenc: Some("GB18030"),
            fonts_dir: Some(Path::new("/usr/share/fonts")),
            default_font: "Arial",
        };
        let rendered = filter.to_filter();
        assert!(rendered.starts_with(
            "subtitles=temp/job/sub.srt:charenc=GB18030:fontsdir=/usr/share/fonts:force_style='Fontname=Arial,"
        ));
        assert!(rendered.ends_with("Bold=1'"));

        let args = filter.to_args(Path::new("in.mp4"), Path::new("out.mp4"));
        assert_eq!(args[0], "-i");
        assert_eq!(args[2], "-vf");
        assert_eq!(args[args.len() - 1], "out.mp4");
    }
}
