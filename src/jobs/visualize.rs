use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;

use super::{looped_image_inputs, push_duration, H264_AAC_ARGS};
use crate::error::{ServiceError, ServiceResult};

/// showwaves 的绘制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveMode {
    Line,
    Point,
    P2p,
    Cline,
}

impl WaveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WaveMode::Line => "line",
            WaveMode::Point => "point",
            WaveMode::P2p => "p2p",
            WaveMode::Cline => "cline",
        }
    }
}

/// showspectrum 的通道模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumMode {
    Combined,
    Separate,
}

impl SpectrumMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SpectrumMode::Combined => "combined",
            SpectrumMode::Separate => "separate",
        }
    }
}

/// showspectrum 的配色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumColor {
    Channel,
    Intensity,
    Rainbow,
    Moreland,
    Nebulae,
    Fire,
    Fiery,
    Fruit,
    Cool,
    Magma,
    Green,
    Viridis,
    Plasma,
    Cividis,
    Terrain,
}

impl SpectrumColor {
    pub fn as_str(self) -> &'static str {
        match self {
            SpectrumColor::Channel => "channel",
            SpectrumColor::Intensity => "intensity",
            SpectrumColor::Rainbow => "rainbow",
            SpectrumColor::Moreland => "moreland",
            SpectrumColor::Nebulae => "nebulae",
            SpectrumColor::Fire => "fire",
            SpectrumColor::Fiery => "fiery",
            SpectrumColor::Fruit => "fruit",
            SpectrumColor::Cool => "cool",
            SpectrumColor::Magma => "magma",
            SpectrumColor::Green => "green",
            SpectrumColor::Viridis => "viridis",
            SpectrumColor::Plasma => "plasma",
            SpectrumColor::Cividis => "cividis",
            SpectrumColor::Terrain => "terrain",
        }
    }
}

/// showspectrum 的幅度刻度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumScale {
    Lin,
    Sqrt,
    Cbrt,
    Log,
}

impl SpectrumScale {
    pub fn as_str(self) -> &'static str {
        match self {
            SpectrumScale::Lin => "lin",
            SpectrumScale::Sqrt => "sqrt",
            SpectrumScale::Cbrt => "cbrt",
            SpectrumScale::Log => "log",
        }
    }
}

/// 窗函数；`rectangular` 是 ffmpeg `rect` 的别名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    #[serde(alias = "rectangular")]
    Rect,
    #[serde(alias = "hann")]
    Hanning,
    Hamming,
    Blackman,
}

impl WindowFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowFunction::Rect => "rect",
            WindowFunction::Hanning => "hanning",
            WindowFunction::Hamming => "hamming",
            WindowFunction::Blackman => "blackman",
        }
    }
}

/// 叠加在背景上的效果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationType {
    Waveform,
    #[serde(alias = "spectrogram")]
    Spectrum,
}

/// 颜色参数只允许名称、`#RRGGBB`、`0xRRGGBB` 以及 `@alpha` 后缀
pub fn validate_color(name: &str, value: &str) -> ServiceResult<()> {
    let valid = !value.is_empty()
        && value.len() <= 32
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '@' | '.' | '|'));
    if valid {
        Ok(())
    } else {
        Err(ServiceError::bad_request(format!("{} 颜色无效: {}", name, value)))
    }
}

fn validate_frame(width: u32, height: u32, fps: u32) -> ServiceResult<()> {
    if width == 0 || height == 0 {
        return Err(ServiceError::bad_request("width 与 height 必须大于 0"));
    }
    if fps == 0 {
        return Err(ServiceError::bad_request("fps 必须大于 0"));
    }
    Ok(())
}

fn validate_duration(duration: Option<f64>) -> ServiceResult<()> {
    match duration {
        Some(d) if !d.is_finite() || d < 0.0 => {
            Err(ServiceError::bad_request(format!("duration 无效: {}", d)))
        }
        _ => Ok(()),
    }
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
fn default_fps() -> u32 {
    30
}
fn default_wave_mode() -> WaveMode {
    WaveMode::Line
}
fn white() -> String {
    "white".to_string()
}
fn black() -> String {
    "black".to_string()
}
fn default_spectrum_mode() -> SpectrumMode {
    SpectrumMode::Combined
}
fn default_spectrum_color() -> SpectrumColor {
    SpectrumColor::Intensity
}
fn default_spectrum_scale() -> SpectrumScale {
    SpectrumScale::Log
}
fn default_saturation() -> f64 {
    1.0
}
fn default_win_func() -> WindowFunction {
    WindowFunction::Hanning
}

// ---------------------------------------------------------------------------
// 波形
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct WaveformParams {
    #[serde(default = "default_format")]
    pub output_format: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_wave_mode")]
    pub wave_mode: WaveMode,
    #[serde(default = "white")]
    pub wave_color: String,
    #[serde(default = "black")]
    pub background_color: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
    pub duration: Option<f64>,
}

impl Default for WaveformParams {
    fn default() -> Self {
        Self {
            output_format: default_format(),
            width: default_width(),
            height: default_height(),
            wave_mode: default_wave_mode(),
            wave_color: white(),
            background_color: black(),
            fps: default_fps(),
            duration: None,
        }
    }
}

impl WaveformParams {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_frame(self.width, self.height, self.fps)?;
        validate_color("wave_color", &self.wave_color)?;
        validate_color("background_color", &self.background_color)?;
        validate_duration(self.duration)
    }

    /// 先生成纯色背景，再把波形叠上去
    pub fn filter_complex(&self) -> String {
        let size = format!("{}x{}", self.width, self.height);
        format!(
            "color=c={bg}:s={size}:d=1[bg];\
             [0:a]showwaves=s={size}:mode={mode}:colors={color}:r={fps}[wave];\
             [bg][wave]overlay=format=auto[v]",
            bg = self.background_color,
            mode = self.wave_mode.as_str(),
            color = self.wave_color,
            fps = self.fps,
        )
    }

    pub fn build_args(&self, audio: &Path, output: &Path) -> Vec<OsString> {
        audio_render_args(audio, self.filter_complex(), self.duration, output)
    }
}

// ---------------------------------------------------------------------------
// 频谱
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SpectrogramParams {
    #[serde(default = "default_format")]
    pub output_format: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_spectrum_mode")]
    pub mode: SpectrumMode,
    #[serde(default = "default_spectrum_color")]
    pub color_mode: SpectrumColor,
    #[serde(default = "default_spectrum_scale")]
    pub scale: SpectrumScale,
    #[serde(default = "default_saturation")]
    pub saturation: f64,
    #[serde(default = "default_win_func")]
    pub win_func: WindowFunction,
    #[serde(default = "default_fps")]
    pub fps: u32,
    pub duration: Option<f64>,
}

impl Default for SpectrogramParams {
    fn default() -> Self {
        Self {
            output_format: default_format(),
            width: default_width(),
            height: default_height(),
            mode: default_spectrum_mode(),
            color_mode: default_spectrum_color(),
            scale: default_spectrum_scale(),
            saturation: default_saturation(),
            win_func: default_win_func(),
            fps: default_fps(),
            duration: None,
        }
    }
}

fn validate_saturation(saturation: f64) -> ServiceResult<()> {
    if !(-10.0..=10.0).contains(&saturation) {
        return Err(ServiceError::bad_request(format!(
            "saturation 必须介于 -10 与 10 之间: {}",
            saturation
        )));
    }
    Ok(())
}

impl SpectrogramParams {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_frame(self.width, self.height, self.fps)?;
        validate_saturation(self.saturation)?;
        validate_duration(self.duration)
    }

    pub fn filter_complex(&self) -> String {
        format!(
            "[0:a]showspectrum=s={}x{}:mode={}:color={}:scale={}:saturation={}:win_func={}:fps={}[v]",
            self.width,
            self.height,
            self.mode.as_str(),
            self.color_mode.as_str(),
            self.scale.as_str(),
            self.saturation,
            self.win_func.as_str(),
            self.fps,
        )
    }

    pub fn build_args(&self, audio: &Path, output: &Path) -> Vec<OsString> {
        audio_render_args(audio, self.filter_complex(), self.duration, output)
    }
}

/// 单一音频输入、滤镜输出 `[v]` 的通用参数
fn audio_render_args(
    audio: &Path,
    filter: String,
    duration: Option<f64>,
    output: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-i".into(),
        audio.into(),
        "-filter_complex".into(),
        filter.into(),
        "-map".into(),
        "[v]".into(),
        "-map".into(),
        "0:a".into(),
    ];
    args.extend(H264_AAC_ARGS.iter().map(OsString::from));
    args.extend(["-pix_fmt", "yuv420p", "-y"].map(OsString::from));
    push_duration(&mut args, duration);
    args.push(output.into());
    args
}

// ---------------------------------------------------------------------------
// 多图背景 + 音频视觉化
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct VisualizationParams {
    #[serde(default = "default_format")]
    pub output_format: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// 每张背景图显示的秒数
    #[serde(default = "default_image_duration")]
    pub image_duration: f64,
    #[serde(default = "default_visualization_type")]
    pub visualization_type: VisualizationType,
    #[serde(default = "default_wave_mode")]
    pub wave_mode: WaveMode,
    #[serde(default = "white")]
    pub wave_color: String,
    #[serde(default = "default_spectrum_mode")]
    pub spectrum_mode: SpectrumMode,
    #[serde(default = "default_spectrum_color")]
    pub spectrum_color: SpectrumColor,
    #[serde(default = "default_spectrum_scale")]
    pub spectrum_scale: SpectrumScale,
    #[serde(default = "default_saturation")]
    pub spectrum_saturation: f64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// 视觉化图层的不透明度
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    pub duration: Option<f64>,
}

fn default_image_duration() -> f64 {
    5.0
}
fn default_visualization_type() -> VisualizationType {
    VisualizationType::Waveform
}
fn default_opacity() -> f64 {
    0.8
}

impl Default for VisualizationParams {
    fn default() -> Self {
        Self {
            output_format: default_format(),
            width: default_width(),
            height: default_height(),
            image_duration: default_image_duration(),
            visualization_type: default_visualization_type(),
            wave_mode: default_wave_mode(),
            wave_color: white(),
            spectrum_mode: default_spectrum_mode(),
            spectrum_color: default_spectrum_color(),
            spectrum_scale: default_spectrum_scale(),
            spectrum_saturation: default_saturation(),
            fps: default_fps(),
            opacity: default_opacity(),
            duration: None,
        }
    }
}

impl VisualizationParams {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_frame(self.width, self.height, self.fps)?;
        if !(self.image_duration.is_finite() && self.image_duration > 0.0) {
            return Err(ServiceError::bad_request("image_duration 必须大于 0"));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ServiceError::bad_request(format!(
                "opacity 必须介于 0 与 1 之间: {}",
                self.opacity
            )));
        }
        validate_color("wave_color", &self.wave_color)?;
        validate_saturation(self.spectrum_saturation)?;
        validate_duration(self.duration)
    }

    /// 第一步：多张图片串成背景影片（无音频）
    pub fn background_args(&self, images: &[&Path], output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into()];
        looped_image_inputs(&mut args, images, self.image_duration);

        let mut parts: Vec<String> = (0..images.len())
            .map(|i| format!("[{i}:v]scale={}:{},setsar=1[scaled{i}]", self.width, self.height))
            .collect();
        let inputs: String = (0..images.len()).map(|i| format!("[scaled{i}]")).collect();
        parts.push(format!("{}concat=n={}:v=1:a=0[outv]", inputs, images.len()));

        args.push("-filter_complex".into());
        args.push(parts.join(";").into());
        args.extend(
            ["-map", "[outv]", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-shortest"]
                .map(OsString::from),
        );
        args.push(output.into());
        args
    }

    /// 第二步的 filter_complex：背景缩放后叠加半透明的波形或频谱
    pub fn overlay_filter(&self) -> String {
        let (w, h, fps, opacity) = (self.width, self.height, self.fps, self.opacity);
        let mut graph = format!("[0:v]scale={w}:{h}[bg];");
        match self.visualization_type {
            VisualizationType::Waveform => {
                graph.push_str(&format!(
                    "[1:a]showwaves=s={w}x{h}:mode={}:colors={}:r={fps}[waves];",
                    self.wave_mode.as_str(),
                    self.wave_color,
                ));
                graph.push_str(&format!(
                    "[waves]format=rgba,colorchannelmixer=aa={opacity}[overlay];"
                ));
            }
            VisualizationType::Spectrum => {
                graph.push_str(&format!(
                    "[1:a]showspectrum=s={w}x{h}:mode={}:color={}:scale={}:saturation={}:slide=replace:r={fps}[spectrum];",
                    self.spectrum_mode.as_str(),
                    self.spectrum_color.as_str(),
                    self.spectrum_scale.as_str(),
                    self.spectrum_saturation,
                ));
                graph.push_str(&format!(
                    "[spectrum]format=rgba,colorchannelmixer=aa={opacity}[overlay];"
                ));
            }
        }
        graph.push_str("[bg][overlay]overlay=0:0:format=auto,format=yuv420p[v]");
        graph
    }

    /// 第二步：背景影片（输入 0）+ 音频（输入 1）
    pub fn overlay_args(&self, background: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            background.into(),
            "-i".into(),
            audio.into(),
            "-filter_complex".into(),
            self.overlay_filter().into(),
            "-map".into(),
            "[v]".into(),
            "-map".into(),
            "1:a".into(),
        ];
        args.extend(H264_AAC_ARGS.iter().map(OsString::from));
        args.extend(["-shortest", "-y"].map(OsString::from));
        push_duration(&mut args, self.duration);
        args.push(output.into());
        args
    }
}
