//! ASS 字幕颜色转换
//!
//! ASS 的 `force_style` 用 `&HAABBGGRR` 表示颜色：先是透明度，
//! 再按蓝、绿、红的顺序排列，且 `00` 表示完全不透明。

/// 支持的颜色名称及其 RGB 十六进制值
const NAMED_COLORS: &[(&str, &str)] = &[
    ("white", "FFFFFF"),
    ("black", "000000"),
    ("red", "FF0000"),
    ("green", "00FF00"),
    ("blue", "0000FF"),
    ("yellow", "FFFF00"),
];

const DEFAULT_RGB: &str = "FFFFFF";

/// 把颜色名称或 `#RRGGBB` 转换为 ASS 的 `AABBGGRR`（不含 `&H` 前缀）
///
/// 十六进制颜色保留原有大小写。
///
/// `alpha` 为不透明度，取值 0 到 1。无法识别的颜色按白色处理。
pub fn to_ass_color(color: &str, alpha: f64) -> String {
    let rgb = resolve_rgb(color);
    format!("{}{}", alpha_byte(alpha), rgb_to_bgr(&rgb))
}

fn resolve_rgb(color: &str) -> String {
    let lower = color.to_ascii_lowercase();
    if let Some((_, hex)) = NAMED_COLORS.iter().find(|(name, _)| *name == lower) {
        return hex.to_string();
    }
    match color.strip_prefix('#') {
        Some(hex) => hex.to_string(),
        None => DEFAULT_RGB.to_string(),
    }
}

/// 不透明度 → ASS 透明度字节，截断取整
fn alpha_byte(alpha: f64) -> String {
    let alpha = if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 1.0 };
    format!("{:02X}", (255.0 * (1.0 - alpha)) as u8)
}

/// 六位十六进制 RGB 转为 BGR；长度不对时原样返回
fn rgb_to_bgr(hex: &str) -> String {
    if hex.len() == 6 && hex.is_ascii() {
        let (r, g, b) = (&hex[0..2], &hex[2..4], &hex[4..6]);
        format!("{}{}{}", b, g, r)
    } else {
        hex.to_string()
    }
}
