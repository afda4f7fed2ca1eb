use colored::Color;

use vortex_plugins::Severity;

pub const PRIMARY: Color = Color::TrueColor { r: 130, g: 200, b: 255 };
pub const ACCENT: Color = Color::TrueColor { r: 255, g: 180, b: 80 };
pub const SEPARATOR: Color = Color::BrightBlack;
pub const TEXT_DEFAULT: Color = Color::TrueColor { r: 210, g: 210, b: 210 };
pub const IPV4_ADDR: Color = Color::TrueColor { r: 120, g: 220, b: 160 };
pub const IPV6_ADDR: Color = Color::TrueColor { r: 110, g: 190, b: 230 };
pub const PORT: Color = Color::TrueColor { r: 240, g: 220, b: 120 };
pub const BANNER: Color = Color::TrueColor { r: 180, g: 160, b: 220 };

pub fn severity(severity: Severity) -> Color {
    match severity {
        Severity::Info => Color::BrightBlue,
        Severity::Low => Color::Cyan,
        Severity::Medium => Color::Yellow,
        Severity::High => Color::Red,
    }
}
