//! Widget appearance settings as persisted under the `settings` key.

use serde::{Deserialize, Serialize};

pub const MIN_FONT_SIZE: u32 = 10;
pub const MAX_FONT_SIZE: u32 = 24;
pub const MIN_OPACITY: f64 = 0.5;
pub const MAX_OPACITY: f64 = 1.0;
pub const MIN_WIDTH: f64 = 350.0;
pub const MIN_HEIGHT: f64 = 250.0;

/// Color theme of the widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Follow the host's color-scheme preference
    #[default]
    Auto,
    Light,
    Dark,
}

impl std::str::FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Theme::Auto),
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme '{}', expected auto, light or dark", other)),
        }
    }
}

/// Top-left corner of the widget
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Default for Position {
    fn default() -> Self {
        Self { x: 100.0, y: 100.0 }
    }
}

/// Widget dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: 450.0,
            height: 600.0,
        }
    }
}

/// Persisted settings record.
///
/// Older installs stored a partial (even empty) object, so every field falls
/// back to its default when missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub theme: Theme,
    pub font_size: u32,
    pub opacity: f64,
    pub position: Position,
    pub size: Size,
    pub auto_save: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::Auto,
            font_size: 14,
            opacity: 0.95,
            position: Position::default(),
            size: Size::default(),
            auto_save: true,
        }
    }
}

/// Fields to overwrite in a settings commit. `None` keeps the prior value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub theme: Option<Theme>,
    pub font_size: Option<i64>,
    pub opacity: Option<f64>,
    pub position: Option<Position>,
    pub size: Option<Size>,
    pub auto_save: Option<bool>,
}

impl Settings {
    /// Shallow per-field merge followed by clamping
    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(font_size) = patch.font_size {
            self.font_size = clamp_font_size(font_size);
        }
        if let Some(opacity) = patch.opacity {
            self.opacity = opacity;
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(size) = patch.size {
            self.size = size;
        }
        if let Some(auto_save) = patch.auto_save {
            self.auto_save = auto_save;
        }
        self.sanitize();
    }

    /// Forces every field back inside its bounds
    pub fn sanitize(&mut self) {
        self.font_size = clamp_font_size(self.font_size as i64);
        self.opacity = if self.opacity.is_nan() {
            Settings::default().opacity
        } else {
            self.opacity.clamp(MIN_OPACITY, MAX_OPACITY)
        };
        self.position.x = finite_at_least(self.position.x, 0.0);
        self.position.y = finite_at_least(self.position.y, 0.0);
        self.size.width = finite_at_least(self.size.width, MIN_WIDTH);
        self.size.height = finite_at_least(self.size.height, MIN_HEIGHT);
    }
}

fn clamp_font_size(value: i64) -> u32 {
    value.clamp(MIN_FONT_SIZE as i64, MAX_FONT_SIZE as i64) as u32
}

fn finite_at_least(value: f64, min: f64) -> f64 {
    if value.is_finite() {
        value.max(min)
    } else {
        min
    }
}
