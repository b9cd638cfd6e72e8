use serde::{Deserialize, Serialize};

/// Settings of a [`Window`](super::Window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Maximum span between the first and the last moment, in seconds.
    pub size: f64,
    /// 0 silent, 1 structural changes, 2 structural changes and accesses.
    pub diagnostics_level: u32,
    /// Let `Window::shrink` also drop moments superseded by a measurement time.
    pub crop_with_measurements: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            size: 0.0025,
            diagnostics_level: 0,
            crop_with_measurements: false,
        }
    }
}

impl WindowConfig {
    pub fn with_size(size: f64) -> WindowConfig {
        WindowConfig {
            size,
            ..Default::default()
        }
    }
}
