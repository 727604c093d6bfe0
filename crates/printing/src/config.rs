use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::{Size, Thickness};
use crate::metrics::Dpi;
use crate::pagination::DEFAULT_FIT_TOLERANCE;

/// Environment variable enabling render trace diagnostics.
pub const ENV_TRACE_RENDER: &str = "PRINTKIT_TRACE_RENDER";
/// Environment variable disabling the preview path.
pub const ENV_DISABLE_PREVIEW: &str = "PRINTKIT_DISABLE_PREVIEW";

/// Tunable knobs for the print pipeline. Every field has a default.
/// 列印管線的可調整設定，所有欄位皆有預設值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintingConfig {
    pub enable_preview: bool,
    pub print_dpi: Dpi,
    pub preview_dpi: Dpi,
    /// Slack in DIP when deciding whether content fits on one page.
    pub fit_tolerance: f64,
    pub trace_render: bool,
    /// Page size used for native settings when a job has no pages.
    pub default_page_size: Size,
    pub default_margins: Thickness,
}

impl Default for PrintingConfig {
    fn default() -> Self {
        Self {
            enable_preview: true,
            print_dpi: Dpi::uniform(300.0),
            preview_dpi: Dpi::uniform(144.0),
            fit_tolerance: DEFAULT_FIT_TOLERANCE,
            trace_render: false,
            default_page_size: Size::new(816.0, 1056.0),
            default_margins: Thickness::uniform(48.0),
        }
    }
}

impl PrintingConfig {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Applies the process environment on top of this configuration.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if lookup(ENV_TRACE_RENDER).is_some_and(|value| is_truthy(&value)) {
            self.trace_render = true;
        }
        if lookup(ENV_DISABLE_PREVIEW).is_some_and(|value| is_truthy(&value)) {
            self.enable_preview = false;
        }
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_letter_output() {
        let config = PrintingConfig::default();
        assert!(config.enable_preview);
        assert_eq!(config.print_dpi, Dpi::uniform(300.0));
        assert_eq!(config.preview_dpi, Dpi::uniform(144.0));
        assert_eq!(config.fit_tolerance, 0.5);
        assert_eq!(config.default_page_size, Size::new(816.0, 1056.0));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = PrintingConfig::from_json_str(r#"{"fit_tolerance": 1.0, "preview_dpi": {"x": 96, "y": 96}}"#)
            .expect("valid config");
        assert_eq!(config.fit_tolerance, 1.0);
        assert_eq!(config.preview_dpi, Dpi::LOGICAL);
        assert_eq!(config.print_dpi, Dpi::uniform(300.0));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            PrintingConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"trace_render": true}}"#).expect("write config");
        let config = PrintingConfig::load(file.path()).expect("load");
        assert!(config.trace_render);

        assert!(matches!(
            PrintingConfig::load(file.path().with_extension("missing")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn overrides_toggle_trace_and_preview() {
        let config = PrintingConfig::default().with_overrides(|key| match key {
            ENV_TRACE_RENDER => Some("1".into()),
            ENV_DISABLE_PREVIEW => Some("true".into()),
            _ => None,
        });
        assert!(config.trace_render);
        assert!(!config.enable_preview);

        let untouched = PrintingConfig::default().with_overrides(|_| Some("0".into()));
        assert_eq!(untouched, PrintingConfig::default());
    }
}
