use std::io;

use thiserror::Error;

/// Errors raised while running the print pipeline.
/// 列印管線執行時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum PrintError {
    /// The job description is invalid; nothing was applied.
    #[error("invalid print configuration: {0}")]
    Configuration(String),
    /// The requested backend or feature is not available here.
    #[error("printing is unavailable: {0}")]
    PlatformUnavailable(String),
    #[error("failed to render page {page_index}{}: {source}", tag_suffix(.tag))]
    Render {
        page_index: usize,
        tag: Option<String>,
        #[source]
        source: RenderError,
    },
    /// The native print operation reported a failure without user interaction.
    #[error("native print operation failed: {0}")]
    Native(String),
    #[error("print operation was cancelled")]
    Cancelled,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn tag_suffix(tag: &Option<String>) -> String {
    match tag {
        Some(tag) => format!(" ({tag})"),
        None => String::new(),
    }
}

/// Failure raised while drawing a single page.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("visual failed to render: {0}")]
    Visual(String),
    #[error("render backend failed: {0}")]
    Backend(String),
}

/// Errors raised while loading [`crate::config::PrintingConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_mentions_page_and_tag() {
        let err = PrintError::Render {
            page_index: 3,
            tag: Some("invoice".into()),
            source: RenderError::Backend("pixmap".into()),
        };
        assert_eq!(
            err.to_string(),
            "failed to render page 3 (invoice): render backend failed: pixmap"
        );
    }
}
