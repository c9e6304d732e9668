//! ACID stream configuration.

use crate::error::CoreError;
use std::sync::Arc;

/// Side-channel callback invoked for failures that cannot be surfaced to a
/// caller, such as a best-effort rollback during drop.
pub type ErrorSink = Arc<dyn Fn(&CoreError) + Send + Sync>;

/// Configuration for opening an ACID stream.
#[derive(Clone)]
pub struct AcidConfig {
    /// Whether to flush the target stream after each applied mutation
    /// and after a completed rollback.
    pub auto_flush_target: bool,

    /// Whether to flush the backup stream after each appended record
    /// (safer but slower).
    pub auto_flush_backup: bool,

    /// Human-readable label used in the diagnostics registry.
    pub label: Option<String>,

    /// Side channel for drop-time rollback failures. When unset, failures
    /// are logged instead.
    pub error_sink: Option<ErrorSink>,
}

impl Default for AcidConfig {
    fn default() -> Self {
        Self {
            auto_flush_target: false,
            auto_flush_backup: true,
            label: None,
            error_sink: None,
        }
    }
}

impl AcidConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to flush the target after each mutation.
    #[must_use]
    pub const fn auto_flush_target(mut self, value: bool) -> Self {
        self.auto_flush_target = value;
        self
    }

    /// Sets whether to flush the backup after each appended record.
    #[must_use]
    pub const fn auto_flush_backup(mut self, value: bool) -> Self {
        self.auto_flush_backup = value;
        self
    }

    /// Sets the diagnostics label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the side-channel error sink.
    #[must_use]
    pub fn error_sink(mut self, sink: impl Fn(&CoreError) + Send + Sync + 'static) -> Self {
        self.error_sink = Some(Arc::new(sink));
        self
    }
}

impl std::fmt::Debug for AcidConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcidConfig")
            .field("auto_flush_target", &self.auto_flush_target)
            .field("auto_flush_backup", &self.auto_flush_backup)
            .field("label", &self.label)
            .field("error_sink", &self.error_sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flushes_backup_not_target() {
        let config = AcidConfig::default();
        assert!(config.auto_flush_backup);
        assert!(!config.auto_flush_target);
        assert!(config.label.is_none());
    }

    #[test]
    fn builder_chain() {
        let config = AcidConfig::new()
            .auto_flush_target(true)
            .auto_flush_backup(false)
            .label("device-0");
        assert!(config.auto_flush_target);
        assert!(!config.auto_flush_backup);
        assert_eq!(config.label.as_deref(), Some("device-0"));
    }
}
