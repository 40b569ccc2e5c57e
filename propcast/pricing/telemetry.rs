use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

use crate::config::LoggingSettings;

/// Builder for pricing telemetry sinks.
pub struct PricingTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    stderr: bool,
    min_level: LogLevel,
}

impl PricingTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            stderr: false,
            min_level: LogLevel::Debug,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Writes to stderr when no log path is set.
    #[must_use]
    pub fn stderr(mut self, enabled: bool) -> Self {
        self.stderr = enabled;
        self
    }

    /// Drops records below the given level.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Applies the `[logging]` section of the configuration.
    #[must_use]
    pub fn settings(mut self, settings: &LoggingSettings) -> Self {
        if let Some(path) = &settings.path {
            self.log_path = Some(path.clone());
        }
        self.stderr = settings.stderr;
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<PricingTelemetry> {
        let logger = match (self.log_path, self.stderr) {
            (Some(path), _) => Some(JsonLogger::new(path)?),
            (None, true) => Some(JsonLogger::stderr()),
            (None, false) => None,
        }
        .map(|logger| logger.with_min_level(self.min_level));
        Ok(PricingTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
            }),
        })
    }
}

/// Telemetry handle shared across pricing components.
#[derive(Clone)]
pub struct PricingTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for PricingTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PricingTelemetry")
            .field("module", &self.inner.module)
            .field("enabled", &self.inner.logger.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
}

impl PricingTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PricingTelemetryBuilder {
        PricingTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }
}

/// Logs through an optional telemetry handle, ignoring sink failures.
pub(crate) fn emit(
    telemetry: Option<&PricingTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}
