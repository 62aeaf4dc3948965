//! Tracing setup for a mesh node process: console output (plain or pretty)
//! and, optionally, a single log file. NodeId tagging lets a test harness
//! running several simulated nodes in one process tell their log lines
//! apart (§10.2).

mod config;
mod context;
mod layers;

pub use config::{ConsoleConfig, FileConfig, LogConfig};
pub use context::{NodeContextData, NodeContextGuard};
pub use layers::{NodeContextExtension, NodeContextLayer};

use std::fs::File;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

/// Builds and installs the global tracing subscriber for a mesh node.
///
/// Mirrors the teacher's subscriber builder: start from a `LogConfig`,
/// adjust individual knobs with `with_*`, then `init()`. Trimmed relative to
/// the teacher's version: no JSONL formatting, no rotation, no OpenTelemetry
/// exporter layer.
pub struct MeshSubscriberBuilder {
    config: LogConfig,
}

impl MeshSubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Install the subscriber as the process-global default. Returns a
    /// guard that must be kept alive for the life of the process when file
    /// output is enabled, since the file writer is non-blocking.
    ///
    /// # Panics
    /// Panics if a global subscriber has already been set.
    pub fn init(self) -> Option<tracing_appender::non_blocking::WorkerGuard> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let registry = Registry::default().with(env_filter).with(NodeContextLayer::new());

        let file_layer_and_guard = self.config.file.as_ref().map(|file_config| {
            std::fs::create_dir_all(file_config.path.parent().unwrap_or_else(|| std::path::Path::new(".")))
                .ok();
            let file = File::create(&file_config.path).expect("failed to create log file");
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            (layer, guard)
        });

        match (self.config.console.enabled, self.config.console.pretty, file_layer_and_guard) {
            (true, true, Some((file_layer, guard))) => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(self.config.console.ansi);
                registry.with(console_layer).with(file_layer).init();
                Some(guard)
            }
            (true, false, Some((file_layer, guard))) => {
                let console_layer = tracing_subscriber::fmt::layer().with_ansi(self.config.console.ansi);
                registry.with(console_layer).with(file_layer).init();
                Some(guard)
            }
            (false, _, Some((file_layer, guard))) => {
                registry.with(file_layer).init();
                Some(guard)
            }
            (true, true, None) => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(self.config.console.ansi);
                registry.with(console_layer).init();
                None
            }
            (true, false, None) => {
                let console_layer = tracing_subscriber::fmt::layer().with_ansi(self.config.console.ansi);
                registry.with(console_layer).init();
                None
            }
            (false, _, None) => {
                registry.init();
                None
            }
        }
    }
}

impl Default for MeshSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a development-preset subscriber (pretty, `debug`, console only).
pub fn init_development() {
    MeshSubscriberBuilder::new().with_config(LogConfig::development()).init();
}

/// Install a testing-preset subscriber (quiet, `warn`, console only).
pub fn init_testing() {
    MeshSubscriberBuilder::new().with_config(LogConfig::testing()).init();
}
