use std::path::PathBuf;

/// Top-level logging configuration (§10.2). A trimmed sibling of the kind of
/// config struct used for full-fleet observability: console + a single log
/// file, no rotation, no OpenTelemetry exporter — a single mesh node has no
/// fleet to aggregate logs across.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub default_level: String,
    pub console: ConsoleConfig,
    pub file: Option<FileConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
        }
    }
}

impl LogConfig {
    /// Verbose, human-readable console output.
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: true,
                level: Some("debug".to_string()),
            },
            file: None,
        }
    }

    /// Minimal, quiet output so test runs aren't drowned in log lines.
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: false,
                ansi: false,
                level: Some("warn".to_string()),
            },
            file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub pretty: bool,
    pub ansi: bool,
    pub level: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false,
            ansi: false,
            level: None,
        }
    }
}

/// Single non-rotating log file. A node process runs for a session, not a
/// fleet lifetime, so rotation policy is out of scope here.
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_logs_plain_text_to_console_only() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(config.console.enabled);
        assert!(!config.console.pretty);
        assert!(config.file.is_none());
    }

    #[test]
    fn development_config_is_pretty_and_verbose() {
        let config = LogConfig::development();
        assert_eq!(config.default_level, "debug");
        assert!(config.console.pretty);
        assert!(config.console.ansi);
    }

    #[test]
    fn testing_config_is_quiet() {
        let config = LogConfig::testing();
        assert_eq!(config.default_level, "warn");
    }
}
