//! Gateway and spawn configuration.

use std::path::PathBuf;

use crate::terminal::scrollback::DEFAULT_SCROLLBACK_BYTES;

pub const DEFAULT_COOKIE_NAME: &str = "scout_session";

/// What to run inside each pseudo-terminal, and where.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Extra environment variables, applied after the terminal defaults.
    pub env: Vec<(String, String)>,
}

impl SpawnConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: PathBuf::from("."),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub scrollback_bytes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
        }
    }
}

/// Parse a `KEY=VALUE` pair as given on the command line.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("PIPELINE_DATA=/srv/data").unwrap(),
            ("PIPELINE_DATA".to_string(), "/srv/data".to_string())
        );
        assert_eq!(
            parse_env_pair("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=value").is_err());
    }

    #[test]
    fn test_spawn_config_builder() {
        let config = SpawnConfig::new("scout-shell")
            .arg("--workdir")
            .arg("/srv")
            .cwd("/srv")
            .env("A", "1");
        assert_eq!(config.program, "scout-shell");
        assert_eq!(config.args, vec!["--workdir", "/srv"]);
        assert_eq!(config.cwd, PathBuf::from("/srv"));
        assert_eq!(config.env, vec![("A".to_string(), "1".to_string())]);
    }
}
