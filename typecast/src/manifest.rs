#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::fs;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE: &str = "typecast.toml";

#[derive(Debug, Error, Diagnostic)]
#[error("config error: {message}")]
#[diagnostic(code(typecast::config))]
pub struct ConfigError {
    pub message: String,
}

/// Settings from `typecast.toml`, before CLI flags are applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub config_path: Option<PathBuf>,
    pub strict: bool,
    pub target: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    #[serde(default)]
    analysis: Option<Analysis>,
    #[serde(default)]
    log: Option<Log>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Analysis {
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Log {
    #[serde(default)]
    level: Option<String>,
}

/// Nearest `typecast.toml` in `start` or any of its ancestors.
pub fn find_config(start: &Path) -> Option<PathBuf> {
    let mut cur = if start.is_file() {
        start.parent()?.to_path_buf()
    } else {
        start.to_path_buf()
    };

    loop {
        let candidate = cur.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !cur.pop() {
            return None;
        }
    }
}

/// Loads `explicit` if given, otherwise searches upward from `input`.
/// No config file at all is not an error.
pub fn load_config(input: &Path, explicit: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let start = absolute(input);
            match find_config(&start) {
                Some(p) => p,
                None => return Ok(ResolvedConfig::default()),
            }
        }
    };

    let raw = fs::read_to_string(&path).map_err(|e| ConfigError {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    let parsed = parse_config(&raw).map_err(|e| ConfigError {
        message: format!("failed to parse {}: {}", path.display(), e.message),
    })?;

    Ok(ResolvedConfig {
        config_path: Some(path),
        ..parsed
    })
}

pub fn parse_config(raw: &str) -> Result<ResolvedConfig, ConfigError> {
    let parsed: Config = toml::from_str(raw).map_err(|e| ConfigError {
        message: e.to_string(),
    })?;

    let analysis = parsed.analysis.unwrap_or_default();
    let log = parsed.log.unwrap_or_default();
    Ok(ResolvedConfig {
        config_path: None,
        strict: analysis.strict,
        target: analysis.target.filter(|t| !t.trim().is_empty()),
        log_level: log.level.filter(|l| !l.trim().is_empty()),
    })
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        assert_eq!(parse_config("").unwrap(), ResolvedConfig::default());
    }

    #[test]
    fn all_sections() {
        let cfg = parse_config(
            r#"
            [analysis]
            strict = true
            target = "i686-pc-windows-msvc"

            [log]
            level = "debug"
            "#,
        )
        .unwrap();
        assert!(cfg.strict);
        assert_eq!(cfg.target.as_deref(), Some("i686-pc-windows-msvc"));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn blank_values_are_unset() {
        let cfg = parse_config("[analysis]\ntarget = \"  \"\n").unwrap();
        assert_eq!(cfg.target, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse_config("[analysis]\nstirct = true\n").unwrap_err();
        assert!(err.message.contains("stirct"), "{}", err.message);
    }

    #[test]
    fn config_is_found_in_an_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[analysis]\nstrict = true\n").unwrap();
        let input = nested.join("unit.json");
        fs::write(&input, "{}").unwrap();

        let cfg = load_config(&input, None).unwrap();
        assert!(cfg.strict);
        assert_eq!(cfg.config_path, Some(dir.path().join(CONFIG_FILE)));
    }
}
