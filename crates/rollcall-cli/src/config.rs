use anyhow::{Context, Result};
use rollcall_core::{parse_time_of_day, PipelineConfig, WindowCheck};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub pipeline: PipelineConfig,
}

/// Shape of the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    match_threshold: Option<f64>,
    min_confidence: Option<f64>,
    window_start: Option<String>,
    window_end: Option<String>,
    window_check: Option<WindowCheck>,
    frame_stride: Option<u32>,
    seed_seen_from_store: Option<bool>,
}

impl Config {
    /// Load from `path` (or `ROLLCALL_CONFIG`) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let path = path.map(Path::to_path_buf).or(env_path);

        let mut config = Self::defaults(default_db_path());
        if let Some(path) = path {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            config
                .apply_toml(&text)
                .with_context(|| format!("parsing config {}", path.display()))?;
            tracing::debug!(path = %path.display(), "config file loaded");
        }
        config.apply_env(|key| std::env::var(key).ok());
        config.pipeline.validate()?;
        Ok(config)
    }

    fn defaults(db_path: PathBuf) -> Self {
        Self {
            db_path,
            pipeline: PipelineConfig::default(),
        }
    }

    fn apply_toml(&mut self, text: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(text)?;
        let p = &mut self.pipeline;

        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.match_threshold {
            p.match_threshold = v;
        }
        if let Some(v) = file.min_confidence {
            p.min_confidence = v;
        }
        if let Some(v) = file.window_start {
            p.window.start = parse_time_of_day(&v)?;
        }
        if let Some(v) = file.window_end {
            p.window.end = parse_time_of_day(&v)?;
        }
        if let Some(v) = file.window_check {
            p.window_check = v;
        }
        if let Some(v) = file.frame_stride {
            p.frame_stride = v;
        }
        if let Some(v) = file.seed_seen_from_store {
            p.seed_seen_from_store = v;
        }
        Ok(())
    }

    /// Override from environment variables. Unparsable values are logged
    /// and ignored.
    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let p = &mut self.pipeline;

        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        env_parse(&lookup, "ROLLCALL_MATCH_THRESHOLD", &mut p.match_threshold);
        env_parse(&lookup, "ROLLCALL_MIN_CONFIDENCE", &mut p.min_confidence);
        env_parse(&lookup, "ROLLCALL_FRAME_STRIDE", &mut p.frame_stride);
        env_parse(&lookup, "ROLLCALL_WINDOW_CHECK", &mut p.window_check);
        env_parse(&lookup, "ROLLCALL_SEED_FROM_STORE", &mut p.seed_seen_from_store);

        for (key, slot) in [
            ("ROLLCALL_WINDOW_START", &mut p.window.start),
            ("ROLLCALL_WINDOW_END", &mut p.window.end),
        ] {
            if let Some(v) = lookup(key) {
                match parse_time_of_day(&v) {
                    Ok(t) => *slot = t,
                    Err(e) => tracing::warn!(key, error = %e, "ignoring invalid value"),
                }
            }
        }
    }
}

fn env_parse<T, F>(lookup: &F, key: &str, slot: &mut T)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup(key) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(e) => tracing::warn!(key, value = %v, error = %e, "ignoring invalid value"),
        }
    }
}

fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("rollcall.db")
}
