//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`
//! and `APP_*` env vars, and exposes the typed [`RetrievalSettings`].

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::types::SourceKind;

pub struct Config {
    figment: Figment,
}

impl Config {
    /// Load from the current directory.
    pub fn load() -> anyhow::Result<Self> { Self::load_from(Path::new(".")) }

    /// Merge `config.toml`, `config.<env>.toml` (from `RUST_ENV`, default `dev`)
    /// found in `dir`, then `APP_*` environment variables (`__` separates keys).
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Defaults::default())).merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Typed `[retrieval]` section, validated.
    pub fn retrieval(&self) -> anyhow::Result<RetrievalSettings> {
        let settings: RetrievalSettings = self.get("retrieval")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        self.retrieval()
            .map_err(|e| anyhow::anyhow!("invalid configuration for environment '{}': {}", env, e))?;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize)]
struct Defaults {
    retrieval: RetrievalSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionKind {
    Rrf,
    Weighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Settings {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Settings {
    fn default() -> Self { Self { k1: 1.2, b: 0.75 } }
}

impl Bm25Settings {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(Error::config(format!("bm25.k1 must be a finite value >= 0, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::config(format!("bm25.b must be within [0, 1], got {}", self.b)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub strategy: FusionKind,
    pub rrf_k: f32,
    /// Per-source weights for `weighted`; empty means equal split.
    pub weights: BTreeMap<SourceKind, f32>,
}

impl Default for FusionSettings {
    fn default() -> Self { Self { strategy: FusionKind::Rrf, rrf_k: 60.0, weights: BTreeMap::new() } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub over_fetch_factor: usize,
    pub timeout_ms: u64,
    /// Embedding dimensionality expected from callers; 0 disables the check.
    pub vector_dim: usize,
    pub bm25: Bm25Settings,
    pub fusion: FusionSettings,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 10, over_fetch_factor: 3, timeout_ms: 2_000, vector_dim: 0, bm25: Bm25Settings::default(), fusion: FusionSettings::default() }
    }
}

impl RetrievalSettings {
    pub fn validate(&self) -> Result<(), Error> {
        if self.top_k == 0 {
            return Err(Error::config("retrieval.top_k must be > 0"));
        }
        if self.over_fetch_factor == 0 {
            return Err(Error::config("retrieval.over_fetch_factor must be >= 1"));
        }
        if self.timeout_ms == 0 {
            return Err(Error::config("retrieval.timeout_ms must be > 0"));
        }
        if !self.fusion.rrf_k.is_finite() || self.fusion.rrf_k < 0.0 {
            return Err(Error::config("retrieval.fusion.rrf_k must be a finite value >= 0"));
        }
        self.bm25.validate()
    }

    pub fn timeout(&self) -> std::time::Duration { std::time::Duration::from_millis(self.timeout_ms) }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
