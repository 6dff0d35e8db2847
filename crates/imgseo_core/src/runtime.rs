use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::filesystem::display_path;

const EMBEDDED_STARTER_CONFIG: &str = include_str!("../../../config/starter.toml");

pub const CONFIG_FILENAME: &str = "imgseo.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub base_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub base_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "base_dir={} ({})\nconfig_path={} ({})\nconfig_exists={}",
            display_path(&self.base_dir),
            self.base_source.as_str(),
            display_path(&self.config_path),
            self.config_source.as_str(),
            self.config_path.exists()
        )
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (base_dir, base_source) = if let Some(path) = overrides.base_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_blank(lookup_env("IMGSEO_BASE_DIR")) {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (context.cwd.clone(), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_blank(lookup_env("IMGSEO_CONFIG")) {
        (
            absolutize(Path::new(value.trim()), &base_dir),
            ValueSource::Env,
        )
    } else {
        (base_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    if base_dir.exists() && !base_dir.is_dir() {
        anyhow::bail!("base directory is not a directory: {}", display_path(&base_dir));
    }

    Ok(ResolvedPaths {
        base_dir,
        config_path,
        base_source,
        config_source,
    })
}

/// Write the embedded starter configuration. Returns `true` when a write occurred.
pub fn init_config(paths: &ResolvedPaths, force: bool) -> Result<bool> {
    write_text_file(&paths.config_path, EMBEDDED_STARTER_CONFIG, force)
}

pub fn embedded_starter_config() -> &'static str {
    EMBEDDED_STARTER_CONFIG
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
