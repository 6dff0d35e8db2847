use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::filesystem::{normalize_pathbuf, normalize_separators};
use crate::naming::slugify;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IMAGES_DIR: &str = "images";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteConfig {
    #[serde(default)]
    pub site: SiteSection,
    /// Page URL to HTML file, relative to the base directory.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub pages: Vec<PageEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub images_dir: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PageEntry {
    pub url: String,
    pub keywords: Vec<String>,
}

/// A page joined with its file mapping. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSpec {
    pub url: String,
    pub file: PathBuf,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedPage {
    Mapped(PageSpec),
    Unmapped { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout: Duration,
}

impl SiteConfig {
    pub fn images_dir(&self) -> &str {
        self.site
            .images_dir
            .as_deref()
            .map(|value| value.trim().trim_end_matches(['/', '\\']))
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_IMAGES_DIR)
    }

    pub fn images_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(self.images_dir())
    }

    pub fn validate(&self) -> Result<()> {
        let images_dir = Path::new(self.images_dir());
        if images_dir.is_absolute()
            || images_dir
                .components()
                .any(|component| !matches!(component, Component::Normal(_)))
        {
            bail!(
                "site.images_dir must be a plain relative directory: {}",
                self.images_dir()
            );
        }

        if self.site.timeout_ms == Some(0) {
            bail!("site.timeout_ms must be greater than zero");
        }

        let mut seen = HashSet::new();
        let mut prefixes: HashMap<String, &str> = HashMap::new();
        for page in &self.pages {
            if page.url.trim().is_empty() {
                bail!("page entry with an empty url");
            }
            if !seen.insert(page.url.as_str()) {
                bail!("duplicate page url: {}", page.url);
            }
            let Some(primary) = page.keywords.first() else {
                bail!("page {} has no keywords", page.url);
            };
            if page.keywords.iter().any(|keyword| keyword.trim().is_empty()) {
                bail!("page {} has a blank keyword", page.url);
            }
            if primary.contains(['/', '\\']) {
                bail!(
                    "primary keyword of {} cannot contain path separators: {primary}",
                    page.url
                );
            }
            let slug = slugify(primary);
            if let Some(other) = prefixes.insert(slug.clone(), page.url.as_str()) {
                bail!("pages {other} and {} share image prefix {slug}", page.url);
            }
        }

        let mut mapped: HashMap<PathBuf, &str> = HashMap::new();
        for (url, file) in &self.files {
            if file.trim().is_empty() {
                bail!("file mapping for {url} is empty");
            }
            let path = normalize_pathbuf(Path::new(&normalize_separators(file.trim())));
            if let Some(other) = mapped.insert(path, url.as_str()) {
                bail!("{other} and {url} both map to {}", file.trim());
            }
        }
        Ok(())
    }

    /// Join `[[pages]]` with `[files]` in configuration order.
    pub fn plan_pages(&self, base_dir: &Path) -> Vec<PlannedPage> {
        self.pages
            .iter()
            .map(|page| match self.files.get(&page.url) {
                Some(file) => PlannedPage::Mapped(PageSpec {
                    url: page.url.clone(),
                    file: base_dir.join(file.trim()),
                    keywords: page.keywords.clone(),
                }),
                None => PlannedPage::Unmapped {
                    url: page.url.clone(),
                },
            })
            .collect()
    }

    /// Resolve HTTP settings: env > config > defaults.
    pub fn http_settings(&self) -> HttpSettings {
        self.http_settings_with_lookup(|key| env::var(key).ok())
    }

    fn http_settings_with_lookup<F>(&self, lookup_env: F) -> HttpSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let user_agent = lookup_env("IMGSEO_USER_AGENT")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| self.site.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let timeout_ms = lookup_env("IMGSEO_HTTP_TIMEOUT_MS")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|&value| value > 0)
            .or(self.site.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        HttpSettings {
            user_agent,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Load and validate a SiteConfig from a TOML file. The file is required.
pub fn load_config(config_path: &Path) -> Result<SiteConfig> {
    if !config_path.exists() {
        bail!(
            "configuration not found: {} (run `imgseo init` to create one)",
            config_path.display()
        );
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SiteConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    parsed
        .validate()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use tempfile::tempdir;

    fn sample() -> SiteConfig {
        toml::from_str(
            r#"
[site]
images_dir = "assets/img/"
timeout_ms = 5000

[files]
"https://example.org/" = "index.html"
"https://example.org/picture.html" = "picture.html"

[[pages]]
url = "https://example.org/picture.html"
keywords = ["where's waldo picture", "find waldo pics"]

[[pages]]
url = "https://example.org/missing.html"
keywords = ["orphan page"]

[[pages]]
url = "https://example.org/"
keywords = ["where's waldo"]
"#,
        )
        .expect("parse sample")
    }

    #[test]
    fn load_config_requires_file() {
        let error = load_config(Path::new("/nonexistent/imgseo.toml")).expect_err("must fail");
        assert!(error.to_string().contains("configuration not found"));
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("imgseo.toml");
        fs::write(&config_path, "[site\nimages_dir = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn load_config_rejects_empty_keywords() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("imgseo.toml");
        fs::write(
            &config_path,
            "[[pages]]\nurl = \"https://example.org/\"\nkeywords = []\n",
        )
        .expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(format!("{error:#}").contains("has no keywords"));
    }

    #[test]
    fn validate_rejects_escaping_images_dir() {
        let mut config = sample();
        config.site.images_dir = Some("../elsewhere".to_string());
        assert!(config.validate().is_err());
        config.site.images_dir = Some("/abs/images".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_urls() {
        let mut config = sample();
        config.pages.push(config.pages[0].clone());
        let error = config.validate().expect_err("must fail");
        assert!(error.to_string().contains("duplicate page url"));
    }

    #[test]
    fn validate_rejects_pages_sharing_an_image_prefix() {
        let mut config = sample();
        config.pages.push(PageEntry {
            url: "https://example.org/other.html".to_string(),
            keywords: vec!["wheres waldo".to_string()],
        });
        let error = config.validate().expect_err("must fail");
        assert_eq!(
            error.to_string(),
            "pages https://example.org/ and https://example.org/other.html share image prefix wheres-waldo"
        );
    }

    #[test]
    fn validate_rejects_two_urls_for_one_file() {
        let mut config = sample();
        config.files.insert(
            "https://example.org/alias.html".to_string(),
            "./picture.html".to_string(),
        );
        let error = config.validate().expect_err("must fail");
        assert!(error.to_string().contains("both map to"));

        config.files.insert(
            "https://example.org/alias.html".to_string(),
            "gallery/picture.html".to_string(),
        );
        config.validate().expect("distinct files are fine");
    }

    #[test]
    fn zero_timeout_is_rejected_in_config_and_ignored_in_env() {
        let mut config = sample();
        let env = HashMap::from([("IMGSEO_HTTP_TIMEOUT_MS".to_string(), "0".to_string())]);
        let settings = config.http_settings_with_lookup(|key| env.get(key).cloned());
        assert_eq!(settings.timeout, Duration::from_millis(5000));

        config.site.timeout_ms = Some(0);
        let error = config.validate().expect_err("must fail");
        assert!(error.to_string().contains("timeout_ms"));
    }

    #[test]
    fn images_dir_trims_trailing_separator() {
        let config = sample();
        assert_eq!(config.images_dir(), "assets/img");
        assert_eq!(SiteConfig::default().images_dir(), DEFAULT_IMAGES_DIR);
    }

    #[test]
    fn plan_pages_keeps_configuration_order_and_flags_gaps() {
        let config = sample();
        let planned = config.plan_pages(Path::new("/site"));
        assert_eq!(planned.len(), 3);
        match &planned[0] {
            PlannedPage::Mapped(page_spec) => {
                assert_eq!(page_spec.file, Path::new("/site/picture.html"));
                assert_eq!(page_spec.keywords[0], "where's waldo picture");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            planned[1],
            PlannedPage::Unmapped {
                url: "https://example.org/missing.html".to_string()
            }
        );
        assert!(matches!(&planned[2], PlannedPage::Mapped(page_spec) if page_spec.url == "https://example.org/"));
    }

    #[test]
    fn http_settings_prefer_env_over_config() {
        let config = sample();
        let defaults = config.http_settings_with_lookup(|_| None);
        assert_eq!(defaults.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(defaults.timeout, Duration::from_millis(5000));

        let env = HashMap::from([
            ("IMGSEO_USER_AGENT".to_string(), "test-agent/1.0".to_string()),
            ("IMGSEO_HTTP_TIMEOUT_MS".to_string(), "250".to_string()),
        ]);
        let overridden = config.http_settings_with_lookup(|key| env.get(key).cloned());
        assert_eq!(overridden.user_agent, "test-agent/1.0");
        assert_eq!(overridden.timeout, Duration::from_millis(250));
    }

    #[test]
    fn default_timeout_is_thirty_seconds() {
        let settings = SiteConfig::default().http_settings_with_lookup(|_| None);
        assert_eq!(settings.timeout, Duration::from_secs(30));
    }
}
