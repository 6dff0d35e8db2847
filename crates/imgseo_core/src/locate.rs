use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::extension::strip_query_and_fragment;
use crate::filesystem::normalize_pathbuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedKind {
    Remote,
    CanonicalLocal,
    OtherLocal,
    Unresolvable,
}

impl ResolvedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::CanonicalLocal => "canonical-local",
            Self::OtherLocal => "other-local",
            Self::Unresolvable => "unresolvable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Empty,
    Inline,
    Missing(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    Remote(String),
    CanonicalLocal(PathBuf),
    OtherLocal(PathBuf),
    Unresolvable(Unresolved),
}

impl Located {
    pub fn kind(&self) -> ResolvedKind {
        match self {
            Self::Remote(_) => ResolvedKind::Remote,
            Self::CanonicalLocal(_) => ResolvedKind::CanonicalLocal,
            Self::OtherLocal(_) => ResolvedKind::OtherLocal,
            Self::Unresolvable(_) => ResolvedKind::Unresolvable,
        }
    }
}

/// Classifies image references for one page.
///
/// Root-relative references (`/img/a.png`) resolve against the site base
/// directory, everything else against the directory holding the page.
#[derive(Debug, Clone)]
pub struct Locator {
    base_dir: PathBuf,
    page_dir: PathBuf,
    images_dir: PathBuf,
}

impl Locator {
    pub fn new(base_dir: &Path, page_dir: &Path, images_dir: &Path) -> Self {
        Self {
            base_dir: normalize_pathbuf(base_dir),
            page_dir: normalize_pathbuf(page_dir),
            images_dir: normalize_pathbuf(images_dir),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn locate(&self, raw_src: &str) -> Located {
        let trimmed = raw_src.trim();
        if trimmed.is_empty() {
            return Located::Unresolvable(Unresolved::Empty);
        }
        if let Some(url) = remote_url(trimmed) {
            return Located::Remote(url);
        }
        if has_scheme(trimmed) {
            return Located::Unresolvable(Unresolved::Inline);
        }

        let Some(path) = self.local_path(trimmed) else {
            return Located::Unresolvable(Unresolved::Empty);
        };
        if !path.is_file() {
            return Located::Unresolvable(Unresolved::Missing(path));
        }
        if path.parent() == Some(self.images_dir.as_path()) {
            Located::CanonicalLocal(path)
        } else {
            Located::OtherLocal(path)
        }
    }

    /// Filesystem path a local reference points at, without an existence check.
    pub fn local_path(&self, raw_src: &str) -> Option<PathBuf> {
        let trimmed = raw_src.trim();
        if trimmed.is_empty() || remote_url(trimmed).is_some() || has_scheme(trimmed) {
            return None;
        }
        let reference = strip_query_and_fragment(trimmed);
        if reference.is_empty() {
            return None;
        }
        let joined = match reference.strip_prefix('/') {
            Some(rooted) => self.base_dir.join(rooted),
            None => self.page_dir.join(reference),
        };
        Some(normalize_pathbuf(&joined))
    }
}

fn remote_url(value: &str) -> Option<String> {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(value.to_string());
    }
    value
        .strip_prefix("//")
        .filter(|rest| !rest.is_empty())
        .map(|rest| format!("https://{rest}"))
}

/// `data:`, `blob:` and similar scheme references that never name a file.
fn has_scheme(value: &str) -> bool {
    let Some((scheme, _)) = value.split_once(':') else {
        return false;
    };
    scheme.len() > 1
        && scheme
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
}
