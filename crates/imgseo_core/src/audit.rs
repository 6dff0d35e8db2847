use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kuchikikiki::parse_html;
use log::debug;
use markup5ever::local_name;
use serde::Serialize;
use tendril::TendrilSink;
use walkdir::WalkDir;

use crate::config::{PlannedPage, SiteConfig};
use crate::extension::IMAGE_EXTENSIONS;
use crate::filesystem::{content_hash, display_path, normalize_pathbuf};
use crate::locate::{Located, Locator, Unresolved};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingReference {
    pub page: String,
    pub src: String,
}

/// Read-only health check of the image directory against the mapped pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub images_dir: PathBuf,
    pub total_images: usize,
    pub pages_scanned: usize,
    /// Images in the directory that no mapped page references.
    pub orphans: Vec<PathBuf>,
    /// References into the image directory whose file is gone.
    pub missing: Vec<MissingReference>,
    /// Groups of byte-identical images.
    pub duplicates: Vec<Vec<PathBuf>>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.missing.is_empty() && self.duplicates.is_empty()
    }
}

pub fn audit_site(base_dir: &Path, config: &SiteConfig) -> Result<AuditReport> {
    let base_dir = normalize_pathbuf(base_dir);
    let images_dir = config.images_path(&base_dir);
    let mut report = AuditReport {
        images_dir: images_dir.clone(),
        ..AuditReport::default()
    };

    let images = collect_images(&images_dir)?;
    report.total_images = images.len();

    let mut referenced = BTreeSet::new();
    for planned in config.plan_pages(&base_dir) {
        let PlannedPage::Mapped(page) = planned else {
            continue;
        };
        if !page.file.is_file() {
            continue;
        }
        let html = fs::read_to_string(&page.file)
            .with_context(|| format!("failed to read {}", display_path(&page.file)))?;
        report.pages_scanned += 1;

        let page_dir = page
            .file
            .parent()
            .map(normalize_pathbuf)
            .unwrap_or_else(|| base_dir.clone());
        let locator = Locator::new(&base_dir, &page_dir, &images_dir);
        for src in image_sources(&html) {
            match locator.locate(&src) {
                Located::CanonicalLocal(path) | Located::OtherLocal(path) => {
                    referenced.insert(path);
                }
                Located::Unresolvable(Unresolved::Missing(path))
                    if path.parent() == Some(images_dir.as_path()) =>
                {
                    report.missing.push(MissingReference {
                        page: page.url.clone(),
                        src,
                    });
                }
                _ => {}
            }
        }
    }

    let mut by_hash: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for image in &images {
        if !referenced.contains(image) {
            report.orphans.push(image.clone());
        }
        by_hash
            .entry(content_hash(image)?)
            .or_default()
            .push(image.clone());
    }
    report.duplicates = by_hash
        .into_values()
        .filter(|group| group.len() > 1)
        .collect();

    debug!(
        "audited {} images across {} pages",
        report.total_images, report.pages_scanned
    );
    Ok(report)
}

/// Image files directly inside `images_dir`, sorted. Hidden files are ignored.
fn collect_images(images_dir: &Path) -> Result<Vec<PathBuf>> {
    if !images_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut images = Vec::new();
    for entry in WalkDir::new(images_dir).min_depth(1).max_depth(1) {
        let entry = entry
            .with_context(|| format!("failed to scan {}", display_path(images_dir)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        if name.starts_with('.') {
            continue;
        }
        if IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            images.push(normalize_pathbuf(entry.path()));
        }
    }
    images.sort();
    Ok(images)
}

fn image_sources(html: &str) -> Vec<String> {
    let document = parse_html().one(html);
    let Ok(images) = document.select("img") else {
        return Vec::new();
    };
    images
        .filter_map(|image| {
            image
                .attributes
                .borrow()
                .get(local_name!("src"))
                .map(str::to_string)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use tempfile::tempdir;

    use super::audit_site;
    use crate::config::{PageEntry, SiteConfig};
    use crate::orchestrator::LOCK_FILENAME;

    fn config() -> SiteConfig {
        let mut files = BTreeMap::new();
        files.insert("https://site/".to_string(), "index.html".to_string());
        files.insert("https://site/blog/post.html".to_string(), "blog/post.html".to_string());
        SiteConfig {
            files,
            pages: vec![
                PageEntry {
                    url: "https://site/".to_string(),
                    keywords: vec!["where's waldo".to_string()],
                },
                PageEntry {
                    url: "https://site/blog/post.html".to_string(),
                    keywords: vec!["waldo blog".to_string()],
                },
            ],
            ..SiteConfig::default()
        }
    }

    #[test]
    fn reports_orphans_missing_references_and_duplicates() {
        let temp = tempdir().expect("tempdir");
        let base = temp.path();
        let images = base.join("images");
        fs::create_dir_all(base.join("blog")).expect("blog dir");
        fs::create_dir_all(&images).expect("images dir");
        fs::write(images.join("wheres-waldo-1.png"), b"same").expect("write");
        fs::write(images.join("waldo-blog-1.png"), b"same").expect("write");
        fs::write(images.join("leftover-3.jpg"), b"other").expect("write");
        fs::write(images.join(LOCK_FILENAME), b"1").expect("write");
        fs::write(images.join("notes.txt"), b"text").expect("write");
        fs::write(
            base.join("index.html"),
            r#"<img src="images/wheres-waldo-1.png"><img src="images/wheres-waldo-2.gif"><img src="http://remote/x.png">"#,
        )
        .expect("write");
        fs::write(
            base.join("blog").join("post.html"),
            r#"<img src="../images/waldo-blog-1.png">"#,
        )
        .expect("write");

        let report = audit_site(base, &config()).expect("audit");
        assert_eq!(report.total_images, 3);
        assert_eq!(report.pages_scanned, 2);
        assert_eq!(report.orphans, vec![images.join("leftover-3.jpg")]);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].page, "https://site/");
        assert_eq!(report.missing[0].src, "images/wheres-waldo-2.gif");
        assert_eq!(
            report.duplicates,
            vec![vec![
                images.join("waldo-blog-1.png"),
                images.join("wheres-waldo-1.png")
            ]]
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn missing_images_directory_is_an_empty_audit() {
        let temp = tempdir().expect("tempdir");
        let report = audit_site(temp.path(), &config()).expect("audit");
        assert_eq!(report.total_images, 0);
        assert_eq!(report.pages_scanned, 0);
        assert!(report.is_clean());
    }
}
