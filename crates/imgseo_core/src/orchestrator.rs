use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::Serialize;
use similar::TextDiff;

use crate::config::{PlannedPage, SiteConfig};
use crate::error::PageSkip;
use crate::filesystem::{display_path, normalize_pathbuf};
use crate::materialize::Materializer;
use crate::rewrite::{PageReport, RewriteContext, rewrite_page};

pub const LOCK_FILENAME: &str = ".imgseo.lock";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Plan only: pages are not written and no lock is taken.
    pub dry_run: bool,
    /// Attach a unified diff of every changed page to its report.
    pub capture_diff: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTotals {
    pub pages_configured: usize,
    pub pages_processed: usize,
    pub pages_written: usize,
    pub pages_skipped: usize,
    pub images_found: usize,
    pub images_materialized: usize,
    pub images_already_canonical: usize,
    pub images_skipped: usize,
    pub images_failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub pages: Vec<PageReport>,
    pub skipped_pages: Vec<PageSkip>,
}

impl RunSummary {
    pub fn totals(&self) -> RunTotals {
        let mut totals = RunTotals {
            pages_configured: self.pages.len() + self.skipped_pages.len(),
            pages_processed: self.pages.len(),
            pages_skipped: self.skipped_pages.len(),
            ..RunTotals::default()
        };
        for page in &self.pages {
            if page.written {
                totals.pages_written += 1;
            }
            totals.images_found += page.images_found;
            totals.images_materialized += page.materialized();
            totals.images_already_canonical += page.already_canonical();
            totals.images_skipped += page.skipped();
            totals.images_failed += page.failed();
        }
        totals
    }

    pub fn has_failures(&self) -> bool {
        self.pages.iter().any(|page| page.failed() > 0)
    }
}

/// Drives the page table of one site, one page at a time.
pub struct Orchestrator<'a> {
    base_dir: PathBuf,
    images_dir: PathBuf,
    pages: Vec<PlannedPage>,
    materializer: &'a dyn Materializer,
    options: RunOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        base_dir: &Path,
        config: &SiteConfig,
        materializer: &'a dyn Materializer,
        options: RunOptions,
    ) -> Self {
        let base_dir = normalize_pathbuf(base_dir);
        Self {
            images_dir: config.images_path(&base_dir),
            pages: config.plan_pages(&base_dir),
            base_dir,
            materializer,
            options,
        }
    }

    /// Process every configured page. Only environment-level problems (image
    /// directory cannot be created, another run holds the lock) are errors;
    /// page and image failures are collected into the summary.
    pub fn run(&self) -> Result<RunSummary> {
        let _lock = if self.options.dry_run {
            None
        } else {
            fs::create_dir_all(&self.images_dir).with_context(|| {
                format!("failed to create {}", display_path(&self.images_dir))
            })?;
            Some(RunLock::acquire(&self.images_dir)?)
        };

        let context = RewriteContext {
            base_dir: &self.base_dir,
            images_dir: &self.images_dir,
            materializer: self.materializer,
        };
        let mut summary = RunSummary {
            dry_run: self.options.dry_run,
            ..RunSummary::default()
        };

        for planned in &self.pages {
            let page = match planned {
                PlannedPage::Mapped(page) => page,
                PlannedPage::Unmapped { url } => {
                    let skip = PageSkip::ConfigurationGap { url: url.clone() };
                    warn!("{skip}");
                    summary.skipped_pages.push(skip);
                    continue;
                }
            };

            match rewrite_page(page, &context, !self.options.dry_run) {
                Ok(rewritten) => {
                    let mut report = rewritten.report;
                    if self.options.capture_diff
                        && let Some(html) = rewritten.html.as_deref()
                    {
                        report.diff = Some(unified_diff(&page.file, &rewritten.original, html));
                    }
                    summary.pages.push(report);
                }
                Err(skip) => {
                    warn!("{skip}");
                    summary.skipped_pages.push(skip);
                }
            }
        }

        let totals = summary.totals();
        info!(
            "Processing complete: {} pages processed, {} images materialized, {} failures",
            totals.pages_processed, totals.images_materialized, totals.images_failed
        );
        Ok(summary)
    }
}

fn unified_diff(file: &Path, original: &str, rewritten: &str) -> String {
    let label = display_path(file);
    TextDiff::from_lines(original, rewritten)
        .unified_diff()
        .context_radius(2)
        .header(&label, &label)
        .to_string()
}

/// Exclusive marker in the image directory held for the length of a run.
struct RunLock {
    path: PathBuf,
}

impl RunLock {
    fn acquire(images_dir: &Path) -> Result<Self> {
        let path = images_dir.join(LOCK_FILENAME);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{}", std::process::id()) {
                    debug!("could not record pid in {}: {err}", display_path(&path));
                }
                Ok(Self { path })
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => bail!(
                "another run holds {} (remove it if no run is active)",
                display_path(&path)
            ),
            Err(err) => {
                Err(err).with_context(|| format!("failed to create {}", display_path(&path)))
            }
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!("could not remove {}: {err}", display_path(&self.path));
        }
    }
}
