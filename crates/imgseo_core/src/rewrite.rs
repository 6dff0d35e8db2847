use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kuchikikiki::{NodeRef, parse_html};
use log::{debug, info, warn};
use markup5ever::local_name;
use serde::Serialize;
use tendril::TendrilSink;

use crate::config::PageSpec;
use crate::error::{ImageError, PageSkip};
use crate::extension::resolve_extension;
use crate::filesystem::{display_path, normalize_pathbuf, relative_reference, write_atomic};
use crate::locate::{Located, Locator, ResolvedKind, Unresolved};
use crate::materialize::Materializer;
use crate::naming::PageNaming;

/// Shared, read-only inputs for rewriting the pages of one site.
pub struct RewriteContext<'a> {
    pub base_dir: &'a Path,
    pub images_dir: &'a Path,
    pub materializer: &'a dyn Materializer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Downloaded,
    Copied,
    AlreadyCanonical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageStatus {
    Updated {
        action: Action,
        canonical_path: String,
        alt: String,
    },
    Skipped {
        error: ImageError,
    },
    Failed {
        error: ImageError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageOutcome {
    pub position: usize,
    pub sequence: Option<u32>,
    pub raw_src: Option<String>,
    pub kind: Option<ResolvedKind>,
    #[serde(flatten)]
    pub status: ImageStatus,
}

impl ImageOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ImageStatus::Updated { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageReport {
    pub url: String,
    pub file: PathBuf,
    pub images_found: usize,
    pub outcomes: Vec<ImageOutcome>,
    pub changed: bool,
    pub written: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl PageReport {
    pub fn materialized(&self) -> usize {
        self.count_action(|action| matches!(action, Action::Downloaded | Action::Copied))
    }

    pub fn already_canonical(&self) -> usize {
        self.count_action(|action| action == Action::AlreadyCanonical)
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, ImageStatus::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, ImageStatus::Skipped { .. }))
            .count()
    }

    fn count_action<F>(&self, predicate: F) -> usize
    where
        F: Fn(Action) -> bool,
    {
        self.outcomes
            .iter()
            .filter(|outcome| match &outcome.status {
                ImageStatus::Updated { action, .. } => predicate(*action),
                _ => false,
            })
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct RewrittenPage {
    pub report: PageReport,
    pub original: String,
    /// Serialized document, present only when an attribute changed.
    pub html: Option<String>,
}

/// Load a page from disk, rewrite its images and, when `write` is set and
/// something changed, replace the file atomically.
pub fn rewrite_page(
    page: &PageSpec,
    context: &RewriteContext<'_>,
    write: bool,
) -> Result<RewrittenPage, PageSkip> {
    if !page.file.is_file() {
        return Err(PageSkip::MissingFile {
            url: page.url.clone(),
            path: page.file.clone(),
        });
    }
    let original = fs::read_to_string(&page.file).map_err(|err| PageSkip::Unreadable {
        url: page.url.clone(),
        path: page.file.clone(),
        message: err.to_string(),
    })?;

    let file_name = page
        .file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| display_path(&page.file));
    info!("{}", "=".repeat(60));
    info!("Processing {file_name}...");
    info!("{}", "=".repeat(60));

    let mut rewritten = process_html(page, &original, context).map_err(|err| {
        PageSkip::WriteFailed {
            url: page.url.clone(),
            path: page.file.clone(),
            message: err.to_string(),
        }
    })?;

    if let Some(html) = rewritten.html.as_deref()
        && write
    {
        write_atomic(&page.file, html.as_bytes()).map_err(|err| PageSkip::WriteFailed {
            url: page.url.clone(),
            path: page.file.clone(),
            message: format!("{err:#}"),
        })?;
        rewritten.report.written = true;
        info!(
            "Saved {file_name} with {} updated images",
            rewritten
                .report
                .outcomes
                .iter()
                .filter(|outcome| outcome.succeeded())
                .count()
        );
    } else if rewritten.html.is_some() {
        info!("{file_name} would be updated (dry run)");
    } else {
        info!("{file_name} already up to date");
    }

    Ok(rewritten)
}

/// Rewrite every `<img>` of `html` in document order.
pub fn process_html(
    page: &PageSpec,
    html: &str,
    context: &RewriteContext<'_>,
) -> io::Result<RewrittenPage> {
    let document = parse_html().one(html);
    let images = match document.select("img") {
        Ok(selection) => selection.collect::<Vec<_>>(),
        Err(()) => Vec::new(),
    };
    info!("Found {} images", images.len());

    let page_dir = page
        .file
        .parent()
        .map(normalize_pathbuf)
        .unwrap_or_else(|| normalize_pathbuf(context.base_dir));
    let locator = Locator::new(context.base_dir, &page_dir, context.images_dir);
    let naming = PageNaming::new(&page.keywords);
    let referenced = images
        .iter()
        .filter_map(|image| {
            let attributes = image.attributes.borrow();
            attributes
                .get(local_name!("src"))
                .and_then(|src| locator.local_path(src))
        })
        .collect::<HashSet<_>>();

    let mut rewriter = ImageRewriter {
        context,
        locator,
        naming,
        page_dir,
        referenced,
    };

    let mut report = PageReport {
        url: page.url.clone(),
        file: page.file.clone(),
        images_found: images.len(),
        ..PageReport::default()
    };
    let mut sequence = 0u32;

    for (position, image) in images.iter().enumerate() {
        let number = position + 1;
        let raw_src = image
            .attributes
            .borrow()
            .get(local_name!("src"))
            .map(str::to_string)
            .filter(|src| !src.is_empty());
        let Some(raw_src) = raw_src else {
            info!("  Image {number}: No src attribute, skipping");
            report.outcomes.push(ImageOutcome {
                position,
                sequence: None,
                raw_src: None,
                kind: None,
                status: ImageStatus::Skipped {
                    error: ImageError::MissingReference,
                },
            });
            continue;
        };

        sequence += 1;
        let located = rewriter.locator.locate(&raw_src);
        let kind = located.kind();
        debug!("  Image {number}: {} reference {raw_src}", kind.as_str());
        let status = match rewriter.materialize(number, &raw_src, located, sequence) {
            Ok((action, canonical_path)) => {
                let alt = rewriter.naming.alt_text(position).to_string();
                let mut attributes = image.attributes.borrow_mut();
                if attributes.get(local_name!("src")) != Some(canonical_path.as_str()) {
                    attributes.insert(local_name!("src"), canonical_path.clone());
                    report.changed = true;
                }
                if attributes.get(local_name!("alt")) != Some(alt.as_str()) {
                    attributes.insert(local_name!("alt"), alt.clone());
                    report.changed = true;
                    info!("    Updated alt text to: {alt}");
                }
                ImageStatus::Updated {
                    action,
                    canonical_path,
                    alt,
                }
            }
            Err(error) if error.is_skip() => {
                info!("  Image {number}: {error}, skipping");
                ImageStatus::Skipped { error }
            }
            Err(error) => {
                warn!("  Image {number}: {error}, keeping original reference");
                ImageStatus::Failed { error }
            }
        };
        report.outcomes.push(ImageOutcome {
            position,
            sequence: Some(sequence),
            raw_src: Some(raw_src),
            kind: Some(kind),
            status,
        });
    }

    let serialized = if report.changed {
        Some(serialize_document(&document)?)
    } else {
        None
    };
    Ok(RewrittenPage {
        report,
        original: html.to_string(),
        html: serialized,
    })
}

struct ImageRewriter<'a, 'k> {
    context: &'a RewriteContext<'a>,
    locator: Locator,
    naming: PageNaming<'k>,
    page_dir: PathBuf,
    /// Local files currently referenced by some element of this page.
    referenced: HashSet<PathBuf>,
}

impl ImageRewriter<'_, '_> {
    /// Ensure the image exists under its canonical name. Returns the action
    /// taken and the reference to write into `src`.
    fn materialize(
        &mut self,
        number: usize,
        raw_src: &str,
        located: Located,
        sequence: u32,
    ) -> Result<(Action, String), ImageError> {
        let name = self.naming.name(sequence, resolve_extension(raw_src));
        let destination = self.locator.images_dir().join(name.to_string());

        let action = match located {
            Located::Remote(url) => {
                info!("  Image {number}: Downloading {}...", preview(&url));
                self.ensure_vacant(&destination, None)?;
                self.context.materializer.download(&url, &destination)?;
                info!("    Saved as {name}");
                Action::Downloaded
            }
            Located::CanonicalLocal(path) if self.is_owned(&path) => {
                info!("  Image {number}: Already properly named: {raw_src}");
                return Ok((Action::AlreadyCanonical, raw_src.to_string()));
            }
            Located::CanonicalLocal(path) | Located::OtherLocal(path) => {
                info!("  Image {number}: Copying {raw_src} to {name}");
                self.ensure_vacant(&destination, Some(&path))?;
                self.context.materializer.copy(&path, &destination)?;
                info!("    Copied to {name}");
                Action::Copied
            }
            Located::Unresolvable(Unresolved::Missing(path)) => {
                return Err(ImageError::UnresolvableLocal { path });
            }
            Located::Unresolvable(Unresolved::Inline) => return Err(ImageError::InlineData),
            Located::Unresolvable(Unresolved::Empty) => {
                return Err(ImageError::UnusableReference {
                    raw: raw_src.to_string(),
                });
            }
        };

        let reference = relative_reference(&self.page_dir, &destination);
        self.referenced.insert(destination);
        Ok((action, reference))
    }

    fn is_owned(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.naming.owns(name))
    }

    /// Never overwrite a file another element of this page still points at.
    fn ensure_vacant(&self, destination: &Path, source: Option<&Path>) -> Result<(), ImageError> {
        if source == Some(destination) || !self.referenced.contains(destination) {
            return Ok(());
        }
        Err(ImageError::Occupied {
            path: destination.to_path_buf(),
        })
    }
}

fn serialize_document(document: &NodeRef) -> io::Result<String> {
    let mut buffer = Vec::new();
    document.serialize(&mut buffer)?;
    String::from_utf8(buffer).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

fn preview(url: &str) -> &str {
    match url.char_indices().nth(80) {
        Some((index, _)) => &url[..index],
        None => url,
    }
}
