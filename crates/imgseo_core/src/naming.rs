use std::fmt;

use crate::extension::IMAGE_EXTENSIONS;

/// Lower-case, apostrophes stripped, spaces replaced by hyphens.
pub fn slugify(keyword: &str) -> String {
    keyword
        .replace(' ', "-")
        .replace(['\'', '\u{2019}'], "")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalName {
    slug: String,
    sequence: u32,
    extension: &'static str,
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}{}", self.slug, self.sequence, self.extension)
    }
}

/// Per-page naming state derived from the page's keyword list.
#[derive(Debug, Clone)]
pub struct PageNaming<'a> {
    keywords: &'a [String],
    slug: String,
}

impl<'a> PageNaming<'a> {
    pub fn new(keywords: &'a [String]) -> Self {
        let slug = keywords
            .first()
            .map(|keyword| slugify(keyword))
            .unwrap_or_default();
        Self { keywords, slug }
    }

    pub fn name(&self, sequence: u32, extension: &'static str) -> CanonicalName {
        CanonicalName {
            slug: self.slug.clone(),
            sequence,
            extension,
        }
    }

    /// Alt text for the image at `position`, cycling through the keywords.
    pub fn alt_text(&self, position: usize) -> &'a str {
        if self.keywords.is_empty() {
            return "";
        }
        &self.keywords[position % self.keywords.len()]
    }

    /// True when `file_name` has the `{slug}-{n}{ext}` shape this page generates.
    pub fn owns(&self, file_name: &str) -> bool {
        if self.slug.is_empty() {
            return false;
        }
        let Some(rest) = file_name
            .strip_prefix(self.slug.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
        else {
            return false;
        };
        let Some(dot) = rest.find('.') else {
            return false;
        };
        let (digits, extension) = rest.split_at(dot);
        !digits.is_empty()
            && digits.bytes().all(|byte| byte.is_ascii_digit())
            && IMAGE_EXTENSIONS.contains(&extension)
    }
}
