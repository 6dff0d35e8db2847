use reqwest::Url;

pub const DEFAULT_EXTENSION: &str = ".jpg";

pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg"];

/// Best-effort extension from the reference string alone. Never inspects content.
pub fn resolve_extension(raw_src: &str) -> &'static str {
    let trimmed = raw_src.trim();
    let path = match Url::parse(trimmed) {
        Ok(url) => url.path().to_string(),
        Err(_) => strip_query_and_fragment(trimmed).to_string(),
    };
    let Some(suffix) = path_suffix(&path) else {
        return DEFAULT_EXTENSION;
    };
    IMAGE_EXTENSIONS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(suffix))
        .copied()
        .unwrap_or(DEFAULT_EXTENSION)
}

pub fn strip_query_and_fragment(value: &str) -> &str {
    value.split(['?', '#']).next().unwrap_or(value)
}

/// Suffix of the last path segment including the dot. Leading dots of hidden
/// files do not count as an extension.
fn path_suffix(path: &str) -> Option<&str> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let stem_len = name.trim_start_matches('.').len();
    let name = &name[name.len() - stem_len..];
    let dot = name.rfind('.')?;
    Some(&name[dot..])
}
