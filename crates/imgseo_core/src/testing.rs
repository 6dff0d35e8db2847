use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use kuchikikiki::parse_html;
use markup5ever::local_name;
use tendril::TendrilSink;

use crate::error::ImageError;
use crate::materialize::Materializer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Download(String),
    Copy(PathBuf, PathBuf),
}

/// In-memory stand-in for the network: known URLs serve fixed bytes, every
/// other URL fails like a refused connection.
#[derive(Debug, Default)]
pub(crate) struct FakeMaterializer {
    remote: HashMap<String, Vec<u8>>,
    calls: RefCell<Vec<Call>>,
}

impl FakeMaterializer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(mut self, url: &str, bytes: &[u8]) -> Self {
        self.remote.insert(url.to_string(), bytes.to_vec());
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn reset(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl Materializer for FakeMaterializer {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, ImageError> {
        self.calls.borrow_mut().push(Call::Download(url.to_string()));
        let Some(bytes) = self.remote.get(url) else {
            return Err(ImageError::Transport {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        };
        fs::write(destination, bytes).map_err(|err| ImageError::io(destination, &err))?;
        Ok(bytes.len() as u64)
    }

    fn copy(&self, source: &Path, destination: &Path) -> Result<u64, ImageError> {
        self.calls
            .borrow_mut()
            .push(Call::Copy(source.to_path_buf(), destination.to_path_buf()));
        fs::copy(source, destination).map_err(|err| ImageError::io(destination, &err))
    }
}

/// `(src, alt)` of every `<img>` in document order.
pub(crate) fn image_attributes(html: &str) -> Vec<(Option<String>, Option<String>)> {
    let document = parse_html().one(html);
    let Ok(images) = document.select("img") else {
        return Vec::new();
    };
    images
        .map(|image| {
            let attributes = image.attributes.borrow();
            (
                attributes.get(local_name!("src")).map(str::to_string),
                attributes.get(local_name!("alt")).map(str::to_string),
            )
        })
        .collect()
}

pub(crate) fn keywords(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
