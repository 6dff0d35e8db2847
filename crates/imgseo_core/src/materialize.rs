use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use reqwest::blocking::Client;
use tempfile::NamedTempFile;

use crate::config::HttpSettings;
use crate::error::ImageError;

/// Produces the bytes of an image at its canonical destination.
///
/// Implementations must leave `destination` untouched on failure.
pub trait Materializer {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, ImageError>;
    fn copy(&self, source: &Path, destination: &Path) -> Result<u64, ImageError>;
}

/// Streams remote images over HTTP and copies local ones.
pub struct HttpMaterializer {
    client: Client,
    user_agent: String,
}

impl HttpMaterializer {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build image HTTP client")?;
        Ok(Self {
            client,
            user_agent: settings.user_agent.clone(),
        })
    }
}

impl Materializer for HttpMaterializer {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, ImageError> {
        let transport = |error: reqwest::Error| ImageError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        };
        let mut response = self
            .client
            .get(url)
            .header("User-Agent", self.user_agent.clone())
            .send()
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut staged = stage_next_to(destination)?;
        let written = response.copy_to(&mut staged).map_err(transport)?;
        persist(staged, destination)?;
        debug!("downloaded {written} bytes from {url}");
        Ok(written)
    }

    fn copy(&self, source: &Path, destination: &Path) -> Result<u64, ImageError> {
        let mut input = File::open(source).map_err(|err| ImageError::io(source, &err))?;
        let mut staged = stage_next_to(destination)?;
        let written =
            io::copy(&mut input, &mut staged).map_err(|err| ImageError::io(destination, &err))?;
        if let Ok(modified) = fs::metadata(source).and_then(|meta| meta.modified())
            && let Err(err) = staged.as_file().set_modified(modified)
        {
            debug!("could not carry modification time of {}: {err}", source.display());
        }
        persist(staged, destination)?;
        Ok(written)
    }
}

/// Plans without side effects: every materialization reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunMaterializer;

impl Materializer for DryRunMaterializer {
    fn download(&self, _url: &str, _destination: &Path) -> Result<u64, ImageError> {
        Ok(0)
    }

    fn copy(&self, _source: &Path, _destination: &Path) -> Result<u64, ImageError> {
        Ok(0)
    }
}

fn stage_next_to(destination: &Path) -> Result<NamedTempFile, ImageError> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    NamedTempFile::new_in(parent).map_err(|err| ImageError::io(parent, &err))
}

fn persist(staged: NamedTempFile, destination: &Path) -> Result<(), ImageError> {
    staged
        .persist(destination)
        .map(|_| ())
        .map_err(|err| ImageError::io(destination, &err.error))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use httpmock::prelude::*;
    use tempfile::tempdir;

    use super::{DryRunMaterializer, HttpMaterializer, Materializer};
    use crate::config::HttpSettings;
    use crate::error::ImageError;

    fn materializer() -> HttpMaterializer {
        HttpMaterializer::new(&HttpSettings {
            user_agent: "imgseo-test".to_string(),
            timeout: Duration::from_secs(2),
        })
        .expect("client")
    }

    #[test]
    fn copy_overwrites_destination_and_leaves_no_staging_files() {
        let temp = tempdir().expect("tempdir");
        let images = temp.path().join("images");
        fs::create_dir_all(&images).expect("images dir");
        let source = temp.path().join("local.jpg");
        let destination = images.join("waldo-1.jpg");
        fs::write(&source, b"fresh bytes").expect("write source");
        fs::write(&destination, b"stale").expect("write destination");

        let written = materializer().copy(&source, &destination).expect("copy");
        assert_eq!(written, 11);
        assert_eq!(fs::read(&destination).expect("read"), b"fresh bytes");
        assert_eq!(fs::read_dir(&images).expect("read dir").count(), 1);
        assert!(source.exists());
    }

    #[test]
    fn copy_of_missing_source_fails_without_creating_destination() {
        let temp = tempdir().expect("tempdir");
        let destination = temp.path().join("waldo-1.jpg");
        let error = materializer()
            .copy(&temp.path().join("absent.jpg"), &destination)
            .expect_err("must fail");
        assert!(matches!(error, ImageError::Io { .. }));
        assert!(!destination.exists());
    }

    #[test]
    fn unreachable_host_is_a_transport_failure() {
        let temp = tempdir().expect("tempdir");
        let destination = temp.path().join("waldo-1.png");
        let error = materializer()
            .download("http://127.0.0.1:9/unreachable.png", &destination)
            .expect_err("must fail");
        assert!(matches!(error, ImageError::Transport { .. }));
        assert!(!destination.exists());
        assert_eq!(fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn download_streams_body_and_sends_user_agent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/waldo.png")
                .header("user-agent", "imgseo-test");
            then.status(200)
                .header("content-type", "image/png")
                .body("pngdata");
        });
        let temp = tempdir().expect("tempdir");
        let destination = temp.path().join("wheres-waldo-1.png");

        let written = materializer()
            .download(&server.url("/waldo.png"), &destination)
            .expect("download");
        mock.assert();
        assert_eq!(written, 7);
        assert_eq!(fs::read(&destination).expect("read"), b"pngdata");
        assert_eq!(fs::read_dir(temp.path()).expect("read dir").count(), 1);
    }

    #[test]
    fn non_success_status_leaves_no_file_behind() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/gone.png");
            then.status(404).body("not found");
        });
        let temp = tempdir().expect("tempdir");
        let destination = temp.path().join("wheres-waldo-1.png");
        let url = server.url("/gone.png");

        let error = materializer()
            .download(&url, &destination)
            .expect_err("must fail");
        mock.assert();
        assert_eq!(error, ImageError::HttpStatus { url, status: 404 });
        assert!(!destination.exists());
        assert_eq!(fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn dry_run_touches_nothing() {
        let temp = tempdir().expect("tempdir");
        let destination = temp.path().join("waldo-1.png");
        DryRunMaterializer
            .download("http://example.invalid/a.png", &destination)
            .expect("dry download");
        DryRunMaterializer
            .copy(&temp.path().join("absent.jpg"), &destination)
            .expect("dry copy");
        assert!(!destination.exists());
    }
}
