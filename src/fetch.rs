//! Cached download of the prepared dataset
//!
//! The example dataset (count matrix, sample sheet, annotation table)
//! lives behind fixed URLs. Each file is fetched at most once: a file
//! already present in the cache directory is reused. Downloads land in a
//! temporary sibling and are renamed into place, so an interrupted
//! transfer never leaves a half-written cache file behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DiffexError, Result};

/// Published location of the parathyroid example dataset.
pub const DEFAULT_COUNTS_URL: &str =
    "https://www-huber.embl.de/pub/parathyroid_data/parathyroid_rawCounts.tsv.gz";
pub const DEFAULT_SAMPLES_URL: &str =
    "https://www-huber.embl.de/pub/parathyroid_data/parathyroid_sampleSheet.tsv";
pub const DEFAULT_ANNOTATION_URL: &str =
    "https://www-huber.embl.de/pub/parathyroid_data/parathyroid_annotation.tsv";

/// What to download and where to cache it.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub cache_dir: PathBuf,
    pub counts_url: String,
    pub samples_url: String,
    pub annotation_url: String,
    /// Re-download even when the cache file exists.
    pub force: bool,
    pub timeout: Duration,
}

impl FetchPlan {
    pub fn new<P: Into<PathBuf>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            counts_url: DEFAULT_COUNTS_URL.to_string(),
            samples_url: DEFAULT_SAMPLES_URL.to_string(),
            annotation_url: DEFAULT_ANNOTATION_URL.to_string(),
            force: false,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Local paths of the cached dataset files.
#[derive(Debug, Clone)]
pub struct FetchedDataset {
    pub counts: PathBuf,
    pub samples: PathBuf,
    pub annotation: PathBuf,
}

/// Ensure every dataset file is present in the cache, downloading the
/// missing ones.
pub fn fetch_dataset(plan: &FetchPlan) -> Result<FetchedDataset> {
    fs::create_dir_all(&plan.cache_dir)?;
    let client = reqwest::blocking::Client::builder()
        .timeout(plan.timeout)
        .build()?;

    let counts = fetch_one(&client, &plan.counts_url, &plan.cache_dir, plan.force)?;
    let samples = fetch_one(&client, &plan.samples_url, &plan.cache_dir, plan.force)?;
    let annotation = fetch_one(&client, &plan.annotation_url, &plan.cache_dir, plan.force)?;

    Ok(FetchedDataset {
        counts,
        samples,
        annotation,
    })
}

/// File name a URL caches under.
fn cache_name(url: &str) -> Result<&str> {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DiffexError::DownloadFailed {
            url: url.to_string(),
            reason: "URL has no file name component".to_string(),
        })
}

fn fetch_one(
    client: &reqwest::blocking::Client,
    url: &str,
    cache_dir: &Path,
    force: bool,
) -> Result<PathBuf> {
    let dest = cache_dir.join(cache_name(url)?);

    if dest.exists() && !force {
        log::info!("using cached {}", dest.display());
        return Ok(dest);
    }

    log::info!("downloading {}", url);
    let response = client.get(url).send()?;
    if !response.status().is_success() {
        return Err(DiffexError::DownloadFailed {
            url: url.to_string(),
            reason: format!("server answered {}", response.status()),
        });
    }
    let body = response.bytes()?;

    let partial = dest.with_extension("part");
    fs::write(&partial, &body)?;
    fs::rename(&partial, &dest)?;
    log::info!("cached {} ({} bytes)", dest.display(), body.len());
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_name_takes_last_path_component() {
        assert_eq!(
            cache_name("https://host/pub/data/counts.tsv.gz").unwrap(),
            "counts.tsv.gz"
        );
        assert!(cache_name("https://host/pub/data/").is_err());
    }

    #[test]
    fn existing_cache_file_is_not_touched() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("counts.tsv.gz");
        std::fs::write(&cached, b"cached contents").unwrap();

        // An unroutable URL: the call must succeed without any network use.
        let client = reqwest::blocking::Client::new();
        let path = fetch_one(
            &client,
            "http://192.0.2.1/counts.tsv.gz",
            dir.path(),
            false,
        )
        .unwrap();
        assert_eq!(path, cached);
        assert_eq!(std::fs::read(&path).unwrap(), b"cached contents");
    }
}
