// src/recipe/kitchen/fetch.rs

//! Source fetching: HTTP downloads, local copies, git checkouts and the
//! checksum-keyed download cache

use crate::error::{Error, Result};
use crate::hash::{Checksum, verify_file};
use crate::recipe::format::{GitReference, url_filename};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Retrieves a URL into a local file
///
/// Implementations only move bytes; verification happens in [`SourceCache`].
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Fetcher for `http(s)://`, `file://` and plain local paths
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("larder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Download(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: max_retries.max(1),
        })
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(mut response) => {
                    // A definitive HTTP answer is not retried
                    if !response.status().is_success() {
                        return Err(Error::Download(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }

                    let mut file = File::create(dest)?;
                    io::copy(&mut response, &mut file).map_err(|e| {
                        Error::Download(format!("Failed to read body of {url}: {e}"))
                    })?;
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::Download(format!(
                            "Failed to download {url} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.download(url, dest);
        }

        let local = url.strip_prefix("file://").unwrap_or(url);
        if local.contains("://") {
            return Err(Error::Download(format!("Unsupported URL scheme: {}", url)));
        }
        fs::copy(local, dest)
            .map_err(|e| Error::Download(format!("Failed to copy {}: {}", local, e)))?;
        Ok(())
    }
}

/// Checksum-keyed store of verified downloads
///
/// Files live at `<dir>/<algo>-<digest>--<filename>`, so a cached file is
/// found by checksum alone and keeps its original name for format detection.
#[derive(Debug, Clone)]
pub struct SourceCache {
    dir: PathBuf,
}

impl SourceCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache path for a download
    pub fn path_for(&self, checksum: &Checksum, url: &str) -> PathBuf {
        self.dir
            .join(format!("{}--{}", checksum.cache_key(), url_filename(url)))
    }

    /// Directory of the bare mirror for a git source
    pub fn git_path_for(&self, name: &str) -> PathBuf {
        self.dir.join("git").join(format!("{}.git", name))
    }

    pub fn is_cached(&self, checksum: &Checksum, url: &str) -> bool {
        self.path_for(checksum, url).is_file()
    }

    /// Return a verified local copy, downloading it when needed
    ///
    /// Mirrors are tried in order, but only after a download error. A file
    /// that arrives with the wrong checksum is deleted and fails the fetch.
    pub fn fetch_verified(
        &self,
        fetcher: &dyn Fetcher,
        recipe: &str,
        url: &str,
        mirrors: &[String],
        checksum: &Checksum,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let cached_path = self.path_for(checksum, url);

        if cached_path.is_file() {
            match verify_file(&cached_path, checksum)? {
                None => {
                    debug!("Using cached source: {}", cached_path.display());
                    return Ok(cached_path);
                }
                Some(_) => {
                    warn!("Cached file {} is corrupt, re-downloading", cached_path.display());
                    remove_if_present(&cached_path)?;
                }
            }
        }

        let mut last_error = None;
        for candidate in std::iter::once(url).chain(mirrors.iter().map(String::as_str)) {
            // Unique per attempt: workers may fetch the same artifact at once
            let part = tempfile::Builder::new()
                .prefix(".download-")
                .suffix(".part")
                .tempfile_in(&self.dir)?;

            info!("Downloading: {}", candidate);
            if let Err(e) = fetcher.fetch(candidate, part.path()) {
                warn!("{}: {}", candidate, e);
                last_error = Some(e);
                continue;
            }

            if let Some(actual) = verify_file(part.path(), checksum)? {
                part.close()?;
                return Err(Error::ChecksumMismatch {
                    recipe: recipe.to_string(),
                    url: candidate.to_string(),
                    expected: checksum.digest.clone(),
                    actual,
                });
            }

            // A verified file from another worker is identical, so replacing it is fine
            part.persist(&cached_path).map_err(|e| Error::Io(e.error))?;
            return Ok(cached_path);
        }

        Err(last_error.unwrap_or_else(|| Error::Download(format!("No URL to fetch for {}", recipe))))
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn git_command() -> Result<Command> {
    let git = which::which("git")
        .map_err(|e| Error::Download(format!("git is required for git sources: {}", e)))?;
    Ok(Command::new(git))
}

fn run_git(command: &mut Command, what: &str) -> Result<()> {
    debug!("Running {:?}", command);
    let output = command
        .output()
        .map_err(|e| Error::Download(format!("Failed to run git: {}", e)))?;
    if !output.status.success() {
        return Err(Error::Download(format!(
            "git {} failed: {}",
            what,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Create or refresh the bare mirror of a git repository
pub fn update_git_mirror(url: &str, mirror: &Path) -> Result<()> {
    if mirror.is_dir() {
        info!("Updating git mirror {}", mirror.display());
        run_git(
            git_command()?
                .arg("--git-dir")
                .arg(mirror)
                .args(["remote", "update", "--prune"]),
            "remote update",
        )
    } else {
        info!("Cloning {}", url);
        if let Some(parent) = mirror.parent() {
            fs::create_dir_all(parent)?;
        }
        run_git(
            git_command()?.args(["clone", "--mirror", "--quiet", url]).arg(mirror),
            "clone",
        )
    }
}

/// Check out a working tree from a local mirror
pub fn checkout_git(mirror: &Path, reference: &GitReference, dest: &Path) -> Result<()> {
    let mut clone = git_command()?;
    clone.args(["clone", "--quiet"]);
    if let GitReference::Branch(branch) | GitReference::Tag(branch) = reference {
        clone.args(["--branch", branch.as_str()]);
    }
    clone.arg(mirror).arg(dest);
    run_git(&mut clone, "clone")?;

    if let GitReference::Revision(rev) = reference {
        run_git(
            git_command()?
                .arg("-C")
                .arg(dest)
                .args(["checkout", "--quiet", rev]),
            "checkout",
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, hash_bytes};
    use std::sync::Mutex;

    /// Serves fixed bodies by URL and records every request
    struct MapFetcher {
        bodies: Vec<(String, Option<&'static str>)>,
        requests: Mutex<Vec<String>>,
    }

    impl Fetcher for MapFetcher {
        fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
            self.requests.lock().unwrap().push(url.to_string());
            match self.bodies.iter().find(|(u, _)| u == url) {
                Some((_, Some(body))) => Ok(fs::write(dest, body)?),
                _ => Err(Error::Download(format!("unreachable {}", url))),
            }
        }
    }

    /// Writes half the body, pauses, then writes all of it
    struct SlowFetcher {
        body: &'static str,
    }

    impl Fetcher for SlowFetcher {
        fn fetch(&self, _url: &str, dest: &Path) -> Result<()> {
            fs::write(dest, &self.body[..self.body.len() / 2])?;
            std::thread::sleep(Duration::from_millis(200));
            Ok(fs::write(dest, self.body)?)
        }
    }

    fn checksum_of(body: &str) -> Checksum {
        Checksum::new(HashAlgorithm::Sha256, hash_bytes(HashAlgorithm::Sha256, body.as_bytes()))
            .unwrap()
    }

    #[test]
    fn test_cache_path_layout() {
        let cache = SourceCache::new("/cache");
        let checksum = checksum_of("x");
        assert_eq!(
            cache.path_for(&checksum, "https://example.com/a-1.0.tar.gz?x=1"),
            PathBuf::from(format!("/cache/sha256-{}--a-1.0.tar.gz", checksum.digest))
        );
    }

    #[test]
    fn test_mirror_used_after_download_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SourceCache::new(tmp.path());
        let fetcher = MapFetcher {
            bodies: vec![
                ("https://primary/a.tar.gz".to_string(), None),
                ("https://mirror/a.tar.gz".to_string(), Some("payload")),
            ],
            requests: Mutex::new(Vec::new()),
        };

        let path = cache
            .fetch_verified(
                &fetcher,
                "a",
                "https://primary/a.tar.gz",
                &["https://mirror/a.tar.gz".to_string()],
                &checksum_of("payload"),
            )
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "payload");
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("--a.tar.gz"));

        // Second fetch is served from the cache
        cache
            .fetch_verified(&fetcher, "a", "https://primary/a.tar.gz", &[], &checksum_of("payload"))
            .unwrap();
        assert_eq!(fetcher.requests.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_mismatch_is_fatal_and_not_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SourceCache::new(tmp.path());
        let fetcher = MapFetcher {
            bodies: vec![
                ("https://primary/a.tar.gz".to_string(), Some("tampered")),
                ("https://mirror/a.tar.gz".to_string(), Some("payload")),
            ],
            requests: Mutex::new(Vec::new()),
        };
        let expected = checksum_of("payload");

        let err = cache
            .fetch_verified(
                &fetcher,
                "a",
                "https://primary/a.tar.gz",
                &["https://mirror/a.tar.gz".to_string()],
                &expected,
            )
            .unwrap_err();

        match err {
            Error::ChecksumMismatch { recipe, url, expected: e, actual } => {
                assert_eq!(recipe, "a");
                assert_eq!(url, "https://primary/a.tar.gz");
                assert_eq!(e, expected.digest);
                assert_eq!(actual, checksum_of("tampered").digest);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
        // The mirror was never consulted and nothing was left behind
        assert_eq!(fetcher.requests.lock().unwrap().len(), 1);
        assert!(!cache.is_cached(&expected, "https://primary/a.tar.gz"));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_concurrent_fetches_of_same_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SourceCache::new(tmp.path());
        let fetcher = SlowFetcher { body: "shared payload" };
        let checksum = checksum_of("shared payload");

        let paths: Vec<PathBuf> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        cache.fetch_verified(&fetcher, "a", "https://x/shared.tar.gz", &[], &checksum)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
        });

        for path in &paths {
            assert_eq!(fs::read_to_string(path).unwrap(), "shared payload");
        }
        // Only the cached file remains; no partial downloads
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_all_urls_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SourceCache::new(tmp.path());
        let fetcher = MapFetcher {
            bodies: Vec::new(),
            requests: Mutex::new(Vec::new()),
        };
        let err = cache
            .fetch_verified(&fetcher, "a", "https://x/a", &["https://y/a".to_string()], &checksum_of("p"))
            .unwrap_err();
        assert!(matches!(err, Error::Download(_)));
    }

    #[test]
    fn test_http_fetcher_local_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.txt");
        fs::write(&src, "local").unwrap();
        let fetcher = HttpFetcher::new(1).unwrap();

        let dest = tmp.path().join("a");
        fetcher.fetch(&src.display().to_string(), &dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "local");

        let dest = tmp.path().join("b");
        fetcher
            .fetch(&format!("file://{}", src.display()), &dest)
            .unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "local");

        assert!(fetcher.fetch("ftp://example.com/x", &tmp.path().join("c")).is_err());
        assert!(fetcher.fetch(&tmp.path().join("missing").display().to_string(), &tmp.path().join("d")).is_err());
    }
}
