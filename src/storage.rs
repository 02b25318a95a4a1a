//! Output storage for tagged tracks

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::tagging::EncodedContainer;

/// Suffix of a track still being written
const PARTIAL_SUFFIX: &str = ".part";

/// Destination for finished tracks
#[async_trait]
pub trait TrackSink: Send + Sync {
    /// Persist one track, returning where it was written
    async fn save(&self, track: &EncodedContainer) -> Result<PathBuf>;
}

/// Writes tracks into a single flat directory
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output directory
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create output directory {}", self.root.display()))?;

        debug!("Initialized output directory at {}", self.root.display());
        Ok(())
    }

    /// Claim `<title>.<ext>`, or `<artist> - <title>.<ext>` if another track has it
    ///
    /// Returns the final path and an open `.part` file next to it. The title
    /// name is taken if the track already exists or another save holds its
    /// `.part` file.
    async fn open_target(&self, track: &EncodedContainer) -> Result<Target> {
        let path = self.root.join(track.file_name());
        let partial = partial_path(&path);
        match OpenOptions::new().write(true).create_new(true).open(&partial).await {
            Ok(file) => {
                if !fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok(Target { path, partial, file });
                }
                drop(file);
                let _ = fs::remove_file(&partial).await;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", partial.display()));
            }
        }

        let path = self.root.join(track.qualified_file_name());
        let partial = partial_path(&path);
        debug!("Title already taken, writing {}", path.display());
        let file = File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        Ok(Target { path, partial, file })
    }
}

struct Target {
    path: PathBuf,
    partial: PathBuf,
    file: File,
}

/// `<path>.part`
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

#[async_trait]
impl TrackSink for DirectorySink {
    async fn save(&self, track: &EncodedContainer) -> Result<PathBuf> {
        let Target {
            path,
            partial,
            mut file,
        } = self.open_target(track).await?;

        let written = match file.write_all(&track.data).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        drop(file);

        // Only complete tracks ever appear under their final name
        let finished = match written {
            Ok(()) => fs::rename(&partial, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = finished {
            let _ = fs::remove_file(&partial).await;
            return Err(e).with_context(|| format!("Failed to write track {}", path.display()));
        }

        debug!("Wrote track: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn track(title: &str, artist: &str, data: &[u8]) -> EncodedContainer {
        EncodedContainer {
            data: data.to_vec(),
            title_stem: title.to_string(),
            artist_stem: artist.to_string(),
            extension: "flac",
        }
    }

    #[tokio::test]
    async fn test_init_creates_directory() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path().join("nested").join("out"));
        sink.init().await.unwrap();
        assert!(sink.root().is_dir());
    }

    #[tokio::test]
    async fn test_save_writes_title_named_file() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path().to_path_buf());

        let path = sink.save(&track("晴天", "周杰伦", b"fLaCdata")).await.unwrap();
        assert_eq!(path, temp.path().join("晴天.flac"));
        assert_eq!(std::fs::read(&path).unwrap(), b"fLaCdata");
    }

    #[tokio::test]
    async fn test_colliding_title_gets_artist_prefix() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path().to_path_buf());

        let first = sink.save(&track("Intro", "Band A", b"one")).await.unwrap();
        let second = sink.save(&track("Intro", "Band B", b"two")).await.unwrap();

        assert_eq!(first, temp.path().join("Intro.flac"));
        assert_eq!(second, temp.path().join("Band B - Intro.flac"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_no_partial_files_left_behind() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path().to_path_buf());

        sink.save(&track("Intro", "Band A", b"one")).await.unwrap();
        sink.save(&track("Intro", "Band B", b"two")).await.unwrap();
        assert_eq!(entries(temp.path()), vec!["Band B - Intro.flac", "Intro.flac"]);
    }

    #[tokio::test]
    async fn test_title_being_written_is_taken() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path().to_path_buf());

        // Another save still has Intro.flac open
        std::fs::write(temp.path().join("Intro.flac.part"), b"half").unwrap();

        let path = sink.save(&track("Intro", "Band B", b"two")).await.unwrap();
        assert_eq!(path, temp.path().join("Band B - Intro.flac"));
        assert_eq!(std::fs::read(temp.path().join("Intro.flac.part")).unwrap(), b"half");
        assert!(!temp.path().join("Intro.flac").exists());
    }

    #[tokio::test]
    async fn test_save_into_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp.path().join("missing"));
        assert!(sink.save(&track("x", "y", b"z")).await.is_err());
    }
}
