use super::loader::is_remote_url;
use super::{AudioFormat, Track, TrackMetadata};
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Files larger than this are never read into memory
const MAX_FILE_BYTES: u64 = 1_000_000_000;

/// Turns command-line inputs (files, directories, URLs) into tracks
#[derive(Clone)]
pub struct MusicScanner {
    supported_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ScanProgress {
    TrackFound { title: String, progress: usize },
    Error { input: String, error: String },
    Completed { total_tracks: usize },
}

impl MusicScanner {
    pub fn new() -> Self {
        Self {
            supported_extensions: vec![
                "mp3".to_string(),
                "flac".to_string(),
                "ogg".to_string(),
                "oga".to_string(),
                "mp4".to_string(),
                "m4a".to_string(),
                "aac".to_string(),
                "wav".to_string(),
            ],
        }
    }

    /// Extra extensions to accept, e.g. raw PCM for the headless backend
    pub fn with_extension(mut self, ext: &str) -> Self {
        self.supported_extensions.push(ext.to_ascii_lowercase());
        self
    }

    /// Every audio file under `path`, sorted, hidden files skipped
    pub fn scan_directory<P: AsRef<Path>>(&self, path: P) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for entry in WalkDir::new(path).follow_links(true).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_file() || is_hidden(path) {
                continue;
            }
            if let Ok(metadata) = fs::metadata(path) {
                if metadata.len() == 0 || metadata.len() > MAX_FILE_BYTES {
                    continue;
                }
            }
            if self.is_supported_file(path) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        files
    }

    /// Resolve inputs in order. Unreadable inputs are reported and skipped.
    pub async fn resolve(&self, inputs: &[String]) -> Vec<Track> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracks = self.resolve_with_progress(inputs, tx).await;
        while let Ok(progress) = rx.try_recv() {
            if let ScanProgress::Error { input, error } = progress {
                warn!("skipping {}: {}", input, error);
            }
        }
        tracks
    }

    pub async fn resolve_with_progress(
        &self,
        inputs: &[String],
        progress_tx: mpsc::UnboundedSender<ScanProgress>,
    ) -> Vec<Track> {
        let mut tracks = Vec::new();

        for input in inputs {
            if is_remote_url(input) {
                let track = Track::remote(input.clone()).with_metadata(TrackMetadata {
                    title: title_from_url(input),
                    ..TrackMetadata::default()
                });
                let _ = progress_tx.send(ScanProgress::TrackFound {
                    title: track.display_title(),
                    progress: tracks.len() + 1,
                });
                tracks.push(track);
                continue;
            }

            let path = PathBuf::from(input);
            let files = if path.is_dir() {
                self.scan_directory(&path)
            } else if path.is_file() {
                vec![path]
            } else {
                let _ = progress_tx.send(ScanProgress::Error {
                    input: input.clone(),
                    error: "no such file or directory".to_string(),
                });
                continue;
            };

            for file in files {
                match self.create_track_from_file(&file).await {
                    Ok(track) => {
                        let _ = progress_tx.send(ScanProgress::TrackFound {
                            title: track.display_title(),
                            progress: tracks.len() + 1,
                        });
                        tracks.push(track);
                    }
                    Err(e) => {
                        let _ = progress_tx.send(ScanProgress::Error {
                            input: file.display().to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        let _ = progress_tx.send(ScanProgress::Completed {
            total_tracks: tracks.len(),
        });
        tracks
    }

    fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let normalized = ext.to_ascii_lowercase();
                self.supported_extensions.contains(&normalized)
            })
            .unwrap_or(false)
    }

    async fn create_track_from_file(&self, path: &Path) -> Result<Track> {
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(AudioFormat::from_extension)
            .unwrap_or(AudioFormat::Unknown);

        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            anyhow::bail!("file is empty");
        }
        debug!("read {} bytes ({:?}) from {}", bytes.len(), format, path.display());

        // Tag parsing is left to whoever supplies the metadata
        let title = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(|s| s.to_string());
        Ok(Track::from_bytes(bytes).with_metadata(TrackMetadata {
            title,
            ..TrackMetadata::default()
        }))
    }
}

impl Default for MusicScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with('.'))
}

fn title_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().filter(|s| !s.is_empty())?;
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    Some(stem.to_string())
}
