//! Resolving and fetching track sources
//!
//! A load is split in two so the engine never has to be borrowed across an
//! await: the engine hands out a [`PendingLoad`] (ticket plus fetch future),
//! the caller drives the future, then gives the bytes back together with the
//! ticket. Tickets carry the mount epoch and the load generation, so a result
//! that arrives after a dispose or after a newer load is simply dropped.

use super::track::{PlayableRef, Track, TrackSource};
use crate::error::LoadError;
use futures::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;

pub type FetchFuture = BoxFuture<'static, Result<Arc<[u8]>, LoadError>>;

/// Fetches the bytes behind a remote track
pub trait SourceFetcher {
    fn fetch(&self, url: &str) -> FetchFuture;
}

/// Used when the crate is built without `remote`
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFetcher;

impl SourceFetcher for OfflineFetcher {
    fn fetch(&self, url: &str) -> FetchFuture {
        let err = LoadError::Fetch {
            url: url.to_string(),
            reason: "remote sources are not enabled in this build".to_string(),
        };
        future::ready(Err(err)).boxed()
    }
}

#[cfg(feature = "remote")]
pub use http::HttpFetcher;

#[cfg(feature = "remote")]
mod http {
    use super::{FetchFuture, SourceFetcher};
    use crate::error::LoadError;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::debug;

    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        client: reqwest::Client,
    }

    impl HttpFetcher {
        pub fn new(timeout: Duration) -> Result<Self, LoadError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| LoadError::Fetch {
                    url: String::new(),
                    reason: e.to_string(),
                })?;
            Ok(Self { client })
        }
    }

    impl SourceFetcher for HttpFetcher {
        fn fetch(&self, url: &str) -> FetchFuture {
            let client = self.client.clone();
            let url = url.to_string();
            async move {
                let failed = |e: reqwest::Error| LoadError::Fetch {
                    url: url.clone(),
                    reason: e.to_string(),
                };
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(failed)?;
                let bytes = response.bytes().await.map_err(failed)?;
                debug!("fetched {} bytes from {}", bytes.len(), url);
                Ok(Arc::from(&bytes[..]))
            }
            .boxed()
        }
    }
}

pub fn is_remote_url(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn validate_url(url: &str) -> Result<(), LoadError> {
    let rest = url
        .split_once("://")
        .filter(|_| is_remote_url(url))
        .map(|(_, rest)| rest)
        .ok_or_else(|| LoadError::UnsupportedUrl(url.to_string()))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || url.chars().any(char::is_whitespace) {
        return Err(LoadError::UnsupportedUrl(url.to_string()));
    }
    Ok(())
}

/// A track's source, checked and ready to fetch
pub enum ResolvedSource {
    Memory(PlayableRef),
    Remote(String),
}

/// Take a lease on an in-memory source or validate a URL. Nothing else is
/// touched, so a track that fails here leaves playback alone.
pub fn resolve(track: &Track) -> Result<ResolvedSource, LoadError> {
    match &track.source {
        TrackSource::Memory(blob) => Ok(ResolvedSource::Memory(blob.lease())),
        TrackSource::Remote(url) => {
            validate_url(url)?;
            Ok(ResolvedSource::Remote(url.clone()))
        }
        TrackSource::Detached => Err(LoadError::Unresolvable { track_id: track.id }),
    }
}

impl ResolvedSource {
    /// Split into the lease to keep while bound and the future producing the bytes
    pub fn into_fetch(self, fetcher: &dyn SourceFetcher) -> (Option<PlayableRef>, FetchFuture) {
        match self {
            ResolvedSource::Memory(lease) => {
                let bytes = lease.bytes();
                (Some(lease), future::ready(Ok(bytes)).boxed())
            }
            ResolvedSource::Remote(url) => (None, fetcher.fetch(&url)),
        }
    }
}

/// Identifies one load against the mount and load generation it began in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub(crate) epoch: u64,
    pub(crate) generation: u64,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[must_use = "a load does nothing until its fetch is driven and finished"]
pub struct PendingLoad {
    pub ticket: LoadTicket,
    pub fetch: FetchFuture,
}

impl PendingLoad {
    /// Drive the fetch to completion
    pub async fn wait(self) -> (LoadTicket, Result<Arc<[u8]>, LoadError>) {
        let bytes = self.fetch.await;
        (self.ticket, bytes)
    }
}

impl fmt::Debug for PendingLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLoad").field("ticket", &self.ticket).finish()
    }
}

/// What happened to a finished fetch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOutcome {
    /// Bound and playing
    Started { duration: f64 },
    /// A newer load began meanwhile
    Superseded,
    /// The engine was disposed or re-mounted meanwhile
    Discarded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(validate_url("https://example.org/a.mp3").is_ok());
        assert!(validate_url("HTTP://example.org").is_ok());
        assert_eq!(
            validate_url("ftp://example.org/a.mp3"),
            Err(LoadError::UnsupportedUrl("ftp://example.org/a.mp3".into()))
        );
        assert!(validate_url("https:///nohost.mp3").is_err());
        assert!(validate_url("https://exa mple.org/a.mp3").is_err());
        assert!(validate_url("/home/me/a.mp3").is_err());
    }

    #[test]
    fn test_detached_track_is_unresolvable() {
        let track = Track::new(TrackSource::Detached);
        assert!(matches!(
            resolve(&track),
            Err(LoadError::Unresolvable { track_id }) if track_id == track.id
        ));
    }

    #[tokio::test]
    async fn test_memory_source_holds_a_lease() {
        let track = Track::from_bytes(vec![7u8; 8]);
        let TrackSource::Memory(blob) = &track.source else {
            panic!("expected memory source");
        };

        let (lease, fetch) = resolve(&track).unwrap().into_fetch(&OfflineFetcher);
        assert_eq!(blob.live_leases(), 1);
        assert_eq!(fetch.await.unwrap().len(), 8);

        drop(lease);
        assert_eq!(blob.live_leases(), 0);
    }

    #[tokio::test]
    async fn test_offline_fetcher_fails_remote_loads() {
        let track = Track::remote("https://example.org/a.mp3");
        let (lease, fetch) = resolve(&track).unwrap().into_fetch(&OfflineFetcher);
        assert!(lease.is_none());
        assert!(matches!(fetch.await, Err(LoadError::Fetch { .. })));
    }
}
