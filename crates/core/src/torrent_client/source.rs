//! Resolution of a torrent source into the single form sent to a backend.

use reqwest::Client;
use tracing::debug;

use super::{TorrentClientError, TorrentSource};
use crate::transport::TransportError;

/// A torrent source in exactly one sendable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    /// Link the backend fetches itself (URL or magnet).
    Link(String),
    /// .torrent bytes uploaded by the adapter.
    Metainfo {
        data: Vec<u8>,
        filename: Option<String>,
    },
}

impl TorrentSource {
    /// Resolve into what the backend receives.
    ///
    /// With `local_download` a URL is fetched here and only its bytes are
    /// sent; without it only the link is sent.
    pub async fn resolve(
        self,
        local_download: bool,
        http: &Client,
    ) -> Result<ResolvedSource, TorrentClientError> {
        match self {
            TorrentSource::Metainfo { data, filename } => {
                if data.is_empty() {
                    return Err(TorrentClientError::InvalidTorrent(
                        "empty torrent data".to_string(),
                    ));
                }
                Ok(ResolvedSource::Metainfo { data, filename })
            }
            TorrentSource::Url(url) if !local_download => Ok(ResolvedSource::Link(url)),
            TorrentSource::Url(url) => fetch_metainfo(http, &url).await,
        }
    }
}

async fn fetch_metainfo(http: &Client, url: &str) -> Result<ResolvedSource, TorrentClientError> {
    if url.starts_with("magnet:") {
        return Err(TorrentClientError::InvalidTorrent(
            "magnet links cannot be downloaded locally".to_string(),
        ));
    }

    debug!(url = url, "Fetching torrent file");

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| TorrentClientError::from(TransportError::from(e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TorrentClientError::InvalidTorrent(format!(
            "HTTP {} fetching {}",
            status, url
        )));
    }

    let data = response
        .bytes()
        .await
        .map_err(|e| TorrentClientError::from(TransportError::from(e)))?
        .to_vec();

    // A metainfo file is a bencoded dictionary.
    if data.first() != Some(&b'd') {
        return Err(TorrentClientError::InvalidTorrent(format!(
            "{} did not return a torrent file",
            url
        )));
    }

    Ok(ResolvedSource::Metainfo {
        data,
        filename: filename_from_url(url),
    })
}

/// Last path segment of a URL, if it looks like a file name.
fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && segment.contains('.'))
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
}
