//! Torrent client abstraction.
//!
//! This module provides a `TorrentClient` trait for managing torrents across
//! various daemons (Transmission, qBittorrent, Deluge) through one canonical
//! task model.

pub mod deluge;
pub mod qbittorrent;
mod source;
pub mod transmission;
mod types;

pub use deluge::DelugeClient;
pub use qbittorrent::QBittorrentClient;
pub use source::ResolvedSource;
pub use transmission::TransmissionClient;
pub use types::*;
