//! Synthetic resources: the `.m3u` playlist and the `.json` telemetry
//! document. Both point back at this server using the request's host.

use crate::models::{FileInfo, SwarmSnapshot};
use serde::Serialize;

/// Entry of the telemetry document's file list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub url: String,
    pub length: u64,
}

/// Body of `/.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryDocument {
    pub total_length: u64,
    pub downloaded: u64,
    pub uploaded: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub total_peers: usize,
    pub active_peers: usize,
    pub files: Vec<FileEntry>,
}

pub fn file_url(host: &str, index: usize) -> String {
    format!("http://{}/{}", host, index)
}

/// Extended M3U listing each file as `#EXTINF:-1,<path>` then its URL
pub fn playlist<'a>(host: &str, files: impl IntoIterator<Item = (usize, &'a FileInfo)>) -> String {
    let entries: Vec<String> = files
        .into_iter()
        .map(|(index, file)| format!("#EXTINF:-1,{}\n{}", file.path, file_url(host, index)))
        .collect();
    format!("#EXTM3U\n{}", entries.join("\n"))
}

pub fn telemetry_document<'a>(
    host: &str,
    files: impl IntoIterator<Item = (usize, &'a FileInfo)>,
    snapshot: &SwarmSnapshot,
) -> TelemetryDocument {
    let files: Vec<FileEntry> = files
        .into_iter()
        .map(|(index, file)| FileEntry {
            name: file.name.clone(),
            url: file_url(host, index),
            length: file.length,
        })
        .collect();
    TelemetryDocument {
        total_length: files.iter().map(|f| f.length).sum(),
        downloaded: snapshot.bytes_downloaded,
        uploaded: snapshot.bytes_uploaded,
        download_speed: snapshot.download_rate.max(0.0).round() as u64,
        upload_speed: snapshot.upload_rate.max(0.0).round() as u64,
        total_peers: snapshot.peers_total,
        active_peers: snapshot.peers_active,
        files,
    }
}
