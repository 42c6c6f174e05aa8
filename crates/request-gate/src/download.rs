//! File download responses.

use std::path::{Path, PathBuf};

use bytes::Bytes;

/// Spreadsheet exports are the common case.
pub const DEFAULT_DOWNLOAD_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub const DEFAULT_FILE_NAME: &str = "download";

#[derive(Clone, Debug, PartialEq)]
pub struct DownloadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl DownloadedFile {
    /// Writes the file into `dir`, keeping only the final component of the server-supplied
    /// name.
    pub fn save_into(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let name = Path::new(&self.file_name)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.into());
        let target = dir.join(name);
        std::fs::write(&target, &self.bytes)?;
        Ok(target)
    }
}

/// Extracts the file name from a `Content-Disposition` header: everything after
/// `filename=`, percent-decoded, surrounding quotes dropped.
pub fn file_name_from_disposition(disposition: &str) -> Option<String> {
    let start = disposition.find("filename=")? + "filename=".len();
    let raw = disposition[start..].trim();
    let raw = raw.split(';').next().unwrap_or(raw).trim().trim_matches('"');
    if raw.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(raw)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    Some(decoded)
}

pub fn content_type_for(file_type: &str) -> String {
    format!("{file_type};charset=utf-8")
}
