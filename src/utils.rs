use std::path::{Path, PathBuf};

pub const DOWNLOAD_PREFIX: &str = "stego_";

/// Files a drop folder routinely contains that are never meant as input.
pub const IGNORE_FILES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    ".gitignore",
];

/// Suffixes used by browsers and copy tools while a file is still arriving.
pub const PARTIAL_SUFFIXES: &[&str] = &[".part", ".crdownload", ".tmp", ".swp", "~"];

pub fn is_ignored_file(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return true;
    };
    name.starts_with('.')
        || IGNORE_FILES.contains(&name.as_ref())
        || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s))
}

pub fn mime_from_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "bmp" | "dib" => "image/bmp",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Pick a file name for a downloaded image inside `dir` without clobbering
/// anything already there: `stego_cat.png`, then `stego_cat-1.png`, ...
pub fn download_path(dir: &Path, original_name: &str) -> PathBuf {
    let base = format!("{DOWNLOAD_PREFIX}{original_name}");
    let candidate = dir.join(&base);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (base.clone(), String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{stem}-{n}{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
