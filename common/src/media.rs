use sha2::{Digest, Sha256};

use api::file::{FileType, MetadataValueType};

// media
//
// this module holds the small pure helpers shared by the scanner and the
// watcher: extension classification, the head-sample quick hash, and the
// container sniffing used for the file_metadata sidecar.

// how much of the file head the quick hash covers
pub const QUICK_HASH_LEN: u64 = 64 * 1024;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts", "m2ts", "vob",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "wav", "aac", "m4a", "m4b", "wma", "alac", "ape",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "heic", "svg",
];

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "epub", "mobi", "azw3", "djvu", "doc", "docx", "odt", "txt", "rtf", "cbz", "cbr",
];

const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "sub", "ass", "ssa", "vtt", "idx"];

const METADATA_EXTENSIONS: &[&str] = &["nfo", "xml", "json", "cue", "m3u", "sfv"];

pub fn file_type_for_extension(ext: &str) -> FileType {
    let ext = ext.to_lowercase();
    let ext = ext.as_str();

    if VIDEO_EXTENSIONS.contains(&ext) {
        FileType::Video
    } else if AUDIO_EXTENSIONS.contains(&ext) {
        FileType::Audio
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        FileType::Image
    } else if DOCUMENT_EXTENSIONS.contains(&ext) {
        FileType::Document
    } else if SUBTITLE_EXTENSIONS.contains(&ext) {
        FileType::Subtitle
    } else if METADATA_EXTENSIONS.contains(&ext) {
        FileType::Metadata
    } else {
        FileType::Other
    }
}

pub fn mime_hint(name: &str) -> Option<String> {
    mime_guess::from_path(name).first().map(|m| m.to_string())
}

// whether a file of this size falls inside the hashing window
//
// empties are never hashed; oversize files only when the operator opts in
pub fn in_hash_window(size: u64, min_size: u64, max_size: u64, hash_large: bool) -> bool {
    if size == 0 || size < min_size {
        return false;
    }

    size < max_size || hash_large
}

// digest of a head sample, hex-encoded
//
// callers are expected to pass at most QUICK_HASH_LEN bytes; shorter reads
// (from files near the threshold) hash whatever arrived
pub fn quick_hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// container sniffing for the file_metadata sidecar
//
// these checks only look at magic numbers in the head sample, which is all
// the storage clients guarantee we can read cheaply
pub fn sniff_container(head: &[u8]) -> Option<&'static str> {
    if head.len() < 12 {
        return None;
    }

    if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("matroska");
    }

    if &head[4..8] == b"ftyp" {
        return Some("mp4");
    }

    if head.starts_with(b"RIFF") && &head[8..12] == b"AVI " {
        return Some("avi");
    }

    if head.starts_with(b"RIFF") && &head[8..12] == b"WAVE" {
        return Some("wav");
    }

    if head.starts_with(b"ID3") || (head[0] == 0xFF && head[1] & 0xE0 == 0xE0) {
        return Some("mpeg-audio");
    }

    if head.starts_with(b"fLaC") {
        return Some("flac");
    }

    if head.starts_with(b"OggS") {
        return Some("ogg");
    }

    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpeg");
    }

    if head.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some("png");
    }

    if head.starts_with(b"%PDF") {
        return Some("pdf");
    }

    None
}

// the typed key/value rows extracted for a media-like file
pub fn extract_metadata_entries(
    name: &str,
    head: &[u8],
) -> Vec<(String, String, MetadataValueType)> {
    let mut entries = Vec::new();

    if let Some(container) = sniff_container(head) {
        entries.push((
            "container".to_owned(),
            container.to_owned(),
            MetadataValueType::Text,
        ));
    }

    if let Some(mime) = mime_hint(name) {
        entries.push(("mime_type".to_owned(), mime, MetadataValueType::Text));
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_classification() {
        assert_eq!(file_type_for_extension("mkv"), FileType::Video);
        assert_eq!(file_type_for_extension("MKV"), FileType::Video);
        assert_eq!(file_type_for_extension("flac"), FileType::Audio);
        assert_eq!(file_type_for_extension("srt"), FileType::Subtitle);
        assert_eq!(file_type_for_extension("nfo"), FileType::Metadata);
        assert_eq!(file_type_for_extension("zzz"), FileType::Other);
    }

    #[test]
    fn hash_window_boundaries() {
        let min = 1024 * 1024;
        let max = 100 * 1024 * 1024;

        // exactly at the threshold is hashed; one byte under is not
        assert!(in_hash_window(min, min, max, false));
        assert!(!in_hash_window(min - 1, min, max, false));

        assert!(!in_hash_window(0, min, max, false));
        assert!(!in_hash_window(max, min, max, false));
        assert!(in_hash_window(max, min, max, true));
    }

    #[test]
    fn quick_hash_is_stable() {
        let a = quick_hash_bytes(b"catalogizer");
        let b = quick_hash_bytes(b"catalogizer");
        let c = quick_hash_bytes(b"catalogizer!");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn container_sniffing() {
        let mkv = [0x1A, 0x45, 0xDF, 0xA3, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(sniff_container(&mkv), Some("matroska"));

        let mut mp4 = vec![0u8; 12];
        mp4[4..8].copy_from_slice(b"ftyp");
        assert_eq!(sniff_container(&mp4), Some("mp4"));

        assert_eq!(sniff_container(b"%PDF-1.7 something"), Some("pdf"));
        assert_eq!(sniff_container(b"not a container here"), None);
        assert_eq!(sniff_container(b"tiny"), None);
    }
}
