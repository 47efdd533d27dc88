use std::ffi::OsString;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Downloads are always stored with this extension, whatever the enclosure type
pub const AUDIO_EXTENSION: &str = "mp3";

const PARTIAL_SUFFIX: &str = ".partial";

/// File name for an episode's download: hex of the first 16 bytes of
/// SHA-256(guid), so it is stable and safe whatever the guid contains.
pub fn download_file_name(guid: &str) -> String {
    let digest = Sha256::digest(guid.as_bytes());
    let stem: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    format!("{stem}.{AUDIO_EXTENSION}")
}

/// Sibling path a transfer writes to before it is renamed into place
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    final_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_stable_hex_with_fixed_extension() {
        let name = download_file_name("https://example.com/episodes/1?ref=rss");

        assert_eq!(name, download_file_name("https://example.com/episodes/1?ref=rss"));
        assert_eq!(name.len(), 32 + 4);
        assert!(name.ends_with(".mp3"));
        assert!(name[..32].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_guids_get_different_names() {
        assert_ne!(download_file_name("a"), download_file_name("b"));
    }

    #[test]
    fn partial_path_is_a_sibling() {
        let final_path = Path::new("/data/downloads/abc.mp3");
        assert_eq!(
            partial_path(final_path),
            PathBuf::from("/data/downloads/abc.mp3.partial")
        );
    }
}
