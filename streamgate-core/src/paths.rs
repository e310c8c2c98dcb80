use std::path::{Path, PathBuf};

use crate::config::TranscoderPolicy;
use crate::key::StreamKey;

/// On-disk locations owned by one session, derived only from the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePaths {
    pub output_dir: PathBuf,
    pub playlist: PathBuf,
    pub segment_pattern: PathBuf,
}

impl ResourcePaths {
    pub fn for_key(
        output_root: &Path,
        key: &StreamKey,
        policy: &TranscoderPolicy,
    ) -> Self {
        let output_dir = output_root.join(key.as_str());
        Self {
            playlist: output_dir.join(&policy.playlist_name),
            segment_pattern: output_dir.join(&policy.segment_pattern),
            output_dir,
        }
    }

    /// Resolve a client-supplied file name inside the output directory.
    ///
    /// Only plain names are accepted; anything that could escape the
    /// directory yields `None`.
    pub fn artifact(&self, file_name: &str) -> Option<PathBuf> {
        let valid = !file_name.is_empty()
            && !file_name.starts_with('.')
            && file_name.chars().all(|c| {
                c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
            });

        valid.then(|| self.output_dir.join(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_derive_from_key() {
        let key = StreamKey::parse("7").unwrap();
        let paths = ResourcePaths::for_key(
            Path::new("/srv/hls"),
            &key,
            &TranscoderPolicy::default(),
        );

        assert_eq!(paths.output_dir, PathBuf::from("/srv/hls/7"));
        assert_eq!(paths.playlist, PathBuf::from("/srv/hls/7/index.m3u8"));
        assert_eq!(
            paths.segment_pattern,
            PathBuf::from("/srv/hls/7/segment%d.ts")
        );
    }

    #[test]
    fn artifact_rejects_traversal() {
        let key = StreamKey::parse("7").unwrap();
        let paths = ResourcePaths::for_key(
            Path::new("/srv/hls"),
            &key,
            &TranscoderPolicy::default(),
        );

        assert_eq!(
            paths.artifact("segment12.ts"),
            Some(PathBuf::from("/srv/hls/7/segment12.ts"))
        );
        assert!(paths.artifact("../8/index.m3u8").is_none());
        assert!(paths.artifact("..").is_none());
        assert!(paths.artifact("").is_none());
    }
}
