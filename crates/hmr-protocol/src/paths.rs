//! Hot-update asset addressing.

use crate::ids::{BuildHash, ChunkId};

const MANIFEST_SUFFIX: &str = ".hot-update.json";
const CHUNK_SUFFIX: &str = ".hot-update.js";

/// Path of the manifest describing changes since `from`.
pub fn manifest_path(from: &BuildHash) -> String {
    format!("/{from}{MANIFEST_SUFFIX}")
}

/// Path of the update chunk `chunk` relative to `from`.
pub fn chunk_path(chunk: &ChunkId, from: &BuildHash) -> String {
    format!("/{chunk}.{from}{CHUNK_SUFFIX}")
}

/// A request path recognised as a hot-update asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotUpdateAsset {
    Manifest { from: BuildHash },
    Chunk { chunk: ChunkId, from: BuildHash },
}

impl HotUpdateAsset {
    pub fn parse(path: &str) -> Option<Self> {
        let name = path.trim_start_matches('/');

        if let Some(stem) = name.strip_suffix(MANIFEST_SUFFIX) {
            return BuildHash::new(stem)
                .ok()
                .map(|from| Self::Manifest { from });
        }

        let stem = name.strip_suffix(CHUNK_SUFFIX)?;
        // Chunk ids may contain dots; the hash never does.
        let (chunk, from) = stem.rsplit_once('.')?;
        Some(Self::Chunk {
            chunk: ChunkId::new(chunk).ok()?,
            from: BuildHash::new(from).ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(value: &str) -> BuildHash {
        BuildHash::new(value).unwrap()
    }

    #[test]
    fn test_paths_are_keyed_by_from_hash() {
        let from = hash("aaa111");
        let chunk = ChunkId::new("main").unwrap();
        assert_eq!(manifest_path(&from), "/aaa111.hot-update.json");
        assert_eq!(chunk_path(&chunk, &from), "/main.aaa111.hot-update.js");
    }

    #[test]
    fn test_parse_manifest_path() {
        assert_eq!(
            HotUpdateAsset::parse("/aaa111.hot-update.json"),
            Some(HotUpdateAsset::Manifest { from: hash("aaa111") })
        );
    }

    #[test]
    fn test_parse_chunk_path_with_dotted_chunk_id() {
        assert_eq!(
            HotUpdateAsset::parse("/pages.home.aaa111.hot-update.js"),
            Some(HotUpdateAsset::Chunk {
                chunk: ChunkId::new("pages.home").unwrap(),
                from: hash("aaa111"),
            })
        );
    }

    #[test]
    fn test_parse_rejects_other_assets() {
        assert_eq!(HotUpdateAsset::parse("/main.js"), None);
        assert_eq!(HotUpdateAsset::parse("/index.html"), None);
        assert_eq!(HotUpdateAsset::parse("/.hot-update.json"), None);
        assert_eq!(HotUpdateAsset::parse("/main.hot-update.js"), None);
    }
}
