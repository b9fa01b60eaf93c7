//! Static serving of the build output directory.

use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    extract::State,
    http::{Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use hmr_protocol::HotUpdateAsset;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::ServerError;

const INDEX_FILE: &str = "index.html";

/// Build `relative` under `root` component by component. Parent and
/// absolute components are rejected outright.
fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, ServerError> {
    let relative = relative.trim_start_matches('/');
    let mut result = root.to_path_buf();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().contains('\0') {
                    warn!("Path component contains null byte: {:?}", name);
                    return Err(ServerError::PathTraversal);
                }
                result.push(name);
            }
            Component::CurDir => continue,
            Component::ParentDir => {
                warn!("Path traversal attempt: {}", relative);
                return Err(ServerError::PathTraversal);
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute path component in {}", relative);
                return Err(ServerError::PathTraversal);
            }
        }
    }

    Ok(result)
}

/// Resolve a request path to an existing file inside `root`, following
/// symlinks only when they stay inside it. Directories map to their index.
async fn resolve_asset(root: &Path, request_path: &str) -> Result<PathBuf, ServerError> {
    let mut path = resolve_path(root, request_path)?;

    if fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
        path.push(INDEX_FILE);
    }

    let Ok(canonical) = fs::canonicalize(&path).await else {
        return Err(ServerError::NotFound(request_path.to_string()));
    };
    let canonical_root = fs::canonicalize(root).await?;
    if !canonical.starts_with(&canonical_root) {
        warn!(
            "Symlink escape attempt: {} resolved to {}",
            path.display(),
            canonical.display()
        );
        return Err(ServerError::PathTraversal);
    }
    if !canonical.is_file() {
        return Err(ServerError::NotFound(request_path.to_string()));
    }

    Ok(canonical)
}

/// Fallback handler: serve files from the output directory.
///
/// Hot-update manifests and chunks are marked `no-cache` since the same
/// path is rewritten by every build.
pub async fn serve_asset(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> Result<Response, ServerError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(ServerError::MethodNotAllowed(method.to_string()));
    }

    let request_path = uri.path();
    let path = resolve_asset(&state.output_dir, request_path).await?;
    let file_size = fs::metadata(&path).await?.len();

    let mime = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        debug!("Streaming {}", path.display());
        let file = fs::File::open(&path).await?;
        Body::from_stream(ReaderStream::new(file))
    };

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, file_size.to_string()),
        ],
        body,
    )
        .into_response();

    if HotUpdateAsset::parse(request_path).is_some() {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-cache"),
        );
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_rejects_parent_dir() {
        let root = Path::new("/srv/dist");
        assert!(matches!(
            resolve_path(root, "/../etc/passwd"),
            Err(ServerError::PathTraversal)
        ));
        assert!(matches!(
            resolve_path(root, "/js/../../secret"),
            Err(ServerError::PathTraversal)
        ));
    }

    #[test]
    fn test_resolve_path_builds_under_root() {
        let root = Path::new("/srv/dist");
        assert_eq!(resolve_path(root, "/").unwrap(), PathBuf::from("/srv/dist"));
        assert_eq!(
            resolve_path(root, "/js/./main.js").unwrap(),
            PathBuf::from("/srv/dist/js/main.js")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_root_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s3cret").unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), root.path().join("link"))
            .unwrap();

        let result = resolve_asset(root.path(), "/link").await;
        assert!(matches!(result, Err(ServerError::PathTraversal)));
    }

    #[tokio::test]
    async fn test_directory_resolves_to_index() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("index.html"), "<html></html>").unwrap();

        let path = resolve_asset(root.path(), "/").await.unwrap();
        assert!(path.ends_with("index.html"));
    }
}
