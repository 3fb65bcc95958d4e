//! Frontend asset serving
//!
//! Serves the browser UI from an external directory when one is
//! configured and present, otherwise falls back to an embedded
//! placeholder page. Unknown paths rewrite to `index.html` (SPA
//! routing). The filesystem is strictly read-only here; the resolved
//! absolute path must stay inside the configured base.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use tracing::debug;

use crate::api::AppState;

/// Served when no frontend directory is configured or usable.
const PLACEHOLDER_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>chuan relay</title></head>
<body>
<h1>chuan relay</h1>
<p>The rendezvous server is running. No frontend bundle is configured;
set <code>FRONTEND_DIR</code> to serve one.</p>
</body>
</html>
"#;

/// One-year immutable caching for fingerprinted assets.
const CACHE_IMMUTABLE: &str = "public, max-age=31536000, immutable";
const CACHE_NONE: &str = "no-cache";

/// Fallback route: anything not matched by `/api/*`.
pub async fn serve(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    if let Some(dir) = state.frontend_dir.as_deref() {
        if let Some(response) = serve_from_dir(dir, uri.path()).await {
            return response;
        }
    }
    (
        [(header::CACHE_CONTROL, CACHE_NONE)],
        Html(PLACEHOLDER_HTML),
    )
        .into_response()
}

/// Resolve and serve a request path under `base`.
///
/// Returns `None` when the directory itself is unusable (missing base,
/// missing `index.html`), letting the caller fall back to the
/// placeholder. Escaping paths get an outright 404.
async fn serve_from_dir(base: &Path, request_path: &str) -> Option<Response> {
    let base = tokio::fs::canonicalize(base).await.ok()?;
    let candidate = base.join(request_path.trim_start_matches('/'));

    let resolved = match tokio::fs::canonicalize(&candidate).await {
        Ok(path) => {
            if !path.starts_with(&base) {
                debug!(path = %candidate.display(), "path escapes frontend root");
                return Some(StatusCode::NOT_FOUND.into_response());
            }
            path
        }
        // Unknown path: SPA rewrite to the index
        Err(_) => base.join("index.html"),
    };

    let resolved = if resolved.is_dir() {
        resolved.join("index.html")
    } else {
        resolved
    };

    let body = tokio::fs::read(&resolved).await.ok()?;
    Some(file_response(&resolved, body))
}

fn file_response(path: &Path, body: Vec<u8>) -> Response {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    (
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, cache_control(path).to_string()),
        ],
        body,
    )
        .into_response()
}

/// Hashed asset extensions are safe to cache hard; HTML never is.
fn cache_control(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("js" | "css" | "woff" | "woff2" | "png" | "jpg" | "jpeg" | "svg" | "ico"
        | "webp" | "wasm" | "map") => CACHE_IMMUTABLE,
        _ => CACHE_NONE,
    }
}

/// Check that a configured directory is usable at startup.
pub fn usable_dir(dir: &Path) -> Option<PathBuf> {
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Some(dir.to_path_buf()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chuan-frontend-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("assets")).unwrap();
        std::fs::write(dir.join("index.html"), "<html>index</html>").unwrap();
        std::fs::write(dir.join("assets/app.1a2b3c.js"), "console.log(1)").unwrap();
        dir
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn serves_existing_files_with_content_type() {
        let dir = scratch_dir("files");
        let response = serve_from_dir(&dir, "/assets/app.1a2b3c.js").await.unwrap();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.contains("javascript"), "{content_type}");
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            CACHE_IMMUTABLE
        );
        assert_eq!(body_text(response).await, "console.log(1)");
    }

    #[tokio::test]
    async fn unknown_paths_rewrite_to_index() {
        let dir = scratch_dir("spa");
        let response = serve_from_dir(&dir, "/room/A2B3C4").await.unwrap();
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            CACHE_NONE
        );
        assert_eq!(body_text(response).await, "<html>index</html>");
    }

    #[tokio::test]
    async fn escaping_paths_are_refused() {
        let dir = scratch_dir("guard");
        // A real file one level above the base
        let secret = dir.parent().unwrap().join("chuan-frontend-secret.txt");
        std::fs::write(&secret, "secret").unwrap();

        let response = serve_from_dir(&dir, "/../chuan-frontend-secret.txt")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let _ = std::fs::remove_file(secret);
    }

    #[tokio::test]
    async fn missing_base_falls_back() {
        let missing = std::env::temp_dir().join("chuan-frontend-does-not-exist");
        assert!(serve_from_dir(&missing, "/").await.is_none());
        assert!(usable_dir(&missing).is_none());
    }

    #[test]
    fn cache_policy_by_extension() {
        assert_eq!(cache_control(Path::new("a/app.js")), CACHE_IMMUTABLE);
        assert_eq!(cache_control(Path::new("a/style.css")), CACHE_IMMUTABLE);
        assert_eq!(cache_control(Path::new("a/index.html")), CACHE_NONE);
        assert_eq!(cache_control(Path::new("a/no-extension")), CACHE_NONE);
    }
}
