//! Extra HTTP content served next to the MCP endpoint.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::Request,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::future::BoxFuture;
use tower_http::services::ServeDir;

use super::RESERVED_PATHS;

pub type ArtifactFuture = BoxFuture<'static, Response>;
pub type ArtifactHandler = Arc<dyn Fn(Request) -> ArtifactFuture + Send + Sync>;

#[derive(Clone)]
pub enum Artifact {
    /// Fixed content with an explicit content type.
    Static {
        path: String,
        content_type: String,
        content: String,
    },
    /// Response computed per request.
    Dynamic { path: String, handler: ArtifactHandler },
    /// Files under `directory`, mounted at `path`.
    Directory { path: String, directory: PathBuf },
}

impl Artifact {
    pub fn static_content(
        path: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Static {
            path: path.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    /// Static content whose type is guessed from the path's extension.
    pub fn static_guessed(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();
        Self::static_content(path, content_type, content)
    }

    pub fn dynamic<F, Fut>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self::Dynamic {
            path: path.into(),
            handler: Arc::new(move |req: Request| -> ArtifactFuture { Box::pin(handler(req)) }),
        }
    }

    pub fn directory(path: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self::Directory {
            path: path.into(),
            directory: directory.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Static { path, .. } | Self::Dynamic { path, .. } | Self::Directory { path, .. } => {
                path
            }
        }
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static {
                path, content_type, ..
            } => f
                .debug_struct("Static")
                .field("path", path)
                .field("content_type", content_type)
                .finish_non_exhaustive(),
            Self::Dynamic { path, .. } => f
                .debug_struct("Dynamic")
                .field("path", path)
                .finish_non_exhaustive(),
            Self::Directory { path, directory } => f
                .debug_struct("Directory")
                .field("path", path)
                .field("directory", directory)
                .finish(),
        }
    }
}

/// Mount every artifact on `router`.
///
/// Artifacts with a malformed path, a reserved path or a path already
/// claimed by an earlier artifact are skipped with a warning.
pub fn register_artifacts(mut router: Router, artifacts: &[Artifact]) -> Router {
    let mut claimed: Vec<String> = Vec::new();
    for artifact in artifacts {
        let path = artifact.path();
        let nested = matches!(artifact, Artifact::Directory { .. });
        if let Err(reason) = check_path(path, nested) {
            tracing::warn!(path, reason, "skipping artifact: malformed path");
            continue;
        }
        let shape = route_shape(path);
        if RESERVED_PATHS.contains(&path) || claimed.contains(&shape) {
            tracing::warn!(path, "skipping artifact: path already in use");
            continue;
        }
        claimed.push(shape);

        router = match artifact.clone() {
            Artifact::Static {
                path,
                content_type,
                content,
            } => router.route(
                &path,
                get(move || {
                    let content_type = content_type.clone();
                    let content = content.clone();
                    async move { ([(header::CONTENT_TYPE, content_type)], content).into_response() }
                }),
            ),
            Artifact::Dynamic { path, handler } => router.route(
                &path,
                get(move |req: Request| {
                    let handler = handler.clone();
                    async move { handler(req).await }
                }),
            ),
            Artifact::Directory { path, directory } => {
                if !directory.is_dir() {
                    tracing::warn!(path = %path, directory = %directory.display(), "artifact directory does not exist");
                }
                if path == "/" {
                    router.fallback_service(ServeDir::new(directory))
                } else {
                    router.nest_service(&path, ServeDir::new(directory))
                }
            }
        };
    }
    router
}

/// Reject paths the router would refuse to mount.
///
/// A capture must fill a whole segment (`{id}`), a catch-all (`{*rest}`)
/// may only be the last segment, and nested directories take no catch-all.
fn check_path(path: &str, nested: bool) -> Result<(), &'static str> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err("path must start with '/'");
    };
    let segments: Vec<&str> = rest.split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        if !segment.contains(['{', '}']) {
            continue;
        }
        let inner = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or("unbalanced or partial-segment capture")?;
        let (catch_all, name) = match inner.strip_prefix('*') {
            Some(name) => (true, name),
            None => (false, inner),
        };
        if name.is_empty() || name.contains(['{', '}', '*']) {
            return Err("capture needs a plain name");
        }
        if catch_all && (nested || i + 1 != segments.len()) {
            return Err("catch-all must be the last segment of a route");
        }
    }
    Ok(())
}

/// `path` with capture names erased, so `/a/{x}` and `/a/{y}` collide.
fn route_shape(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment.strip_prefix('{') {
            Some(inner) if inner.starts_with('*') => "{*}",
            Some(_) => "{}",
            None => segment,
        })
        .collect::<Vec<_>>()
        .join("/")
}
