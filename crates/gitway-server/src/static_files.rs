//! Dumb-protocol static file serving.

use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::Response,
};
use std::io::ErrorKind;
use std::path::Path;
use tokio_util::io::ReaderStream;

use crate::api::ApiError;
use crate::cache_headers::{http_date_from_system, ResourceClass};

/// Serves `resource_path` from `repo_dir` with the given content type and
/// cache policy. Missing files and directories are a 404 with no body.
pub async fn serve(
    repo_dir: &Path,
    resource_path: &str,
    content_type: &'static str,
    cache: ResourceClass,
) -> Result<Response, ApiError> {
    let file_path = repo_dir.join(resource_path);

    let metadata = match tokio::fs::metadata(&file_path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(ApiError::ResourceMissing(resource_path.to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::ResourceMissing(resource_path.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let file = tokio::fs::File::open(&file_path).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            ApiError::ResourceMissing(resource_path.to_string())
        } else {
            e.into()
        }
    })?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(modified) = metadata.modified() {
        if let Ok(value) = HeaderValue::from_str(&http_date_from_system(modified)) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
    cache.apply(headers);

    tracing::debug!(
        file = %file_path.display(),
        size = metadata.len(),
        cache = ?cache,
        "Serving static file"
    );

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    async fn serve_err(
        dir: &Path,
        resource_path: &str,
        content_type: &'static str,
        cache: ResourceClass,
    ) -> ApiError {
        match serve(dir, resource_path, content_type, cache).await {
            Ok(_) => panic!("expected {resource_path} to be missing"),
            Err(e) => e,
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_serves_file_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("HEAD"), b"ref: refs/heads/main\n").unwrap();

        let response = serve(dir.path(), "HEAD", "text/plain", ResourceClass::Volatile)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::CONTENT_LENGTH], "21");
        assert!(headers[header::LAST_MODIFIED]
            .to_str()
            .unwrap()
            .ends_with(" GMT"));
        assert_eq!(headers[header::PRAGMA], "no-cache");

        assert_eq!(body_bytes(response).await, b"ref: refs/heads/main\n");
    }

    #[tokio::test]
    async fn test_missing_file_is_404_without_length() {
        let dir = tempfile::tempdir().unwrap();
        let err = serve_err(
            dir.path(),
            "objects/ab/cdef",
            "application/x-git-loose-object",
            ResourceClass::Immutable,
        )
        .await;
        assert!(matches!(err, ApiError::ResourceMissing(_)));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn test_directory_is_not_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("objects/info/packs")).unwrap();

        let err = serve_err(
            dir.path(),
            "objects/info/packs",
            "text/plain; charset=utf-8",
            ResourceClass::Immutable,
        )
        .await;
        assert!(matches!(err, ApiError::ResourceMissing(_)));
    }
}
