//! CGI bridge to `git http-backend`.
//!
//! Clone, fetch and push traffic is served entirely by git.  We translate the
//! HTTP request into CGI environment variables, stream the body into the
//! child's stdin, parse the CGI response header block from its stdout and
//! stream the rest back to the client.

use std::sync::Arc;

use anyhow::{bail, Context as _};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error, instrument, warn};

use super::handler::ApiError;
use crate::git;
use crate::AppState;

/// Fallback handler for every non-API path.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn handle_git(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();

    let mut cmd = git::http_backend_command(state.store.git_binary(), state.store.root());
    cmd.envs(cgi_env(&parts));

    let mut child = cmd.spawn().context("failed to spawn git http-backend")?;

    // Feed the request body concurrently so a child that starts answering
    // before it has read all input cannot deadlock against us.
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            let stream = body.into_data_stream().map_err(std::io::Error::other);
            let mut reader = StreamReader::new(stream);
            if let Err(e) = tokio::io::copy(&mut reader, &mut stdin).await {
                debug!(error = %e, "stopped feeding git http-backend stdin");
            }
            // Dropping stdin signals EOF.
        });
    }

    let stdout = child
        .stdout
        .take()
        .context("failed to capture git http-backend stdout")?;
    let mut reader = BufReader::new(stdout);

    let head = read_cgi_head(&mut reader).await?;
    debug!(status = %head.status, "git http-backend responded");

    // Reap the child in the background so we don't leak processes.
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if !status.success() => {
                warn!(%status, "git http-backend exited with non-zero status");
            }
            Err(e) => {
                error!(error = %e, "failed to wait on git http-backend");
            }
            _ => {}
        }
    });

    let mut response = Body::from_stream(ReaderStream::new(reader)).into_response();
    *response.status_mut() = head.status;
    response.headers_mut().extend(head.headers);
    Ok(response)
}

// ---------------------------------------------------------------------------
// Request → CGI environment
// ---------------------------------------------------------------------------

/// CGI/1.1 meta-variables for `parts`.
///
/// Request headers are passed as `HTTP_*` (git reads `HTTP_GIT_PROTOCOL` and
/// `HTTP_CONTENT_ENCODING`), except the body headers which have their own
/// variables and `Authorization`, which CGI never forwards.
fn cgi_env(parts: &Parts) -> Vec<(String, String)> {
    let mut env = vec![
        ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
        ("SERVER_PROTOCOL".to_string(), format!("{:?}", parts.version)),
        (
            "SERVER_SOFTWARE".to_string(),
            concat!("gitto/", env!("CARGO_PKG_VERSION")).to_string(),
        ),
        ("REQUEST_METHOD".to_string(), parts.method.to_string()),
        ("SCRIPT_NAME".to_string(), String::new()),
        ("PATH_INFO".to_string(), parts.uri.path().to_string()),
        (
            "QUERY_STRING".to_string(),
            parts.uri.query().unwrap_or_default().to_string(),
        ),
    ];

    for (name, value) in &parts.headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let var = if *name == header::AUTHORIZATION {
            continue;
        } else if *name == header::CONTENT_TYPE {
            "CONTENT_TYPE".to_string()
        } else if *name == header::CONTENT_LENGTH {
            "CONTENT_LENGTH".to_string()
        } else {
            format!("HTTP_{}", name.as_str().to_ascii_uppercase().replace('-', "_"))
        };
        env.push((var, value.to_string()));
    }

    env
}

// ---------------------------------------------------------------------------
// CGI response head
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CgiHead {
    status: StatusCode,
    headers: HeaderMap,
}

impl Default for CgiHead {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }
}

impl CgiHead {
    /// Apply one header line (without its line terminator).
    fn push_line(&mut self, line: &str) -> anyhow::Result<()> {
        let (name, value) = line
            .split_once(':')
            .with_context(|| format!("malformed CGI header line: {line:?}"))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("status") {
            let code = value
                .split_whitespace()
                .next()
                .and_then(|c| c.parse::<u16>().ok())
                .and_then(|c| StatusCode::from_u16(c).ok())
                .with_context(|| format!("malformed CGI status: {value:?}"))?;
            self.status = code;
            return Ok(());
        }

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid CGI header name: {name:?}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid CGI header value for {name}"))?;
        self.headers.append(name, value);
        Ok(())
    }
}

/// Read header lines up to the blank separator line.
async fn read_cgi_head<R>(reader: &mut R) -> anyhow::Result<CgiHead>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = CgiHead::default();
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .context("failed to read git http-backend output")?;
        if n == 0 {
            bail!("git http-backend exited before sending a response");
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(head);
        }
        head.push_line(trimmed)?;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::body::to_bytes;
    use axum::Router;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::git::git_available;
    use crate::http::handler::create_router;
    use crate::repo::hook::HookCommand;
    use crate::repo::RepoStore;

    fn env_of(req: axum::http::Request<()>) -> Vec<(String, String)> {
        let (parts, ()) = req.into_parts();
        cgi_env(&parts)
    }

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn env_carries_request_line() {
        let env = env_of(
            axum::http::Request::get("/abc/demo.git/info/refs?service=git-upload-pack")
                .body(())
                .unwrap(),
        );
        assert_eq!(lookup(&env, "REQUEST_METHOD"), Some("GET"));
        assert_eq!(lookup(&env, "PATH_INFO"), Some("/abc/demo.git/info/refs"));
        assert_eq!(lookup(&env, "QUERY_STRING"), Some("service=git-upload-pack"));
        assert_eq!(lookup(&env, "GATEWAY_INTERFACE"), Some("CGI/1.1"));
    }

    #[test]
    fn env_maps_headers() {
        let env = env_of(
            axum::http::Request::post("/abc/demo.git/git-receive-pack")
                .header("content-type", "application/x-git-receive-pack-request")
                .header("content-length", "42")
                .header("git-protocol", "version=2")
                .header("content-encoding", "gzip")
                .header("authorization", "Bearer secret")
                .body(())
                .unwrap(),
        );
        assert_eq!(
            lookup(&env, "CONTENT_TYPE"),
            Some("application/x-git-receive-pack-request")
        );
        assert_eq!(lookup(&env, "CONTENT_LENGTH"), Some("42"));
        assert_eq!(lookup(&env, "HTTP_GIT_PROTOCOL"), Some("version=2"));
        assert_eq!(lookup(&env, "HTTP_CONTENT_ENCODING"), Some("gzip"));
        assert!(env.iter().all(|(_, v)| v != "Bearer secret"));
    }

    #[test]
    fn head_parses_status_and_headers() {
        let mut head = CgiHead::default();
        head.push_line("Status: 404 Not Found").unwrap();
        head.push_line("Content-Type: text/plain").unwrap();
        head.push_line("Expires: Fri, 01 Jan 1980 00:00:00 GMT").unwrap();
        assert_eq!(head.status, StatusCode::NOT_FOUND);
        assert_eq!(head.headers["content-type"], "text/plain");
        assert_eq!(head.headers["expires"], "Fri, 01 Jan 1980 00:00:00 GMT");
    }

    #[test]
    fn head_rejects_garbage() {
        let mut head = CgiHead::default();
        assert!(head.push_line("no colon here").is_err());
        assert!(head.push_line("Status: abc").is_err());
    }

    #[tokio::test]
    async fn read_head_stops_at_blank_line() {
        let raw: &[u8] = b"Content-Type: text/plain\r\n\r\nbody bytes";
        let mut reader = BufReader::new(raw);
        let head = read_cgi_head(&mut reader).await.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.headers["content-type"], "text/plain");

        let mut rest = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, "body bytes");
    }

    #[tokio::test]
    async fn read_head_fails_on_truncated_output() {
        let raw: &[u8] = b"Content-Type: text/plain\r\n";
        assert!(read_cgi_head(&mut BufReader::new(raw)).await.is_err());
    }

    fn router(root: &std::path::Path) -> (Router, RepoStore) {
        let config = Config {
            root: root.to_path_buf(),
            ..Config::default()
        };
        let store = RepoStore::new(
            &config,
            HookCommand {
                exe: PathBuf::from("/usr/local/bin/gitto"),
                config: None,
            },
        );
        let app = create_router(Arc::new(AppState {
            store: store.clone(),
            api_token: Arc::from("t"),
        }));
        (app, store)
    }

    #[tokio::test]
    async fn serves_ref_advertisement() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let (app, store) = router(tmp.path());
        let repo = store.create("demo").await.unwrap();

        let uri = format!(
            "/{}/demo.git/info/refs?service=git-upload-pack",
            repo.id
        );
        let resp = app
            .oneshot(axum::http::Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/x-git-upload-pack-advertisement"
        );
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(b"001e# service=git-upload-pack\n"));
    }

    #[tokio::test]
    async fn unknown_repository_is_not_found() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let (app, _) = router(tmp.path());

        let resp = app
            .oneshot(
                axum::http::Request::get("/nope/none.git/info/refs?service=git-upload-pack")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
