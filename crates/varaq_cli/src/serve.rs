//! Plain development file server over the build directory. GET/HEAD only,
//! one worker per connection is not needed; requests are handled in turn.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tiny_http::{Header, Method, Response, Server, StatusCode};

pub fn run_server(dir: &Path, host: &str, port: u16) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!(
            "`{}` does not exist; run `varaq build` first",
            dir.display()
        );
    }
    let addr = format!("{host}:{port}");
    let server =
        Server::http(&addr).map_err(|err| anyhow::anyhow!("failed to bind to {addr}: {err}"))?;
    log::info!("serving {} on http://{addr}/", dir.display());

    loop {
        let request = match server.recv() {
            Ok(request) => request,
            Err(err) => {
                log::error!("failed to receive request: {err}");
                continue;
            }
        };
        let response = match handle_request(&request, dir) {
            Ok(response) => response,
            Err(err) => {
                log::warn!("request failed: {err:#}");
                Response::from_string("Internal Server Error")
                    .with_status_code(StatusCode(500))
                    .boxed()
            }
        };
        if let Err(err) = request.respond(response) {
            log::warn!("failed to send response: {err}");
        }
    }
}

fn handle_request(
    request: &tiny_http::Request,
    dir: &Path,
) -> Result<Response<Box<dyn Read + Send>>> {
    if request.method() != &Method::Get && request.method() != &Method::Head {
        return Ok(Response::from_string("Method Not Allowed")
            .with_status_code(StatusCode(405))
            .boxed());
    }

    let rel_path = match sanitize_path(request.url()) {
        Some(path) => path,
        None => {
            return Ok(Response::from_string("Not Found")
                .with_status_code(StatusCode(404))
                .boxed());
        }
    };

    let mut full_path = dir.join(&rel_path);
    if full_path.is_dir() {
        full_path = full_path.join("index.html");
    }
    if !full_path.is_file() {
        return Ok(Response::from_string("Not Found")
            .with_status_code(StatusCode(404))
            .boxed());
    }

    let file = File::open(&full_path)
        .with_context(|| format!("failed to open {}", full_path.display()))?;
    if request.method() == &Method::Head {
        return Ok(Response::empty(200)
            .with_header(content_type_header(&full_path))
            .boxed());
    }
    Ok(Response::from_file(file)
        .with_header(content_type_header(&full_path))
        .boxed())
}

fn sanitize_path(url: &str) -> Option<PathBuf> {
    let path = url.split('?').next().unwrap_or(url);
    let decoded = urlencoding::decode(path).ok()?;
    if decoded.contains('\\') {
        return None;
    }
    let trimmed = decoded.trim_start_matches('/');
    let rel_path = Path::new(if trimmed.is_empty() { "." } else { trimmed });

    let mut clean = PathBuf::new();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()).unwrap_or("") {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "xml" => "application/xml; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "woff" => "font/woff",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => "application/octet-stream",
    }
}

fn content_type_header(path: &Path) -> Header {
    Header::from_bytes("Content-Type", content_type_for(path)).expect("valid header")
}

#[cfg(test)]
mod tests {
    use super::{content_type_for, sanitize_path};
    use std::path::{Path, PathBuf};

    #[test]
    fn sanitize_rejects_traversal() {
        assert_eq!(sanitize_path("/../etc/passwd"), None);
        assert_eq!(sanitize_path("/a/../../b"), None);
        assert_eq!(sanitize_path("/a\\b"), None);
    }

    #[test]
    fn sanitize_strips_query_and_decodes() {
        assert_eq!(sanitize_path("/a/b.css?x=1"), Some(PathBuf::from("a/b.css")));
        assert_eq!(sanitize_path("/a%20b.png"), Some(PathBuf::from("a b.png")));
        assert_eq!(sanitize_path("/"), Some(PathBuf::new()));
    }

    #[test]
    fn font_content_types_are_known() {
        assert_eq!(content_type_for(Path::new("x.woff2")), "font/woff2");
        assert_eq!(content_type_for(Path::new("x.ttf")), "font/ttf");
    }
}
