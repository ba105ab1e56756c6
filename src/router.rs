// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由模块
//!
//! 每个连接的入口：读取一个请求，在静态站点与 JSON API 之间分派，写出唯一的响应后关闭。
//!
//! ## 静态站点规则
//! 1. 原始路径包含 `..` -> 400
//! 2. `/api/` 前缀（不区分大小写）-> [`Api`]
//! 3. 只接受 `GET` / `HEAD`，其余方法 405
//! 4. `/` 与 `/index.html` -> 托管应用首页
//! 5. 其余路径解码后交给 [`PathResolver`]

use std::{sync::Arc, time::Instant};

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    api::{Api, ErrorResponse},
    config::Config,
    exception::{RouteError, StatusError},
    manifest,
    param::{HttpRequestMethod, CONTENT_TYPE_HTML},
    request::{Request, RequestLimits},
    resolver::{PathResolver, Resolution},
    response::Response,
    util::HtmlBuilder,
};

pub struct Router {
    resolver: PathResolver,
    api: Api,
    limits: RequestLimits,
    chunk_size: usize,
    listen_url: String,
}

impl Router {
    /// 内容根目录必须已存在
    pub async fn new(config: Arc<Config>, listen_port: u16) -> std::io::Result<Self> {
        let resolver = PathResolver::new(&config.www_root_path()).await?;
        let api = Api::new(resolver.root());
        Ok(Self {
            resolver,
            api,
            limits: RequestLimits {
                max_header_bytes: config.max_header_bytes(),
                max_body_bytes: config.max_body_bytes(),
            },
            chunk_size: config.chunk_size(),
            listen_url: format!("http://localhost:{}/", listen_port),
        })
    }

    /// 处理一个连接上的唯一请求
    pub async fn handle<S>(&self, stream: &mut S, id: u128)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // 1. 读取请求
        let request = match Request::read_from(stream, &self.limits).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("[ID{}]客户端未发送任何数据即关闭了连接", id);
                return;
            }
            Err(e) => {
                let Some(code) = e.status_code() else {
                    error!("[ID{}]读取HTTP请求时遇到错误：{}", id, e);
                    return;
                };
                warn!("[ID{}]HTTP请求不合法：{}，返回{}", id, e, code);
                let response = Response::from_html(
                    code,
                    HtmlBuilder::from_status_code(code, &e.to_string()).build(),
                );
                if let Err(e) = response.write_to(stream, false, self.chunk_size).await {
                    error!("[ID{}]发送错误响应失败：{}", id, e);
                }
                let _ = stream.shutdown().await;
                return;
            }
        };
        debug!("[ID{}]成功解析HTTP请求", id);
        let start_time = Instant::now();

        // 2. 路由与响应构建
        let is_api = is_api_path(request.path());
        let headonly = !is_api && request.method_kind() == HttpRequestMethod::Head;
        let response = match self.dispatch(&request, is_api).await {
            Ok(response) => response,
            Err(RouteError::Status(e)) => {
                debug!("[ID{}]请求{}被拒绝：{}", id, request.path(), e);
                match render_status(&e) {
                    Ok(response) => response,
                    Err(e) => {
                        error!("[ID{}]无法构建错误响应：{}", id, e);
                        return;
                    }
                }
            }
            Err(RouteError::Io(e)) => {
                error!("[ID{}]处理请求时发生内部错误：{}", id, e);
                return;
            }
        };
        debug!(
            "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
            id,
            start_time.elapsed().as_millis()
        );

        info!(
            "[ID{}] {} {} {} {} {}",
            id,
            request.method(),
            request.raw_target(),
            response.status_code(),
            response.information(),
            request.user_agent(),
        );

        // 3. 发送
        match response.write_to(stream, headonly, self.chunk_size).await {
            Ok(sent) => debug!("[ID{}]响应发送完毕，正文{}字节", id, sent),
            Err(e) => error!("[ID{}]发送响应时遇到错误：{}", id, e),
        }
        let _ = stream.shutdown().await;
    }

    pub async fn dispatch(&self, request: &Request, is_api: bool) -> Result<Response, RouteError> {
        if request.path().contains("..") {
            return Err(StatusError::page(400, "Invalid path.").into());
        }
        if is_api {
            return self.api.handle(request).await;
        }

        match request.method_kind() {
            HttpRequestMethod::Get | HttpRequestMethod::Head => {}
            _ => return Err(StatusError::page(405, "Only GET and HEAD are supported.").into()),
        }

        let path = request.path();
        if path == "/" || path.eq_ignore_ascii_case("/index.html") {
            return self.home().await;
        }

        let decoded = urlencoding::decode(path)
            .map_err(|_| StatusError::page(400, "Unable to decode request path."))?;
        self.serve_static(path, &decoded).await
    }

    async fn home(&self) -> Result<Response, RouteError> {
        let apps =
            manifest::discover(self.resolver.root(), self.resolver.case_insensitive()).await?;
        debug!("首页共列出{}个应用", apps.len());
        Ok(Response::from_html(
            200,
            HtmlBuilder::from_home(&self.listen_url, &apps).build(),
        ))
    }

    /// `raw_path` 是未解码的请求路径，重定向时原样保留其编码
    async fn serve_static(&self, raw_path: &str, decoded: &str) -> Result<Response, RouteError> {
        let resolution = self.resolver.resolve(decoded).await?;
        match resolution {
            Resolution::Rejected => Err(StatusError::page(400, "Invalid path.").into()),
            Resolution::Forbidden => Err(StatusError::page(403, "Access denied.").into()),
            Resolution::NotFound => Err(not_found().into()),
            Resolution::AddTrailingSlash => {
                let location = format!("{}/", raw_path);
                let html = HtmlBuilder::from_redirect(&location).build();
                Ok(Response::redirect(&location, html))
            }
            Resolution::File { path, content_type } => open_file(&path, content_type).await,
            Resolution::IndexFile(path) => open_file(&path, CONTENT_TYPE_HTML).await,
            Resolution::Listing {
                parent_url,
                directories,
                files,
            } => Ok(Response::from_html(
                200,
                HtmlBuilder::from_dir(decoded, parent_url.as_deref(), &directories, &files)
                    .build(),
            )),
        }
    }
}

pub fn is_api_path(path: &str) -> bool {
    path.get(..5)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("/api/"))
}

fn not_found() -> StatusError {
    StatusError::page(404, "The requested resource was not found.")
}

/// 解析与打开之间文件可能已被删除，此时按 404 处理
async fn open_file(path: &std::path::Path, content_type: &str) -> Result<Response, RouteError> {
    match Response::from_file(path, content_type).await {
        Ok(response) => Ok(response),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found().into()),
        Err(e) => Err(e.into()),
    }
}

fn render_status(e: &StatusError) -> std::io::Result<Response> {
    if e.prefer_json() {
        Response::from_json(e.code(), &ErrorResponse { error: e.message() })
    } else {
        Ok(Response::from_html(
            e.code(),
            HtmlBuilder::from_status_code(e.code(), e.message()).build(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    async fn router() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        stdfs::create_dir_all(dir.path().join("demo/sub")).unwrap();
        stdfs::write(dir.path().join("demo/index.html"), "<p>demo</p>").unwrap();
        stdfs::write(dir.path().join("demo/sub/a.txt"), "hello").unwrap();

        let mut config = Config::new();
        config.set_www_root(dir.path().to_string_lossy().into_owned());
        let router = Router::new(Arc::new(config), 5000).await.unwrap();
        (dir, router)
    }

    async fn roundtrip(router: &Router, raw: &str) -> String {
        use tokio::io::AsyncReadExt;
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        client.write_all(raw.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        router.handle(&mut server, 0).await;
        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_is_api_path() {
        assert!(is_api_path("/api/apps"));
        assert!(is_api_path("/API/uploads/temp"));
        assert!(!is_api_path("/api"));
        assert!(!is_api_path("/apix/"));
        assert!(!is_api_path("/é"));
    }

    #[tokio::test]
    async fn test_static_routes() {
        let (_dir, router) = router().await;

        let text = roundtrip(&router, "GET /demo/sub/a.txt HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.ends_with("hello"));

        let text = roundtrip(&router, "GET /demo HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 301"));
        assert!(text.contains("Location: /demo/\r\n"));

        let text = roundtrip(&router, "GET /demo/ HTTP/1.1\r\n\r\n").await;
        assert!(text.ends_with("<p>demo</p>"));

        let text = roundtrip(&router, "GET /demo/sub/ HTTP/1.1\r\n\r\n").await;
        assert!(text.contains("a.txt"));

        let text = roundtrip(&router, "GET /nothing HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 404"));

        let text = roundtrip(&router, "GET /../../etc/passwd HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 400"));

        let text = roundtrip(&router, "GET /%FF HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 400"));

        let text = roundtrip(&router, "POST /demo/ HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 405"));
    }

    #[tokio::test]
    async fn test_home_page() {
        let (_dir, router) = router().await;
        let text = roundtrip(&router, "GET /INDEX.HTML HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains(r#"data-id="demo""#));
        assert!(text.contains("http://localhost:5000/"));
    }

    #[tokio::test]
    async fn test_head_error_page_has_no_body() {
        let (_dir, router) = router().await;
        let text = roundtrip(&router, "HEAD /nothing HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 404"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_api_errors_are_json() {
        let (_dir, router) = router().await;

        let text = roundtrip(&router, "GET /api/nothing HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 404"));
        assert!(text.contains("application/json"));
        assert!(text.contains(r#""error": "API endpoint not found.""#));

        let text = roundtrip(&router, "HEAD /api/apps/demo/manifest HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 405"));
        assert!(text.contains("HEAD is not supported"));

        let text = roundtrip(&router, "DELETE /api/apps/demo/manifest HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 405"));

        let text = roundtrip(&router, "GET /api/apps/demo%2Fx/manifest HTTP/1.1\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_malformed_request_gets_status_page() {
        let (_dir, router) = router().await;
        let text = roundtrip(&router, "GARBAGE\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 400"));
        assert!(text.contains("Malformed request line."));

        let text = roundtrip(&router, "").await;
        assert!(text.is_empty());
    }
}
