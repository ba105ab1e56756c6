// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求读取模块
//!
//! 直接在原始字节流上读取并解析一个 HTTP 请求：
//! 1. 持续读取直到遇到 `\r\n\r\n`，头部缓冲区受上限约束。
//! 2. 解析请求行（方法、目标、版本）与 `Name: Value` 形式的标头。
//! 3. 按 `Content-Length` 读取定长正文（含与头部同批到达的字节）。
//!
//! 连接在发送任何字节之前就被关闭属于正常的空闲关闭，返回 `Ok(None)`。

use std::collections::HashMap;

use bytes::Bytes;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{exception::Exception, param::*};

const READ_CHUNK: usize = 4096;

/// 请求读取的尺寸上限。
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// 表示一个完整的 HTTP 请求。构造后不可变。
#[derive(Debug, Clone)]
pub struct Request {
    /// 原始方法名
    method: String,
    /// 请求目标（包含查询字符串）
    raw_target: String,
    /// 去掉查询字符串后的路径，空路径记为 `/`
    path: String,
    version: String,
    /// 标头名统一转为小写，重复标头后者覆盖前者
    headers: HashMap<String, String>,
    body: Bytes,
}

impl Request {
    /// 从字节流读取一个请求。
    ///
    /// # 错误处理
    /// 头部过大、请求行格式错误、`Content-Length` 非法或过大、正文被截断时返回相应的 `Exception`。
    pub async fn read_from<R>(stream: &mut R, limits: &RequestLimits) -> Result<Option<Self>, Exception>
    where
        R: AsyncRead + Unpin,
    {
        let mut header_buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = vec![0u8; READ_CHUNK];

        // 1. 读取头部，直到找到终止序列
        let header_end = loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                if header_buffer.is_empty() {
                    return Ok(None);
                }
                return Err(Exception::UnexpectedEof);
            }

            // 终止序列可能跨越两次读取，回退 3 个字节再搜索
            let search_from = header_buffer.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
            header_buffer.extend_from_slice(&chunk[..n]);

            if let Some(pos) = find_terminator(&header_buffer[search_from..]) {
                break search_from + pos;
            }
            if header_buffer.len() > limits.max_header_bytes {
                return Err(Exception::HeaderTooLarge);
            }
        };

        // 最后一次读取可能同时越过上限并带来终止序列
        let head_len = header_end + HEADER_TERMINATOR.len();
        if head_len > limits.max_header_bytes {
            return Err(Exception::HeaderTooLarge);
        }
        let head_text = String::from_utf8_lossy(&header_buffer[..header_end]).into_owned();
        let mut request = Self::parse_head(&head_text)?;

        // 2. 校验正文长度
        let content_length = match request.header("content-length") {
            Some(value) if !value.is_empty() => parse_content_length(value, limits)?,
            _ => 0,
        };

        // 3. 读取正文：先使用已经缓冲的字节，再从流中补齐
        let mut body = header_buffer.split_off(head_len);
        body.truncate(content_length);
        while body.len() < content_length {
            let wanted = (content_length - body.len()).min(READ_CHUNK);
            let n = stream.read(&mut chunk[..wanted]).await?;
            if n == 0 {
                return Err(Exception::TruncatedBody);
            }
            body.extend_from_slice(&chunk[..n]);
        }
        debug!(
            "请求读取完毕：{} {}，正文{}字节",
            request.method, request.raw_target, content_length
        );

        request.body = Bytes::from(body);
        Ok(Some(request))
    }

    /// 解析请求行与标头（不含终止空行与正文）。
    fn parse_head(head_text: &str) -> Result<Self, Exception> {
        let mut lines = head_text.split(CRLF);

        let request_line = lines.next().unwrap_or("");
        let parts: Vec<&str> = request_line.split(' ').filter(|p| !p.is_empty()).collect();
        if parts.len() < 3 {
            return Err(Exception::MalformedRequestLine);
        }

        let method = parts[0].to_string();
        let raw_target = parts[1].to_string();
        let version = parts[2].to_string();
        let path = match raw_target.split_once('?') {
            Some((before, _)) => before,
            None => raw_target.as_str(),
        };
        let path = if path.is_empty() { "/" } else { path }.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
        }

        Ok(Self {
            method,
            raw_target,
            path,
            version,
            headers,
            body: Bytes::new(),
        })
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn parse_content_length(value: &str, limits: &RequestLimits) -> Result<usize, Exception> {
    let length: i64 = value
        .parse()
        .map_err(|_| Exception::InvalidContentLength)?;
    if length < 0 {
        return Err(Exception::InvalidContentLength);
    }
    let length = usize::try_from(length).map_err(|_| Exception::PayloadTooLarge)?;
    if length > limits.max_body_bytes {
        return Err(Exception::PayloadTooLarge);
    }
    Ok(length)
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取原始方法名
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 获取方法枚举（不区分大小写）
    pub fn method_kind(&self) -> HttpRequestMethod {
        HttpRequestMethod::parse(&self.method)
    }

    pub fn raw_target(&self) -> &str {
        &self.raw_target
    }

    /// 获取不含查询字符串的路径
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// 按名称查询标头，名称不区分大小写
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("-")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn read(raw: &[u8]) -> Result<Option<Request>, Exception> {
        let mut stream = raw;
        Request::read_from(&mut stream, &RequestLimits::default()).await
    }

    /// 验证常规 GET 请求的解析，包括 Path 和 Headers
    #[tokio::test]
    async fn test_parse_get_request() {
        let raw = b"GET /demo/index.html HTTP/1.1\r\nHost: localhost:5000\r\nUser-Agent: Test-Browser\r\n\r\n";
        let request = read(raw).await.unwrap().unwrap();

        assert_eq!(request.method_kind(), HttpRequestMethod::Get);
        assert_eq!(request.path(), "/demo/index.html");
        assert_eq!(request.version(), "HTTP/1.1");
        assert_eq!(request.user_agent(), "Test-Browser");
        assert!(request.body().is_empty());
    }

    #[tokio::test]
    async fn test_idle_close_is_not_an_error() {
        assert!(read(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_header_then_close() {
        let result = read(b"GET / HTTP/1.1\r\nHost: x").await;
        assert!(matches!(result, Err(Exception::UnexpectedEof)));
    }

    /// 确保查询字符串不进入 path，但保留在原始目标中
    #[tokio::test]
    async fn test_path_with_query_string() {
        let raw = b"GET /page?id=123&name=test HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let request = read(raw).await.unwrap().unwrap();

        assert_eq!(request.path(), "/page");
        assert_eq!(request.raw_target(), "/page?id=123&name=test");
    }

    #[tokio::test]
    async fn test_empty_path_defaults_to_root() {
        let raw = b"GET ?x=1 HTTP/1.1\r\n\r\n";
        let request = read(raw).await.unwrap().unwrap();
        assert_eq!(request.path(), "/");
    }

    #[tokio::test]
    async fn test_malformed_request_line() {
        let result = read(b"GET /\r\nHost: localhost\r\n\r\n").await;
        assert!(matches!(result, Err(Exception::MalformedRequestLine)));
    }

    /// 验证 Header 字段名大小写不敏感，重复标头后者覆盖
    #[tokio::test]
    async fn test_case_insensitive_headers() {
        let raw = b"GET / HTTP/1.1\r\nx-token: first\r\nX-Token: second\r\nno colon line\r\n\r\n";
        let request = read(raw).await.unwrap().unwrap();

        assert_eq!(request.header("X-TOKEN"), Some("second"));
        assert_eq!(request.headers().len(), 1);
    }

    #[tokio::test]
    async fn test_header_value_keeps_later_colons() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost:5000\r\n\r\n";
        let request = read(raw).await.unwrap().unwrap();
        assert_eq!(request.header("host"), Some("localhost:5000"));
    }

    /// 验证 POST 请求正文，且只保留 Content-Length 个字节
    #[tokio::test]
    async fn test_parse_post_body() {
        let raw = b"POST /api/uploads/temp HTTP/1.1\r\nContent-Length: 10\r\n\r\ntest=valueEXTRA";
        let request = read(raw).await.unwrap().unwrap();

        assert_eq!(request.method_kind(), HttpRequestMethod::Post);
        assert_eq!(&request.body()[..], b"test=value");
    }

    #[tokio::test]
    async fn test_body_arriving_in_later_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            client
                .write_all(b"POST /x HTTP/1.1\r\nContent-Length: 300\r\n\r\n")
                .await
                .unwrap();
            for _ in 0..3 {
                client.write_all(&[b'a'; 100]).await.unwrap();
            }
            client
        });

        let request = Request::read_from(&mut server, &RequestLimits::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.body().len(), 300);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 20\r\n\r\nshort";
        assert!(matches!(read(raw).await, Err(Exception::TruncatedBody)));
    }

    #[tokio::test]
    async fn test_invalid_content_length() {
        for value in ["abc", "-5", "1.5"] {
            let raw = format!("POST /x HTTP/1.1\r\nContent-Length: {}\r\n\r\n", value);
            let result = read(raw.as_bytes()).await;
            assert!(
                matches!(result, Err(Exception::InvalidContentLength)),
                "value {}",
                value
            );
        }
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let raw = format!(
            "POST /x HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            DEFAULT_MAX_BODY_BYTES + 1
        );
        assert!(matches!(read(raw.as_bytes()).await, Err(Exception::PayloadTooLarge)));
    }

    #[tokio::test]
    async fn test_header_too_large() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        while raw.len() <= DEFAULT_MAX_HEADER_BYTES + READ_CHUNK {
            raw.extend_from_slice(b"X-Filler: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        assert!(matches!(read(&raw).await, Err(Exception::HeaderTooLarge)));
    }

    /// 终止序列与越界字节落在同一次读取中，仍然超限
    #[tokio::test]
    async fn test_header_too_large_with_terminator_in_last_read() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Padding: ".to_vec();
        let padding = DEFAULT_MAX_HEADER_BYTES + 3000 - raw.len() - 4;
        raw.extend(std::iter::repeat(b'a').take(padding));
        raw.extend_from_slice(b"\r\n\r\n");
        assert_eq!(raw.len(), DEFAULT_MAX_HEADER_BYTES + 3000);
        assert!(matches!(read(&raw).await, Err(Exception::HeaderTooLarge)));

        // 恰好等于上限的头部仍可接受
        let mut raw = b"GET / HTTP/1.1\r\nX-Padding: ".to_vec();
        let padding = DEFAULT_MAX_HEADER_BYTES - raw.len() - 4;
        raw.extend(std::iter::repeat(b'a').take(padding));
        raw.extend_from_slice(b"\r\n\r\n");
        assert!(read(&raw).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminator_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            client.write_all(b"GET /split HTTP/1.1\r\nHost: a\r\n\r").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"\n").await.unwrap();
            client
        });

        let request = Request::read_from(&mut server, &RequestLimits::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.path(), "/split");
        writer.await.unwrap();
    }

    /// 未知方法在解析阶段不报错，交由路由层回应 405
    #[tokio::test]
    async fn test_unknown_method_is_parsed() {
        let raw = b"PUT /resource HTTP/1.1\r\n\r\n";
        let request = read(raw).await.unwrap().unwrap();
        assert_eq!(request.method(), "PUT");
        assert_eq!(request.method_kind(), HttpRequestMethod::Other);
    }
}
