// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了服务器遵循的 HTTP 协议常量和静态查找表：
//! - 状态码及其原因短语（Reason Phrase）。
//! - 扩展名到 MIME 类型的映射表。
//! - HTTP 方法的强类型枚举。
//!
//! 所有表在首次访问时构建一次，之后在各连接间只读共享。

use std::{collections::HashMap, fmt};

use lazy_static::lazy_static;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "webhost/0.1";

/// HTTP 协议规定的换行符
pub const CRLF: &str = "\r\n";

/// 请求头与正文之间的分隔序列
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 默认头部缓冲区上限：32 KiB
pub const DEFAULT_MAX_HEADER_BYTES: usize = 32 * 1024;

/// 默认请求正文上限：8 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// 目录请求时优先返回的首页文件
pub const DIRECTORY_INDEX: &str = "index.html";

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
pub const CONTENT_TYPE_FALLBACK: &str = "application/octet-stream";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        map.insert(200, "OK");
        map.insert(301, "Moved Permanently");
        map.insert(400, "Bad Request");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(413, "Payload Too Large");
        map.insert(431, "Request Header Fields Too Large");
        map.insert(500, "Internal Server Error");
        map
    };
}

lazy_static! {
    /// 文件后缀名（小写、不含点）到 MIME 类型的映射表。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("html", "text/html; charset=utf-8");
        map.insert("htm", "text/html; charset=utf-8");
        map.insert("css", "text/css");
        map.insert("js", "application/javascript");
        map.insert("mjs", "application/javascript");
        map.insert("json", "application/json");
        map.insert("webmanifest", "application/manifest+json");
        map.insert("png", "image/png");
        map.insert("jpg", "image/jpeg");
        map.insert("jpeg", "image/jpeg");
        map.insert("gif", "image/gif");
        map.insert("webp", "image/webp");
        map.insert("svg", "image/svg+xml");
        map.insert("ico", "image/x-icon");
        map.insert("txt", "text/plain; charset=utf-8");
        map.insert("csv", "text/csv; charset=utf-8");
        map.insert("xml", "application/xml");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("ttf", "font/ttf");
        map.insert("otf", "font/otf");
        map.insert("wasm", "application/wasm");
        map.insert("mp4", "video/mp4");
        map.insert("webm", "video/webm");
        map.insert("pdf", "application/pdf");
        map
    };
}

/// 根据扩展名（不区分大小写，不含点）查询 MIME 类型，未知扩展名返回 `application/octet-stream`。
pub fn mime_for_extension(extension: Option<&str>) -> &'static str {
    match extension {
        Some(ext) => MIME_TYPES
            .get(ext.to_ascii_lowercase().as_str())
            .copied()
            .unwrap_or(CONTENT_TYPE_FALLBACK),
        None => CONTENT_TYPE_FALLBACK,
    }
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRequestMethod {
    Get,
    Head,
    Post,
    Delete,
    /// 服务器不处理的其它方法，由路由层回应 405
    Other,
}

impl HttpRequestMethod {
    /// 方法名不区分大小写
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "POST" => HttpRequestMethod::Post,
            "DELETE" => HttpRequestMethod::Delete,
            _ => HttpRequestMethod::Other,
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Post => write!(f, "POST"),
            HttpRequestMethod::Delete => write!(f, "DELETE"),
            HttpRequestMethod::Other => write!(f, "OTHER"),
        }
    }
}
