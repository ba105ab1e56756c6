// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了请求处理生命周期中可能出现的各类错误。
//!
//! ## 分层
//! - [`Exception`]：从字节流读取、解析请求时的协议级错误，每个变体对应固定的状态码。
//! - [`StatusError`]：任何组件都可以产生的"带状态码的结果"，只在连接边界被解释，
//!   由 `prefer_json` 决定渲染 JSON 还是 HTML 状态页。
//! - [`RouteError`]：路由层的返回错误，区分可以回应客户端的状态错误和只能记录日志的 I/O 故障。

use std::{fmt, io};

/// 读取 HTTP 请求时发生的异常。
#[derive(Debug)]
pub enum Exception {
    /// 在找到 `\r\n\r\n` 之前，头部缓冲区已超过上限。对应 `431`。
    HeaderTooLarge,
    /// 请求行不足三个字段（METHOD TARGET VERSION）。对应 `400`。
    MalformedRequestLine,
    /// 已收到部分头部，但连接在头部结束前被关闭。对应 `400`。
    UnexpectedEof,
    /// `Content-Length` 不是数字或为负数。对应 `400`。
    InvalidContentLength,
    /// `Content-Length` 超过正文上限。对应 `413`。
    PayloadTooLarge,
    /// 正文未读满 `Content-Length` 字节，连接就已关闭。对应 `400`。
    TruncatedBody,
    /// 底层 Socket 读取失败，此时不再尝试回应。
    Io(io::Error),
}

use Exception::*;

impl Exception {
    /// 该异常应当回应的 HTTP 状态码；`Io` 不回应，返回 `None`。
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HeaderTooLarge => Some(431),
            MalformedRequestLine | UnexpectedEof | InvalidContentLength | TruncatedBody => {
                Some(400)
            }
            PayloadTooLarge => Some(413),
            Io(_) => None,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderTooLarge => write!(f, "Headers exceed allowed size."),
            MalformedRequestLine => write!(f, "Malformed request line."),
            UnexpectedEof => write!(f, "Unexpected end of stream."),
            InvalidContentLength => write!(f, "Invalid Content-Length header."),
            PayloadTooLarge => write!(f, "Request body exceeds configured limit."),
            TruncatedBody => write!(f, "Unexpected end of request body."),
            Io(e) => write!(f, "I/O error while reading request: {}", e),
        }
    }
}

impl std::error::Error for Exception {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Io(e)
    }
}

/// 带状态码的处理结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    code: u16,
    message: String,
    prefer_json: bool,
}

impl StatusError {
    /// 以 HTML 状态页回应的错误
    pub fn page(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            prefer_json: false,
        }
    }

    /// 以 `{"error": ...}` 回应的 API 错误
    pub fn json(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            prefer_json: true,
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn prefer_json(&self) -> bool {
        self.prefer_json
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

impl std::error::Error for StatusError {}

/// 路由处理失败的原因。
#[derive(Debug)]
pub enum RouteError {
    /// 可以回应给客户端的错误
    Status(StatusError),
    /// 未分类的内部 I/O 故障：记录日志后直接关闭连接
    Io(io::Error),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::Status(e) => write!(f, "{}", e),
            RouteError::Io(e) => write!(f, "internal I/O error: {}", e),
        }
    }
}

impl std::error::Error for RouteError {}

impl From<StatusError> for RouteError {
    fn from(e: StatusError) -> Self {
        RouteError::Status(e)
    }
}

impl From<io::Error> for RouteError {
    fn from(e: io::Error) -> Self {
        RouteError::Io(e)
    }
}
