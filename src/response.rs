// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应构建模块
//!
//! 所有响应（成功或失败）都经由同一个 [`Response::write_to`] 输出，保证头部格式一致：
//! 状态行、`Date`、`Server`、`Content-Length`、`Content-Type`、`Connection: close`，
//! 仅在重定向时附加 `Location`。文件正文分块直接写入 Socket，不整体读入内存。

use std::path::Path;

use bytes::Bytes;
use chrono::prelude::*;
use log::{debug, error};
use serde::Serialize;
use tokio::{
    fs::File,
    io::{self, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

use crate::param::*;

/// 响应正文
#[derive(Debug)]
pub enum Body {
    Empty,
    Bytes(Bytes),
    /// 打开时即确定长度的文件
    File(File),
}

#[derive(Debug)]
pub struct Response {
    status_code: u16,
    information: String,
    content_type: String,
    content_length: u64,
    date: DateTime<Utc>,
    server_name: String,
    location: Option<String>,
    body: Body,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status_code: 200,
            information: "OK".to_string(),
            content_type: CONTENT_TYPE_HTML.to_string(),
            content_length: 0,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            location: None,
            body: Body::Empty,
        }
    }

    /// 以给定状态码与内存中的字节构建响应
    pub fn from_bytes(code: u16, content_type: &str, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        let mut response = Self::new();
        response.set_code(code);
        response.content_type = content_type.to_string();
        response.content_length = content.len() as u64;
        response.body = Body::Bytes(content);
        response
    }

    pub fn from_html(code: u16, html: String) -> Self {
        Self::from_bytes(code, CONTENT_TYPE_HTML, html)
    }

    /// 序列化为带缩进的 JSON 响应
    pub fn from_json<T: Serialize>(code: u16, payload: &T) -> io::Result<Self> {
        let bytes = serde_json::to_vec_pretty(payload)?;
        Ok(Self::from_bytes(code, CONTENT_TYPE_JSON, bytes))
    }

    /// 301 重定向，正文为跳转提示页
    pub fn redirect(location: &str, html: String) -> Self {
        let mut response = Self::from_html(301, html);
        response.location = Some(location.to_string());
        response
    }

    /// 打开文件并以打开时的文件大小作为 `Content-Length`
    pub async fn from_file(path: &Path, content_type: &str) -> io::Result<Self> {
        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        debug!("打开文件{}，大小{}字节", path.display(), file_size);

        let mut response = Self::new();
        response.content_type = content_type.to_string();
        response.content_length = file_size;
        response.body = Body::File(file);
        Ok(response)
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&reason) => reason.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown".to_string()
            }
        };
        self
    }

    /// 生成状态行与全部头部，以空行结尾
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut header = [
            "HTTP/1.1 ",
            &self.status_code.to_string(),
            " ",
            &self.information,
            CRLF,
            "Date: ",
            &format_date(&self.date),
            CRLF,
            "Server: ",
            &self.server_name,
            CRLF,
            "Content-Length: ",
            &self.content_length.to_string(),
            CRLF,
            "Content-Type: ",
            &self.content_type,
            CRLF,
            "Connection: close",
            CRLF,
        ]
        .concat();
        if let Some(location) = &self.location {
            header.push_str("Location: ");
            header.push_str(location);
            header.push_str(CRLF);
        }
        header.push_str(CRLF);
        header.into_bytes()
    }

    /// 把响应写入流。`headonly` 为真时只发送头部。
    ///
    /// 返回实际发送的正文字节数。
    pub async fn write_to<W>(self, stream: &mut W, headonly: bool, chunk_size: usize) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(&self.header_bytes()).await?;

        let mut total_sent = 0u64;
        if !headonly {
            match self.body {
                Body::Empty => {}
                Body::Bytes(content) => {
                    stream.write_all(&content).await?;
                    total_sent = content.len() as u64;
                }
                Body::File(file) => {
                    // 只发送打开时声明的长度，即使文件在传输期间被追加
                    let mut file = file.take(self.content_length);
                    let mut buffer = vec![0u8; chunk_size.max(1)];
                    loop {
                        let n = file.read(&mut buffer).await?;
                        if n == 0 {
                            break;
                        }
                        stream.write_all(&buffer[..n]).await?;
                        total_sent += n as u64;
                    }
                    if total_sent < self.content_length {
                        debug!(
                            "文件在传输期间变短：声明{}字节，实际发送{}字节",
                            self.content_length, total_sent
                        );
                    }
                }
            }
        }
        stream.flush().await?;
        Ok(total_sent)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

/// RFC 1123 格式，例如 `Sun, 06 Nov 1994 08:49:37 GMT`
fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
