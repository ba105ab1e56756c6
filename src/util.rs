// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use crate::{manifest::HostedApplication, param::STATUS_CODES, resolver::DirectoryEntry};

/// 页面渲染器：只负责把已经决定好的内容拼成 HTML。
pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

const BASE_CSS: &str = r"
            body {
                width: 50em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            ";

impl HtmlBuilder {
    pub fn from_status_code(code: u16, message: &str) -> Self {
        let reason = STATUS_CODES.get(&code).copied().unwrap_or("");
        let title = format!("{} {}", code, reason);
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            <p><a href='/'>返回首页</a></p>
            ",
            escape_html(&title),
            escape_html(message)
        );
        Self {
            title,
            css: BASE_CSS.to_string(),
            body,
        }
    }

    pub fn from_redirect(location: &str) -> Self {
        let location = escape_html(location);
        let body = format!(
            r#"
            <h1>301 Moved Permanently</h1>
            <p>资源已移动到 <a href="{0}">{0}</a>。</p>
            "#,
            location
        );
        Self {
            title: "301 Moved Permanently".to_string(),
            css: BASE_CSS.to_string(),
            body,
        }
    }

    /// 首页：托管应用画廊
    pub fn from_home(listen_url: &str, apps: &[HostedApplication]) -> Self {
        let mut body = String::new();
        body.push_str(&format!(
            r#"<h1>托管的应用</h1><p>正在 <code>{}</code> 上提供服务，共{}个应用。</p><hr>"#,
            escape_html(listen_url),
            apps.len()
        ));

        if apps.is_empty() {
            body.push_str(r#"<p class="empty">内容目录中还没有任何应用。</p>"#);
        } else {
            body.push_str(r#"<div class="gallery">"#);
            for app in apps {
                let data_tags = app
                    .tags
                    .iter()
                    .map(|t| t.to_lowercase())
                    .collect::<Vec<_>>()
                    .join(",");
                body.push_str(&format!(
                    r#"
                    <div class="card" data-id="{}" data-name="{}" data-tags="{}">
                        <a href="{}"><img src="{}" alt=""></a>
                        <h2><a href="{}">{}</a></h2>
                        <p>{}</p>
                        <div class="tags">{}</div>
                    </div>
                    "#,
                    escape_html(&app.directory_id),
                    escape_html(&app.display_name.to_lowercase()),
                    escape_html(&data_tags),
                    escape_html(&app.url),
                    escape_html(&app.image_url),
                    escape_html(&app.url),
                    escape_html(&app.display_name),
                    escape_html(&app.description),
                    build_tags(&app.tags),
                ));
            }
            body.push_str("</div>");
        }

        let css = [
            BASE_CSS,
            r"
            .gallery { display: flex; flex-wrap: wrap; gap: 16px; }
            .card { width: 15em; padding: 8px; border: 1px solid #ddd; }
            .card img { width: 64px; height: 64px; }
            .tag { margin-right: 4px; padding: 2px 6px; background: #eee; }
            ",
        ]
        .concat();
        Self {
            title: "webhost".to_string(),
            css,
            body,
        }
    }

    /// 目录列表：先子目录，后文件
    pub fn from_dir(
        path: &str,
        parent_url: Option<&str>,
        directories: &[DirectoryEntry],
        files: &[DirectoryEntry],
    ) -> Self {
        let mut body = String::new();
        body.push_str(&format!("<h1>{}的文件列表</h1><hr>", escape_html(path)));
        body.push_str("<table>");
        if let Some(parent) = parent_url {
            body.push_str(&format!(
                r#"
                <tr><td><a href="{}">..</a></td><td></td></tr>
                "#,
                escape_html(parent)
            ));
        }
        if directories.is_empty() && files.is_empty() {
            body.push_str("<tr><td>（空目录）</td><td></td></tr>");
        }
        for entry in directories.iter().chain(files) {
            body.push_str(&format!(
                r#"
                <tr>
                    <td><a href="{}">{}</a></td>
                    <td>{}</td>
                </tr>
                "#,
                escape_html(&entry.url),
                escape_html(&entry.name),
                if entry.is_directory { "文件夹" } else { "文件" }
            ));
        }
        body.push_str("</table>");

        let css = [
            BASE_CSS,
            r"
            table {
                border-collapse: collapse;
                width: 100%;
            }

            td {
                padding: 8px;
                white-space: pre-wrap; /* 保留换行符和空格 */
                border: none;
            }",
        ]
        .concat();
        HtmlBuilder {
            title: format!("{}的文件列表", path),
            css,
            body,
        }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            escape_html(&self.title),
            self.css,
            self.body
        )
    }
}

fn build_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        return r#"<span class="tag tag-empty">No Tags</span>"#.to_string();
    }
    tags.iter()
        .map(|t| format!(r#"<span class="tag">{}</span>"#, escape_html(t)))
        .collect()
}

/// 转义 HTML 特殊字符
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
