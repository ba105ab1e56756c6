// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 应用清单模块
//!
//! 每个托管应用目录下可以有一个 `manifest.json`，描述名称、简介、图标与标签。
//! 文件系统是唯一的数据来源：[`HostedApplication`] 每次请求都重新派生，从不缓存。

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt, io,
    path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde_derive::{Deserialize, Serialize};
use tokio::fs;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const DEFAULT_DESCRIPTION: &str = "No description provided.";
pub const DEFAULT_IMAGE: &str = "/assets/icons/favicon-256x256.png";

lazy_static! {
    /// 带协议头的绝对 URL，例如 `https:`、`data:`
    static ref ABSOLUTE_URL: Regex =
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("absolute URL pattern is valid");
}

/// 持久化的应用清单，所有字段可缺省
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct WebAppManifest {
    #[serde(default, alias = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "Image", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, alias = "Tags", skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// 应用了默认值之后的托管应用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedApplication {
    /// 目录名，同时是主键
    pub directory_id: String,
    pub display_name: String,
    pub description: String,
    pub image_url: String,
    /// 大小写不敏感去重，按大小写不敏感升序
    pub tags: Vec<String>,
    pub url: String,
}

#[derive(Debug)]
pub enum ManifestError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::Io(e) => write!(f, "manifest I/O error: {}", e),
            ManifestError::Json(e) => write!(f, "manifest is not valid JSON: {}", e),
        }
    }
}

impl std::error::Error for ManifestError {}

impl From<io::Error> for ManifestError {
    fn from(e: io::Error) -> Self {
        ManifestError::Io(e)
    }
}

impl From<serde_json::Error> for ManifestError {
    fn from(e: serde_json::Error) -> Self {
        ManifestError::Json(e)
    }
}

/// 读取清单；文件不存在不是错误，返回 `None`。
pub async fn read(app_dir: &Path) -> Result<Option<WebAppManifest>, ManifestError> {
    let bytes = match fs::read(app_dir.join(MANIFEST_FILE_NAME)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// 写入清单：先写同目录下的临时文件，再重命名覆盖，读者不会看到写了一半的文件。
pub async fn save(app_dir: &Path, manifest: &WebAppManifest) -> Result<(), ManifestError> {
    let bytes = serde_json::to_vec_pretty(manifest)?;
    let target = app_dir.join(MANIFEST_FILE_NAME);
    let temp = app_dir.join(format!(
        ".{}.{:016x}.tmp",
        MANIFEST_FILE_NAME,
        rand::random::<u64>()
    ));

    fs::write(&temp, &bytes).await?;
    if let Err(e) = fs::rename(&temp, &target).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    debug!("已写入{}", target.display());
    Ok(())
}

/// 载入应用并套用默认值，同时返回是否存在可用的清单。
pub async fn load(app_dir: &Path, directory_id: &str) -> (HostedApplication, bool) {
    let manifest = match read(app_dir).await {
        Ok(m) => m,
        Err(e) => {
            warn!("无法载入应用'{}'的清单：{}", directory_id, e);
            None
        }
    };
    let has_manifest = manifest.is_some();
    let manifest = manifest.unwrap_or_default();

    let display_name = non_blank(manifest.name.as_deref())
        .unwrap_or(directory_id)
        .to_string();
    let description = non_blank(manifest.description.as_deref())
        .unwrap_or(DEFAULT_DESCRIPTION)
        .to_string();

    let app = HostedApplication {
        directory_id: directory_id.to_string(),
        display_name,
        description,
        image_url: resolve_image_url(directory_id, manifest.image.as_deref()),
        tags: normalize_tags(manifest.tags.unwrap_or_default()),
        url: format!("/{}/", urlencoding::encode(directory_id)),
    };
    (app, has_manifest)
}

/// 以 `_` 或 `.` 开头的目录属于系统目录（例如上传暂存目录），不是托管应用。
pub fn is_system_directory(name: &str) -> bool {
    name.starts_with('_') || name.starts_with('.')
}

/// 列出内容根目录下的全部托管应用，按显示名排序。
pub async fn discover(root: &Path, case_insensitive: bool) -> io::Result<Vec<HostedApplication>> {
    let mut apps = Vec::new();
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(apps),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.trim().is_empty() || is_system_directory(&name) {
            continue;
        }
        let path: PathBuf = entry.path();
        if !fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            continue;
        }
        apps.push(load(&path, &name).await.0);
    }

    apps.sort_by(|a, b| {
        let by_name = if case_insensitive {
            a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase())
        } else {
            a.display_name.cmp(&b.display_name)
        };
        by_name.then_with(|| a.directory_id.cmp(&b.directory_id))
    });
    Ok(apps)
}

/// 去除空白标签并修剪，大小写不敏感去重（保留第一次出现的写法），大小写不敏感升序。
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut unique: BTreeMap<String, String> = BTreeMap::new();
    for tag in tags {
        let trimmed = tag.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        unique
            .entry(trimmed.to_lowercase())
            .or_insert_with(|| trimmed.to_string());
    }
    let mut tags: Vec<String> = unique.into_values().collect();
    tags.sort_by(|a, b| match a.to_lowercase().cmp(&b.to_lowercase()) {
        Ordering::Equal => a.cmp(b),
        other => other,
    });
    tags
}

/// 计算图标 URL：
/// - 绝对 URL 原样返回；
/// - 以 `/` 开头的路径原样使用（反斜杠换成斜杠）；
/// - 其它值视为应用目录内的相对路径，逐段编码并加上 `/<应用目录>/` 前缀。
pub fn resolve_image_url(directory_id: &str, image: Option<&str>) -> String {
    let Some(trimmed) = non_blank(image) else {
        return DEFAULT_IMAGE.to_string();
    };

    if ABSOLUTE_URL.is_match(trimmed) {
        return trimmed.to_string();
    }
    if trimmed.starts_with('/') {
        return trimmed.replace('\\', "/");
    }

    let segments: Vec<String> = trimmed
        .split(|c: char| c == '/' || c == '\\')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect();
    format!(
        "/{}/{}",
        urlencoding::encode(directory_id),
        segments.join("/")
    )
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
