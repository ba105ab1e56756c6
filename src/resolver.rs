// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路径解析模块
//!
//! 把已解码的 URL 路径映射到内容根目录下的规范化文件系统路径，并分类为
//! 文件、目录首页、目录列表、禁止访问或不存在。
//!
//! ## 安全规则
//! 1. 含有 `..` 段的路径在访问文件系统之前就被拒绝。
//! 2. 候选路径经规范化（解析符号链接）后必须仍位于规范化的内容根目录内，
//!    在大小写不敏感的文件系统上忽略大小写比较。

use std::{
    cmp::Ordering,
    io,
    path::{Path, PathBuf},
};

use log::debug;
use tokio::fs;

use crate::param::{mime_for_extension, DIRECTORY_INDEX};

/// 目录列表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// 显示名，目录以 `/` 结尾
    pub name: String,
    /// 逐段百分号编码后的链接
    pub url: String,
    pub is_directory: bool,
}

/// 路径解析结果
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    /// 路径含有 `..` 段（400）
    Rejected,
    /// 规范化后逃出了内容根目录（403）
    Forbidden,
    NotFound,
    /// 目录请求缺少结尾的 `/`，调用方应回应 301
    AddTrailingSlash,
    File {
        path: PathBuf,
        content_type: &'static str,
    },
    IndexFile(PathBuf),
    Listing {
        parent_url: Option<String>,
        directories: Vec<DirectoryEntry>,
        files: Vec<DirectoryEntry>,
    },
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    case_insensitive: bool,
}

impl PathResolver {
    /// 规范化内容根目录。根目录必须已存在。
    pub async fn new(root: &Path) -> io::Result<Self> {
        let root = fs::canonicalize(root).await?;
        Ok(Self {
            root,
            case_insensitive: cfg!(windows),
        })
    }

    /// 规范化后的内容根目录
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 文件系统是否大小写不敏感，决定路径比较与名称排序
    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub async fn resolve(&self, decoded_path: &str) -> io::Result<Resolution> {
        let Some(segments) = path_segments(decoded_path) else {
            return Ok(Resolution::Rejected);
        };

        let mut candidate = self.root.clone();
        for segment in &segments {
            candidate.push(segment);
        }

        let canonical = match fs::canonicalize(&candidate).await {
            Ok(p) => p,
            Err(e) => {
                debug!("无法规范化{}：{}", candidate.display(), e);
                return Ok(Resolution::NotFound);
            }
        };
        if !self.contains(&canonical) {
            debug!("{}逃出了内容根目录", canonical.display());
            return Ok(Resolution::Forbidden);
        }

        let metadata = fs::metadata(&canonical).await?;
        if metadata.is_file() {
            // 文件不接受尾部斜杠
            if decoded_path.ends_with('/') {
                return Ok(Resolution::NotFound);
            }
            let content_type = mime_for_extension(candidate.extension().and_then(|e| e.to_str()));
            return Ok(Resolution::File {
                path: canonical,
                content_type,
            });
        }
        if !metadata.is_dir() {
            return Ok(Resolution::NotFound);
        }

        // 尾部斜杠规范化必须先于首页与列表逻辑
        if !decoded_path.ends_with('/') {
            return Ok(Resolution::AddTrailingSlash);
        }

        let index = canonical.join(DIRECTORY_INDEX);
        if let Ok(index_canonical) = fs::canonicalize(&index).await {
            if fs::metadata(&index_canonical).await?.is_file() {
                if !self.contains(&index_canonical) {
                    return Ok(Resolution::Forbidden);
                }
                return Ok(Resolution::IndexFile(index_canonical));
            }
        }

        self.list(&canonical, decoded_path).await
    }

    async fn list(&self, dir: &Path, decoded_path: &str) -> io::Result<Resolution> {
        let mut directories = Vec::new();
        let mut files = Vec::new();

        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.trim().is_empty() {
                continue;
            }
            // 跟随符号链接判断类型，悬空链接直接忽略
            let Ok(metadata) = fs::metadata(entry.path()).await else {
                continue;
            };
            if metadata.is_dir() {
                directories.push(name);
            } else if metadata.is_file() {
                files.push(name);
            }
        }

        directories.sort_by(|a, b| self.compare_names(a, b));
        files.sort_by(|a, b| self.compare_names(a, b));

        let base = encode_path(decoded_path);
        let directories = directories
            .into_iter()
            .map(|name| DirectoryEntry {
                url: format!("{}{}/", base, urlencoding::encode(&name)),
                name: format!("{}/", name),
                is_directory: true,
            })
            .collect();
        let files = files
            .into_iter()
            .map(|name| DirectoryEntry {
                url: format!("{}{}", base, urlencoding::encode(&name)),
                name,
                is_directory: false,
            })
            .collect();

        Ok(Resolution::Listing {
            parent_url: parent_url(decoded_path).map(|p| encode_path(&p)),
            directories,
            files,
        })
    }

    fn contains(&self, canonical: &Path) -> bool {
        if self.case_insensitive {
            let root = self.root.to_string_lossy().to_lowercase();
            let candidate = canonical.to_string_lossy().to_lowercase();
            Path::new(&candidate).starts_with(Path::new(&root))
        } else {
            canonical.starts_with(&self.root)
        }
    }

    fn compare_names(&self, a: &str, b: &str) -> Ordering {
        if self.case_insensitive {
            a.to_lowercase().cmp(&b.to_lowercase())
        } else {
            a.cmp(b)
        }
    }
}

/// 拆分为非空路径段；出现 `..` 段时返回 `None`。
pub fn path_segments(decoded_path: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in decoded_path.split(|c: char| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => segments.push(s),
        }
    }
    Some(segments)
}

/// 对已解码路径逐段做百分号编码，保留分隔斜杠
pub fn encode_path(decoded_path: &str) -> String {
    decoded_path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_url(decoded_path: &str) -> Option<String> {
    if decoded_path == "/" {
        return None;
    }
    let trimmed = decoded_path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) if idx > 0 => Some(format!("{}/", &trimmed[..idx])),
        _ => Some("/".to_string()),
    }
}
