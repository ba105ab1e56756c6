// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 上传暂存模块
//!
//! 图片上传先写入 `<root>/_uploads/<identifier><ext>`，之后再"提升"到某个应用目录，
//! 或被显式删除。暂存目录没有跨重启的持久性保证，每次启动时整体清空。
//!
//! 同一标识符上的并发提升/删除不加锁；标识符由 SHA-256 派生，不同上传之间不会碰撞。

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use tokio::fs;

/// 暂存目录名，以 `_` 开头因此不会被当作托管应用
pub const UPLOADS_DIRECTORY: &str = "_uploads";

/// 单个图片的大小上限：5 MiB
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg"];

#[derive(Debug)]
pub enum UploadError {
    TooLarge,
    /// 扩展名不在允许列表中，附带小写扩展名（可能为空）
    UnsupportedType(String),
    NotFound,
    Io(io::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::TooLarge => write!(
                f,
                "Images larger than {} MB are not permitted.",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            ),
            UploadError::UnsupportedType(ext) => write!(f, "Unsupported image type '{}'.", ext),
            UploadError::NotFound => write!(f, "Temporary upload was not found."),
            UploadError::Io(e) => write!(f, "Upload storage error: {}", e),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(e: io::Error) -> Self {
        UploadError::Io(e)
    }
}

/// 一个暂存中的上传
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryUpload {
    pub identifier: String,
    /// 标识符加扩展名
    pub stored_file_name: String,
    /// 清理后的原始文件名
    pub original_file_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn directory(&self) -> PathBuf {
        self.root.join(UPLOADS_DIRECTORY)
    }

    /// 校验并写入一个暂存文件。校验失败时不会留下任何文件。
    pub async fn stage(
        &self,
        file_name: &str,
        content: &[u8],
        owner_app_id: Option<&str>,
    ) -> Result<TemporaryUpload, UploadError> {
        if content.len() > MAX_UPLOAD_BYTES {
            return Err(UploadError::TooLarge);
        }

        let sanitized = sanitize_file_name(file_name);
        let extension = allowed_extension(&sanitized)?;

        let directory = self.directory();
        fs::create_dir_all(&directory).await?;

        let identifier = generate_identifier(&sanitized, owner_app_id);
        let stored_file_name = format!("{}{}", identifier, extension);
        let full_path = directory.join(&stored_file_name);
        if let Err(e) = fs::write(&full_path, content).await {
            let _ = fs::remove_file(&full_path).await;
            return Err(e.into());
        }
        debug!("暂存上传{}（{}字节）", stored_file_name, content.len());

        Ok(TemporaryUpload {
            identifier,
            stored_file_name,
            original_file_name: sanitized,
            size_bytes: content.len() as u64,
        })
    }

    /// 把暂存文件提升到 `<root>/<app_dir_id>/<文件名>`，覆盖同名文件，并返回其 URL 路径。
    ///
    /// 未提供文件名时使用 `image` 加暂存文件的扩展名。
    pub async fn promote(
        &self,
        app_dir_id: &str,
        identifier: &str,
        desired_file_name: Option<&str>,
    ) -> Result<String, UploadError> {
        let staged = self
            .find_staged(identifier)
            .await?
            .ok_or(UploadError::NotFound)?;

        let desired = match desired_file_name {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => format!("image{}", extension_of(&file_name_of(&staged))),
        };
        let sanitized = sanitize_file_name(&desired);
        allowed_extension(&sanitized)?;

        let app_directory = self.root.join(app_dir_id);
        fs::create_dir_all(&app_directory).await?;
        let destination = app_directory.join(&sanitized);

        // 暂存目录位于内容根目录之下，通常可以原子重命名
        if let Err(e) = fs::rename(&staged, &destination).await {
            debug!("重命名{}失败（{}），改为复制后删除", staged.display(), e);
            fs::copy(&staged, &destination).await?;
            fs::remove_file(&staged).await?;
        }
        debug!("上传{}已提升为{}", identifier, destination.display());

        Ok(format!(
            "/{}/{}",
            urlencoding::encode(app_dir_id),
            urlencoding::encode(&sanitized)
        ))
    }

    /// 删除暂存文件，返回是否确实删除了文件。任何文件系统错误都只记录日志并返回 `false`。
    pub async fn delete(&self, identifier: &str) -> bool {
        let staged = match self.find_staged(identifier).await {
            Ok(Some(path)) => path,
            Ok(None) => return false,
            Err(e) => {
                warn!("查找暂存上传{}失败：{}", identifier, e);
                return false;
            }
        };
        match fs::remove_file(&staged).await {
            Ok(()) => true,
            Err(e) => {
                warn!("删除暂存上传{}失败：{}", identifier, e);
                false
            }
        }
    }

    /// 清空并重建暂存目录，只在启动时调用。
    pub async fn purge_all(&self) -> io::Result<()> {
        let directory = self.directory();
        match fs::remove_dir_all(&directory).await {
            Ok(()) => debug!("已清空暂存目录{}", directory.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("无法清空暂存目录{}：{}", directory.display(), e),
        }
        fs::create_dir_all(&directory).await
    }

    async fn find_staged(&self, identifier: &str) -> io::Result<Option<PathBuf>> {
        let mut entries = match fs::read_dir(self.directory()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let prefix = format!("{}.", identifier);
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) && entry.file_type().await?.is_file() {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }
}

/// 去掉路径部分，把文件系统不允许的字符替换为 `_`。结果为空时返回 `image`。
pub fn sanitize_file_name(file_name: &str) -> String {
    let candidate = file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or("");
    if candidate.trim().is_empty() {
        return "image".to_string();
    }
    candidate
        .chars()
        .map(|c| if is_invalid_file_name_char(c) { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_invalid_file_name_char(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control()
}

/// 小写扩展名（含点），没有扩展名时为空串
fn extension_of(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) => file_name[idx..].to_ascii_lowercase(),
        None => String::new(),
    }
}

fn allowed_extension(file_name: &str) -> Result<String, UploadError> {
    let extension = extension_of(file_name);
    if ALLOWED_IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(UploadError::UnsupportedType(extension))
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn generate_identifier(sanitized_file_name: &str, owner_app_id: Option<&str>) -> String {
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
    let nonce: u128 = rand::random();
    let mut hasher = Sha256::new();
    hasher.update(owner_app_id.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(sanitized_file_name.as_bytes());
    hasher.update(b"|");
    hasher.update(stamp.as_bytes());
    hasher.update(b"|");
    hasher.update(nonce.to_be_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    fn store() -> (tempfile::TempDir, UploadStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path());
        (dir, store)
    }

    fn staged_count(store: &UploadStore) -> usize {
        match stdfs::read_dir(store.directory()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("icon.png"), "icon.png");
        assert_eq!(sanitize_file_name("../../etc/evil.png"), "evil.png");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\pic.jpg"), "pic.jpg");
        assert_eq!(sanitize_file_name("we|ird*na?me.gif"), "we_ird_na_me.gif");
        assert_eq!(sanitize_file_name("dir/"), "image");
        assert_eq!(sanitize_file_name("   "), "image");
    }

    #[test]
    fn test_extension_rules() {
        assert_eq!(allowed_extension("icon.PNG").unwrap(), ".png");
        assert!(matches!(
            allowed_extension("tool.exe"),
            Err(UploadError::UnsupportedType(ext)) if ext == ".exe"
        ));
        assert!(matches!(
            allowed_extension("image"),
            Err(UploadError::UnsupportedType(ext)) if ext.is_empty()
        ));
    }

    #[test]
    fn test_identifiers_are_unique() {
        let a = generate_identifier("icon.png", Some("demo"));
        let b = generate_identifier("icon.png", Some("demo"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_stage_writes_file() {
        let (_dir, store) = store();
        let upload = store.stage("icon.PNG", &[7u8; 100], Some("demo")).await.unwrap();

        assert_eq!(upload.size_bytes, 100);
        assert_eq!(upload.original_file_name, "icon.PNG");
        assert_eq!(upload.stored_file_name, format!("{}.png", upload.identifier));
        let written = stdfs::read(store.directory().join(&upload.stored_file_name)).unwrap();
        assert_eq!(written.len(), 100);
    }

    #[tokio::test]
    async fn test_stage_rejects_disallowed_type_without_leftovers() {
        let (_dir, store) = store();
        let result = store.stage("tool.exe", b"MZ", None).await;
        assert!(matches!(result, Err(UploadError::UnsupportedType(_))));
        assert_eq!(staged_count(&store), 0);
    }

    #[tokio::test]
    async fn test_stage_rejects_oversized() {
        let (_dir, store) = store();
        let content = vec![0u8; MAX_UPLOAD_BYTES + 1];
        let result = store.stage("big.png", &content, None).await;
        assert!(matches!(result, Err(UploadError::TooLarge)));
        assert_eq!(staged_count(&store), 0);
    }

    #[tokio::test]
    async fn test_promote_consumes_staged_file() {
        let (dir, store) = store();
        let upload = store.stage("icon.png", b"png-bytes", Some("demo")).await.unwrap();

        let url = store
            .promote("my app", &upload.identifier, Some("logo.png"))
            .await
            .unwrap();
        assert_eq!(url, "/my%20app/logo.png");
        assert_eq!(stdfs::read(dir.path().join("my app/logo.png")).unwrap(), b"png-bytes");
        assert_eq!(staged_count(&store), 0);

        let again = store.promote("my app", &upload.identifier, Some("logo.png")).await;
        assert!(matches!(again, Err(UploadError::NotFound)));
    }

    #[tokio::test]
    async fn test_promote_default_name_uses_staged_extension() {
        let (dir, store) = store();
        let upload = store.stage("photo.JPEG", b"jpeg", None).await.unwrap();
        let url = store.promote("demo", &upload.identifier, None).await.unwrap();

        assert_eq!(url, "/demo/image.jpeg");
        assert!(dir.path().join("demo/image.jpeg").is_file());
    }

    #[tokio::test]
    async fn test_promote_overwrites_existing_file() {
        let (dir, store) = store();
        stdfs::create_dir_all(dir.path().join("demo")).unwrap();
        stdfs::write(dir.path().join("demo/icon.png"), b"old").unwrap();

        let upload = store.stage("icon.png", b"new", None).await.unwrap();
        store.promote("demo", &upload.identifier, Some("icon.png")).await.unwrap();
        assert_eq!(stdfs::read(dir.path().join("demo/icon.png")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_promote_rejects_bad_target_name_and_keeps_staged() {
        let (_dir, store) = store();
        let upload = store.stage("icon.png", b"x", None).await.unwrap();
        let result = store.promote("demo", &upload.identifier, Some("run.sh")).await;

        assert!(matches!(result, Err(UploadError::UnsupportedType(_))));
        assert_eq!(staged_count(&store), 1);
    }

    #[tokio::test]
    async fn test_promote_sanitizes_traversal_in_target_name() {
        let (dir, store) = store();
        let upload = store.stage("icon.png", b"x", None).await.unwrap();
        let url = store
            .promote("demo", &upload.identifier, Some("../../outside.png"))
            .await
            .unwrap();

        assert_eq!(url, "/demo/outside.png");
        assert!(dir.path().join("demo/outside.png").is_file());
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let (_dir, store) = store();
        let upload = store.stage("icon.png", b"x", None).await.unwrap();

        assert!(store.delete(&upload.identifier).await);
        assert!(!store.delete(&upload.identifier).await);
    }

    #[tokio::test]
    async fn test_delete_without_uploads_directory() {
        let (_dir, store) = store();
        assert!(!store.delete("0123abcd").await);
    }

    #[tokio::test]
    async fn test_purge_all_recreates_empty_directory() {
        let (_dir, store) = store();
        store.stage("a.png", b"a", None).await.unwrap();
        store.stage("b.gif", b"b", None).await.unwrap();
        stdfs::create_dir_all(store.directory().join("nested")).unwrap();

        store.purge_all().await.unwrap();
        assert!(store.directory().is_dir());
        assert_eq!(staged_count(&store), 0);
    }
}
