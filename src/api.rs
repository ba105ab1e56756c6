// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # JSON API 模块
//!
//! `/api/` 下的全部接口：
//! - `GET|POST /api/apps/{id}/manifest`
//! - `POST /api/uploads/temp`
//! - `DELETE /api/uploads/temp/{id}`
//!
//! 所有错误都以 [`StatusError::json`] 返回，由连接边界渲染为 `{"error": ...}`。

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info, warn};
use serde_derive::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    exception::{RouteError, StatusError},
    manifest::{self, WebAppManifest},
    param::HttpRequestMethod,
    request::Request,
    resolver::path_segments,
    response::Response,
    upload::{UploadError, UploadStore},
};

/// `POST /api/apps/{id}/manifest` 的请求体
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManifestUpdateRequest {
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(default, alias = "Description")]
    pub description: Option<String>,
    #[serde(default, alias = "Tags")]
    pub tags: Option<Vec<String>>,
    #[serde(default, alias = "Image")]
    pub image: Option<ManifestImagePayload>,
    #[serde(default, alias = "RemoveImage")]
    pub remove_image: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManifestImagePayload {
    #[serde(default, alias = "TempId")]
    pub temp_id: Option<String>,
    #[serde(default, alias = "FileName")]
    pub file_name: Option<String>,
    #[serde(default, alias = "ContentBase64")]
    pub content_base64: Option<String>,
}

/// `POST /api/uploads/temp` 的请求体
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryUploadRequest {
    #[serde(default, alias = "FileName")]
    pub file_name: Option<String>,
    #[serde(default, alias = "ContentBase64")]
    pub content_base64: Option<String>,
    #[serde(default, alias = "AppId")]
    pub app_id: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub tags: Vec<String>,
    pub has_manifest: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryUploadResponse {
    pub temp_id: String,
    pub file_name: String,
    pub size_bytes: u64,
}

#[derive(Serialize, Debug)]
struct DeleteResponse {
    deleted: bool,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse<'a> {
    pub error: &'a str,
}

/// API 处理器，持有内容根目录与上传暂存区
#[derive(Debug, Clone)]
pub struct Api {
    root: PathBuf,
    uploads: UploadStore,
}

impl Api {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            uploads: UploadStore::new(root.clone()),
            root,
        }
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    /// 按路径段分派 API 请求
    pub async fn handle(&self, request: &Request) -> Result<Response, RouteError> {
        let method = request.method_kind();
        match method {
            HttpRequestMethod::Get | HttpRequestMethod::Post | HttpRequestMethod::Delete => {}
            HttpRequestMethod::Head => {
                return Err(
                    StatusError::json(405, "HEAD is not supported for API endpoints.").into(),
                )
            }
            HttpRequestMethod::Other => {
                return Err(StatusError::json(
                    405,
                    "Only GET, POST and DELETE are supported for API endpoints.",
                )
                .into())
            }
        }

        let segments: Vec<&str> = request.path().split('/').filter(|s| !s.is_empty()).collect();
        let is = |index: usize, name: &str| {
            segments
                .get(index)
                .map_or(false, |s| s.eq_ignore_ascii_case(name))
        };

        if segments.len() == 4 && is(1, "apps") && is(3, "manifest") {
            let app_id = decode_segment(segments[2])?;
            ensure_valid_app_id(&app_id)?;
            return match method {
                HttpRequestMethod::Get => self.manifest_get(&app_id).await,
                HttpRequestMethod::Post => self.manifest_post(&app_id, request.body()).await,
                _ => Err(StatusError::json(
                    405,
                    "Only GET and POST are allowed for manifest endpoints.",
                )
                .into()),
            };
        }
        if is(1, "uploads") && is(2, "temp") {
            if segments.len() == 3 && method == HttpRequestMethod::Post {
                return self.upload_post(request.body()).await;
            }
            if segments.len() == 4 && method == HttpRequestMethod::Delete {
                let identifier = decode_segment(segments[3])?;
                return self.upload_delete(&identifier).await;
            }
        }

        Err(StatusError::json(404, "API endpoint not found.").into())
    }

    pub async fn manifest_get(&self, app_id: &str) -> Result<Response, RouteError> {
        let app_directory = self.app_directory(app_id).await?;
        let response = self.manifest_response(&app_directory, app_id).await;
        Ok(Response::from_json(200, &response)?)
    }

    /// 合并更新并保存清单，回应与 GET 相同的结构
    pub async fn manifest_post(&self, app_id: &str, body: &[u8]) -> Result<Response, RouteError> {
        if body.is_empty() {
            return Err(StatusError::json(400, "Request body is required.").into());
        }
        let update: Option<ManifestUpdateRequest> = serde_json::from_slice(body)
            .map_err(|e| StatusError::json(400, format!("Invalid JSON payload: {}", e)))?;
        let Some(update) = update else {
            return Err(StatusError::json(400, "Payload is empty.").into());
        };

        let app_directory = self.app_directory(app_id).await?;
        let current = match manifest::read(&app_directory).await {
            Ok(current) => current,
            Err(e) => {
                warn!("应用'{}'现有的清单无法读取，将被覆盖：{}", app_id, e);
                None
            }
        };

        let mut image = current.and_then(|m| m.image);
        if update.remove_image {
            self.delete_app_image(app_id, &app_directory, image.as_deref())
                .await;
            image = None;
        } else if let Some(payload) = &update.image {
            if let Some(new_image) = self.process_image_update(app_id, payload).await? {
                image = Some(new_image);
            }
        }

        let updated = WebAppManifest {
            name: non_blank(update.name),
            description: non_blank(update.description),
            image,
            tags: Some(manifest::normalize_tags(update.tags.unwrap_or_default())),
        };
        manifest::save(&app_directory, &updated)
            .await
            .map_err(|e| match e {
                manifest::ManifestError::Io(e) => RouteError::Io(e),
                manifest::ManifestError::Json(e) => RouteError::Io(e.into()),
            })?;
        info!("已更新应用'{}'的清单", app_id);

        let response = self.manifest_response(&app_directory, app_id).await;
        Ok(Response::from_json(200, &response)?)
    }

    pub async fn upload_post(&self, body: &[u8]) -> Result<Response, RouteError> {
        if body.is_empty() {
            return Err(StatusError::json(400, "Request body is required.").into());
        }
        let request: Option<TemporaryUploadRequest> = serde_json::from_slice(body)
            .map_err(|e| StatusError::json(400, format!("Invalid JSON payload: {}", e)))?;

        let request = request.unwrap_or_default();
        let (Some(file_name), Some(content)) = (
            non_blank(request.file_name),
            non_blank(request.content_base64),
        ) else {
            return Err(StatusError::json(400, "File name and content are required.").into());
        };

        let data = decode_base64(&content)?;
        let staged = self
            .uploads
            .stage(&file_name, &data, request.app_id.as_deref())
            .await
            .map_err(upload_error)?;

        Ok(Response::from_json(
            200,
            &TemporaryUploadResponse {
                temp_id: staged.identifier,
                file_name: staged.original_file_name,
                size_bytes: staged.size_bytes,
            },
        )?)
    }

    pub async fn upload_delete(&self, identifier: &str) -> Result<Response, RouteError> {
        if identifier.trim().is_empty() {
            return Err(StatusError::json(400, "Upload identifier is required.").into());
        }
        let deleted = self.uploads.delete(identifier).await;
        debug!("删除暂存上传{}：{}", identifier, deleted);
        Ok(Response::from_json(200, &DeleteResponse { deleted })?)
    }

    /// 应用目录必须存在，系统目录视为不存在
    async fn app_directory(&self, app_id: &str) -> Result<PathBuf, StatusError> {
        let not_found = || StatusError::json(404, "Application directory was not found.");
        if manifest::is_system_directory(app_id) {
            return Err(not_found());
        }
        let directory = self.root.join(app_id);
        match fs::metadata(&directory).await {
            Ok(metadata) if metadata.is_dir() => Ok(directory),
            _ => Err(not_found()),
        }
    }

    async fn manifest_response(&self, app_directory: &Path, app_id: &str) -> ManifestResponse {
        let (app, has_manifest) = manifest::load(app_directory, app_id).await;
        ManifestResponse {
            id: app_id.to_string(),
            name: app.display_name,
            description: app.description,
            image: app.image_url,
            tags: app.tags,
            has_manifest,
        }
    }

    /// 处理图片更新；两个来源都为空时返回 `None`，保留原有图片
    async fn process_image_update(
        &self,
        app_id: &str,
        payload: &ManifestImagePayload,
    ) -> Result<Option<String>, RouteError> {
        let file_name = payload.file_name.as_deref().filter(|n| !n.trim().is_empty());

        if let Some(temp_id) = payload.temp_id.as_deref().filter(|t| !t.trim().is_empty()) {
            let url = self
                .uploads
                .promote(app_id, temp_id, file_name)
                .await
                .map_err(upload_error)?;
            return Ok(Some(url));
        }

        if let Some(content) = payload
            .content_base64
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        {
            let data = decode_base64(content)?;
            let file_name = file_name.unwrap_or("image");
            let staged = self
                .uploads
                .stage(file_name, &data, Some(app_id))
                .await
                .map_err(upload_error)?;
            let url = self
                .uploads
                .promote(app_id, &staged.identifier, Some(file_name))
                .await
                .map_err(upload_error)?;
            return Ok(Some(url));
        }

        Ok(None)
    }

    /// 只删除位于应用自身目录内的旧图片；失败只记录日志。
    async fn delete_app_image(&self, app_id: &str, app_directory: &Path, image: Option<&str>) {
        let Some(image) = image.filter(|i| !i.trim().is_empty()) else {
            return;
        };
        let prefix = format!("/{}/", urlencoding::encode(app_id));
        let matches_prefix = image
            .get(..prefix.len())
            .map_or(false, |p| p.eq_ignore_ascii_case(&prefix));
        if !matches_prefix {
            debug!("图片{}不在应用'{}'目录内，跳过删除", image, app_id);
            return;
        }

        let Ok(relative) = urlencoding::decode(&image[prefix.len()..]) else {
            return;
        };
        let Some(segments) = path_segments(&relative) else {
            return;
        };
        if segments.is_empty() {
            return;
        }
        let mut target = app_directory.to_path_buf();
        for segment in segments {
            target.push(segment);
        }

        let (Ok(canonical), Ok(app_canonical)) = (
            fs::canonicalize(&target).await,
            fs::canonicalize(app_directory).await,
        ) else {
            return;
        };
        let is_file = fs::metadata(&canonical)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !canonical.starts_with(&app_canonical) || !is_file {
            return;
        }
        match fs::remove_file(&canonical).await {
            Ok(()) => debug!("已删除旧图片{}", canonical.display()),
            Err(e) => warn!("删除旧图片'{}'失败：{}", canonical.display(), e),
        }
    }
}

fn ensure_valid_app_id(app_id: &str) -> Result<(), StatusError> {
    if app_id.trim().is_empty()
        || app_id.contains("../")
        || app_id.contains("..\\")
        || app_id.contains('/')
        || app_id.contains('\\')
        || app_id == ".."
    {
        return Err(StatusError::json(400, "Invalid application identifier."));
    }
    Ok(())
}

fn decode_segment(segment: &str) -> Result<String, StatusError> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|_| StatusError::json(400, "Unable to decode request path."))
}

/// 解码时忽略空白字符
fn decode_base64(content: &str) -> Result<Vec<u8>, StatusError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|_| StatusError::json(400, "Image payload is not valid Base64 content."))
}

fn upload_error(e: UploadError) -> RouteError {
    match e {
        UploadError::NotFound => StatusError::json(404, e.to_string()).into(),
        UploadError::TooLarge | UploadError::UnsupportedType(_) => {
            StatusError::json(400, e.to_string()).into()
        }
        UploadError::Io(e) => RouteError::Io(e),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
