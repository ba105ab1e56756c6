// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod api;
pub mod config;
pub mod exception;
pub mod manifest;
pub mod param;
pub mod request;
pub mod resolver;
pub mod response;
pub mod router;
pub mod server;
pub mod upload;
pub mod util;

pub use api::Api;
pub use config::Config;
pub use exception::{Exception, RouteError, StatusError};
pub use manifest::{HostedApplication, WebAppManifest};
pub use param::HttpRequestMethod;
pub use request::{Request, RequestLimits};
pub use resolver::{PathResolver, Resolution};
pub use response::Response;
pub use router::Router;
pub use server::ConnectionSupervisor;
pub use upload::{TemporaryUpload, UploadStore};
pub use util::HtmlBuilder;
