//! Remote catalog backend access.
//!
//! [`CatalogApi`] is the seam every stateful component talks through; the
//! HTTP implementation lives in [`http`].

use crate::model::{ModelRecord, PageQuery, QueryPredicate, VersionDetailRecord, VersionRecord};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod http;
#[cfg(test)]
pub(crate) mod stub;

pub use http::HttpCatalogApi;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{url} returned {status}")]
    Status { status: StatusCode, url: String },
    #[error("{url} reported a conflict")]
    Conflict { url: String },
}

impl ApiError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    Download,
    Delete,
}

impl DispatchAction {
    pub const fn identifier(self) -> &'static str {
        match self {
            DispatchAction::Download => "download",
            DispatchAction::Delete => "delete",
        }
    }
}

/// Body of `POST /remote/dispatch`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DispatchRequest {
    pub action: DispatchAction,
    pub url: Option<String>,
    pub filename: String,
    pub subdirectory: String,
    pub model_version_id: u64,
    pub client_id: String,
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_models(&self, query: &PageQuery) -> ApiResult<Vec<ModelRecord>>;

    async fn count_models(&self, predicate: &QueryPredicate) -> ApiResult<u64>;

    async fn list_base_models(&self) -> ApiResult<Vec<String>>;

    async fn version_detail(&self, version_id: u64) -> ApiResult<VersionDetailRecord>;

    async fn update_version(&self, version: &VersionRecord) -> ApiResult<()>;

    async fn update_model(&self, model: &ModelRecord) -> ApiResult<()>;

    async fn delete_version(&self, version_id: u64, delete_files: bool) -> ApiResult<()>;

    /// Re-pulls the named sections (`metadata`, `description`, `images` or
    /// `all`, comma separated) of a version from its upstream source.
    async fn refresh_version(&self, version_id: u64, fields: &str) -> ApiResult<()>;

    /// Triggers a server-side sync; with `download` the call settles only
    /// once the file transfer has finished.
    async fn sync_version(
        &self,
        version_id: u64,
        model_id: Option<u64>,
        download: bool,
    ) -> ApiResult<()>;

    /// Global download progress in percent, if the server reported a number.
    async fn download_progress(&self) -> ApiResult<Option<f64>>;

    async fn cancel_download(&self) -> ApiResult<()>;

    async fn dispatch(&self, request: &DispatchRequest) -> ApiResult<()>;
}
