use super::{ApiError, ApiResult, CatalogApi, DispatchRequest};
use crate::model::{ModelRecord, PageQuery, QueryPredicate, VersionDetailRecord, VersionRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct CountResponse {
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ProgressResponse {
    #[serde(default)]
    progress: Option<f64>,
}

/// REST accessor for the catalog backend rooted at `base_url` (e.g.
/// `http://127.0.0.1:8080/api`). Stateless apart from the connection pool.
#[derive(Clone, Debug)]
pub struct HttpCatalogApi {
    client: Client,
    base_url: String,
}

impl HttpCatalogApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!(
                "CatalogSync/{} ({})",
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_NAME")
            ))
            .tcp_nodelay(true)
            .pool_max_idle_per_host(4)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to construct HTTP client for catalog API")?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> ApiResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(ApiError::Conflict {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogApi {
    async fn list_models(&self, query: &PageQuery) -> ApiResult<Vec<ModelRecord>> {
        let url = self.endpoint("/models");
        debug!("GET {url} page={}", query.page);
        let response = self
            .send(self.client.get(&url).query(&query.list_params()), &url)
            .await?;
        Ok(response.json().await?)
    }

    async fn count_models(&self, predicate: &QueryPredicate) -> ApiResult<u64> {
        let url = self.endpoint("/models/count");
        let response = self
            .send(self.client.get(&url).query(&predicate.filter_params()), &url)
            .await?;
        let body: CountResponse = response.json().await?;
        Ok(body.count)
    }

    async fn list_base_models(&self) -> ApiResult<Vec<String>> {
        let url = self.endpoint("/base-models");
        let response = self.send(self.client.get(&url), &url).await?;
        let body: Value = response.json().await?;
        Ok(match body {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        })
    }

    async fn version_detail(&self, version_id: u64) -> ApiResult<VersionDetailRecord> {
        let url = self.endpoint(&format!("/versions/{version_id}"));
        let response = self.send(self.client.get(&url), &url).await?;
        Ok(response.json().await?)
    }

    async fn update_version(&self, version: &VersionRecord) -> ApiResult<()> {
        let url = self.endpoint(&format!("/versions/{}", version.id));
        self.send(self.client.put(&url).json(version), &url).await?;
        Ok(())
    }

    async fn update_model(&self, model: &ModelRecord) -> ApiResult<()> {
        let url = self.endpoint(&format!("/models/{}", model.id));
        self.send(self.client.put(&url).json(model), &url).await?;
        Ok(())
    }

    async fn delete_version(&self, version_id: u64, delete_files: bool) -> ApiResult<()> {
        let url = self.endpoint(&format!("/versions/{version_id}"));
        let files = if delete_files { "1" } else { "0" };
        self.send(self.client.delete(&url).query(&[("files", files)]), &url)
            .await?;
        Ok(())
    }

    async fn refresh_version(&self, version_id: u64, fields: &str) -> ApiResult<()> {
        let url = self.endpoint(&format!("/versions/{version_id}/refresh"));
        self.send(self.client.post(&url).query(&[("fields", fields)]), &url)
            .await?;
        Ok(())
    }

    async fn sync_version(
        &self,
        version_id: u64,
        model_id: Option<u64>,
        download: bool,
    ) -> ApiResult<()> {
        let url = self.endpoint(&format!("/sync/version/{version_id}"));
        let mut params = Vec::new();
        if let Some(model_id) = model_id {
            params.push(("modelId", model_id.to_string()));
        }
        params.push(("download", if download { "1" } else { "0" }.to_string()));
        self.send(self.client.post(&url).query(&params), &url)
            .await?;
        Ok(())
    }

    async fn download_progress(&self) -> ApiResult<Option<f64>> {
        let url = self.endpoint("/download/progress");
        let response = self.send(self.client.get(&url), &url).await?;
        let body: ProgressResponse = response.json().await?;
        Ok(body.progress)
    }

    async fn cancel_download(&self) -> ApiResult<()> {
        let url = self.endpoint("/download/cancel");
        self.send(self.client.post(&url), &url).await?;
        Ok(())
    }

    async fn dispatch(&self, request: &DispatchRequest) -> ApiResult<()> {
        let url = self.endpoint("/remote/dispatch");
        self.send(self.client.post(&url).json(request), &url).await?;
        Ok(())
    }
}
