use super::{ApiError, ApiResult, CatalogApi, DispatchRequest};
use crate::model::{ModelRecord, PageQuery, QueryPredicate, VersionDetailRecord, VersionRecord};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    List(PageQuery),
    Count(QueryPredicate),
    BaseModels,
    Detail(u64),
    UpdateVersion(u64),
    UpdateModel(u64),
    DeleteVersion(u64, bool),
    Refresh(u64, String),
    Sync(u64, Option<u64>, bool),
    Progress,
    Cancel,
    Dispatch(DispatchRequest),
}

/// Scripted reply for one call: wait `delay`, then succeed or fail.
#[derive(Clone, Debug)]
pub(crate) struct Reply<T> {
    pub(crate) delay: Duration,
    pub(crate) outcome: Option<T>,
}

impl<T> Reply<T> {
    pub(crate) fn ok_after(delay: Duration, value: T) -> Self {
        Self {
            delay,
            outcome: Some(value),
        }
    }

    pub(crate) fn fail_after(delay: Duration) -> Self {
        Self {
            delay,
            outcome: None,
        }
    }
}

/// In-memory backend. Unscripted calls succeed immediately with a value
/// derived from the request so tests can tell which query was applied.
#[derive(Default)]
pub(crate) struct StubCatalogApi {
    calls: Mutex<Vec<Call>>,
    list_replies: Mutex<VecDeque<Reply<Vec<ModelRecord>>>>,
    count_replies: Mutex<VecDeque<Reply<u64>>>,
    detail_replies: Mutex<VecDeque<Reply<Option<String>>>>,
    sync_reply: Mutex<Option<Reply<()>>>,
    pub(crate) default_count: Mutex<u64>,
    pub(crate) fail_base_models: Mutex<bool>,
    pub(crate) fail_cancel: Mutex<bool>,
    pub(crate) fail_dispatch: Mutex<bool>,
    pub(crate) dispatch_delay: Mutex<Duration>,
    pub(crate) conflict_on_version_update: Mutex<bool>,
    pub(crate) progress_value: Mutex<f64>,
}

fn stub_error() -> ApiError {
    ApiError::Status {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        url: "stub".to_string(),
    }
}

async fn play<T>(reply: Option<Reply<T>>, fallback: T) -> ApiResult<T> {
    match reply {
        Some(reply) => {
            tokio::time::sleep(reply.delay).await;
            reply.outcome.ok_or_else(stub_error)
        }
        None => Ok(fallback),
    }
}

pub(crate) fn model_named(id: u64, name: &str) -> ModelRecord {
    serde_json::from_value(json!({
        "ID": id,
        "name": name,
        "type": "LORA",
        "versions": [{ "ID": id * 10, "name": format!("{name} v1") }],
    }))
    .expect("valid stub model")
}

pub(crate) fn version_named(id: u64, name: &str) -> VersionRecord {
    serde_json::from_value(json!({ "ID": id, "name": name })).expect("valid stub version")
}

impl StubCatalogApi {
    pub(crate) fn new() -> Self {
        let stub = Self::default();
        *stub.default_count.lock().unwrap() = 120;
        stub
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn list_calls(&self) -> Vec<PageQuery> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::List(query) => Some(query),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count_calls(&self) -> Vec<QueryPredicate> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Count(predicate) => Some(predicate),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn detail_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Detail(_)))
            .count()
    }

    pub(crate) fn progress_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Progress))
            .count()
    }

    pub(crate) fn dispatches(&self) -> Vec<DispatchRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Dispatch(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn script_list(&self, reply: Reply<Vec<ModelRecord>>) {
        self.list_replies.lock().unwrap().push_back(reply);
    }

    pub(crate) fn script_count(&self, reply: Reply<u64>) {
        self.count_replies.lock().unwrap().push_back(reply);
    }

    pub(crate) fn script_detail(&self, reply: Reply<Option<String>>) {
        self.detail_replies.lock().unwrap().push_back(reply);
    }

    pub(crate) fn script_sync(&self, reply: Reply<()>) {
        *self.sync_reply.lock().unwrap() = Some(reply);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CatalogApi for StubCatalogApi {
    async fn list_models(&self, query: &PageQuery) -> ApiResult<Vec<ModelRecord>> {
        self.record(Call::List(query.clone()));
        let reply = self.list_replies.lock().unwrap().pop_front();
        let name = format!("{}#{}", query.predicate.search, query.page);
        play(reply, vec![model_named(u64::from(query.page), &name)]).await
    }

    async fn count_models(&self, predicate: &QueryPredicate) -> ApiResult<u64> {
        self.record(Call::Count(predicate.clone()));
        let reply = self.count_replies.lock().unwrap().pop_front();
        let fallback = *self.default_count.lock().unwrap();
        play(reply, fallback).await
    }

    async fn list_base_models(&self) -> ApiResult<Vec<String>> {
        self.record(Call::BaseModels);
        if *self.fail_base_models.lock().unwrap() {
            return Err(stub_error());
        }
        Ok(vec!["SD 1.5".to_string(), "SDXL".to_string()])
    }

    async fn version_detail(&self, version_id: u64) -> ApiResult<VersionDetailRecord> {
        self.record(Call::Detail(version_id));
        let reply = self.detail_replies.lock().unwrap().pop_front();
        let status = play(reply, Some("pending".to_string())).await?;
        let mut version = version_named(version_id, "detail");
        version.client_status = status;
        let mut model = model_named(1, "detail");
        model.weight = Some(-2.0);
        Ok(VersionDetailRecord { model, version })
    }

    async fn update_version(&self, version: &VersionRecord) -> ApiResult<()> {
        self.record(Call::UpdateVersion(version.id));
        if *self.conflict_on_version_update.lock().unwrap() {
            return Err(ApiError::Conflict {
                url: "stub".to_string(),
            });
        }
        Ok(())
    }

    async fn update_model(&self, model: &ModelRecord) -> ApiResult<()> {
        self.record(Call::UpdateModel(model.id));
        Ok(())
    }

    async fn delete_version(&self, version_id: u64, delete_files: bool) -> ApiResult<()> {
        self.record(Call::DeleteVersion(version_id, delete_files));
        Ok(())
    }

    async fn refresh_version(&self, version_id: u64, fields: &str) -> ApiResult<()> {
        self.record(Call::Refresh(version_id, fields.to_string()));
        Ok(())
    }

    async fn sync_version(
        &self,
        version_id: u64,
        model_id: Option<u64>,
        download: bool,
    ) -> ApiResult<()> {
        self.record(Call::Sync(version_id, model_id, download));
        let reply = self.sync_reply.lock().unwrap().take();
        play(reply, ()).await
    }

    async fn download_progress(&self) -> ApiResult<Option<f64>> {
        self.record(Call::Progress);
        Ok(Some(*self.progress_value.lock().unwrap()))
    }

    async fn cancel_download(&self) -> ApiResult<()> {
        self.record(Call::Cancel);
        if *self.fail_cancel.lock().unwrap() {
            return Err(stub_error());
        }
        Ok(())
    }

    async fn dispatch(&self, request: &DispatchRequest) -> ApiResult<()> {
        self.record(Call::Dispatch(request.clone()));
        let delay = *self.dispatch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_dispatch.lock().unwrap() {
            return Err(stub_error());
        }
        Ok(())
    }
}
