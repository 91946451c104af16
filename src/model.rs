use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

pub const DEFAULT_PAGE_SIZE: u32 = 50;

pub const MODEL_TYPES: &[&str] = &[
    "Checkpoint",
    "TextualInversion",
    "Hypernetwork",
    "AestheticGradient",
    "LORA",
    "LoCon",
    "DoRA",
    "Controlnet",
    "Upscaler",
    "MotionModule",
    "VAE",
    "Wildcards",
    "Poses",
    "Workflows",
    "Detection",
    "Other",
];

pub const CATEGORIES: &[&str] = &[
    "character",
    "style",
    "concept",
    "clothing",
    "base model",
    "poses",
    "background",
    "tool",
    "vehicle",
    "buildings",
    "objects",
    "assets",
    "animal",
    "action",
];

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NsfwMode {
    #[default]
    Both,
    Yes,
    No,
}

impl NsfwMode {
    pub const fn identifier(self) -> &'static str {
        match self {
            NsfwMode::Both => "both",
            NsfwMode::Yes => "yes",
            NsfwMode::No => "no",
        }
    }

    pub fn from_identifier(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "both" => Some(NsfwMode::Both),
            "yes" => Some(NsfwMode::Yes),
            "no" => Some(NsfwMode::No),
            _ => None,
        }
    }

    /// Translation of the old `hideNsfw` checkbox.
    pub const fn from_legacy_hide(hide: bool) -> Self {
        if hide {
            NsfwMode::No
        } else {
            NsfwMode::Both
        }
    }
}

/// The search and filter fields constraining a catalog query.
///
/// Empty strings mean "no constraint" and never reach the backend.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueryPredicate {
    pub search: String,
    pub tags_search: String,
    pub category: String,
    pub base_model: String,
    pub model_type: String,
    pub nsfw_mode: NsfwMode,
    pub synced_only: bool,
}

/// A single predicate edit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PredicateField {
    Search(String),
    TagsSearch(String),
    Category(String),
    BaseModel(String),
    ModelType(String),
    NsfwMode(NsfwMode),
    SyncedOnly(bool),
}

impl QueryPredicate {
    pub fn apply(&mut self, field: PredicateField) {
        match field {
            PredicateField::Search(value) => self.search = value,
            PredicateField::TagsSearch(value) => self.tags_search = value,
            PredicateField::Category(value) => self.category = value,
            PredicateField::BaseModel(value) => self.base_model = value,
            PredicateField::ModelType(value) => self.model_type = value,
            PredicateField::NsfwMode(value) => self.nsfw_mode = value,
            PredicateField::SyncedOnly(value) => self.synced_only = value,
        }
    }

    /// Comma-joined category and free-text tags, or `None` when both are blank.
    pub fn tags(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.category.is_empty() {
            parts.push(self.category.as_str());
        }
        if !self.tags_search.trim().is_empty() {
            parts.push(self.tags_search.as_str());
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }

    /// Filter parameters shared by the list and count endpoints.
    pub fn filter_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if !self.search.is_empty() {
            params.push(("search", self.search.clone()));
        }
        if !self.base_model.is_empty() {
            params.push(("baseModel", self.base_model.clone()));
        }
        if !self.model_type.is_empty() {
            params.push(("modelType", self.model_type.clone()));
        }
        params.push(("nsfwFilter", self.nsfw_mode.identifier().to_string()));
        if self.synced_only {
            params.push(("synced", "1".to_string()));
        }
        if let Some(tags) = self.tags() {
            params.push(("tags", tags));
        }
        params
    }
}

/// One page request, frozen at issue time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageQuery {
    pub predicate: QueryPredicate,
    pub page: u32,
    pub page_size: u32,
}

impl PageQuery {
    pub fn list_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("limit", self.page_size.to_string()),
            ("includeVersions", "1".to_string()),
        ];
        params.extend(self.predicate.filter_params());
        params
    }
}

pub fn total_pages(total: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size))
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub model_type: String,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub version_type: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const PENDING_STATUS: &str = "pending";

/// Client-side status of a version on a remote agent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientStatus {
    Pending,
    Reported(String),
}

impl ClientStatus {
    pub fn from_reported(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim) {
            None | Some("") => None,
            Some(PENDING_STATUS) => Some(ClientStatus::Pending),
            Some(other) => Some(ClientStatus::Reported(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ClientStatus::Pending => PENDING_STATUS,
            ClientStatus::Reported(status) => status,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ClientStatus::Pending)
    }
}

/// `GET /versions/{id}` payload.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VersionDetailRecord {
    pub model: ModelRecord,
    pub version: VersionRecord,
}

/// A fetched model with display paths resolved and versions de-duplicated.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogModel {
    pub record: ModelRecord,
    pub image_url: Option<String>,
    pub versions: Vec<CatalogVersion>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CatalogVersion {
    pub record: VersionRecord,
    pub image_url: Option<String>,
}

impl CatalogModel {
    pub fn from_record(mut record: ModelRecord) -> Self {
        let image_url = normalize_image_path(record.image_path.as_deref());
        let mut seen = HashSet::new();
        let versions = std::mem::take(&mut record.versions)
            .into_iter()
            .filter(|version| seen.insert(version.id))
            .map(|version| CatalogVersion {
                image_url: normalize_image_path(version.image_path.as_deref()),
                record: version,
            })
            .collect();
        Self {
            record,
            image_url,
            versions,
        }
    }

    pub fn id(&self) -> u64 {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn find_version(&self, version_id: u64) -> Option<&CatalogVersion> {
        self.versions
            .iter()
            .find(|version| version.record.id == version_id)
    }
}

pub fn normalize_image_path(path: Option<&str>) -> Option<String> {
    let path = path.filter(|p| !p.is_empty())?;
    let mut normalized = path.replace('\\', "/");
    if let Some(index) = normalized.rfind("/backend/images/") {
        normalized = format!("/images{}", &normalized[index + "/backend/images".len()..]);
    }
    if !normalized.starts_with('/') && !normalized.starts_with("http") {
        normalized = format!("/images/{normalized}");
    }
    Some(normalized)
}
