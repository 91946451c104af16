use crate::{
    api::{ApiError, CatalogApi},
    model::{ModelRecord, VersionRecord},
    notice::Notifier,
};
use log::warn;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetailError {
    #[error("no version loaded")]
    NotLoaded,
    #[error("version ID already exists")]
    Conflict,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Weights must be finite and positive; anything else becomes 1.
pub fn normalize_weight(weight: Option<f64>) -> f64 {
    match weight {
        Some(value) if value.is_finite() && value > 0.0 => value,
        _ => 1.0,
    }
}

/// Edit buffer for one model version and its parent model.
pub struct VersionDetail {
    api: Arc<dyn CatalogApi>,
    notices: Notifier,
    pub model: Option<ModelRecord>,
    pub version: Option<VersionRecord>,
    pub editing: bool,
}

impl VersionDetail {
    pub fn new(api: Arc<dyn CatalogApi>, notices: Notifier) -> Self {
        Self {
            api,
            notices,
            model: None,
            version: None,
            editing: false,
        }
    }

    pub async fn load(&mut self, version_id: u64) -> Result<(), DetailError> {
        let detail = self.api.version_detail(version_id).await?;
        let mut model = detail.model;
        model.weight = Some(normalize_weight(model.weight));
        self.model = Some(model);
        self.version = Some(detail.version);
        Ok(())
    }

    pub async fn toggle_nsfw(&mut self) -> Result<bool, DetailError> {
        let version = self.version.as_mut().ok_or(DetailError::NotLoaded)?;
        let mut updated = version.clone();
        updated.nsfw = !updated.nsfw;
        match self.api.update_version(&updated).await {
            Ok(()) => {
                version.nsfw = updated.nsfw;
                self.notices.success("NSFW status updated");
                Ok(updated.nsfw)
            }
            Err(err) => {
                warn!("Failed to update NSFW flag of version {}: {err}", updated.id);
                self.notices.danger("Failed to update NSFW status");
                Err(err.into())
            }
        }
    }

    /// Saves the model, then the version. On a version ID collision the
    /// editor stays in edit mode so the form can be corrected.
    pub async fn save_edit(&mut self) -> Result<(), DetailError> {
        let model = self.model.as_mut().ok_or(DetailError::NotLoaded)?;
        let version = self.version.as_ref().ok_or(DetailError::NotLoaded)?;
        model.weight = Some(normalize_weight(model.weight));
        self.api.update_model(model).await?;
        if let Err(err) = self.api.update_version(version).await {
            if err.is_conflict() {
                self.notices.danger("Version ID already exists");
                return Err(DetailError::Conflict);
            }
            return Err(err.into());
        }
        self.editing = false;
        Ok(())
    }

    /// Asks the server to re-pull `fields` of the loaded version. Reload
    /// afterwards to see the result.
    pub async fn refresh_version(&self, fields: &[&str]) -> Result<(), DetailError> {
        let version = self.version.as_ref().ok_or(DetailError::NotLoaded)?;
        self.api
            .refresh_version(version.id, &fields.join(","))
            .await?;
        Ok(())
    }

    pub async fn delete_version(
        &self,
        version_id: u64,
        delete_files: bool,
    ) -> Result<(), DetailError> {
        self.api.delete_version(version_id, delete_files).await?;
        Ok(())
    }
}
