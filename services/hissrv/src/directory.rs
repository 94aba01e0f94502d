//! Entity directory interface
//!
//! Tag and alert metadata plus the storage bindings of both live in an
//! external directory. The engine only depends on the `Directory` trait;
//! `MemoryDirectory` is the in-process implementation, optionally seeded
//! from YAML.

use async_trait::async_trait;
use dashmap::DashMap;
use historian_model::{Alert, Location, Tag};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{HissrvError, Result};

/// Metadata and storage-binding lookups
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    // ========== Entities ==========

    async fn lookup_tag(&self, tag_id: &str) -> Result<Option<Tag>>;

    async fn lookup_alert(&self, alert_id: &str) -> Result<Option<Alert>>;

    /// Ids of alerts whose parent is `tag_id`
    async fn alerts_for_tag(&self, tag_id: &str) -> Result<Vec<String>>;

    async fn list_tags(&self) -> Result<Vec<Tag>>;

    async fn list_alerts(&self) -> Result<Vec<Alert>>;

    // ========== Storage Bindings ==========

    /// Location of a tag or alert in one backend
    async fn lookup_binding(&self, entity_id: &str, backend_id: &str) -> Result<Option<Location>>;

    async fn record_binding(
        &self,
        entity_id: &str,
        backend_id: &str,
        location: &Location,
    ) -> Result<()>;

    /// Returns the removed location
    async fn remove_binding(&self, entity_id: &str, backend_id: &str) -> Result<Option<Location>>;

    /// All (backend id, location) pairs of one entity, in bind order
    async fn bindings_for(&self, entity_id: &str) -> Result<Vec<(String, Location)>>;
}

/// One persisted storage binding in the seed file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSeed {
    pub id: String,
    pub data_storage_id: String,
    pub location: Location,
}

/// Seed document for `MemoryDirectory`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySeed {
    pub tags: Vec<Tag>,
    pub alerts: Vec<Alert>,
    pub bindings: Vec<BindingSeed>,
}

/// In-process directory
#[derive(Default)]
pub struct MemoryDirectory {
    tags: DashMap<String, Tag>,
    alerts: DashMap<String, Alert>,
    bindings: DashMap<String, Vec<(String, Location)>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        let directory = Self::new();
        for tag in seed.tags {
            directory.put_tag(tag);
        }
        for alert in seed.alerts {
            directory.put_alert(alert);
        }
        for binding in seed.bindings {
            directory.put_binding(&binding.id, &binding.data_storage_id, binding.location);
        }
        directory
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let seed: DirectorySeed = serde_yaml::from_str(yaml)
            .map_err(|e| HissrvError::Directory(format!("invalid directory seed: {e}")))?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            HissrvError::Directory(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Insert or replace a tag
    pub fn put_tag(&self, tag: Tag) {
        self.tags.insert(tag.id.clone(), tag);
    }

    /// Insert or replace an alert
    pub fn put_alert(&self, alert: Alert) {
        self.alerts.insert(alert.id.clone(), alert);
    }

    fn put_binding(&self, entity_id: &str, backend_id: &str, location: Location) {
        let mut bound = self.bindings.entry(entity_id.to_string()).or_default();
        match bound.iter_mut().find(|(id, _)| id == backend_id) {
            Some(slot) => slot.1 = location,
            None => bound.push((backend_id.to_string(), location)),
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn lookup_tag(&self, tag_id: &str) -> Result<Option<Tag>> {
        Ok(self.tags.get(tag_id).map(|t| t.clone()))
    }

    async fn lookup_alert(&self, alert_id: &str) -> Result<Option<Alert>> {
        Ok(self.alerts.get(alert_id).map(|a| a.clone()))
    }

    async fn alerts_for_tag(&self, tag_id: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .alerts
            .iter()
            .filter(|a| a.tag_id == tag_id)
            .map(|a| a.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        Ok(self.tags.iter().map(|t| t.clone()).collect())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.alerts.iter().map(|a| a.clone()).collect())
    }

    async fn lookup_binding(&self, entity_id: &str, backend_id: &str) -> Result<Option<Location>> {
        Ok(self.bindings.get(entity_id).and_then(|bound| {
            bound
                .iter()
                .find(|(id, _)| id == backend_id)
                .map(|(_, location)| location.clone())
        }))
    }

    async fn record_binding(
        &self,
        entity_id: &str,
        backend_id: &str,
        location: &Location,
    ) -> Result<()> {
        self.put_binding(entity_id, backend_id, location.clone());
        Ok(())
    }

    async fn remove_binding(&self, entity_id: &str, backend_id: &str) -> Result<Option<Location>> {
        let removed = {
            let Some(mut bound) = self.bindings.get_mut(entity_id) else {
                return Ok(None);
            };
            let Some(index) = bound.iter().position(|(id, _)| id == backend_id) else {
                return Ok(None);
            };
            bound.remove(index).1
        };
        self.bindings.remove_if(entity_id, |_, bound| bound.is_empty());
        Ok(Some(removed))
    }

    async fn bindings_for(&self, entity_id: &str) -> Result<Vec<(String, Location)>> {
        Ok(self
            .bindings
            .get(entity_id)
            .map(|bound| bound.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const SEED: &str = r#"
tags:
  - id: temp
    valueType: 1
  - id: mode
    valueType: 2
    step: true
alerts:
  - id: temp-high
    tagId: temp
    threshold: 80
bindings:
  - id: temp
    dataStorageId: local
    location: t_temp
"#;

    #[tokio::test]
    async fn test_seeded_lookups() {
        let directory = MemoryDirectory::from_yaml_str(SEED).unwrap();

        let tag = directory.lookup_tag("temp").await.unwrap().unwrap();
        assert!(tag.interpolates());
        assert!(directory.lookup_tag("missing").await.unwrap().is_none());

        let alert = directory.lookup_alert("temp-high").await.unwrap().unwrap();
        assert!(alert.direction_high);
        assert_eq!(
            directory.alerts_for_tag("temp").await.unwrap(),
            vec!["temp-high".to_string()]
        );

        let location = directory.lookup_binding("temp", "local").await.unwrap();
        assert_eq!(location.unwrap().as_str(), "t_temp");
    }

    #[tokio::test]
    async fn test_binding_lifecycle() {
        let directory = MemoryDirectory::new();
        let location = Location::new("t_a").unwrap();
        directory.record_binding("a", "db", &location).await.unwrap();
        directory
            .record_binding("a", "vm", &Location::new("a").unwrap())
            .await
            .unwrap();
        assert_eq!(directory.bindings_for("a").await.unwrap().len(), 2);

        assert_eq!(
            directory.remove_binding("a", "db").await.unwrap(),
            Some(location)
        );
        assert_eq!(directory.remove_binding("a", "db").await.unwrap(), None);
        directory.remove_binding("a", "vm").await.unwrap();
        assert!(directory.bindings_for("a").await.unwrap().is_empty());
    }

    #[test]
    fn test_bad_seed_location_rejected() {
        let yaml = "bindings:\n  - {id: a, dataStorageId: db, location: \"bad name\"}\n";
        assert!(MemoryDirectory::from_yaml_str(yaml).is_err());
    }
}
