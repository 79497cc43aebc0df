use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use super::queries::{services_path, staff_path, BUSINESSES};
use super::store::{DocumentStore, WriteBatch};
use crate::models::{Business, OpeningHours, Service, Staff};

/// One entry of a directory import file: a business with its children inline.
#[derive(Debug, Deserialize)]
pub struct DirectoryEntry {
    #[serde(flatten)]
    pub business: Business,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub staff: Vec<Staff>,
}

/// Parses a directory JSON array. Opening hours and working days are validated here.
pub fn parse_directory(json: &str) -> anyhow::Result<Vec<DirectoryEntry>> {
    let raw: Vec<Value> = serde_json::from_str(json).context("failed to parse directory file")?;
    let mut entries = Vec::with_capacity(raw.len());
    for value in raw {
        if let Some(hours) = value.get("openingHours") {
            let hours: BTreeMap<String, String> =
                serde_json::from_value(hours.clone()).context("openingHours must map weekdays to text")?;
            OpeningHours::parse(&hours).with_context(|| {
                format!("invalid opening hours for {}", value["name"].as_str().unwrap_or("?"))
            })?;
        }
        let entry: DirectoryEntry = serde_json::from_value(value).context("failed to parse directory entry")?;
        entries.push(entry);
    }

    for entry in &entries {
        for service in &entry.services {
            if service.duration > 24 * 60 {
                anyhow::bail!(
                    "service {} at {} lasts longer than a day ({} minutes)",
                    service.name,
                    entry.business.name,
                    service.duration
                );
            }
            for staff_id in &service.staff_ids {
                if !entry.staff.iter().any(|s| &s.id == staff_id) {
                    anyhow::bail!(
                        "service {} at {} references unknown staff id {staff_id}",
                        service.name,
                        entry.business.name
                    );
                }
            }
        }
    }

    Ok(entries)
}

pub async fn import_directory(store: &dyn DocumentStore, path: &Path) -> anyhow::Result<usize> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read directory file: {}", path.display()))?;
    let entries = parse_directory(&json)?;

    let mut batch = WriteBatch::new();
    for entry in &entries {
        let business_id = entry.business.id.clone();
        batch.set(BUSINESSES, &business_id, serde_json::to_value(&entry.business)?);
        for service in &entry.services {
            batch.set(services_path(&business_id), &service.id, serde_json::to_value(service)?);
        }
        for staff in &entry.staff {
            batch.set(staff_path(&business_id), &staff.id, serde_json::to_value(staff)?);
        }
    }
    store.commit(batch).await?;

    tracing::info!(businesses = entries.len(), "imported directory");
    Ok(entries.len())
}
