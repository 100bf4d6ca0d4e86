//! Requirements for each protected admin section.

use service_core::error::AppError;
use std::collections::BTreeMap;
use std::path::Path;

use crate::gate::RouteRequirements;
use crate::models::{Capability, Role};

/// Section name (first path segment under `/admin`) to its requirements.
/// The empty section is the dashboard.
#[derive(Debug, Clone)]
pub struct RouteTable(BTreeMap<String, RouteRequirements>);

impl Default for RouteTable {
    fn default() -> Self {
        let mut routes = BTreeMap::new();
        routes.insert(String::new(), RouteRequirements::new(Role::Moderator));
        routes.insert(
            "users".to_string(),
            RouteRequirements::new(Role::Admin)
                .permissions([Capability::ManageUsers])
                .two_factor(),
        );
        routes.insert(
            "listings".to_string(),
            RouteRequirements::new(Role::Moderator).permissions([Capability::ManageListings]),
        );
        routes.insert(
            "reports".to_string(),
            RouteRequirements::new(Role::Moderator).permissions([Capability::ManageReports]),
        );
        routes.insert(
            "analytics".to_string(),
            RouteRequirements::new(Role::Admin).permissions([Capability::ViewAnalytics]),
        );
        routes.insert(
            "settings".to_string(),
            RouteRequirements::new(Role::SuperAdmin)
                .permissions([Capability::ManageSettings])
                .two_factor(),
        );
        routes.insert(
            "security".to_string(),
            RouteRequirements::new(Role::SuperAdmin)
                .permissions([Capability::ViewAuditLog, Capability::ManageAdmins])
                .two_factor(),
        );
        Self(routes)
    }
}

impl RouteTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Built-in sections, overridden entry by entry from an optional JSON file.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut table = Self::default();
        let Some(path) = path else {
            return Ok(table);
        };

        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Failed to read route table {}: {}",
                path.display(),
                e
            ))
        })?;
        let overrides = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), sections = overrides.0.len(), "Loaded route overrides");
        table.0.extend(overrides.0);
        Ok(table)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let routes: BTreeMap<String, RouteRequirements> = serde_json::from_str(raw)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid route table: {}", e)))?;
        Ok(Self(
            routes
                .into_iter()
                .map(|(section, requirements)| (normalize_section(&section).to_string(), requirements))
                .collect(),
        ))
    }

    pub fn insert(&mut self, section: &str, requirements: RouteRequirements) {
        self.0
            .insert(normalize_section(section).to_string(), requirements);
    }

    /// Requirements for a request path below `/admin`, keyed on its first segment.
    pub fn resolve(&self, path: &str) -> Option<&RouteRequirements> {
        self.0.get(normalize_section(path))
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

fn normalize_section(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uses_first_segment() {
        let table = RouteTable::default();
        let users = table.resolve("users/42/edit").unwrap();
        assert_eq!(users.min_role, Role::Admin);
        assert!(users.require_two_factor);
        assert_eq!(users.required_permissions, vec![Capability::ManageUsers]);

        assert_eq!(table.resolve("").unwrap().min_role, Role::Moderator);
        assert_eq!(table.resolve("/").unwrap().min_role, Role::Moderator);
        assert!(table.resolve("billing").is_none());
    }

    #[test]
    fn test_overrides_from_json() {
        let table = RouteTable::from_json(
            r#"{
                "listings": { "min_role": "admin", "required_permissions": ["manage_listings"], "require_two_factor": true },
                "/exports": { "min_role": "super_admin" }
            }"#,
        )
        .unwrap();

        let listings = table.resolve("listings").unwrap();
        assert_eq!(listings.min_role, Role::Admin);
        assert!(listings.require_two_factor);

        let exports = table.resolve("exports").unwrap();
        assert_eq!(exports.min_role, Role::SuperAdmin);
        assert!(exports.required_permissions.is_empty());
        assert!(!exports.require_two_factor);
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        std::fs::write(&path, r#"{ "reports": { "min_role": "admin" } }"#).unwrap();

        let table = RouteTable::load(Some(&path)).unwrap();
        assert_eq!(table.resolve("reports").unwrap().min_role, Role::Admin);
        assert_eq!(table.resolve("settings").unwrap().min_role, Role::SuperAdmin);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(
            RouteTable::from_json("{ \"users\": { \"min_role\": \"owner\" } }"),
            Err(AppError::ConfigError(_))
        ));
    }
}
