use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::services::dataset_service::{ReadPolicy, Restrictions};

/// Every data route that can be configured individually
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Columns,
    Create,
    Delete,
    Id,
    Insert,
    Metadata,
    MetadataUpdate,
    Query,
    Rows,
    Search,
    Update,
}

impl Route {
    pub const ALL: [Route; 11] = [
        Route::Columns,
        Route::Create,
        Route::Delete,
        Route::Id,
        Route::Insert,
        Route::Metadata,
        Route::MetadataUpdate,
        Route::Query,
        Route::Rows,
        Route::Search,
        Route::Update,
    ];

    /// Routes that change data or metadata
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Route::Create | Route::Delete | Route::Insert | Route::MetadataUpdate | Route::Update
        )
    }
}

/// Who may call a route once identity is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAccess {
    Public,
    User,
    Superuser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSetting {
    pub enable: bool,
    pub restricted_tables: Vec<String>,
    pub read_policy: ReadPolicy,
    pub access: RouteAccess,
}

impl RouteSetting {
    fn default_for(route: Route, restricted_tables: &[String]) -> Self {
        Self {
            enable: true,
            restricted_tables: restricted_tables.to_vec(),
            read_policy: ReadPolicy::Deny,
            access: if route.is_write() { RouteAccess::Superuser } else { RouteAccess::User },
        }
    }
}

/// Partial route setting as written in a settings file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteSettingOverride {
    pub enable: Option<bool>,
    pub restricted_tables: Option<Vec<String>>,
    pub read_policy: Option<ReadPolicy>,
    pub access: Option<RouteAccess>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSettings {
    restricted_tables: Vec<String>,
    routes: BTreeMap<Route, RouteSetting>,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self::with_restricted(vec!["data".to_string(), "user".to_string()])
    }
}

impl RouteSettings {
    /// Defaults for every route with the given restricted tables
    pub fn with_restricted(restricted_tables: Vec<String>) -> Self {
        let routes = Route::ALL
            .iter()
            .map(|&route| (route, RouteSetting::default_for(route, &restricted_tables)))
            .collect();
        Self { restricted_tables, routes }
    }

    pub fn get(&self, route: Route) -> RouteSetting {
        self.routes
            .get(&route)
            .cloned()
            .unwrap_or_else(|| RouteSetting::default_for(route, &self.restricted_tables))
    }

    pub fn is_enabled(&self, route: Route) -> bool {
        self.get(route).enable
    }

    /// Dataset restrictions in force for one route
    pub fn restrictions(&self, route: Route) -> Restrictions {
        let setting = self.get(route);
        Restrictions::new(setting.restricted_tables).with_read_policy(setting.read_policy)
    }

    pub fn parse_overrides(yaml: &str) -> Result<BTreeMap<Route, RouteSettingOverride>, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn apply_overrides(&mut self, overrides: BTreeMap<Route, RouteSettingOverride>) {
        for (route, changes) in overrides {
            let mut setting = self.get(route);
            if let Some(enable) = changes.enable {
                setting.enable = enable;
            }
            if let Some(tables) = changes.restricted_tables {
                setting.restricted_tables = tables;
            }
            if let Some(policy) = changes.read_policy {
                setting.read_policy = policy;
            }
            if let Some(access) = changes.access {
                setting.access = access;
            }
            self.routes.insert(route, setting);
        }
    }
}
