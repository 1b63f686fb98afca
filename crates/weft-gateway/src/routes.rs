use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use weft_core::error::Result;
use weft_engine::Workflow;

/// Node names carrying this prefix expose externally addressable routes.
pub const ROUTE_PREFIX: &str = "route_";

/// One registered route: a compiled workflow and its entry node.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub workflow: Arc<Workflow>,
    pub entry_node: String,
}

/// Route tables loaded once at startup: per-tenant private tables plus a
/// default table shared by unrecognized tenants. Immutable thereafter.
#[derive(Debug, Default)]
pub struct RouteTable {
    tenants: HashMap<String, HashMap<String, RouteEntry>>,
    default_routes: HashMap<String, RouteEntry>,
}

impl RouteTable {
    /// Scan a routes directory.
    ///
    /// Each subdirectory name is a tenant id whose `*.json` workflow files
    /// populate that tenant's table; files directly in the root populate
    /// the default table.
    pub fn load(dir: &Path) -> Result<RouteTable> {
        let mut table = RouteTable::default();
        if !dir.is_dir() {
            info!(dir = %dir.display(), "Routes directory missing, no routes loaded");
            return Ok(table);
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                let Some(tenant) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let routes = table.tenants.entry(tenant.to_string()).or_default();
                for file in std::fs::read_dir(&path)? {
                    let file = file?.path();
                    if is_workflow_file(&file) {
                        load_workflow_file(routes, &file);
                    }
                }
            } else if is_workflow_file(&path) {
                load_workflow_file(&mut table.default_routes, &path);
            }
        }

        info!(
            tenants = table.tenants.len(),
            default_routes = table.default_routes.len(),
            "Route tables loaded"
        );
        Ok(table)
    }

    /// Resolve a route path for a tenant.
    ///
    /// Recognized tenants use only their private table; everyone else
    /// shares the default table.
    pub fn resolve(&self, tenant: &str, route: &str) -> Option<&RouteEntry> {
        match self.tenants.get(tenant) {
            Some(routes) => routes.get(route),
            None => self.default_routes.get(route),
        }
    }

    /// Every `(tenant, route)` pair, default routes under "default".
    pub fn routes(&self) -> Vec<(String, String)> {
        let mut all: Vec<(String, String)> = self
            .default_routes
            .keys()
            .map(|route| ("default".to_string(), route.clone()))
            .collect();
        for (tenant, routes) in &self.tenants {
            for route in routes.keys() {
                all.push((tenant.clone(), route.clone()));
            }
        }
        all.sort();
        all
    }

    pub fn is_empty(&self) -> bool {
        self.default_routes.is_empty() && self.tenants.values().all(|t| t.is_empty())
    }
}

fn is_workflow_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
}

/// Load one workflow file and register its `route_` nodes. A file that
/// fails to parse is skipped so one bad workflow cannot block startup.
fn load_workflow_file(routes: &mut HashMap<String, RouteEntry>, path: &Path) {
    match Workflow::load(path) {
        Ok(workflow) => register_workflow(routes, workflow),
        Err(e) => error!(file = %path.display(), error = %e, "Failed to load workflow"),
    }
}

fn register_workflow(routes: &mut HashMap<String, RouteEntry>, workflow: Workflow) {
    let workflow = Arc::new(workflow);
    for node in &workflow.nodes {
        if let Some(rest) = node.func.strip_prefix(ROUTE_PREFIX) {
            let route = normalize_route(rest);
            debug!(route = %route, node = %node.id, "Route registered");
            routes.insert(
                route,
                RouteEntry {
                    workflow: workflow.clone(),
                    entry_node: node.id.clone(),
                },
            );
        }
    }
}

/// `route_<name>` → `/<name>` with leading slashes collapsed.
fn normalize_route(rest: &str) -> String {
    format!("/{}", rest.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn workflow_json(route: &str) -> String {
        format!(
            r#"{{
                "nodes": [
                    {{"id": "1", "func": "{}", "position": {{"x": 0, "y": 0}}}},
                    {{"id": "2", "func": "echo", "args": ["pong"], "position": {{"x": 50, "y": 0}}}}
                ],
                "edges": [{{"id": "e1", "source": "1", "target": "2"}}]
            }}"#,
            route
        )
    }

    #[test]
    fn test_normalize_route() {
        assert_eq!(normalize_route("ping"), "/ping");
        assert_eq!(normalize_route("/sync/users"), "/sync/users");
        assert_eq!(normalize_route("///deep"), "/deep");
    }

    #[test]
    fn test_load_tenant_and_default_tables() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shared.json"), workflow_json("route_ping")).unwrap();
        fs::create_dir(dir.path().join("acme")).unwrap();
        fs::write(
            dir.path().join("acme/private.json"),
            workflow_json("route_sync/users"),
        )
        .unwrap();
        // Non-JSON files are ignored.
        fs::write(dir.path().join("notes.txt"), "not a workflow").unwrap();

        let table = RouteTable::load(dir.path()).unwrap();
        assert!(!table.is_empty());

        // Unrecognized tenants share the default table.
        assert!(table.resolve("default", "/ping").is_some());
        assert!(table.resolve("stranger", "/ping").is_some());

        // Recognized tenants use only their private table.
        let entry = table.resolve("acme", "/sync/users").unwrap();
        assert_eq!(entry.entry_node, "1");
        assert!(table.resolve("acme", "/ping").is_none());
        assert!(table.resolve("default", "/sync/users").is_none());

        assert_eq!(
            table.routes(),
            vec![
                ("acme".to_string(), "/sync/users".to_string()),
                ("default".to_string(), "/ping".to_string()),
            ]
        );
    }

    #[test]
    fn test_bad_workflow_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();
        fs::write(dir.path().join("good.json"), workflow_json("route_ok")).unwrap();

        let table = RouteTable::load(dir.path()).unwrap();
        assert!(table.resolve("default", "/ok").is_some());
    }

    #[test]
    fn test_missing_directory_yields_empty_table() {
        let table = RouteTable::load(Path::new("/nonexistent/weft-routes")).unwrap();
        assert!(table.is_empty());
        assert!(table.resolve("default", "/ping").is_none());
    }

    #[test]
    fn test_registered_workflow_is_compiled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("wf.json"), workflow_json("route_ping")).unwrap();

        let table = RouteTable::load(dir.path()).unwrap();
        let entry = table.resolve("default", "/ping").unwrap();
        // Edges were converted into successor links at load time.
        assert_eq!(
            entry.workflow.node("1").unwrap().next.as_deref(),
            Some("2")
        );
    }
}
