use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::GatewayError;
use crate::models::Route;

/// Route table operations
#[async_trait]
pub trait Router: Send + Sync {
    /// All routes in registration order
    async fn list(&self) -> Vec<Route>;

    /// Route by ID
    async fn get(&self, id: u64) -> Option<Route>;

    /// Validate and append a route, returning its new ID
    async fn add(&self, route: Route) -> Result<u64, GatewayError>;

    /// Validate and replace the route with the same ID; `Ok(false)` if absent
    async fn update(&self, route: Route) -> Result<bool, GatewayError>;

    /// Remove a route; false if absent
    async fn delete(&self, id: u64) -> bool;

    /// First active route whose path and method match
    async fn find_match(&self, path: &str, method: &str) -> Option<Route>;
}

/// Check the route invariants enforced before add and update
pub fn validate_route(route: &Route) -> Result<(), GatewayError> {
    if route.path.is_empty() {
        return Err(GatewayError::Validation("path is required".to_string()));
    }
    if !route.path.starts_with('/') {
        return Err(GatewayError::Validation("path must start with /".to_string()));
    }
    if route.target.trim().is_empty() {
        return Err(GatewayError::Validation("target is required".to_string()));
    }
    if route.methods.is_empty() {
        return Err(GatewayError::Validation(
            "at least one HTTP method must be specified".to_string(),
        ));
    }
    Ok(())
}

struct TableState {
    routes: Vec<Route>,
    next_id: u64,
}

/// In-memory route table behind a single reader/writer lock
pub struct RouteTable {
    state: RwLock<TableState>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    /// Create an empty route table
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TableState {
                routes: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Route table seeded with persisted routes, keeping their IDs
    pub fn from_routes(routes: Vec<Route>, next_id: u64) -> Result<Self, GatewayError> {
        for route in &routes {
            validate_route(route).map_err(|e| {
                GatewayError::Validation(format!("route {} ({}): {}", route.id, route.path, e))
            })?;
        }

        let floor = routes.iter().map(|r| r.id + 1).max().unwrap_or(1);
        Ok(Self {
            state: RwLock::new(TableState {
                routes,
                next_id: next_id.max(floor),
            }),
        })
    }

    /// ID the next added route will receive
    pub async fn next_id(&self) -> u64 {
        self.state.read().await.next_id
    }
}

#[async_trait]
impl Router for RouteTable {
    async fn list(&self) -> Vec<Route> {
        self.state.read().await.routes.clone()
    }

    async fn get(&self, id: u64) -> Option<Route> {
        let state = self.state.read().await;
        state.routes.iter().find(|r| r.id == id).cloned()
    }

    async fn add(&self, mut route: Route) -> Result<u64, GatewayError> {
        validate_route(&route)?;

        let mut state = self.state.write().await;
        route.id = state.next_id;
        state.next_id += 1;

        tracing::debug!(id = route.id, path = %route.path, target = %route.target, "Route added");
        let id = route.id;
        state.routes.push(route);
        Ok(id)
    }

    async fn update(&self, route: Route) -> Result<bool, GatewayError> {
        validate_route(&route)?;

        let mut state = self.state.write().await;
        match state.routes.iter_mut().find(|r| r.id == route.id) {
            Some(existing) => {
                tracing::debug!(id = route.id, path = %route.path, "Route updated");
                *existing = route;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: u64) -> bool {
        let mut state = self.state.write().await;
        let before = state.routes.len();
        state.routes.retain(|r| r.id != id);
        state.routes.len() != before
    }

    async fn find_match(&self, path: &str, method: &str) -> Option<Route> {
        let state = self.state.read().await;
        state
            .routes
            .iter()
            .filter(|r| r.active)
            .find(|r| r.matches_path(path) && r.allows_method(method))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_route() -> Route {
        Route::new("/api/users", "http://user-service:8080", &["GET"])
    }

    #[tokio::test]
    async fn test_add_assigns_monotonic_ids() {
        let table = RouteTable::new();
        let first = table.add(users_route()).await.unwrap();
        let second = table
            .add(Route::new("/api/products", "http://product-service:8080", &["*"]))
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);

        assert!(table.delete(second).await);
        let third = table
            .add(Route::new("/public", "http://static:8080", &["GET"]))
            .await
            .unwrap();
        assert_eq!(third, 3);
    }

    #[tokio::test]
    async fn test_find_match_prefix_and_method() {
        let table = RouteTable::new();
        table.add(users_route()).await.unwrap();

        let matched = table.find_match("/api/users/42", "GET").await;
        assert_eq!(matched.map(|r| r.path), Some("/api/users".to_string()));

        assert!(table.find_match("/api/users", "DELETE").await.is_none());
        assert!(table.find_match("/api/userslist", "GET").await.is_none());
    }

    #[tokio::test]
    async fn test_first_registered_match_wins() {
        let table = RouteTable::new();
        let broad = table
            .add(Route::new("/api", "http://broad:8080", &["*"]))
            .await
            .unwrap();
        table
            .add(Route::new("/api/users", "http://specific:8080", &["*"]))
            .await
            .unwrap();

        let matched = table.find_match("/api/users/1", "GET").await.unwrap();
        assert_eq!(matched.id, broad);
    }

    #[tokio::test]
    async fn test_inactive_routes_are_skipped() {
        let table = RouteTable::new();
        table.add(users_route().with_active(false)).await.unwrap();
        let fallback = table
            .add(Route::new("/api", "http://fallback:8080", &["GET"]))
            .await
            .unwrap();

        let matched = table.find_match("/api/users", "GET").await.unwrap();
        assert_eq!(matched.id, fallback);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let table = RouteTable::new();

        let no_slash = Route::new("api", "http://x:1", &["GET"]);
        assert!(matches!(
            table.add(no_slash).await,
            Err(GatewayError::Validation(_))
        ));

        let no_target = Route::new("/api", "", &["GET"]);
        assert!(matches!(
            table.add(no_target).await,
            Err(GatewayError::Validation(_))
        ));

        let no_methods = Route::new("/api", "http://x:1", &[]);
        assert!(matches!(
            table.add(no_methods).await,
            Err(GatewayError::Validation(_))
        ));

        assert!(table.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_id() {
        let table = RouteTable::new();
        let mut route = users_route();
        route.id = 99;

        assert!(!table.update(route).await.unwrap());
        assert!(!table.delete(99).await);
    }

    #[tokio::test]
    async fn test_update_replaces_route() {
        let table = RouteTable::new();
        let id = table.add(users_route()).await.unwrap();

        let mut updated = users_route().with_rate_limit(5);
        updated.id = id;
        assert!(table.update(updated).await.unwrap());
        assert_eq!(table.get(id).await.unwrap().rate_limit, 5);
    }

    #[test]
    fn test_from_routes_keeps_ids_ahead() {
        let mut route = users_route();
        route.id = 10;
        let table = RouteTable::from_routes(vec![route], 3).unwrap();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        assert_eq!(runtime.block_on(table.next_id()), 11);
    }
}
