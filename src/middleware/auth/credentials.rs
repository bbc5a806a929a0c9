use std::collections::{HashMap, HashSet};
use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::config::write_atomically;
use crate::error::{GatewayError, PersistenceError};
use crate::models::Credential;

/// Request body for creating a credential
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCredential {
    pub route_id: u64,

    pub name: String,

    /// Generated when absent
    #[serde(default)]
    pub api_key: Option<String>,

    /// Generated when absent
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default)]
    pub enabled: Option<bool>,
}

/// A freshly created credential, the only place its secret is ever returned
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredential {
    #[serde(flatten)]
    pub credential: Credential,

    pub secret: String,
}

#[derive(Default)]
struct StoreState {
    by_key: HashMap<String, Credential>,
    by_route: HashMap<u64, HashSet<String>>,
    next_id: u64,
}

impl StoreState {
    fn insert(&mut self, credential: Credential) {
        self.next_id = self.next_id.max(credential.id + 1);
        self.by_route
            .entry(credential.route_id)
            .or_default()
            .insert(credential.api_key.clone());
        self.by_key.insert(credential.api_key.clone(), credential);
    }

    fn sorted(&self) -> Vec<Credential> {
        let mut all: Vec<Credential> = self.by_key.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }
}

/// API credentials indexed by key and by route
pub struct CredentialStore {
    state: RwLock<StoreState>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                next_id: 1,
                ..StoreState::default()
            }),
        }
    }

    /// Store built from a persisted JSON array of credentials
    pub fn load_json(data: &[u8]) -> Result<Self, GatewayError> {
        let credentials: Vec<Credential> =
            serde_json::from_slice(data).map_err(PersistenceError::from)?;

        let mut state = StoreState {
            next_id: 1,
            ..StoreState::default()
        };
        for credential in credentials {
            if state.by_key.contains_key(&credential.api_key) {
                return Err(GatewayError::Conflict(format!(
                    "duplicate API key for credential {}",
                    credential.id
                )));
            }
            state.insert(credential);
        }

        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Every credential, hashes included, as a JSON array
    pub async fn to_json(&self) -> Result<Vec<u8>, GatewayError> {
        let state = self.state.read().await;
        let data = serde_json::to_vec_pretty(&state.sorted()).map_err(PersistenceError::from)?;
        Ok(data)
    }

    /// Load from `path`, or start empty if the file does not exist
    pub async fn load_from_file(path: &Path) -> Result<Self, GatewayError> {
        match tokio::fs::read(path).await {
            Ok(data) => {
                let store = Self::load_json(&data)?;
                tracing::info!(path = %path.display(), "Loaded credentials");
                Ok(store)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(source) => Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            }
            .into()),
        }
    }

    /// Write every credential to `path`
    pub async fn save_to_file(&self, path: &Path) -> Result<(), GatewayError> {
        let state = self.state.read().await;
        write_atomically(path, &state.sorted()).await
    }

    /// Create a credential, generating key and secret where absent
    pub async fn add(&self, new: NewCredential) -> Result<IssuedCredential, GatewayError> {
        if new.name.trim().is_empty() {
            return Err(GatewayError::Validation("name is required".to_string()));
        }

        let api_key = new.api_key.unwrap_or_else(|| generate_token("apk_"));
        let secret = new.secret.unwrap_or_else(|| generate_token("aps_"));
        if api_key.is_empty() || secret.is_empty() {
            return Err(GatewayError::Validation(
                "apiKey and secret must not be empty".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if state.by_key.contains_key(&api_key) {
            return Err(GatewayError::Conflict(format!(
                "API key {} already exists",
                api_key
            )));
        }

        let credential = Credential {
            id: state.next_id,
            route_id: new.route_id,
            name: new.name,
            api_key,
            secret_hash: hash_secret(&secret),
            enabled: new.enabled.unwrap_or(true),
            created: Utc::now(),
            last_used: None,
        };
        state.insert(credential.clone());

        tracing::info!(
            id = credential.id,
            route_id = credential.route_id,
            "Credential created"
        );
        Ok(IssuedCredential {
            credential: credential.redacted(),
            secret,
        })
    }

    /// Remove a credential by ID; false if absent
    pub async fn delete(&self, id: u64) -> bool {
        let mut state = self.state.write().await;
        let Some(api_key) = state
            .by_key
            .values()
            .find(|c| c.id == id)
            .map(|c| c.api_key.clone())
        else {
            return false;
        };

        if let Some(credential) = state.by_key.remove(&api_key) {
            if let Some(keys) = state.by_route.get_mut(&credential.route_id) {
                keys.remove(&api_key);
                if keys.is_empty() {
                    state.by_route.remove(&credential.route_id);
                }
            }
        }
        true
    }

    /// All credentials, redacted, ordered by ID
    pub async fn list(&self) -> Vec<Credential> {
        let state = self.state.read().await;
        state.sorted().iter().map(Credential::redacted).collect()
    }

    /// Credentials bound to one route, redacted, ordered by ID
    pub async fn list_for_route(&self, route_id: u64) -> Vec<Credential> {
        let state = self.state.read().await;
        let Some(keys) = state.by_route.get(&route_id) else {
            return Vec::new();
        };

        let mut credentials: Vec<Credential> = keys
            .iter()
            .filter_map(|key| state.by_key.get(key))
            .map(Credential::redacted)
            .collect();
        credentials.sort_by_key(|c| c.id);
        credentials
    }

    /// Check a `Basic` authorization header against the credentials of a route.
    ///
    /// Any malformed header, unknown key, disabled credential, foreign route
    /// or wrong secret yields false. Success stamps `last_used`.
    pub async fn authenticate(&self, authorization: Option<&str>, route_id: u64) -> bool {
        let Some((api_key, secret)) = authorization.and_then(parse_basic) else {
            return false;
        };

        let credential_id = {
            let state = self.state.read().await;
            let bound = state
                .by_route
                .get(&route_id)
                .map_or(false, |keys| keys.contains(&api_key));
            if !bound {
                return false;
            }

            let Some(credential) = state.by_key.get(&api_key) else {
                return false;
            };
            if !credential.enabled || credential.route_id != route_id {
                return false;
            }
            if !constant_time_str_eq(&hash_secret(&secret), &credential.secret_hash) {
                return false;
            }
            credential.id
        };

        // Write lock only to stamp; the credential may have been replaced meanwhile
        let mut state = self.state.write().await;
        if let Some(credential) = state.by_key.get_mut(&api_key) {
            if credential.id == credential_id {
                credential.last_used = Some(Utc::now());
            }
        }
        true
    }

    /// Drop every credential bound to a route; returns how many were removed
    pub async fn remove_route(&self, route_id: u64) -> usize {
        let mut state = self.state.write().await;
        let Some(keys) = state.by_route.remove(&route_id) else {
            return 0;
        };
        for key in &keys {
            state.by_key.remove(key);
        }

        tracing::info!(route_id, removed = keys.len(), "Credentials of deleted route dropped");
        keys.len()
    }
}

/// Hex SHA-256 of a secret
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn generate_token(prefix: &str) -> String {
    let random: String = thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, random)
}

/// Split `Basic <base64(key:secret)>` into key and secret
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (key, secret) = decoded.split_once(':')?;
    Some((key.to_string(), secret.to_string()))
}

fn constant_time_str_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let max_len = left_bytes.len().max(right_bytes.len());
    let mut diff = left_bytes.len() ^ right_bytes.len();

    for i in 0..max_len {
        let l = left_bytes.get(i).copied().unwrap_or(0);
        let r = right_bytes.get(i).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }

    diff == 0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn basic(key: &str, secret: &str) -> String {
        format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", key, secret))
        )
    }

    fn new_credential(route_id: u64, key: &str, secret: &str) -> NewCredential {
        NewCredential {
            route_id,
            name: "ci".to_string(),
            api_key: Some(key.to_string()),
            secret: Some(secret.to_string()),
            enabled: None,
        }
    }

    #[tokio::test]
    async fn test_authenticate_valid_credential() {
        let store = CredentialStore::new();
        store.add(new_credential(5, "apk_1", "s3cret")).await.unwrap();

        let header = basic("apk_1", "s3cret");
        assert!(store.authenticate(Some(&header), 5).await);

        let listed = store.list_for_route(5).await;
        assert!(listed[0].last_used.is_some());
        assert!(listed[0].secret_hash.is_empty());
    }

    #[tokio::test]
    async fn test_scheme_is_case_insensitive_and_secret_may_contain_colon() {
        let store = CredentialStore::new();
        store.add(new_credential(1, "apk_c", "a:b")).await.unwrap();

        let header = basic("apk_c", "a:b").replacen("Basic", "bAsIc", 1);
        assert!(store.authenticate(Some(&header), 1).await);
    }

    #[tokio::test]
    async fn test_disabled_credential_is_rejected() {
        let store = CredentialStore::new();
        store
            .add(NewCredential {
                enabled: Some(false),
                ..new_credential(5, "apk_off", "pw")
            })
            .await
            .unwrap();

        assert!(!store.authenticate(Some(&basic("apk_off", "pw")), 5).await);
    }

    #[tokio::test]
    async fn test_credential_for_other_route_is_rejected() {
        let store = CredentialStore::new();
        store.add(new_credential(5, "apk_5", "pw")).await.unwrap();

        assert!(!store.authenticate(Some(&basic("apk_5", "pw")), 6).await);
    }

    #[tokio::test]
    async fn test_malformed_headers_are_rejected() {
        let store = CredentialStore::new();
        store.add(new_credential(1, "apk_1", "pw")).await.unwrap();

        assert!(!store.authenticate(None, 1).await);
        assert!(!store.authenticate(Some("Bearer abc"), 1).await);
        assert!(!store.authenticate(Some("Basic not-base64!"), 1).await);
        let no_colon = format!("Basic {}", general_purpose::STANDARD.encode("apk_1"));
        assert!(!store.authenticate(Some(&no_colon), 1).await);
        assert!(!store.authenticate(Some(&basic("apk_1", "wrong")), 1).await);
    }

    #[tokio::test]
    async fn test_duplicate_key_conflicts() {
        let store = CredentialStore::new();
        store.add(new_credential(1, "apk_dup", "a")).await.unwrap();

        let result = store.add(new_credential(2, "apk_dup", "b")).await;
        assert!(matches!(result, Err(GatewayError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_generated_key_and_secret() {
        let store = CredentialStore::new();
        let issued = store
            .add(NewCredential {
                route_id: 3,
                name: "generated".to_string(),
                ..NewCredential::default()
            })
            .await
            .unwrap();

        assert!(issued.credential.api_key.starts_with("apk_"));
        assert!(issued.secret.starts_with("aps_"));

        let header = basic(&issued.credential.api_key, &issued.secret);
        assert!(store.authenticate(Some(&header), 3).await);
    }

    #[tokio::test]
    async fn test_delete_unbinds_key() {
        let store = CredentialStore::new();
        let issued = store.add(new_credential(1, "apk_1", "pw")).await.unwrap();

        assert!(store.delete(issued.credential.id).await);
        assert!(!store.delete(issued.credential.id).await);
        assert!(store.list_for_route(1).await.is_empty());
        assert!(!store.authenticate(Some(&basic("apk_1", "pw")), 1).await);
    }

    #[tokio::test]
    async fn test_json_persistence_keeps_hashes() {
        let store = CredentialStore::new();
        store.add(new_credential(1, "apk_1", "pw")).await.unwrap();
        store.add(new_credential(2, "apk_2", "pw2")).await.unwrap();

        let data = store.to_json().await.unwrap();
        let restored = CredentialStore::load_json(&data).unwrap();

        assert!(restored.authenticate(Some(&basic("apk_2", "pw2")), 2).await);
        let issued = restored.add(new_credential(1, "apk_3", "x")).await.unwrap();
        assert_eq!(issued.credential.id, 3);
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load_from_file(&path).await.unwrap();
        assert!(store.list().await.is_empty());

        store.add(new_credential(1, "apk_1", "pw")).await.unwrap();
        store.save_to_file(&path).await.unwrap();

        let reloaded = CredentialStore::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_route_drops_its_credentials() {
        let store = CredentialStore::new();
        store.add(new_credential(1, "apk_a", "pw")).await.unwrap();
        store.add(new_credential(1, "apk_b", "pw")).await.unwrap();
        store.add(new_credential(2, "apk_c", "pw")).await.unwrap();

        assert_eq!(store.remove_route(1).await, 2);
        assert_eq!(store.remove_route(1).await, 0);

        assert!(store.list_for_route(1).await.is_empty());
        assert_eq!(store.list().await.len(), 1);
        assert!(!store.authenticate(Some(&basic("apk_a", "pw")), 1).await);
        assert!(store.authenticate(Some(&basic("apk_c", "pw")), 2).await);

        // Keys of a dropped route can be issued again
        store.add(new_credential(3, "apk_a", "pw")).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_authentication_stamps_last_used() {
        let store = Arc::new(CredentialStore::new());
        store.add(new_credential(1, "apk_1", "pw")).await.unwrap();

        let checks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let secret = if i % 2 == 0 { "pw" } else { "nope" };
                tokio::spawn(async move {
                    store.authenticate(Some(&basic("apk_1", secret)), 1).await
                })
            })
            .collect();

        let mut accepted = 0;
        for check in checks {
            if check.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 8);
        assert!(store.list().await[0].last_used.is_some());
    }

    #[test]
    fn test_hash_secret_is_hex_sha256() {
        assert_eq!(
            hash_secret("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
