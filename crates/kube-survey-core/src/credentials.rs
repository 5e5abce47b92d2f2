//! Registry credentials built from image pull secrets.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::image::{normalize_registry, ImageReference};

/// Secret type of modern docker config secrets.
pub const SECRET_TYPE_DOCKER_CONFIG_JSON: &str = "kubernetes.io/dockerconfigjson";
/// Data key of modern docker config secrets.
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
/// Secret type of legacy docker config secrets.
pub const SECRET_TYPE_DOCKERCFG: &str = "kubernetes.io/dockercfg";
/// Data key of legacy docker config secrets.
pub const DOCKERCFG_KEY: &str = ".dockercfg";

/// Username and password for one registry host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryAuth {
    /// Registry host the credentials apply to.
    pub host: String,
    /// Username, or several comma-joined usernames.
    pub username: String,
    /// Password, or several comma-joined passwords.
    pub password: String,
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Registry host to credentials, built in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialMap {
    auths: BTreeMap<String, RegistryAuth>,
}

impl CredentialMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add credentials for `host`.
    ///
    /// A host seen before keeps its entry and gains the new username and
    /// password appended after a comma.
    pub fn insert(&mut self, host: &str, username: &str, password: &str) {
        self.auths
            .entry(host.to_string())
            .and_modify(|existing| {
                existing.username = format!("{},{username}", existing.username);
                existing.password = format!("{},{password}", existing.password);
            })
            .or_insert_with(|| RegistryAuth {
                host: host.to_string(),
                username: username.to_string(),
                password: password.to_string(),
            });
    }

    /// Fold a parsed docker config into the map.
    ///
    /// # Errors
    ///
    /// Returns an error if an auth key does not name a host.
    pub fn merge_docker_config(&mut self, config: &DockerConfig) -> Result<()> {
        for (key, entry) in &config.auths {
            let host = server_from_auth_key(key)?;
            self.insert(&host, &entry.username, &entry.password);
        }
        Ok(())
    }

    /// Credentials for `host`, matched exactly.
    #[must_use]
    pub fn get(&self, host: &str) -> Option<&RegistryAuth> {
        self.auths.get(host)
    }

    /// Find credentials for an image.
    ///
    /// An exact host match wins; otherwise the first `*.domain` entry whose
    /// domain is a parent of the image host is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the image reference cannot be parsed.
    pub fn lookup(&self, image: &str) -> Result<Option<&RegistryAuth>> {
        let reference = ImageReference::parse(image)?;
        if let Some(auth) = self.auths.get(&reference.registry) {
            return Ok(Some(auth));
        }
        Ok(self
            .auths
            .iter()
            .filter_map(|(host, auth)| host.strip_prefix("*.").map(|domain| (domain, auth)))
            .find(|(domain, _)| {
                reference
                    .registry
                    .strip_suffix(domain)
                    .is_some_and(|sub| sub.ends_with('.'))
            })
            .map(|(_, auth)| auth))
    }

    /// Number of hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.auths.len()
    }

    /// Whether no credentials are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }

    /// Iterate over host and credentials.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegistryAuth)> {
        self.auths.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One entry of a docker config `auths` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DockerAuthEntry {
    /// Username.
    #[serde(default)]
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Base64 `user:pass`, used to fill a missing username or password.
    #[serde(default)]
    pub auth: String,
}

/// A parsed docker config payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DockerConfig {
    /// Auth key (host or URL) to credentials.
    #[serde(default)]
    pub auths: BTreeMap<String, DockerAuthEntry>,
}

impl DockerConfig {
    /// Parse a docker config.
    ///
    /// Modern payloads wrap the host table in `{"auths": ...}`; legacy
    /// `.dockercfg` payloads are the bare host table.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON of the expected
    /// shape or an `auth` field is not base64 `user:pass`.
    pub fn parse(data: &[u8], legacy: bool) -> Result<Self> {
        let mut config = if legacy {
            Self {
                auths: serde_json::from_slice(data)?,
            }
        } else {
            serde_json::from_slice::<Self>(data)?
        };

        for (key, entry) in &mut config.auths {
            if entry.auth.is_empty() || (!entry.username.is_empty() && !entry.password.is_empty()) {
                continue;
            }
            let decoded = STANDARD
                .decode(entry.auth.trim())
                .map_err(|e| CoreError::DockerConfig(format!("auth for {key}: {e}")))?;
            let decoded = String::from_utf8(decoded)
                .map_err(|e| CoreError::DockerConfig(format!("auth for {key}: {e}")))?;
            let (user, pass) = decoded.split_once(':').ok_or_else(|| {
                CoreError::DockerConfig(format!("auth for {key} is not user:password"))
            })?;
            if entry.username.is_empty() {
                entry.username = user.to_string();
            }
            if entry.password.is_empty() {
                entry.password = pass.to_string();
            }
        }

        Ok(config)
    }
}

/// Reduce a docker config auth key to a registry host.
///
/// Keys may be bare hosts or URLs such as `https://index.docker.io/v1/`.
///
/// # Errors
///
/// Returns an error if no host remains.
pub fn server_from_auth_key(key: &str) -> Result<String> {
    let without_scheme = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = without_scheme.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(CoreError::DockerConfig(format!(
            "auth key {key:?} does not name a host"
        )));
    }
    Ok(normalize_registry(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modern_config_with_auth_field() {
        let payload = format!(
            r#"{{"auths":{{"https://index.docker.io/v1/":{{"auth":"{}"}}}}}}"#,
            STANDARD.encode("alice:s3cret")
        );
        let config = DockerConfig::parse(payload.as_bytes(), false).unwrap();
        let entry = &config.auths["https://index.docker.io/v1/"];
        assert_eq!(entry.username, "alice");
        assert_eq!(entry.password, "s3cret");
    }

    #[test]
    fn parses_legacy_config() {
        let payload = br#"{"quay.io":{"username":"bob","password":"pw"}}"#;
        let config = DockerConfig::parse(payload, true).unwrap();
        assert_eq!(config.auths["quay.io"].username, "bob");
    }

    #[test]
    fn rejects_broken_auth_field() {
        let payload = br#"{"auths":{"quay.io":{"auth":"!!!"}}}"#;
        assert!(DockerConfig::parse(payload, false).is_err());
    }

    #[test]
    fn auth_keys_become_hosts() {
        assert_eq!(server_from_auth_key("https://index.docker.io/v1/").unwrap(), "index.docker.io");
        assert_eq!(server_from_auth_key("docker.io").unwrap(), "index.docker.io");
        assert_eq!(server_from_auth_key("http://reg.local:5000/x").unwrap(), "reg.local:5000");
        assert_eq!(server_from_auth_key("*.azurecr.io").unwrap(), "*.azurecr.io");
        assert!(server_from_auth_key("https://").is_err());
    }

    #[test]
    fn colliding_hosts_are_comma_joined_in_order() {
        let mut map = CredentialMap::new();
        map.insert("quay.io", "first", "one");
        map.insert("quay.io", "second", "two");

        let auth = map.get("quay.io").unwrap();
        assert_eq!(auth.username, "first,second");
        assert_eq!(auth.password, "one,two");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn lookup_prefers_exact_then_wildcard() {
        let mut map = CredentialMap::new();
        map.insert("index.docker.io", "hub", "x");
        map.insert("*.azurecr.io", "acr", "y");
        map.insert("exact.azurecr.io", "exact", "z");

        let user = |image: &str| map.lookup(image).unwrap().map(|a| a.username.clone());
        assert_eq!(user("nginx:1.14").as_deref(), Some("hub"));
        assert_eq!(user("exact.azurecr.io/app").as_deref(), Some("exact"));
        assert_eq!(user("other.azurecr.io/app:1").as_deref(), Some("acr"));
        assert_eq!(user("gcr.io/app"), None);
    }

    #[test]
    fn wildcards_only_cover_subdomains() {
        let mut map = CredentialMap::new();
        map.insert("*.example.com", "sub", "x");
        map.insert("*example.org", "bare", "y");

        assert!(map.lookup("reg.example.com/app").unwrap().is_some());
        assert!(map.lookup("badexample.com/app").unwrap().is_none());
        assert!(map.lookup("example.com/app").unwrap().is_none());
        assert!(map.lookup("badexample.org/app").unwrap().is_none());
    }

    #[test]
    fn unparsable_images_are_errors() {
        let mut map = CredentialMap::new();
        map.insert("index.docker.io", "hub", "x");
        assert!(matches!(
            map.lookup("NotAnImage"),
            Err(CoreError::InvalidImageReference { .. })
        ));
    }

    #[test]
    fn debug_redacts_password() {
        let auth = RegistryAuth {
            host: "quay.io".into(),
            username: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
