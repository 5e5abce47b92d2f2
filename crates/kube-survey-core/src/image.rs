//! Container image reference parsing.
//!
//! Follows the registry conventions used by container runtimes: a first path
//! component that looks like a host (contains `.` or `:`, or is `localhost`)
//! names the registry, everything else lives on Docker Hub, and single-segment
//! Docker Hub repositories are implicitly under `library/`.

use std::fmt;

use crate::error::{CoreError, Result};

/// Registry host used for images without an explicit registry.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag assumed when a reference carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

const ECR_ARN_PREFIX: &str = "arn:aws:ecr";

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, e.g. `index.docker.io` or `quay.io:443`.
    pub registry: String,
    /// Repository path within the registry.
    pub repository: String,
    /// Tag, if one was written.
    pub tag: Option<String>,
    /// Digest (`algorithm:hex`), if one was written.
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference.
    ///
    /// ECR repository ARNs are accepted and reduced to their resource part.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidImageReference` if the reference is empty or
    /// malformed.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason| CoreError::InvalidImageReference {
            reference: reference.to_string(),
            reason,
        };

        let mut rest = reference.trim();
        if rest.starts_with(ECR_ARN_PREFIX) {
            // arn:partition:service:region:account:resource
            rest = rest
                .splitn(6, ':')
                .nth(5)
                .ok_or_else(|| invalid("incomplete ARN"))?;
        }
        if rest.is_empty() {
            return Err(invalid("empty reference"));
        }
        if rest.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (name, digest) = match rest.split_once('@') {
            Some((name, digest)) => {
                let valid = digest
                    .split_once(':')
                    .is_some_and(|(algo, hex)| !algo.is_empty() && !hex.is_empty());
                if !valid {
                    return Err(invalid("malformed digest"));
                }
                (name, Some(digest.to_string()))
            }
            None => (rest, None),
        };

        // a ':' after the last '/' separates the tag
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name[split + 1..];
                if tag.is_empty() {
                    return Err(invalid("empty tag"));
                }
                (&name[..split], Some(tag.to_string()))
            }
            None => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (normalize_registry(first), remainder.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository component"));
        }
        if repository.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository must be lowercase"));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The digest when present, otherwise the tag (defaulting to `latest`).
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// The tag when present, otherwise the digest (defaulting to `latest`).
    #[must_use]
    pub fn version(&self) -> &str {
        self.tag
            .as_deref()
            .or(self.digest.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Map Docker Hub aliases to the canonical index host.
#[must_use]
pub fn normalize_registry(host: &str) -> String {
    match host {
        "docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY.to_string(),
        other => other.to_string(),
    }
}

/// Resolve the content digest of a running container image.
///
/// Prefers the runtime-reported `image_id` (which may carry a scheme such as
/// `docker-pullable://`), falling back to a `sha256` digest pinned in the
/// image reference. Returns `None` when neither yields a digest.
#[must_use]
pub fn image_digest(image_id: &str, image: &str) -> Option<String> {
    let source = if image_id.is_empty() {
        match image.split_once('@') {
            Some((_, digest)) if digest.starts_with("sha256") => digest,
            _ => return None,
        }
    } else {
        image_id
    };
    let digest = source.rsplit_once('@').map_or(source, |(_, d)| d);
    let digest = digest.rsplit_once("://").map_or(digest, |(_, d)| d);
    digest
        .split_once(':')
        .filter(|(algo, hex)| !algo.is_empty() && !hex.is_empty() && !algo.contains('/'))
        .map(|_| digest.to_string())
}
