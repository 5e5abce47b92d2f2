//! Cluster platform detection from the API server's git version.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::gateway::ClusterGateway;
use crate::Result;

/// Platform name used when the version carries no distribution suffix.
pub const DEFAULT_PLATFORM: &str = "k8s";

static DISTRIBUTION_VERSION: OnceLock<Regex> = OnceLock::new();
static PLAIN_VERSION: OnceLock<Regex> = OnceLock::new();

fn distribution_version() -> &'static Regex {
    DISTRIBUTION_VERSION.get_or_init(|| {
        Regex::new(r"v(\d+\.\d+)\.\d+[-+](\w+)(?:[.\-])\w+").expect("valid distribution regex")
    })
}

fn plain_version() -> &'static Regex {
    PLAIN_VERSION.get_or_init(|| Regex::new(r"v?(\d+\.\d+)").expect("valid version regex"))
}

/// The Kubernetes distribution a cluster runs.
///
/// `v1.27.4-eks-2d98532` is `eks` at `1.27`; `v1.29.1` is `k8s` at `1.29`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPlatform {
    /// Distribution name such as `k8s`, `eks` or `gke`.
    pub name: String,
    /// `major.minor` version.
    pub version: String,
}

impl ClusterPlatform {
    /// Derive the platform from a server git version.
    #[must_use]
    pub fn from_git_version(git_version: &str) -> Self {
        if let Some(caps) = distribution_version().captures(git_version) {
            return Self {
                name: caps[2].to_string(),
                version: caps[1].to_string(),
            };
        }
        let version = plain_version()
            .captures(git_version)
            .map(|caps| caps[1].to_string())
            .unwrap_or_default();
        Self {
            name: DEFAULT_PLATFORM.to_string(),
            version,
        }
    }
}

impl fmt::Display for ClusterPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// Ask the API server which platform the cluster runs.
///
/// # Errors
///
/// Returns an error if the server version cannot be read.
pub async fn detect_platform(gateway: &dyn ClusterGateway) -> Result<ClusterPlatform> {
    let version = gateway.server_version().await?;
    Ok(ClusterPlatform::from_git_version(&version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateway;

    #[test]
    fn distribution_suffixes_name_the_platform() {
        let eks = ClusterPlatform::from_git_version("v1.27.4-eks-2d98532");
        assert_eq!(eks.name, "eks");
        assert_eq!(eks.version, "1.27");

        let gke = ClusterPlatform::from_git_version("v1.28.3-gke.1286000");
        assert_eq!(gke.name, "gke");
        assert_eq!(gke.version, "1.28");

        let ocp = ClusterPlatform::from_git_version("v1.27.6+ocp-5ef3a1b");
        assert_eq!(ocp.to_string(), "ocp-1.27");
    }

    #[test]
    fn plain_versions_are_vanilla_kubernetes() {
        let plain = ClusterPlatform::from_git_version("v1.29.1");
        assert_eq!(plain.name, DEFAULT_PLATFORM);
        assert_eq!(plain.version, "1.29");

        let bare = ClusterPlatform::from_git_version("1.30.0");
        assert_eq!(bare.version, "1.30");

        // A suffix without a separated build tag is not a distribution.
        let rke = ClusterPlatform::from_git_version("v1.26.8+rke2r1");
        assert_eq!(rke.name, DEFAULT_PLATFORM);
    }

    #[tokio::test]
    async fn detects_from_the_server() {
        let mock = MockGateway::new();
        mock.set_server_version("v1.25.16-eks-8cb36c9");
        let platform = detect_platform(&mock).await.unwrap();
        assert_eq!(platform.name, "eks");
    }
}
