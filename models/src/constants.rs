/// Helper macro to avoid retyping the GCE compute URL prefix when creating further string
/// constants from it. When given no parameters, this returns the domain suffix shared by every
/// compute resource URL. When given a string literal parameter it prefixes it with the https
/// scheme and host used when building resource URLs.
#[macro_export]
macro_rules! gce_domain {
    () => {
        "googleapis.com/compute/v1/projects/"
    };
    ($host:literal) => {
        concat!("https://", $host, ".", gce_domain!())
    };
}

pub const USER_AGENT: &str = "spotter";

// Label keys
/// The compute instance label holding the drain deadline, encoded as epoch seconds.
pub const DRAIN_AT_LABEL: &str = "spotter-drain-at";

// GCE resource URLs
pub const GCE_URL_SCHEME: &str = "https";
pub const GCE_DOMAIN_SUFFIX: &str = gce_domain!();
pub const GCE_URL_PREFIX: &str = gce_domain!("content");

// API endpoints
pub const CONTAINER_API_ENDPOINT: &str = "https://container.googleapis.com/v1";
pub const COMPUTE_API_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";
pub const METADATA_TOKEN_ENDPOINT: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// OAuth scope granting access to the compute and container APIs.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

// Environment variables
pub const ACCESS_TOKEN_ENV_VAR: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

// Kubernetes
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
pub const DAEMONSET_KIND: &str = "DaemonSet";
