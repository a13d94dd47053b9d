//! Parsing and building of fully-qualified GCE resource URLs.
//!
//! Resource URLs take the form
//! `https://<host>.googleapis.com/compute/v1/projects/<project>/zones/<zone>/<kind>/<name>`.
use crate::constants::{GCE_DOMAIN_SUFFIX, GCE_URL_PREFIX, GCE_URL_SCHEME};

use snafu::{ensure, OptionExt};
use std::fmt;

/// The kinds of zonal compute resources referenced by URL.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    InstanceGroupManagers,
    Instances,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstanceGroupManagers => "instanceGroupManagers",
            Self::Instances => "instances",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (project, zone, name) coordinates of a zonal compute resource.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ResourceLocation {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl ResourceLocation {
    pub fn new<S1, S2, S3>(project: S1, zone: S2, name: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        ResourceLocation {
            project: project.into(),
            zone: zone.into(),
            name: name.into(),
        }
    }

    /// Builds the fully-qualified URL of this resource.
    pub fn to_url(&self, kind: ResourceKind) -> String {
        resource_url(&self.project, &self.zone, kind, &self.name)
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.name)
    }
}

/// Builds a fully-qualified resource URL.
pub fn resource_url(project: &str, zone: &str, kind: ResourceKind, name: &str) -> String {
    format!("{}{}/zones/{}/{}/{}", GCE_URL_PREFIX, project, zone, kind, name)
}

/// Parses a fully-qualified resource URL, checking that it refers to a resource of the expected kind.
pub fn parse_resource_url(url: &str, expected_kind: ResourceKind) -> Result<ResourceLocation> {
    ensure!(
        url.starts_with(GCE_URL_SCHEME),
        error::MalformedUrlSnafu { url, expected_kind }
    );

    let (_, path) = url
        .split_once(GCE_DOMAIN_SUFFIX)
        .context(error::MalformedUrlSnafu { url, expected_kind })?;

    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        [project, "zones", zone, kind, name] => {
            ensure!(
                *kind == expected_kind.as_str(),
                error::ResourceKindMismatchSnafu {
                    expected_kind,
                    actual_kind: kind.to_string(),
                }
            );
            Ok(ResourceLocation::new(*project, *zone, *name))
        }
        _ => error::MalformedUrlSnafu { url, expected_kind }.fail(),
    }
}

/// Extracts the trailing name from a zone URL such as `.../projects/<project>/zones/<zone>`.
/// Bare zone names are returned unchanged.
pub fn zone_name(zone_url: &str) -> &str {
    zone_url.rsplit('/').next().unwrap_or(zone_url)
}

pub mod error {
    use super::ResourceKind;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum LocatorError {
        #[snafu(display(
            "Wrong url: expected format https://content.googleapis.com/compute/v1/projects/<project-id>/zones/<zone>/{}/<name>, got '{}'",
            expected_kind,
            url
        ))]
        MalformedUrl {
            url: String,
            expected_kind: ResourceKind,
        },

        #[snafu(display(
            "Wrong resource in url: expected '{}', got '{}'",
            expected_kind,
            actual_kind
        ))]
        ResourceKindMismatch {
            expected_kind: ResourceKind,
            actual_kind: String,
        },
    }
}

pub use error::LocatorError;
type Result<T> = std::result::Result<T, LocatorError>;
