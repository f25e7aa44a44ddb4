use crate::{ApiResourceInfo, ConstraintKind, RawDocument, ResourceClient};
use tokio::time;
use tracing::debug;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
#[error("constraint kinds unavailable for {group}/{version}: {source}")]
pub struct DiscoveryUnavailable {
    pub group: String,
    pub version: String,
    #[source]
    source: BoxError,
}

#[derive(Debug, thiserror::Error)]
pub enum ListFailure {
    #[error("failed to list {kind}: {source}")]
    Client {
        kind: String,
        #[source]
        source: BoxError,
    },

    #[error("listing {kind} did not complete within {timeout:?}")]
    TimedOut { kind: String, timeout: time::Duration },
}

/// Returns the listable constraint kinds served under `group/version`, in the order the API
/// server advertises them.
pub async fn discover<C>(
    client: &C,
    group: &str,
    version: &str,
) -> Result<Vec<ConstraintKind>, DiscoveryUnavailable>
where
    C: ResourceClient + ?Sized,
{
    let resources =
        client
            .list_kinds(group, version)
            .await
            .map_err(|error| DiscoveryUnavailable {
                group: group.to_string(),
                version: version.to_string(),
                source: error.into(),
            })?;

    Ok(resources
        .into_iter()
        .filter_map(|resource| {
            if resource.name.ends_with("/status") {
                debug!(resource = %resource.name, "Skipping subresource");
                return None;
            }
            if !resource.verbs.iter().any(|v| v == "list") {
                debug!(resource = %resource.name, verbs = ?resource.verbs, "Cannot list resource");
                return None;
            }
            Some(constraint_kind(resource, group, version))
        })
        .collect())
}

fn constraint_kind(resource: ApiResourceInfo, group: &str, version: &str) -> ConstraintKind {
    let ApiResourceInfo {
        group: resource_group,
        version: resource_version,
        kind,
        name,
        ..
    } = resource;
    ConstraintKind {
        group: if resource_group.is_empty() {
            group.to_string()
        } else {
            resource_group
        },
        version: if resource_version.is_empty() {
            version.to_string()
        } else {
            resource_version
        },
        kind,
        plural: name,
    }
}

/// Lists every instance of `kind`, failing if the API server does not respond within `timeout`.
pub async fn list<C>(
    client: &C,
    kind: &ConstraintKind,
    timeout: time::Duration,
) -> Result<Vec<RawDocument>, ListFailure>
where
    C: ResourceClient + ?Sized,
{
    match time::timeout(timeout, client.list_instances(kind)).await {
        Ok(Ok(docs)) => Ok(docs),
        Ok(Err(error)) => Err(ListFailure::Client {
            kind: kind.kind.clone(),
            source: error.into(),
        }),
        Err(_) => Err(ListFailure::TimedOut {
            kind: kind.kind.clone(),
            timeout,
        }),
    }
}

impl ListFailure {
    pub fn kind(&self) -> &str {
        match self {
            Self::Client { kind, .. } | Self::TimedOut { kind, .. } => kind,
        }
    }
}
