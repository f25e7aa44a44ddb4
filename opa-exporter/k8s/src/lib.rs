#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Result;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;
use kube::{
    api::{Api, ApiResource, DynamicObject, ListParams},
    core::GroupVersionKind,
};
use opa_exporter_core::{ApiResourceInfo, ConstraintKind, RawDocument, ResourceClient};
use tracing::debug;

pub use kube::Client;

/// Lists constraints through the Kubernetes API.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

// === impl KubeResourceClient ===

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for KubeResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceClient").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ResourceClient for KubeResourceClient {
    async fn list_kinds(&self, group: &str, version: &str) -> Result<Vec<ApiResourceInfo>> {
        let list = self
            .client
            .list_api_group_resources(&format!("{group}/{version}"))
            .await?;
        Ok(list.resources.iter().map(api_resource_info).collect())
    }

    async fn list_instances(&self, kind: &ConstraintKind) -> Result<Vec<RawDocument>> {
        let api = Api::<DynamicObject>::all_with(self.client.clone(), &api_resource(kind));
        let list = api.list(&ListParams::default()).await?;
        debug!(kind = %kind.kind, items = list.items.len(), "Listed constraints");
        list.items
            .into_iter()
            .map(|obj| to_document(obj, kind))
            .collect()
    }
}

fn api_resource_info(resource: &APIResource) -> ApiResourceInfo {
    ApiResourceInfo {
        group: resource.group.clone().unwrap_or_default(),
        version: resource.version.clone().unwrap_or_default(),
        kind: resource.kind.clone(),
        name: resource.name.clone(),
        verbs: resource.verbs.clone(),
    }
}

fn api_resource(kind: &ConstraintKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
    ApiResource::from_gvk_with_plural(&gvk, &kind.plural)
}

/// Items in a list response usually omit their type information, so it is filled in from the
/// kind that was listed.
fn to_document(obj: DynamicObject, kind: &ConstraintKind) -> Result<RawDocument> {
    let mut doc = serde_json::to_value(obj)?;
    if let Some(fields) = doc.as_object_mut() {
        fields
            .entry("apiVersion")
            .or_insert_with(|| kind.api_version().into());
        fields
            .entry("kind")
            .or_insert_with(|| kind.kind.clone().into());
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use opa_exporter_core::normalize;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn mk_kind() -> ConstraintKind {
        ConstraintKind {
            group: "constraints.gatekeeper.sh".to_string(),
            version: "v1beta1".to_string(),
            kind: "K8sRequiredLabels".to_string(),
            plural: "k8srequiredlabels".to_string(),
        }
    }

    #[test]
    fn list_item_gets_type_info() {
        let kind = mk_kind();
        let obj = DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("ns-must-have-owner".to_string()),
                ..ObjectMeta::default()
            },
            data: json!({
                "spec": {"enforcementAction": "dryrun"},
                "status": {
                    "totalViolations": 1,
                    "violations": [{
                        "enforcementAction": "dryrun",
                        "kind": "Namespace",
                        "message": "you must provide labels: {\"owner\"}",
                        "name": "default",
                    }],
                },
            }),
        };

        let doc = to_document(obj, &kind).expect("object must serialize");
        assert_eq!(doc["apiVersion"], json!("constraints.gatekeeper.sh/v1beta1"));
        assert_eq!(doc["kind"], json!("K8sRequiredLabels"));

        let constraint = normalize(&doc).expect("document must normalize");
        assert_eq!(constraint.kind, "K8sRequiredLabels");
        assert_eq!(constraint.name, "ns-must-have-owner");
        assert_eq!(constraint.enforcement_action, "dryrun");
        assert_eq!(constraint.total_violations, 1.0);
        assert_eq!(constraint.violations.len(), 1);
        assert_eq!(constraint.violations[0].namespace, None);
    }

    #[test]
    fn existing_type_info_is_kept() {
        let kind = mk_kind();
        let mut obj = DynamicObject::new("a", &api_resource(&kind)).data(json!({}));
        obj.types
            .as_mut()
            .expect("new objects carry type info")
            .kind = "Other".to_string();

        let doc = to_document(obj, &kind).expect("object must serialize");
        assert_eq!(doc["kind"], json!("Other"));
        assert_eq!(doc["metadata"]["name"], json!("a"));
    }

    #[test]
    fn api_resource_uses_plural() {
        let ar = api_resource(&mk_kind());
        assert_eq!(ar.api_version, "constraints.gatekeeper.sh/v1beta1");
        assert_eq!(ar.plural, "k8srequiredlabels");
        assert_eq!(ar.kind, "K8sRequiredLabels");
    }

    #[test]
    fn converts_discovered_resources() {
        let resource = APIResource {
            name: "k8srequiredlabels/status".to_string(),
            kind: "K8sRequiredLabels".to_string(),
            namespaced: false,
            verbs: vec!["get".to_string(), "patch".to_string()],
            ..APIResource::default()
        };
        assert_eq!(
            api_resource_info(&resource),
            ApiResourceInfo {
                group: String::new(),
                version: String::new(),
                kind: "K8sRequiredLabels".to_string(),
                name: "k8srequiredlabels/status".to_string(),
                verbs: vec!["get".to_string(), "patch".to_string()],
            }
        );
    }
}
