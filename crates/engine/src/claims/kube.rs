use async_trait::async_trait;
use claimchain_api::{ClaimApi, KubeClient};
use claimchain_types::{ClaimKind, ClaimMetadata, ClaimRef, ClaimStatus, Condition, ResourceClaim};
use claimchain_util::truncate_for_summary;
use heck::ToKebabCase;
use indexmap::IndexMap;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use super::{ClaimClient, ClaimError, ClaimHandle, spec_matches};

const ERROR_BODY_LIMIT: usize = 200;

/// [`ClaimClient`] backed by the cluster's custom-resource REST endpoints.
#[derive(Debug, Clone)]
pub struct KubeClaimClient {
    client: KubeClient,
    api: ClaimApi,
}

impl KubeClaimClient {
    pub fn new(client: KubeClient, api: ClaimApi) -> Self {
        Self { client, api }
    }

    async fn fetch(&self, claim_ref: &ClaimRef) -> Result<ResourceClaim, ClaimError> {
        let path = self.api.object_path(claim_ref.kind, &claim_ref.namespace, &claim_ref.name);
        let response = self
            .client
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(|error| ClaimError::unavailable(claim_ref, "get", error.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClaimError::NotFound { claim: claim_ref.clone() });
        }
        if !status.is_success() {
            return Err(ClaimError::unavailable(claim_ref, "get", http_failure(response).await));
        }

        let body: JsonValue = response.json().await.map_err(|error| ClaimError::Decode {
            claim: claim_ref.clone(),
            message: error.to_string(),
        })?;
        decode_claim(claim_ref, &body)
    }
}

#[async_trait]
impl ClaimClient for KubeClaimClient {
    async fn create(&self, claim: &ResourceClaim) -> Result<ClaimHandle, ClaimError> {
        let claim_ref = claim.claim_ref();
        match self.fetch(&claim_ref).await {
            Ok(existing) => return existing_handle(&claim_ref, claim, &existing),
            Err(ClaimError::NotFound { .. }) => {}
            Err(error) => return Err(error),
        }

        debug!(claim = %claim_ref, "creating claim");
        let path = self.api.collection_path(claim.kind, &claim.metadata.namespace);
        let response = self
            .client
            .request(Method::POST, &path)
            .json(&encode_claim(&self.api, claim))
            .send()
            .await
            .map_err(|error| ClaimError::unavailable(&claim_ref, "create", error.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(ClaimHandle {
                claim: claim_ref,
                created: true,
            }),
            StatusCode::CONFLICT => {
                debug!(claim = %claim_ref, "claim appeared concurrently; comparing specs");
                let existing = self.fetch(&claim_ref).await?;
                existing_handle(&claim_ref, claim, &existing)
            }
            _ => Err(ClaimError::unavailable(&claim_ref, "create", http_failure(response).await)),
        }
    }

    async fn get(&self, kind: ClaimKind, name: &str, namespace: &str) -> Result<ResourceClaim, ClaimError> {
        self.fetch(&ClaimRef::new(kind, name, namespace)).await
    }

    async fn delete(&self, kind: ClaimKind, name: &str, namespace: &str) -> Result<(), ClaimError> {
        let claim_ref = ClaimRef::new(kind, name, namespace);
        let path = self.api.object_path(kind, namespace, name);
        let response = self
            .client
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(|error| ClaimError::unavailable(&claim_ref, "delete", error.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(claim = %claim_ref, "claim already gone");
                Ok(())
            }
            _ => Err(ClaimError::unavailable(&claim_ref, "delete", http_failure(response).await)),
        }
    }
}

fn existing_handle(claim_ref: &ClaimRef, desired: &ResourceClaim, existing: &ResourceClaim) -> Result<ClaimHandle, ClaimError> {
    if spec_matches(&desired.spec, &existing.spec) {
        Ok(ClaimHandle {
            claim: claim_ref.clone(),
            created: false,
        })
    } else {
        Err(ClaimError::Conflict { claim: claim_ref.clone() })
    }
}

async fn http_failure(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("HTTP {}: {}", status, truncate_for_summary(body.trim(), ERROR_BODY_LIMIT))
}

/// Renders a claim as the custom-resource body posted to the API server.
pub fn encode_claim(api: &ClaimApi, claim: &ResourceClaim) -> JsonValue {
    json!({
        "apiVersion": api.api_version(),
        "kind": claim.kind.as_str(),
        "metadata": {
            "name": claim.metadata.name,
            "namespace": claim.metadata.namespace,
            "labels": claim.metadata.labels,
            "annotations": claim.metadata.annotations,
        },
        "spec": claim.spec,
    })
}

#[derive(Deserialize)]
struct ClaimDocument {
    metadata: ClaimMetadata,
    #[serde(default)]
    spec: JsonValue,
    #[serde(default)]
    status: Option<JsonValue>,
}

/// Decodes a custom-resource document returned by the API server.
///
/// `status.conditions` and `status.ready` feed readiness; every other string
/// leaf of `status` becomes a derived output keyed by its kebab-cased path.
pub fn decode_claim(claim_ref: &ClaimRef, body: &JsonValue) -> Result<ResourceClaim, ClaimError> {
    let decode_error = |message: String| ClaimError::Decode {
        claim: claim_ref.clone(),
        message,
    };

    let document = ClaimDocument::deserialize(body).map_err(|error| decode_error(error.to_string()))?;
    let status = match document.status {
        Some(status @ JsonValue::Object(_)) => {
            let conditions: Vec<Condition> = match status.get("conditions") {
                Some(conditions) => {
                    serde_json::from_value(conditions.clone()).map_err(|error| decode_error(format!("status.conditions: {}", error)))?
                }
                None => Vec::new(),
            };
            let mut derived_outputs = IndexMap::new();
            flatten_status(None, &status, &mut derived_outputs);
            Some(ClaimStatus {
                ready: status.get("ready").and_then(JsonValue::as_bool).unwrap_or(false),
                conditions,
                derived_outputs,
            })
        }
        _ => None,
    };

    Ok(ResourceClaim {
        kind: claim_ref.kind,
        metadata: document.metadata,
        spec: document.spec,
        status,
    })
}

fn flatten_status(prefix: Option<&str>, value: &JsonValue, outputs: &mut IndexMap<String, String>) {
    let JsonValue::Object(fields) = value else {
        return;
    };
    for (key, field) in fields {
        if prefix.is_none() && matches!(key.as_str(), "conditions" | "ready") {
            continue;
        }
        let segment = key.to_kebab_case();
        let path = match prefix {
            Some(prefix) => format!("{}-{}", prefix, segment),
            None => segment,
        };
        match field {
            JsonValue::String(text) => {
                outputs.insert(path, text.clone());
            }
            JsonValue::Object(_) => flatten_status(Some(&path), field, outputs),
            _ => {}
        }
    }
}
