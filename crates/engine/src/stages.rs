//! The fixed stage chain and the claims each stage asks for.
//!
//! A stage turns the validated contract, the resolved names, and the outputs
//! of earlier stages into one claim. Which stages run, and in which order, is
//! decided by [`stages_for`] from the resource type alone.

use std::collections::BTreeMap;

use claimchain_types::{
    AppContainerParameters, ClaimKind, OutputLedger, ParameterContract, RepositoryVisibility, ResourceClaim, ResourceParameters,
    ResourceType, VClusterParameters, is_dns1123_name,
};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue, json};
use thiserror::Error;

use crate::resolve::ResolvedNames;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "claimchain";
pub const RESOURCE_TYPE_LABEL: &str = "claimchain.io/resource-type";
pub const ENVIRONMENT_TIER_LABEL: &str = "claimchain.io/environment-tier";
pub const REQUESTED_BY_ANNOTATION: &str = "claimchain.io/requested-by";
pub const DESCRIPTION_ANNOTATION: &str = "claimchain.io/description";
pub const RUN_ID_ANNOTATION: &str = "claimchain.io/run-id";

/// Ledger keys seeded before the first stage runs.
pub const RESOURCE_NAME_KEY: &str = "resource-name";
pub const NAMESPACE_KEY: &str = "namespace";
pub const REPOSITORY_NAME_KEY: &str = "repository-name";
pub const TARGET_VCLUSTER_KEY: &str = "target-vcluster";
pub const FRAMEWORK_KEY: &str = "framework";

/// Ledger keys appended by stages.
pub const VCLUSTER_NAME_KEY: &str = "vcluster-name";
pub const APP_CONTAINER_NAME_KEY: &str = "app-container-name";
pub const MICROSERVICE_NAME_KEY: &str = "microservice-name";

/// Ledger keys read back from the app container's own spec, so a reused
/// parent container keeps its repository and cluster.
pub const CONTAINER_REPOSITORY_KEY: &str = "app-container-repository";
pub const CONTAINER_VCLUSTER_KEY: &str = "app-container-vcluster";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("stage {stage} requires output '{key}' from an earlier stage")]
    MissingInput { stage: &'static str, key: &'static str },

    #[error("derived claim name '{name}' for stage {stage} is not a valid DNS-1123 name")]
    InvalidName { stage: &'static str, name: String },
}

/// Everything a stage may read while building its claim.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub contract: &'a ParameterContract,
    pub names: &'a ResolvedNames,
    pub outputs: &'a OutputLedger,
    pub run_id: &'a str,
}

impl<'a> StageContext<'a> {
    fn require(&self, stage: &'static str, key: &'static str) -> Result<&'a str, StageError> {
        self.outputs.get(key).ok_or(StageError::MissingInput { stage, key })
    }
}

/// One claim-create-and-wait unit of a run.
pub trait Stage: Send + Sync {
    fn kind(&self) -> ClaimKind;

    /// Ledger key the stage publishes its claim name under.
    fn output_key(&self) -> &'static str;

    /// Ledger keys that must exist before the stage can build its claim.
    fn required_inputs(&self) -> &'static [&'static str];

    /// Name of the claim this stage owns.
    fn claim_name(&self, context: &StageContext<'_>) -> String;

    /// Kind-specific claim spec.
    fn spec(&self, context: &StageContext<'_>) -> Result<JsonValue, StageError>;

    fn name(&self) -> &'static str {
        self.kind().stage_name()
    }

    /// Values later stages read from this stage's claim spec, whether the
    /// run created the claim or found it in place.
    fn spec_outputs(&self, _spec: &JsonValue) -> IndexMap<String, String> {
        IndexMap::new()
    }

    /// Assembles the full claim, including labels and annotations.
    fn build_claim(&self, context: &StageContext<'_>) -> Result<ResourceClaim, StageError> {
        for key in self.required_inputs() {
            context.require(self.name(), key)?;
        }

        let name = self.claim_name(context);
        if !is_dns1123_name(&name) {
            return Err(StageError::InvalidName { stage: self.name(), name });
        }

        let mut spec = self.spec(context)?;
        if self.kind() == terminal_kind(context.contract.resource_type())
            && !context.contract.advanced.is_empty()
            && let JsonValue::Object(fields) = &mut spec
        {
            fields.insert("advanced".to_string(), json!(context.contract.advanced));
        }

        let mut claim = ResourceClaim::new(self.kind(), name, context.contract.namespace(), spec);
        claim.metadata.labels = claim_labels(context.contract);
        claim.metadata.annotations = claim_annotations(context);
        Ok(claim)
    }
}

/// Claim kind that represents the requested resource itself.
pub fn terminal_kind(resource_type: ResourceType) -> ClaimKind {
    match resource_type {
        ResourceType::Microservice => ClaimKind::Microservice,
        ResourceType::AppContainer => ClaimKind::AppContainer,
        ResourceType::VCluster => ClaimKind::VCluster,
    }
}

/// Ordered stage chain for a resource type.
pub fn stages_for(resource_type: ResourceType) -> Vec<Box<dyn Stage>> {
    match resource_type {
        ResourceType::Microservice => vec![Box::new(VClusterStage), Box::new(AppContainerStage), Box::new(MicroserviceStage)],
        ResourceType::AppContainer => vec![Box::new(VClusterStage), Box::new(AppContainerStage)],
        ResourceType::VCluster => vec![Box::new(VClusterStage)],
    }
}

/// Seeds the output ledger with values every stage may consume.
pub fn seed_outputs(contract: &ParameterContract, names: &ResolvedNames) -> OutputLedger {
    let mut outputs = OutputLedger::new();
    outputs.append(RESOURCE_NAME_KEY, contract.resource_name());
    outputs.append(NAMESPACE_KEY, contract.namespace());
    if contract.resource_type() != ResourceType::VCluster {
        outputs.append(REPOSITORY_NAME_KEY, names.repository_name.as_str());
    }
    outputs.append(TARGET_VCLUSTER_KEY, names.target_vcluster.as_str());
    if let Some(framework) = names.framework {
        outputs.append(FRAMEWORK_KEY, framework.as_str());
    }
    outputs
}

fn claim_labels(contract: &ParameterContract) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (RESOURCE_TYPE_LABEL.to_string(), contract.resource_type().as_str().to_string()),
        (
            ENVIRONMENT_TIER_LABEL.to_string(),
            contract.platform.environment_tier.as_str().to_string(),
        ),
    ])
}

fn claim_annotations(context: &StageContext<'_>) -> BTreeMap<String, String> {
    BTreeMap::from([
        (REQUESTED_BY_ANNOTATION.to_string(), context.contract.requesting_user().to_string()),
        (DESCRIPTION_ANNOTATION.to_string(), context.contract.universal.description.clone()),
        (RUN_ID_ANNOTATION.to_string(), context.run_id.to_string()),
    ])
}

fn platform_spec(contract: &ParameterContract) -> Map<String, JsonValue> {
    let platform = &contract.platform;
    let mut fields = Map::new();
    fields.insert("securityEnabled".into(), json!(platform.security_enabled));
    fields.insert("observabilityEnabled".into(), json!(platform.observability_enabled));
    fields.insert("backupEnabled".into(), json!(platform.backup_enabled));
    fields.insert("environmentTier".into(), json!(platform.environment_tier));
    fields.insert("resourceSize".into(), json!(platform.resource_size));
    fields
}

/// Ensures the virtual cluster the run deploys into.
pub struct VClusterStage;

impl Stage for VClusterStage {
    fn kind(&self) -> ClaimKind {
        ClaimKind::VCluster
    }

    fn output_key(&self) -> &'static str {
        VCLUSTER_NAME_KEY
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[]
    }

    fn claim_name(&self, context: &StageContext<'_>) -> String {
        context.names.target_vcluster.clone()
    }

    fn spec(&self, context: &StageContext<'_>) -> Result<JsonValue, StageError> {
        let defaults = VClusterParameters::default();
        let parameters = match &context.contract.resource {
            ResourceParameters::VCluster(parameters) => parameters,
            _ => &defaults,
        };
        let mut fields = platform_spec(context.contract);
        fields.insert("kubernetesVersion".into(), json!(parameters.kubernetes_version));
        fields.insert("enableIstio".into(), json!(parameters.enable_istio));
        fields.insert("enableKnative".into(), json!(parameters.enable_knative));
        fields.insert("enableArgocd".into(), json!(parameters.enable_argocd));
        Ok(JsonValue::Object(fields))
    }
}

/// Ensures the application container (repository plus GitOps wiring).
pub struct AppContainerStage;

impl Stage for AppContainerStage {
    fn kind(&self) -> ClaimKind {
        ClaimKind::AppContainer
    }

    fn output_key(&self) -> &'static str {
        APP_CONTAINER_NAME_KEY
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[VCLUSTER_NAME_KEY, REPOSITORY_NAME_KEY]
    }

    fn claim_name(&self, context: &StageContext<'_>) -> String {
        context.names.app_container.clone()
    }

    fn spec(&self, context: &StageContext<'_>) -> Result<JsonValue, StageError> {
        let (enable_gitops, visibility) = match &context.contract.resource {
            ResourceParameters::AppContainer(AppContainerParameters {
                enable_gitops,
                repository_visibility,
                ..
            }) => (*enable_gitops, *repository_visibility),
            _ => (true, RepositoryVisibility::Private),
        };
        let mut fields = platform_spec(context.contract);
        fields.insert(
            "repositoryName".into(),
            json!(context.require(self.name(), REPOSITORY_NAME_KEY)?),
        );
        fields.insert(
            "targetVCluster".into(),
            json!(context.require(self.name(), VCLUSTER_NAME_KEY)?),
        );
        fields.insert("enableGitops".into(), json!(enable_gitops));
        fields.insert("repositoryVisibility".into(), json!(visibility));
        Ok(JsonValue::Object(fields))
    }

    fn spec_outputs(&self, spec: &JsonValue) -> IndexMap<String, String> {
        [
            (CONTAINER_REPOSITORY_KEY, "repositoryName"),
            (CONTAINER_VCLUSTER_KEY, "targetVCluster"),
        ]
        .into_iter()
        .filter_map(|(key, field)| {
            spec.get(field)
                .and_then(JsonValue::as_str)
                .map(|value| (key.to_string(), value.to_string()))
        })
        .collect()
    }
}

/// Claims the microservice workload itself.
pub struct MicroserviceStage;

impl Stage for MicroserviceStage {
    fn kind(&self) -> ClaimKind {
        ClaimKind::Microservice
    }

    fn output_key(&self) -> &'static str {
        MICROSERVICE_NAME_KEY
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[VCLUSTER_NAME_KEY, APP_CONTAINER_NAME_KEY, REPOSITORY_NAME_KEY, FRAMEWORK_KEY]
    }

    fn claim_name(&self, context: &StageContext<'_>) -> String {
        context.contract.resource_name().to_string()
    }

    fn spec(&self, context: &StageContext<'_>) -> Result<JsonValue, StageError> {
        let mut fields = platform_spec(context.contract);
        if let ResourceParameters::Microservice(parameters) = &context.contract.resource {
            fields.insert("language".into(), json!(parameters.language));
            fields.insert("database".into(), json!(parameters.database));
            fields.insert("cache".into(), json!(parameters.cache));
            fields.insert("exposeApi".into(), json!(parameters.expose_api));
        }
        fields.insert("framework".into(), json!(context.require(self.name(), FRAMEWORK_KEY)?));
        let repository = match context.outputs.get(CONTAINER_REPOSITORY_KEY) {
            Some(repository) => repository,
            None => context.require(self.name(), REPOSITORY_NAME_KEY)?,
        };
        let vcluster = match context.outputs.get(CONTAINER_VCLUSTER_KEY) {
            Some(vcluster) => vcluster,
            None => context.require(self.name(), VCLUSTER_NAME_KEY)?,
        };
        fields.insert("repositoryName".into(), json!(repository));
        fields.insert("targetVCluster".into(), json!(vcluster));
        fields.insert(
            "appContainer".into(),
            json!(context.require(self.name(), APP_CONTAINER_NAME_KEY)?),
        );
        Ok(JsonValue::Object(fields))
    }
}

#[cfg(test)]
mod tests {
    use claimchain_types::{RawContract, validate_contract};

    use super::*;
    use crate::resolve::resolve_names;

    fn microservice_contract() -> ParameterContract {
        let raw = RawContract {
            resource_name: Some("order-api".into()),
            resource_type: Some("microservice".into()),
            namespace: Some("default".into()),
            requesting_user: Some("alice".into()),
            description: Some("Order API".into()),
            parameters: serde_json::from_value(json!({"language": "python", "database": "postgres"})).unwrap(),
            advanced: serde_json::from_value(json!({"replicas": 3})).unwrap(),
            ..Default::default()
        };
        validate_contract(&raw).unwrap()
    }

    #[test]
    fn chain_order_is_fixed_by_resource_type() {
        let kinds = |resource_type| stages_for(resource_type).iter().map(|stage| stage.kind()).collect::<Vec<_>>();
        assert_eq!(
            kinds(ResourceType::Microservice),
            vec![ClaimKind::VCluster, ClaimKind::AppContainer, ClaimKind::Microservice]
        );
        assert_eq!(kinds(ResourceType::AppContainer), vec![ClaimKind::VCluster, ClaimKind::AppContainer]);
        assert_eq!(kinds(ResourceType::VCluster), vec![ClaimKind::VCluster]);
    }

    #[test]
    fn later_stages_need_earlier_outputs() {
        let contract = microservice_contract();
        let names = resolve_names(&contract);
        let outputs = seed_outputs(&contract, &names);
        let context = StageContext {
            contract: &contract,
            names: &names,
            outputs: &outputs,
            run_id: "run-1",
        };

        let error = AppContainerStage.build_claim(&context).unwrap_err();
        assert_eq!(
            error,
            StageError::MissingInput {
                stage: "appcontainer",
                key: VCLUSTER_NAME_KEY
            }
        );
    }

    #[test]
    fn microservice_claim_carries_propagated_values_and_metadata() {
        let contract = microservice_contract();
        let names = resolve_names(&contract);
        let mut outputs = seed_outputs(&contract, &names);
        outputs.append(VCLUSTER_NAME_KEY, "order-api-vcluster");
        outputs.append(APP_CONTAINER_NAME_KEY, "order-api");
        let context = StageContext {
            contract: &contract,
            names: &names,
            outputs: &outputs,
            run_id: "run-1",
        };

        let claim = MicroserviceStage.build_claim(&context).unwrap();
        assert_eq!(claim.metadata.name, "order-api");
        assert_eq!(claim.spec["framework"], "fastapi");
        assert_eq!(claim.spec["targetVCluster"], "order-api-vcluster");
        assert_eq!(claim.spec["database"], "postgres");
        assert_eq!(claim.spec["advanced"]["replicas"], "3");
        assert_eq!(claim.metadata.labels[MANAGED_BY_LABEL], MANAGED_BY_VALUE);
        assert_eq!(claim.metadata.labels[RESOURCE_TYPE_LABEL], "microservice");
        assert_eq!(claim.metadata.annotations[RUN_ID_ANNOTATION], "run-1");

        let vcluster = VClusterStage.build_claim(&context).unwrap();
        assert_eq!(vcluster.spec["kubernetesVersion"], "1.29");
        assert!(vcluster.spec.get("advanced").is_none());
    }

    #[test]
    fn microservice_follows_the_parent_container_spec() {
        let contract = microservice_contract();
        let names = resolve_names(&contract);
        let mut outputs = seed_outputs(&contract, &names);
        outputs.append(VCLUSTER_NAME_KEY, "shared");
        outputs.append(APP_CONTAINER_NAME_KEY, "commerce");
        let parent = json!({"repositoryName": "commerce", "targetVCluster": "shared", "enableGitops": true});
        for (key, value) in AppContainerStage.spec_outputs(&parent) {
            outputs.append(key, value);
        }
        let context = StageContext {
            contract: &contract,
            names: &names,
            outputs: &outputs,
            run_id: "run-1",
        };

        let claim = MicroserviceStage.build_claim(&context).unwrap();
        assert_eq!(claim.spec["repositoryName"], "commerce");
        assert_eq!(claim.spec["appContainer"], "commerce");
        assert_eq!(claim.spec["targetVCluster"], "shared");
        assert!(VClusterStage.spec_outputs(&parent).is_empty());
    }

    #[test]
    fn overlong_derived_names_are_rejected() {
        let mut contract = microservice_contract();
        contract.universal.resource_name = "a".repeat(60);
        let names = resolve_names(&contract);
        let outputs = seed_outputs(&contract, &names);
        let context = StageContext {
            contract: &contract,
            names: &names,
            outputs: &outputs,
            run_id: "run-1",
        };

        let error = VClusterStage.build_claim(&context).unwrap_err();
        assert!(matches!(error, StageError::InvalidName { stage: "vcluster", .. }));
    }
}
