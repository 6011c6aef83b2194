//! Derivation of implied names for a validated contract.

use claimchain_types::{Framework, ParameterContract, ResourceParameters};
use serde::Serialize;

const SERVICE_SUFFIX: &str = "-service";
const VCLUSTER_SUFFIX: &str = "-vcluster";

/// Names every stage of a run agrees on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNames {
    pub repository_name: String,
    /// Name of the virtual cluster claim the run targets.
    pub target_vcluster: String,
    /// Name of the application container claim the run targets.
    pub app_container: String,
    /// Concrete framework; only microservice runs carry one.
    pub framework: Option<Framework>,
}

/// Resolves repository, cluster, container, and framework names.
///
/// Assumes `contract` passed validation; every derived value is a pure
/// function of the contract.
pub fn resolve_names(contract: &ParameterContract) -> ResolvedNames {
    let resource_name = contract.resource_name();
    let repository_name = contract
        .explicit_repository_name()
        .map(str::to_string)
        .unwrap_or_else(|| default_repository_name(resource_name));

    let target_vcluster = match &contract.resource {
        ResourceParameters::VCluster(_) => resource_name.to_string(),
        _ => contract
            .explicit_target_vcluster()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}{}", repository_name, VCLUSTER_SUFFIX)),
    };

    let (app_container, framework) = match &contract.resource {
        ResourceParameters::Microservice(parameters) => {
            let app_container = parameters
                .parent_app_container
                .clone()
                .unwrap_or_else(|| repository_name.clone());
            let framework = match parameters.framework {
                Framework::Auto => parameters.language.default_framework(),
                explicit => explicit,
            };
            (app_container, Some(framework))
        }
        ResourceParameters::AppContainer(_) | ResourceParameters::VCluster(_) => (resource_name.to_string(), None),
    };

    ResolvedNames {
        repository_name,
        target_vcluster,
        app_container,
        framework,
    }
}

fn default_repository_name(resource_name: &str) -> String {
    resource_name
        .strip_suffix(SERVICE_SUFFIX)
        .unwrap_or(resource_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use claimchain_types::{Language, RawContract, validate_contract};
    use serde_json::json;

    use super::*;

    fn contract(resource_type: &str, parameters: serde_json::Value) -> ParameterContract {
        let raw = RawContract {
            resource_name: Some("order-api".into()),
            resource_type: Some(resource_type.into()),
            namespace: Some("default".into()),
            requesting_user: Some("alice".into()),
            description: Some("Order API".into()),
            parameters: serde_json::from_value(parameters).unwrap(),
            ..Default::default()
        };
        validate_contract(&raw).expect("contract should validate")
    }

    #[test]
    fn derives_names_for_a_plain_microservice() {
        let names = resolve_names(&contract(
            "microservice",
            json!({"language": "python", "framework": "auto", "database": "postgres"}),
        ));
        assert_eq!(names.repository_name, "order-api");
        assert_eq!(names.target_vcluster, "order-api-vcluster");
        assert_eq!(names.app_container, "order-api");
        assert_eq!(names.framework, Some(Framework::FastApi));
    }

    #[test]
    fn auto_framework_follows_language_mapping() {
        let expected = [
            (Language::Python, Framework::FastApi),
            (Language::Java, Framework::SpringBoot),
            (Language::Go, Framework::Gin),
            (Language::NodeJs, Framework::Express),
            (Language::Rust, Framework::Axum),
        ];
        for (language, framework) in expected {
            let names = resolve_names(&contract("microservice", json!({"language": language.as_str()})));
            assert_eq!(names.framework, Some(framework), "language {}", language);
        }
    }

    #[test]
    fn strips_service_suffix_and_honors_explicit_names() {
        let mut parsed = contract("microservice", json!({"language": "go", "framework": "echo"}));
        parsed.universal.resource_name = "billing-service".into();
        let names = resolve_names(&parsed);
        assert_eq!(names.repository_name, "billing");
        assert_eq!(names.target_vcluster, "billing-vcluster");
        assert_eq!(names.framework, Some(Framework::Echo));

        let explicit = contract(
            "microservice",
            json!({
                "language": "rust",
                "repository-name": "orders",
                "target-vcluster": "shared",
                "parent-app-container": "commerce",
            }),
        );
        let names = resolve_names(&explicit);
        assert_eq!(names.repository_name, "orders");
        assert_eq!(names.target_vcluster, "shared");
        assert_eq!(names.app_container, "commerce");
    }

    #[test]
    fn non_microservice_runs_name_their_own_claim() {
        let names = resolve_names(&contract("appcontainer", json!({})));
        assert_eq!(names.app_container, "order-api");
        assert_eq!(names.target_vcluster, "order-api-vcluster");
        assert_eq!(names.framework, None);

        let names = resolve_names(&contract("vcluster", json!({})));
        assert_eq!(names.target_vcluster, "order-api");
    }
}
