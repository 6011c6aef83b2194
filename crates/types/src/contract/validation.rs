//! Contract validation.
//!
//! [`validate_contract`] turns an authored [`RawContract`] into a normalized
//! [`ParameterContract`] or reports the first rule it violates. Rules run in a
//! fixed order (tier 1 presence, names, resource type, tier 2, tier 3, tier 4)
//! so the same input always fails on the same field.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::{
    AppContainerParameters, Cache, Database, EnvironmentTier, Framework, KubernetesVersion, Language, MicroserviceParameters,
    ParameterContract, PlatformParameters, RawContract, RepositoryVisibility, ResourceParameters, ResourceSize, ResourceType,
    UniversalParameters, VClusterParameters,
};

/// Pattern every resource name and namespace must satisfy.
pub const DNS1123_PATTERN: &str = r"^[a-z0-9][a-z0-9-]*[a-z0-9]$";
/// Kubernetes label-compatible upper bound on name length.
pub const DNS1123_MAX_LENGTH: usize = 63;

static DNS1123_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(DNS1123_PATTERN).expect("dns-1123 regex should compile"));

const PLATFORM_KEYS: &[&str] = &[
    "security-enabled",
    "observability-enabled",
    "backup-enabled",
    "environment-tier",
    "resource-size",
];
const MICROSERVICE_KEYS: &[&str] = &[
    "language",
    "framework",
    "database",
    "cache",
    "expose-api",
    "target-vcluster",
    "parent-app-container",
    "repository-name",
];
const APP_CONTAINER_KEYS: &[&str] = &["repository-name", "target-vcluster", "enable-gitops", "repository-visibility"];
const VCLUSTER_KEYS: &[&str] = &["kubernetes-version", "enable-istio", "enable-knative", "enable-argocd"];

/// Outcome of [`validate_contract`].
pub type ValidationResult = Result<ParameterContract, ValidationError>;

/// First rule a contract violated, with the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid parameter '{field}': {reason}")]
pub struct ValidationError {
    /// Kebab-case parameter name as authored (`advanced.<key>` for tier 4).
    pub field: String,
    pub reason: ValidationReason,
}

/// Machine-readable reason attached to a [`ValidationError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationReason {
    #[error("a value is required")]
    Missing,

    #[error("'{value}' must match {pattern} and be at most {max_length} characters")]
    InvalidName {
        value: String,
        pattern: &'static str,
        max_length: usize,
    },

    #[error("unknown value '{value}'; allowed values: {}", .allowed.join(", "))]
    UnknownValue { value: String, allowed: &'static [&'static str] },

    #[error("not a recognized {tier} parameter")]
    UnknownField { tier: &'static str },

    #[error("not allowed for resource type '{resource_type}'")]
    UnexpectedField { resource_type: ResourceType },

    #[error("expected {expected}")]
    InvalidType { expected: &'static str },

    #[error("framework '{framework}' is not available for language '{language}'")]
    IncompatibleFramework { framework: Framework, language: Language },
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: ValidationReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }

    /// Stable identifier for the reason, suitable for JSON output.
    pub fn reason_code(&self) -> &'static str {
        match self.reason {
            ValidationReason::Missing => "missing",
            ValidationReason::InvalidName { .. } => "invalid_name",
            ValidationReason::UnknownValue { .. } => "unknown_value",
            ValidationReason::UnknownField { .. } => "unknown_field",
            ValidationReason::UnexpectedField { .. } => "unexpected_field",
            ValidationReason::InvalidType { .. } => "invalid_type",
            ValidationReason::IncompatibleFramework { .. } => "incompatible_framework",
        }
    }
}

/// Returns true when `name` is a valid DNS-1123 label.
pub fn is_dns1123_name(name: &str) -> bool {
    name.len() <= DNS1123_MAX_LENGTH && DNS1123_REGEX.is_match(name)
}

/// Validate an authored contract and apply defaults.
///
/// Pure and deterministic: no I/O, and the first failing rule is returned.
pub fn validate_contract(raw: &RawContract) -> ValidationResult {
    let resource_name = required_text("resource-name", raw.resource_name.as_deref())?;
    let resource_type = required_text("resource-type", raw.resource_type.as_deref())?;
    let namespace = required_text("namespace", raw.namespace.as_deref())?;
    let requesting_user = required_text("requesting-user", raw.requesting_user.as_deref())?;
    let description = required_text("description", raw.description.as_deref())?;

    check_dns1123("resource-name", resource_name)?;
    check_dns1123("namespace", namespace)?;

    let resource_type = ResourceType::parse(resource_type).ok_or_else(|| {
        ValidationError::new(
            "resource-type",
            ValidationReason::UnknownValue {
                value: resource_type.to_string(),
                allowed: ResourceType::ALLOWED,
            },
        )
    })?;

    let platform = validate_platform(&raw.platform)?;
    let resource = validate_resource(resource_type, &raw.parameters)?;
    let advanced = validate_advanced(&raw.advanced)?;

    Ok(ParameterContract {
        universal: UniversalParameters {
            resource_name: resource_name.to_string(),
            namespace: namespace.to_string(),
            requesting_user: requesting_user.to_string(),
            description: description.to_string(),
        },
        platform,
        resource,
        advanced,
    })
}

fn required_text<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, ValidationError> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(ValidationError::new(field, ValidationReason::Missing)),
    }
}

fn check_dns1123(field: &str, value: &str) -> Result<(), ValidationError> {
    if is_dns1123_name(value) {
        return Ok(());
    }
    Err(ValidationError::new(
        field,
        ValidationReason::InvalidName {
            value: value.to_string(),
            pattern: DNS1123_PATTERN,
            max_length: DNS1123_MAX_LENGTH,
        },
    ))
}

fn validate_platform(values: &IndexMap<String, Value>) -> Result<PlatformParameters, ValidationError> {
    if let Some(unknown) = values.keys().find(|key| !PLATFORM_KEYS.contains(&key.as_str())) {
        return Err(ValidationError::new(unknown.as_str(), ValidationReason::UnknownField { tier: "platform" }));
    }

    let reader = ParameterReader::new(values);
    let defaults = PlatformParameters::default();
    Ok(PlatformParameters {
        security_enabled: reader.boolean("security-enabled", defaults.security_enabled)?,
        observability_enabled: reader.boolean("observability-enabled", defaults.observability_enabled)?,
        backup_enabled: reader.boolean("backup-enabled", defaults.backup_enabled)?,
        environment_tier: reader
            .closed("environment-tier", EnvironmentTier::parse, EnvironmentTier::ALLOWED)?
            .unwrap_or(defaults.environment_tier),
        resource_size: reader
            .closed("resource-size", ResourceSize::parse, ResourceSize::ALLOWED)?
            .unwrap_or(defaults.resource_size),
    })
}

fn validate_resource(resource_type: ResourceType, values: &IndexMap<String, Value>) -> Result<ResourceParameters, ValidationError> {
    check_resource_keys(resource_type, values)?;
    let reader = ParameterReader::new(values);

    match resource_type {
        ResourceType::Microservice => {
            let language = reader
                .closed("language", Language::parse, Language::ALLOWED)?
                .ok_or_else(|| ValidationError::new("language", ValidationReason::Missing))?;
            let framework = reader
                .closed("framework", Framework::parse, Framework::ALLOWED)?
                .unwrap_or(Framework::Auto);
            let database = reader
                .closed("database", Database::parse, Database::ALLOWED)?
                .unwrap_or(Database::None);
            let cache = reader.closed("cache", Cache::parse, Cache::ALLOWED)?.unwrap_or(Cache::None);
            let expose_api = reader.boolean("expose-api", true)?;
            let target_vcluster = reader.name("target-vcluster")?;
            let parent_app_container = reader.name("parent-app-container")?;
            let repository_name = reader.name("repository-name")?;

            if let Some(framework_language) = framework.language()
                && framework_language != language
            {
                return Err(ValidationError::new(
                    "framework",
                    ValidationReason::IncompatibleFramework { framework, language },
                ));
            }

            Ok(ResourceParameters::Microservice(MicroserviceParameters {
                language,
                framework,
                database,
                cache,
                expose_api,
                target_vcluster,
                parent_app_container,
                repository_name,
            }))
        }
        ResourceType::AppContainer => Ok(ResourceParameters::AppContainer(AppContainerParameters {
            repository_name: reader.name("repository-name")?,
            target_vcluster: reader.name("target-vcluster")?,
            enable_gitops: reader.boolean("enable-gitops", true)?,
            repository_visibility: reader
                .closed("repository-visibility", RepositoryVisibility::parse, RepositoryVisibility::ALLOWED)?
                .unwrap_or(RepositoryVisibility::Private),
        })),
        ResourceType::VCluster => Ok(ResourceParameters::VCluster(VClusterParameters {
            kubernetes_version: reader
                .closed("kubernetes-version", KubernetesVersion::parse, KubernetesVersion::ALLOWED)?
                .unwrap_or(KubernetesVersion::V1_29),
            enable_istio: reader.boolean("enable-istio", true)?,
            enable_knative: reader.boolean("enable-knative", true)?,
            enable_argocd: reader.boolean("enable-argocd", true)?,
        })),
    }
}

fn allowed_resource_keys(resource_type: ResourceType) -> &'static [&'static str] {
    match resource_type {
        ResourceType::Microservice => MICROSERVICE_KEYS,
        ResourceType::AppContainer => APP_CONTAINER_KEYS,
        ResourceType::VCluster => VCLUSTER_KEYS,
    }
}

fn check_resource_keys(resource_type: ResourceType, values: &IndexMap<String, Value>) -> Result<(), ValidationError> {
    let allowed = allowed_resource_keys(resource_type);
    for key in values.keys() {
        if allowed.contains(&key.as_str()) {
            continue;
        }
        let known_elsewhere = [MICROSERVICE_KEYS, APP_CONTAINER_KEYS, VCLUSTER_KEYS]
            .iter()
            .any(|keys| keys.contains(&key.as_str()));
        let reason = if known_elsewhere {
            ValidationReason::UnexpectedField { resource_type }
        } else {
            ValidationReason::UnknownField { tier: "resource" }
        };
        return Err(ValidationError::new(key.as_str(), reason));
    }
    Ok(())
}

fn validate_advanced(values: &IndexMap<String, Value>) -> Result<IndexMap<String, String>, ValidationError> {
    let mut normalized = IndexMap::with_capacity(values.len());
    for (key, value) in values {
        let text = match value {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            _ => {
                return Err(ValidationError::new(
                    format!("advanced.{}", key),
                    ValidationReason::InvalidType {
                        expected: "a string, number, or boolean",
                    },
                ));
            }
        };
        normalized.insert(key.clone(), text);
    }
    Ok(normalized)
}

/// Maps a YAML number back to the allowed literal it denotes, so `1.30`
/// (read as the float `1.3`) still selects `"1.30"`.
fn numeric_literal(number: &serde_json::Number, allowed: &[&'static str]) -> String {
    number
        .as_f64()
        .and_then(|value| {
            allowed
                .iter()
                .find(|literal| literal.parse::<f64>().is_ok_and(|candidate| candidate == value))
        })
        .map_or_else(|| number.to_string(), |literal| literal.to_string())
}

/// Typed accessors over a tier-2/tier-3 parameter map.
///
/// Contract authors frequently quote every value, so booleans accept the
/// strings `"true"`/`"false"` and closed sets accept numbers (`1.29`).
struct ParameterReader<'a> {
    values: &'a IndexMap<String, Value>,
}

impl<'a> ParameterReader<'a> {
    fn new(values: &'a IndexMap<String, Value>) -> Self {
        Self { values }
    }

    fn present(&self, key: &str) -> Option<&'a Value> {
        self.values.get(key).filter(|value| !value.is_null())
    }

    fn boolean(&self, key: &str, default: bool) -> Result<bool, ValidationError> {
        match self.present(key) {
            None => Ok(default),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(Value::String(text)) => match text.trim() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ValidationError::new(key, ValidationReason::InvalidType { expected: "a boolean" })),
            },
            Some(_) => Err(ValidationError::new(key, ValidationReason::InvalidType { expected: "a boolean" })),
        }
    }

    fn closed<T>(&self, key: &str, parse: fn(&str) -> Option<T>, allowed: &'static [&'static str]) -> Result<Option<T>, ValidationError> {
        let text = match self.present(key) {
            None => return Ok(None),
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Number(number)) => numeric_literal(number, allowed),
            Some(_) => return Err(ValidationError::new(key, ValidationReason::InvalidType { expected: "a string" })),
        };
        parse(&text)
            .map(Some)
            .ok_or_else(|| ValidationError::new(key, ValidationReason::UnknownValue { value: text, allowed }))
    }

    fn name(&self, key: &str) -> Result<Option<String>, ValidationError> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(Value::String(text)) => {
                let trimmed = text.trim();
                check_dns1123(key, trimmed)?;
                Ok(Some(trimmed.to_string()))
            }
            Some(_) => Err(ValidationError::new(key, ValidationReason::InvalidType { expected: "a string" })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn microservice_contract() -> RawContract {
        RawContract {
            resource_name: Some("order-api".into()),
            resource_type: Some("microservice".into()),
            namespace: Some("default".into()),
            requesting_user: Some("alice".into()),
            description: Some("Order API".into()),
            parameters: [
                ("language".to_string(), json!("python")),
                ("framework".to_string(), json!("auto")),
                ("database".to_string(), json!("postgres")),
                ("cache".to_string(), json!("none")),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_microservice_contract_gets_defaults() {
        let contract = validate_contract(&microservice_contract()).expect("contract should validate");

        assert_eq!(contract.resource_type(), ResourceType::Microservice);
        assert_eq!(contract.platform, PlatformParameters::default());
        let ResourceParameters::Microservice(parameters) = &contract.resource else {
            panic!("expected microservice parameters");
        };
        assert_eq!(parameters.language, Language::Python);
        assert_eq!(parameters.framework, Framework::Auto);
        assert_eq!(parameters.database, Database::Postgres);
        assert!(parameters.expose_api);
        assert_eq!(parameters.target_vcluster, None);
    }

    #[test]
    fn missing_universal_field_is_named_exactly() {
        let cases: [(&str, fn(&mut RawContract)); 5] = [
            ("resource-name", |raw| raw.resource_name = None),
            ("resource-type", |raw| raw.resource_type = None),
            ("namespace", |raw| raw.namespace = Some("   ".into())),
            ("requesting-user", |raw| raw.requesting_user = None),
            ("description", |raw| raw.description = Some(String::new())),
        ];

        for (field, clear) in cases {
            let mut raw = microservice_contract();
            clear(&mut raw);
            let error = validate_contract(&raw).expect_err("missing field should fail");
            assert_eq!(error.field, field);
            assert_eq!(error.reason, ValidationReason::Missing);
        }
    }

    #[test]
    fn rejects_names_outside_dns1123() {
        let long_name = "x".repeat(64);
        for bad_name in ["Order-API", "order_api", "-order", "order-", "a", long_name.as_str()] {
            let mut raw = microservice_contract();
            raw.resource_name = Some(bad_name.to_string());
            let error = validate_contract(&raw).expect_err("bad name should fail");
            assert_eq!(error.field, "resource-name");
            assert_eq!(error.reason_code(), "invalid_name");
        }

        let mut raw = microservice_contract();
        raw.namespace = Some("Default".into());
        assert_eq!(validate_contract(&raw).unwrap_err().field, "namespace");
    }

    #[test]
    fn unknown_language_reports_field_and_allowed_set() {
        let mut raw = microservice_contract();
        raw.parameters.insert("language".into(), json!("cobol"));

        let error = validate_contract(&raw).expect_err("cobol is not supported");
        assert_eq!(error.field, "language");
        let message = error.to_string();
        assert!(message.contains("cobol"));
        assert!(message.contains("python, java, go, nodejs, rust"));
    }

    #[test]
    fn unknown_resource_type_is_rejected() {
        let mut raw = microservice_contract();
        raw.resource_type = Some("database".into());
        let error = validate_contract(&raw).unwrap_err();
        assert_eq!(error.field, "resource-type");
        assert_eq!(error.reason_code(), "unknown_value");
    }

    #[test]
    fn tier3_fields_must_match_the_variant() {
        let mut raw = microservice_contract();
        raw.parameters.insert("enable-istio".into(), json!(true));
        let error = validate_contract(&raw).unwrap_err();
        assert_eq!(error.field, "enable-istio");
        assert_eq!(
            error.reason,
            ValidationReason::UnexpectedField {
                resource_type: ResourceType::Microservice
            }
        );

        let mut raw = microservice_contract();
        raw.resource_type = Some("vcluster".into());
        let error = validate_contract(&raw).unwrap_err();
        assert_eq!(error.field, "language");
        assert_eq!(
            error.reason,
            ValidationReason::UnexpectedField {
                resource_type: ResourceType::VCluster
            }
        );

        let mut raw = microservice_contract();
        raw.parameters.insert("replicas".into(), json!(2));
        assert_eq!(
            validate_contract(&raw).unwrap_err().reason,
            ValidationReason::UnknownField { tier: "resource" }
        );
    }

    #[test]
    fn microservice_requires_language() {
        let mut raw = microservice_contract();
        raw.parameters.shift_remove("language");
        let error = validate_contract(&raw).unwrap_err();
        assert_eq!(error.field, "language");
        assert_eq!(error.reason, ValidationReason::Missing);
    }

    #[test]
    fn explicit_framework_must_match_language() {
        let mut raw = microservice_contract();
        raw.parameters.insert("framework".into(), json!("gin"));
        let error = validate_contract(&raw).unwrap_err();
        assert_eq!(error.field, "framework");
        assert_eq!(error.reason_code(), "incompatible_framework");

        raw.parameters.insert("framework".into(), json!("django"));
        assert!(validate_contract(&raw).is_ok());
    }

    #[test]
    fn platform_values_are_checked_against_closed_sets() {
        let mut raw = microservice_contract();
        raw.platform.insert("environment-tier".into(), json!("qa"));
        let error = validate_contract(&raw).unwrap_err();
        assert_eq!(error.field, "environment-tier");
        assert!(error.to_string().contains("development, staging, production"));

        let mut raw = microservice_contract();
        raw.platform.insert("backup-enabled".into(), json!("yes"));
        assert_eq!(
            validate_contract(&raw).unwrap_err().reason,
            ValidationReason::InvalidType { expected: "a boolean" }
        );

        let mut raw = microservice_contract();
        raw.platform.insert("gpu".into(), json!(true));
        assert_eq!(
            validate_contract(&raw).unwrap_err().reason,
            ValidationReason::UnknownField { tier: "platform" }
        );
    }

    #[test]
    fn stringly_typed_values_are_normalized() {
        let mut raw = microservice_contract();
        raw.platform.insert("backup-enabled".into(), json!("true"));
        raw.platform.insert("resource-size".into(), json!("large"));
        raw.advanced.insert("replicas".into(), json!(3));
        raw.advanced.insert("canary".into(), json!(false));

        let contract = validate_contract(&raw).unwrap();
        assert!(contract.platform.backup_enabled);
        assert_eq!(contract.platform.resource_size, ResourceSize::Large);
        assert_eq!(contract.advanced.get("replicas").map(String::as_str), Some("3"));
        assert_eq!(contract.advanced.get("canary").map(String::as_str), Some("false"));
    }

    #[test]
    fn advanced_values_must_be_scalars() {
        let mut raw = microservice_contract();
        raw.advanced.insert("labels".into(), json!({"team": "orders"}));
        let error = validate_contract(&raw).unwrap_err();
        assert_eq!(error.field, "advanced.labels");
    }

    #[test]
    fn vcluster_contract_accepts_numeric_version() {
        let raw = RawContract {
            resource_name: Some("team-a".into()),
            resource_type: Some("vcluster".into()),
            namespace: Some("platform".into()),
            requesting_user: Some("bob".into()),
            description: Some("Team A sandbox".into()),
            parameters: [("kubernetes-version".to_string(), json!(1.28))].into_iter().collect(),
            ..Default::default()
        };

        let contract = validate_contract(&raw).unwrap();
        let ResourceParameters::VCluster(parameters) = contract.resource else {
            panic!("expected vcluster parameters");
        };
        assert_eq!(parameters.kubernetes_version, KubernetesVersion::V1_28);
        assert!(parameters.enable_knative);
    }

    #[test]
    fn numeric_version_with_trailing_zero_is_accepted() {
        let raw: RawContract = serde_yaml::from_str(
            "resource-name: team-b\nresource-type: vcluster\nnamespace: platform\nrequesting-user: bob\ndescription: Team B\nparameters:\n  kubernetes-version: 1.30\n",
        )
        .unwrap();

        let contract = validate_contract(&raw).unwrap();
        let ResourceParameters::VCluster(parameters) = contract.resource else {
            panic!("expected vcluster parameters");
        };
        assert_eq!(parameters.kubernetes_version, KubernetesVersion::V1_30);

        let mut unknown = raw.clone();
        unknown.parameters.insert("kubernetes-version".into(), json!(1.31));
        let error = validate_contract(&unknown).unwrap_err();
        assert_eq!(error.field, "kubernetes-version");
        assert_eq!(error.reason_code(), "unknown_value");
    }

    #[test]
    fn tier3_names_are_dns_checked() {
        let mut raw = microservice_contract();
        raw.parameters.insert("target-vcluster".into(), json!("Shared_Cluster"));
        assert_eq!(validate_contract(&raw).unwrap_err().field, "target-vcluster");
    }

    #[test]
    fn validation_is_deterministic() {
        let mut raw = microservice_contract();
        assert_eq!(validate_contract(&raw), validate_contract(&raw));
        raw.parameters.insert("cache".into(), json!("hazelcast"));
        assert_eq!(validate_contract(&raw), validate_contract(&raw));
    }
}
