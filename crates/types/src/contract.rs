//! Tiered parameter contract accepted by the provisioning engine.
//!
//! Contracts arrive as a loosely typed [`RawContract`] (straight from a YAML or
//! JSON document) and leave validation as a strongly typed
//! [`ParameterContract`] whose tier-3 shape is discriminated by resource type.
//! Key names use the kebab-case spelling authors write in contract files.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod validation;

/// Declares a closed set of string literals as an enum with lookup helpers.
macro_rules! closed_set {
    (
        $(#[$meta:meta])*
        $name:ident { $( $variant:ident => $text:literal ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( #[serde(rename = $text)] $variant, )+
        }

        impl $name {
            /// Every accepted literal, in declaration order.
            pub const ALLOWED: &'static [&'static str] = &[$($text),+];

            /// Returns the canonical literal.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text, )+
                }
            }

            /// Parses a literal; values outside the closed set yield `None`.
            pub fn parse(text: &str) -> Option<Self> {
                match text {
                    $( $text => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_set! {
    /// Kind of resource a contract provisions. Fixes the stage chain.
    ResourceType {
        Microservice => "microservice",
        AppContainer => "appcontainer",
        VCluster => "vcluster",
    }
}

closed_set! {
    /// Deployment tier the resource belongs to.
    EnvironmentTier {
        Development => "development",
        Staging => "staging",
        Production => "production",
    }
}

closed_set! {
    /// Coarse sizing profile handed to the reconciler.
    ResourceSize {
        Small => "small",
        Medium => "medium",
        Large => "large",
    }
}

closed_set! {
    /// Implementation language of a microservice.
    Language {
        Python => "python",
        Java => "java",
        Go => "go",
        NodeJs => "nodejs",
        Rust => "rust",
    }
}

closed_set! {
    /// Application framework; `auto` defers to the language default.
    Framework {
        Auto => "auto",
        FastApi => "fastapi",
        Flask => "flask",
        Django => "django",
        SpringBoot => "springboot",
        Quarkus => "quarkus",
        Gin => "gin",
        Echo => "echo",
        Express => "express",
        NestJs => "nestjs",
        Axum => "axum",
        Actix => "actix",
    }
}

closed_set! {
    /// Backing database provisioned next to a microservice.
    Database {
        None => "none",
        Postgres => "postgres",
        MySql => "mysql",
        MongoDb => "mongodb",
    }
}

closed_set! {
    /// Cache provisioned next to a microservice.
    Cache {
        None => "none",
        Redis => "redis",
        Memcached => "memcached",
    }
}

closed_set! {
    /// Visibility of the repository created for an application container.
    RepositoryVisibility {
        Private => "private",
        Public => "public",
    }
}

closed_set! {
    /// Kubernetes version served by a virtual cluster.
    KubernetesVersion {
        V1_28 => "1.28",
        V1_29 => "1.29",
        V1_30 => "1.30",
    }
}

impl Language {
    /// Framework chosen when a microservice asks for `framework: auto`.
    pub fn default_framework(&self) -> Framework {
        match self {
            Language::Python => Framework::FastApi,
            Language::Java => Framework::SpringBoot,
            Language::Go => Framework::Gin,
            Language::NodeJs => Framework::Express,
            Language::Rust => Framework::Axum,
        }
    }
}

impl Framework {
    /// Language the framework is written for; `None` for `auto`.
    pub fn language(&self) -> Option<Language> {
        match self {
            Framework::Auto => None,
            Framework::FastApi | Framework::Flask | Framework::Django => Some(Language::Python),
            Framework::SpringBoot | Framework::Quarkus => Some(Language::Java),
            Framework::Gin | Framework::Echo => Some(Language::Go),
            Framework::Express | Framework::NestJs => Some(Language::NodeJs),
            Framework::Axum | Framework::Actix => Some(Language::Rust),
        }
    }
}

/// Contract exactly as authored, before validation.
///
/// Tier-1 fields are optional here so the validator can name the missing one
/// instead of failing inside the deserializer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawContract {
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub requesting_user: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Tier 2 platform switches.
    #[serde(default)]
    pub platform: IndexMap<String, JsonValue>,
    /// Tier 3 resource-specific parameters.
    #[serde(default)]
    pub parameters: IndexMap<String, JsonValue>,
    /// Tier 4 free-form overrides.
    #[serde(default)]
    pub advanced: IndexMap<String, JsonValue>,
}

/// Tier 1: required for every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniversalParameters {
    pub resource_name: String,
    pub namespace: String,
    pub requesting_user: String,
    pub description: String,
}

/// Tier 2: platform switches with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformParameters {
    pub security_enabled: bool,
    pub observability_enabled: bool,
    pub backup_enabled: bool,
    pub environment_tier: EnvironmentTier,
    pub resource_size: ResourceSize,
}

impl Default for PlatformParameters {
    fn default() -> Self {
        Self {
            security_enabled: true,
            observability_enabled: true,
            backup_enabled: false,
            environment_tier: EnvironmentTier::Development,
            resource_size: ResourceSize::Small,
        }
    }
}

/// Tier 3 for `resource-type: microservice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicroserviceParameters {
    pub language: Language,
    pub framework: Framework,
    pub database: Database,
    pub cache: Cache,
    pub expose_api: bool,
    pub target_vcluster: Option<String>,
    pub parent_app_container: Option<String>,
    pub repository_name: Option<String>,
}

/// Tier 3 for `resource-type: appcontainer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppContainerParameters {
    pub repository_name: Option<String>,
    pub target_vcluster: Option<String>,
    pub enable_gitops: bool,
    pub repository_visibility: RepositoryVisibility,
}

/// Tier 3 for `resource-type: vcluster`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VClusterParameters {
    pub kubernetes_version: KubernetesVersion,
    pub enable_istio: bool,
    pub enable_knative: bool,
    pub enable_argocd: bool,
}

impl Default for VClusterParameters {
    fn default() -> Self {
        Self {
            kubernetes_version: KubernetesVersion::V1_29,
            enable_istio: true,
            enable_knative: true,
            enable_argocd: true,
        }
    }
}

/// Tier 3, discriminated by resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resourceType", content = "parameters", rename_all = "lowercase")]
pub enum ResourceParameters {
    Microservice(MicroserviceParameters),
    AppContainer(AppContainerParameters),
    VCluster(VClusterParameters),
}

impl ResourceParameters {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceParameters::Microservice(_) => ResourceType::Microservice,
            ResourceParameters::AppContainer(_) => ResourceType::AppContainer,
            ResourceParameters::VCluster(_) => ResourceType::VCluster,
        }
    }
}

/// Validated, normalized contract.
///
/// The resource type is carried by the [`ResourceParameters`] variant, so it
/// cannot drift from the tier-3 shape once the contract exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterContract {
    pub universal: UniversalParameters,
    pub platform: PlatformParameters,
    pub resource: ResourceParameters,
    /// Tier-4 overrides normalized to strings, in authoring order.
    pub advanced: IndexMap<String, String>,
}

impl ParameterContract {
    pub fn resource_type(&self) -> ResourceType {
        self.resource.resource_type()
    }

    pub fn resource_name(&self) -> &str {
        &self.universal.resource_name
    }

    pub fn namespace(&self) -> &str {
        &self.universal.namespace
    }

    pub fn requesting_user(&self) -> &str {
        &self.universal.requesting_user
    }

    /// Explicit repository name from tier 3, when the variant carries one.
    pub fn explicit_repository_name(&self) -> Option<&str> {
        match &self.resource {
            ResourceParameters::Microservice(parameters) => parameters.repository_name.as_deref(),
            ResourceParameters::AppContainer(parameters) => parameters.repository_name.as_deref(),
            ResourceParameters::VCluster(_) => None,
        }
    }

    /// Explicit target virtual cluster from tier 3, when the variant carries one.
    pub fn explicit_target_vcluster(&self) -> Option<&str> {
        match &self.resource {
            ResourceParameters::Microservice(parameters) => parameters.target_vcluster.as_deref(),
            ResourceParameters::AppContainer(parameters) => parameters.target_vcluster.as_deref(),
            ResourceParameters::VCluster(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_sets_round_trip_literals() {
        for literal in Framework::ALLOWED {
            let parsed = Framework::parse(literal).expect("literal should parse");
            assert_eq!(parsed.as_str(), *literal);
        }
        assert_eq!(Language::parse("cobol"), None);
        assert_eq!(KubernetesVersion::parse("1.29"), Some(KubernetesVersion::V1_29));
    }

    #[test]
    fn every_named_framework_belongs_to_a_language() {
        for literal in Framework::ALLOWED {
            let framework = Framework::parse(literal).unwrap();
            assert_eq!(framework.language().is_none(), framework == Framework::Auto);
        }
        for literal in Language::ALLOWED {
            let language = Language::parse(literal).unwrap();
            assert_eq!(language.default_framework().language(), Some(language));
        }
    }

    #[test]
    fn raw_contract_deserializes_kebab_case_yaml() {
        let yaml_text = r#"
resource-name: order-api
resource-type: microservice
namespace: default
requesting-user: alice
description: Order API
platform:
  environment-tier: staging
parameters:
  language: python
  framework: auto
advanced:
  replicas: 3
"#;
        let raw: RawContract = serde_yaml::from_str(yaml_text).expect("deserialize raw contract");
        assert_eq!(raw.resource_name.as_deref(), Some("order-api"));
        assert_eq!(raw.parameters.get("language"), Some(&JsonValue::String("python".into())));
        assert_eq!(raw.advanced.len(), 1);
    }

    #[test]
    fn raw_contract_rejects_unknown_top_level_keys() {
        let yaml_text = "resource-name: order-api\nflavour: spicy\n";
        assert!(serde_yaml::from_str::<RawContract>(yaml_text).is_err());
    }
}
