//! High-level deployment intents consumed by the topology assembler.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::{Error, Result};

/// Region the CDN provider requires viewer certificates to be issued in.
pub const CDN_CERTIFICATE_REGION: &str = "us-east-1";

/// Issuer used for bearer tokens when none is configured.
pub const DEFAULT_TOKEN_ISSUER: &str = "https://accounts.google.com";

static CERTIFICATE_ARN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:acm:([a-z0-9-]+):(\d{12}):certificate/([A-Za-z0-9-]+)$").unwrap()
});

static CERTIFICATE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*$").unwrap());

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").unwrap()
});

/// Deployment-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSettings {
    pub name: String,
    pub account: String,
    pub region: String,
}

impl StackSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account: "000000000000".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }
}

impl Default for StackSettings {
    fn default() -> Self {
        Self::new("tierkit")
    }
}

/// The request-handling compute unit, treated as an opaque deployable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeSpec {
    pub name: String,
    pub entry_path: String,
    pub handler_ref: String,
    pub runtime: String,
    pub timeout_seconds: u32,
    pub memory_mb: u32,
    pub env: BTreeMap<String, String>,
}

impl ComputeSpec {
    pub fn new(entry_path: impl Into<String>, handler_ref: impl Into<String>) -> Self {
        Self {
            name: "Function".to_string(),
            entry_path: entry_path.into(),
            handler_ref: handler_ref.into(),
            runtime: "python3.13".to_string(),
            timeout_seconds: 30,
            memory_mb: 512,
            env: BTreeMap::new(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.entry_path.trim().is_empty() {
            return Err(Error::configuration(&self.name, "compute unit has no entry point"));
        }
        if self.handler_ref.trim().is_empty() {
            return Err(Error::configuration(&self.name, "compute unit has no handler reference"));
        }
        if !(1..=900).contains(&self.timeout_seconds) {
            return Err(Error::configuration(
                &self.name,
                format!("timeout {}s outside 1..=900", self.timeout_seconds),
            ));
        }
        if !(128..=10240).contains(&self.memory_mb) {
            return Err(Error::configuration(
                &self.name,
                format!("memory {}MB outside 128..=10240", self.memory_mb),
            ));
        }
        Ok(())
    }
}

/// The HTTP gateway in front of the compute unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySpec {
    pub name: String,
    pub route_key: String,
    pub cors_origins: Vec<String>,
    /// Identity-provider client id; when set, every route requires a bearer token.
    pub auth_client_id: Option<String>,
    pub auth_issuer: String,
}

impl Default for GatewaySpec {
    fn default() -> Self {
        Self {
            name: "HttpApi".to_string(),
            route_key: "ANY /{proxy+}".to_string(),
            cors_origins: vec!["*".to_string()],
            auth_client_id: None,
            auth_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
        }
    }
}

/// The private storage origin holding the frontend bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginSpec {
    pub name: String,
    /// Static asset bundle uploaded into the bucket, if any.
    pub content_root: Option<String>,
    pub index_document: String,
    pub error_document: String,
    /// Delete the bucket and its objects on teardown.
    pub force_destroy: bool,
}

impl Default for OriginSpec {
    fn default() -> Self {
        Self {
            name: "WebsiteBucket".to_string(),
            content_root: None,
            index_document: "index.html".to_string(),
            error_document: "index.html".to_string(),
            force_destroy: true,
        }
    }
}

/// The CDN distribution serving the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSpec {
    pub name: String,
    pub default_root_object: String,
    /// Serve the root object with 200 for unknown paths (single-page apps).
    pub spa_fallback: bool,
}

impl Default for DistributionSpec {
    fn default() -> Self {
        Self {
            name: "Distribution".to_string(),
            default_root_object: "index.html".to_string(),
            spa_fallback: true,
        }
    }
}

/// Custom domain for the distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainBinding {
    pub domain_name: String,
    /// Certificate id or full certificate ARN.
    pub certificate_ref: String,
    pub hosted_zone_ref: String,
    /// Defaults to the domain name without its first label, or the domain
    /// itself for an apex domain.
    pub zone_name: Option<String>,
}

impl DomainBinding {
    pub fn new(
        domain_name: impl Into<String>,
        certificate_ref: impl Into<String>,
        hosted_zone_ref: impl Into<String>,
    ) -> Self {
        Self {
            domain_name: domain_name.into(),
            certificate_ref: certificate_ref.into(),
            hosted_zone_ref: hosted_zone_ref.into(),
            zone_name: None,
        }
    }

    /// Check the binding and expand its references against the stack.
    pub fn resolve(&self, stack: &StackSettings) -> Result<ResolvedDomain> {
        let domain_name = self.domain_name.trim().to_ascii_lowercase();
        if !DOMAIN_REGEX.is_match(&domain_name) {
            return Err(Error::configuration(
                "domain",
                format!("'{}' is not a valid domain name", self.domain_name),
            ));
        }

        let certificate_arn = if let Some(caps) = CERTIFICATE_ARN_REGEX.captures(&self.certificate_ref) {
            if &caps[1] != CDN_CERTIFICATE_REGION {
                return Err(Error::configuration(
                    "domain",
                    format!(
                        "certificate must be issued in {CDN_CERTIFICATE_REGION}, found {}",
                        &caps[1]
                    ),
                ));
            }
            self.certificate_ref.clone()
        } else if CERTIFICATE_ID_REGEX.is_match(&self.certificate_ref) {
            format!(
                "arn:aws:acm:{CDN_CERTIFICATE_REGION}:{}:certificate/{}",
                stack.account, self.certificate_ref
            )
        } else {
            return Err(Error::configuration(
                "domain",
                format!("'{}' is not a certificate id or ARN", self.certificate_ref),
            ));
        };

        if self.hosted_zone_ref.trim().is_empty() {
            return Err(Error::configuration("domain", "hosted zone reference is empty"));
        }

        let zone_name = match &self.zone_name {
            Some(zone) => zone.trim_end_matches('.').to_ascii_lowercase(),
            // An apex domain is its own zone.
            None => match domain_name.split_once('.') {
                Some((_, parent)) if parent.contains('.') => parent.to_string(),
                _ => domain_name.clone(),
            },
        };
        if domain_name != zone_name && !domain_name.ends_with(&format!(".{zone_name}")) {
            return Err(Error::configuration(
                "domain",
                format!("'{domain_name}' is not inside hosted zone '{zone_name}'"),
            ));
        }

        Ok(ResolvedDomain {
            domain_name,
            certificate_arn,
            hosted_zone_id: self.hosted_zone_ref.trim().to_string(),
            zone_name,
        })
    }
}

/// A domain binding that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDomain {
    pub domain_name: String,
    pub certificate_arn: String,
    pub hosted_zone_id: String,
    pub zone_name: String,
}

/// Everything needed to assemble one two-tier topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyIntent {
    pub stack: StackSettings,
    pub compute: ComputeSpec,
    pub gateway: GatewaySpec,
    pub origin: OriginSpec,
    pub distribution: DistributionSpec,
    pub domain: Option<DomainBinding>,
}

impl TopologyIntent {
    /// Intent with default gateway, origin and distribution around `compute`.
    pub fn new(stack: StackSettings, compute: ComputeSpec) -> Self {
        Self {
            stack,
            compute,
            gateway: GatewaySpec::default(),
            origin: OriginSpec::default(),
            distribution: DistributionSpec::default(),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: DomainBinding) -> Self {
        self.domain = Some(domain);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_certificate_id_expands_in_cdn_region() {
        let stack = StackSettings::new("app").with_account("123456789012").with_region("eu-west-1");
        let resolved = DomainBinding::new("app.example.com", "cert-1", "zone-1")
            .resolve(&stack)
            .unwrap();
        assert_eq!(
            resolved.certificate_arn,
            "arn:aws:acm:us-east-1:123456789012:certificate/cert-1"
        );
        assert_eq!(resolved.zone_name, "example.com");
        assert_eq!(resolved.hosted_zone_id, "zone-1");
    }

    #[test]
    fn test_certificate_outside_cdn_region_rejected() {
        let binding = DomainBinding::new(
            "app.example.com",
            "arn:aws:acm:eu-west-1:123456789012:certificate/abc-123",
            "zone-1",
        );
        let err = binding.resolve(&StackSettings::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_full_certificate_arn_accepted() {
        let arn = "arn:aws:acm:us-east-1:463438090254:certificate/feec6310-4b3f-4515-ac9c-3e919f62cc56";
        let resolved = DomainBinding::new("lambda-learning.kstrm.com", arn, "Z0928598EYO9M4LDLVZL")
            .resolve(&StackSettings::default())
            .unwrap();
        assert_eq!(resolved.certificate_arn, arn);
        assert_eq!(resolved.zone_name, "kstrm.com");
    }

    #[test]
    fn test_apex_domain_defaults_to_own_zone() {
        let resolved = DomainBinding::new("Example.com", "cert-1", "zone-1")
            .resolve(&StackSettings::default())
            .unwrap();
        assert_eq!(resolved.domain_name, "example.com");
        assert_eq!(resolved.zone_name, "example.com");
    }

    #[test]
    fn test_domain_outside_zone_rejected() {
        let mut binding = DomainBinding::new("app.example.com", "cert-1", "zone-1");
        binding.zone_name = Some("other.org".to_string());
        assert!(binding.resolve(&StackSettings::default()).is_err());
    }

    #[test]
    fn test_invalid_domain_rejected() {
        let binding = DomainBinding::new("not a domain", "cert-1", "zone-1");
        assert!(binding.resolve(&StackSettings::default()).is_err());
    }

    #[test]
    fn test_compute_limits() {
        let mut spec = ComputeSpec::new("svc", "h");
        assert!(spec.validate().is_ok());
        spec.memory_mb = 64;
        assert!(spec.validate().is_err());
        spec.memory_mb = 512;
        spec.timeout_seconds = 0;
        assert!(spec.validate().is_err());
        let spec = ComputeSpec::new("svc", " ");
        assert!(spec.validate().is_err());
    }
}
