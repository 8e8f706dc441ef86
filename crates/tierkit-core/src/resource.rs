//! Resource descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::reference::PropertyValue;
use crate::{Error, Result};

/// Kind of provisionable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Function,
    FunctionPermission,
    HttpApi,
    HttpStage,
    HttpIntegration,
    HttpAuthorizer,
    HttpRoute,
    Bucket,
    BucketDeployment,
    BucketPolicy,
    OriginAccessControl,
    Distribution,
    Certificate,
    HostedZone,
    AliasRecord,
}

impl ResourceKind {
    /// Provider type name emitted in the manifest.
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Function => "AWS::Lambda::Function",
            ResourceKind::FunctionPermission => "AWS::Lambda::Permission",
            ResourceKind::HttpApi => "AWS::ApiGatewayV2::Api",
            ResourceKind::HttpStage => "AWS::ApiGatewayV2::Stage",
            ResourceKind::HttpIntegration => "AWS::ApiGatewayV2::Integration",
            ResourceKind::HttpAuthorizer => "AWS::ApiGatewayV2::Authorizer",
            ResourceKind::HttpRoute => "AWS::ApiGatewayV2::Route",
            ResourceKind::Bucket => "AWS::S3::Bucket",
            ResourceKind::BucketDeployment => "Custom::BucketDeployment",
            ResourceKind::BucketPolicy => "AWS::S3::BucketPolicy",
            ResourceKind::OriginAccessControl => "AWS::CloudFront::OriginAccessControl",
            ResourceKind::Distribution => "AWS::CloudFront::Distribution",
            ResourceKind::Certificate => "AWS::CertificateManager::Certificate",
            ResourceKind::HostedZone => "AWS::Route53::HostedZone",
            ResourceKind::AliasRecord => "AWS::Route53::RecordSet",
        }
    }

    /// Configuration keys a node of this kind must declare.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Function => &["Code", "Handler", "Runtime"],
            ResourceKind::FunctionPermission => &["FunctionName", "Action", "Principal"],
            ResourceKind::HttpApi => &["Name", "ProtocolType"],
            ResourceKind::HttpStage => &["ApiId", "StageName"],
            ResourceKind::HttpIntegration => &["ApiId", "IntegrationType", "IntegrationUri"],
            ResourceKind::HttpAuthorizer => &["ApiId", "AuthorizerType", "JwtConfiguration"],
            ResourceKind::HttpRoute => &["ApiId", "RouteKey", "Target"],
            ResourceKind::Bucket => &["PublicAccessBlockConfiguration"],
            ResourceKind::BucketDeployment => &["SourcePath", "DestinationBucketName"],
            ResourceKind::BucketPolicy => &["Bucket", "PolicyDocument"],
            ResourceKind::OriginAccessControl => &["OriginAccessControlConfig"],
            ResourceKind::Distribution => &["DistributionConfig"],
            ResourceKind::Certificate => &["CertificateArn"],
            ResourceKind::HostedZone => &["HostedZoneId", "ZoneName"],
            ResourceKind::AliasRecord => &["HostedZoneId", "Name", "Type", "AliasTarget"],
        }
    }

    /// Imports look up an existing resource; the topology never owns them.
    pub fn is_import(&self) -> bool {
        matches!(self, ResourceKind::Certificate | ResourceKind::HostedZone)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// What happens to a resource when its topology is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    /// Delete, purging stored objects first.
    ForceDelete,
    Retain,
}

/// One provisionable unit: identity, configuration and dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Logical name, unique within a topology.
    pub name: String,
    pub kind: ResourceKind,
    pub config: BTreeMap<String, PropertyValue>,
    /// Declared dependencies plus every producer referenced from `config`,
    /// deduplicated in first-seen order.
    pub depends_on: Vec<String>,
    pub deletion_policy: DeletionPolicy,
}

impl ResourceNode {
    /// Build a node, folding deferred producers into its dependency list.
    ///
    /// This only checks the node in isolation; checks against the rest of the
    /// graph happen when it is registered.
    pub fn describe(
        name: impl Into<String>,
        kind: ResourceKind,
        config: BTreeMap<String, PropertyValue>,
        dependencies: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::configuration(
                "<unnamed>",
                format!("{kind} node has an empty logical name"),
            ));
        }

        for key in kind.required_keys() {
            if !config.contains_key(*key) {
                return Err(Error::configuration(
                    &name,
                    format!("{kind} requires configuration key '{key}'"),
                ));
            }
        }

        let mut depends_on: Vec<String> = Vec::new();
        let implicit = config
            .values()
            .flat_map(|v| v.references())
            .map(|d| d.producer.clone());
        for dep in dependencies.into_iter().chain(implicit) {
            if !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }

        if depends_on.iter().any(|d| *d == name) {
            return Err(Error::configuration(&name, "node depends on itself"));
        }

        let deletion_policy = if kind.is_import() {
            DeletionPolicy::Retain
        } else {
            DeletionPolicy::Delete
        };

        Ok(Self {
            name,
            kind,
            config,
            depends_on,
            deletion_policy,
        })
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        if !self.kind.is_import() {
            self.deletion_policy = policy;
        }
        self
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.config.get(key)
    }
}

/// A node after construction: fully resolved properties and published attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructedResource {
    pub name: String,
    pub kind: ResourceKind,
    pub properties: serde_json::Value,
    pub depends_on: Vec<String>,
    pub deletion_policy: DeletionPolicy,
    pub attributes: BTreeMap<String, String>,
}

impl ConstructedResource {
    /// Resolved property at a `/`-separated JSON pointer, e.g. `/DistributionConfig/Aliases`.
    pub fn pointer(&self, path: &str) -> Option<&serde_json::Value> {
        self.properties.pointer(path)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Builder for a node's configuration map.
#[derive(Debug, Default)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Set `key` only when `value` is present.
    pub fn set_opt(self, key: impl Into<String>, value: Option<impl Into<PropertyValue>>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    pub fn build(self) -> BTreeMap<String, PropertyValue> {
        self.entries
    }
}
