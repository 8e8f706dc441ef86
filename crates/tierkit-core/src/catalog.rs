//! Provider-assigned attributes for each resource kind.
//!
//! Construction publishes the identifiers a provider would hand back when the
//! resource is created. Generated values are derived from the assembly id so
//! they are unique per pass and reproducible for a fixed id.

use std::collections::BTreeMap;

use crate::id::AssemblyId;
use crate::intent::StackSettings;
use crate::resource::{ResourceKind, ResourceNode};
use crate::{Error, Result};

/// Hosted zone id the CDN provider uses for every distribution alias target.
pub const CDN_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

pub(crate) struct AttributeContext<'a> {
    pub stack: &'a StackSettings,
    pub assembly: &'a AssemblyId,
}

impl AttributeContext<'_> {
    fn digest(&self, node: &str, attribute: &str, len: usize) -> String {
        let mut digest = self.assembly.digest(node, attribute);
        digest.truncate(len);
        digest
    }

    /// Physical name `<stack>-<node>-<SUFFIX>` capped at `max` characters.
    fn physical_name(&self, node: &str, max: usize) -> String {
        let suffix = self.digest(node, "PhysicalName", 12).to_ascii_uppercase();
        let budget = max.saturating_sub(suffix.len() + 1);
        let prefix: String = format!("{}-{}", self.stack.name, node)
            .chars()
            .take(budget)
            .collect();
        format!("{prefix}-{suffix}")
    }
}

/// Attributes `node` publishes once constructed, given its resolved properties.
pub(crate) fn provider_attributes(
    node: &ResourceNode,
    props: &serde_json::Map<String, serde_json::Value>,
    ctx: &AttributeContext<'_>,
) -> Result<BTreeMap<String, String>> {
    let stack = ctx.stack;
    let name = node.name.as_str();
    let mut attrs = BTreeMap::new();

    match node.kind {
        ResourceKind::Function => {
            let function_name = sanitize_function_name(&ctx.physical_name(name, 64));
            attrs.insert(
                "Arn".to_string(),
                format!(
                    "arn:aws:lambda:{}:{}:function:{}",
                    stack.region, stack.account, function_name
                ),
            );
            attrs.insert("FunctionName".to_string(), function_name);
        }
        ResourceKind::HttpApi => {
            let api_id = ctx.digest(name, "ApiId", 10);
            attrs.insert(
                "ApiEndpoint".to_string(),
                format!("https://{api_id}.execute-api.{}.amazonaws.com", stack.region),
            );
            attrs.insert(
                "ExecutionArn".to_string(),
                format!("arn:aws:execute-api:{}:{}:{api_id}", stack.region, stack.account),
            );
            attrs.insert("ApiId".to_string(), api_id);
        }
        ResourceKind::HttpStage => {
            let api_id = required_str(node, props, "ApiId")?;
            let stage = required_str(node, props, "StageName")?;
            let base = format!("https://{api_id}.execute-api.{}.amazonaws.com", stack.region);
            let url = if stage == "$default" {
                format!("{base}/")
            } else {
                format!("{base}/{stage}/")
            };
            attrs.insert("Url".to_string(), url);
        }
        ResourceKind::HttpIntegration => {
            attrs.insert("IntegrationId".to_string(), ctx.digest(name, "IntegrationId", 7));
        }
        ResourceKind::HttpAuthorizer => {
            attrs.insert("AuthorizerId".to_string(), ctx.digest(name, "AuthorizerId", 6));
        }
        ResourceKind::HttpRoute => {
            attrs.insert("RouteId".to_string(), ctx.digest(name, "RouteId", 7));
        }
        ResourceKind::Bucket => {
            let bucket_name = match props.get("BucketName").and_then(|v| v.as_str()) {
                Some(explicit) => explicit.to_string(),
                None => sanitize_bucket_name(&ctx.physical_name(name, 63)),
            };
            attrs.insert("Arn".to_string(), format!("arn:aws:s3:::{bucket_name}"));
            attrs.insert(
                "RegionalDomainName".to_string(),
                format!("{bucket_name}.s3.{}.amazonaws.com", stack.region),
            );
            attrs.insert("BucketName".to_string(), bucket_name);
        }
        ResourceKind::OriginAccessControl => {
            attrs.insert("Id".to_string(), cdn_id(&ctx.digest(name, "Id", 13)));
        }
        ResourceKind::Distribution => {
            let id = cdn_id(&ctx.digest(name, "Id", 13));
            attrs.insert(
                "DomainName".to_string(),
                format!("d{}.cloudfront.net", ctx.digest(name, "DomainName", 13)),
            );
            attrs.insert(
                "Arn".to_string(),
                format!("arn:aws:cloudfront::{}:distribution/{id}", stack.account),
            );
            attrs.insert("Id".to_string(), id);
        }
        ResourceKind::Certificate => {
            attrs.insert(
                "Arn".to_string(),
                required_str(node, props, "CertificateArn")?.to_string(),
            );
        }
        ResourceKind::HostedZone => {
            attrs.insert(
                "HostedZoneId".to_string(),
                required_str(node, props, "HostedZoneId")?.to_string(),
            );
            attrs.insert(
                "ZoneName".to_string(),
                required_str(node, props, "ZoneName")?.to_string(),
            );
        }
        ResourceKind::AliasRecord => {
            attrs.insert("Name".to_string(), required_str(node, props, "Name")?.to_string());
        }
        ResourceKind::FunctionPermission
        | ResourceKind::BucketDeployment
        | ResourceKind::BucketPolicy => {}
    }

    Ok(attrs)
}

fn required_str<'a>(
    node: &ResourceNode,
    props: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<&'a str> {
    props.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        Error::configuration(&node.name, format!("'{key}' must resolve to a string"))
    })
}

/// CDN ids are upper-case and start with `E`.
fn cdn_id(digest: &str) -> String {
    format!("E{}", digest.to_ascii_uppercase())
}

/// Function names allow letters, digits, hyphens and underscores only.
fn sanitize_function_name(physical: &str) -> String {
    physical
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Bucket names allow lowercase letters, digits and hyphens only.
fn sanitize_bucket_name(physical: &str) -> String {
    physical
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}
