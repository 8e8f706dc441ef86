//! Resource-based access policies.
//!
//! Grants are scoped to a specific consumer: a service principal may only be
//! granted access under a condition naming the consuming resource's own
//! runtime identity, which must already be resolvable when the grant is
//! attached.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::reference::{AttributeTable, DeferredValue, PropertyValue, defer};
use crate::{Error, Result};

/// CDN service principal allowed to read from the storage origin.
pub const CDN_SERVICE: &str = "cloudfront.amazonaws.com";
/// Gateway service principal allowed to invoke the compute unit.
pub const GATEWAY_SERVICE: &str = "apigateway.amazonaws.com";

/// Who a statement grants access to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Principal {
    /// A provider service acting on behalf of another resource.
    Service(String),
    /// A whole account.
    Account(String),
}

impl Principal {
    pub fn service(name: impl Into<String>) -> Self {
        Self::Service(name.into())
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Principal::Service(s) => serde_json::json!({ "Service": s }),
            Principal::Account(a) => serde_json::json!({ "AWS": a }),
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::Service(s) => write!(f, "service:{s}"),
            Principal::Account(a) => write!(f, "account:{a}"),
        }
    }
}

/// Condition block: operator -> condition key -> value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    predicates: BTreeMap<String, BTreeMap<String, PropertyValue>>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// `StringEquals { key: value }`.
    pub fn string_equals(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::new().with("StringEquals", key, value)
    }

    /// `ArnLike { key: value }`.
    pub fn arn_like(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::new().with("ArnLike", key, value)
    }

    pub fn with(
        mut self,
        operator: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.predicates
            .entry(operator.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.values().all(BTreeMap::is_empty)
    }

    pub fn get(&self, operator: &str, key: &str) -> Option<&PropertyValue> {
        self.predicates.get(operator).and_then(|preds| preds.get(key))
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.predicates
            .iter()
            .flat_map(|(op, preds)| preds.values().map(move |v| (op.as_str(), v)))
    }

    fn to_property(&self) -> PropertyValue {
        PropertyValue::map(self.predicates.iter().map(|(op, preds)| {
            (
                op.clone(),
                PropertyValue::map(preds.iter().map(|(k, v)| (k.clone(), v.clone()))),
            )
        }))
    }
}

/// One allow statement in a resource policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessStatement {
    pub principal: Principal,
    pub actions: BTreeSet<String>,
    pub resources: Vec<PropertyValue>,
    pub condition: Condition,
}

impl AccessStatement {
    fn matches(&self, principal: &Principal, actions: &BTreeSet<String>, condition: &Condition) -> bool {
        self.principal == *principal && self.actions == *actions && self.condition == *condition
    }

    /// Statement as a policy-document property; deferred values stay deferred.
    pub fn to_property(&self) -> PropertyValue {
        let actions: Vec<PropertyValue> = self.actions.iter().map(|a| a.as_str().into()).collect();
        let mut entries = vec![
            ("Effect", PropertyValue::string("Allow")),
            ("Principal", PropertyValue::Literal(self.principal.to_json())),
            ("Action", PropertyValue::List(actions)),
            ("Resource", PropertyValue::List(self.resources.clone())),
        ];
        if !self.condition.is_empty() {
            entries.push(("Condition", self.condition.to_property()));
        }
        PropertyValue::map(entries)
    }
}

/// Ordered set of statements attached to one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    statements: Vec<AccessStatement>,
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> &[AccessStatement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Add a statement, merging into an existing one with the same
    /// `(principal, actions, condition)` key. Returns true if a new statement was added.
    pub fn attach(&mut self, statement: AccessStatement) -> bool {
        if let Some(existing) = self
            .statements
            .iter_mut()
            .find(|s| s.matches(&statement.principal, &statement.actions, &statement.condition))
        {
            for resource in statement.resources {
                if !existing.resources.contains(&resource) {
                    existing.resources.push(resource);
                }
            }
            return false;
        }
        self.statements.push(statement);
        true
    }

    pub fn to_property(&self) -> PropertyValue {
        PropertyValue::map([
            ("Version", PropertyValue::string("2012-10-17")),
            (
                "Statement",
                PropertyValue::list(self.statements.iter().map(AccessStatement::to_property)),
            ),
        ])
    }

    /// Every deferred value referenced by any statement.
    pub fn references(&self) -> Vec<DeferredValue> {
        let doc = self.to_property();
        doc.references().into_iter().cloned().collect()
    }
}

/// Builds least-privilege statements against the attributes resolved so far.
pub struct PolicyBinder<'a> {
    table: &'a AttributeTable,
}

impl<'a> PolicyBinder<'a> {
    pub fn new(table: &'a AttributeTable) -> Self {
        Self { table }
    }

    /// Grant `principal` the `actions` on `resources` of `on_resource`, when `condition` holds.
    ///
    /// Service principals must be scoped by a condition. Every deferred value
    /// in the condition must already resolve, and wildcards are only accepted
    /// in pattern conditions anchored on a resolved identity.
    pub fn grant(
        &self,
        document: &mut PolicyDocument,
        principal: Principal,
        actions: impl IntoIterator<Item = impl Into<String>>,
        on_resource: &str,
        resources: Vec<PropertyValue>,
        condition: Condition,
    ) -> Result<bool> {
        let actions: BTreeSet<String> = actions.into_iter().map(Into::into).collect();
        if actions.is_empty() {
            return Err(Error::configuration(on_resource, "grant names no actions"));
        }
        if resources.is_empty() {
            return Err(Error::configuration(on_resource, "grant names no resources"));
        }

        if matches!(principal, Principal::Service(_)) && condition.is_empty() {
            return Err(Error::configuration(
                on_resource,
                format!("grant to {principal} must be scoped by a condition"),
            ));
        }

        for (operator, value) in condition.entries() {
            let references = value.references();
            for reference in &references {
                self.table.lookup(reference)?;
            }
            // Pattern operators may narrow below a resolved identity
            // (`<execution-arn>/*/*`), never stand in for one.
            let anchored = operator.ends_with("Like") && !references.is_empty();
            if self.table.resolve_string(value)?.contains('*') && !anchored {
                return Err(Error::configuration(
                    on_resource,
                    format!("grant to {principal} uses a wildcard {operator} condition"),
                ));
            }
        }

        Ok(document.attach(AccessStatement {
            principal,
            actions,
            resources,
            condition,
        }))
    }

    /// Read access to every object in `bucket`, only for requests from `distribution`.
    pub fn origin_read(
        &self,
        document: &mut PolicyDocument,
        bucket: &str,
        distribution: &str,
    ) -> Result<bool> {
        self.grant(
            document,
            Principal::service(CDN_SERVICE),
            ["s3:GetObject"],
            bucket,
            vec![PropertyValue::join([defer(bucket, "Arn").into(), "/*".into()])],
            Condition::string_equals("AWS:SourceArn", defer(distribution, "Arn")),
        )
    }

    /// Invoke access to `function`, only for calls routed through `api`.
    pub fn gateway_invoke(
        &self,
        document: &mut PolicyDocument,
        function: &str,
        api: &str,
    ) -> Result<bool> {
        self.grant(
            document,
            Principal::service(GATEWAY_SERVICE),
            ["lambda:InvokeFunction"],
            function,
            vec![defer(function, "Arn").into()],
            Condition::arn_like(
                "AWS:SourceArn",
                PropertyValue::join([defer(api, "ExecutionArn").into(), "/*/*".into()]),
            ),
        )
    }
}

/// Origin-access-control configuration for a storage origin.
///
/// The CDN always signs origin requests with SigV4; the legacy
/// origin-access-identity mechanism is never used.
pub fn origin_access_control_config(name: &str) -> PropertyValue {
    PropertyValue::map([
        ("Name", PropertyValue::string(name)),
        ("OriginAccessControlOriginType", "s3".into()),
        ("SigningBehavior", "always".into()),
        ("SigningProtocol", "sigv4".into()),
        (
            "Description",
            PropertyValue::string(format!("Origin access control for {name}")),
        ),
    ])
}

/// CDN origin entry that reaches `bucket` through `access_control`.
pub fn private_s3_origin(origin_id: &str, bucket: &str, access_control: &str) -> PropertyValue {
    PropertyValue::map([
        ("Id", PropertyValue::string(origin_id)),
        ("DomainName", defer(bucket, "RegionalDomainName").into()),
        ("OriginAccessControlId", defer(access_control, "Id").into()),
        (
            "S3OriginConfig",
            PropertyValue::map([("OriginAccessIdentity", PropertyValue::string(""))]),
        ),
    ])
}
