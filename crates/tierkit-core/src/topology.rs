//! Topology assembler.
//!
//! A [`Topology`] owns every node of one deployment: the dependency graph,
//! the attribute table filled in as nodes are constructed, the resource
//! policies and the exported outputs. Nothing is registered globally, so any
//! number of topologies can be assembled side by side.
//!
//! Assembly walks a fixed sequence of phases:
//!
//! ```text
//! EMPTY -> COMPUTE_BOUND -> GATEWAY_BOUND -> ORIGIN_BOUND -> ACCESS_CONTROLLED
//!       -> DISTRIBUTED -> DOMAIN_BOUND -> FINALIZED
//! ```
//!
//! Each transition describes the nodes of its phase and constructs them in
//! dependency order before the phase is entered. Later phases consume the
//! attributes published by earlier ones through deferred values.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::catalog::{self, AttributeContext, CDN_HOSTED_ZONE_ID};
use crate::graph::ResourceGraph;
use crate::id::AssemblyId;
use crate::intent::{
    ComputeSpec, DistributionSpec, DomainBinding, GatewaySpec, OriginSpec, ResolvedDomain,
    StackSettings, TopologyIntent,
};
use crate::output::{OutputSet, RenderedOutputs};
use crate::phase::Phase;
use crate::policy::{
    Condition, PolicyBinder, PolicyDocument, Principal, origin_access_control_config,
    private_s3_origin,
};
use crate::reference::{AttributeTable, PropertyValue, defer};
use crate::resource::{
    ConstructedResource, DeletionPolicy, Properties, ResourceKind, ResourceNode,
};
use crate::{Error, Result};

/// Managed cache policy tuned for static content.
const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";
const ORIGIN_ID: &str = "StorageOrigin";

/// Logical names of the nodes later phases wire against.
#[derive(Debug, Clone, Default)]
struct Bindings {
    function: Option<String>,
    api: Option<String>,
    stage: Option<String>,
    bucket: Option<String>,
    access_control: Option<String>,
    certificate: Option<String>,
    distribution: Option<String>,
    alias_record: Option<String>,
}

fn bound<'a>(slot: &'a Option<String>, what: &str, current: Phase, required: Phase) -> Result<&'a str> {
    slot.as_deref().ok_or_else(|| Error::PhaseOrdering {
        current,
        required,
        action: format!("reference the {what}"),
    })
}

/// One deployment's resource graph, assembled phase by phase.
#[derive(Debug)]
pub struct Topology {
    assembly_id: AssemblyId,
    stack: StackSettings,
    domain: Option<ResolvedDomain>,
    phase: Phase,
    graph: ResourceGraph,
    attributes: AttributeTable,
    constructed: Vec<ConstructedResource>,
    policies: BTreeMap<String, PolicyDocument>,
    outputs: OutputSet,
    bindings: Bindings,
}

impl Topology {
    /// Start an empty topology.
    ///
    /// Whether the domain sub-assembly runs is decided here, once: a present
    /// binding is validated before any node exists, an absent one removes the
    /// certificate, hosted zone and alias record from every later phase.
    pub fn new(stack: StackSettings, domain: Option<DomainBinding>) -> Result<Self> {
        let domain = domain.map(|d| d.resolve(&stack)).transpose()?;
        Ok(Self {
            assembly_id: AssemblyId::new(),
            stack,
            domain,
            phase: Phase::Empty,
            graph: ResourceGraph::new(),
            attributes: AttributeTable::new(),
            constructed: Vec::new(),
            policies: BTreeMap::new(),
            outputs: OutputSet::new(),
            bindings: Bindings::default(),
        })
    }

    /// Pin the assembly id, making generated identifiers reproducible.
    pub fn with_assembly_id(mut self, assembly_id: AssemblyId) -> Self {
        self.assembly_id = assembly_id;
        self
    }

    pub fn assembly_id(&self) -> AssemblyId {
        self.assembly_id
    }

    pub fn stack(&self) -> &StackSettings {
        &self.stack
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn domain(&self) -> Option<&ResolvedDomain> {
        self.domain.as_ref()
    }

    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.graph.get(name)
    }

    /// Constructed resources in construction order.
    pub fn resources(&self) -> &[ConstructedResource] {
        &self.constructed
    }

    pub fn resource(&self, name: &str) -> Option<&ConstructedResource> {
        self.constructed.iter().find(|r| r.name == name)
    }

    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &ConstructedResource> {
        self.constructed.iter().filter(move |r| r.kind == kind)
    }

    pub fn attributes(&self) -> &AttributeTable {
        &self.attributes
    }

    pub fn policy(&self, resource: &str) -> Option<&PolicyDocument> {
        self.policies.get(resource)
    }

    pub fn outputs(&self) -> &OutputSet {
        &self.outputs
    }

    /// Register a node in the current phase. It is constructed when the
    /// current phase transition completes.
    pub fn describe(
        &mut self,
        name: impl Into<String>,
        kind: ResourceKind,
        config: BTreeMap<String, PropertyValue>,
        dependencies: impl IntoIterator<Item = String>,
    ) -> Result<&ResourceNode> {
        let node = ResourceNode::describe(name, kind, config, dependencies)?;
        self.register(node)
    }

    fn register(&mut self, node: ResourceNode) -> Result<&ResourceNode> {
        self.ensure_open("describe a resource")?;
        debug!(node = %node.name, kind = %node.kind, phase = %self.phase, "Describing resource");
        self.graph.insert(node)
    }

    /// Require `dependent` to be constructed after `dependency`.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<()> {
        self.ensure_open("add a dependency")?;
        self.graph.check_dependency(dependent, dependency)?;
        if self.attributes.is_constructed(dependent) && !self.attributes.is_constructed(dependency) {
            return Err(Error::configuration(
                dependent,
                format!("already constructed; cannot wait for '{dependency}'"),
            ));
        }
        self.graph.add_dependency(dependent, dependency)
    }

    /// Resolve a property value against everything constructed so far.
    pub fn resolve(&self, value: &PropertyValue) -> Result<serde_json::Value> {
        self.attributes.resolve(value)
    }

    /// Attach a least-privilege statement to `on_resource`'s policy.
    ///
    /// Only functions and buckets carry a resource policy. Statements added
    /// after a function's permissions were described are emitted at
    /// finalization. Returns false when an identical `(principal, actions, condition)`
    /// statement was already attached.
    pub fn grant(
        &mut self,
        principal: Principal,
        actions: impl IntoIterator<Item = impl Into<String>>,
        on_resource: &str,
        resources: Vec<PropertyValue>,
        condition: Condition,
    ) -> Result<bool> {
        self.ensure_open("grant access")?;
        if !self.graph.contains(on_resource) {
            return Err(Error::configuration(on_resource, "grant targets an unknown resource"));
        }
        let kind = self.graph.get(on_resource).map(|node| node.kind);
        if !matches!(kind, Some(ResourceKind::Function | ResourceKind::Bucket)) {
            return Err(Error::configuration(
                on_resource,
                "only functions and buckets carry a resource policy",
            ));
        }
        let document = self.policies.entry(on_resource.to_string()).or_default();
        let added = PolicyBinder::new(&self.attributes).grant(
            document,
            principal,
            actions,
            on_resource,
            resources,
            condition,
        )?;
        debug!(resource = %on_resource, added, "Granted access");
        Ok(added)
    }

    /// Export a named value, rendered once the topology is finalized.
    pub fn export(
        &mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
        description: Option<&str>,
    ) -> Result<()> {
        self.ensure_open("export an output")?;
        self.outputs
            .export(name, value, description.map(str::to_string))
    }

    /// Concrete output values. Only available once finalized.
    pub fn render(&self) -> Result<RenderedOutputs> {
        if self.phase != Phase::Finalized {
            return Err(Error::PhaseOrdering {
                current: self.phase,
                required: Phase::Finalized,
                action: "render outputs".to_string(),
            });
        }
        self.outputs.render(&self.attributes)
    }

    /// EMPTY -> COMPUTE_BOUND: the request-handling function.
    pub fn bind_compute(&mut self, spec: &ComputeSpec) -> Result<()> {
        self.begin(Phase::ComputeBound)?;
        spec.validate()?;

        let mut config = Properties::new()
            .set(
                "Code",
                PropertyValue::map([("EntryPath", PropertyValue::string(&spec.entry_path))]),
            )
            .set("Handler", spec.handler_ref.as_str())
            .set("Runtime", spec.runtime.as_str())
            .set("Timeout", spec.timeout_seconds)
            .set("MemorySize", spec.memory_mb);
        if !spec.env.is_empty() {
            let variables = PropertyValue::map(
                spec.env
                    .iter()
                    .map(|(k, v)| (k.clone(), PropertyValue::string(v))),
            );
            config = config.set("Environment", PropertyValue::map([("Variables", variables)]));
        }

        let name = self
            .describe(&spec.name, ResourceKind::Function, config.build(), vec![])?
            .name
            .clone();
        self.bindings.function = Some(name);
        self.complete(Phase::ComputeBound)
    }

    /// COMPUTE_BOUND -> GATEWAY_BOUND: HTTP API proxying every route to the function.
    pub fn bind_gateway(&mut self, spec: &GatewaySpec) -> Result<()> {
        self.begin(Phase::GatewayBound)?;
        let function = bound(
            &self.bindings.function,
            "compute unit",
            self.phase,
            Phase::ComputeBound,
        )?
        .to_string();
        let api = spec.name.clone();

        let cors = PropertyValue::map([
            (
                "AllowOrigins",
                PropertyValue::list(spec.cors_origins.iter().map(PropertyValue::string)),
            ),
            ("AllowMethods", PropertyValue::list(["*".into()])),
            ("AllowHeaders", PropertyValue::list(["*".into()])),
        ]);
        self.describe(
            &api,
            ResourceKind::HttpApi,
            Properties::new()
                .set("Name", format!("{}-{}", self.stack.name, api))
                .set("ProtocolType", "HTTP")
                .set("CorsConfiguration", cors)
                .build(),
            vec![],
        )?;

        let stage = format!("{api}DefaultStage");
        self.describe(
            &stage,
            ResourceKind::HttpStage,
            Properties::new()
                .set("ApiId", defer(&api, "ApiId"))
                .set("StageName", "$default")
                .set("AutoDeploy", true)
                .build(),
            vec![],
        )?;

        // The permission below is conditioned on the API's execution ARN.
        self.construct_pending()?;

        let integration = format!("{api}Integration");
        self.describe(
            &integration,
            ResourceKind::HttpIntegration,
            Properties::new()
                .set("ApiId", defer(&api, "ApiId"))
                .set("IntegrationType", "AWS_PROXY")
                .set("IntegrationUri", defer(&function, "Arn"))
                .set("PayloadFormatVersion", "2.0")
                .build(),
            vec![],
        )?;

        let client_id = spec
            .auth_client_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let authorizer = match client_id {
            Some(client_id) => {
                let authorizer = format!("{api}Authorizer");
                let jwt = PropertyValue::map([
                    ("Audience", PropertyValue::list([client_id.into()])),
                    ("Issuer", PropertyValue::string(&spec.auth_issuer)),
                ]);
                self.describe(
                    &authorizer,
                    ResourceKind::HttpAuthorizer,
                    Properties::new()
                        .set("ApiId", defer(&api, "ApiId"))
                        .set("AuthorizerType", "JWT")
                        .set("Name", format!("{api}BearerAuthorizer"))
                        .set(
                            "IdentitySource",
                            PropertyValue::list(["$request.header.Authorization".into()]),
                        )
                        .set("JwtConfiguration", jwt)
                        .build(),
                    vec![],
                )?;
                Some(authorizer)
            }
            None => None,
        };

        let route = format!("{api}ProxyRoute");
        let auth_type = if authorizer.is_some() { "JWT" } else { "NONE" };
        self.describe(
            &route,
            ResourceKind::HttpRoute,
            Properties::new()
                .set("ApiId", defer(&api, "ApiId"))
                .set("RouteKey", spec.route_key.as_str())
                .set(
                    "Target",
                    PropertyValue::join([
                        "integrations/".into(),
                        defer(&integration, "IntegrationId").into(),
                    ]),
                )
                .set("AuthorizationType", auth_type)
                .set_opt("AuthorizerId", authorizer.as_ref().map(|a| defer(a, "AuthorizerId")))
                .build(),
            vec![],
        )?;

        let document = self.policies.entry(function.clone()).or_default();
        PolicyBinder::new(&self.attributes).gateway_invoke(document, &function, &api)?;
        self.describe_invoke_permissions(&function)?;

        self.bindings.api = Some(api);
        self.bindings.stage = Some(stage);
        self.complete(Phase::GatewayBound)
    }

    /// One permission node per statement on the function's policy, skipping
    /// statements already described.
    fn describe_invoke_permissions(&mut self, function: &str) -> Result<()> {
        let statements = self
            .policies
            .get(function)
            .map(|d| d.statements().to_vec())
            .unwrap_or_default();

        for (idx, statement) in statements.iter().enumerate() {
            let principal = match &statement.principal {
                Principal::Service(service) => service.as_str(),
                Principal::Account(account) => account.as_str(),
            };
            let name = if idx == 0 {
                format!("{function}InvokePermission")
            } else {
                format!("{function}InvokePermission{}", idx + 1)
            };
            if self.graph.contains(&name) {
                continue;
            }
            let action = statement
                .actions
                .iter()
                .next()
                .cloned()
                .unwrap_or_default();
            let source_arn = statement
                .condition
                .get("ArnLike", "AWS:SourceArn")
                .or_else(|| statement.condition.get("StringEquals", "AWS:SourceArn"))
                .cloned();
            self.describe(
                name,
                ResourceKind::FunctionPermission,
                Properties::new()
                    .set("FunctionName", defer(function, "Arn"))
                    .set("Action", action)
                    .set("Principal", principal)
                    .set_opt("SourceArn", source_arn)
                    .build(),
                vec![],
            )?;
        }
        Ok(())
    }

    /// GATEWAY_BOUND -> ORIGIN_BOUND: private bucket for the static frontend.
    pub fn bind_origin(&mut self, spec: &OriginSpec) -> Result<()> {
        self.begin(Phase::OriginBound)?;
        let bucket = spec.name.clone();

        let block_all = PropertyValue::map([
            ("BlockPublicAcls", true.into()),
            ("BlockPublicPolicy", true.into()),
            ("IgnorePublicAcls", true.into()),
            ("RestrictPublicBuckets", true.into()),
        ]);
        let website = PropertyValue::map([
            ("IndexDocument", PropertyValue::string(&spec.index_document)),
            ("ErrorDocument", PropertyValue::string(&spec.error_document)),
        ]);
        let policy = if spec.force_destroy {
            DeletionPolicy::ForceDelete
        } else {
            DeletionPolicy::Retain
        };
        let node = ResourceNode::describe(
            &bucket,
            ResourceKind::Bucket,
            Properties::new()
                .set("PublicAccessBlockConfiguration", block_all)
                .set("WebsiteConfiguration", website)
                .build(),
            vec![],
        )?
        .with_deletion_policy(policy);
        self.register(node)?;

        if let Some(content_root) = &spec.content_root {
            self.describe(
                format!("{bucket}Deployment"),
                ResourceKind::BucketDeployment,
                Properties::new()
                    .set("SourcePath", content_root.as_str())
                    .set("DestinationBucketName", defer(&bucket, "BucketName"))
                    .set("Prune", true)
                    .build(),
                vec![],
            )?;
        }

        self.bindings.bucket = Some(bucket);
        self.complete(Phase::OriginBound)
    }

    /// ORIGIN_BOUND -> ACCESS_CONTROLLED: origin-access-control the CDN signs with.
    pub fn control_access(&mut self) -> Result<()> {
        self.begin(Phase::AccessControlled)?;
        let bucket = bound(&self.bindings.bucket, "storage origin", self.phase, Phase::OriginBound)?
            .to_string();

        let access_control = format!("{bucket}OAC");
        self.describe(
            &access_control,
            ResourceKind::OriginAccessControl,
            Properties::new()
                .set(
                    "OriginAccessControlConfig",
                    origin_access_control_config(&format!("{}-{access_control}", self.stack.name)),
                )
                .build(),
            vec![bucket],
        )?;

        self.bindings.access_control = Some(access_control);
        self.complete(Phase::AccessControlled)
    }

    /// ACCESS_CONTROLLED -> DISTRIBUTED: CDN in front of the private origin.
    pub fn distribute(&mut self, spec: &DistributionSpec) -> Result<()> {
        self.begin(Phase::Distributed)?;
        let bucket = bound(&self.bindings.bucket, "storage origin", self.phase, Phase::OriginBound)?
            .to_string();
        let access_control = bound(
            &self.bindings.access_control,
            "origin access control",
            self.phase,
            Phase::AccessControlled,
        )?
        .to_string();

        let certificate = match self.domain.clone() {
            Some(domain) => {
                let certificate = "Certificate".to_string();
                self.describe(
                    &certificate,
                    ResourceKind::Certificate,
                    Properties::new()
                        .set("CertificateArn", domain.certificate_arn.as_str())
                        .build(),
                    vec![],
                )?;
                Some((certificate, domain))
            }
            None => None,
        };

        let mut config = vec![
            ("Enabled", PropertyValue::from(true)),
            ("HttpVersion", "http2".into()),
            ("DefaultRootObject", PropertyValue::string(&spec.default_root_object)),
            (
                "Origins",
                PropertyValue::list([private_s3_origin(ORIGIN_ID, &bucket, &access_control)]),
            ),
            (
                "DefaultCacheBehavior",
                PropertyValue::map([
                    ("TargetOriginId", PropertyValue::string(ORIGIN_ID)),
                    ("ViewerProtocolPolicy", "redirect-to-https".into()),
                    ("AllowedMethods", PropertyValue::list(["GET".into(), "HEAD".into()])),
                    ("CachePolicyId", CACHING_OPTIMIZED_POLICY_ID.into()),
                    ("Compress", true.into()),
                ]),
            ),
        ];
        if spec.spa_fallback {
            let page = format!("/{}", spec.default_root_object.trim_start_matches('/'));
            config.push((
                "CustomErrorResponses",
                PropertyValue::list([PropertyValue::map([
                    ("ErrorCode", PropertyValue::from(404u32)),
                    ("ResponseCode", 200u32.into()),
                    ("ResponsePagePath", PropertyValue::string(page)),
                ])]),
            ));
        }
        if let Some((certificate, domain)) = &certificate {
            config.push((
                "Aliases",
                PropertyValue::list([PropertyValue::string(&domain.domain_name)]),
            ));
            config.push((
                "ViewerCertificate",
                PropertyValue::map([
                    ("AcmCertificateArn", defer(certificate, "Arn").into()),
                    ("SslSupportMethod", "sni-only".into()),
                    ("MinimumProtocolVersion", "TLSv1.2_2021".into()),
                ]),
            ));
        }

        let distribution = spec.name.clone();
        self.describe(
            &distribution,
            ResourceKind::Distribution,
            Properties::new()
                .set("DistributionConfig", PropertyValue::map(config))
                .build(),
            vec![],
        )?;

        self.bindings.certificate = certificate.map(|(name, _)| name);
        self.bindings.distribution = Some(distribution);
        self.complete(Phase::Distributed)
    }

    /// DISTRIBUTED -> DOMAIN_BOUND: alias record for the custom domain, if any.
    pub fn bind_domain(&mut self) -> Result<()> {
        self.begin(Phase::DomainBound)?;

        match self.domain.clone() {
            Some(domain) => {
                let distribution = bound(
                    &self.bindings.distribution,
                    "distribution",
                    self.phase,
                    Phase::Distributed,
                )?
                .to_string();

                let zone = "HostedZone".to_string();
                self.describe(
                    &zone,
                    ResourceKind::HostedZone,
                    Properties::new()
                        .set("HostedZoneId", domain.hosted_zone_id.as_str())
                        .set("ZoneName", domain.zone_name.as_str())
                        .build(),
                    vec![],
                )?;

                let record = "AliasRecord".to_string();
                self.describe(
                    &record,
                    ResourceKind::AliasRecord,
                    Properties::new()
                        .set("HostedZoneId", defer(&zone, "HostedZoneId"))
                        .set("Name", domain.domain_name.as_str())
                        .set("Type", "A")
                        .set(
                            "AliasTarget",
                            PropertyValue::map([
                                ("DNSName", defer(&distribution, "DomainName").into()),
                                ("HostedZoneId", CDN_HOSTED_ZONE_ID.into()),
                                ("EvaluateTargetHealth", false.into()),
                            ]),
                        )
                        .build(),
                    vec![],
                )?;
                self.bindings.alias_record = Some(record);
            }
            None => {
                debug!("No domain configured, skipping domain binding");
            }
        }

        self.complete(Phase::DomainBound)
    }

    /// DOMAIN_BOUND -> FINALIZED: scope the origin to this distribution and export outputs.
    pub fn finalize(&mut self) -> Result<()> {
        self.begin(Phase::Finalized)?;
        let bucket = bound(&self.bindings.bucket, "storage origin", self.phase, Phase::OriginBound)?
            .to_string();
        let distribution = bound(
            &self.bindings.distribution,
            "distribution",
            self.phase,
            Phase::Distributed,
        )?
        .to_string();
        let stage = bound(&self.bindings.stage, "gateway stage", self.phase, Phase::GatewayBound)?
            .to_string();

        let document = self.policies.entry(bucket.clone()).or_default();
        PolicyBinder::new(&self.attributes).origin_read(document, &bucket, &distribution)?;
        let policy_document = document.to_property();

        self.describe(
            format!("{bucket}Policy"),
            ResourceKind::BucketPolicy,
            Properties::new()
                .set("Bucket", defer(&bucket, "BucketName"))
                .set("PolicyDocument", policy_document)
                .build(),
            vec![distribution.clone()],
        )?;
        self.describe_late_policies(&bucket)?;

        self.export("ApiUrl", defer(&stage, "Url"), Some("HTTP API Gateway URL"))?;
        self.export(
            "CloudFrontUrl",
            PropertyValue::join(["https://".into(), defer(&distribution, "DomainName").into()]),
            Some("CloudFront Distribution URL"),
        )?;
        self.export("BucketName", defer(&bucket, "BucketName"), Some("S3 Bucket Name"))?;
        self.export(
            "DistributionId",
            defer(&distribution, "Id"),
            Some("CloudFront Distribution ID"),
        )?;

        self.complete(Phase::Finalized)?;
        // Every exported value must converge before the pass is reported done.
        self.render()?;
        Ok(())
    }

    /// Policy nodes for grants made after their target's phase emitted one.
    fn describe_late_policies(&mut self, origin_bucket: &str) -> Result<()> {
        let targets: Vec<(String, ResourceKind)> = self
            .policies
            .iter()
            .filter(|(name, document)| name.as_str() != origin_bucket && !document.is_empty())
            .filter_map(|(name, _)| self.graph.get(name).map(|node| (name.clone(), node.kind)))
            .collect();

        for (target, kind) in targets {
            match kind {
                ResourceKind::Function => self.describe_invoke_permissions(&target)?,
                ResourceKind::Bucket => {
                    let Some(policy_document) = self.policies.get(&target).map(|d| d.to_property())
                    else {
                        continue;
                    };
                    self.describe(
                        format!("{target}Policy"),
                        ResourceKind::BucketPolicy,
                        Properties::new()
                            .set("Bucket", defer(&target, "BucketName"))
                            .set("PolicyDocument", policy_document)
                            .build(),
                        vec![],
                    )?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn ensure_open(&self, action: &str) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(Error::PhaseOrdering {
                current: self.phase,
                required: Phase::DomainBound,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    fn begin(&self, target: Phase) -> Result<()> {
        let required = target.predecessor().unwrap_or(Phase::Empty);
        if self.phase != required {
            return Err(Error::PhaseOrdering {
                current: self.phase,
                required,
                action: format!("enter {target}"),
            });
        }
        Ok(())
    }

    fn complete(&mut self, target: Phase) -> Result<()> {
        self.construct_pending()?;
        info!(
            phase = %target,
            resources = self.constructed.len(),
            "Entered phase"
        );
        self.phase = target;
        Ok(())
    }

    /// Construct every registered node not yet constructed, in dependency order.
    fn construct_pending(&mut self) -> Result<()> {
        let pending: Vec<String> = self
            .graph
            .topological_order()?
            .into_iter()
            .filter(|name| !self.attributes.is_constructed(name))
            .map(String::from)
            .collect();

        for name in pending {
            self.construct(&name)?;
        }
        Ok(())
    }

    fn construct(&mut self, name: &str) -> Result<()> {
        let node = self
            .graph
            .get(name)
            .ok_or_else(|| Error::configuration(name, "unknown node"))?;

        let mut properties = serde_json::Map::new();
        for (key, value) in &node.config {
            properties.insert(key.clone(), self.attributes.resolve(value)?);
        }

        let ctx = AttributeContext {
            stack: &self.stack,
            assembly: &self.assembly_id,
        };
        let attributes = catalog::provider_attributes(node, &properties, &ctx)?;

        let resource = ConstructedResource {
            name: node.name.clone(),
            kind: node.kind,
            properties: serde_json::Value::Object(properties),
            depends_on: node.depends_on.clone(),
            deletion_policy: node.deletion_policy,
            attributes: attributes.clone(),
        };

        debug!(node = %name, kind = %resource.kind, "Constructed resource");
        self.attributes.publish(name, attributes)?;
        self.constructed.push(resource);
        Ok(())
    }
}

/// Run every phase of `intent` in order and return the finalized topology.
pub fn assemble(intent: &TopologyIntent) -> Result<Topology> {
    assemble_with(intent, AssemblyId::new())
}

/// Like [`assemble`], with a pinned assembly id for reproducible output.
pub fn assemble_with(intent: &TopologyIntent, assembly_id: AssemblyId) -> Result<Topology> {
    info!(stack = %intent.stack.name, assembly = %assembly_id, "Assembling topology");
    let mut topology =
        Topology::new(intent.stack.clone(), intent.domain.clone())?.with_assembly_id(assembly_id);
    topology.bind_compute(&intent.compute)?;
    topology.bind_gateway(&intent.gateway)?;
    topology.bind_origin(&intent.origin)?;
    topology.control_access()?;
    topology.distribute(&intent.distribution)?;
    topology.bind_domain()?;
    topology.finalize()?;
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent() -> TopologyIntent {
        TopologyIntent::new(StackSettings::new("app"), ComputeSpec::new("svc", "h"))
    }

    fn fixed_id() -> AssemblyId {
        "0190a5c4-6f2e-7a00-8000-000000000001".parse().unwrap()
    }

    #[test]
    fn test_assemble_without_domain_renders_outputs() {
        let topology = assemble(&intent()).unwrap();
        assert_eq!(topology.phase(), Phase::Finalized);

        let outputs = topology.render().unwrap();
        assert_eq!(
            outputs.names(),
            vec!["ApiUrl", "CloudFrontUrl", "BucketName", "DistributionId"]
        );
        for output in outputs.iter() {
            assert!(!output.value.is_empty(), "{} is empty", output.name);
        }

        let distribution = topology.resource("Distribution").unwrap();
        assert!(outputs.get("CloudFrontUrl").unwrap().starts_with("https://"));
        assert_eq!(
            outputs.get("CloudFrontUrl").unwrap(),
            format!("https://{}", distribution.attribute("DomainName").unwrap())
        );
        assert_eq!(outputs.get("DistributionId"), distribution.attribute("Id"));
        assert_eq!(
            outputs.get("BucketName"),
            topology.resource("WebsiteBucket").unwrap().attribute("BucketName")
        );
        assert!(outputs.get("ApiUrl").unwrap().starts_with("https://"));
    }

    #[test]
    fn test_no_domain_leaves_no_domain_subgraph() {
        let topology = assemble(&intent()).unwrap();
        assert!(topology.domain().is_none());
        assert_eq!(topology.resources_of(ResourceKind::Certificate).count(), 0);
        assert_eq!(topology.resources_of(ResourceKind::HostedZone).count(), 0);
        assert_eq!(topology.resources_of(ResourceKind::AliasRecord).count(), 0);

        let distribution = topology.resource("Distribution").unwrap();
        assert!(distribution.pointer("/DistributionConfig/Aliases").is_none());
        assert!(distribution.pointer("/DistributionConfig/ViewerCertificate").is_none());
    }

    #[test]
    fn test_domain_binding_populates_aliases_and_record() {
        let intent = intent().with_domain(DomainBinding::new("app.example.com", "cert-1", "zone-1"));
        let topology = assemble(&intent).unwrap();

        let distribution = topology.resource("Distribution").unwrap();
        assert_eq!(
            distribution.pointer("/DistributionConfig/Aliases").unwrap(),
            &serde_json::json!(["app.example.com"])
        );
        assert_eq!(
            distribution
                .pointer("/DistributionConfig/ViewerCertificate/AcmCertificateArn")
                .unwrap(),
            "arn:aws:acm:us-east-1:000000000000:certificate/cert-1"
        );

        let record = topology.resource("AliasRecord").unwrap();
        assert_eq!(
            record.pointer("/AliasTarget/DNSName").unwrap(),
            distribution.attribute("DomainName").unwrap()
        );
        assert_eq!(record.pointer("/HostedZoneId").unwrap(), "zone-1");
        assert_eq!(record.pointer("/Name").unwrap(), "app.example.com");

        let order: Vec<&str> = topology.resources().iter().map(|r| r.name.as_str()).collect();
        let cert = order.iter().position(|n| *n == "Certificate").unwrap();
        let dist = order.iter().position(|n| *n == "Distribution").unwrap();
        let alias = order.iter().position(|n| *n == "AliasRecord").unwrap();
        assert!(cert < dist && dist < alias);
        assert!(topology.render().is_ok());
    }

    #[test]
    fn test_origin_grant_scoped_to_own_distribution() {
        let first = assemble(&intent()).unwrap();
        let second = assemble(&intent()).unwrap();

        for (topology, other) in [(&first, &second), (&second, &first)] {
            let policy = topology.resource("WebsiteBucketPolicy").unwrap();
            let source = policy
                .pointer("/PolicyDocument/Statement/0/Condition/StringEquals/AWS:SourceArn")
                .unwrap();
            let own = topology.resource("Distribution").unwrap().attribute("Arn").unwrap();
            let foreign = other.resource("Distribution").unwrap().attribute("Arn").unwrap();
            assert_eq!(source, own);
            assert_ne!(source, foreign);
            assert_eq!(topology.policy("WebsiteBucket").unwrap().statements().len(), 1);
        }
    }

    #[test]
    fn test_gateway_permission_is_scoped() {
        let topology = assemble(&intent()).unwrap();
        let permission = topology.resource("FunctionInvokePermission").unwrap();
        let api_arn = topology.resource("HttpApi").unwrap().attribute("ExecutionArn").unwrap();
        assert_eq!(
            permission.pointer("/SourceArn").unwrap(),
            &serde_json::json!(format!("{api_arn}/*/*"))
        );
        assert_eq!(permission.pointer("/Principal").unwrap(), "apigateway.amazonaws.com");
    }

    #[test]
    fn test_authorizer_only_with_client_id() {
        let topology = assemble(&intent()).unwrap();
        assert_eq!(topology.resources_of(ResourceKind::HttpAuthorizer).count(), 0);
        let route = topology.resource("HttpApiProxyRoute").unwrap();
        assert_eq!(route.pointer("/AuthorizationType").unwrap(), "NONE");

        let mut with_auth = intent();
        with_auth.gateway.auth_client_id = Some("client-123".to_string());
        let topology = assemble(&with_auth).unwrap();
        let authorizer = topology.resource("HttpApiAuthorizer").unwrap();
        assert_eq!(
            authorizer.pointer("/IdentitySource/0").unwrap(),
            "$request.header.Authorization"
        );
        assert_eq!(authorizer.pointer("/JwtConfiguration/Audience/0").unwrap(), "client-123");
        let route = topology.resource("HttpApiProxyRoute").unwrap();
        assert_eq!(route.pointer("/AuthorizationType").unwrap(), "JWT");
        assert_eq!(
            route.pointer("/AuthorizerId").unwrap(),
            authorizer.attribute("AuthorizerId").unwrap()
        );
    }

    #[test]
    fn test_phase_ordering_enforced() {
        let mut topology = Topology::new(StackSettings::new("app"), None).unwrap();
        let err = topology.bind_gateway(&GatewaySpec::default()).unwrap_err();
        match err {
            Error::PhaseOrdering { current, required, .. } => {
                assert_eq!(current, Phase::Empty);
                assert_eq!(required, Phase::ComputeBound);
            }
            other => panic!("unexpected error: {other}"),
        }

        topology.bind_compute(&ComputeSpec::new("svc", "h")).unwrap();
        assert!(matches!(
            topology.bind_compute(&ComputeSpec::new("svc", "h")),
            Err(Error::PhaseOrdering { .. })
        ));
        assert!(matches!(topology.bind_domain(), Err(Error::PhaseOrdering { .. })));
        assert!(matches!(topology.render(), Err(Error::PhaseOrdering { .. })));
    }

    #[test]
    fn test_finalized_is_terminal() {
        let mut topology = assemble(&intent()).unwrap();
        let config = Properties::new()
            .set("SourcePath", "dist")
            .set("DestinationBucketName", "b")
            .build();
        assert!(matches!(
            topology.describe("Late", ResourceKind::BucketDeployment, config, vec![]),
            Err(Error::PhaseOrdering { .. })
        ));
        assert!(matches!(
            topology.export("Late", "x", None),
            Err(Error::PhaseOrdering { .. })
        ));
        assert!(matches!(topology.finalize(), Err(Error::PhaseOrdering { .. })));
    }

    #[test]
    fn test_cycle_rejected_before_construction() {
        let mut topology = Topology::new(StackSettings::new("app"), None).unwrap();
        topology.bind_compute(&ComputeSpec::new("svc", "h")).unwrap();
        let constructed = topology.resources().len();

        let upload = |dest: PropertyValue| {
            Properties::new()
                .set("SourcePath", "dist")
                .set("DestinationBucketName", dest)
                .build()
        };
        topology
            .describe("A", ResourceKind::BucketDeployment, upload("x".into()), vec![])
            .unwrap();
        topology
            .describe("B", ResourceKind::BucketDeployment, upload("y".into()), vec!["A".to_string()])
            .unwrap();

        let err = topology.add_dependency("A", "B").unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
        assert_eq!(topology.resources().len(), constructed);
        assert!(!topology.attributes().is_constructed("A"));
        assert!(!topology.attributes().is_constructed("B"));
    }

    #[test]
    fn test_unknown_dependency_is_configuration_error() {
        let mut topology = Topology::new(StackSettings::new("app"), None).unwrap();
        let config = Properties::new()
            .set("SourcePath", "dist")
            .set("DestinationBucketName", defer("Missing", "BucketName"))
            .build();
        assert!(matches!(
            topology.describe("Upload", ResourceKind::BucketDeployment, config, vec![]),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_deferred_value_resolves_only_after_construction() {
        let mut topology = Topology::new(StackSettings::new("app"), None).unwrap();
        let arn: PropertyValue = defer("Function", "Arn").into();
        assert!(matches!(
            topology.resolve(&arn),
            Err(Error::UnresolvedReference { .. })
        ));

        topology.bind_compute(&ComputeSpec::new("svc", "h")).unwrap();
        let first = topology.resolve(&arn).unwrap();
        topology.bind_gateway(&GatewaySpec::default()).unwrap();
        assert_eq!(topology.resolve(&arn).unwrap(), first);
    }

    #[test]
    fn test_grant_twice_yields_one_statement() {
        let mut topology = Topology::new(StackSettings::new("app"), None).unwrap();
        topology.bind_compute(&ComputeSpec::new("svc", "h")).unwrap();
        topology.bind_gateway(&GatewaySpec::default()).unwrap();
        topology.bind_origin(&OriginSpec::default()).unwrap();
        topology.control_access().unwrap();
        topology.distribute(&DistributionSpec::default()).unwrap();

        for expected in [true, false] {
            let added = topology
                .grant(
                    Principal::service("cloudfront.amazonaws.com"),
                    ["s3:GetObject"],
                    "WebsiteBucket",
                    vec![PropertyValue::join([
                        defer("WebsiteBucket", "Arn").into(),
                        "/*".into(),
                    ])],
                    Condition::string_equals("AWS:SourceArn", defer("Distribution", "Arn")),
                )
                .unwrap();
            assert_eq!(added, expected);
        }

        topology.bind_domain().unwrap();
        topology.finalize().unwrap();
        assert_eq!(topology.policy("WebsiteBucket").unwrap().statements().len(), 1);
        let policy = topology.resource("WebsiteBucketPolicy").unwrap();
        assert_eq!(
            policy.pointer("/PolicyDocument/Statement").unwrap().as_array().unwrap().len(),
            1
        );
    }

    #[test]
    fn test_late_function_grant_is_emitted() {
        let mut topology = Topology::new(StackSettings::new("app"), None).unwrap();
        topology.bind_compute(&ComputeSpec::new("svc", "h")).unwrap();
        topology.bind_gateway(&GatewaySpec::default()).unwrap();
        topology.bind_origin(&OriginSpec::default()).unwrap();
        topology.control_access().unwrap();
        topology.distribute(&DistributionSpec::default()).unwrap();

        let added = topology
            .grant(
                Principal::service("cloudfront.amazonaws.com"),
                ["lambda:InvokeFunction"],
                "Function",
                vec![defer("Function", "Arn").into()],
                Condition::string_equals("AWS:SourceArn", defer("Distribution", "Arn")),
            )
            .unwrap();
        assert!(added);
        topology.bind_domain().unwrap();
        topology.finalize().unwrap();

        let permissions: Vec<&ConstructedResource> =
            topology.resources_of(ResourceKind::FunctionPermission).collect();
        assert_eq!(permissions.len(), 2);
        let late = topology.resource("FunctionInvokePermission2").unwrap();
        assert_eq!(late.properties["Principal"], "cloudfront.amazonaws.com");
        assert_eq!(late.properties["Action"], "lambda:InvokeFunction");
        assert_eq!(
            late.properties["SourceArn"].as_str(),
            topology.resource("Distribution").unwrap().attribute("Arn")
        );

        let manifest = crate::manifest::Manifest::from_topology(&topology, chrono::Utc::now()).unwrap();
        assert!(manifest.resource("FunctionInvokePermission2").is_some());
    }

    #[test]
    fn test_grant_on_resource_without_policy_rejected() {
        let mut topology = Topology::new(StackSettings::new("app"), None).unwrap();
        topology.bind_compute(&ComputeSpec::new("svc", "h")).unwrap();
        topology.bind_gateway(&GatewaySpec::default()).unwrap();

        let err = topology
            .grant(
                Principal::service("cloudfront.amazonaws.com"),
                ["execute-api:Invoke"],
                "HttpApi",
                vec![defer("HttpApi", "ExecutionArn").into()],
                Condition::string_equals("AWS:SourceAccount", "000000000000"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(topology.policy("HttpApi").is_none());
    }

    #[test]
    fn test_rejected_dependency_leaves_graph_unchanged() {
        let mut topology = Topology::new(StackSettings::new("app"), None).unwrap();
        topology.bind_compute(&ComputeSpec::new("svc", "h")).unwrap();
        let before = topology.node("Function").unwrap().depends_on.clone();

        let config = Properties::new()
            .set("SourcePath", "dist")
            .set("DestinationBucketName", "b")
            .build();
        topology
            .describe("X", ResourceKind::BucketDeployment, config, vec![])
            .unwrap();

        let err = topology.add_dependency("Function", "X").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(topology.node("Function").unwrap().depends_on, before);
        assert!(!topology.node("Function").unwrap().depends_on.contains(&"X".to_string()));
    }

    #[test]
    fn test_construction_order_is_deterministic() {
        let mut intent = intent();
        intent.origin.content_root = Some("../frontend/dist".to_string());
        let a = assemble_with(&intent, fixed_id()).unwrap();
        let b = assemble_with(&intent, fixed_id()).unwrap();

        let names = |t: &Topology| -> Vec<String> { t.resources().iter().map(|r| r.name.clone()).collect() };
        assert_eq!(names(&a), names(&b));
        assert_eq!(
            names(&a),
            vec![
                "Function",
                "HttpApi",
                "HttpApiDefaultStage",
                "HttpApiIntegration",
                "HttpApiProxyRoute",
                "FunctionInvokePermission",
                "WebsiteBucket",
                "WebsiteBucketDeployment",
                "WebsiteBucketOAC",
                "Distribution",
                "WebsiteBucketPolicy",
            ]
        );
        assert_eq!(a.resources(), b.resources());
        assert_eq!(a.render().unwrap(), b.render().unwrap());
    }

    #[test]
    fn test_origin_is_private_and_uses_access_control() {
        let topology = assemble(&intent()).unwrap();
        let bucket = topology.resource("WebsiteBucket").unwrap();
        for key in ["BlockPublicAcls", "BlockPublicPolicy", "IgnorePublicAcls", "RestrictPublicBuckets"] {
            assert_eq!(
                bucket
                    .pointer(&format!("/PublicAccessBlockConfiguration/{key}"))
                    .unwrap(),
                true
            );
        }
        assert_eq!(bucket.deletion_policy, DeletionPolicy::ForceDelete);

        let distribution = topology.resource("Distribution").unwrap();
        let oac = topology.resource("WebsiteBucketOAC").unwrap();
        assert_eq!(
            distribution
                .pointer("/DistributionConfig/Origins/0/OriginAccessControlId")
                .unwrap(),
            oac.attribute("Id").unwrap()
        );
        assert_eq!(
            distribution
                .pointer("/DistributionConfig/Origins/0/S3OriginConfig/OriginAccessIdentity")
                .unwrap(),
            ""
        );
        assert_eq!(
            distribution
                .pointer("/DistributionConfig/Origins/0/DomainName")
                .unwrap(),
            bucket.attribute("RegionalDomainName").unwrap()
        );
    }

    #[test]
    fn test_invalid_domain_fails_before_any_node() {
        let err = Topology::new(
            StackSettings::new("app"),
            Some(DomainBinding::new(
                "app.example.com",
                "arn:aws:acm:eu-west-1:123456789012:certificate/abc",
                "zone-1",
            )),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
