//! The account as a resource
//!
//! The account is a singleton, so the manager synthesizes one
//! pseudo-resource instead of listing anything. Its filters do the real
//! work: composite compliance checks (audit trail, configuration
//! recorder), summary matchers over lazily-fetched account data, and
//! quota-threshold checks that count usage through other resource types.
//!
//! Composite checks follow one idiom: fetch the sub-resource lists,
//! annotate them onto the account record for downstream reporting, narrow
//! by each enabled sub-predicate, and return the account itself when
//! nothing survives (non-compliant).

use super::{get_resource_manager, ManagerEntry, PolicyContext, Record, ResourceManager};
use crate::actions::ActionRegistry;
use crate::error::EngineError;
use crate::filters::{
    compile_filters, register_core, ArcFilter, Filter, FilterEntry, FilterRegistry, ValueFilter,
};
use crate::schema::{FieldSpec, Schema};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::{Arc, OnceLock};

/// Quota filters match at or above this usage percentage.
const USAGE_THRESHOLD_PERCENT: f64 = 80.0;

/// The `account` filter registry.
pub fn filters() -> &'static FilterRegistry {
    static REG: OnceLock<FilterRegistry> = OnceLock::new();
    REG.get_or_init(|| {
        let mut reg = FilterRegistry::new("account.filters");
        register_core(&mut reg);
        reg.register("check-cloudtrail", cloudtrail_entry())
            .expect("filter registration");
        reg.register("check-config", config_entry())
            .expect("filter registration");
        reg.register("iam-summary", summary_entry("iam-summary"))
            .expect("filter registration");
        reg.register("password-policy", summary_entry("password-policy"))
            .expect("filter registration");
        for kind in [
            UsageKind::Instances,
            UsageKind::ElasticIps,
            UsageKind::VpcElasticIps,
        ] {
            reg.register(kind.type_key(), threshold_entry(kind))
                .expect("filter registration");
        }
        reg
    })
}

/// The `account` action registry.
pub fn actions() -> &'static ActionRegistry {
    static REG: OnceLock<ActionRegistry> = OnceLock::new();
    REG.get_or_init(|| ActionRegistry::new("account.actions"))
}

#[derive(Debug)]
struct AccountManager {
    filters: Vec<ArcFilter>,
}

#[async_trait]
impl ResourceManager for AccountManager {
    fn type_name(&self) -> &'static str {
        "account"
    }

    async fn fetch(&self, ctx: &PolicyContext) -> Result<Vec<Record>, EngineError> {
        let identity = ctx.client("sts")?.call("GetCallerIdentity", json!({})).await?;
        let aliases = ctx
            .client("iam")?
            .call("ListAccountAliases", json!({}))
            .await?;
        let account_name = aliases
            .get("AccountAliases")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .unwrap_or("");

        let mut fields = Map::new();
        fields.insert(
            "account_id".to_string(),
            identity.get("Account").cloned().unwrap_or(Value::Null),
        );
        fields.insert(
            "account_name".to_string(),
            Value::String(account_name.to_string()),
        );
        Ok(vec![Record::from_fields(fields)])
    }

    fn filters(&self) -> &[ArcFilter] {
        &self.filters
    }
}

/// Registry entry for the `account` resource type.
pub fn entry() -> ManagerEntry {
    ManagerEntry {
        build: |configs| {
            Ok(Box::new(AccountManager {
                filters: compile_filters(filters(), configs)?,
            }))
        },
        filter_registry: filters,
        action_registry: actions,
    }
}

// =============================================================================
// check-cloudtrail
// =============================================================================

/// Is the audit trail service enabled and healthy for this account.
/// Returns the annotated account resource when no trail satisfies every
/// enabled sub-predicate.
#[derive(Debug)]
struct CloudTrailEnabled {
    multi_region: bool,
    global_events: bool,
    running: bool,
    notifies: bool,
    file_digest: bool,
    kms: bool,
    kms_key: Option<String>,
}

impl CloudTrailEnabled {
    fn from_config(config: &Value) -> Self {
        let flag = |name: &str| config.get(name).and_then(Value::as_bool).unwrap_or(false);
        Self {
            multi_region: flag("multi-region"),
            global_events: flag("global-events"),
            // Absent means "do check that trails are logging".
            running: config.get("running").and_then(Value::as_bool).unwrap_or(true),
            notifies: flag("notifies"),
            file_digest: flag("file-digest"),
            kms: flag("kms"),
            kms_key: config
                .get("kms-key")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        }
    }
}

fn has_str(value: &Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| !s.is_empty())
        .unwrap_or(false)
}

fn is_true(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[async_trait]
impl Filter for CloudTrailEnabled {
    async fn process(
        &self,
        ctx: &PolicyContext,
        mut resources: Vec<Record>,
    ) -> Result<Vec<Record>, EngineError> {
        let Some(account) = resources.first_mut() else {
            return Ok(resources);
        };

        let client = ctx.client("cloudtrail")?;
        let response = client.call("DescribeTrails", json!({})).await?;
        let mut trails = response
            .get("trailList")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        account.annotate("cloudtrails", Value::Array(trails.clone()));

        if self.global_events {
            trails.retain(|t| is_true(t, "IncludeGlobalServiceEvents"));
        }
        if self.kms {
            trails.retain(|t| has_str(t, "KmsKeyId"));
        }
        if let Some(kms_key) = &self.kms_key {
            trails.retain(|t| t.get("KmsKeyId").and_then(Value::as_str) == Some(kms_key));
        }
        if self.file_digest {
            trails.retain(|t| is_true(t, "LogFileValidationEnabled"));
        }
        if self.multi_region {
            trails.retain(|t| is_true(t, "IsMultiRegionTrail"));
        }
        if self.notifies {
            trails.retain(|t| has_str(t, "SNSTopicArn"));
        }
        if self.running {
            let mut running = Vec::new();
            for mut trail in trails {
                let Some(arn) = trail.get("TrailARN").and_then(Value::as_str) else {
                    continue;
                };
                let status = client
                    .call("GetTrailStatus", json!({ "Name": arn }))
                    .await?;
                let logging = is_true(&status, "IsLogging");
                let delivery_failed = has_str(&status, "LatestDeliveryError");
                if let Some(t) = trail.as_object_mut() {
                    t.insert("Status".to_string(), status);
                }
                if logging && !delivery_failed {
                    running.push(trail);
                }
            }
            trails = running;
        }

        if trails.is_empty() {
            Ok(resources)
        } else {
            Ok(Vec::new())
        }
    }
}

fn cloudtrail_entry() -> FilterEntry {
    FilterEntry {
        schema: Schema::new("check-cloudtrail")
            .field("multi-region", FieldSpec::Boolean)
            .field("global-events", FieldSpec::Boolean)
            .field("running", FieldSpec::Boolean)
            .field("notifies", FieldSpec::Boolean)
            .field("file-digest", FieldSpec::Boolean)
            .field("kms", FieldSpec::Boolean)
            .field("kms-key", FieldSpec::String),
        build: Box::new(|_reg: &FilterRegistry, config: &Value| {
            Ok(Arc::new(CloudTrailEnabled::from_config(config)) as ArcFilter)
        }),
    }
}

// =============================================================================
// check-config
// =============================================================================

/// Is the configuration recorder service enabled for this account:
/// compliant when at least one delivery channel exists and at least one
/// recorder survives every enabled sub-predicate.
#[derive(Debug)]
struct ConfigEnabled {
    all_resources: bool,
    global_resources: bool,
    running: bool,
}

#[async_trait]
impl Filter for ConfigEnabled {
    async fn process(
        &self,
        ctx: &PolicyContext,
        mut resources: Vec<Record>,
    ) -> Result<Vec<Record>, EngineError> {
        let Some(account) = resources.first_mut() else {
            return Ok(resources);
        };

        let client = ctx.client("config")?;
        let channels = client
            .call("DescribeDeliveryChannels", json!({}))
            .await?
            .get("DeliveryChannels")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut recorders = client
            .call("DescribeConfigurationRecorders", json!({}))
            .await?
            .get("ConfigurationRecorders")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        account.annotate("config_channels", Value::Array(channels.clone()));
        account.annotate("config_recorders", Value::Array(recorders.clone()));

        if self.global_resources {
            recorders.retain(|r| {
                r.get("recordingGroup")
                    .map(|g| is_true(g, "includeGlobalResources"))
                    .unwrap_or(false)
            });
        }
        if self.all_resources {
            recorders.retain(|r| {
                r.get("recordingGroup")
                    .map(|g| is_true(g, "allSupported"))
                    .unwrap_or(false)
            });
        }
        if self.running && !recorders.is_empty() {
            let status_list = client
                .call("DescribeConfigurationRecorderStatus", json!({}))
                .await?
                .get("ConfigurationRecordersStatus")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut by_name = Map::new();
            for status in status_list {
                if let Some(name) = status.get("name").and_then(Value::as_str) {
                    by_name.insert(name.to_string(), status.clone());
                }
            }
            account.annotate("config_status", Value::Object(by_name.clone()));
            recorders.retain(|r| {
                let Some(status) = r.get("name").and_then(Value::as_str).and_then(|n| by_name.get(n))
                else {
                    return false;
                };
                let last_status = status
                    .get("lastStatus")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_ascii_lowercase();
                is_true(status, "recording") && matches!(last_status.as_str(), "pending" | "success")
            });
        }

        if !channels.is_empty() && !recorders.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(resources)
        }
    }
}

fn config_entry() -> FilterEntry {
    FilterEntry {
        schema: Schema::new("check-config")
            .field("all-resources", FieldSpec::Boolean)
            .field("global-resources", FieldSpec::Boolean)
            .field("running", FieldSpec::Boolean),
        build: Box::new(|_reg: &FilterRegistry, config: &Value| {
            let flag = |name: &str| config.get(name).and_then(Value::as_bool).unwrap_or(false);
            Ok(Arc::new(ConfigEnabled {
                all_resources: flag("all-resources"),
                global_resources: flag("global-resources"),
                running: config.get("running").and_then(Value::as_bool).unwrap_or(true),
            }) as ArcFilter)
        }),
    }
}

// =============================================================================
// iam-summary / password-policy
// =============================================================================

/// A value matcher over a lazily-fetched account summary map. The fetch is
/// cached as an annotation so chained filters and a second evaluation
/// reuse it instead of calling the provider again.
#[derive(Debug)]
struct SummaryFilter {
    service: &'static str,
    operation: &'static str,
    response_key: &'static str,
    annotation_key: &'static str,
    matcher: ValueFilter,
}

#[async_trait]
impl Filter for SummaryFilter {
    async fn process(
        &self,
        ctx: &PolicyContext,
        mut resources: Vec<Record>,
    ) -> Result<Vec<Record>, EngineError> {
        let Some(account) = resources.first_mut() else {
            return Ok(resources);
        };

        if account.annotation(self.annotation_key).is_none() {
            let response = ctx
                .client(self.service)?
                .call(self.operation, json!({}))
                .await?;
            let summary = response
                .get(self.response_key)
                .cloned()
                .unwrap_or_else(|| json!({}));
            account.annotate(self.annotation_key, summary);
        }

        let summary = account
            .annotation(self.annotation_key)
            .cloned()
            .unwrap_or_else(|| json!({}));
        if self.matcher.matches_value(&summary) {
            Ok(resources)
        } else {
            Ok(Vec::new())
        }
    }
}

fn summary_entry(type_key: &'static str) -> FilterEntry {
    let (service, operation, response_key, annotation_key) = match type_key {
        "iam-summary" => ("iam", "GetAccountSummary", "SummaryMap", "iam_summary"),
        _ => (
            "iam",
            "GetAccountPasswordPolicy",
            "PasswordPolicy",
            "password_policy",
        ),
    };
    FilterEntry {
        schema: Schema::inherit(type_key, &ValueFilter::schema()),
        build: Box::new(move |_reg: &FilterRegistry, config: &Value| {
            Ok(Arc::new(SummaryFilter {
                service,
                operation,
                response_key,
                annotation_key,
                matcher: ValueFilter::from_config(config)?,
            }) as ArcFilter)
        }),
    }
}

// =============================================================================
// quota thresholds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UsageKind {
    Instances,
    ElasticIps,
    VpcElasticIps,
}

impl UsageKind {
    fn type_key(self) -> &'static str {
        match self {
            UsageKind::Instances => "eighty-percent-max-instances",
            UsageKind::ElasticIps => "eighty-percent-max-elastic-ips",
            UsageKind::VpcElasticIps => "eighty-percent-max-vpc-elastic-ips",
        }
    }

    fn attribute(self) -> &'static str {
        match self {
            UsageKind::Instances => "max-instances",
            UsageKind::ElasticIps => "max-elastic-ips",
            UsageKind::VpcElasticIps => "vpc-max-elastic-ips",
        }
    }
}

/// Matches the account when usage of a provider-reported quota is at or
/// above eighty percent. A missing or zero quota never matches and never
/// divides.
#[derive(Debug)]
struct UsageThreshold {
    kind: UsageKind,
}

impl UsageThreshold {
    async fn quota(&self, ctx: &PolicyContext) -> Result<Option<f64>, EngineError> {
        let response = ctx
            .client("ec2")?
            .call("DescribeAccountAttributes", json!({}))
            .await?;
        let attributes = response
            .get("AccountAttributes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let quota = attributes
            .iter()
            .find(|a| a.get("AttributeName").and_then(Value::as_str) == Some(self.kind.attribute()))
            .and_then(|a| a.get("AttributeValues"))
            .and_then(Value::as_array)
            .and_then(|v| v.first())
            .and_then(|v| v.get("AttributeValue"))
            .and_then(|v| {
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
            });
        Ok(quota)
    }

    async fn usage(&self, ctx: &PolicyContext) -> Result<usize, EngineError> {
        match self.kind {
            UsageKind::Instances => {
                let manager = get_resource_manager("ec2", &[])?;
                Ok(manager.resources(ctx).await?.len())
            }
            UsageKind::ElasticIps | UsageKind::VpcElasticIps => {
                let domain = if self.kind == UsageKind::ElasticIps {
                    "standard"
                } else {
                    "vpc"
                };
                let response = ctx
                    .client("ec2")?
                    .call("DescribeAddresses", json!({}))
                    .await?;
                let count = response
                    .get("Addresses")
                    .and_then(Value::as_array)
                    .map(|addrs| {
                        addrs
                            .iter()
                            .filter(|a| a.get("Domain").and_then(Value::as_str) == Some(domain))
                            .count()
                    })
                    .unwrap_or(0);
                Ok(count)
            }
        }
    }
}

#[async_trait]
impl Filter for UsageThreshold {
    async fn process(
        &self,
        ctx: &PolicyContext,
        resources: Vec<Record>,
    ) -> Result<Vec<Record>, EngineError> {
        if resources.is_empty() {
            return Ok(resources);
        }

        let Some(quota) = self.quota(ctx).await? else {
            return Ok(Vec::new());
        };
        if quota <= 0.0 {
            return Ok(Vec::new());
        }

        let usage = self.usage(ctx).await? as f64;
        let percent = usage * 100.0 / quota;
        tracing::debug!(
            "{}: usage {}/{} ({:.0}%)",
            self.kind.type_key(),
            usage,
            quota,
            percent
        );
        if percent >= USAGE_THRESHOLD_PERCENT {
            Ok(resources)
        } else {
            Ok(Vec::new())
        }
    }
}

fn threshold_entry(kind: UsageKind) -> FilterEntry {
    FilterEntry {
        schema: Schema::new(kind.type_key()),
        build: Box::new(move |_reg: &FilterRegistry, _config: &Value| {
            Ok(Arc::new(UsageThreshold { kind }) as ArcFilter)
        }),
    }
}
