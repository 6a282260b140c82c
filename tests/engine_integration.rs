//! Integration tests driving the engine against a mocked provider
//!
//! These tests point the session factory's endpoint override at a wiremock
//! server and exercise the full path: manager fetch with pagination,
//! filter chains (including the API-backed compliance filters), and the
//! concurrent action batches with their swallow-vs-propagate rules.

use serde_json::json;
use std::sync::Arc;
use steward::policy::{compile_policy, parse_policies};
use steward::provider::{Credentials, SessionFactory};
use steward::resource::{get_resource_manager, PolicyContext};
use wiremock::matchers::{bearer_token, body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ctx_for(server: &MockServer) -> PolicyContext {
    PolicyContext::new(Arc::new(
        SessionFactory::new("us-east-1", Credentials::new("test-token"))
            .with_endpoint(server.uri()),
    ))
}

/// Matcher for one RPC operation.
fn op(target: &str) -> wiremock::matchers::HeaderExactMatcher {
    header("X-Api-Target", target)
}

/// Mount the two calls the account manager makes to synthesize its
/// singleton pseudo-resource.
async fn mount_account_identity(server: &MockServer) {
    Mock::given(method("POST"))
        .and(op("sts.GetCallerIdentity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Account": "123456789012"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(op("iam.ListAccountAliases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "AccountAliases": ["prod-main"]
        })))
        .mount(server)
        .await;
}

mod fetch_and_filter {
    use super::*;

    /// Pagination is exhausted before the filter chain runs.
    #[tokio::test]
    async fn paginated_describe_is_exhausted() {
        let server = MockServer::start().await;

        // Second page, requested with the marker from the first.
        Mock::given(method("POST"))
            .and(op("rds.DescribeDBClusters"))
            .and(body_partial_json(json!({"Marker": "page-2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "DBClusters": [
                    {"DBClusterIdentifier": "cluster-c", "Status": "available"},
                ]
            })))
            .mount(&server)
            .await;

        // First page.
        Mock::given(method("POST"))
            .and(op("rds.DescribeDBClusters"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "DBClusters": [
                    {"DBClusterIdentifier": "cluster-a", "Status": "available"},
                    {"DBClusterIdentifier": "cluster-b", "Status": "deleting"},
                ],
                "Marker": "page-2"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let manager = get_resource_manager(
            "rds-cluster",
            &[json!({"type": "value", "key": "Status", "value": "available"})],
        )
        .unwrap();

        let survivors = manager.resources(&ctx_for(&server)).await.unwrap();
        let ids: Vec<&str> = survivors
            .iter()
            .map(|r| r.get_str("DBClusterIdentifier").unwrap())
            .collect();
        assert_eq!(ids, vec!["cluster-a", "cluster-c"]);
    }

    /// A provider failure during a filter's API call propagates instead of
    /// silently reporting non-compliance.
    #[tokio::test]
    async fn filter_api_errors_propagate() {
        let server = MockServer::start().await;
        mount_account_identity(&server).await;

        Mock::given(method("POST"))
            .and(op("cloudtrail.DescribeTrails"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "__type": "AccessDeniedException",
                "message": "not authorized"
            })))
            .mount(&server)
            .await;

        let manager =
            get_resource_manager("account", &[json!({"type": "check-cloudtrail"})]).unwrap();
        let err = manager.resources(&ctx_for(&server)).await.unwrap_err();
        assert!(err.to_string().contains("AccessDeniedException"));
    }
}

mod account_compliance {
    use super::*;

    /// Zero trails is a valid non-compliant result: the account itself
    /// comes back, annotated with the (empty) trail list.
    #[tokio::test]
    async fn no_trails_returns_the_account() {
        let server = MockServer::start().await;
        mount_account_identity(&server).await;

        Mock::given(method("POST"))
            .and(op("cloudtrail.DescribeTrails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"trailList": []})))
            .mount(&server)
            .await;

        let manager =
            get_resource_manager("account", &[json!({"type": "check-cloudtrail"})]).unwrap();
        let survivors = manager.resources(&ctx_for(&server)).await.unwrap();

        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].get_str("account_id"), Some("123456789012"));
        assert_eq!(survivors[0].get_str("account_name"), Some("prod-main"));
        assert_eq!(survivors[0].annotation("cloudtrails"), Some(&json!([])));
    }

    /// One trail satisfying every enabled sub-predicate means compliant:
    /// the filter returns nothing.
    #[tokio::test]
    async fn healthy_trail_is_compliant() {
        let server = MockServer::start().await;
        mount_account_identity(&server).await;

        Mock::given(method("POST"))
            .and(op("cloudtrail.DescribeTrails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "trailList": [{
                    "Name": "main-trail",
                    "TrailARN": "arn:trail/main-trail",
                    "IncludeGlobalServiceEvents": true,
                    "IsMultiRegionTrail": true
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(op("cloudtrail.GetTrailStatus"))
            .and(body_partial_json(json!({"Name": "arn:trail/main-trail"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"IsLogging": true})))
            .mount(&server)
            .await;

        let manager = get_resource_manager(
            "account",
            &[json!({
                "type": "check-cloudtrail",
                "multi-region": true,
                "global-events": true
            })],
        )
        .unwrap();
        let survivors = manager.resources(&ctx_for(&server)).await.unwrap();
        assert!(survivors.is_empty());
    }

    /// A trail with a delivery error does not count as running.
    #[tokio::test]
    async fn trail_with_delivery_error_is_not_running() {
        let server = MockServer::start().await;
        mount_account_identity(&server).await;

        Mock::given(method("POST"))
            .and(op("cloudtrail.DescribeTrails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "trailList": [{"Name": "t", "TrailARN": "arn:trail/t"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(op("cloudtrail.GetTrailStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "IsLogging": true,
                "LatestDeliveryError": "AccessDenied"
            })))
            .mount(&server)
            .await;

        let manager =
            get_resource_manager("account", &[json!({"type": "check-cloudtrail"})]).unwrap();
        let survivors = manager.resources(&ctx_for(&server)).await.unwrap();
        assert_eq!(survivors.len(), 1);
    }

    /// Recorders without a delivery channel leave the account
    /// non-compliant.
    #[tokio::test]
    async fn config_without_channels_is_non_compliant() {
        let server = MockServer::start().await;
        mount_account_identity(&server).await;

        Mock::given(method("POST"))
            .and(op("config.DescribeDeliveryChannels"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"DeliveryChannels": []})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(op("config.DescribeConfigurationRecorders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ConfigurationRecorders": [{
                    "name": "default",
                    "recordingGroup": {"allSupported": true, "includeGlobalResources": true}
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(op("config.DescribeConfigurationRecorderStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ConfigurationRecordersStatus": [
                    {"name": "default", "recording": true, "lastStatus": "SUCCESS"}
                ]
            })))
            .mount(&server)
            .await;

        let manager = get_resource_manager(
            "account",
            &[json!({"type": "check-config", "all-resources": true, "global-resources": true})],
        )
        .unwrap();
        let survivors = manager.resources(&ctx_for(&server)).await.unwrap();

        assert_eq!(survivors.len(), 1);
        assert_eq!(
            survivors[0]
                .annotation("config_recorders")
                .and_then(|v| v.as_array())
                .map(|a| a.len()),
            Some(1)
        );
    }

    /// The summary fetch is cached as an annotation: two chained summary
    /// filters issue exactly one API call.
    #[tokio::test]
    async fn iam_summary_is_fetched_once() {
        let server = MockServer::start().await;
        mount_account_identity(&server).await;

        Mock::given(method("POST"))
            .and(op("iam.GetAccountSummary"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "SummaryMap": {"AccountMFAEnabled": 1, "Users": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = get_resource_manager(
            "account",
            &[
                json!({"type": "iam-summary", "key": "AccountMFAEnabled", "value": 1}),
                json!({"type": "iam-summary", "key": "Users", "op": "gte", "value": 1}),
            ],
        )
        .unwrap();
        let survivors = manager.resources(&ctx_for(&server)).await.unwrap();

        assert_eq!(survivors.len(), 1);
        server.verify().await;
    }

    /// Quota of zero (or missing) never matches and never divides.
    #[tokio::test]
    async fn zero_quota_threshold_never_matches() {
        let server = MockServer::start().await;
        mount_account_identity(&server).await;

        Mock::given(method("POST"))
            .and(op("ec2.DescribeAccountAttributes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AccountAttributes": [{
                    "AttributeName": "max-instances",
                    "AttributeValues": [{"AttributeValue": "0"}]
                }]
            })))
            .mount(&server)
            .await;

        let manager = get_resource_manager(
            "account",
            &[json!({"type": "eighty-percent-max-instances"})],
        )
        .unwrap();
        let survivors = manager.resources(&ctx_for(&server)).await.unwrap();
        assert!(survivors.is_empty());
    }

    /// Usage at 80% of the quota matches; the instance count comes from a
    /// manufactured ec2 manager.
    #[tokio::test]
    async fn instance_usage_at_threshold_matches() {
        let server = MockServer::start().await;
        mount_account_identity(&server).await;

        Mock::given(method("POST"))
            .and(op("ec2.DescribeAccountAttributes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AccountAttributes": [{
                    "AttributeName": "max-instances",
                    "AttributeValues": [{"AttributeValue": "10"}]
                }]
            })))
            .mount(&server)
            .await;
        let instances: Vec<_> = (0..8).map(|i| json!({"InstanceId": format!("i-{i}")})).collect();
        Mock::given(method("POST"))
            .and(op("ec2.DescribeInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Reservations": [{"Instances": instances}]
            })))
            .mount(&server)
            .await;

        let manager = get_resource_manager(
            "account",
            &[json!({"type": "eighty-percent-max-instances"})],
        )
        .unwrap();
        let survivors = manager.resources(&ctx_for(&server)).await.unwrap();
        assert_eq!(survivors.len(), 1);
    }
}

mod actions {
    use super::*;

    const RETENTION_POLICY: &str = r#"
policies:
  - name: retention-floor
    resource: rds-cluster
    actions:
      - type: retention
        days: 7
"#;

    /// Retention only moves up: the cluster already at 7 days gets no
    /// modify call, the one at 5 days gets exactly one call that carries
    /// its existing windows through unchanged.
    #[tokio::test]
    async fn retention_raises_but_never_lowers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(op("rds.DescribeDBClusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "DBClusters": [
                    {
                        "DBClusterIdentifier": "cluster-high",
                        "BackupRetentionPeriod": 7,
                        "PreferredBackupWindow": "02:00-03:00",
                        "PreferredMaintenanceWindow": "sun:05:00-sun:06:00"
                    },
                    {
                        "DBClusterIdentifier": "cluster-low",
                        "BackupRetentionPeriod": 5,
                        "PreferredBackupWindow": "07:00-09:00",
                        "PreferredMaintenanceWindow": "mon:03:00-mon:04:00"
                    }
                ]
            })))
            .mount(&server)
            .await;

        // Exactly one modify, for the low cluster, windows preserved.
        Mock::given(method("POST"))
            .and(op("rds.ModifyDBCluster"))
            .and(body_partial_json(json!({
                "DBClusterIdentifier": "cluster-low",
                "BackupRetentionPeriod": 7,
                "PreferredBackupWindow": "07:00-09:00",
                "PreferredMaintenanceWindow": "mon:03:00-mon:04:00"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        // Anything else hitting modify is a bug.
        Mock::given(method("POST"))
            .and(op("rds.ModifyDBCluster"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let file = parse_policies(RETENTION_POLICY).unwrap();
        let compiled = compile_policy(&file.policies[0]).unwrap();
        let (report, _) = steward::policy::run_policy(&ctx_for(&server), &compiled, None)
            .await
            .unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].failed, 0);
        server.verify().await;
    }

    /// Already-deleting clusters are swallowed; a hard provider failure is
    /// captured without blocking the remaining deletes.
    #[tokio::test]
    async fn delete_swallows_terminal_state_and_isolates_failures() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(op("rds.DescribeDBClusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "DBClusters": [
                    {"DBClusterIdentifier": "cluster-a"},
                    {"DBClusterIdentifier": "cluster-b"},
                    {"DBClusterIdentifier": "cluster-c"}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(op("rds.DeleteDBCluster"))
            .and(body_partial_json(json!({"DBClusterIdentifier": "cluster-a"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "com.provider.rds#InvalidDBClusterStateFault",
                "message": "Cluster is already being deleted"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(op("rds.DeleteDBCluster"))
            .and(body_partial_json(json!({"DBClusterIdentifier": "cluster-b"})))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "__type": "InternalFailure",
                "message": "unexpected"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(op("rds.DeleteDBCluster"))
            .and(body_partial_json(json!({"DBClusterIdentifier": "cluster-c"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let file = parse_policies(
            r#"
policies:
  - name: cleanup
    resource: rds-cluster
    actions:
      - type: delete
        skip-snapshot: true
"#,
        )
        .unwrap();
        let compiled = compile_policy(&file.policies[0]).unwrap();
        let (report, _) = steward::policy::run_policy(&ctx_for(&server), &compiled, None)
            .await
            .unwrap();

        assert_eq!(report.matched, 3);
        // Only the hard failure counts; the terminal-state error was
        // swallowed and cluster-c still got its delete.
        assert_eq!(report.actions[0].failed, 1);
        assert!(report.degraded());
        server.verify().await;
    }

    /// Snapshot creation fans out per cluster and names snapshots from the
    /// cluster id.
    #[tokio::test]
    async fn snapshot_creates_one_per_cluster() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(op("rds.DescribeDBClusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "DBClusters": [
                    {"DBClusterIdentifier": "users"},
                    {"DBClusterIdentifier": "orders"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(op("rds.CreateDBClusterSnapshot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(2)
            .mount(&server)
            .await;

        let file = parse_policies(
            r#"
policies:
  - name: nightly-backup
    resource: rds-cluster
    actions:
      - type: snapshot
"#,
        )
        .unwrap();
        let compiled = compile_policy(&file.policies[0]).unwrap();
        let (report, _) = steward::policy::run_policy(&ctx_for(&server), &compiled, None)
            .await
            .unwrap();

        assert_eq!(report.actions[0].failed, 0);
        server.verify().await;
    }

    /// 120 snapshots delete as three newest-first chunks; every snapshot
    /// gets exactly one delete call.
    #[tokio::test]
    async fn bulk_snapshot_delete_covers_every_record() {
        let server = MockServer::start().await;

        let snapshots: Vec<_> = (0..120)
            .map(|i| {
                json!({
                    "DBClusterSnapshotIdentifier": format!("snap-{i:03}"),
                    "SnapshotCreateTime": "2024-01-01T00:00:00Z"
                })
            })
            .collect();
        Mock::given(method("POST"))
            .and(op("rds.DescribeDBClusterSnapshots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "DBClusterSnapshots": snapshots
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(op("rds.DeleteDBClusterSnapshot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(120)
            .mount(&server)
            .await;

        let file = parse_policies(
            r#"
policies:
  - name: snapshot-cleanup
    resource: rds-cluster-snapshot
    filters:
      - type: age
        days: 30
    actions:
      - type: delete
"#,
        )
        .unwrap();
        let compiled = compile_policy(&file.policies[0]).unwrap();
        let (report, _) = steward::policy::run_policy(&ctx_for(&server), &compiled, None)
            .await
            .unwrap();

        assert_eq!(report.matched, 120);
        assert_eq!(report.actions[0].failed, 0);
        server.verify().await;
    }

    /// Snapshots missing the date attribute never match the age filter,
    /// so nothing is deleted.
    #[tokio::test]
    async fn dateless_snapshots_never_match_age() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(op("rds.DescribeDBClusterSnapshots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "DBClusterSnapshots": [
                    {"DBClusterSnapshotIdentifier": "no-date"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(op("rds.DeleteDBClusterSnapshot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let file = parse_policies(
            r#"
policies:
  - name: snapshot-cleanup
    resource: rds-cluster-snapshot
    filters:
      - type: age
        days: 30
    actions:
      - type: delete
"#,
        )
        .unwrap();
        let compiled = compile_policy(&file.policies[0]).unwrap();
        let (report, _) = steward::policy::run_policy(&ctx_for(&server), &compiled, None)
            .await
            .unwrap();

        assert_eq!(report.matched, 0);
        assert!(report.actions.is_empty());
        server.verify().await;
    }
}
