//! Demo CLI: registers one project against an in-memory control plane and
//! prints the assignment and remote-config result for a unit id.

use abtree_core::{
    Domain, DomainMetadata, Group, HashMethod, HashParams, HashType, IssueType, Layer, Options, Range, RemoteConfig,
    RemoteConfigCondition, Session, TagExpression, UnitIdType,
};
use abtree_refresh::{MockControlPlaneClient, TabConfig};
use abtree_tags::MockDmpClient;
use abtree_telemetry::RecordingPlugin;
use clap::Parser;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Run a single assignment and remote-config lookup against a built-in demo
/// project, then print the results.
#[derive(Parser, Debug)]
#[command(name = "abtree", version, about)]
struct Cli {
    /// Unit id to evaluate.
    #[arg(long, default_value = "user-42")]
    unit_id: String,
}

fn demo_tab_config() -> TabConfig {
    let hash = HashParams { method: HashMethod::Bkdr, seed: 1, unit_id_type: UnitIdType::Standard, bucket_size: 10_000 };

    let mut groups = HashMap::new();
    groups.insert(
        1,
        Group {
            id: 1,
            key: "control".into(),
            experiment_id: None,
            layer_key: "checkout-button-color".into(),
            is_default: true,
            is_control: false,
            is_override_list: true,
            params: HashMap::from([("button_color".to_string(), "blue".to_string())]),
            issue_type: IssueType::Percentage,
            tag_expression: TagExpression::default(),
            scene_ids: vec![],
            unit_id_type: UnitIdType::Standard,
        },
    );
    groups.insert(
        2,
        Group {
            id: 2,
            key: "treatment".into(),
            experiment_id: None,
            layer_key: "checkout-button-color".into(),
            is_default: false,
            is_control: false,
            is_override_list: true,
            params: HashMap::from([("button_color".to_string(), "orange".to_string())]),
            issue_type: IssueType::Percentage,
            tag_expression: TagExpression::default(),
            scene_ids: vec![],
            unit_id_type: UnitIdType::Standard,
        },
    );

    let layer = Layer {
        key: "checkout-button-color".into(),
        hash_type: HashType::Single,
        hash: hash.clone(),
        default_group_key: Some("control".into()),
        scene_ids: vec![],
        holdout_layer_keys: vec![],
        experiments: HashMap::new(),
        groups,
    };

    let mut layer_catalog = FxHashMap::default();
    layer_catalog.insert(layer.key.clone(), layer);

    let root = Domain {
        metadata: DomainMetadata { key: "root".into(), hash: hash.clone(), traffic: vec![] },
        holdouts: vec![],
        multi_layers: vec![],
        subdomains: vec![Domain {
            metadata: DomainMetadata {
                key: "checkout".into(),
                hash: hash.clone(),
                traffic: vec![Range::new(1, 10_000)],
            },
            holdouts: vec![],
            multi_layers: vec![abtree_core::MultiLayerDomain {
                metadata: DomainMetadata { key: "checkout-layers".into(), hash, traffic: vec![Range::new(1, 10_000)] },
                layer_keys: vec!["checkout-button-color".into()],
            }],
            subdomains: vec![],
        }],
    };

    let mut remote_configs = FxHashMap::default();
    remote_configs.insert(
        "welcome-banner-text".to_string(),
        RemoteConfig {
            key: "welcome-banner-text".into(),
            holdout_layer_keys: vec![],
            conditions: vec![RemoteConfigCondition {
                hash: HashParams { method: HashMethod::Bkdr, seed: 2, unit_id_type: UnitIdType::Standard, bucket_size: 100 },
                bucket: vec![Range::new(1, 100)],
                issue_type: IssueType::Percentage,
                tag_expression: TagExpression::default(),
                value: b"Welcome back!".to_vec(),
                experiment_key: None,
            }],
            default_value: b"Welcome!".to_vec(),
        },
    );

    TabConfig {
        version: "v1".into(),
        root,
        layer_catalog,
        remote_configs,
        override_list: FxHashMap::default(),
        config_override_list: FxHashMap::default(),
        refresh_interval: Duration::from_secs(30),
        control: abtree_core::MetricsControl::default(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let client = Arc::new(MockControlPlaneClient::default().with_project("demo", demo_tab_config()));
    let dmp = Arc::new(MockDmpClient::default());
    let recorder = Arc::new(RecordingPlugin::default());
    abtree_api::init(client, dmp, vec![recorder.clone()]).expect("first init in this process");
    abtree_api::register_project("demo").expect("registry is initialised");

    // Give the background refresh loop one cycle to publish the snapshot.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let session = Session::new(cli.unit_id.clone());
    let mut options = Options { auto_exposure: true, ..Options::default() };

    match abtree_api::get_experiments("demo", &session, &mut options).await {
        Ok(hits) => {
            for (layer_key, hit) in &hits {
                println!("layer {layer_key}: group={} params={:?}", hit.group_key, hit.params);
            }
        }
        Err(e) => eprintln!("assignment failed: {e}"),
    }

    match abtree_api::get_config("demo", &session, &mut options, "welcome-banner-text").await {
        Ok(value) => println!("welcome-banner-text = {}", String::from_utf8_lossy(&value)),
        Err(e) => eprintln!("remote-config lookup failed: {e}"),
    }

    // Give the telemetry workers a moment to drain before we inspect them.
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!(
        "recorded {} exposure(s), {} config-exposure(s), {} event(s)",
        recorder.exposures().len(),
        recorder.config_exposures().len(),
        recorder.events().len()
    );

    abtree_api::release_project("demo").ok();
    abtree_api::release();
}
