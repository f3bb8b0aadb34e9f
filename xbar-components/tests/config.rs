// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::io::Write;
use std::path::Path;

use serial_test::serial;
use tempfile::NamedTempFile;
use xbar_components::arbiter::ArbiterPolicy;
use xbar_components::config::{ConverterConfig, CrossbarConfig, load_config};
use xbar_components::crossbar::Crossbar;
use xbar_components::decoder::{AddrRule, DefaultRoute};
use xbar_engine::test_helpers::start_test;
use xbar_engine::types::ProtocolChecking;

const CROSSBAR_TOML: &str = r#"
num_ingress = 3
num_egress = 2
max_trans = 2
checking = "relaxed"
aw_arbiter = { kind = "weighted_round_robin", weights = [1, 2, 3] }

[[rules]]
start = 0x0
end = 0x1000
target = 1

[[default_routes]]
enable = true
target = 0

[link_depths]
ar = 2
"#;

fn conf_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn defaults_without_file() {
    let config: CrossbarConfig = load_config(None).unwrap();
    assert_eq!(config, CrossbarConfig::default());

    let config: ConverterConfig = load_config(None).unwrap();
    assert_eq!(config, ConverterConfig::default());
}

#[test]
#[serial]
fn file_overrides_defaults() {
    let file = conf_file(CROSSBAR_TOML);
    let config: CrossbarConfig = load_config(Some(file.path())).unwrap();

    assert_eq!(config.num_ingress, 3);
    assert_eq!(config.max_trans, 2);
    assert_eq!(config.checking, ProtocolChecking::Relaxed);
    assert_eq!(
        config.aw_arbiter,
        ArbiterPolicy::WeightedRoundRobin {
            weights: vec![1, 2, 3]
        }
    );
    assert_eq!(config.ar_arbiter, ArbiterPolicy::RoundRobin);
    assert_eq!(config.rules, vec![AddrRule::new(0x0, 0x1000, 1)]);
    assert_eq!(config.default_route(0), DefaultRoute::enabled(0));
    assert_eq!(config.default_route(1), DefaultRoute::disabled());
    assert_eq!(config.link_depths.ar, 2);
    assert_eq!(config.link_depths.r, 0);

    // Untouched fields keep their defaults
    assert_eq!(config.max_w_trans, CrossbarConfig::default().max_w_trans);

    let engine = start_test(file!());
    let xbar = Crossbar::new_and_register(&engine, engine.top(), "xbar", config).unwrap();
    assert_eq!(xbar.num_ingress(), 3);
    assert_eq!(xbar.link(2, 1).map(|l| l.depths().ar), Some(2));
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = conf_file(CROSSBAR_TOML);
    unsafe {
        std::env::set_var("XBAR_MAX_TRANS", "6");
    }
    let config: Result<CrossbarConfig, _> = load_config(Some(file.path()));
    unsafe {
        std::env::remove_var("XBAR_MAX_TRANS");
    }
    let config = config.unwrap();
    assert_eq!(config.max_trans, 6);
    assert_eq!(config.num_ingress, 3);
}

#[test]
#[serial]
fn missing_file_is_an_error() {
    let result: Result<CrossbarConfig, _> = load_config(Some(Path::new("/no/such/xbar.toml")));
    assert!(result.is_err());
}

#[test]
#[serial]
fn malformed_file_is_an_error() {
    let file = conf_file("max_trans = \"many\"\n");
    let result: Result<CrossbarConfig, _> = load_config(Some(file.path()));
    assert!(result.is_err());
}
