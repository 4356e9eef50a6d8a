use closedts::{Config, ConfigError, NodeId};

#[test]
fn defaults_validate() {
    let config = Config::for_node(NodeId(1));
    assert!(config.validate().is_ok());
    assert_eq!(config.node, NodeId(1));
    assert!(config.publish_all_ranges);
}

#[test]
fn partial_json_fills_the_remaining_knobs() {
    let config: Config = serde_json::from_str(
        r#"{
            "node": 4,
            "close_interval_ms": 200,
            "peers": { "2": "http://peer-two:7171" }
        }"#,
    )
    .expect("deserialize");

    assert_eq!(config.node, NodeId(4));
    assert_eq!(config.close_interval_ms, 200);
    assert_eq!(config.peers.get(&NodeId(2)).map(String::as_str), Some("http://peer-two:7171"));
    // Untouched knobs keep their defaults.
    assert_eq!(config.full_refresh_every, Config::default().full_refresh_every);
    assert!(config.validate().is_ok());
}

#[test]
fn zero_knobs_are_rejected() {
    for (mutate, knob) in [
        (
            Box::new(|c: &mut Config| c.close_interval_ms = 0) as Box<dyn Fn(&mut Config)>,
            "close_interval_ms",
        ),
        (Box::new(|c: &mut Config| c.full_refresh_every = 0), "full_refresh_every"),
        (Box::new(|c: &mut Config| c.entries_per_node = 0), "entries_per_node"),
        (
            Box::new(|c: &mut Config| c.subscription_queue_depth = 0),
            "subscription_queue_depth",
        ),
        (Box::new(|c: &mut Config| c.shard_count = 0), "shard_count"),
        (Box::new(|c: &mut Config| c.backoff_base_ms = 0), "backoff_base_ms"),
    ] {
        let mut config = Config::for_node(NodeId(1));
        mutate(&mut config);
        assert_eq!(config.validate().unwrap_err(), ConfigError::ZeroKnob(knob));
    }
}

#[test]
fn backoff_ceiling_must_cover_the_base() {
    let mut config = Config::for_node(NodeId(1));
    config.backoff_base_ms = 500;
    config.backoff_max_ms = 100;
    assert_eq!(
        config.validate().unwrap_err(),
        ConfigError::BackoffCeilingBelowBase {
            base_ms: 500,
            max_ms: 100
        }
    );
}

#[test]
fn the_local_node_cannot_be_its_own_peer() {
    let mut config = Config::for_node(NodeId(1));
    config.peers.insert(NodeId(1), "http://self:7171".into());
    assert_eq!(
        config.validate().unwrap_err(),
        ConfigError::SelfPeer(NodeId(1))
    );
}
