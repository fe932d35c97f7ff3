use gatherd::core::stats::{AggMode, StatsRegistry, StatsSession};

#[test]
fn test_counters_accumulate() {
    let session = StatsSession::new();
    session.incr("ok");
    session.incr("ok");
    session.add("time_ms", 12.5);
    let snap = session.snapshot(AggMode::Avg);
    assert_eq!(snap.get("ok"), Some(&2.0));
    assert_eq!(snap.get("time_ms"), Some(&12.5));
}

#[test]
fn test_sample_window_aggregates() {
    let session = StatsSession::new();
    for v in [1.0, 2.0, 3.0, 4.0] {
        session.observe("run_ms", v);
    }
    assert_eq!(session.snapshot(AggMode::Avg).get("run_ms"), Some(&2.5));
    assert_eq!(session.snapshot(AggMode::Max).get("run_ms"), Some(&4.0));
    assert_eq!(session.snapshot(AggMode::Min).get("run_ms"), Some(&1.0));
    assert_eq!(session.snapshot(AggMode::Med).get("run_ms"), Some(&3.0));
}

#[test]
fn test_reset_zeroes_counters_and_clears_windows() {
    let session = StatsSession::new();
    session.incr("ok");
    session.observe("run_ms", 5.0);
    session.reset();
    let snap = session.snapshot(AggMode::Avg);
    assert_eq!(snap.get("ok"), Some(&0.0));
    // An empty window reports nothing.
    assert!(snap.get("run_ms").is_none());
}

#[test]
fn test_registry_snapshot_and_reset() {
    let registry = StatsRegistry::new();
    let session = registry.register("source.web");
    session.set("qsize", 3.0);

    let snap = registry
        .session_snapshot("source.web", AggMode::Avg)
        .unwrap();
    assert_eq!(snap.get("qsize"), Some(&3.0));

    assert!(registry.session_reset("source.web"));
    assert!(!registry.session_reset("no.such.session"));
    assert!(registry.session_snapshot("missing", AggMode::Avg).is_none());
}

#[test]
fn test_registry_names_sorted() {
    let registry = StatsRegistry::new();
    registry.register("b");
    registry.register("a");
    assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_mode_parsing_falls_back_to_avg() {
    assert_eq!(AggMode::from_query("max"), AggMode::Max);
    assert_eq!(AggMode::from_query("med"), AggMode::Med);
    assert_eq!(AggMode::from_query("bogus"), AggMode::Avg);
}
