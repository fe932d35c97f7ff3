use gatherd::config::Fragment;
use gatherd::core::filter::{
    Filter, PruneFilter, RewriteFilter, RouteFilter, ScaleFilter, SetHostFilter,
};
use gatherd::core::record::{Content, ParsedRecord, StoredSample};

fn sample_record() -> ParsedRecord {
    let mut content = Content::new();
    content.insert("cpu.user".to_string(), 1.5);
    content.insert("mem_bytes".to_string(), 2048.0);
    ParsedRecord {
        id: 1,
        driver: "static".to_string(),
        url: "static://".to_string(),
        host: "host.example.org".to_string(),
        port: 0,
        storages: vec!["graphite".to_string()],
        start_micros: 1_700_000_000_000_000,
        finished_unix: 1_700_000_000,
        content,
    }
}

#[test]
fn test_rewrite_prefix_and_regex() {
    let mut frag = Fragment::from_text(
        "f",
        "driver = rewrite\nprefix = app.\nsearch = _bytes$\nreplace = \n",
    )
    .unwrap();
    let filter = RewriteFilter::from_fragment(&mut frag).unwrap();
    let out = filter.filter_content(&sample_record().content).unwrap();
    assert_eq!(out.get("app.cpu.user"), Some(&1.5));
    assert_eq!(out.get("app.mem"), Some(&2048.0));
}

#[test]
fn test_scale_only_matching_keys() {
    let mut frag =
        Fragment::from_text("f", "driver = scale\nfactor = 0.001\nkeys = *_bytes\n").unwrap();
    let filter = ScaleFilter::from_fragment(&mut frag).unwrap();
    let out = filter.filter_content(&sample_record().content).unwrap();
    assert_eq!(out.get("mem_bytes"), Some(&2.048));
    assert_eq!(out.get("cpu.user"), Some(&1.5));
}

#[test]
fn test_prune_keep_and_drop() {
    let mut frag = Fragment::from_text("f", "driver = prune\ndrop = mem*\n").unwrap();
    let filter = PruneFilter::from_fragment(&mut frag).unwrap();
    let out = filter.filter_content(&sample_record().content).unwrap();
    assert_eq!(out.len(), 1);
    assert!(out.get("mem_bytes").is_none());

    let mut frag = Fragment::from_text("f", "driver = prune\nkeep = cpu*\n").unwrap();
    let filter = PruneFilter::from_fragment(&mut frag).unwrap();
    let out = filter.filter_content(&sample_record().content).unwrap();
    assert_eq!(out.len(), 1);
    assert!(out.get("cpu.user").is_some());
}

#[test]
fn test_prune_requires_patterns() {
    let mut frag = Fragment::from_text("f", "driver = prune\n").unwrap();
    assert!(PruneFilter::from_fragment(&mut frag).is_err());
}

#[test]
fn test_sethost_overrides_only_metadata() {
    let mut frag =
        Fragment::from_text("f", "driver = sethost\nhost = other.example.org\n").unwrap();
    let filter = SetHostFilter::from_fragment(&mut frag).unwrap();
    let record = sample_record();
    let out = filter.filter_record(&record).unwrap();
    assert_eq!(out.host, "other.example.org");
    assert_eq!(out.content, record.content);
    // The input record survives unmodified.
    assert_eq!(record.host, "host.example.org");
}

#[test]
fn test_route_overrides_storages() {
    let mut frag = Fragment::from_text("f", "driver = route\nstorage = a, b\n").unwrap();
    let filter = RouteFilter::from_fragment(&mut frag).unwrap();
    let out = filter.filter_record(&sample_record()).unwrap();
    assert_eq!(out.storages, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_identity_filter_preserves_record_bytes() {
    // A scale by 1.0 returns its input unchanged; the record before and
    // after must be identical under the deterministic serializer.
    let mut frag = Fragment::from_text("f", "driver = scale\nfactor = 1\n").unwrap();
    let filter = ScaleFilter::from_fragment(&mut frag).unwrap();
    let record = sample_record();
    let out = filter.filter_record(&record).unwrap();
    assert_eq!(
        StoredSample::from(&record).encode().unwrap(),
        StoredSample::from(&out).encode().unwrap()
    );
}

#[test]
fn test_scale_rejects_non_finite_results() {
    let mut frag = Fragment::from_text("f", "driver = scale\nfactor = 1e308\n").unwrap();
    let filter = ScaleFilter::from_fragment(&mut frag).unwrap();
    let mut content = Content::new();
    content.insert("huge".to_string(), 1e308);
    assert!(filter.filter_content(&content).is_err());
}
