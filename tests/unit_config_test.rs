use gatherd::config::{Config, Fragment, ScheduleConfig, load_fragments, parse_kv};
use std::time::Duration;

#[test]
fn test_parse_kv_basics() {
    let kv = parse_kv("a = 1\n# comment\nb = \"quoted\"\nc = 'single'\n\n").unwrap();
    assert_eq!(kv.get("a").map(String::as_str), Some("1"));
    assert_eq!(kv.get("b").map(String::as_str), Some("quoted"));
    assert_eq!(kv.get("c").map(String::as_str), Some("single"));
    assert_eq!(kv.len(), 3);
}

#[test]
fn test_parse_kv_rejects_bare_words() {
    let err = parse_kv("not a pair\n").unwrap_err();
    assert!(err.to_string().contains("line 1"));
}

#[test]
fn test_parse_kv_last_duplicate_wins() {
    let kv = parse_kv("a = 1\na = 2\n").unwrap();
    assert_eq!(kv.get("a").map(String::as_str), Some("2"));
}

#[test]
fn test_fragment_requires_driver() {
    let err = Fragment::from_text("x", "interval = 10\n").unwrap_err();
    assert!(err.to_string().contains("driver"));
}

#[test]
fn test_fragment_rejects_unknown_keys() {
    let mut frag = Fragment::from_text("x", "driver = static\nbogus = 1\n").unwrap();
    let _ = frag.take_str("known");
    let err = frag.finish().unwrap_err();
    assert!(err.to_string().contains("bogus"));
}

#[test]
fn test_fragment_take_list() {
    let mut frag = Fragment::from_text("x", "driver = static\nparsers = a, b ,c\n").unwrap();
    assert_eq!(frag.take_list("parsers"), vec!["a", "b", "c"]);
    assert!(frag.finish().is_ok());
}

#[test]
fn test_schedule_defaults_and_bounds() {
    let mut frag = Fragment::from_text("s", "driver = static\nparsers = p\n").unwrap();
    let schedule = ScheduleConfig::from_fragment(&mut frag).unwrap();
    assert_eq!(schedule.interval, Duration::from_secs(60));
    assert_eq!(schedule.timeout, Duration::from_secs(10));
    assert_eq!(schedule.jitter, Duration::ZERO);
    assert_eq!(schedule.max_failures, 0);

    let mut frag =
        Fragment::from_text("s", "driver = static\nparsers = p\ninterval = 0\n").unwrap();
    assert!(ScheduleConfig::from_fragment(&mut frag).is_err());

    let mut frag = Fragment::from_text("s", "driver = static\ninterval = 1\n").unwrap();
    assert!(ScheduleConfig::from_fragment(&mut frag).is_err());
}

#[test]
fn test_schedule_fractional_interval() {
    let mut frag =
        Fragment::from_text("s", "driver = static\nparsers = p\ninterval = 0.5\n").unwrap();
    let schedule = ScheduleConfig::from_fragment(&mut frag).unwrap();
    assert_eq!(schedule.interval, Duration::from_millis(500));
}

#[test]
fn test_config_from_file_and_fragment_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    std::fs::create_dir_all(base.join("source.d")).unwrap();
    std::fs::create_dir_all(base.join("parser.d")).unwrap();
    std::fs::write(
        base.join("gatherd.conf"),
        "http_port = 12345\nsource_groups = source.d/*.conf\nparsers = parser.d/*.conf\nfilters = filter.d/*.conf\nstorage = storage.d/*.conf\n",
    )
    .unwrap();
    std::fs::write(
        base.join("source.d/web.conf"),
        "driver = static\nbody = up=1\nparsers = stats\n",
    )
    .unwrap();
    std::fs::write(base.join("parser.d/stats.conf"), "driver = text_simple\n").unwrap();
    // A non-matching file is ignored.
    std::fs::write(base.join("source.d/notes.txt"), "irrelevant").unwrap();

    let config = Config::from_file(base.join("gatherd.conf").to_str().unwrap()).unwrap();
    assert_eq!(config.http_port, Some(12345));

    let loaded = load_fragments(&config).unwrap();
    assert_eq!(loaded.sources.len(), 1);
    assert_eq!(loaded.sources[0].name, "web");
    assert_eq!(loaded.sources[0].driver, "static");
    assert_eq!(loaded.parsers.len(), 1);
    assert!(loaded.filters.is_empty());
    assert!(loaded.storages.is_empty());
}

#[test]
fn test_config_rejects_unknown_top_level_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.conf");
    std::fs::write(&path, "no_such_setting = 1\n").unwrap();
    assert!(Config::from_file(path.to_str().unwrap()).is_err());
}

#[test]
fn test_config_rejects_port_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.conf");
    std::fs::write(&path, "http_port = 0\n").unwrap();
    assert!(Config::from_file(path.to_str().unwrap()).is_err());
}
