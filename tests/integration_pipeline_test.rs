use async_trait::async_trait;
use bytes::Bytes;
use gatherd::GatherError;
use gatherd::config::{Fragment, ScheduleConfig};
use gatherd::core::filter::FilterRegistry;
use gatherd::core::parser::ParserRegistry;
use gatherd::core::pipeline::{Coordinator, RAW_CHANNEL_CAPACITY, RESULT_CHANNEL_CAPACITY};
use gatherd::core::record::{RecordIdGen, StoredSample};
use gatherd::core::resolver::Resolver;
use gatherd::core::source::{FetchContext, SourceDriver, SourceRunner, build_source};
use gatherd::core::stats::{AggMode, StatsRegistry};
use gatherd::core::storage::StorageRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Wires a full pipeline: sources from `source_texts`, parsers/filters/
/// storages from their fragment texts, everything spawned.
struct Pipeline {
    stats: Arc<StatsRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: tokio::task::JoinSet<()>,
}

async fn build_pipeline(
    source_texts: &[(&str, &str)],
    parser_texts: &[(&str, &str)],
    filter_texts: &[(&str, &str)],
    storage_texts: &[(&str, &str)],
) -> Pipeline {
    let stats = Arc::new(StatsRegistry::new());
    let (shutdown_tx, _) = broadcast::channel(1);
    let (resolver, resolver_handle) = Resolver::new(Duration::from_secs(60), false);
    let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
    let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

    let mut parser_frags: Vec<Fragment> = parser_texts
        .iter()
        .map(|(name, text)| Fragment::from_text(name, text).unwrap())
        .collect();
    let parsers = Arc::new(ParserRegistry::build(&mut parser_frags, &stats).unwrap());

    let mut filter_frags: Vec<Fragment> = filter_texts
        .iter()
        .map(|(name, text)| Fragment::from_text(name, text).unwrap())
        .collect();
    let filters = Arc::new(FilterRegistry::build(&mut filter_frags, &stats).unwrap());

    let mut storage_frags: Vec<Fragment> = storage_texts
        .iter()
        .map(|(name, text)| Fragment::from_text(name, text).unwrap())
        .collect();
    let (storages, storage_tasks) =
        StorageRegistry::build(&mut storage_frags, &resolver_handle, &results_tx, &stats)
            .unwrap();
    let storages = Arc::new(storages);

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn({
        let shutdown_rx = shutdown_tx.subscribe();
        async move { resolver.run(shutdown_rx).await }
    });
    for task in storage_tasks {
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move { task.run(shutdown_rx).await });
    }

    let coordinator = Coordinator::new(
        raw_rx,
        results_rx,
        parsers,
        filters,
        storages,
        stats.register("pipeline"),
        shutdown_tx.clone(),
    );
    let shutdown_rx = shutdown_tx.subscribe();
    tasks.spawn(async move { coordinator.run(shutdown_rx).await });

    let ids = Arc::new(RecordIdGen::new());
    for (name, text) in source_texts {
        let mut frag = Fragment::from_text(name, text).unwrap();
        let (schedule, driver) = build_source(&mut frag).unwrap();
        let runner = SourceRunner::new(
            name.to_string(),
            schedule,
            driver,
            resolver_handle.clone(),
            raw_tx.clone(),
            ids.clone(),
            stats.register(&format!("source.{name}")),
        );
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move { runner.run(shutdown_rx).await });
    }

    Pipeline {
        stats,
        shutdown_tx,
        tasks,
    }
}

#[tokio::test]
async fn test_end_to_end_static_source_to_file_sink() {
    let dir = tempfile::tempdir().unwrap();
    let storage_text = format!("driver = file\ndir = {}\n", dir.path().display());

    let mut pipeline = build_pipeline(
        &[(
            "web",
            "driver = static\nbody = hits=10\\nmisses=2\ninterval = 0.05\ntimeout = 1\nparsers = stats\nfilters = to_rate\nstorage = disk\n",
        )],
        &[("stats", "driver = text_simple\n")],
        &[("to_rate", "driver = scale\nfactor = 0.5\n")],
        &[("disk", &storage_text)],
    )
    .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    pipeline.shutdown_tx.send(()).unwrap();
    while pipeline.tasks.join_next().await.is_some() {}

    // At least one record made it to disk; the filter halved the values.
    let mut files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    files.sort();
    assert!(!files.is_empty(), "no records were written");
    let sample = StoredSample::decode(&std::fs::read(&files[0]).unwrap()).unwrap();
    let content: std::collections::HashMap<_, _> = sample.content.iter().cloned().collect();
    assert_eq!(content.get("hits"), Some(&5.0));
    assert_eq!(content.get("misses"), Some(&1.0));

    // Every fan-out got an answer: ok + err add up to everything enqueued.
    let snap = pipeline
        .stats
        .session_snapshot("pipeline", AggMode::Avg)
        .unwrap();
    let records = snap.get("records").copied().unwrap_or(0.0);
    let store_ok = snap.get("store_ok").copied().unwrap_or(0.0);
    let store_err = snap.get("store_err").copied().unwrap_or(0.0);
    assert!(records >= 1.0);
    assert!(store_ok >= 1.0);
    let disk = pipeline
        .stats
        .session_snapshot("storage.disk", AggMode::Avg)
        .unwrap();
    assert_eq!(
        disk.get("enqueued").copied().unwrap_or(0.0),
        store_ok + store_err
    );
}

#[tokio::test]
async fn test_unparseable_payload_is_dropped_and_counted() {
    let mut pipeline = build_pipeline(
        &[(
            "bad",
            "driver = static\nbody = <html>not stats</html>\ninterval = 0.05\nparsers = stats\n",
        )],
        &[("stats", "driver = nginx\n")],
        &[],
        &[],
    )
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.shutdown_tx.send(()).unwrap();
    while pipeline.tasks.join_next().await.is_some() {}

    let snap = pipeline
        .stats
        .session_snapshot("pipeline", AggMode::Avg)
        .unwrap();
    assert!(snap.get("parse_err").copied().unwrap_or(0.0) >= 1.0);
    assert_eq!(snap.get("store_ok").copied().unwrap_or(0.0), 0.0);
}

/// A driver whose fetch outlives the interval, for the no-overlap contract.
struct SlowDriver {
    in_flight: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl SourceDriver for SlowDriver {
    fn driver(&self) -> &'static str {
        "dummy"
    }

    fn signature(&self) -> String {
        "slow://".to_string()
    }

    fn endpoint(&self) -> (String, u16) {
        ("localhost".to_string(), 0)
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<Bytes, GatherError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"v=1\n"))
    }
}

#[tokio::test]
async fn test_at_most_one_fetch_in_flight_despite_overruns() {
    let stats = Arc::new(StatsRegistry::new());
    let (shutdown_tx, _) = broadcast::channel(1);
    let (resolver, resolver_handle) = Resolver::new(Duration::from_secs(60), false);
    drop(resolver);
    let (raw_tx, mut raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let fetches = Arc::new(AtomicUsize::new(0));
    let driver = Arc::new(SlowDriver {
        in_flight: in_flight.clone(),
        max_seen: max_seen.clone(),
        fetches: fetches.clone(),
    });

    let mut frag = Fragment::from_text(
        "slow",
        "driver = dummy\nparsers = p\ninterval = 0.05\ntimeout = 1\n",
    )
    .unwrap();
    let schedule = ScheduleConfig::from_fragment(&mut frag).unwrap();
    let runner = SourceRunner::new(
        "slow".to_string(),
        schedule,
        driver,
        resolver_handle,
        raw_tx,
        Arc::new(RecordIdGen::new()),
        stats.register("source.slow"),
    );
    let handle = tokio::spawn(runner.run(shutdown_tx.subscribe()));

    // Drain records so none are dropped to a full channel.
    let drain = tokio::spawn(async move { while raw_rx.recv().await.is_some() {} });

    tokio::time::sleep(Duration::from_millis(600)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
    drain.abort();

    assert_eq!(max_seen.load(Ordering::SeqCst), 1, "fetches overlapped");
    // Overruns shorten the next wait: roughly one fetch per 120 ms slow
    // cycle, never more than one per 50 ms interval.
    let count = fetches.load(Ordering::SeqCst);
    assert!(count >= 2, "too few fetches: {count}");
    assert!(count <= 12, "too many fetches: {count}");
}
