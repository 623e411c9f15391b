use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use goofish_scraper_rs::{
    AggregatorConfig, BatchConfig, BatchScheduler, DedupCache, FetchError, HarvestConfig,
    Harvester, ItemError, ItemFetcher, ItemId, ItemRecord, ItemReport, LaunchGate, OutputStore,
    ProxyCredentials, ProxyIdentity, RawResponse, ResultAggregator, Session, SessionError,
    SessionProvider, SessionSlot, WorkerPool, plan,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

fn item_url(id: &str) -> String {
    format!("https://www.goofish.com/item?id={id}")
}

fn blocked() -> Value {
    json!({ "ret": ["FAIL_SYS_USER_VALIDATE::RGV587_ERROR::SM::哎哟喂,被挤爆啦"], "data": {} })
}

fn not_found() -> Value {
    json!({ "ret": ["FAIL_BIZ_ITEM_NOT_FOUND::宝贝不存在"], "data": {} })
}

fn success(id: &str) -> Value {
    json!({
        "ret": ["SUCCESS::调用成功"],
        "data": {
            "itemDO": {
                "itemId": id,
                "categoryId": 126862528,
                "title": format!("listing {id}"),
                "imageInfos": [{ "url": "https://img.example/1.jpg" }, { "url": "https://img.example/2.jpg" }],
                "soldPrice": "120.00",
                "browseCnt": 31,
                "wantCnt": 4,
                "collectCnt": 2,
                "quantity": 1,
                "gmtCreate": 1712000000000u64
            },
            "sellerDO": { "sellerId": 2200000001u64 }
        }
    })
}

#[derive(Default)]
struct CountingProvider {
    acquired: AtomicUsize,
}

#[async_trait]
impl SessionProvider for CountingProvider {
    async fn acquire(&self, identity: &ProxyIdentity) -> Result<Session, SessionError> {
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Session {
            token: format!("token-{n}"),
            session_id: identity.session_id.clone(),
            ..Session::default()
        })
    }
}

/// Per-item reply scripts; the last reply repeats, unscripted ids succeed.
#[derive(Default)]
struct ReplayFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Value>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl ReplayFetcher {
    fn script(self, id: &str, replies: Vec<Value>) -> Self {
        self.scripts.lock().unwrap().insert(id.to_string(), replies.into());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ItemFetcher for ReplayFetcher {
    async fn fetch(&self, session: &Session, item_id: &ItemId) -> Result<RawResponse, FetchError> {
        if !session.is_usable() {
            return Err(FetchError::EmptyToken);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        *self.calls.lock().unwrap().entry(item_id.to_string()).or_default() += 1;
        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(item_id.as_str()) {
                Some(script) if script.len() > 1 => script.pop_front().unwrap(),
                Some(script) => script.front().cloned().unwrap(),
                None => success(item_id.as_str()),
            }
        };
        Ok(RawResponse::new(200, reply))
    }
}

fn record(id: &str) -> ItemRecord {
    ItemRecord {
        item_id: id.to_string(),
        category_id: "126862528".to_string(),
        title: format!("listing {id}"),
        images: vec!["https://img.example/1.jpg".to_string()],
        sold_price: "120.00".to_string(),
        browse_count: 31,
        want_count: 4,
        collect_count: 2,
        quantity: 1,
        created_at: None,
        seller_id: "2200000001".to_string(),
        source_url: item_url(id),
    }
}

fn write_input(path: &Path, urls: &[String]) {
    let mut body = String::from("URL\n");
    for url in urls {
        body.push_str(url);
        body.push('\n');
    }
    std::fs::write(path, body).unwrap();
}

#[tokio::test]
async fn worker_reports_every_url_once() {
    let provider = Arc::new(CountingProvider::default());
    let fetcher = Arc::new(
        ReplayFetcher::default()
            .script("2", vec![not_found()])
            .script("3", vec![blocked(), blocked(), success("3")]),
    );
    let slot = SessionSlot::new(1, provider.clone(), ProxyCredentials::default());
    let scheduler = BatchScheduler::new(slot, fetcher.clone(), BatchConfig::default());

    let urls = vec!["https://example.com/nothing".to_string(), item_url("2"), item_url("3")];
    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = scheduler.run(urls, &tx).await.unwrap();
    drop(tx);

    let mut reports: HashMap<String, ItemReport> = HashMap::new();
    while let Some(report) = rx.recv().await {
        assert!(reports.insert(report.url.clone(), report).is_none());
    }
    assert_eq!(reports.len(), 3);
    assert_eq!(
        reports["https://example.com/nothing"].result,
        Err(ItemError::InvalidUrl)
    );
    assert_eq!(reports[&item_url("2")].result, Err(ItemError::NotFound));

    let third = reports[&item_url("3")].record().unwrap();
    assert_eq!(third.item_id, "3");
    assert_eq!(third.seller_id, "2200000001");
    assert_eq!(third.images.len(), 2);
    assert_eq!(fetcher.calls_for("3"), 3);
    assert_eq!(fetcher.calls_for("2"), 1);

    assert_eq!(summary.reported, 3);
    assert_eq!(summary.successes, 1);
    assert_eq!(summary.rotations, 2);
}

#[tokio::test]
async fn rerun_over_persisted_output_schedules_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = OutputStore::new(dir.path().join("out.csv"));

    let first = store.persist(&[record("10"), record("11")]).unwrap();
    assert_eq!(first.rows, 2);
    let second = store.persist(&[record("10"), record("11")]).unwrap();
    assert_eq!(second.rows, 2);
    assert_eq!(second.added, 0);

    let cache = store.load_dedup_cache().unwrap();
    let planned = plan(vec![item_url("10"), item_url("11")], &cache, 100, 10);
    assert!(planned.urls.is_empty());
    assert_eq!(planned.cached, 2);
}

#[tokio::test]
async fn aggregator_stops_workers_at_target() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.csv");

    let fetcher = Arc::new(ReplayFetcher::default().with_delay(Duration::from_millis(20)));
    let fetcher_for_pool = fetcher.clone();
    let pool = WorkerPool::new(
        2,
        Arc::new(|_: usize| Arc::new(CountingProvider::default()) as Arc<dyn SessionProvider>),
        Arc::new(move |_: usize| fetcher_for_pool.clone() as Arc<dyn ItemFetcher>),
    )
    .with_gate(LaunchGate::unlimited())
    .with_batch_config(BatchConfig::default().with_concurrency(2));

    let urls: Vec<String> = (1..=200).map(|n| item_url(&n.to_string())).collect();
    let (rx, workers) = pool.spawn(urls);

    let aggregator = ResultAggregator::new(
        OutputStore::new(&output),
        AggregatorConfig {
            target: 5,
            save_every: 2,
            idle_sleep: Duration::from_millis(10),
            join_timeout: Duration::from_secs(1),
        },
    );
    let summary = aggregator.run(rx, workers).await.unwrap();

    assert!(summary.target_reached);
    assert!(summary.successes >= 5);
    assert!(summary.successes < 200);
    assert!(summary.failed_workers.is_empty());
    assert_eq!(summary.persisted_rows, summary.successes);
    assert!(fetcher.total_calls() < 200);

    let cache: DedupCache = OutputStore::new(&output).load_dedup_cache().unwrap();
    assert_eq!(cache.len(), summary.persisted_rows);
}

#[tokio::test]
async fn harvester_runs_csv_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    let output = dir.path().join("out.csv");

    let mut urls: Vec<String> = (100..110).map(|n| item_url(&n.to_string())).collect();
    urls.push(item_url("100"));
    urls.push("not a url".to_string());
    write_input(&input, &urls);
    OutputStore::new(&output).persist(&[record("100")]).unwrap();

    let config = HarvestConfig::builder()
        .with_input_csv(&input)
        .with_output_csv(&output)
        .with_workers(3)
        .with_concurrency(4)
        .with_launch_limits(3, Duration::ZERO)
        .with_save_every(3)
        .build()
        .unwrap();
    let fetcher = Arc::new(ReplayFetcher::default().script("105", vec![not_found()]));
    let harvester = Harvester::builder()
        .with_config(config)
        .with_session_provider(Arc::new(CountingProvider::default()))
        .with_fetcher(fetcher.clone())
        .build()
        .unwrap();

    let summary = harvester.harvest().await.unwrap();

    assert_eq!(summary.successes, 8);
    assert!(!summary.target_reached);
    assert_eq!(summary.persisted_rows, 9);
    assert_eq!(fetcher.calls_for("100"), 0);

    let rows = OutputStore::new(&output).load_rows().unwrap();
    let ids: Vec<&str> = rows.iter().map(|row| row.item_id.as_str()).collect();
    assert_eq!(ids[0], "100");
    assert!(!ids.contains(&"105"));
    let metrics = harvester.metrics().snapshot().global;
    assert_eq!(metrics.attempts, 9);
    assert_eq!(metrics.not_found, 1);
}

#[tokio::test]
async fn on_demand_scrape_rotates_through_blocks() {
    let provider = Arc::new(CountingProvider::default());
    let fetcher = Arc::new(ReplayFetcher::default().script("7", vec![blocked(), success("7")]));
    let config = HarvestConfig::builder()
        .with_launch_limits(1, Duration::ZERO)
        .build()
        .unwrap();
    let harvester = Harvester::builder()
        .with_config(config)
        .with_session_provider(provider.clone())
        .with_fetcher(fetcher.clone())
        .build()
        .unwrap();

    let report = harvester.scrape(&item_url("7")).await;
    assert_eq!(report.record().map(|r| r.item_id.as_str()), Some("7"));
    assert_eq!(provider.acquired.load(Ordering::SeqCst), 2);

    let invalid = harvester.scrape("https://www.goofish.com/search?q=bike").await;
    assert_eq!(invalid.to_json(), json!({ "error": "invalid_url", "url": "https://www.goofish.com/search?q=bike" }));
}
