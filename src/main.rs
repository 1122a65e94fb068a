//! Result Set Demo - Paging Over an In-Memory Source
//!
//! Pages through a generated data set, narrows the criteria once everything
//! is cached and applies a change notification. Set `RUST_LOG=debug` to see
//! the fetch lifecycle.

use std::time::Duration;

use anyhow::Context;
use resultset_cache::utils::load_result_set_config;
use resultset_cache::{
    ChangeNotifier, Criteria, Criterion, MemoryFetcher, Record, ResultSet, ResultSetEvent,
    SortSpecifier,
};
use serde_json::json;

const CITIES: [&str; 4] = ["Oslo", "Lima", "Pune", "Kyiv"];

fn sample_rows(count: i64) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new()
                .with("id", i)
                .with("city", CITIES[(i % 4) as usize])
                .with("score", (i * 37) % 100)
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_result_set_config(&path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => resultset_cache::ResultSetConfig {
            result_size: 25,
            ..Default::default()
        },
    };
    tracing::info!("Starting result set demo ({:?} mode)", config.fetch_mode);

    let notifier = ChangeNotifier::new();
    let fetcher = MemoryFetcher::new(sample_rows(200)).with_notifier(notifier.clone());
    let set = ResultSet::builder()
        .config(config)
        .sort(vec![SortSpecifier::descending("score")])
        .build(fetcher.clone())
        .context("Failed to build result set")?;
    set.attach(&notifier);
    let events = set.events();

    for page in 0..4 {
        let start = page * 50;
        set.get_range(start, start + 50);
        while !set.range_is_loaded(start, start + 50) {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv_async())
                .await
                .context("Timed out waiting for rows")??;
            if let ResultSetEvent::FetchError { error, .. } = event {
                return Err(error.into());
            }
        }
        tracing::info!(
            "Page {page}: {} rows cached of {} (known: {})",
            set.all_cached_rows().len(),
            set.length(),
            set.length_is_known()
        );
    }

    let oslo = Criteria::new().equals("city", "oslo");
    let fetched = set.set_criteria(oslo);
    tracing::info!(
        "Filtered to Oslo: {} rows, fetch needed: {}",
        set.length(),
        fetched
    );

    let high = Criteria::new()
        .equals("city", "oslo")
        .with("score", Criterion::GreaterOrEqual(json!(50)));
    let source = if set.set_criteria(high) {
        "fetcher"
    } else {
        "local cache"
    };
    tracing::info!(
        "Score >= 50: {} rows served from the {source} (filtered subset: {})",
        set.length(),
        set.using_filtered_data()
    );

    fetcher.insert(
        Record::new()
            .with("id", 1000)
            .with("city", "Oslo")
            .with("score", 99),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    for (index, record) in set.all_cached_rows().iter().take(5).enumerate() {
        tracing::info!(
            "#{index}: id={} score={}",
            record.value("id"),
            record.value("score")
        );
    }
    tracing::info!("Fetches issued: {}", set.fetch_history().len());

    Ok(())
}
