// CLI driver: enqueue the given files and report each item's outcome.

use romshelf::import::{ImportService, ItemState};
use romshelf::{ImporterConfig, ImporterContext};
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let sources: Vec<String> = std::env::args().skip(1).collect();
    if sources.is_empty() {
        eprintln!("usage: romshelf <rom file> [<rom file> ...]");
        std::process::exit(2);
    }

    let config = ImporterConfig::load();
    // A failed item can sit in backoff this long before its final retry
    let max_backoff = config.retry_base_delay * 2u32.pow(config.max_attempts.saturating_sub(1));

    let context = match ImporterContext::initialize(config).await {
        Ok(context) => context,
        Err(err) => {
            error!("Startup failed: {}", err);
            std::process::exit(1);
        }
    };

    let handle = ImportService::start(tokio::runtime::Handle::current(), context);
    for source in sources {
        handle.enqueue(source.into(), None);
    }

    // Wait for the queue to settle: everything terminal, and long enough
    // that no backoff timer can still requeue a failed item
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        if !handle.snapshot().iter().all(|i| i.state.is_terminal()) {
            continue;
        }
        tokio::time::sleep(max_backoff).await;
        if handle.snapshot().iter().all(|i| i.state.is_terminal()) {
            break;
        }
    }

    let mut exit_code = 0;
    for item in handle.snapshot() {
        let detail = match item.state {
            ItemState::Succeeded | ItemState::Duplicate => item.entry_id.unwrap_or_default(),
            ItemState::NeedsReview => format!("{} candidate(s)", item.candidates.len()),
            ItemState::Failed => {
                exit_code = 1;
                item.last_error.unwrap_or_default()
            }
            _ => String::new(),
        };
        println!(
            "{:<12} {} {}",
            item.state.as_str(),
            item.source_path.display(),
            detail
        );
    }
    std::process::exit(exit_code);
}
