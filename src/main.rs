use anyhow::{Context, Result};
use issue_relay::api::SubscriptionApi;
use issue_relay::config::Config;
use issue_relay::engine::PollScheduler;
use issue_relay::feed::HttpFetcher;
use issue_relay::sink::WebhookSink;
use issue_relay::store::{SubscribeOutcome, SubscriptionStore};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

const USAGE: &str = "\
issue-relay - polls issue-tracker feeds and relays new entries

Usage:
  issue-relay [run] [--once] [--config <path>]
  issue-relay subscribe <destination> <feed-url>
  issue-relay unsubscribe <destination>
  issue-relay set-filter <destination> [label...]
  issue-relay status <destination>
  issue-relay labels

Options:
  --config <path>   Config file (default: relay.toml)
  --once            Run a single poll cycle and exit
";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("issue_relay=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut positional: Vec<String> = Vec::new();
    let mut once = false;
    let mut config_path = "relay.toml".to_string();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--once" => once = true,
            "--config" => {
                config_path = iter
                    .next()
                    .context("--config requires a path argument")?
                    .clone();
            }
            "--help" | "-h" => {
                print!("{}", USAGE);
                return Ok(());
            }
            _ => positional.push(arg.clone()),
        }
    }

    // Load saved credentials from .env (real env vars take precedence)
    Config::load_env_file();
    let config = Config::load_or_default(Path::new(&config_path))?;

    let store = Arc::new(SubscriptionStore::open(&config.engine.state_file)?);
    let fetcher = Arc::new(HttpFetcher::new(config.request_timeout())?);
    let api = SubscriptionApi::new(Arc::clone(&store), fetcher.clone());

    let command = positional.first().map(String::as_str).unwrap_or("run");
    match command {
        "subscribe" => {
            let destination = positional.get(1).context("subscribe needs <destination>")?;
            let feed_url = positional.get(2).context("subscribe needs <feed-url>")?;
            match api.subscribe(destination, feed_url).await? {
                SubscribeOutcome::Created => {
                    println!("subscribed {} to {}", destination, feed_url);
                }
                SubscribeOutcome::Replaced { previous_url } => {
                    println!(
                        "subscribed {} to {} (replaced previous subscription to {})",
                        destination, feed_url, previous_url
                    );
                }
            }
        }
        "unsubscribe" => {
            let destination = positional
                .get(1)
                .context("unsubscribe needs <destination>")?;
            api.unsubscribe(destination)?;
            println!("unsubscribed {}", destination);
        }
        "set-filter" => {
            let destination = positional.get(1).context("set-filter needs <destination>")?;
            let labels: Vec<String> = positional[2..].to_vec();
            api.set_filter(destination, labels.clone())?;
            if labels.is_empty() {
                println!("filter cleared for {} (all entries match)", destination);
            } else {
                println!("filter for {} set to: {}", destination, labels.join(", "));
            }
        }
        "status" => {
            let destination = positional.get(1).context("status needs <destination>")?;
            let status = api.status(destination)?;
            println!("destination:   {}", destination);
            println!("feed:          {}", status.feed_url);
            if status.filter.is_empty() {
                println!("filter:        (empty - all entries match)");
            } else {
                println!("filter:        {}", status.filter.join(", "));
            }
            println!("seen entries:  {}", status.seen_count);
            if !status.baselined {
                println!("baseline:      pending first successful poll");
            }
            if let Some(when) = status.last_checked {
                println!("last delivery: {}", when.to_rfc3339());
            }
        }
        "labels" => {
            println!("supported labels (reference only, any token is accepted):");
            for label in api.list_supported_labels() {
                println!("  {}", label);
            }
        }
        "run" => {
            let webhook = config
                .webhook
                .as_ref()
                .context("run mode requires [webhook] base_url in the config file")?;
            let sink = Arc::new(WebhookSink::new(
                &webhook.base_url,
                Config::auth_token(),
                config.request_timeout(),
            )?);
            let mut scheduler = PollScheduler::new(store, fetcher, sink, &config.engine);

            if once {
                let (_shutdown_tx, shutdown_rx) = watch::channel(false);
                let stats = scheduler.run_cycle(&shutdown_rx).await;
                println!(
                    "cycle complete: {} feeds fetched, {} failed, {} entries delivered",
                    stats.feeds_fetched, stats.feeds_failed, stats.delivered
                );
                return Ok(());
            }

            tracing::info!(
                interval_minutes = config.engine.poll_interval_minutes,
                state_file = %config.engine.state_file,
                "relay starting"
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let poll_task = tokio::spawn(scheduler.run(config.poll_interval(), shutdown_rx));

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            tracing::info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(true);
            poll_task.await.context("poll loop panicked")?;
        }
        other => {
            eprint!("unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}
