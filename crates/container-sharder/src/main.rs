use anyhow::Context;
use clap::Parser;
use container_sharder::{Config, SharderPass, Stats};
use rand::Rng;
use shard_client::{HttpReplicationEngine, InternalClient};
use shard_ring::Ring;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<(), anyhow::Error> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(!matches!(std::env::var("NO_COLOR"), Ok(v) if v == "1"))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let config = Config::parse();
    tracing::info!(?config, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(async_main(config));
    tracing::info!(?result, "container-sharder daemon completed, shutting down");
    runtime.shutdown_timeout(Duration::from_secs(5));
    result
}

async fn async_main(config: Config) -> Result<(), anyhow::Error> {
    let ring_bytes = tokio::fs::read(&config.ring_path)
        .await
        .with_context(|| format!("reading ring file at {}", config.ring_path))?;
    let ring = Arc::new(
        Ring::from_json(&ring_bytes, config.local_ip.clone(), config.bind_port).context("parsing ring file")?,
    );

    let conn_timeout = Duration::from_secs(config.conn_timeout);
    let node_timeout = Duration::from_secs(config.node_timeout);

    let client = InternalClient::new(conn_timeout, node_timeout, config.request_tries).context("building internal client")?;
    let replication: Arc<dyn shard_client::ReplicationEngine> = Arc::new(
        HttpReplicationEngine::new(ring.clone(), conn_timeout, node_timeout, config.request_tries)
            .context("building replication engine")?,
    );

    let pass = SharderPass {
        group_count: config.shard_group_count,
        devices_root: config.devices.clone().into(),
        ring,
        client,
        base_url: config.proxy_base_url.clone(),
        replication,
        concurrency: config.concurrency,
        mount_check: config.mount_check,
    };

    let mut stats = Stats::default();

    if config.once {
        run_one_pass(&pass, &config, &mut stats).await;
        return Ok(());
    }

    let interval = Duration::from_secs(config.interval);
    let startup_jitter = interval.mul_f64(rand::thread_rng().gen_range(0.0..1.0));
    tracing::info!(jitter_secs = startup_jitter.as_secs_f64(), "sleeping before first pass to desynchronize from other nodes");
    tokio::time::sleep(startup_jitter).await;

    loop {
        let begin = Instant::now();
        run_one_pass(&pass, &config, &mut stats).await;
        let elapsed = begin.elapsed();

        let remaining = interval.checked_sub(elapsed).unwrap_or(Duration::ZERO);
        tracing::info!(elapsed_secs = elapsed.as_secs_f64(), sleep_secs = remaining.as_secs_f64(), "pass complete");
        tokio::time::sleep(remaining).await;
    }
}

async fn run_one_pass(pass: &SharderPass, config: &Config, stats: &mut Stats) {
    let begin = Instant::now();
    if let Err(err) = pass.run_once(stats).await {
        tracing::warn!(error = ?err, "sharder pass failed");
        stats.errors += 1;
    }
    let elapsed = begin.elapsed().as_secs_f64();

    if let Err(err) = container_sharder::recon::dump_pass_completed(
        std::path::Path::new(&config.recon_cache_path).join("container.recon"),
        elapsed,
    ) {
        tracing::warn!(error = ?err, "failed to write recon cache");
    }

    tracing::info!(passes = stats.passes, errors = stats.errors, splits = stats.splits, misplaced_relocated = stats.misplaced_relocated, "recorded pass stats");
}
