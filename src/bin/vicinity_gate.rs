//! vicinity_gate - standalone vicinity condition daemon
//!
//! This daemon:
//! 1. Subscribes to the configured frame source (MQTT topic or `stub://`)
//! 2. Ticks the vicinity condition at a fixed interval
//! 3. Logs each status and periodic subscription statistics
//!
//! It stands in for a host control loop when wiring up cameras and
//! classifiers.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vicinity_gate::config::parse_timeout_ms;
use vicinity_gate::{ConditionNode, NodeStatus, VicinityCondition, VicinityConfig};

const CONDITION_NAME: &str = "MLVicinity";
const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Tick a perception-gated vicinity condition")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "VICINITY_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: MQTT topic, or stub://<name> for synthetic frames.
    #[arg(long)]
    frame_source: Option<String>,

    /// Classifier response timeout in milliseconds.
    #[arg(long)]
    response_timeout_ms: Option<String>,

    /// Classifier endpoint: http(s)://... or stub://clear|blocked|silent.
    #[arg(long)]
    classifier_url: Option<String>,

    /// Interval between ticks in milliseconds.
    #[arg(long)]
    tick_interval_ms: Option<u64>,

    /// Allow non-loopback MQTT brokers.
    #[arg(long)]
    allow_remote_mqtt: bool,

    /// Stop after this many ticks (runs until interrupted when omitted).
    #[arg(long)]
    ticks: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // CLI flags may supply what the file and environment left out, so
    // validation happens after they are applied.
    let mut cfg = VicinityConfig::read(args.config.as_deref())?;
    apply_args(&mut cfg, &args)?;
    cfg.validate()?;

    log::info!("vicinity_gate starting");
    log::info!("  frame source: {}", cfg.frame_source);
    log::info!("  response timeout: {:?}", cfg.response_timeout);
    log::info!("  classifier: {} (model {})", cfg.classifier.endpoint, cfg.classifier.model);
    log::info!("  tick interval: {:?}", cfg.tick_interval);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let condition = VicinityCondition::from_config(CONDITION_NAME, &cfg)?;

    let mut tick_count = 0u64;
    let mut clear_count = 0u64;
    let mut last_stats = Instant::now();
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let status = condition.tick();
        tick_count += 1;
        if status == NodeStatus::Success {
            clear_count += 1;
        }
        log::info!(
            "tick #{}: {} -> {:?} in {:?}",
            tick_count,
            condition.name(),
            status,
            started.elapsed()
        );

        if last_stats.elapsed() >= STATS_INTERVAL {
            let stats = condition.subscription_stats();
            log::info!(
                "frames={} decode_failures={} transport_errors={} clear={}/{}",
                stats.frames_published,
                stats.decode_failures,
                stats.transport_errors,
                clear_count,
                tick_count
            );
            last_stats = Instant::now();
        }

        if args.ticks.is_some_and(|limit| tick_count >= limit) {
            break;
        }
        if let Some(rest) = cfg.tick_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    log::info!("vicinity_gate stopping after {} ticks", tick_count);
    drop(condition);
    Ok(())
}

fn apply_args(cfg: &mut VicinityConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.frame_source {
        cfg.frame_source = source.clone();
    }
    if let Some(timeout) = &args.response_timeout_ms {
        cfg.response_timeout = parse_timeout_ms(timeout)?;
    }
    if let Some(url) = &args.classifier_url {
        cfg.classifier.endpoint = url.clone();
    }
    if let Some(ms) = args.tick_interval_ms {
        cfg.tick_interval = Duration::from_millis(ms);
    }
    if args.allow_remote_mqtt {
        log::warn!("remote MQTT enabled - ensure broker is in a trusted network");
        cfg.broker.allow_remote = true;
    }
    Ok(())
}
