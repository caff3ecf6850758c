//! Timedcapture - Timed SDR streaming capture
//!
//! Demo entry point: streams from the simulated radio into the circular
//! buffer, reports status, and extracts the window captured during a task.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use timedcapture::capture::{SimulatedConfig, SimulatedDriver};
use timedcapture::timing::ClockDomain;
use timedcapture::units::{format_duration_ns, format_frequency, format_sample_rate};
use timedcapture::{CaptureConfig, ClockSource, StreamingSession, TimingContext, WindowExtractor};
use tracing::{error, info};

/// Iterations per clock latency measurement
const LATENCY_ITERATIONS: usize = 10_000;

/// Sample rate used when no config file is given
const DEMO_SAMPLE_RATE: f64 = 2e6;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("timedcapture=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut duration = Duration::from_secs(2);
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("timedcapture {}", timedcapture::VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--clocks" => {
                return report_clocks();
            }
            "--config" | "-c" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --config requires a path");
                    return Ok(());
                }
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
                continue;
            }
            "--duration" | "-d" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --duration requires a value in seconds");
                    return Ok(());
                }
                let parsed = args[i + 1]
                    .parse::<f64>()
                    .ok()
                    .and_then(|s| Duration::try_from_secs_f64(s).ok());
                match parsed {
                    Some(d) => duration = d,
                    None => {
                        eprintln!("Error: Invalid duration: {}", args[i + 1]);
                        return Ok(());
                    }
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
    }

    let config = match &config_path {
        Some(path) => CaptureConfig::load(path),
        // Keep the simulated radio light without a config file
        None => CaptureConfig {
            device_args: "driver=sim".to_string(),
            sample_rate: DEMO_SAMPLE_RATE,
            ..CaptureConfig::default()
        },
    };

    run_capture(config, duration)
}

fn print_help() {
    println!("Usage: timedcapture [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH       Load capture configuration (JSON)");
    println!("  -d, --duration SECS     Streaming duration (default: 2)");
    println!("      --clocks            Report clock availability and read latency");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Streams from the built-in simulated radio. Press Ctrl+C to stop early.");
}

fn report_clocks() -> Result<()> {
    let clock = ClockSource::system();

    println!("Clock availability:");
    for (domain, available) in clock.availability() {
        let mark = if available { "available" } else { "unavailable" };
        println!("  {:<24} {}", domain.name(), mark);
    }
    println!();

    let reading = clock.now_multi();
    match reading.tai_utc_offset_seconds() {
        Some(offset) if offset.abs() < 0.5 => {
            println!("TAI - UTC: {offset:.3} s (kernel TAI offset not set, PTP likely inactive)")
        }
        Some(offset) => println!("TAI - UTC: {offset:.3} s"),
        None => println!("TAI - UTC: unknown"),
    }
    println!();

    println!("Read latency ({LATENCY_ITERATIONS} calls):");
    for domain in [
        ClockDomain::Realtime,
        ClockDomain::RealtimeCoarse,
        ClockDomain::Monotonic,
        ClockDomain::MonotonicCoarse,
        ClockDomain::MonotonicRaw,
        ClockDomain::Tai,
        ClockDomain::Boottime,
    ] {
        match clock.measure_latency(domain, LATENCY_ITERATIONS) {
            Ok(stats) => println!(
                "  {:<24} median {:>5} ns  p99 {:>6} ns  max {:>8} ns",
                domain.name(),
                stats.median_ns,
                stats.p99_ns,
                stats.max_ns
            ),
            Err(e) => println!("  {:<24} {}", domain.name(), e),
        }
    }

    Ok(())
}

fn run_capture(config: CaptureConfig, duration: Duration) -> Result<()> {
    println!("Device:      {}", config.device_args);
    println!("Sample rate: {}", format_sample_rate(config.sample_rate));
    println!("Frequency:   {}", format_frequency(config.center_freq));
    println!("Buffer:      {:.1} s", config.buffer_duration_secs);
    println!();

    let domain = config.timestamp_domain;
    let timing = TimingContext::system();
    let driver = Arc::new(SimulatedDriver::new(SimulatedConfig::default()));
    let session = StreamingSession::new(config, driver, Arc::clone(&timing));

    if let Err(e) = session.start() {
        error!(error = %e, "Failed to start streaming");
        println!("Error: {}", e);
        return Ok(());
    }

    if !session.wait_for_data(Duration::from_secs(5)) {
        println!("Error: no samples received within 5 s");
        session.stop();
        return Ok(());
    }
    info!("Streaming started");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    let extractor = WindowExtractor::new(session.buffer());
    let task_duration = (duration / 2).min(Duration::from_secs(1));
    let deadline = Instant::now() + duration;
    let mut captured = false;

    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        if !captured {
            let (_, query, window) = extractor.capture_during(timing.clock(), domain, || {
                std::thread::sleep(task_duration)
            });
            println!(
                "Task window: {} -> {} samples in {} chunks",
                format_duration_ns(query.duration_ns()),
                window.len(),
                window.chunk_count()
            );
            captured = true;
            continue;
        }

        let status = session.status();
        println!("{}", serde_json::to_string(&status)?);
        if status.state.is_failed() {
            break;
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    println!();
    println!("Stopping...");
    session.stop();
    println!("{}", serde_json::to_string_pretty(&session.status())?);

    for event in session.overflow_events() {
        println!(
            "Overflow #{} at {}",
            event.sequence,
            event.timestamp.format("%H:%M:%S%.3f")
        );
    }

    println!("Done.");
    Ok(())
}
