//! serialsim - Run a simulated serial port and print the records it frames.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use giztoy_serialsim::{BufferPolicy, Engine, EngineConfig};
use serde::Serialize;
use tracing::{debug, info};

/// Serial port simulator.
///
/// Generates random readings at the given rate and frames them either by
/// size (--buffer) or by a delimiter byte (--until), printing each record.
#[derive(Parser, Debug)]
#[command(name = "serialsim")]
#[command(about = "Simulated serial port that prints framed records")]
#[command(version)]
struct Args {
    /// Config file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port name shown in logs and records
    #[arg(long)]
    port: Option<String>,

    /// Producer firings per second (<= 0 means once per second)
    #[arg(short, long, allow_negative_numbers = true)]
    rate: Option<f32>,

    /// Frame records of N bytes
    #[arg(short, long, conflicts_with = "until")]
    buffer: Option<usize>,

    /// Frame records ending with this byte (e.g. 10, 0x0a, '\n', ';')
    #[arg(short, long, value_parser = parse_byte)]
    until: Option<u8>,

    /// Host tick interval in milliseconds
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    /// Stop after this many milliseconds (0 = run until Ctrl-C)
    #[arg(short, long, default_value_t = 0)]
    duration_ms: u64,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// One framed record as printed with --json.
#[derive(Debug, Serialize)]
struct Record<'a> {
    seq: u64,
    port: &'a str,
    bytes: &'a [u8],
    text: String,
}

/// Prints records and counts them.
struct Emitter {
    json: bool,
    seq: AtomicU64,
}

impl Emitter {
    fn new(json: bool) -> Self {
        Self {
            json,
            seq: AtomicU64::new(0),
        }
    }

    fn count(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn format(&self, port: &str, bytes: &[u8]) -> Result<String> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let text = String::from_utf8_lossy(bytes).into_owned();
        if self.json {
            let record = Record {
                seq,
                port,
                bytes,
                text,
            };
            return Ok(serde_json::to_string(&record)?);
        }
        Ok(format!("[{}] #{} {:?}", port, seq, text))
    }
}

fn parse_byte(s: &str) -> std::result::Result<u8, String> {
    let s = s.trim_matches('\'');
    match s {
        "\\n" | "newline" => return Ok(b'\n'),
        "\\r" => return Ok(b'\r'),
        "\\t" => return Ok(b'\t'),
        "\\0" => return Ok(0),
        _ => {}
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u8::from_str_radix(hex, 16).map_err(|e| format!("invalid hex byte {:?}: {}", s, e));
    }
    if let Ok(n) = s.parse::<u8>() {
        return Ok(n);
    }
    match s.as_bytes() {
        [b] => Ok(*b),
        _ => Err(format!("expected a byte value or a single ASCII character, got {:?}", s)),
    }
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => EngineConfig::default().policy(BufferPolicy::until(b'\n')),
    };

    if let Some(port) = &args.port {
        config.port_name = port.clone();
    }
    if let Some(rate) = args.rate {
        config.rate = rate;
    }
    if let Some(size) = args.buffer {
        config.policy = BufferPolicy::size(size);
    }
    if let Some(byte) = args.until {
        config.policy = BufferPolicy::until(byte);
    }
    Ok(config)
}

fn install_handlers(engine: &Engine, emitter: Arc<Emitter>) -> Result<()> {
    let policy = engine.policy();
    engine.on_ready(move |port| {
        let record = match policy {
            BufferPolicy::Delimiter { byte } => port.read_until(byte),
            BufferPolicy::SizeThreshold { size } => port.read_bytes_max(size.max(1)),
        };
        if let Some(bytes) = record {
            println!("{}", emitter.format(port.port_name(), &bytes)?);
        }
        Ok(())
    })?;

    engine.on_available(|port| {
        debug!(port = port.port_name(), available = port.available(), "data available");
        Ok(())
    })?;
    Ok(())
}

/// Drives the engine from the host loop until `shutdown` resolves or the
/// duration elapses. Returns the number of ticks run, or the error
/// `shutdown` resolved with.
async fn run_host(
    engine: &Engine,
    tick: Duration,
    duration: Option<Duration>,
    shutdown: impl Future<Output = std::io::Result<()>>,
) -> Result<u64> {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    tokio::pin!(shutdown);

    let mut ticks = 0u64;
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("listen for Ctrl-C")?;
                break;
            }
            _ = &mut deadline => break,
            _ = interval.tick() => {
                engine.poll();
                ticks += 1;
            }
        }
    }
    Ok(ticks)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = build_config(&args)?;
    info!(
        port = %config.port_name,
        rate = config.rate,
        interval = ?config.interval(),
        policy = ?config.policy,
        "starting simulated port"
    );

    let engine = Engine::new(config);
    let emitter = Arc::new(Emitter::new(args.json));
    install_handlers(&engine, emitter.clone())?;
    engine.start()?;

    let duration = (args.duration_ms > 0).then(|| Duration::from_millis(args.duration_ms));
    let tick = Duration::from_millis(args.tick_ms.max(1));
    let result = run_host(&engine, tick, duration, tokio::signal::ctrl_c()).await;

    engine.shutdown();
    let ticks = result?;
    info!(ticks, records = emitter.count(), "stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["serialsim"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("10"), Ok(10));
        assert_eq!(parse_byte("0x0a"), Ok(10));
        assert_eq!(parse_byte("\\n"), Ok(b'\n'));
        assert_eq!(parse_byte("';'"), Ok(b';'));
        assert_eq!(parse_byte("A"), Ok(b'A'));
        assert!(parse_byte("256").is_err());
        assert!(parse_byte("ab").is_err());
        assert!(parse_byte("0xzz").is_err());
    }

    #[test]
    fn test_build_config_defaults_to_newline_records() {
        let config = build_config(&args(&[])).unwrap();
        assert_eq!(config.policy, BufferPolicy::until(b'\n'));
        assert_eq!(config.rate, 1.0);
    }

    #[test]
    fn test_build_config_flags_override() {
        let config = build_config(&args(&["--rate", "-5", "--buffer", "4", "--port", "COM3"])).unwrap();
        assert_eq!(config.rate, -5.0);
        assert_eq!(config.interval(), Duration::from_millis(1000));
        assert_eq!(config.policy, BufferPolicy::size(4));
        assert_eq!(config.port_name, "COM3");
    }

    #[test]
    fn test_buffer_and_until_conflict() {
        let res = Args::try_parse_from(["serialsim", "--buffer", "4", "--until", "10"]);
        assert!(res.is_err());
    }

    #[test]
    fn test_sample_config() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/serialsim.yaml");
        let config = build_config(&args(&["--config", path])).unwrap();
        assert_eq!(config.interval(), Duration::from_millis(100));
        assert_eq!(config.policy, BufferPolicy::until(b'\n'));

        let config = build_config(&args(&["--config", path, "--until", ";"])).unwrap();
        assert_eq!(config.policy, BufferPolicy::until(b';'));
    }

    #[test]
    fn test_missing_config_file() {
        let err = build_config(&args(&["--config", "/nonexistent/serialsim.yaml"])).unwrap_err();
        assert!(err.to_string().contains("load config"));
    }

    #[test]
    fn test_emitter_json() {
        let emitter = Emitter::new(true);
        let line = emitter.format("COM1", b" 1.50\n").unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["seq"], 1);
        assert_eq!(value["port"], "COM1");
        assert_eq!(value["text"], " 1.50\n");
        assert_eq!(value["bytes"].as_array().unwrap().len(), 6);

        let plain = Emitter::new(false);
        assert_eq!(plain.format("COM1", b"ok").unwrap(), "[COM1] #1 \"ok\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_host_frames_records() {
        let engine = Engine::new(EngineConfig::default().policy(BufferPolicy::until(b'\n')));
        let emitter = Arc::new(Emitter::new(false));
        install_handlers(&engine, emitter.clone()).unwrap();

        engine.feed(b" 0.10\n 1.20\n 0.3");
        let ticks = run_host(
            &engine,
            Duration::from_millis(10),
            Some(Duration::from_millis(100)),
            std::future::pending::<std::io::Result<()>>(),
        )
        .await
        .unwrap();

        assert!(ticks >= 1);
        assert_eq!(emitter.count(), 2);
        assert_eq!(engine.snapshot(), b" 0.3".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_host_stops_on_shutdown() {
        let engine = Engine::new(EngineConfig::default());
        let shutdown = async { Ok::<(), std::io::Error>(()) };
        let ticks = run_host(&engine, Duration::from_millis(10), None, shutdown)
            .await
            .unwrap();
        assert!(ticks <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_host_reports_signal_failure() {
        let engine = Engine::new(EngineConfig::default());
        let err = run_host(&engine, Duration::from_millis(10), None, async {
            Err::<(), _>(std::io::Error::other("signal driver unavailable"))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("listen for Ctrl-C"));
        assert!(format!("{:#}", err).contains("signal driver unavailable"));
    }
}
