//! timeshift CLI: a pipe that remembers everything so it can be read later.
//!
//! ```text
//! mplayer -dumpstream -dumpfile /dev/fd/3 dvb://channel 3>&1 |
//!     timeshift filter -d cache | mplayer -
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use timeshift_core::config::{parse_size, ConfigFile, RelayConfig, ShiftConfig};
use timeshift_relay::{filter, shutdown_signal, supervisor, SessionOutcome, SessionReport};

#[derive(Parser)]
#[command(name = "timeshift")]
#[command(about = "Disk-backed pipe: decouple a producer's rate from its consumer's", long_about = None)]
struct Cli {
    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default, Clone)]
struct ShiftArgs {
    /// Cache directory for chunk files
    #[arg(short = 'd', long)]
    cache_dir: Option<PathBuf>,

    /// Chunk size in bytes (accepts K/M/G suffixes)
    #[arg(short = 's', long, value_parser = parse_size)]
    chunk_size: Option<usize>,

    /// Bytes moved per read/write call
    #[arg(long, value_parser = parse_size)]
    transfer_unit: Option<usize>,

    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a JSON session report here when done
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Time-shift standard input to standard output
    Filter(ShiftArgs),

    /// Accept TCP clients and spool each upstream response through the cache
    Relay {
        #[command(flatten)]
        shift: ShiftArgs,

        /// Address to listen on
        #[arg(short, long)]
        listen: Option<String>,

        /// Destination host
        host: Option<String>,

        /// Destination port
        port: Option<u16>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let code = match cli.command {
        Commands::Filter(args) => run_filter(args),
        Commands::Relay {
            shift,
            listen,
            host,
            port,
        } => run_relay(shift, listen, host, port),
    };
    std::process::exit(code);
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_filter(args: ShiftArgs) -> i32 {
    let cfg = match load_config_file(args.config.as_deref())
        .and_then(|file| resolve_shift(ShiftConfig::filter_default(), &file, env_var, &args))
    {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    tracing::debug!(config = ?cfg, "filter configuration resolved");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: tokio runtime: {}", e);
            return 1;
        }
    };
    let res = rt.block_on(filter::run_filter(&cfg));
    // A read on stdin cannot be cancelled; don't wait for it.
    rt.shutdown_background();

    match res {
        Ok(report) => finish_report(&report, args.report.as_deref()),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn run_relay(args: ShiftArgs, listen: Option<String>, host: Option<String>, port: Option<u16>) -> i32 {
    let cfg = match load_config_file(args.config.as_deref())
        .and_then(|file| resolve_relay(&file, env_var, &args, listen, host, port))
    {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    tracing::debug!(
        listen = %cfg.listen,
        upstream = %cfg.upstream_addr(),
        config = ?cfg.shift,
        "relay configuration resolved"
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: tokio runtime: {}", e);
            return 1;
        }
    };
    match rt.block_on(supervisor::serve(cfg, shutdown_signal())) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn finish_report(report: &SessionReport, path: Option<&Path>) -> i32 {
    if let Some(path) = path {
        let written = report
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("Error: writing report to {}: {}", path.display(), e);
        }
    }
    match &report.outcome {
        SessionOutcome::Failed(err) => {
            eprintln!("Error: {}", err);
            1
        }
        _ => 0,
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn load_config_file(path: Option<&Path>) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("reading config {}: {}", path.display(), e))?;
            Ok(ConfigFile::from_yaml(&text)?)
        }
        None => Ok(ConfigFile::default()),
    }
}

/// Defaults, then config file, then environment, then flags.
fn resolve_shift(
    mut cfg: ShiftConfig,
    file: &ConfigFile,
    env: impl Fn(&str) -> Option<String>,
    args: &ShiftArgs,
) -> Result<ShiftConfig, Box<dyn std::error::Error>> {
    cfg.apply_file(file);
    cfg.apply_vars(env)?;
    apply_shift_args(&mut cfg, args);
    cfg.validate()?;
    Ok(cfg)
}

fn resolve_relay(
    file: &ConfigFile,
    env: impl Fn(&str) -> Option<String>,
    args: &ShiftArgs,
    listen: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    let mut cfg = RelayConfig::new("0.0.0.0:8080", "", 0);
    cfg.apply_file(file);
    cfg.shift.apply_vars(env)?;
    apply_shift_args(&mut cfg.shift, args);
    if let Some(listen) = listen {
        cfg.listen = listen;
    }
    if let Some(host) = host {
        cfg.upstream_host = host;
    }
    if let Some(port) = port {
        cfg.upstream_port = port;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn apply_shift_args(cfg: &mut ShiftConfig, args: &ShiftArgs) {
    if let Some(dir) = &args.cache_dir {
        cfg.cache_dir = Some(dir.clone());
    }
    if let Some(sz) = args.chunk_size {
        cfg.chunk_size = sz;
    }
    if let Some(unit) = args.transfer_unit {
        cfg.transfer_unit = unit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use timeshift_core::config::{ENV_CACHE_DIR, ENV_CHUNK_SIZE};

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn filter_flags_parse_like_getopt() {
        let cli = Cli::try_parse_from(["timeshift", "filter", "-d", "/tmp/c", "-s", "1M"]).unwrap();
        match cli.command {
            Commands::Filter(args) => {
                assert_eq!(args.cache_dir.as_deref(), Some(Path::new("/tmp/c")));
                assert_eq!(args.chunk_size, Some(1 << 20));
            }
            _ => panic!("expected filter"),
        }
        assert!(Cli::try_parse_from(["timeshift", "filter", "-s", "zero"]).is_err());
    }

    #[test]
    fn missing_cache_dir_is_a_config_error() {
        let err = resolve_shift(
            ShiftConfig::filter_default(),
            &ConfigFile::default(),
            no_env,
            &ShiftArgs::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cache dir not specified"));
    }

    #[test]
    fn flags_override_env_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile {
            cache_dir: Some("/does/not/exist".into()),
            chunk_size: Some(1024),
            transfer_unit: Some(512),
            ..Default::default()
        };
        let env_dir = dir.path().to_string_lossy().to_string();
        let env = move |k: &str| match k {
            ENV_CACHE_DIR => Some(env_dir.clone()),
            ENV_CHUNK_SIZE => Some("2048".to_string()),
            _ => None,
        };
        let args = ShiftArgs {
            chunk_size: Some(4096),
            ..Default::default()
        };
        let cfg = resolve_shift(ShiftConfig::filter_default(), &file, env, &args).unwrap();
        assert_eq!(cfg.cache_dir.as_deref(), Some(dir.path()));
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.transfer_unit, 512);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = ShiftArgs {
            cache_dir: Some(dir.path().to_path_buf()),
            chunk_size: Some(0),
            ..Default::default()
        };
        let err = resolve_shift(ShiftConfig::filter_default(), &ConfigFile::default(), no_env, &args)
            .unwrap_err();
        assert!(err.to_string().contains("chunk size"));
    }

    #[test]
    fn relay_uses_relay_chunk_default_and_positional_destination() {
        let dir = tempfile::tempdir().unwrap();
        let args = ShiftArgs {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let cfg = resolve_relay(
            &ConfigFile::default(),
            no_env,
            &args,
            Some("127.0.0.1:9999".into()),
            Some("origin.local".into()),
            Some(8000),
        )
        .unwrap();
        assert_eq!(cfg.shift.chunk_size, 16 * 1024 * 1024);
        assert_eq!(cfg.upstream_addr(), "origin.local:8000");
        assert_eq!(cfg.listen, "127.0.0.1:9999");
    }

    #[test]
    fn relay_without_destination_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = ShiftArgs {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let err = resolve_relay(&ConfigFile::default(), no_env, &args, None, None, None).unwrap_err();
        assert!(err.to_string().contains("destination"));
    }

    #[test]
    fn failed_outcome_exits_nonzero() {
        let report = SessionReport {
            session: timeshift_core::id::SessionId::random(),
            outcome: SessionOutcome::Failed("write to sink: device error".into()),
            stats: Default::default(),
            spill: Default::default(),
            started_ms: 0,
            finished_ms: 0,
        };
        assert_eq!(finish_report(&report, None), 1);

        let ok = SessionReport {
            outcome: SessionOutcome::PeerGone,
            ..report
        };
        assert_eq!(finish_report(&ok, None), 0);
    }
}
