mod cli;

use vidgrab::{
    config,
    download::{self, DownloadRunner},
    extract::{MediaExtractor, YtDlpExtractor},
    probe, reaper, server,
    state::JobStore,
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn start_server(
    host: String,
    port: u16,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    config.server.host = host;
    config.server.port = port;

    tracing::info!("Starting vidgrab server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    std::fs::create_dir_all(&config.paths.scratch_dir)?;
    let config = Arc::new(config);

    let store = JobStore::new(config.paths.scratch_dir.clone());
    let extractor: Arc<dyn MediaExtractor> =
        Arc::new(YtDlpExtractor::new(PathBuf::from(&config.tools.ytdlp)));
    let runner = DownloadRunner::new(Arc::clone(&store), Arc::clone(&extractor), Arc::clone(&config));

    // Start the expiry reaper
    let reaper_shutdown = CancellationToken::new();
    let reaper_handle = reaper::spawn_reaper(
        Arc::clone(&store),
        chrono::Duration::hours(config.limits.job_ttl_hours as i64),
        std::time::Duration::from_secs(config.limits.reaper_interval_secs),
        reaper_shutdown.clone(),
    );

    let server_result = server::start_server(
        Arc::clone(&config),
        Arc::clone(&store),
        runner,
        extractor,
    )
    .await;

    // Cleanup
    tracing::info!("Shutting down...");
    reaper_shutdown.cancel();
    let _ = reaper_handle.await;
    store.purge_files();

    server_result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vidgrab=trace,tower_http=debug".to_string()
        } else {
            "vidgrab=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Probe { url, json } => probe_url(&url, cli.config.as_deref(), json),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vidgrab {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn probe_url(url: &str, config_path: Option<&std::path::Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let extractor = YtDlpExtractor::new(PathBuf::from(&config.tools.ytdlp));

    let chain = download::strategy_chain(&config.paths.cookies_dir);
    let metadata = download::run_with_fallback(&chain, |strategy| extractor.probe(url, strategy))?;
    let report = probe::build_report(metadata);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Some(title) = &report.meta.title {
        println!("Title: {title}");
    }
    if let Some(duration) = report.meta.duration {
        let secs = duration as u64;
        println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
    }

    println!("\nFormats: {}", report.formats.len());
    for format in &report.formats {
        println!("  {:>10}  {}", format.id, format.label);
    }

    Ok(())
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    println!("Checking external tools...\n");

    let tools = [
        ("yt-dlp", &config.tools.ytdlp, true),
        ("ffmpeg", &config.tools.ffmpeg, false),
        ("ffprobe", &config.tools.ffprobe, false),
    ];

    let mut all_ok = true;
    for (name, configured, required) in tools {
        match which::which(configured) {
            Ok(path) => println!("✓ {} - {}", name, path.display()),
            Err(_) => {
                if required {
                    all_ok = false;
                    println!("✗ {name} (required)");
                } else {
                    println!("✗ {name} (optional, post-processing disabled without it)");
                }
            }
        }
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some required tools are missing. Install them to enable downloads.");
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!(
                "  Concurrency: {} downloads",
                config.limits.max_concurrent_downloads
            );
            println!("  Job TTL: {}h", config.limits.job_ttl_hours);
            println!("  Allowed domains: {}", config.security.allowed_domains.len());
            println!("  Scratch dir: {}", config.paths.scratch_dir.display());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
