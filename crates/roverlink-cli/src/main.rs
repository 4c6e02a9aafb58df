//! `roverlink` – relay between a small vehicle and its remote consumers.
//!
//! ```text
//! roverlink [CONFIG_PATH]
//! ```
//!
//! 1. Initialises logging (and OTLP export when configured).
//! 2. Loads `CONFIG_PATH`, or `~/.roverlink/config.toml`, or the defaults,
//!    then applies `ROVERLINK_*` environment overrides.
//! 3. Serves downstream consumers until **Ctrl-C**, which stops accepting,
//!    ends every session and joins all worker threads before exiting.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use roverlink_middleware::{StopSignal, WsTransport};
use roverlink_runtime::SessionConfig;
use roverlink_server::RelayServer;
use tracing::{error, warn};

fn main() -> ExitCode {
    let _tracing = roverlink_runtime::init_tracing("roverlink");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let explicit = std::env::args_os().nth(1).map(PathBuf::from);
    let loaded = match config::load(explicit.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    match &loaded.path {
        Some(path) => println!("  Config loaded from {}", path.display().to_string().bold()),
        None => println!("  No config file found; using defaults."),
    }

    let session_config = match loaded.config.session_config() {
        Ok(session_config) => session_config,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    print_feeds(&session_config);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = StopSignal::new();
    let handler_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing sessions …".yellow().bold());
        handler_signal.set();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Relay ─────────────────────────────────────────────────────────────
    let server = match RelayServer::bind(
        loaded.config.listen_addr.as_str(),
        session_config,
        Arc::new(WsTransport),
        shutdown,
    ) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "could not start relay");
            println!("{}: {}", "Startup error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "\n  Consumers connect to {}\n",
        format!("ws://{}/", server.local_addr()).bold().cyan()
    );

    match server.run() {
        Ok(sessions) => {
            println!("{}", format!("  ✓ Relay stopped after {sessions} session(s).").green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "relay failed");
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ____                        __    _       __  "#.bold().cyan());
    println!("{}", r#"   / __ \____ _   _____  _____/ /   (_)___  / /__"#.bold().cyan());
    println!("{}", r#"  / /_/ / __ \ | / / _ \/ ___/ /   / / __ \/ //_/"#.bold().cyan());
    println!("{}", r#" / _, _/ /_/ / |/ /  __/ /  / /___/ / / / / ,<   "#.bold().cyan());
    println!("{}", r#"/_/ |_|\____/|___/\___/_/  /_____/_/_/ /_/_/|_|  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "RoverLink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Camera, telemetry and control relay");
    println!();
}

fn print_feeds(config: &SessionConfig) {
    for (name, feed) in [
        ("stream", &config.stream),
        ("telemetry", &config.telemetry),
        ("control", &config.control),
    ] {
        println!("    {:<10} {}", name.bold(), feed.uri.dimmed());
    }
    let autopilot = if config.autopilot {
        format!("brake below {}", config.distance_threshold).green()
    } else {
        "off".to_string().yellow()
    };
    println!("    {:<10} {}", "autopilot".bold(), autopilot);
}
