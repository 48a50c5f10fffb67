// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintRelay: receipt print-job dispatch.
//
// Entry point. Initialises logging, loads the configuration and runs one of
// the services or one-shot commands.

mod services;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use printrelay_core::AppConfig;
use printrelay_core::error::Result;
use printrelay_core::types::DocumentType;

/// PrintRelay - get ESC/POS jobs onto receipt printers
#[derive(Parser, Debug)]
#[command(name = "printrelay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults apply when absent
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the local bridge for a serial/USB printer
    Bridge {
        /// HTTP port (overrides bridge.listen_port)
        #[arg(long)]
        port: Option<u16>,

        /// Serial baud rate (overrides bridge.baud_rate)
        #[arg(long)]
        baud: Option<u32>,

        /// Do not connect to a serial port at startup
        #[arg(long)]
        no_auto_connect: bool,
    },

    /// Run the network print relay and discovery service
    Relay {
        /// Listen address (overrides relay.listen)
        #[arg(long)]
        listen: Option<String>,
    },

    /// Run the remote dispatch service
    Dispatch {
        /// Listen address (overrides dispatch.listen)
        #[arg(long)]
        listen: Option<String>,

        /// SQLite job store (overrides dispatch.database_path)
        #[arg(long, value_name = "FILE")]
        database: Option<PathBuf>,
    },

    /// Sweep the local network for printers
    Discover {
        /// Three-octet prefix such as 192.168.1 (defaults to the configured list)
        #[arg(long)]
        subnet: Option<String>,
    },

    /// Send an ESC/POS file to a printer
    Send {
        /// File holding the raw ESC/POS bytes
        file: PathBuf,

        /// Route to the printer
        #[arg(long, value_enum, default_value_t = Via::Direct)]
        via: Via,

        /// Printer address (direct)
        #[arg(long)]
        ip: Option<String>,

        /// Printer port (direct)
        #[arg(long, default_value_t = 9100)]
        port: u16,

        /// Network relay URL; without it the socket is opened locally (direct)
        #[arg(long)]
        relay_url: Option<String>,

        /// Bridge URL (bridge)
        #[arg(long, default_value = "http://127.0.0.1:9100")]
        bridge_url: String,

        /// Dispatch service URL (dispatch)
        #[arg(long)]
        dispatch_url: Option<String>,

        /// Bearer token (dispatch)
        #[arg(long)]
        token: Option<String>,

        /// Account id the token was issued for (dispatch)
        #[arg(long)]
        user_id: Option<String>,

        /// Business reference of the document
        #[arg(long, default_value = "cli")]
        order_ref: String,

        /// order, checklist or receipt
        #[arg(long, default_value = "order")]
        document_type: DocumentType,

        /// Document number shown in the print history
        #[arg(long)]
        number: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Via {
    Direct,
    Bridge,
    Dispatch,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Bridge {
            port,
            baud,
            no_auto_connect,
        } => {
            if let Some(port) = port {
                config.bridge.listen_port = port;
            }
            if let Some(baud) = baud {
                config.bridge.baud_rate = baud;
            }
            if no_auto_connect {
                config.bridge.auto_connect = false;
            }
            services::serve::bridge(&config.bridge).await
        }
        Commands::Relay { listen } => {
            if let Some(listen) = listen {
                config.relay.listen = listen;
            }
            services::serve::relay(&config.relay, &config.discovery).await
        }
        Commands::Dispatch { listen, database } => {
            if let Some(listen) = listen {
                config.dispatch.listen = listen;
            }
            if let Some(database) = database {
                config.dispatch.database_path = database;
            }
            services::serve::dispatch(&config.dispatch).await
        }
        Commands::Discover { subnet } => services::send::discover(&config.discovery, subnet.as_deref()).await,
        Commands::Send {
            file,
            via,
            ip,
            port,
            relay_url,
            bridge_url,
            dispatch_url,
            token,
            user_id,
            order_ref,
            document_type,
            number,
        } => {
            let transport = services::send::pick_transport(services::send::Route {
                via,
                ip,
                port,
                relay_url,
                bridge_url,
                dispatch_url,
                token,
                user_id,
            })?;
            services::send::send_file(&config, transport, &file, &order_ref, document_type, number).await
        }
    }
}
