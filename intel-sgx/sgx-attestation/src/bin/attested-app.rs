/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fs;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use sgx_attestation::config::DEFAULT_CONFIG_PATH;
use sgx_attestation::https::{self, ServerState};
use sgx_attestation::socket::SocketServer;
use sgx_attestation::software::SoftwareSource;
use sgx_attestation::Configuration;

const ENCLAVE_KEY_BITS: u32 = 3072;
const TLS_KEY_BITS: u32 = 3072;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    Socket,
    Https,
}

/// The attested application: proves its enclave identity to a verifier and
/// receives a provisioned secret.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve attestation handshakes
    Run {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Transport::Socket)]
        transport: Transport,

        /// PEM RSA key used by the software attestation source. A fresh key
        /// is generated when omitted.
        #[arg(long)]
        enclave_key: Option<PathBuf>,
    },
    /// Write a self-signed TLS certificate and key for the HTTPS transport
    GenCert {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> anyhow::Result<Configuration> {
    Configuration::load(path).with_context(|| format!("failed to load configuration {}", path.display()))
}

fn run(config_path: &Path, transport: Transport, enclave_key: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let source = Arc::new(match enclave_key {
        Some(path) => {
            let pem = fs::read(path).with_context(|| format!("failed to read enclave key {}", path.display()))?;
            SoftwareSource::from_pem(&pem).context("invalid enclave key")?
        }
        None => SoftwareSource::generate(ENCLAVE_KEY_BITS).context("failed to generate enclave key")?,
    });
    let host = config.attestedapp_host.as_str();
    let port = config.attestedapp_port;

    match transport {
        Transport::Socket => {
            let server = SocketServer::bind((host, port), source, config.credentials())
                .with_context(|| format!("failed to listen on {}:{}", host, port))?
                .io_timeout(config.io_timeout());
            info!("listening for verifiers on {}", server.local_addr()?);
            server.run()?;
        }
        Transport::Https => {
            let token = config.bearer_token()?;
            let cert = fs::read(&config.tls_cert)
                .with_context(|| format!("failed to read TLS certificate {}", config.tls_cert.display()))?;
            let key = fs::read(&config.tls_key)
                .with_context(|| format!("failed to read TLS key {}", config.tls_key.display()))?;
            let addr = (host, port).to_socket_addrs()?
                .next()
                .with_context(|| format!("{} did not resolve", host))?;

            let state = Arc::new(ServerState::new(source, token));
            let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
            runtime.block_on(https::serve(state, addr, cert, key))?;
        }
    }
    Ok(())
}

fn gen_cert(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if config.tls_cert.exists() || config.tls_key.exists() {
        warn!("overwriting existing TLS material at {} and {}", config.tls_cert.display(), config.tls_key.display());
    }
    let identity = https::generate_self_signed(TLS_KEY_BITS)?;
    fs::write(&config.tls_cert, &identity.cert_pem)
        .with_context(|| format!("failed to write {}", config.tls_cert.display()))?;
    fs::write(&config.tls_key, &*identity.key_pem)
        .with_context(|| format!("failed to write {}", config.tls_key.display()))?;
    info!("wrote certificate for {} to {}", https::SERVER_NAME, config.tls_cert.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" })).init();

    match cli.command {
        Command::Run { config, transport, enclave_key } => run(&config, transport, enclave_key.as_deref()),
        Command::GenCert { config } => gen_cert(&config),
    }
}
