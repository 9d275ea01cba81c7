/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use sgx_attestation::config::DEFAULT_CONFIG_PATH;
use sgx_attestation::https::HttpsChannel;
use sgx_attestation::socket::SocketChannel;
use sgx_attestation::software::SoftwareQuoteVerifier;
use sgx_attestation::{Configuration, ProverChannel, VerifierSession};
use sqvs::client::ClientBuilder;
use sqvs::{QuotePolicy, QuoteVerifier};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    Socket,
    Https,
}

/// The attesting application: verifies an attested app's quote against the
/// local policy and, if it passes, provisions a secret to it.
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
    /// Attest the configured app and provision the secret
    Run {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Transport::Socket)]
        transport: Transport,

        /// Secret to provision once the quote is verified
        #[arg(long, default_value = "For your eyes only!")]
        secret: String,

        /// Verify quotes of a software attestation source locally instead of
        /// calling SQVS. The policy must name the software measurement.
        #[arg(long)]
        software_quotes: bool,
    },
}

fn run(config_path: &Path, transport: Transport, secret: &str, software_quotes: bool) -> anyhow::Result<()> {
    let config = Configuration::load(config_path)
        .with_context(|| format!("failed to load configuration {}", config_path.display()))?;
    let policy = QuotePolicy::load(&config.quote_policy).context("failed to load quote policy")?;

    let verifier: Box<dyn QuoteVerifier> = if software_quotes {
        Box::new(SoftwareQuoteVerifier)
    } else {
        let client = ClientBuilder::new()
            .ca_dir(&config.sqvs_ca_dir)
            .timeout(config.io_timeout())
            .build(config.sqvs_url()?)
            .context("failed to set up SQVS client")?;
        Box::new(client)
    };

    let host = config.attestedapp_host.as_str();
    let port = config.attestedapp_port;
    let mut channel: Box<dyn ProverChannel> = match transport {
        Transport::Socket => Box::new(SocketChannel::connect((host, port), config.credentials(), config.io_timeout())?),
        Transport::Https => {
            let cert = fs::read(&config.tls_cert)
                .with_context(|| format!("failed to read prover certificate {}", config.tls_cert.display()))?;
            Box::new(HttpsChannel::new(host, port, &cert, config.bearer_token()?, config.io_timeout())?)
        }
    };

    let mut session = VerifierSession::new()?;
    session.run(&mut channel, &verifier, &policy, secret.as_bytes())
        .context("attestation handshake failed")?;
    info!("secret shared with {}:{}", host, port);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" })).init();

    match cli.command {
        Command::Run { config, transport, secret, software_quotes } => run(&config, transport, &secret, software_quotes),
    }
}
