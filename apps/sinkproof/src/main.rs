use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use sinkproof_cancel::CancelSignal;
use sinkproof_config::{ConfigFormat, SinkproofConfig, render_config};
use sinkproof_identity::{IdentityOutcome, OidcDiscoveryKeySource, StaticKeySource, Verifier};
use sinkproof_logging::{LogFormat, LogLevel};
use sinkproof_ports::KeySource;
use sinkproof_receiver::{CloudEventSender, OutboundEvent, server, tls};
use sinkproof_schema::resource::{ReceiverEndpoint, ReceiverOptions};
use sinkproof_store::EventStore;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sinkproof")]
#[command(about = "Capture, send and verify CloudEvents with TLS and OIDC identity.", long_about = None)]
struct Cli {
    /// Config file (YAML, or JSON by extension).
    #[arg(long, global = true, env = "SINKPROOF_CONFIG")]
    config: Option<PathBuf>,
    /// Overrides the configured log level.
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Overrides the configured log format.
    #[arg(long, global = true)]
    log_format: Option<LogFormatArg>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Plain,
    Json,
    Compact,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Plain => LogFormat::Plain,
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Compact => LogFormat::Compact,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a receiver and print every captured request as a JSON line.
    ///
    /// The first line is the receiver's endpoint.
    Receive {
        /// Receiver name recorded on captured events.
        #[arg(long, default_value = "sink")]
        name: String,
        #[arg(long, default_value = "127.0.0.1:0")]
        bind: SocketAddr,
        /// Serve HTTPS with a freshly issued CA.
        #[arg(long)]
        tls: bool,
        /// Names the certificate is valid for (repeatable).
        #[arg(long = "host")]
        hosts: Vec<String>,
        /// Reject requests without a bearer token; recorded for verification.
        #[arg(long)]
        audience: Option<String>,
        /// Write the CA bundle here when serving TLS.
        #[arg(long)]
        ca_out: Option<PathBuf>,
        /// Exit after this many captured requests.
        #[arg(long)]
        count: Option<usize>,
        /// Exit after this many milliseconds.
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Send one CloudEvent in binary mode.
    Send {
        /// Sink URI.
        #[arg(long)]
        to: String,
        /// CA bundle to trust for https sinks.
        #[arg(long)]
        ca_file: Option<PathBuf>,
        #[arg(long = "type", default_value = "dev.sinkproof.manual")]
        event_type: String,
        #[arg(long, default_value = "/sinkproof/cli")]
        source: String,
        #[arg(long, default_value = "1")]
        id: String,
        /// JSON body.
        #[arg(long, default_value = "{}")]
        data: String,
        /// Bearer token (or set SINKPROOF_TOKEN).
        #[arg(long, env = "SINKPROOF_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Verify an identity token against the configured issuer.
    VerifyToken {
        /// The token, or `-` to read it from stdin.
        #[arg(long)]
        token: String,
        #[arg(long)]
        audience: String,
        /// Expected subject; not checked when omitted.
        #[arg(long)]
        subject: Option<String>,
        /// Overrides the configured issuer.
        #[arg(long)]
        issuer: Option<String>,
        /// Verify against a JWKS file instead of the issuer's discovery endpoint.
        #[arg(long)]
        jwks_file: Option<PathBuf>,
        /// CA bundle to trust when fetching discovery documents.
        #[arg(long)]
        ca_file: Option<PathBuf>,
    },

    /// Print the effective configuration.
    Config {
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = sinkproof_config::load_effective(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }

    if let Command::Config { format } = cli.cmd {
        let format = match format {
            OutputFormat::Yaml => ConfigFormat::Yaml,
            OutputFormat::Json => ConfigFormat::Json,
        };
        print!("{}", render_config(&config, format)?);
        return Ok(ExitCode::SUCCESS);
    }

    sinkproof_logging::init(&config.logging)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(run(cli.cmd, config))
}

async fn run(cmd: Command, config: SinkproofConfig) -> Result<ExitCode> {
    match cmd {
        Command::Receive {
            name,
            bind,
            tls,
            hosts,
            audience,
            ca_out,
            count,
            duration_ms,
        } => {
            let options = ReceiverOptions { audience, tls };
            receive(&name, bind, &options, &hosts, ca_out.as_deref(), count, duration_ms).await
        }
        Command::Send {
            to,
            ca_file,
            event_type,
            source,
            id,
            data,
            token,
        } => {
            let ca = ca_file.as_deref().map(read_file).transpose()?;
            let sender = CloudEventSender::new(&to, ca.as_deref())?;
            let data: serde_json::Value =
                serde_json::from_str(&data).context("--data is not valid JSON")?;
            let mut event = OutboundEvent::new(&event_type, &id, &source).with_json(&data);
            if let Some(token) = token {
                event = event.with_bearer_token(token);
            }
            let status = sender.send(&event).await?;
            println!("{status}");
            Ok(if (200..300).contains(&status) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::VerifyToken {
            token,
            audience,
            subject,
            issuer,
            jwks_file,
            ca_file,
        } => {
            let mut identity = config.identity;
            if let Some(issuer) = issuer {
                identity.issuer = issuer;
            }
            let keys: Arc<dyn KeySource> = match (jwks_file, ca_file) {
                (Some(path), _) => {
                    let jwks = serde_json::from_str(&read_file(&path)?)
                        .with_context(|| format!("parse JWKS {}", path.display()))?;
                    Arc::new(StaticKeySource::new(jwks))
                }
                (None, Some(ca)) => Arc::new(OidcDiscoveryKeySource::with_ca_pem(
                    &identity.issuer,
                    read_file(&ca)?.as_bytes(),
                )?),
                (None, None) => Arc::new(OidcDiscoveryKeySource::new(&identity.issuer)?),
            };
            let token = if token == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("read token from stdin")?;
                buf.trim().to_string()
            } else {
                token
            };

            let verifier = Verifier::new(identity, keys);
            let outcome = verifier
                .verify_with_subject(&token, &audience, subject.as_deref())
                .await;
            let report = match &outcome {
                IdentityOutcome::Valid(claims) => serde_json::json!({
                    "outcome": outcome.label(),
                    "claims": claims,
                }),
                IdentityOutcome::Invalid(failure) => serde_json::json!({
                    "outcome": outcome.label(),
                    "error": failure.to_string(),
                }),
            };
            println!("{report}");
            Ok(if outcome.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Config { .. } => Ok(ExitCode::SUCCESS),
    }
}

async fn receive(
    name: &str,
    bind: SocketAddr,
    options: &ReceiverOptions,
    hosts: &[String],
    ca_out: Option<&Path>,
    count: Option<usize>,
    duration_ms: Option<u64>,
) -> Result<ExitCode> {
    let material = if options.tls {
        let hosts: Vec<&str> = if hosts.is_empty() {
            tls::DEFAULT_HOSTS.to_vec()
        } else {
            hosts.iter().map(String::as_str).collect()
        };
        Some(tls::issue(&hosts)?)
    } else {
        None
    };
    let server_config = material.as_ref().map(tls::server_config).transpose()?;

    let store = EventStore::new();
    store.register(name, options.clone());
    let app = server::router(name, store.clone(), options.audience.as_deref());
    let running = server::start_on(bind, app, server_config).await?;

    let endpoint = ReceiverEndpoint {
        name: name.to_string(),
        uri: running.uri(),
        ca_certs: material.map(|m| m.ca_pem),
        audience: options.audience.clone(),
    };
    if let (Some(path), Some(pem)) = (ca_out, &endpoint.ca_certs) {
        std::fs::write(path, pem).with_context(|| format!("write CA bundle {}", path.display()))?;
    }
    println!("{}", serde_json::to_string(&endpoint)?);
    tracing::info!(receiver = name, uri = %endpoint.uri, "receiving");

    let cancel = match duration_ms {
        Some(ms) => CancelSignal::new().with_deadline(Duration::from_millis(ms)),
        None => CancelSignal::new(),
    };
    let enough = |printed: usize| count.is_some_and(|n| printed >= n);
    let mut printed = 0;
    'outer: while !enough(printed) {
        let appended = store.appended();
        tokio::pin!(appended);
        appended.as_mut().enable();

        for event in store.snapshot_from(name, printed) {
            println!("{}", serde_json::to_string(&event)?);
            printed += 1;
            if enough(printed) {
                break 'outer;
            }
        }

        tokio::select! {
            _ = &mut appended => {}
            reason = cancel.cancelled() => {
                tracing::debug!(%reason, "receive window closed");
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("listen for ctrl-c")?;
                break;
            }
        }
    }

    running.stop().await;
    tracing::info!(receiver = name, captured = printed, "receiver stopped");
    Ok(ExitCode::SUCCESS)
}

fn read_file(path: &Path) -> Result<String> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents.trim().is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(contents)
}
