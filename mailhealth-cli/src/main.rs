//! `mailhealth` command-line entry point.
//!
//! Results are printed as JSON on stdout; logs go to stderr.
//!
//! Exit codes: 0 success, 1 error, 2 negative verdict (UNHEALTHY domain, probe not
//! sent, message scored as spam), 3 DEGRADED domain.

mod cli;
mod settings;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ScanArgs, VerifyArgs};
use mailhealth_toolbox::{
    DomainHealthRequest, HealthService, OverallStatus, ScanRequest, SmtpProbeRequest, ToolboxConfig,
};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Ok,
    Negative,
    Degraded,
}

impl From<Verdict> for ExitCode {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Ok => Self::SUCCESS,
            Verdict::Negative => Self::from(2_u8),
            Verdict::Degraded => Self::from(3_u8),
        }
    }
}

const fn report_verdict(status: OverallStatus) -> Verdict {
    match status {
        OverallStatus::Healthy => Verdict::Ok,
        OverallStatus::Degraded => Verdict::Degraded,
        OverallStatus::Unhealthy => Verdict::Negative,
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "info,mailhealth_toolbox=debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)))
        .init();
}

fn emit<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(verdict) => verdict.into(),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Verdict> {
    let mut config = settings::load(
        cli.config.as_deref(),
        cli.scanner_url.as_deref(),
        cli.nameserver,
    )?;
    let compact = cli.compact;

    match cli.command {
        Commands::Verify(args) => cmd_verify(config, &args, compact).await,
        Commands::DkimKeygen {
            selector,
            bits,
            private_key_out,
        } => {
            if let Some(bits) = bits {
                config.dkim.key_bits = bits;
            }
            cmd_dkim_keygen(config, &selector, private_key_out.as_deref(), compact).await
        }
        Commands::Probe { smtp, from, to } => {
            let credentials = cli::credentials(&smtp.host, smtp.port, smtp.secure, &smtp.user)?;
            let service = HealthService::new(config)?;
            let result = service.send_test_email(&credentials, &from, &to).await?;
            emit(&result, compact)?;
            Ok(if result.is_sent() {
                Verdict::Ok
            } else {
                Verdict::Negative
            })
        }
        Commands::Scan(args) => cmd_scan(config, &args, compact).await,
        Commands::Classify { raw } => {
            emit(&HealthService::diagnose_smtp_error(&raw.join(" ")), compact)?;
            Ok(Verdict::Ok)
        }
        Commands::ScannerHealth => {
            let service = HealthService::new(config)?;
            emit(&service.scanner_health().await?, compact)?;
            Ok(Verdict::Ok)
        }
    }
}

async fn cmd_verify(config: ToolboxConfig, args: &VerifyArgs, compact: bool) -> Result<Verdict> {
    let default_sensitivity = config.scanner.default_sensitivity;
    let mut request = DomainHealthRequest::new(args.domain.clone(), args.selector.clone());

    if let Some(path) = &args.expected_key_file {
        let key = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read expected key from {}", path.display()))?;
        request = request.with_expected_dkim_key(key);
    }

    if let Some(host) = &args.smtp_host {
        let (from, to) = args.envelope()?;
        let user = args
            .smtp_user
            .as_deref()
            .context("--smtp-user is required with --smtp-host")?;
        request = request.with_smtp_probe(SmtpProbeRequest {
            credentials: cli::credentials(host, args.smtp_port, args.smtp_secure, user)?,
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    if let Some(body_file) = &args.scan_body_file {
        let (from, to) = args.envelope()?;
        let mut scan = ScanRequest::new(cli::read_message(from, to, &args.scan_subject, body_file)?);
        scan.sensitivity = args.sensitivity.unwrap_or(default_sensitivity);
        scan.with_virus_scan = args.virus_scan;
        request = request.with_spam_scan(scan);
    }

    let service = HealthService::new(config)?;
    let report = service.verify_domain_health(&request).await?;
    emit(&report, compact)?;
    Ok(report_verdict(report.overall_status))
}

async fn cmd_dkim_keygen(
    config: ToolboxConfig,
    selector: &str,
    private_key_out: Option<&Path>,
    compact: bool,
) -> Result<Verdict> {
    let service = HealthService::new(config)?;
    let pair = service.generate_dkim_key_pair(selector).await?;

    let mut output = serde_json::to_value(&pair)?;
    output["txtChunks"] = serde_json::json!(pair.txt_chunks());
    if let Some(path) = private_key_out {
        write_private_key(path, &pair.private_key_pem)?;
        tracing::info!("Private key written to {}", path.display());
        if let Some(fields) = output.as_object_mut() {
            fields.remove("privateKeyPem");
            fields.insert(
                "privateKeyPath".to_string(),
                serde_json::Value::String(path.display().to_string()),
            );
        }
    }
    emit(&output, compact)?;
    Ok(Verdict::Ok)
}

/// Create the key file readable by the owner only; refuses to overwrite.
fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(pem.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

async fn cmd_scan(config: ToolboxConfig, args: &ScanArgs, compact: bool) -> Result<Verdict> {
    let message = cli::read_message(&args.from, &args.to, &args.subject, &args.body_file)?;
    let service = HealthService::new(config)?;
    let result = service
        .scan_message(&message, args.sensitivity, args.virus_scan)
        .await?;
    emit(&result, compact)?;
    Ok(if result.is_spam {
        Verdict::Negative
    } else {
        Verdict::Ok
    })
}
