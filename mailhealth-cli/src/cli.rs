//! Command-line arguments.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use mailhealth_toolbox::{ScanMessage, SmtpCredentials};

/// Environment variable holding the SMTP password. Never accepted as a flag.
pub const PASSWORD_ENV: &str = "MAILHEALTH_SMTP_PASSWORD";

/// Check SPF/DKIM/DMARC, SMTP submission and spam scoring for a sending domain
#[derive(Parser, Debug)]
#[command(name = "mailhealth")]
#[command(about = "Sending-domain health checks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Scanning service base URL (overrides the config file)
    #[arg(long, global = true)]
    pub scanner_url: Option<String>,

    /// Query this nameserver instead of the system resolver
    #[arg(long, global = true)]
    pub nameserver: Option<IpAddr>,

    /// Debug logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Single-line JSON output
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify DNS records and optionally probe SMTP and score a message
    Verify(VerifyArgs),
    /// Generate a DKIM key pair
    DkimKeygen {
        /// DKIM selector the key is for
        selector: String,

        /// Key size in bits (2048, 3072 or 4096)
        #[arg(long)]
        bits: Option<usize>,

        /// Write the private key PEM here instead of printing it
        #[arg(long)]
        private_key_out: Option<PathBuf>,
    },
    /// Send one test message through an SMTP submission account
    Probe {
        #[command(flatten)]
        smtp: SmtpArgs,

        /// Envelope sender
        #[arg(long)]
        from: String,

        /// Envelope recipient
        #[arg(long)]
        to: String,
    },
    /// Score a message with the scanning service
    Scan(ScanArgs),
    /// Classify a raw SMTP error message
    Classify {
        /// Raw error text, e.g. "535 5.7.8 Authentication credentials invalid"
        #[arg(required = true, num_args = 1..)]
        raw: Vec<String>,
    },
    /// Check that the scanning service is up
    ScannerHealth,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Sending domain
    pub domain: String,

    /// DKIM selector
    #[arg(short, long)]
    pub selector: String,

    /// File with the expected DKIM public key (PEM, base64 or a DKIM TXT value)
    #[arg(long)]
    pub expected_key_file: Option<PathBuf>,

    /// SMTP host; enables the live probe
    #[arg(long)]
    pub smtp_host: Option<String>,

    #[arg(long, default_value_t = 587)]
    pub smtp_port: u16,

    /// Implicit TLS (usually port 465) instead of STARTTLS
    #[arg(long)]
    pub smtp_secure: bool,

    #[arg(long)]
    pub smtp_user: Option<String>,

    /// File with the message body to score; enables the spam scan
    #[arg(long)]
    pub scan_body_file: Option<PathBuf>,

    #[arg(long, default_value = "Mail health check")]
    pub scan_subject: String,

    /// Spam threshold, 0.1 to 20.0
    #[arg(long)]
    pub sensitivity: Option<f64>,

    /// Also run the virus scanner
    #[arg(long)]
    pub virus_scan: bool,

    /// Sender for the probe and the scanned message
    #[arg(long)]
    pub from: Option<String>,

    /// Recipient for the probe and the scanned message
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Args, Debug)]
pub struct SmtpArgs {
    /// SMTP submission host
    #[arg(long)]
    pub host: String,

    #[arg(long, default_value_t = 587)]
    pub port: u16,

    /// Implicit TLS (usually port 465) instead of STARTTLS
    #[arg(long)]
    pub secure: bool,

    /// SMTP user name
    #[arg(long)]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    #[arg(long)]
    pub from: String,

    #[arg(long)]
    pub to: String,

    #[arg(long)]
    pub subject: String,

    /// File with the message body
    #[arg(long)]
    pub body_file: PathBuf,

    /// Spam threshold, 0.1 to 20.0
    #[arg(long)]
    pub sensitivity: Option<f64>,

    /// Also run the virus scanner
    #[arg(long)]
    pub virus_scan: bool,
}

/// Build credentials, taking the password from [`PASSWORD_ENV`].
pub fn credentials(host: &str, port: u16, secure: bool, user: &str) -> Result<SmtpCredentials> {
    let pass = std::env::var(PASSWORD_ENV)
        .with_context(|| format!("{PASSWORD_ENV} must be set for SMTP probing"))?;
    Ok(SmtpCredentials {
        host: host.to_string(),
        port,
        secure,
        user: user.to_string(),
        pass,
    })
}

pub fn read_message(from: &str, to: &str, subject: &str, body_file: &Path) -> Result<ScanMessage> {
    let body = std::fs::read_to_string(body_file)
        .with_context(|| format!("failed to read message body from {}", body_file.display()))?;
    Ok(ScanMessage {
        from: from.to_string(),
        to: to.to_string(),
        subject: subject.to_string(),
        body,
    })
}

impl VerifyArgs {
    /// `--from`/`--to`, required once a probe or scan is requested.
    pub fn envelope(&self) -> Result<(&str, &str)> {
        match (self.from.as_deref(), self.to.as_deref()) {
            (Some(from), Some(to)) => Ok((from, to)),
            _ => bail!("--from and --to are required with --smtp-host or --scan-body-file"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_dns_only() {
        let cli = Cli::try_parse_from(["mailhealth", "verify", "example.com", "-s", "foxmiu"]).unwrap();
        let Commands::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(args.domain, "example.com");
        assert_eq!(args.selector, "foxmiu");
        assert!(args.smtp_host.is_none());
        assert!(args.scan_body_file.is_none());
        assert_eq!(args.smtp_port, 587);
        assert!(args.envelope().is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mailhealth",
            "scanner-health",
            "--scanner-url",
            "http://10.0.0.5:8025",
            "--nameserver",
            "1.1.1.1",
            "-v",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::ScannerHealth));
        assert_eq!(cli.scanner_url.as_deref(), Some("http://10.0.0.5:8025"));
        assert_eq!(cli.nameserver, Some("1.1.1.1".parse().unwrap()));
        assert!(cli.verbose);
    }

    #[test]
    fn test_probe_has_no_password_flag() {
        let result = Cli::try_parse_from([
            "mailhealth",
            "probe",
            "--host",
            "smtp.example.com",
            "--user",
            "u@example.com",
            "--password",
            "hunter2",
            "--from",
            "u@example.com",
            "--to",
            "x@example.net",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_classify_joins_words() {
        let cli = Cli::try_parse_from(["mailhealth", "classify", "421", "try", "again", "later"]).unwrap();
        let Commands::Classify { raw } = cli.command else {
            panic!("expected classify");
        };
        assert_eq!(raw.join(" "), "421 try again later");
    }

    #[test]
    fn test_read_message_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.txt");
        std::fs::write(&path, "Hello there").unwrap();
        let message = read_message("a@example.com", "b@example.net", "Hi", &path).unwrap();
        assert_eq!(message.body, "Hello there");
        assert_eq!(message.subject, "Hi");
        assert!(read_message("a@example.com", "b@example.net", "Hi", &dir.path().join("missing")).is_err());
    }
}
