use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use std::path::PathBuf;

/// Bounds on the graceful shutdown deadline, in seconds.
pub const SHUTDOWN_TIMEOUT_RANGE: core::ops::RangeInclusive<u64> = 5..=30;

/// Output style of the console log layer.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, human readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Runtime configuration for the `key-server` binary.
///
/// All values are parsed from CLI arguments or environment variables, with
/// defaults matching the container image layout (certificates mounted under
/// `/etc/key-server/tls`).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "key-server",
    version,
    about = "An HTTPS service that issues URL-safe base64 random keys"
)]
pub struct CliArgs {
    /// Port to listen on.
    ///
    /// Environment variable: `PORT`
    #[arg(long, env = "PORT", default_value_t = String::from("8443"))]
    pub port: String,

    /// Host or IP address to bind to.
    ///
    /// Environment variable: `BIND_HOST`
    #[arg(long, env = "BIND_HOST", default_value_t = String::from("0.0.0.0"))]
    pub bind_host: String,

    /// Maximum key length, in raw bytes, a client may request.
    ///
    /// Also drives the bucket widths of the duration and key length
    /// histograms, so keep it modest.
    ///
    /// Environment variable: `MAX_KEY_SIZE`
    #[arg(long, env = "MAX_KEY_SIZE", default_value_t = 1024)]
    pub max_key_size: i64,

    /// PEM encoded certificate chain presented to clients.
    ///
    /// Set both this and `TLS_KEY_FILE` to an empty string to serve plain
    /// HTTP instead.
    ///
    /// Environment variable: `TLS_CERT_FILE`
    #[arg(
        long,
        env = "TLS_CERT_FILE",
        default_value = "/etc/key-server/tls/server.crt"
    )]
    pub tls_cert_file: String,

    /// PEM encoded private key matching `TLS_CERT_FILE`.
    ///
    /// Environment variable: `TLS_KEY_FILE`
    #[arg(
        long,
        env = "TLS_KEY_FILE",
        default_value = "/etc/key-server/tls/server.key"
    )]
    pub tls_key_file: String,

    /// Deadline for the TLS handshake and for reading request headers.
    ///
    /// Environment variable: `READ_TIMEOUT_SECS`
    #[arg(long, env = "READ_TIMEOUT_SECS", default_value_t = 10)]
    pub read_timeout_secs: u64,

    /// Deadline for producing a response once the request has been read.
    ///
    /// Environment variable: `WRITE_TIMEOUT_SECS`
    #[arg(long, env = "WRITE_TIMEOUT_SECS", default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// How long a keep-alive connection may sit without a request in flight.
    ///
    /// Environment variable: `IDLE_TIMEOUT_SECS`
    #[arg(long, env = "IDLE_TIMEOUT_SECS", default_value_t = 60)]
    pub idle_timeout_secs: u64,

    /// Time allowed for in-flight connections to finish after SIGINT/SIGTERM.
    ///
    /// Must be between 5 and 30 seconds. Connections still open afterwards
    /// are force-closed and the process exits non-zero.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Location of the certificate chain and its private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Validated, immutable server configuration.
///
/// Built once at startup and shared read-only behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: String,
    pub bind_host: String,
    pub max_size: usize,
    /// `None` when both certificate paths were left empty.
    pub tls: Option<TlsFiles>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Address handed to the TCP listener, `<bind_host>:<port>`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.port.parse::<u16>().is_err() {
            bail!("PORT must be a valid TCP port, got {:?}", args.port);
        }

        if args.max_key_size <= 0 {
            bail!("MAX_KEY_SIZE must be a positive integer");
        }
        let max_size = usize::try_from(args.max_key_size)?;

        let tls = match (args.tls_cert_file.is_empty(), args.tls_key_file.is_empty()) {
            (false, false) => Some(TlsFiles {
                cert_path: PathBuf::from(args.tls_cert_file),
                key_path: PathBuf::from(args.tls_key_file),
            }),
            (true, true) => None,
            _ => bail!("TLS_CERT_FILE and TLS_KEY_FILE must both be set or both be empty"),
        };

        for (name, secs) in [
            ("READ_TIMEOUT_SECS", args.read_timeout_secs),
            ("WRITE_TIMEOUT_SECS", args.write_timeout_secs),
            ("IDLE_TIMEOUT_SECS", args.idle_timeout_secs),
        ] {
            if secs == 0 {
                bail!("{name} must be greater than 0");
            }
        }

        if !SHUTDOWN_TIMEOUT_RANGE.contains(&args.shutdown_timeout_secs) {
            bail!(
                "SHUTDOWN_TIMEOUT_SECS ({}) must be between {} and {}",
                args.shutdown_timeout_secs,
                SHUTDOWN_TIMEOUT_RANGE.start(),
                SHUTDOWN_TIMEOUT_RANGE.end()
            );
        }

        Ok(Self {
            port: args.port,
            bind_host: args.bind_host,
            max_size,
            tls,
            read_timeout: Duration::from_secs(args.read_timeout_secs),
            write_timeout: Duration::from_secs(args.write_timeout_secs),
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> anyhow::Result<ServerConfig> {
        let mut argv = vec!["key-server"];
        argv.extend_from_slice(extra);
        ServerConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.port, "8443");
        assert_eq!(config.max_size, 1024);
        assert_eq!(
            config.tls,
            Some(TlsFiles {
                cert_path: PathBuf::from("/etc/key-server/tls/server.crt"),
                key_path: PathBuf::from("/etc/key-server/tls/server.key"),
            })
        );
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.listen_addr(), "0.0.0.0:8443");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn overrides() {
        let config = parse(&[
            "--port",
            "9443",
            "--max-key-size",
            "64",
            "--tls-cert-file",
            "/tmp/a.crt",
            "--tls-key-file",
            "/tmp/a.key",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:9443");
        assert_eq!(config.max_size, 64);
        assert_eq!(
            config.tls.map(|tls| tls.cert_path),
            Some(PathBuf::from("/tmp/a.crt"))
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_non_positive_max_key_size() {
        for arg in ["--max-key-size=0", "--max-key-size=-5"] {
            let err = parse(&[arg]).unwrap_err();
            assert!(err.to_string().contains("MAX_KEY_SIZE must be a positive integer"));
        }
    }

    #[test]
    fn rejects_non_integer_max_key_size() {
        assert!(parse(&["--max-key-size", "abc"]).is_err());
    }

    #[test]
    fn rejects_invalid_port() {
        assert!(parse(&["--port", "http"]).is_err());
        assert!(parse(&["--port", "70000"]).is_err());
    }

    #[test]
    fn empty_certificate_paths_disable_tls() {
        let config = parse(&["--tls-cert-file=", "--tls-key-file="]).unwrap();
        assert_eq!(config.tls, None);
    }

    #[test]
    fn half_configured_tls_is_rejected() {
        let halves = [
            ["--tls-cert-file=", "--tls-key-file=/tmp/a.key"],
            ["--tls-cert-file=/tmp/a.crt", "--tls-key-file="],
        ];
        for args in halves {
            let err = parse(&args).unwrap_err();
            assert!(err.to_string().contains("both be set or both be empty"));
        }
    }

    #[test]
    fn rejects_zero_timeouts() {
        let err = parse(&["--idle-timeout-secs", "0"]).unwrap_err();
        assert!(err.to_string().contains("IDLE_TIMEOUT_SECS"));
    }

    #[test]
    fn shutdown_timeout_is_bounded() {
        assert!(parse(&["--shutdown-timeout-secs", "4"]).is_err());
        assert!(parse(&["--shutdown-timeout-secs", "31"]).is_err());
        assert_eq!(
            parse(&["--shutdown-timeout-secs", "30"])
                .unwrap()
                .shutdown_timeout,
            Duration::from_secs(30)
        );
    }
}
