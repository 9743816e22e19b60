//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};

/// Run single HTTP requests through a netsession task.
///
/// Every command creates one task, resumes it and waits for its result.
/// Ctrl-C cancels the task.
#[derive(Parser, Debug)]
#[command(name = "netsession")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/netsession/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Idle request timeout in seconds (1-3600)
    #[arg(short = 't', long, global = true, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", global = true, value_parser = parse_header)]
    pub headers: Vec<(HeaderName, HeaderValue)>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a URL into memory and print the body
    Get {
        url: String,
        /// Write the body to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Send a body and print the response body
    Upload {
        url: String,
        /// File whose contents are sent
        #[arg(short, long, conflicts_with = "data", required_unless_present = "data")]
        file: Option<PathBuf>,
        /// Literal body to send
        #[arg(short, long)]
        data: Option<String>,
        /// HTTP method
        #[arg(short = 'X', long, default_value = "POST", value_parser = parse_method)]
        method: Method,
    },
    /// Download a URL to a file, with a progress bar
    Download {
        url: String,
        /// Destination path (default: last URL path segment in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|e| format!("invalid header name `{}`: {e}", name.trim()))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|e| format!("invalid header value for `{name}`: {e}"))?;
    Ok((name, value))
}

fn parse_method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|e| format!("invalid method `{raw}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_get_parses_url() {
        let args = Args::try_parse_from(["netsession", "get", "https://example.com/a"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        match args.command {
            Command::Get { url, output } => {
                assert_eq!(url, "https://example.com/a");
                assert!(output.is_none());
            }
            other => panic!("Expected Get, got: {other:?}"),
        }
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["netsession", "-vv", "get", "https://e.com"]).unwrap();
        assert_eq!(args.verbose, 2);

        let args = Args::try_parse_from(["netsession", "get", "https://e.com", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["netsession", "-q", "get", "https://e.com"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_headers_are_repeatable() {
        let args = Args::try_parse_from([
            "netsession",
            "-H",
            "Accept: text/plain",
            "--header",
            "X-Trace:abc",
            "get",
            "https://e.com",
        ])
        .unwrap();
        assert_eq!(args.headers.len(), 2);
        assert_eq!(args.headers[0].0, "accept");
        assert_eq!(args.headers[0].1, "text/plain");
        assert_eq!(args.headers[1].0, "x-trace");
        assert_eq!(args.headers[1].1, "abc");
    }

    #[test]
    fn test_cli_header_without_colon_rejected() {
        let result = Args::try_parse_from(["netsession", "-H", "nocolon", "get", "https://e.com"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_timeout_range() {
        let args = Args::try_parse_from(["netsession", "-t", "30", "get", "https://e.com"]).unwrap();
        assert_eq!(args.timeout, Some(30));

        let err = Args::try_parse_from(["netsession", "-t", "0", "get", "https://e.com"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_upload_defaults_to_post() {
        let args =
            Args::try_parse_from(["netsession", "upload", "https://e.com", "--data", "x=1"]).unwrap();
        match args.command {
            Command::Upload { data, method, .. } => {
                assert_eq!(data.as_deref(), Some("x=1"));
                assert_eq!(method, Method::POST);
            }
            other => panic!("Expected Upload, got: {other:?}"),
        }
    }

    #[test]
    fn test_cli_upload_method_is_case_insensitive() {
        let args = Args::try_parse_from([
            "netsession", "upload", "https://e.com", "-d", "x", "-X", "put",
        ])
        .unwrap();
        match args.command {
            Command::Upload { method, .. } => assert_eq!(method, Method::PUT),
            other => panic!("Expected Upload, got: {other:?}"),
        }
    }

    #[test]
    fn test_cli_upload_requires_body_source() {
        let err = Args::try_parse_from(["netsession", "upload", "https://e.com"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_upload_file_and_data_conflict() {
        let err = Args::try_parse_from([
            "netsession", "upload", "https://e.com", "-f", "body.bin", "-d", "x",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_download_output() {
        let args = Args::try_parse_from([
            "netsession", "download", "https://e.com/f.bin", "-o", "out.bin",
        ])
        .unwrap();
        match args.command {
            Command::Download { output, .. } => assert_eq!(output, Some(PathBuf::from("out.bin"))),
            other => panic!("Expected Download, got: {other:?}"),
        }
    }

    #[test]
    fn test_cli_missing_subcommand_returns_error() {
        let result = Args::try_parse_from(["netsession"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["netsession", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
