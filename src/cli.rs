//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Values left unset fall back to `.loglens.toml`.

use clap::Parser;
use std::path::PathBuf;

/// LogLens - natural-language log analysis over MCP tool providers
///
/// Launches the tool servers listed in the provider file, hands their
/// tools to a local Ollama model and answers questions about your logs.
///
/// Examples:
///   loglens
///   loglens --servers ./mcp.json --model qwen2.5:14b
///   loglens --query "show error counts for the last 24 hours"
///   loglens --health
///   loglens --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Provider file listing the MCP tool servers
    ///
    /// Defaults to the `servers` entry of .loglens.toml, then mcp.json.
    #[arg(short, long, value_name = "FILE", env = "LOGLENS_SERVERS")]
    pub servers: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .loglens.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Ollama model to use for analysis
    ///
    /// The model must support tool calling.
    #[arg(short, long, env = "LOGLENS_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, value_name = "URL", env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Model request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Answer a single query and exit instead of starting the interactive loop
    #[arg(long, value_name = "TEXT", conflicts_with = "health")]
    pub query: Option<String>,

    /// Probe every configured provider and exit
    #[arg(long)]
    pub health: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .loglens.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref model) = self.model {
            if model.trim().is_empty() {
                return Err("Model name must not be empty".to_string());
            }
        }

        if let Some(ref query) = self.query {
            if query.trim().is_empty() {
                return Err("Query must not be empty".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn make_args() -> Args {
        Args {
            servers: None,
            config: None,
            model: None,
            ollama_url: None,
            timeout: None,
            query: None,
            health: false,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_default_args_are_valid() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut args = make_args();
        args.ollama_url = Some("localhost:11434".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_empty_query() {
        let mut args = make_args();
        args.query = Some("   ".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());

        // --init-config short-circuits validation
        args.init_config = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut args = make_args();
        args.timeout = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "loglens",
            "--servers",
            "custom.json",
            "--query",
            "show errors",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.servers, Some(PathBuf::from("custom.json")));
        assert_eq!(args.query.as_deref(), Some("show errors"));
        assert!(args.verbose);

        assert!(Args::try_parse_from(["loglens", "--health", "--query", "x"]).is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
