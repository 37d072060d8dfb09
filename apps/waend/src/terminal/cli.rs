use clap::{Args, Parser};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "waend",
    about = "Command shell for collaborative waend maps",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        value_name = "URL",
        help = "Base URL of the waend REST API (overrides WAEND_API_URL)"
    )]
    pub api_url: Option<String>,

    #[arg(
        long,
        value_name = "URL",
        help = "Notification socket (overrides WAEND_NOTIFY_URL); push updates are off when unset"
    )]
    pub notify_url: Option<String>,

    #[arg(
        long,
        value_name = "TOKEN",
        help = "Bearer token sent with every API request (overrides WAEND_TOKEN)"
    )]
    pub token: Option<String>,

    #[arg(
        long,
        value_name = "PATH",
        help = "Context to open, e.g. /me/<group>/<layer> (defaults to the logged-in user)"
    )]
    pub path: Option<String>,

    #[arg(
        short = 'c',
        long = "command",
        value_name = "LINE",
        help = "Run the given command line(s) and exit instead of starting the prompt"
    )]
    pub commands: Vec<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "WAEND_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "WAEND_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "waend",
            "--api-url",
            "api.example.org/v1",
            "--path",
            "/me/g1",
            "-c",
            "pwd",
            "-c",
            "ll",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.api_url.as_deref(), Some("api.example.org/v1"));
        assert_eq!(cli.token, None);
        assert_eq!(cli.path.as_deref(), Some("/me/g1"));
        assert_eq!(cli.commands, vec!["pwd", "ll"]);
        assert_eq!(cli.logging.to_config().level, LogLevel::Debug);
    }
}
