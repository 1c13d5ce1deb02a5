use std::str::FromStr;
use structopt::StructOpt;
use thiserror::Error;

#[derive(Debug, StructOpt)]
#[structopt(
    about = "Event broker delivering published events to registered webhooks.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info,hyper=warn,warp=warn,reqwest=warn,mongodb=warn",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Output format of log messages
    ///
    /// Formats: text, compact, json
    #[structopt(long, global = true, env, default_value = "text", value_name = "format")]
    pub log_format: LogFormat,

    /// Enable status reporting server which can be used as a readiness probe
    #[structopt(long, global = true, env, value_name = "port")]
    pub status_server: Option<u16>,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// HTTP interface for registering and publishing events
    Api(courier::module::api::Options),
    /// Consumers dispatching and delivering events, archive sweep
    Worker(courier::module::worker::Options),
    /// Api and worker within one process
    Standalone(courier::module::standalone::Options),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

#[derive(Debug, Error)]
#[error("unknown log format '{0}', expected one of text, compact, json")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(UnknownLogFormat(other.to_owned())),
        }
    }
}
