use crate::library::helpers::parse_seconds;
use crate::module::options::BrokerOptions;
use std::time::Duration;
use structopt::StructOpt;

/// Options for the worker module
#[derive(Debug, Clone, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    /// Interval in seconds at which archived events are replayed
    #[structopt(long, env, default_value = "30", parse(try_from_str = parse_seconds))]
    pub sweep_interval: Duration,
}
