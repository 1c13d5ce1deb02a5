use crate::module::options::BrokerOptions;
use structopt::StructOpt;

/// Options for the api module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    /// Port on which the HTTP server will listen
    #[structopt(short, long, env, default_value = "8080")]
    pub port: u16,
}
