use anyhow::{bail, Result};
use courier::harness::ModuleRunner;
use courier::module::api::Api;
use courier::module::standalone::Standalone;
use courier::module::worker::Worker;
use options::{Command, LogFormat};
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let (command, runner) = init()?;

    let termination_reason = match command {
        Command::Api(options) => runner.run(Api::new(options)).await,
        Command::Worker(options) => runner.run(Worker::new(options)).await,
        Command::Standalone(options) => runner.run(Standalone::new(options)).await,
    };

    if termination_reason.is_failure() {
        bail!("module terminated: {}", termination_reason);
    }

    Ok(())
}

fn init() -> Result<(Command, ModuleRunner)> {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(EnvFilter::try_new(&options.log)?);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    let runner = ModuleRunner::new(options.status_server);

    info!("Courier {}", env!("CARGO_PKG_VERSION"));

    Ok((options.command, runner))
}
