use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;

use local_agency::{
    build_model, init_tracing, AgencyConfig, Console, EventHook, LogFormat, Session, ToolCatalog,
    DEFAULT_CONFIG_PATH,
};

/// Run an agency of cooperating agents in the terminal.
#[derive(Debug, Parser)]
#[command(name = "local-agency", version)]
struct Args {
    /// Agency definition (TOML).
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("warning: could not load .env: {err}");
        }
    }
    init_tracing(args.log_format);

    let session = match startup(&args) {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "startup failed");
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match console(session).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

struct Startup {
    session: Session,
    events: tokio::sync::mpsc::UnboundedReceiver<local_agency::TurnEvent>,
}

fn startup(args: &Args) -> anyhow::Result<Startup> {
    let config = AgencyConfig::from_env_or_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let agency = config
        .build_agency(&ToolCatalog::builtin())
        .context("building the agency")?;
    let model = build_model(&config.model).context("building the model backend")?;

    let (hook, events) = EventHook::channel();
    let session = Session::new(Arc::new(agency), model)
        .with_runtime(&config.runtime)
        .with_hook(Arc::new(hook));
    tracing::info!(
        provider = %config.model.provider,
        agents = session.agency().members().len(),
        "agency started"
    );
    Ok(Startup { session, events })
}

async fn console(startup: Startup) -> anyhow::Result<()> {
    let Startup { session, events } = startup;
    let mut stdout = tokio::io::stdout();
    Console::new(&session, events)
        .run(BufReader::new(tokio::io::stdin()), &mut stdout)
        .await
        .context("console i/o")
}
