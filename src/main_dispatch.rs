use crate::main_runtime::{
    init_logging, init_logging_simple, load_config, open_postgres, open_store,
};
use ploy_scheduler::catalog::Catalog;
use ploy_scheduler::cli::commands;
use ploy_scheduler::cli::{Cli, Commands, OutputMode};
use ploy_scheduler::entrypoint::{Entrypoint, ExitStatus};
use ploy_scheduler::error::{Result, SchedulerError};
use tracing::error;

pub(crate) async fn run(cli: &Cli) -> Result<ExitStatus> {
    match &cli.command {
        None | Some(Commands::Run) => run_component(cli).await,
        Some(Commands::Enable {
            component_id,
            by,
            note,
        }) => {
            toggle(cli, component_id, true, by.as_deref(), note.as_deref()).await?;
            Ok(ExitStatus::Normal)
        }
        Some(Commands::Disable {
            component_id,
            by,
            note,
        }) => {
            toggle(cli, component_id, false, by.as_deref(), note.as_deref()).await?;
            Ok(ExitStatus::Normal)
        }
        Some(Commands::Status { json }) => {
            init_logging_simple();
            let config = load_config(&cli.config, cli.in_memory)?;
            let store = open_store(&config, cli.in_memory).await?;
            commands::show_status(
                store,
                cli.component.as_deref(),
                config.scheduler.stale_after(),
                OutputMode::from_json_flag(*json),
            )
            .await?;
            Ok(ExitStatus::Normal)
        }
        Some(Commands::Errors {
            component_id,
            limit,
            json,
        }) => {
            init_logging_simple();
            let config = load_config(&cli.config, cli.in_memory)?;
            let store = open_store(&config, cli.in_memory).await?;
            commands::show_errors(store, component_id, *limit, OutputMode::from_json_flag(*json))
                .await?;
            Ok(ExitStatus::Normal)
        }
        Some(Commands::List { json }) => {
            init_logging_simple();
            let config = load_config(&cli.config, cli.in_memory)?;
            let store = open_store(&config, cli.in_memory).await?;
            let catalog = Catalog::builtin(store.clone(), &config)?;
            commands::list_components(store, &catalog, OutputMode::from_json_flag(*json)).await?;
            Ok(ExitStatus::Normal)
        }
        Some(Commands::Migrate) => {
            init_logging_simple();
            if cli.in_memory {
                return Err(SchedulerError::Validation(
                    "migrate needs PostgreSQL; drop --in-memory".to_string(),
                ));
            }
            let config = load_config(&cli.config, false)?;
            open_postgres(&config).await?.migrate().await?;
            println!("Migrations applied");
            Ok(ExitStatus::Normal)
        }
    }
}

async fn run_component(cli: &Cli) -> Result<ExitStatus> {
    let config = load_config(&cli.config, cli.in_memory)?;
    init_logging(&config.logging);

    let store = match open_store(&config, cli.in_memory).await {
        Ok(store) => store,
        Err(e) => {
            error!("Coordination store unavailable: {}", e);
            return Ok(ExitStatus::StoreUnavailable);
        }
    };
    let catalog = Catalog::builtin(store.clone(), &config)?;

    Entrypoint::new(store, catalog, config.scheduler.timings())
        .run(cli.component.as_deref())
        .await
}

async fn toggle(
    cli: &Cli,
    component_id: &str,
    enabled: bool,
    by: Option<&str>,
    note: Option<&str>,
) -> Result<()> {
    init_logging_simple();
    let config = load_config(&cli.config, cli.in_memory)?;
    let store = open_store(&config, cli.in_memory).await?;
    let catalog = Catalog::builtin(store.clone(), &config)?;
    commands::set_enabled(store, &catalog, component_id, enabled, by, note).await
}
