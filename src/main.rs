use std::path::PathBuf;

use anyhow::Context;
use chunk_batch::{
    core::{job::JobParameters, repository::InMemoryJobRepository},
    item::rdbc::connect,
    jobs::{self, BatchSettings, pay},
};
use clap::{Parser, Subcommand};
use log::info;

#[derive(Parser)]
#[command(
    name = "pay-batch",
    version,
    about = "Chunk-oriented batch jobs over the pay table"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL (sqlite://… or postgres://…)
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://pay.db?mode=rwc",
        global = true
    )]
    database_url: String,

    /// JSON file with job settings
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the pay table and fill it with sample pays
    Init {
        /// Number of sample pays
        #[arg(long, default_value_t = 10)]
        count: i64,
    },
    /// Run one of the jobs
    ///
    /// Executions are recorded in memory for this invocation only: restart checks and
    /// restarts from a checkpoint never span two `pay-batch run` calls.
    Run {
        /// processorNullBatch, jdbcCursorItemReaderJob or jdbcPagingItemReaderJob
        job: String,
        /// Overrides the chunk size of the job
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Identifying job parameter, repeatable
        #[arg(long = "param", value_parser = parse_parameter)]
        parameters: Vec<(String, String)>,
    },
}

fn parse_parameter(value: &str) -> Result<(String, String), String> {
    let (key, value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {}", value))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let mut settings = match &cli.settings {
        Some(path) => BatchSettings::from_json_file(path)?,
        None => BatchSettings::default(),
    };

    let pool = connect(&cli.database_url, settings.max_connections)
        .await
        .with_context(|| format!("cannot connect to {}", cli.database_url))?;

    match cli.command {
        Commands::Init { count } => {
            pay::create_schema(&pool).await?;
            sqlx::query("DELETE FROM pay").execute(&pool).await?;
            pay::insert_pays(&pool, &pay::sample_pays(count)).await?;
        }
        Commands::Run {
            job,
            chunk_size,
            parameters,
        } => {
            if let Some(chunk_size) = chunk_size {
                settings.set_chunk_size(&job, chunk_size)?;
            }
            let parameters = parameters
                .into_iter()
                .fold(JobParameters::new(), |parameters, (key, value)| {
                    parameters.add(&key, value)
                });
            let repository = InMemoryJobRepository::new();

            let execution = jobs::run_job(&job, &pool, &settings, &parameters, &repository)?;

            for step in &execution.step_executions {
                info!(
                    "Step {}: {:?}, read {}, filtered {}, written {}, commits {}",
                    step.name,
                    step.status,
                    step.read_count,
                    step.filter_count,
                    step.write_count,
                    step.commit_count
                );
            }
            info!(
                "Job {} finished with status {:?} in {:?}",
                execution.job_name, execution.status, execution.duration
            );
        }
    }

    pool.close().await;
    Ok(())
}
