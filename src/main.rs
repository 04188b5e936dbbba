use fn_agent::cli::{Args, ExecutionMode, RunConfig};
use fn_agent::container::{ContainerClient, ContainerClientConfig};
use fn_agent::driver::{self, DockerDriver, DriverConfig, TaskSpec};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        "fn_agent=debug"
    } else {
        "fn_agent=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match mode {
        ExecutionMode::Run(config) => run_task(config).await,
        ExecutionMode::Spec(config) => show_spec(config),
    }
}

fn load_inputs(config: &RunConfig) -> Result<(DriverConfig, TaskSpec), Box<dyn std::error::Error>> {
    let driver_config = match &config.config_override {
        Some(path) => {
            info!("Loading driver configuration from: {:?}", path);
            DriverConfig::from_toml_file(path)?
        }
        None => DriverConfig::default(),
    };

    info!("Loading task from: {:?}", config.task);
    let task = TaskSpec::from_toml_file(&config.task)?;
    Ok((driver_config, task))
}

fn show_spec(config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (driver_config, task) = load_inputs(&config)?;
    let spec = driver::preview_spec(&driver_config, &task)?;
    println!("{}", spec.to_json_pretty()?);
    Ok(())
}

async fn run_task(config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (driver_config, task) = load_inputs(&config)?;

    let client = ContainerClient::with_config(ContainerClientConfig {
        docker_host: driver_config.docker_host.clone(),
        ..Default::default()
    })
    .await?;

    let driver = Arc::new(DockerDriver::new(driver_config, Arc::new(client))?);
    let mut cookie = driver.create_cookie(Arc::new(task))?;
    info!("Running task {}", cookie.task_id());

    let outcome = match cookie.prepare().await {
        Ok(()) => cookie.run().await,
        Err(e) => Err(e),
    };

    if let Err(e) = cookie.close().await {
        error!("Failed to clean up task container: {}", e);
    }

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            error!("Task failed with status {}: {}", e.status_code(), e);
            Err(e.into())
        }
    }
}
