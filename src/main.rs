//! CLI entry point for the Austin IOC
//!
//! Start against the robot:
//! ```bash
//! austin-ioc --config config/austin.toml
//! ```
//!
//! Start with simulated hardware and print every PV name:
//! ```bash
//! austin-ioc --simulate --list-pvs
//! ```

use anyhow::{Context, Result};
use austin::config::IocConfig;
use austin::driver::{DriverHandle, RobotDriver};
use austin::ioc::AustinIoc;
use austin::logging::{self, OutputFormat, TracingConfig};
use austin::server::PvServer;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "austin-ioc")]
#[command(about = "Process variables for the Austin sample-changing robot", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = austin::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the PV prefix, e.g. `25idAustin:`
    #[arg(long)]
    prefix: Option<String>,

    /// Override the PV server listen address
    #[arg(long)]
    listen: Option<String>,

    /// Use simulated robot links instead of the controller
    #[arg(long)]
    simulate: bool,

    /// Print every PV name and exit
    #[arg(long)]
    list_pvs: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    log_format: OutputFormat,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = IocConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(prefix) = cli.prefix {
        config.ioc.prefix = prefix;
    }
    if let Some(listen) = cli.listen {
        config.ioc.listen = listen;
    }
    config.validate()?;

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    logging::init(TracingConfig::from_config(&config)?.with_format(cli.log_format))?;

    let driver = if cli.simulate || cli.list_pvs {
        info!(model = ?config.robot.model, "Using simulated robot");
        RobotDriver::simulated(config.robot.model)
    } else {
        let robot = config.robot.clone();
        tokio::task::spawn_blocking(move || RobotDriver::connect(&robot)).await?
    };

    let mut ioc = AustinIoc::new(&config, DriverHandle::new(driver))?;
    let database = ioc.database();

    if cli.list_pvs {
        for name in database.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let server = PvServer::bind(config.listen_addr()?, database).await?;
    ioc.start().await;
    info!(prefix = %config.ioc.prefix, "Austin IOC running, Ctrl-C to stop");

    tokio::select! {
        _ = server.run() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Could not listen for Ctrl-C");
            }
        }
    }

    info!("Shutting down");
    ioc.shutdown().await;
    Ok(())
}
