//! # `control-probe`: Command Line Probe for Control Engines
//!
//! Binds status variables and calls module functions on a control engine,
//! either over the network or against the built-in simulated engine.
//!
//! ## Usage
//!
//! ```bash
//! # Print a status variable, then follow its changes for 30 seconds
//! control-probe --host engine.local bind sys-1 Display power --watch-secs 30
//!
//! # Call a function with arguments (a JSON value or array)
//! control-probe --endpoint wss://engine.local/control/websocket exec sys-1 Display volume --args 40
//!
//! # Walk through bind, exec and reconnect against the simulated engine
//! control-probe demo
//! ```
//!
//! Settings come from defaults, then `control_probe.conf` (JSON), then
//! environment variables and flags.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lib_control::loggers::setup_logging;
use lib_control::transport::{MockTransport, Transport, WebSocketTransport};
use lib_control::{ControlClient, StaticToken, Systems, Target};
use serde_json::Value;

mod probe_logic;
use probe_logic::{config, demo, watch};

#[derive(Parser, Debug)]
#[command(
    name = "control-probe",
    about = "Bind status variables and call functions on a control engine",
    version
)]
struct Cli {
    #[command(flatten)]
    config: config::ProbeConfig,

    /// Talk to the built-in simulated engine instead of the network.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// System id.
    system: String,
    /// Module id, optionally with its index (`Display_2`).
    module: String,
    /// 1-based module instance index.
    #[arg(long, short, default_value_t = 1)]
    index: u32,
}

impl TargetArgs {
    fn target(&self) -> Target {
        let (module, index) = lib_control::systems::split_module_id(&self.module, self.index);
        Target::new(self.system.clone(), module, index)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bind a status variable and print its value.
    Bind {
        #[command(flatten)]
        target: TargetArgs,
        /// Status variable name.
        name: String,
        /// Keep printing changes for this many seconds.
        #[arg(long, default_value_t = 0)]
        watch_secs: u64,
    },
    /// Call a function on a module and print the result.
    Exec {
        #[command(flatten)]
        target: TargetArgs,
        /// Function name.
        function: String,
        /// Arguments as JSON. A single value is sent as a one-element list.
        #[arg(long)]
        args: Option<String>,
    },
    /// Run the bind / exec / reconnect walkthrough on the simulated engine.
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let probe_config = config::load_config(cli.config);
    setup_logging(&probe_config.log_dir(), probe_config.log_level(), "control-probe")?;
    let client_config = probe_config.client_config()?;

    if let Command::Demo = cli.command {
        return demo::run(client_config).await;
    }

    let transport: Arc<dyn Transport> = if cli.mock {
        Arc::new(MockTransport::new(demo::seeded_engine()))
    } else if let Some(token) = &probe_config.token {
        let token_source = Arc::new(StaticToken::new(Some(token.clone())));
        Arc::new(WebSocketTransport::with_token_source(token_source))
    } else {
        Arc::new(WebSocketTransport::new())
    };
    let client = ControlClient::new(client_config, transport, Systems::new());

    let outcome = run_command(&client, cli.command).await;
    client.shutdown();
    outcome
}

async fn run_command(client: &ControlClient, command: Command) -> Result<()> {
    match command {
        Command::Bind {
            target,
            name,
            watch_secs,
        } => {
            let key = target.target().key(name);
            watch::bind_and_watch(client, &key, Duration::from_secs(watch_secs)).await
        }
        Command::Exec {
            target,
            function,
            args,
        } => {
            let args = args
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("--args is not valid JSON")?;
            let target = target.target();
            let value = client.exec(&target, &function, args).await?;
            println!("{}.{} -> {}", target, function, value);
            Ok(())
        }
        Command::Demo => Ok(()),
    }
}
