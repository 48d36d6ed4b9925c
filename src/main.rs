mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use bmi_rig::config::RigConfig;
use bmi_rig::supervisor::{
    spawn_host, ControlClient, HarnessHost, ImagingHost, ReceiverHost, SharedState,
};
use cli::{Cli, Command, HELP};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RigConfig::load(path)?,
        None => {
            info!("no --config given, using defaults");
            RigConfig::default()
        }
    };

    let state = SharedState::new();
    let harness = HarnessHost::new(config.clone(), state.clone())
        .context("Failed to set up the harness")?;
    let (harness, harness_task) = spawn_host(harness, state.clone());
    let (imaging, imaging_task) = spawn_host(ImagingHost::new(&config, state.clone()), state.clone());
    let (receiver, receiver_task) =
        spawn_host(ReceiverHost::new(config.receiver.clone()), state.clone());

    let client = ControlClient::new(harness, imaging, receiver, state, config.imaging_warmup());
    console(client).await?;

    // Every mailbox handle is gone now; hosts finish their current request
    // and release their resources.
    for task in [harness_task, imaging_task, receiver_task] {
        task.await.context("Host task failed")?;
    }
    info!("all hosts stopped");
    Ok(())
}

/// Read operator commands from stdin until `quit` or end of input. Each
/// request runs on its own task so the console stays responsive while a
/// session is in progress.
async fn console(client: ControlClient) -> Result<()> {
    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => println!("{}", HELP),
            Command::Status => match serde_json::to_string_pretty(&client.state()) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("could not render state: {}", e),
            },
            request => {
                let client = client.clone();
                tokio::spawn(async move {
                    if let Err(e) = execute(&client, request).await {
                        error!("{}", e);
                    }
                });
            }
        }
    }
    Ok(())
}

async fn execute(client: &ControlClient, command: Command) -> bmi_rig::core::Result<()> {
    match command {
        Command::ConnectActuator(addr) => client.connect_command_sink(&addr).await,
        Command::ConnectImaging(channel) => client.connect_frame_source(channel).await,
        Command::Load(file_name) => client.load_pipeline(&file_name).await,
        Command::TestActuator(packets) => client.test_command_sink(packets).await,
        Command::TestImaging(duration) => client.test_frame_source(duration).await,
        Command::Run(duration) => client.run_session(duration).await,
        Command::Status | Command::Help | Command::Quit => Ok(()),
    }
}
