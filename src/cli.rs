use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use bmi_rig::supervisor::MAX_REQUEST_DURATION;

#[derive(Debug, Parser, Clone)]
#[command(name = "bmi-rig")]
#[command(about = "Closed-loop decoding rig: frames in, actuator commands out")]
pub struct Cli {
    /// Rig configuration file. Defaults apply when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// One operator console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    ConnectActuator(String),
    ConnectImaging(u32),
    Load(String),
    TestActuator(u32),
    TestImaging(Duration),
    Run(Duration),
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  status                     show the shared session state
  connect-actuator <ip:port> start the receiver and connect the actuator
  connect-imaging [channel]  create the frame region and attach the harness
  load <file>                load a pipeline from the pipeline directory
  test-actuator [packets]    send zero commands (default 5)
  test-imaging [seconds]     preview frames without decoding (default 10)
  run <seconds>              run a closed-loop session
  help                       show this text
  quit                       stop all hosts and exit";

fn seconds(arg: Option<&str>, default: Option<f64>) -> Result<Duration, String> {
    let value = match (arg, default) {
        (Some(text), _) => text
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number of seconds", text))?,
        (None, Some(default)) => default,
        (None, None) => return Err("a duration in seconds is required".to_string()),
    };
    let duration = Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| format!("{} is not a positive duration", value))?;
    if duration > MAX_REQUEST_DURATION {
        return Err(format!(
            "{} s is longer than the {} s limit",
            value,
            MAX_REQUEST_DURATION.as_secs()
        ));
    }
    Ok(duration)
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();

        let command = match verb {
            "status" => Self::Status,
            "connect-actuator" => Self::ConnectActuator(
                arg.ok_or("connect-actuator needs an address")?.to_string(),
            ),
            "connect-imaging" => Self::ConnectImaging(
                arg.map(str::parse)
                    .transpose()
                    .map_err(|_| "channel must be a whole number".to_string())?
                    .unwrap_or(0),
            ),
            "load" => Self::Load(arg.ok_or("load needs a file name")?.to_string()),
            "test-actuator" => Self::TestActuator(
                arg.map(str::parse)
                    .transpose()
                    .map_err(|_| "packet count must be a whole number".to_string())?
                    .unwrap_or(5),
            ),
            "test-imaging" => Self::TestImaging(seconds(arg, Some(10.0))?),
            "run" => Self::Run(seconds(arg, None)?),
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{}', try 'help'", other)),
        };
        Ok(Some(command))
    }
}
