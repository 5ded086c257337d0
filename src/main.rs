//! uarm - command line tools for uArm robotic arms.
//!
//! Usage:
//!   uarm list
//!   uarm info --port /dev/ttyUSB0
//!   uarm miniterm
//!   uarm teach record --file moves.txt
//!   uarm teach play --file moves.txt --speed 1.5

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uarm::{
    Error, SerialTransport, Servo, Settings, Teach, UArm,
    commands::{CommandHandler, DEFAULT_SPEED},
};

#[derive(Parser, Debug)]
#[command(name = "uarm")]
#[command(about = "Tools for serial-connected uArm robotic arms")]
#[command(version)]
struct Args {
    /// Serial port; discovered by USB ids when omitted
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports that look like a uArm
    List {
        /// Show every serial port, not just matching ones
        #[arg(short, long)]
        all: bool,
    },
    /// Connect and print device information
    Info,
    /// Interactive terminal
    Miniterm,
    /// Record or play back movements
    Teach {
        #[command(subcommand)]
        action: TeachAction,
    },
}

#[derive(Subcommand, Debug)]
enum TeachAction {
    /// Record until Enter is pressed
    Record {
        /// Recording file
        #[arg(short, long, default_value = "teach.txt")]
        file: PathBuf,
    },
    /// Play a recording
    Play {
        /// Recording file
        #[arg(short, long, default_value = "teach.txt")]
        file: PathBuf,

        /// Speed factor (0.25 to 2)
        #[arg(short, long, default_value = "1.0")]
        speed: f64,
    },
    /// Let the arm's menu and play buttons drive recording and playback
    Standby {
        /// Recording file
        #[arg(short, long, default_value = "teach.txt")]
        file: PathBuf,

        /// Playback speed factor (0.25 to 2)
        #[arg(short, long, default_value = "1.0")]
        speed: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match args.command {
        Command::List { all } => list(&settings, all),
        Command::Info => {
            let mut arm = connect(&settings, args.port).await?;
            print_info(&arm).await?;
            arm.disconnect().await?;
            Ok(())
        }
        Command::Miniterm => {
            let mut arm = connect(&settings, args.port).await?;
            let result = miniterm(arm.commands()).await;
            arm.disconnect().await?;
            result
        }
        Command::Teach { action } => {
            let mut arm = connect(&settings, args.port).await?;
            let result = teach(arm.commands(), action).await;
            arm.disconnect().await?;
            result
        }
    }
}

fn list(settings: &Settings, all: bool) -> anyhow::Result<()> {
    let ports = if all {
        uarm::list_ports().context("failed to enumerate serial ports")?
    } else {
        let hardware_id = settings.hardware_id.parse()?;
        uarm::transport::serial::list_candidate_ports(hardware_id)
    };

    for port in &ports {
        println!("{port}");
    }
    println!("{} port(s) found", ports.len());
    Ok(())
}

async fn connect(
    settings: &Settings,
    port: Option<String>,
) -> anyhow::Result<UArm<SerialTransport>> {
    let config = settings.session_config(port)?;
    let mut arm = UArm::with_config(config);

    match arm.connect().await {
        Ok(device) => info!("connected to {}", device.port),
        Err(
            e @ (Error::UnknownFirmwareVersion { .. } | Error::UnsupportedFirmwareVersion { .. }),
        ) => {
            warn!("{}; continuing anyway", e);
        }
        Err(e) => return Err(e).context("failed to connect"),
    }
    Ok(arm)
}

async fn print_info(arm: &UArm<SerialTransport>) -> anyhow::Result<()> {
    let commands = arm.commands();
    let firmware = commands.firmware_version().await?;
    let hardware = commands.hardware_version().await?;

    println!("port:     {}", arm.port());
    println!(
        "firmware: {}",
        firmware.map_or_else(|| "unknown".to_string(), |v| v.to_string())
    );
    println!("hardware: {}", hardware.as_deref().unwrap_or("unknown"));
    Ok(())
}

const MINITERM_HELP: &str = "\
commands:
  move <x> <y> <z> [speed]   move and wait until stopped
  pos                        current position
  polar                      current polar position
  angles                     servo angles
  pump on|off                suction pump
  gripper on|off             gripper
  wrist <angle>              wrist angle
  buzzer <freq> <seconds>    sound the buzzer
  attach [servo]             attach one or all servos
  detach [servo]             detach one or all servos
  reset                      return to home position
  send <gcode>               send a raw command and print the response
  version                    firmware and hardware versions
  help                       this text
  quit                       leave";

async fn miniterm(commands: &CommandHandler) -> anyhow::Result<()> {
    println!("{MINITERM_HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if !commands.session().is_ready() {
            bail!("connection lost");
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, rest)) = words.split_first() else {
            continue;
        };
        if matches!(verb, "quit" | "exit") {
            break;
        }
        if let Err(e) = run_line(commands, verb, rest, &line).await {
            println!("error: {e:#}");
        }
    }
    Ok(())
}

fn on_off(word: Option<&&str>) -> anyhow::Result<bool> {
    match word.copied() {
        Some("on" | "1") => Ok(true),
        Some("off" | "0") => Ok(false),
        _ => bail!("expected on or off"),
    }
}

fn number(word: Option<&&str>, name: &str) -> anyhow::Result<f64> {
    let word = word.with_context(|| format!("missing {name}"))?;
    word.parse()
        .with_context(|| format!("invalid {name}: {word}"))
}

fn servo(word: Option<&&str>) -> anyhow::Result<Option<Servo>> {
    word.map(|w| {
        w.parse::<u8>()
            .ok()
            .and_then(Servo::from_index)
            .with_context(|| format!("invalid servo: {w}"))
    })
    .transpose()
}

fn outcome(result: Option<bool>) -> &'static str {
    match result {
        Some(true) => "ok",
        Some(false) => "failed",
        None => "timeout",
    }
}

async fn run_line(
    commands: &CommandHandler,
    verb: &str,
    rest: &[&str],
    line: &str,
) -> anyhow::Result<()> {
    match verb {
        "help" => println!("{MINITERM_HELP}"),
        "move" => {
            let x = number(rest.first(), "x")?;
            let y = number(rest.get(1), "y")?;
            let z = number(rest.get(2), "z")?;
            let speed = rest.get(3).map_or(Ok(DEFAULT_SPEED), |s| number(Some(s), "speed"))?;
            println!("{}", outcome(commands.set_position(x, y, z, speed, true).await?));
        }
        "pos" => match commands.get_position().await? {
            Some(p) => println!("x {:.2} y {:.2} z {:.2}", p.x, p.y, p.z),
            None => println!("no position"),
        },
        "polar" => match commands.get_polar().await? {
            Some(p) => println!(
                "stretch {:.2} rotation {:.2} height {:.2}",
                p.stretch, p.rotation, p.height
            ),
            None => println!("no position"),
        },
        "angles" => match commands.get_servo_angles().await? {
            Some(a) => println!(
                "bottom {:.2} left {:.2} right {:.2} hand {:.2}",
                a.bottom, a.left, a.right, a.hand
            ),
            None => println!("no angles"),
        },
        "pump" => println!("{}", outcome(commands.set_pump(on_off(rest.first())?, true).await?)),
        "gripper" => println!(
            "{}",
            outcome(commands.set_gripper(on_off(rest.first())?, true).await?)
        ),
        "wrist" => {
            let angle = number(rest.first(), "angle")?;
            println!("{}", outcome(commands.set_wrist(angle, true).await?));
        }
        "buzzer" => {
            let frequency = rest.first().context("missing frequency")?;
            let frequency = frequency
                .parse::<u32>()
                .with_context(|| format!("invalid frequency: {frequency}"))?;
            let duration = number(rest.get(1), "duration")?;
            let result = commands.set_buzzer(frequency, duration, true).await?;
            println!("{}", outcome(result));
        }
        "attach" => println!(
            "{}",
            outcome(commands.set_servo_attach(servo(rest.first())?, true).await?)
        ),
        "detach" => println!(
            "{}",
            outcome(commands.set_servo_detach(servo(rest.first())?, true).await?)
        ),
        "reset" => {
            commands.reset().await?;
            println!("ok");
        }
        "send" => {
            let payload = line.trim_start().strip_prefix("send").unwrap_or_default().trim();
            if payload.is_empty() {
                bail!("nothing to send");
            }
            match commands.session().send_and_receive(payload).await? {
                Some(response) => println!("{}", response.fields.join(" ")),
                None => println!("timeout"),
            }
        }
        "version" => {
            let firmware = commands.firmware_version().await?;
            let hardware = commands.hardware_version().await?;
            println!(
                "firmware {} hardware {}",
                firmware.map_or_else(|| "unknown".to_string(), |v| v.to_string()),
                hardware.as_deref().unwrap_or("unknown")
            );
        }
        other => println!("unknown command {other:?}, try help"),
    }
    Ok(())
}

async fn teach(commands: &CommandHandler, action: TeachAction) -> anyhow::Result<()> {
    match action {
        TeachAction::Record { file } => {
            let teach = Teach::new(commands.clone(), &file);
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

            let recorder = teach.clone();
            let mut task = tokio::spawn(async move { recorder.record(Some(progress_tx)).await });

            println!(
                "recording to {}, move the arm by hand; press Enter to stop",
                file.display()
            );
            let mut stdin = BufReader::new(tokio::io::stdin()).lines();
            let result = loop {
                tokio::select! {
                    // The recorder may stop on its own, e.g. when the arm goes away
                    result = &mut task => break result,
                    line = stdin.next_line() => {
                        teach.stop_record();
                        line?;
                        break task.await;
                    }
                    Some(count) = progress_rx.recv() => {
                        if count % 20 == 0 {
                            info!("{} steps recorded", count);
                        }
                    }
                }
            };

            let count = result.context("recording task failed")??;
            println!("recorded {count} steps");
        }
        TeachAction::Play { file, speed } => {
            let teach = Teach::new(commands.clone(), &file);
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

            let printer = tokio::spawn(async move {
                while let Some(percent) = progress_rx.recv().await {
                    if percent % 10 == 0 {
                        info!("{}% played", percent);
                    }
                }
            });

            let played = teach
                .play(speed, Some(progress_tx))
                .await
                .with_context(|| format!("failed to play {}", file.display()))?;
            printer.await.ok();
            println!("played {played} steps");
        }
        TeachAction::Standby { file, speed } => {
            let teach = Teach::new(commands.clone(), &file);
            let waiter = teach.clone();
            let mut task = tokio::spawn(async move { waiter.standby(speed).await });

            println!(
                "standby on {}: menu button records, play button plays; press Enter to quit",
                file.display()
            );
            let mut stdin = BufReader::new(tokio::io::stdin()).lines();
            let result = tokio::select! {
                result = &mut task => result,
                line = stdin.next_line() => {
                    teach.stop_standby();
                    line?;
                    task.await
                }
            };
            result.context("standby task failed")??;
        }
    }
    Ok(())
}
