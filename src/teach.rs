//! Teach and playback.
//!
//! Recording detaches the servos so the arm can be moved by hand, samples
//! position reports and writes them to a text file, one step per line:
//!
//! ```text
//! mv,<x>,<y>,<z>,<r>
//! ee,<0|1>
//! ```
//!
//! `ee` lines record pump toggles made with the play button. Playback sends
//! the steps back to the arm at a chosen speed.
//!
//! In standby the arm's own buttons drive both: the menu button starts and
//! stops a recording, the play button starts and stops playback.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

use crate::commands::CommandHandler;
use crate::error::{Error, FrameError, Result};
use crate::protocol::Button;
use crate::types::Position;

/// Position report interval while recording, in seconds.
pub const RECORD_INTERVAL: f64 = 0.05;

/// Delay between steps at speed 1.
pub const STEP_DELAY: Duration = Duration::from_millis(25);

/// Slowest playback speed.
pub const MIN_SPEED: f64 = 0.25;

/// Fastest playback speed.
pub const MAX_SPEED: f64 = 2.0;

/// Move speed sent with each playback step; the firmware treats 0 as its
/// fastest interpolation.
const PLAYBACK_MOVE_SPEED: f64 = 0.0;

/// Button report state of a short press.
const BUTTON_PRESSED: u8 = 1;

/// Button poll interval in standby.
const STANDBY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One recorded step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Move to a position.
    Move(Position),
    /// Switch the pump.
    Pump(bool),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move(p) => write!(
                f,
                "mv,{:.2},{:.2},{:.2},{:.2}",
                p.x,
                p.y,
                p.z,
                p.r.unwrap_or(0.0)
            ),
            Self::Pump(on) => write!(f, "ee,{}", u8::from(*on)),
        }
    }
}

impl FromStr for Step {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Frame(FrameError::InvalidField(s.to_string()));
        let mut fields = s.trim().split(',');
        match fields.next() {
            Some("mv") => {
                let values = fields
                    .map(|v| v.trim().parse::<f64>().map_err(|_| invalid()))
                    .collect::<Result<Vec<_>>>()?;
                match values.as_slice() {
                    [x, y, z] => Ok(Self::Move(Position::new(*x, *y, *z))),
                    [x, y, z, r] => Ok(Self::Move(Position::new(*x, *y, *z).with_r(*r))),
                    _ => Err(invalid()),
                }
            }
            Some("ee") => match (fields.next().map(str::trim), fields.next()) {
                (Some("0"), None) => Ok(Self::Pump(false)),
                (Some("1"), None) => Ok(Self::Pump(true)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }
}

/// Clamps a playback speed factor to the supported range.
#[must_use]
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

/// Delay between playback steps at `speed`.
#[must_use]
pub fn step_delay(speed: f64) -> Duration {
    STEP_DELAY.div_f64(clamp_speed(speed))
}

/// Records and plays back arm movements.
///
/// Clones share the stop flags, so a clone can stop a recording or playback
/// running elsewhere.
#[derive(Clone, Debug)]
pub struct Teach {
    commands: CommandHandler,
    path: PathBuf,
    recording: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    standby: Arc<AtomicBool>,
}

impl Teach {
    /// Creates a recorder/player for the given file.
    #[must_use]
    pub fn new(commands: CommandHandler, path: impl Into<PathBuf>) -> Self {
        Self {
            commands,
            path: path.into(),
            recording: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(false)),
            standby: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the recording file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true while a recording runs.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Returns true while a playback runs.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Returns true while standby mode runs.
    #[must_use]
    pub fn is_standby(&self) -> bool {
        self.standby.load(Ordering::SeqCst)
    }

    /// Ends a running recording after its current step.
    pub fn stop_record(&self) {
        self.recording.store(false, Ordering::SeqCst);
    }

    /// Ends a running playback after its current step.
    pub fn stop_play(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    /// Records until [`stop_record`](Self::stop_record) is called or the
    /// session disconnects. Sends the number of steps written so far on
    /// `progress` after each step. Returns the total step count.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or a setup command
    /// cannot be sent.
    pub async fn record(&self, progress: Option<mpsc::UnboundedSender<usize>>) -> Result<usize> {
        if self.recording.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidArgument {
                reason: "recording already running".into(),
            });
        }

        let result = self.record_steps(progress).await;
        self.recording.store(false, Ordering::SeqCst);

        // Leave the arm in a known state even if recording failed
        if self.commands.session().is_ready() {
            self.commands.close_report_position(true).await?;
            self.commands.set_report_button(false, true).await?;
            self.commands.set_servo_attach(None, true).await?;
        }
        result
    }

    async fn record_steps(
        &self,
        progress: Option<mpsc::UnboundedSender<usize>>,
    ) -> Result<usize> {
        let file = File::create(&self.path).await?;
        let mut writer = BufWriter::new(file);

        self.commands.set_servo_detach(None, true).await?;
        self.commands.set_report_button(true, true).await?;
        self.commands.set_report_position(RECORD_INTERVAL, true).await?;
        tracing::info!("recording to {}", self.path.display());

        let mut pump = false;
        let mut count = 0;
        while self.is_recording() {
            if self.pressed(Button::Play).await {
                pump = !pump;
                self.commands.set_pump(pump, false).await?;
                write_step(&mut writer, Step::Pump(pump)).await?;
                count += 1;
            }

            match self.commands.get_report_position().await {
                Some(position) => {
                    write_step(&mut writer, Step::Move(position)).await?;
                    count += 1;
                    if let Some(progress) = &progress {
                        let _ = progress.send(count);
                    }
                }
                None if !self.commands.session().is_ready() => {
                    tracing::warn!("session lost while recording");
                    break;
                }
                None => {}
            }

            if self.is_standby() && self.pressed(Button::Menu).await {
                tracing::info!("menu button pressed, recording stopped");
                break;
            }
        }

        writer.flush().await?;
        tracing::info!("recorded {} steps", count);
        Ok(count)
    }

    /// Plays the recording back at `speed` (clamped to 0.25..=2) until the
    /// file ends or [`stop_play`](Self::stop_play) is called. Sends the
    /// percentage done on `progress` whenever it changes. Returns the
    /// number of steps played.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains a malformed
    /// step, or the session is not connected.
    pub async fn play(
        &self,
        speed: f64,
        progress: Option<mpsc::UnboundedSender<u8>>,
    ) -> Result<usize> {
        if self.playing.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidArgument {
                reason: "playback already running".into(),
            });
        }
        let result = self.play_steps(speed, progress).await;
        self.playing.store(false, Ordering::SeqCst);
        result
    }

    async fn play_steps(
        &self,
        speed: f64,
        progress: Option<mpsc::UnboundedSender<u8>>,
    ) -> Result<usize> {
        let steps = load(&self.path).await?;
        let total = steps.len();
        let delay = step_delay(speed);
        tracing::info!(
            "playing {} steps from {} at speed {}",
            total,
            self.path.display(),
            clamp_speed(speed)
        );

        let mut last_percent = None;
        let mut played = 0;
        for step in steps {
            if !self.is_playing() || (self.is_standby() && self.pressed(Button::Play).await) {
                tracing::info!("playback stopped after {} steps", played);
                break;
            }
            match step {
                Step::Move(p) => {
                    self.commands
                        .set_position(p.x, p.y, p.z, PLAYBACK_MOVE_SPEED, false)
                        .await?;
                }
                Step::Pump(on) => {
                    self.commands.set_pump(on, false).await?;
                }
            }
            played += 1;

            let percent = (played * 100 / total) as u8;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                if let Some(progress) = &progress {
                    let _ = progress.send(percent);
                }
            }
            tokio::time::sleep(delay).await;
        }
        Ok(played)
    }

    /// Waits for button presses until [`stop_standby`](Self::stop_standby)
    /// is called or the session disconnects. The menu button starts a
    /// recording and a second press ends it; the play button does the same
    /// for playback at `speed`. Toggling the pump while recording stays on
    /// the play button.
    ///
    /// # Errors
    ///
    /// Returns an error if button reports cannot be enabled or a recording
    /// fails. A failed playback is logged and standby carries on.
    pub async fn standby(&self, speed: f64) -> Result<()> {
        if self.standby.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidArgument {
                reason: "standby already running".into(),
            });
        }
        let result = self.standby_loop(speed).await;
        self.standby.store(false, Ordering::SeqCst);
        result
    }

    /// Leaves standby, ending a recording or playback it started.
    pub fn stop_standby(&self) {
        self.standby.store(false, Ordering::SeqCst);
        self.stop_record();
        self.stop_play();
    }

    async fn standby_loop(&self, speed: f64) -> Result<()> {
        self.commands.set_report_button(true, true).await?;
        tracing::info!("standby: menu button records, play button plays");

        while self.is_standby() {
            if !self.commands.session().is_ready() {
                tracing::warn!("session lost in standby");
                break;
            }

            if self.pressed(Button::Menu).await {
                self.drain_buttons().await;
                self.record(None).await?;
                // Recording turns button reports off when it ends
                self.commands.set_report_button(true, true).await?;
            } else if self.pressed(Button::Play).await {
                self.drain_buttons().await;
                if let Err(e) = self.play(speed, None).await {
                    tracing::warn!("playback failed: {}", e);
                }
            }
            tokio::time::sleep(STANDBY_POLL_INTERVAL).await;
        }
        Ok(())
    }

    async fn pressed(&self, button: Button) -> bool {
        self.commands
            .get_report_button(button, false)
            .await
            .is_some_and(|report| report.state == BUTTON_PRESSED)
    }

    async fn drain_buttons(&self) {
        for button in [Button::Menu, Button::Play] {
            while self.commands.get_report_button(button, false).await.is_some() {}
        }
    }
}

async fn write_step(writer: &mut BufWriter<File>, step: Step) -> Result<()> {
    writer.write_all(step.to_string().as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

/// Reads all steps of a recording. Blank lines are skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is malformed.
pub async fn load(path: impl AsRef<Path>) -> Result<Vec<Step>> {
    let file = File::open(path.as_ref()).await?;
    let mut lines = BufReader::new(file).lines();
    let mut steps = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        steps.push(line.parse()?);
    }
    Ok(steps)
}
