//! Command handlers for uArm operations.
//!
//! This module provides high-level command functions that format payloads,
//! send them through the session and interpret the `OK`/`FAIL` status and
//! tagged fields of the reply.
//!
//! Commands taking a `wait` flag follow one convention: without `wait` the
//! command is queued and the result is `None`; with `wait` the result is
//! `Some(true)` on `OK`, `Some(false)` on `FAIL` and `None` on timeout.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::command::{self, Button, EEPROM_MAX_ADDRESS, EepromDataType, Servo};
use crate::protocol::Response;
use crate::session::SessionHandle;
use crate::types::{ButtonReport, EepromValue, Polar, Position, ServoAngles, Version};

/// Interval between moving-status polls while waiting for a move to end.
pub const MOVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Position `reset` returns the arm to.
pub const HOME_POSITION: Position = Position::new(0.0, 150.0, 150.0);

/// Speed used by `reset` and servo attach.
pub const DEFAULT_SPEED: f64 = 100.0;

/// Command handler for uArm operations.
#[derive(Clone, Debug)]
pub struct CommandHandler {
    session: SessionHandle,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub const fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    /// Returns the underlying session.
    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Sends a query and returns the response if its status is `OK`.
    async fn query(&self, payload: &str) -> Result<Option<Response>> {
        match self.session.send_and_receive(payload).await? {
            Some(response) if response.is_ok() => Ok(Some(response)),
            Some(response) => {
                tracing::debug!("{} failed: {:?}", payload, response.fields);
                Ok(None)
            }
            None => {
                tracing::warn!("no response to {}", payload);
                Ok(None)
            }
        }
    }

    /// Sends a command following the `wait` convention.
    async fn execute(&self, payload: &str, wait: bool) -> Result<Option<bool>> {
        if wait {
            let response = self.session.send_and_receive(payload).await?;
            Ok(response.map(|r| r.is_ok()))
        } else {
            self.session.send_only(payload)?;
            Ok(None)
        }
    }

    // ==================== Identification ====================

    /// Returns the firmware version, cached for the connection.
    pub async fn firmware_version(&self) -> Result<Option<Version>> {
        if let Some(version) = self.session.identity().firmware {
            return Ok(Some(version));
        }
        let version = self
            .query(command::GET_FIRMWARE_VERSION)
            .await?
            .and_then(|r| r.value(0).and_then(|v| v.parse::<Version>().ok()));
        if let Some(version) = &version {
            let version = version.clone();
            self.session
                .update_identity(|identity| identity.firmware = Some(version));
        }
        Ok(version)
    }

    /// Returns the hardware version string, cached for the connection.
    pub async fn hardware_version(&self) -> Result<Option<String>> {
        if let Some(version) = self.session.identity().hardware {
            return Ok(Some(version));
        }
        let version = self
            .query(command::GET_HARDWARE_VERSION)
            .await?
            .and_then(|r| r.value(0).map(|v| v.trim_start_matches(['V', 'v']).to_string()));
        if let Some(version) = &version {
            let version = version.clone();
            self.session
                .update_identity(|identity| identity.hardware = Some(version));
        }
        Ok(version)
    }

    // ==================== Queries ====================

    /// Gets the current cartesian position.
    pub async fn get_position(&self) -> Result<Option<Position>> {
        let Some(response) = self.query(command::GET_COORDINATE).await? else {
            return Ok(None);
        };
        Ok(parse_position(&response))
    }

    /// Gets the current polar position.
    pub async fn get_polar(&self) -> Result<Option<Polar>> {
        let Some(response) = self.query(command::GET_POLAR).await? else {
            return Ok(None);
        };
        Ok(parse_polar(&response))
    }

    /// Returns whether the arm is currently moving.
    pub async fn get_is_moving(&self) -> Result<Option<bool>> {
        let Some(response) = self.query(command::GET_IS_MOVING).await? else {
            return Ok(None);
        };
        Ok(match response.i64(0) {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        })
    }

    /// Returns whether the tip sensor is triggered. The sensor is active low.
    pub async fn get_tip_sensor(&self) -> Result<Option<bool>> {
        let Some(response) = self.query(command::GET_TIP_SENSOR).await? else {
            return Ok(None);
        };
        Ok(match response.i64(0) {
            Some(0) => Some(true),
            Some(1) => Some(false),
            _ => None,
        })
    }

    /// Gets the angles of all servos.
    pub async fn get_servo_angles(&self) -> Result<Option<ServoAngles>> {
        let Some(response) = self.query(command::GET_SERVO_ANGLE).await? else {
            return Ok(None);
        };
        Ok(parse_servo_angles(&response))
    }

    /// Gets the angle of one servo.
    pub async fn get_servo_angle(&self, servo: Servo) -> Result<Option<f64>> {
        Ok(self.get_servo_angles().await?.map(|angles| angles.get(servo)))
    }

    /// Reads an analog pin.
    pub async fn get_analog(&self, pin: u8) -> Result<Option<i64>> {
        let Some(response) = self.query(&command::get_analog(pin)).await? else {
            return Ok(None);
        };
        Ok(response.i64(0))
    }

    /// Reads a digital pin. Like the tip sensor it is active low: `V0`
    /// reads as `true`.
    pub async fn get_digital(&self, pin: u8) -> Result<Option<bool>> {
        let Some(response) = self.query(&command::get_digital(pin)).await? else {
            return Ok(None);
        };
        Ok(match response.i64(0) {
            Some(0) => Some(true),
            Some(1) => Some(false),
            _ => None,
        })
    }

    /// Reads an EEPROM cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `address` is out of range.
    pub async fn get_rom_data(
        &self,
        address: u16,
        data_type: EepromDataType,
    ) -> Result<Option<EepromValue>> {
        check_address(address)?;
        let Some(response) = self.query(&command::get_eeprom(address, data_type)).await? else {
            return Ok(None);
        };
        Ok(response
            .value(0)
            .and_then(|value| parse_eeprom(value, data_type)))
    }

    /// Writes an EEPROM cell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `address` is out of range.
    pub async fn set_rom_data(
        &self,
        address: u16,
        value: EepromValue,
        wait: bool,
    ) -> Result<Option<bool>> {
        check_address(address)?;
        let payload = command::set_eeprom(address, value.data_type(), &value.to_string());
        self.execute(&payload, wait).await
    }

    // ==================== Motion ====================

    /// Moves to an absolute cartesian position. With `wait`, also waits for
    /// the arm to stop.
    pub async fn set_position(
        &self,
        x: f64,
        y: f64,
        z: f64,
        speed: f64,
        wait: bool,
    ) -> Result<Option<bool>> {
        let payload = command::set_position(x, y, z, speed, false);
        self.move_with(&payload, wait).await
    }

    /// Moves relative to the current position. With `wait`, also waits for
    /// the arm to stop.
    pub async fn move_relative(
        &self,
        dx: f64,
        dy: f64,
        dz: f64,
        speed: f64,
        wait: bool,
    ) -> Result<Option<bool>> {
        let payload = command::set_position(dx, dy, dz, speed, true);
        self.move_with(&payload, wait).await
    }

    /// Moves to a polar position. With `wait`, also waits for the arm to
    /// stop.
    pub async fn set_polar_coordinate(
        &self,
        polar: Polar,
        speed: f64,
        wait: bool,
    ) -> Result<Option<bool>> {
        let payload = command::set_polar(polar.stretch, polar.rotation, polar.height, speed);
        self.move_with(&payload, wait).await
    }

    async fn move_with(&self, payload: &str, wait: bool) -> Result<Option<bool>> {
        let result = self.execute(payload, wait).await?;
        if wait && result.is_some() {
            self.wait_stopped().await?;
        }
        Ok(result)
    }

    /// Polls the moving status until the arm reports it has stopped or the
    /// status cannot be read.
    async fn wait_stopped(&self) -> Result<()> {
        while self.get_is_moving().await? == Some(true) {
            tokio::time::sleep(MOVE_POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Sets one servo angle in degrees.
    pub async fn set_servo_angle(
        &self,
        servo: Servo,
        angle: f64,
        wait: bool,
    ) -> Result<Option<bool>> {
        self.execute(&command::set_servo_angle(servo, angle), wait)
            .await
    }

    /// Sets the wrist angle in degrees.
    pub async fn set_wrist(&self, angle: f64, wait: bool) -> Result<Option<bool>> {
        self.set_servo_angle(Servo::Hand, angle, wait).await
    }

    /// Attaches one servo, or all of them when `servo` is `None`.
    ///
    /// Before attaching all servos the arm is told to hold its current
    /// position so it does not jump.
    pub async fn set_servo_attach(&self, servo: Option<Servo>, wait: bool) -> Result<Option<bool>> {
        match servo {
            Some(servo) => self.execute(&command::attach_servo(servo), wait).await,
            None => {
                if let Some(position) = self.get_position().await? {
                    self.session.send_only(&command::set_position(
                        position.x,
                        position.y,
                        position.z,
                        DEFAULT_SPEED,
                        false,
                    ))?;
                }
                self.each_servo(command::attach_servo, wait).await
            }
        }
    }

    /// Detaches one servo, or all of them when `servo` is `None`.
    pub async fn set_servo_detach(&self, servo: Option<Servo>, wait: bool) -> Result<Option<bool>> {
        match servo {
            Some(servo) => self.execute(&command::detach_servo(servo), wait).await,
            None => self.each_servo(command::detach_servo, wait).await,
        }
    }

    async fn each_servo(&self, payload: fn(Servo) -> String, wait: bool) -> Result<Option<bool>> {
        let mut results = Vec::with_capacity(Servo::ALL.len());
        for servo in Servo::ALL {
            results.push(self.execute(&payload(servo), wait).await?);
        }
        Ok(combine(&results))
    }

    // ==================== End effector ====================

    /// Switches the suction pump.
    pub async fn set_pump(&self, on: bool, wait: bool) -> Result<Option<bool>> {
        self.execute(&command::set_pump(on), wait).await
    }

    /// Closes (`catch`) or opens the gripper.
    pub async fn set_gripper(&self, catch: bool, wait: bool) -> Result<Option<bool>> {
        self.execute(&command::set_gripper(catch), wait).await
    }

    /// Sounds the buzzer at `frequency` Hz for `duration` seconds.
    pub async fn set_buzzer(
        &self,
        frequency: u32,
        duration: f64,
        wait: bool,
    ) -> Result<Option<bool>> {
        self.execute(&command::set_buzzer(frequency, duration), wait)
            .await
    }

    // ==================== Reports ====================

    /// Starts position reports every `interval` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `interval` is negative.
    pub async fn set_report_position(&self, interval: f64, wait: bool) -> Result<Option<bool>> {
        if interval.is_nan() || interval < 0.0 {
            return Err(Error::InvalidArgument {
                reason: format!("report interval must be positive, got {interval}"),
            });
        }
        self.execute(&command::set_report_position(interval), wait)
            .await
    }

    /// Stops position reports.
    pub async fn close_report_position(&self, wait: bool) -> Result<Option<bool>> {
        self.execute(&command::set_report_position(0.0), wait).await
    }

    /// Pops the newest position report, waiting up to the timeout.
    pub async fn get_report_position(&self) -> Option<Position> {
        self.session.get_report_position().await
    }

    /// Enables or disables button reports.
    pub async fn set_report_button(&self, enabled: bool, wait: bool) -> Result<Option<bool>> {
        self.execute(&command::set_report_button(enabled), wait)
            .await
    }

    /// Pops the newest report for `button`, optionally waiting for one.
    pub async fn get_report_button(&self, button: Button, wait: bool) -> Option<ButtonReport> {
        self.session.get_report_button(button, wait).await
    }

    // ==================== Misc ====================

    /// Returns the arm to its home pose: servos attached, end effector off,
    /// wrist centered.
    pub async fn reset(&self) -> Result<()> {
        self.set_servo_attach(None, true).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.set_position(
            HOME_POSITION.x,
            HOME_POSITION.y,
            HOME_POSITION.z,
            DEFAULT_SPEED,
            true,
        )
        .await?;
        self.set_pump(false, true).await?;
        self.set_gripper(false, true).await?;
        self.set_wrist(90.0, true).await?;
        Ok(())
    }
}

fn check_address(address: u16) -> Result<()> {
    if address > EEPROM_MAX_ADDRESS {
        return Err(Error::InvalidArgument {
            reason: format!("EEPROM address {address} exceeds {EEPROM_MAX_ADDRESS}"),
        });
    }
    Ok(())
}

/// Folds per-servo results: any failure wins, then any timeout.
fn combine(results: &[Option<bool>]) -> Option<bool> {
    if results.contains(&Some(false)) {
        Some(false)
    } else if results.iter().all(|r| *r == Some(true)) {
        Some(true)
    } else {
        None
    }
}

fn parse_position(response: &Response) -> Option<Position> {
    Some(Position::new(
        response.f64(0)?,
        response.f64(1)?,
        response.f64(2)?,
    ))
}

fn parse_polar(response: &Response) -> Option<Polar> {
    Some(Polar {
        stretch: response.f64(0)?,
        rotation: response.f64(1)?,
        height: response.f64(2)?,
    })
}

fn parse_servo_angles(response: &Response) -> Option<ServoAngles> {
    Some(ServoAngles {
        bottom: response.f64(0)?,
        left: response.f64(1)?,
        right: response.f64(2)?,
        hand: response.f64(3)?,
    })
}

fn parse_eeprom(value: &str, data_type: EepromDataType) -> Option<EepromValue> {
    match data_type {
        EepromDataType::Byte => value.parse().ok().map(EepromValue::Byte),
        EepromDataType::Integer => value.parse().ok().map(EepromValue::Integer),
        EepromDataType::Float => value.parse().ok().map(EepromValue::Float),
    }
}
