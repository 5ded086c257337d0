//! Simulated uArm for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uarm::{DeviceEnd, MemoryTransport, SessionConfig, UArm};

/// Firmware reported by the simulated arm unless a test says otherwise.
pub const FIRMWARE: &str = "3.2.1";

/// A device task answering commands with a reply function.
pub struct SimDevice {
    commands: mpsc::UnboundedReceiver<(u16, String)>,
    task: JoinHandle<()>,
}

impl SimDevice {
    /// Sends `greeting` lines, then answers every command with the lines
    /// `reply` returns for it.
    pub fn spawn<F>(mut device: DeviceEnd, greeting: &[&str], reply: F) -> Self
    where
        F: Fn(u16, &str) -> Vec<String> + Send + 'static,
    {
        let greeting: Vec<String> = greeting.iter().map(|l| (*l).to_string()).collect();
        let (tx, commands) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            for line in greeting {
                if device.send_line(&line).await.is_err() {
                    return;
                }
            }
            while let Some((id, payload)) = device.recv_command().await {
                let lines = reply(id, &payload);
                let _ = tx.send((id, payload));
                for line in lines {
                    if device.send_line(&line).await.is_err() {
                        return;
                    }
                }
            }
        });

        Self { commands, task }
    }

    /// Returns the next command the device received.
    pub async fn next_command(&mut self) -> Option<(u16, String)> {
        tokio::time::timeout(Duration::from_secs(2), self.commands.recv())
            .await
            .ok()
            .flatten()
    }

    /// Returns every command received so far.
    pub fn drain(&mut self) -> Vec<(u16, String)> {
        let mut commands = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            commands.push(command);
        }
        commands
    }

    /// Pulls the cable: the host sees end of stream.
    pub fn unplug(&self) {
        self.task.abort();
    }
}

/// Answers like a healthy arm running `firmware`.
pub fn arm_reply(firmware: &'static str) -> impl Fn(u16, &str) -> Vec<String> + Send + 'static {
    move |id, payload| {
        let code = payload.split_whitespace().next().unwrap_or_default();
        let body = match code {
            "P2203" => format!("OK V{firmware}"),
            "P2202" => "OK V3.1".to_string(),
            "P2220" => "OK X150.00 Y0.00 Z100.00".to_string(),
            "P2221" => "OK S150.00 R90.00 H100.00".to_string(),
            "P2200" => "OK B90.00 L100.00 R40.00 H90.00".to_string(),
            "M2200" => "OK V0".to_string(),
            _ => "OK".to_string(),
        };
        vec![format!("${id} {body}")]
    }
}

/// Config with short timeouts for tests.
pub fn test_config() -> SessionConfig {
    SessionConfig::default()
        .timeout(Duration::from_millis(300))
        .handshake_timeout(Duration::from_secs(1))
}

/// Connects a client to a simulated arm and discards the handshake
/// commands.
pub async fn connected<F>(config: SessionConfig, reply: F) -> (UArm<MemoryTransport>, SimDevice)
where
    F: Fn(u16, &str) -> Vec<String> + Send + 'static,
{
    let (transport, device) = MemoryTransport::pair();
    let mut device = SimDevice::spawn(device, &["@1"], reply);
    let mut arm = UArm::with_transport(transport, config);
    arm.connect().await.expect("handshake with simulated arm");

    assert_eq!(device.next_command().await.map(|c| c.1), Some("P2203".into()));
    assert_eq!(device.next_command().await.map(|c| c.1), Some("P2202".into()));
    (arm, device)
}
