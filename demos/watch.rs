//! Status Watch Example
//!
//! Connects to a Zketech tester and prints one status line per frame,
//! whatever the device happens to be doing. Useful for following a test
//! that was started from the front panel or from another session.
//!
//! Usage:
//!   cargo run --example watch                  # Interactive port selection
//!   cargo run --example watch -- COM3          # Specify port
//!   cargo run --example watch -- /dev/ttyUSB0
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example watch

use inquire::Select;
use log::{info, warn};
use std::thread::sleep;
use std::time::Duration;
use zketech_protocol::{DeviceState, Result, Tester, ZkError};

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = Tester::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Selection cancelled: {}", e),
            )
        })?;

    // Extract just the port name (before " - ")
    let port_name = selection.split(" - ").next().unwrap().to_string();
    Ok(port_name)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port_name = std::env::args()
        .nth(1)
        .map(Ok)
        .unwrap_or_else(select_port)?;

    info!("Connecting to tester on {}...", port_name);
    let mut tester = Tester::open_default(&port_name)?;
    tester.connect()?;

    // The device emits a frame roughly every two seconds in link mode.
    loop {
        match tester.poll() {
            Ok(status) => {
                let state = match status.state {
                    DeviceState::Off => "idle".to_string(),
                    DeviceState::Discharging => "discharging".to_string(),
                    DeviceState::Charging => "charging".to_string(),
                    DeviceState::AutoStep(n) => format!("auto step {}", n),
                };
                println!(
                    "[{:?}] {:11} {:7.3} V {:6.3} A {:5} mAh {:4} min",
                    status.model,
                    state,
                    status.voltage_v,
                    status.current_a,
                    status.capacity_mah,
                    status.elapsed_minutes,
                );
                if let Some(result) = tester.take_auto_result() {
                    for step in &result.steps {
                        info!(
                            "auto step {} ({}) finished at {} mAh",
                            step.step, step.label, step.capacity_mah
                        );
                    }
                }
            }
            Err(ZkError::Timeout) => warn!("no frame within the deadline, retrying"),
            Err(e @ (ZkError::Checksum { .. } | ZkError::MalformedFrame(_))) => {
                warn!("dropped a bad frame: {}", e)
            }
            Err(e) => return Err(e),
        }
        sleep(Duration::from_secs(2));
    }
}
