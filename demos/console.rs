//! Interactive Console Example
//!
//! A small operator console covering the full command set:
//! - Configure and start discharge, charge and monitoring sessions
//! - Run automated charge-discharge-charge cycles and report per-step capacity
//! - Measure internal resistance
//! - Watch a running test with a charge safety guard
//!
//! Usage:
//!   cargo run --example console                  # Interactive mode
//!   cargo run --example console -- COM3          # Specify port
//!   cargo run --example console -- /dev/ttyUSB0
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example console

use inquire::{CustomType, Select};
use log::{info, warn};
use std::thread::sleep;
use std::time::Duration;
use zketech_protocol::{DeviceState, Result, TestConfig, TestMode, Tester, ZkError};

/// Extra current above the charge setpoint tolerated before the guard
/// stops the test. A charging current that keeps climbing past its
/// setpoint is the classic thermal-runaway signature.
const CHARGE_GUARD_MARGIN_A: f64 = 0.05;

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

fn prompt_f64(message: &str, default: f64) -> f64 {
    CustomType::<f64>::new(message)
        .with_default(default)
        .prompt()
        .unwrap_or(default)
}

fn prompt_u16(message: &str, default: u16) -> u16 {
    CustomType::<u16>::new(message)
        .with_default(default)
        .prompt()
        .unwrap_or(default)
}

/// Poll until the device goes idle, printing one line per frame. While a
/// charge is running, stop the test if the measured current climbs past
/// the setpoint by more than the guard margin.
fn watch_until_idle(tester: &mut Tester, charge_limit_a: Option<f64>) -> Result<()> {
    loop {
        let status = match tester.poll() {
            Ok(status) => status,
            Err(ZkError::Timeout) => {
                warn!("no frame within the deadline, retrying");
                continue;
            }
            Err(e @ (ZkError::Checksum { .. } | ZkError::MalformedFrame(_))) => {
                warn!("dropped a bad frame: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        println!(
            "{:7.3} V {:6.3} A {:5} mAh {:4} min",
            status.voltage_v, status.current_a, status.capacity_mah, status.elapsed_minutes
        );

        if status.state == DeviceState::Charging {
            if let Some(limit) = charge_limit_a {
                if status.current_a > limit + CHARGE_GUARD_MARGIN_A {
                    warn!(
                        "charge current {:.3} A exceeds the {:.3} A setpoint, stopping",
                        status.current_a, limit
                    );
                    tester.stop()?;
                    return Ok(());
                }
            }
        }

        if status.state == DeviceState::Off {
            if let Some(result) = tester.take_auto_result() {
                println!("Auto cycle finished:");
                for step in &result.steps {
                    println!(
                        "  step {} ({}): {} mAh",
                        step.step, step.label, step.capacity_mah
                    );
                }
            } else {
                println!("Test finished.");
            }
            return Ok(());
        }
        sleep(Duration::from_secs(2));
    }
}

fn run_discharge(tester: &mut Tester) -> Result<()> {
    let kind = Select::new(
        "Discharge mode:",
        vec!["Constant current", "Constant power"],
    )
    .prompt()
    .unwrap_or("Constant current");
    let cutoff_v = prompt_f64("Cutoff voltage (V):", 2.80);
    let minutes = prompt_u16("Time limit (min, 0 = none):", 0);
    let config = if kind == "Constant power" {
        let power_w = prompt_f64("Power (W):", 5.0);
        TestConfig::constant_power_discharge(power_w, cutoff_v, minutes)
    } else {
        let current_a = prompt_f64("Current (A):", 1.0);
        TestConfig::constant_current_discharge(current_a, cutoff_v, minutes)
    };
    tester.configure(config)?;
    tester.start()?;
    watch_until_idle(tester, None)
}

fn run_charge(tester: &mut Tester, auto_cycle: bool) -> Result<()> {
    let chemistries = vec![
        TestMode::ChargeNiMh,
        TestMode::ChargeNiCd,
        TestMode::ChargeLiPo,
        TestMode::ChargeLiFe,
        TestMode::ChargePb,
        TestMode::ConstantVoltageCharge,
    ];
    let labels: Vec<&str> = chemistries.iter().map(|m| m.label()).collect();
    let picked = Select::new("Chemistry:", labels.clone())
        .prompt()
        .unwrap_or("LiPo");
    let mode = chemistries[labels.iter().position(|l| *l == picked).unwrap_or(2)];

    let current_a = prompt_f64("Charge current (A):", 1.0);
    let cells = prompt_u16("Cell count:", 1);
    let minutes = prompt_u16("Time limit (min, 0 = none):", 0);
    let mut config = TestConfig::charge(mode, current_a, cells, minutes);
    if auto_cycle {
        let pause = prompt_u16("Pause between steps (min):", 5);
        config = config.with_auto_cycle(pause);
    }
    tester.configure(config)?;
    tester.start()?;
    watch_until_idle(tester, Some(current_a))
}

fn run_monitor(tester: &mut Tester) -> Result<()> {
    let cutoff_a = prompt_f64("End-of-test cutoff current (A):", 0.05);
    tester.configure(TestConfig::monitor(cutoff_a))?;
    tester.start()?;
    watch_until_idle(tester, None)
}

fn run_resistance(tester: &mut Tester) -> Result<()> {
    let current_ma = prompt_u16("Test current (mA):", 1000);
    let mohm = tester.measure_resistance(current_ma)?;
    println!("Internal resistance: {} mOhm", mohm);
    Ok(())
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

    loop {
        let choice = Select::new(
            "Operation:",
            vec![
                "Status",
                "Discharge",
                "Charge",
                "Auto cycle",
                "Monitor",
                "Measure resistance",
                "Stop",
                "Quit",
            ],
        )
        .prompt()
        .unwrap_or("Quit");

        let outcome = match choice {
            "Status" => tester.poll().map(|status| {
                println!(
                    "{:?}: {:7.3} V {:6.3} A {:5} mAh",
                    status.state, status.voltage_v, status.current_a, status.capacity_mah
                );
            }),
            "Discharge" => run_discharge(&mut tester),
            "Charge" => run_charge(&mut tester, false),
            "Auto cycle" => run_charge(&mut tester, true),
            "Monitor" => run_monitor(&mut tester),
            "Measure resistance" => run_resistance(&mut tester),
            "Stop" => tester.stop(),
            "Quit" => break,
            _ => unreachable!(),
        };
        if let Err(e) = outcome {
            warn!("{}", e);
        }
    }

    tester.disconnect()?;
    tester.close()
}
