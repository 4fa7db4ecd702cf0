//! # Zketech Protocol Library
//!
//! A Rust library for driving Zketech EBC/EBD battery testers over their
//! serial link, replacing the vendor's Windows-only application. The wire
//! protocol was reverse-engineered from the vendor software's traffic.
//!
//! ## Features
//!
//! - Constant-current and constant-power discharge tests
//! - Charge programs for NiCd, NiMH, LiPo/LiIon, LiFePO4 and lead-acid packs
//! - Passive voltage/current monitoring with a configurable cutoff
//! - Automated charge-discharge-charge cycles with per-step capacity results
//! - Internal resistance measurement and two-point channel calibration
//! - Status polling with strict frame validation (markers, checksum, codes)
//!
//! ## Example
//!
//! ```no_run
//! use zketech_protocol::{Tester, TestConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tester = Tester::open_default("/dev/ttyUSB0")?;
//!     tester.configure(TestConfig::constant_current_discharge(0.30, 2.80, 0))?;
//!     tester.start()?;
//!     let status = tester.poll()?;
//!     println!("{:.3} V at {:.3} A", status.voltage_v, status.current_a);
//!     Ok(())
//! }
//! ```

pub mod constants;
pub mod error;
pub mod frame;
pub mod modes;
pub mod protocol;
pub mod transport;
pub mod types;

pub use error::{Result, ZkError};
pub use protocol::Tester;
pub use transport::Transport;
pub use types::*;
