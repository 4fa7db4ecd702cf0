use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Test program selected for a session.
///
/// The mode determines which [`TestConfig`] fields are meaningful and which
/// wire layout row is used to encode them (see [`crate::modes`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestMode {
    /// Discharge at a fixed current until the cutoff voltage is reached
    ConstantCurrentDischarge,
    /// Discharge at a fixed power until the cutoff voltage is reached
    ConstantPowerDischarge,
    /// Charge a NiCd pack
    ChargeNiCd,
    /// Charge a NiMH pack
    ChargeNiMh,
    /// Charge a LiPo/LiIon pack
    ChargeLiPo,
    /// Charge a LiFePO4 pack
    ChargeLiFe,
    /// Charge a lead-acid (VRLA) pack
    ChargePb,
    /// Charge at constant voltage
    ConstantVoltageCharge,
    /// Pure voltage/current monitoring, no load or charge applied
    Monitor,
}

impl TestMode {
    /// Program code carried in bits 6..4 of the request code byte and in
    /// the sub-field of the response status byte. `Monitor` is not a
    /// device program and has no code.
    pub fn program_code(self) -> Option<u8> {
        match self {
            TestMode::ConstantCurrentDischarge => Some(0),
            TestMode::ConstantPowerDischarge => Some(1),
            TestMode::ChargeNiMh => Some(2),
            TestMode::ChargeNiCd => Some(3),
            TestMode::ChargeLiPo => Some(4),
            TestMode::ChargeLiFe => Some(5),
            TestMode::ChargePb => Some(6),
            TestMode::ConstantVoltageCharge => Some(7),
            TestMode::Monitor => None,
        }
    }

    /// Inverse of [`program_code`](Self::program_code).
    pub fn from_program_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TestMode::ConstantCurrentDischarge),
            1 => Some(TestMode::ConstantPowerDischarge),
            2 => Some(TestMode::ChargeNiMh),
            3 => Some(TestMode::ChargeNiCd),
            4 => Some(TestMode::ChargeLiPo),
            5 => Some(TestMode::ChargeLiFe),
            6 => Some(TestMode::ChargePb),
            7 => Some(TestMode::ConstantVoltageCharge),
            _ => None,
        }
    }

    /// True for the discharge programs.
    pub fn is_discharge(self) -> bool {
        matches!(
            self,
            TestMode::ConstantCurrentDischarge | TestMode::ConstantPowerDischarge
        )
    }

    /// True for the charge programs.
    pub fn is_charge(self) -> bool {
        !self.is_discharge() && self != TestMode::Monitor
    }

    /// Short label used in reports and auto-cycle step results.
    pub fn label(self) -> &'static str {
        match self {
            TestMode::ConstantCurrentDischarge => "CC",
            TestMode::ConstantPowerDischarge => "CP",
            TestMode::ChargeNiCd => "NiCd",
            TestMode::ChargeNiMh => "NiMH",
            TestMode::ChargeLiPo => "LiPo",
            TestMode::ChargeLiFe => "LiFe",
            TestMode::ChargePb => "Pb",
            TestMode::ConstantVoltageCharge => "CV",
            TestMode::Monitor => "Monitor",
        }
    }
}

/// Parameters of one test session.
///
/// Only the fields relevant to `mode` are encoded on the wire; the per-mode
/// constructors leave the others at zero. Range validation happens in
/// [`Tester::configure`](crate::protocol::Tester::configure), before
/// anything is transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Selected test program
    pub mode: TestMode,
    /// Discharge or charge current setpoint, in amperes
    pub current_a: f64,
    /// Discharge power setpoint, in watts (constant-power discharge only)
    pub power_w: f64,
    /// Voltage at which a discharge ends, in volts
    pub cutoff_voltage_v: f64,
    /// Number of cells in the pack (charge modes only)
    pub cells: u16,
    /// Current below which a monitor session flags the end of a test, in amperes
    pub cutoff_current_a: f64,
    /// Duration limit in minutes; 0 means no limit
    pub max_minutes: u16,
    /// Run the device's automated charge-discharge-charge sequence
    pub auto_cycle: bool,
    /// Pause between auto-cycle steps, in minutes
    pub pause_minutes: u16,
}

impl TestConfig {
    pub(crate) fn blank(mode: TestMode) -> Self {
        TestConfig {
            mode,
            current_a: 0.0,
            power_w: 0.0,
            cutoff_voltage_v: 0.0,
            cells: 0,
            cutoff_current_a: 0.0,
            max_minutes: 0,
            auto_cycle: false,
            pause_minutes: 0,
        }
    }

    /// Constant-current discharge configuration.
    pub fn constant_current_discharge(
        current_a: f64,
        cutoff_voltage_v: f64,
        max_minutes: u16,
    ) -> Self {
        TestConfig {
            current_a,
            cutoff_voltage_v,
            max_minutes,
            ..Self::blank(TestMode::ConstantCurrentDischarge)
        }
    }

    /// Constant-power discharge configuration.
    pub fn constant_power_discharge(
        power_w: f64,
        cutoff_voltage_v: f64,
        max_minutes: u16,
    ) -> Self {
        TestConfig {
            power_w,
            cutoff_voltage_v,
            max_minutes,
            ..Self::blank(TestMode::ConstantPowerDischarge)
        }
    }

    /// Charge configuration. `mode` must be one of the charge variants;
    /// validation rejects anything else before transmission.
    pub fn charge(mode: TestMode, current_a: f64, cells: u16, max_minutes: u16) -> Self {
        TestConfig {
            current_a,
            cells,
            max_minutes,
            ..Self::blank(mode)
        }
    }

    /// Monitoring configuration with the given end-of-test cutoff current.
    pub fn monitor(cutoff_current_a: f64) -> Self {
        TestConfig {
            cutoff_current_a,
            ..Self::blank(TestMode::Monitor)
        }
    }

    /// Turn the configuration into an automated multi-step cycle with the
    /// given pause between steps.
    pub fn with_auto_cycle(mut self, pause_minutes: u16) -> Self {
        self.auto_cycle = true;
        self.pause_minutes = pause_minutes;
        self
    }
}

/// What the device reported it was doing in the last decoded status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// No load or charge applied
    Off,
    /// A discharge program is running
    Discharging,
    /// A charge program is running
    Charging,
    /// Step `n` (1-based) of an automated cycle is running
    AutoStep(u8),
}

/// One decoded status frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Time the frame was decoded
    pub timestamp: DateTime<Utc>,
    /// Device state tag
    pub state: DeviceState,
    /// Active program, when the device reports one
    pub mode: Option<TestMode>,
    /// Minutes since the running test started
    pub elapsed_minutes: u16,
    /// Measured battery voltage, in volts
    pub voltage_v: f64,
    /// Measured current, in amperes
    pub current_a: f64,
    /// Accumulated capacity, in mAh
    pub capacity_mah: u16,
    /// Accumulated energy in mWh; only reported while a test runs
    pub energy_mwh: Option<u16>,
    /// Device model reported in the frame
    pub model: DeviceModel,
}

/// Outcome of one step of an automated cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoStep {
    /// 1-based step ordinal
    pub step: u8,
    /// Label of the program that ran the step, e.g. `"CV"`
    pub label: String,
    /// Capacity measured during the step, in mAh
    pub capacity_mah: u16,
}

/// Ordered per-step outcomes of a completed automated cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoStepResult {
    /// Steps in the order the device ran them
    pub steps: Vec<AutoStep>,
}

/// Which end of a measurement range a calibration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPoint {
    /// Low end of the range
    Lower,
    /// High end of the range
    Upper,
}

/// Device part numbers reported in the response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceModel {
    EbcA,
    EbcAh,
    EbcB,
    EbcBh,
    EbcA05,
    EbcA10h,
    EbcA10,
    EbcB10,
    EbcA20,
    EbcA40l,
    EbdA,
    EbdAh,
    EbdB,
    EbdBh,
    EbdA10,
    EbdA15,
    EbdA2s,
    EbdA5s,
    EbdA20h,
}

impl DeviceModel {
    /// Decode the part-number byte of a response frame.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DeviceModel::EbcA),
            2 => Some(DeviceModel::EbcAh),
            3 => Some(DeviceModel::EbcB),
            4 => Some(DeviceModel::EbcBh),
            5 => Some(DeviceModel::EbcA05),
            6 => Some(DeviceModel::EbcA10h),
            7 => Some(DeviceModel::EbcA10),
            8 => Some(DeviceModel::EbcB10),
            9 => Some(DeviceModel::EbcA20),
            10 => Some(DeviceModel::EbcA40l),
            11 => Some(DeviceModel::EbdA),
            12 => Some(DeviceModel::EbdAh),
            13 => Some(DeviceModel::EbdB),
            14 => Some(DeviceModel::EbdBh),
            15 => Some(DeviceModel::EbdA10),
            16 => Some(DeviceModel::EbdA15),
            17 => Some(DeviceModel::EbdA2s),
            18 => Some(DeviceModel::EbdA5s),
            19 => Some(DeviceModel::EbdA20h),
            _ => None,
        }
    }

    /// Part-number byte for this model.
    pub fn code(self) -> u8 {
        match self {
            DeviceModel::EbcA => 1,
            DeviceModel::EbcAh => 2,
            DeviceModel::EbcB => 3,
            DeviceModel::EbcBh => 4,
            DeviceModel::EbcA05 => 5,
            DeviceModel::EbcA10h => 6,
            DeviceModel::EbcA10 => 7,
            DeviceModel::EbcB10 => 8,
            DeviceModel::EbcA20 => 9,
            DeviceModel::EbcA40l => 10,
            DeviceModel::EbdA => 11,
            DeviceModel::EbdAh => 12,
            DeviceModel::EbdB => 13,
            DeviceModel::EbdBh => 14,
            DeviceModel::EbdA10 => 15,
            DeviceModel::EbdA15 => 16,
            DeviceModel::EbdA2s => 17,
            DeviceModel::EbdA5s => 18,
            DeviceModel::EbdA20h => 19,
        }
    }
}
