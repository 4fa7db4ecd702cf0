//! Per-mode wire layout table.
//!
//! Each [`TestMode`] owns one row describing which [`TestConfig`] fields go
//! into the three request parameters and at which fixed-point scale. Frame
//! assembly stays generic over this table; there are no per-mode encode
//! paths. This table is the single source of truth for the payload layout.

use crate::constants::{MAX_DURATION_MIN, MAX_RAW};
use crate::error::{Result, ZkError};
use crate::types::{TestConfig, TestMode};

/// One request parameter slot: the config field it carries and its scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `current_a`, amperes ×1000
    CurrentMa,
    /// `power_w`, watts ×10
    PowerDw,
    /// `cutoff_voltage_v`, volts ×100
    CutoffVoltageCv,
    /// `cells`, unscaled
    Cells,
    /// `max_minutes` (or `pause_minutes` for an auto cycle), unscaled
    DurationMin,
    /// `cutoff_current_a`, amperes ×1000
    CutoffCurrentMa,
    /// Slot unused by this mode, transmitted as zero
    Zero,
}

/// Payload layout of one test mode.
#[derive(Debug, Clone, Copy)]
pub struct ModeLayout {
    /// Mode this row describes
    pub mode: TestMode,
    /// Field carried in each of the three request parameters
    pub fields: [Field; 3],
}

/// Layout rows for every mode, in program-code order with `Monitor` last.
pub const MODE_TABLE: [ModeLayout; 9] = [
    ModeLayout {
        mode: TestMode::ConstantCurrentDischarge,
        fields: [Field::CurrentMa, Field::CutoffVoltageCv, Field::DurationMin],
    },
    ModeLayout {
        mode: TestMode::ConstantPowerDischarge,
        fields: [Field::PowerDw, Field::CutoffVoltageCv, Field::DurationMin],
    },
    ModeLayout {
        mode: TestMode::ChargeNiMh,
        fields: [Field::CurrentMa, Field::Cells, Field::DurationMin],
    },
    ModeLayout {
        mode: TestMode::ChargeNiCd,
        fields: [Field::CurrentMa, Field::Cells, Field::DurationMin],
    },
    ModeLayout {
        mode: TestMode::ChargeLiPo,
        fields: [Field::CurrentMa, Field::Cells, Field::DurationMin],
    },
    ModeLayout {
        mode: TestMode::ChargeLiFe,
        fields: [Field::CurrentMa, Field::Cells, Field::DurationMin],
    },
    ModeLayout {
        mode: TestMode::ChargePb,
        fields: [Field::CurrentMa, Field::Cells, Field::DurationMin],
    },
    ModeLayout {
        mode: TestMode::ConstantVoltageCharge,
        fields: [Field::CurrentMa, Field::Cells, Field::DurationMin],
    },
    ModeLayout {
        mode: TestMode::Monitor,
        fields: [Field::CutoffCurrentMa, Field::Zero, Field::Zero],
    },
];

/// Look up the layout row for a mode. Rows are ordered so that a mode's
/// program code is its table index, with `Monitor` in the tail slot.
pub fn layout_for(mode: TestMode) -> &'static ModeLayout {
    match mode.program_code() {
        Some(code) => &MODE_TABLE[code as usize],
        None => &MODE_TABLE[MODE_TABLE.len() - 1],
    }
}

/// Scale a physical value into its raw fixed-point representation,
/// rejecting negatives and values the base-240 pair cannot carry.
pub fn scale(value: f64, factor: f64, name: &str) -> Result<u16> {
    if !value.is_finite() || value < 0.0 {
        return Err(ZkError::InvalidParameter(format!(
            "{name} must be a non-negative number"
        )));
    }
    let raw = (value * factor).round();
    if raw > MAX_RAW as f64 {
        return Err(ZkError::InvalidParameter(format!(
            "{name} of {value} exceeds the device range"
        )));
    }
    Ok(raw as u16)
}

fn encode_field(field: Field, config: &TestConfig) -> Result<u16> {
    match field {
        Field::CurrentMa => scale(config.current_a, 1000.0, "current"),
        Field::PowerDw => scale(config.power_w, 10.0, "power"),
        Field::CutoffVoltageCv => scale(config.cutoff_voltage_v, 100.0, "cutoff voltage"),
        Field::Cells => {
            if config.cells == 0 {
                return Err(ZkError::InvalidParameter(
                    "cell count must be 1 or more".into(),
                ));
            }
            Ok(config.cells)
        }
        Field::DurationMin => {
            let minutes = if config.auto_cycle {
                config.pause_minutes
            } else {
                config.max_minutes
            };
            if minutes > MAX_DURATION_MIN {
                return Err(ZkError::InvalidParameter(format!(
                    "duration of {minutes} min exceeds {MAX_DURATION_MIN} min"
                )));
            }
            Ok(minutes)
        }
        Field::CutoffCurrentMa => scale(config.cutoff_current_a, 1000.0, "cutoff current"),
        Field::Zero => Ok(0),
    }
}

/// Encode a configuration into the three raw request parameters, applying
/// the mode's layout row and range validation.
pub fn encode_params(config: &TestConfig) -> Result<[u16; 3]> {
    if config.mode.is_charge() && config.cells == 0 {
        return Err(ZkError::InvalidParameter(
            "charge modes need a cell count of 1 or more".into(),
        ));
    }
    let layout = layout_for(config.mode);
    Ok([
        encode_field(layout.fields[0], config)?,
        encode_field(layout.fields[1], config)?,
        encode_field(layout.fields[2], config)?,
    ])
}

/// Rebuild a configuration from raw request parameters. Used to interpret
/// the parameter echo of status frames; the auto-cycle flag is not on the
/// wire, so the result is always a plain single-test configuration.
pub fn decode_params(mode: TestMode, params: [u16; 3]) -> TestConfig {
    let layout = layout_for(mode);
    let mut config = TestConfig::blank(mode);
    for (field, raw) in layout.fields.iter().zip(params) {
        match field {
            Field::CurrentMa => config.current_a = raw as f64 / 1000.0,
            Field::PowerDw => config.power_w = raw as f64 / 10.0,
            Field::CutoffVoltageCv => config.cutoff_voltage_v = raw as f64 / 100.0,
            Field::Cells => config.cells = raw,
            Field::DurationMin => config.max_minutes = raw,
            Field::CutoffCurrentMa => config.cutoff_current_a = raw as f64 / 1000.0,
            Field::Zero => {}
        }
    }
    config
}
