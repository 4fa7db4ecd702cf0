//! Protocol engine: the typed operation set and the session state machine.
//!
//! A [`Tester`] owns the transport and the session state for one device.
//! Every operation is a blocking request/response round trip; the `&mut
//! self` receiver is the mutual-exclusion region, so no two exchanges can
//! overlap on the same connection. There is no background thread: all
//! state observations come from explicit [`Tester::poll`] calls, and the
//! caller chooses the polling interval.

use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};

use crate::constants::{
    ACTION_CALIBRATE, ACTION_LINK_OFF, ACTION_LINK_ON, ACTION_MEASURE_RESISTANCE,
    ACTION_SET_PARAMS, ACTION_START, ACTION_START_AUTO, ACTION_STOP, DEFAULT_BAUD,
    MAX_RESISTANCE_CURRENT_MA, READ_TIMEOUT_MS, RESPONSE_LEN, STATE_AUTO, STATE_ENDING,
    STATE_TESTING, WIRE_BASE,
};
use crate::error::{Result, ZkError};
use crate::frame::{Request, Response};
use crate::modes;
use crate::transport::{SerialTransport, Transport};
use crate::types::{
    AutoStep, AutoStepResult, CalibrationPoint, DeviceState, DeviceStatus, TestConfig, TestMode,
};

/// Where the session believes the device is. The active configuration is
/// kept separately in [`Tester::config`], so the running states carry only
/// what polling accumulates.
#[derive(Debug)]
enum SessionState {
    /// No test underway
    Idle,
    /// A single test is underway
    Running,
    /// An automated cycle is underway; `steps` collects per-step outcomes
    AutoRunning { step: u8, steps: Vec<AutoStep> },
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running a test",
            SessionState::AutoRunning { .. } => "running an auto cycle",
        }
    }
}

/// Session handle for one Zketech battery tester.
///
/// Created with [`open`](Tester::open) for real hardware or
/// [`with_transport`](Tester::with_transport) for any other byte pipe.
/// Operations follow the device's request/response discipline: build a
/// frame, send it, read and validate one response. Validation failures
/// (`Checksum`, `MalformedFrame`) and timeouts never touch session state,
/// so the caller can poll again and lose nothing but one reading.
pub struct Tester {
    transport: Box<dyn Transport>,
    timeout: Duration,
    state: SessionState,
    config: Option<TestConfig>,
    status: Option<DeviceStatus>,
    auto_result: Option<AutoStepResult>,
}

impl Tester {
    /// Open a session on a serial port. [`DEFAULT_BAUD`] is the rate the
    /// vendor firmware ships with.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let transport = SerialTransport::open(port_name, baud_rate)?;
        Ok(Self::with_transport(Box::new(transport)))
    }

    /// Open a session at the vendor default baud rate.
    pub fn open_default(port_name: &str) -> Result<Self> {
        Self::open(port_name, DEFAULT_BAUD)
    }

    /// Build a session over an already-open transport.
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Tester {
            transport,
            timeout: Duration::from_millis(READ_TIMEOUT_MS),
            state: SessionState::Idle,
            config: None,
            status: None,
            auto_result: None,
        }
    }

    /// List available serial ports.
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        SerialTransport::list_ports()
    }

    /// Override the per-exchange response deadline.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The last configuration handed to [`configure`](Self::configure).
    pub fn config(&self) -> Option<&TestConfig> {
        self.config.as_ref()
    }

    /// The last successfully decoded status frame.
    pub fn last_status(&self) -> Option<&DeviceStatus> {
        self.status.as_ref()
    }

    /// True when no test is underway.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, SessionState::Idle)
    }

    /// Take the result of the most recently finished automated cycle.
    pub fn take_auto_result(&mut self) -> Option<AutoStepResult> {
        self.auto_result.take()
    }

    /// Send a test configuration to the device and store it for the
    /// coming [`start`](Self::start). Only valid while idle.
    pub fn configure(&mut self, config: TestConfig) -> Result<()> {
        if !self.is_idle() {
            return Err(self.invalid_state("configure"));
        }
        let params = modes::encode_params(&config)?;
        self.exchange(request_code(config.mode, ACTION_SET_PARAMS), params)?;
        debug!("configured {:?}", config.mode);
        self.config = Some(config);
        Ok(())
    }

    /// Start the configured test. Uses the auto-cycle action when the
    /// configuration asks for one. Only valid while idle, and only after
    /// a configuration has been set.
    pub fn start(&mut self) -> Result<()> {
        if !self.is_idle() {
            return Err(self.invalid_state("start"));
        }
        let config = self.config.clone().ok_or(ZkError::InvalidState {
            operation: "start",
            state: "idle with no configuration set".to_string(),
        })?;
        let action = if config.mode == TestMode::Monitor {
            ACTION_LINK_ON
        } else if config.auto_cycle {
            ACTION_START_AUTO
        } else {
            ACTION_START
        };
        let params = modes::encode_params(&config)?;
        self.exchange(request_code(config.mode, action), params)?;
        debug!("started {:?}", config.mode);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Stop whatever is running. Always permitted; the command is issued
    /// even when the session believes it is idle, so local and device
    /// state cannot stay drifted apart. Finishes an automated cycle, if
    /// one was underway, with the steps observed so far.
    pub fn stop(&mut self) -> Result<()> {
        self.exchange(ACTION_STOP, [0; 3])?;
        self.finish_cycle();
        self.state = SessionState::Idle;
        debug!("stopped");
        Ok(())
    }

    /// Request and decode one status frame, updating the session state
    /// machine. Valid in every state and safe to retry on timeout.
    pub fn poll(&mut self) -> Result<DeviceStatus> {
        let resp = self.exchange(ACTION_LINK_ON, [0; 3])?;
        let status = self.apply(&resp)?;
        self.status = Some(status.clone());
        Ok(status)
    }

    /// Set the end-of-test cutoff current for a monitoring session. Only
    /// valid when the configured mode is [`TestMode::Monitor`].
    pub fn set_monitor_cutoff(&mut self, cutoff_a: f64) -> Result<()> {
        let monitoring = self
            .config
            .as_ref()
            .is_some_and(|c| c.mode == TestMode::Monitor);
        if !monitoring {
            return Err(ZkError::InvalidState {
                operation: "set the monitor cutoff",
                state: "a session not configured for monitoring".to_string(),
            });
        }
        let raw = modes::scale(cutoff_a, 1000.0, "cutoff current")?;
        self.exchange(ACTION_SET_PARAMS, [raw, 0, 0])?;
        if let Some(config) = self.config.as_mut() {
            config.cutoff_current_a = cutoff_a;
        }
        Ok(())
    }

    /// Measure the internal resistance of the battery at the given test
    /// current. Returns milliohms. Only valid while idle.
    pub fn measure_resistance(&mut self, current_ma: u16) -> Result<u32> {
        if !self.is_idle() {
            return Err(self.invalid_state("measure resistance"));
        }
        if current_ma == 0 || current_ma > MAX_RESISTANCE_CURRENT_MA {
            return Err(ZkError::InvalidParameter(format!(
                "resistance test current must be 1..={MAX_RESISTANCE_CURRENT_MA} mA"
            )));
        }
        let resp = self.exchange(ACTION_MEASURE_RESISTANCE, [current_ma, 0, 0])?;
        // The capacity field carries the measured voltage drop in mV;
        // R = U/I, reported in milliohms.
        Ok(resp.capacity_mah as u32 * 1000 / current_ma as u32)
    }

    /// Calibrate one end of the voltage measurement range against a
    /// reference of `volts`. Only valid while idle.
    pub fn calibrate_voltage(&mut self, volts: f64, point: CalibrationPoint) -> Result<()> {
        if !self.is_idle() {
            return Err(self.invalid_state("calibrate voltage"));
        }
        self.send_calibration(volts, point, 0)
    }

    /// Calibrate one end of the current measurement range against a
    /// reference of `amps`. The device must be sinking current, so this
    /// is only valid while a constant-current discharge is running.
    pub fn calibrate_current(&mut self, amps: f64, point: CalibrationPoint) -> Result<()> {
        let cc_running = matches!(self.state, SessionState::Running)
            && self
                .config
                .as_ref()
                .is_some_and(|c| c.mode == TestMode::ConstantCurrentDischarge);
        if !cc_running {
            return Err(ZkError::InvalidState {
                operation: "calibrate current",
                state: "anything but a running constant-current discharge".to_string(),
            });
        }
        self.send_calibration(amps, point, 2)
    }

    /// Enter PC-link mode. The device starts streaming status frames
    /// afterwards; none is consumed here, so the first frame stays
    /// available for the next [`poll`](Self::poll).
    pub fn connect(&mut self) -> Result<()> {
        let frame = Request::new(ACTION_LINK_ON, [0; 3])?.encode();
        debug!("tx {:02X?}", frame);
        self.transport.send(&frame)
    }

    /// Leave PC-link mode. The device goes quiet afterwards, so no
    /// response is read.
    pub fn disconnect(&mut self) -> Result<()> {
        let frame = Request::new(ACTION_LINK_OFF, [0; 3])?.encode();
        debug!("tx {:02X?}", frame);
        self.transport.send(&frame)?;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Release the serial connection. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }

    /// One command/response round trip. Rejected responses are logged and
    /// surfaced without touching session state.
    fn exchange(&mut self, code: u8, params: [u16; 3]) -> Result<Response> {
        let frame = Request::new(code, params)?.encode();
        debug!("tx {:02X?}", frame);
        self.transport.send(&frame)?;
        let raw = self.transport.receive(RESPONSE_LEN, self.timeout)?;
        debug!("rx {:02X?}", raw);
        Response::decode(&raw).inspect_err(|e| warn!("rejected response frame: {e}"))
    }

    /// Calibration frames use a shifted payload: the point selector rides
    /// in the hi digit of p1 and the value remainder is pre-multiplied
    /// into p2. A vendor firmware quirk, kept bit-for-bit.
    fn send_calibration(&mut self, value: f64, point: CalibrationPoint, channel: u8) -> Result<()> {
        let raw = modes::scale(value, 1000.0, "calibration reference")?;
        let selector = channel + matches!(point, CalibrationPoint::Upper) as u8;
        let p1 = selector as u16 * WIRE_BASE + raw / WIRE_BASE;
        let p2 = (raw % WIRE_BASE) * WIRE_BASE;
        self.exchange(ACTION_CALIBRATE, [p1, p2, 0])?;
        Ok(())
    }

    fn invalid_state(&self, operation: &'static str) -> ZkError {
        ZkError::InvalidState {
            operation,
            state: self.state.name().to_string(),
        }
    }

    /// Interpret a decoded response and drive the state machine. Anything
    /// that can fail is checked before the first mutation, so a rejected
    /// frame leaves the session exactly as it was.
    fn apply(&mut self, resp: &Response) -> Result<DeviceStatus> {
        let running = matches!(resp.state, STATE_TESTING | STATE_ENDING | STATE_AUTO);
        let mode = match resp.state {
            STATE_TESTING | STATE_ENDING => {
                Some(TestMode::from_program_code(resp.sub).ok_or_else(|| {
                    ZkError::MalformedFrame(format!("unknown program code {}", resp.sub))
                })?)
            }
            // While auto-cycling the sub-field is the step ordinal and the
            // active program rides in the first parameter echo.
            STATE_AUTO => u8::try_from(resp.p1).ok().and_then(TestMode::from_program_code),
            _ => None,
        };
        let tag = match resp.state {
            STATE_AUTO => DeviceState::AutoStep(resp.sub),
            STATE_TESTING | STATE_ENDING => {
                if mode.is_some_and(TestMode::is_discharge) {
                    DeviceState::Discharging
                } else {
                    DeviceState::Charging
                }
            }
            _ => DeviceState::Off,
        };

        match tag {
            DeviceState::AutoStep(n) => self.observe_auto_step(n, mode, resp.capacity_mah),
            DeviceState::Off => {
                if !self.is_idle() {
                    debug!("device reports idle, test finished");
                }
                self.finish_cycle();
                self.state = SessionState::Idle;
            }
            DeviceState::Discharging | DeviceState::Charging => {
                if self.is_idle() {
                    warn!("device reports a running test while session is idle, adopting it");
                    self.state = SessionState::Running;
                }
                // An AutoRunning session stays put: the device reports the
                // plain program code between step announcements.
            }
        }

        Ok(DeviceStatus {
            timestamp: Utc::now(),
            state: tag,
            mode,
            elapsed_minutes: resp.elapsed_min,
            voltage_v: resp.voltage_mv as f64 / 1000.0,
            current_a: resp.current_ma as f64 / 1000.0,
            capacity_mah: resp.capacity_mah,
            energy_mwh: if running { Some(resp.p3) } else { None },
            model: resp.model,
        })
    }

    fn observe_auto_step(&mut self, n: u8, mode: Option<TestMode>, capacity_mah: u16) {
        let label = mode.map_or_else(|| "?".to_string(), |m| m.label().to_string());
        match &mut self.state {
            SessionState::AutoRunning { step, steps } => {
                if n == *step {
                    if let Some(current) = steps.last_mut() {
                        current.capacity_mah = capacity_mah;
                        current.label = label;
                    }
                } else if n > *step {
                    debug!("auto cycle advanced to step {n}");
                    steps.push(AutoStep {
                        step: n,
                        label,
                        capacity_mah,
                    });
                    *step = n;
                } else {
                    warn!("stale auto step {n} reported after step {}", *step);
                }
            }
            _ => {
                if self.is_idle() {
                    warn!("device reports an auto cycle while session is idle, adopting it");
                }
                self.state = SessionState::AutoRunning {
                    step: n,
                    steps: vec![AutoStep {
                        step: n,
                        label,
                        capacity_mah,
                    }],
                };
            }
        }
    }

    /// Fold an in-progress automated cycle into an [`AutoStepResult`].
    fn finish_cycle(&mut self) {
        if let SessionState::AutoRunning { steps, .. } =
            std::mem::replace(&mut self.state, SessionState::Idle)
        {
            debug!("auto cycle finished with {} steps", steps.len());
            self.auto_result = Some(AutoStepResult { steps });
        }
    }
}

/// Compose a request code from the mode's program bits and an action.
fn request_code(mode: TestMode, action: u8) -> u8 {
    (mode.program_code().unwrap_or(0) << 4) | action
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{STATE_IDLE, STATE_INIT};
    use crate::frame::build_response;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const MODEL: u8 = 5; // EBC-A05

    enum Reply {
        Frame(Vec<u8>),
        Timeout,
    }

    #[derive(Default)]
    struct Shared {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Reply>,
        closed: bool,
    }

    /// Scripted transport: records every sent frame and plays back a
    /// queue of canned replies.
    #[derive(Clone, Default)]
    struct MockTransport {
        shared: Rc<RefCell<Shared>>,
    }

    impl MockTransport {
        fn push_frame(&self, frame: Vec<u8>) {
            self.shared.borrow_mut().replies.push_back(Reply::Frame(frame));
        }

        fn push_timeout(&self) {
            self.shared.borrow_mut().replies.push_back(Reply::Timeout);
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.shared.borrow().sent.clone()
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, frame: &[u8]) -> Result<()> {
            self.shared.borrow_mut().sent.push(frame.to_vec());
            Ok(())
        }

        fn receive(&mut self, _len: usize, _timeout: Duration) -> Result<Vec<u8>> {
            match self.shared.borrow_mut().replies.pop_front() {
                Some(Reply::Frame(frame)) => Ok(frame),
                Some(Reply::Timeout) | None => Err(ZkError::Timeout),
            }
        }

        fn close(&mut self) -> Result<()> {
            self.shared.borrow_mut().closed = true;
            Ok(())
        }
    }

    fn tester() -> (Tester, MockTransport) {
        let mock = MockTransport::default();
        (Tester::with_transport(Box::new(mock.clone())), mock)
    }

    fn idle_frame() -> Vec<u8> {
        build_response(STATE_IDLE, 0, 4200, 0, 0, 0, 0, 0, MODEL)
    }

    fn testing_frame(prog: u8, capacity: u16) -> Vec<u8> {
        build_response(
            STATE_TESTING * 10 + prog,
            1500,
            3850,
            capacity,
            12,
            1500,
            280,
            capacity,
            MODEL,
        )
    }

    fn auto_frame(step: u8, prog: u8, capacity: u16) -> Vec<u8> {
        build_response(
            STATE_AUTO * 10 + step,
            1000,
            4100,
            capacity,
            30,
            prog as u16,
            0,
            capacity,
            MODEL,
        )
    }

    #[test]
    fn start_before_configure_is_a_state_error() {
        let (mut t, _mock) = tester();
        assert!(matches!(t.start(), Err(ZkError::InvalidState { .. })));
    }

    #[test]
    fn configure_while_running_is_a_state_error() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame()); // configure ack
        mock.push_frame(idle_frame()); // start ack
        t.configure(TestConfig::constant_current_discharge(0.30, 2.80, 0))
            .unwrap();
        t.start().unwrap();
        let again = TestConfig::constant_current_discharge(0.50, 2.80, 0);
        assert!(matches!(
            t.configure(again),
            Err(ZkError::InvalidState { .. })
        ));
    }

    #[test]
    fn start_frame_carries_scaled_parameters() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        t.configure(TestConfig::constant_current_discharge(0.30, 2.80, 0))
            .unwrap();
        t.start().unwrap();

        let sent = mock.sent();
        assert_eq!(sent.len(), 2);
        // Set-params, then start, both for program 0.
        assert_eq!(sent[0][1], ACTION_SET_PARAMS);
        assert_eq!(sent[1][1], ACTION_START);
        // 0.30 A scales to raw 300 = 1*240 + 60.
        assert_eq!((sent[1][2], sent[1][3]), (1, 60));
        // 2.80 V scales to raw 280 = 1*240 + 40.
        assert_eq!((sent[1][4], sent[1][5]), (1, 40));
    }

    #[test]
    fn auto_start_uses_the_auto_action_and_pause() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        let config =
            TestConfig::charge(TestMode::ConstantVoltageCharge, 1.0, 2, 0).with_auto_cycle(10);
        t.configure(config).unwrap();
        t.start().unwrap();

        let sent = mock.sent();
        assert_eq!(sent[1][1], (7 << 4) | ACTION_START_AUTO);
        // The duration slot carries the pause while auto-cycling.
        assert_eq!((sent[1][6], sent[1][7]), (0, 10));
    }

    #[test]
    fn stop_is_always_accepted_and_lands_idle() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame());
        t.stop().unwrap();
        assert!(t.is_idle());

        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        t.configure(TestConfig::constant_current_discharge(1.0, 3.0, 0))
            .unwrap();
        t.start().unwrap();
        assert!(!t.is_idle());
        t.stop().unwrap();
        assert!(t.is_idle());
    }

    #[test]
    fn poll_decodes_a_discharge_status() {
        let (mut t, mock) = tester();
        mock.push_frame(testing_frame(0, 950));
        let status = t.poll().unwrap();
        assert_eq!(status.state, DeviceState::Discharging);
        assert_eq!(status.mode, Some(TestMode::ConstantCurrentDischarge));
        assert_eq!(status.current_a, 1.5);
        assert_eq!(status.voltage_v, 3.85);
        assert_eq!(status.capacity_mah, 950);
        assert_eq!(status.elapsed_minutes, 12);
        assert_eq!(status.energy_mwh, Some(950));
        assert_eq!(status.model, crate::types::DeviceModel::EbcA05);
    }

    #[test]
    fn poll_reports_charging_for_charge_programs() {
        let (mut t, mock) = tester();
        mock.push_frame(testing_frame(4, 200));
        let status = t.poll().unwrap();
        assert_eq!(status.state, DeviceState::Charging);
        assert_eq!(status.mode, Some(TestMode::ChargeLiPo));
    }

    #[test]
    fn idle_frames_report_off_with_no_energy() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame());
        let status = t.poll().unwrap();
        assert_eq!(status.state, DeviceState::Off);
        assert_eq!(status.energy_mwh, None);
        assert_eq!(status.mode, None);
    }

    #[test]
    fn auto_cycle_tracks_steps_and_yields_a_result() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        let config =
            TestConfig::charge(TestMode::ConstantVoltageCharge, 1.0, 2, 0).with_auto_cycle(5);
        t.configure(config).unwrap();
        t.start().unwrap();

        // Program 7 (CV) rides in the p1 echo of each auto frame.
        mock.push_frame(auto_frame(1, 7, 2000));
        mock.push_frame(auto_frame(2, 7, 1999));
        mock.push_frame(auto_frame(3, 7, 2000));
        mock.push_frame(idle_frame());

        assert_eq!(t.poll().unwrap().state, DeviceState::AutoStep(1));
        assert_eq!(t.poll().unwrap().state, DeviceState::AutoStep(2));
        assert_eq!(t.poll().unwrap().state, DeviceState::AutoStep(3));
        assert_eq!(t.poll().unwrap().state, DeviceState::Off);
        assert!(t.is_idle());

        let result = t.take_auto_result().expect("cycle result");
        assert_eq!(result.steps.len(), 3);
        assert_eq!(
            result.steps[0],
            AutoStep {
                step: 1,
                label: "CV".to_string(),
                capacity_mah: 2000
            }
        );
        assert_eq!(result.steps[1].capacity_mah, 1999);
        assert_eq!(result.steps[2].capacity_mah, 2000);
        // Taking the result is one-shot.
        assert!(t.take_auto_result().is_none());
    }

    #[test]
    fn repeated_frames_for_one_step_keep_the_latest_capacity() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        let config = TestConfig::charge(TestMode::ChargeLiPo, 1.0, 1, 0).with_auto_cycle(0);
        t.configure(config).unwrap();
        t.start().unwrap();

        mock.push_frame(auto_frame(1, 4, 100));
        mock.push_frame(auto_frame(1, 4, 250));
        mock.push_frame(idle_frame());
        t.poll().unwrap();
        t.poll().unwrap();
        t.poll().unwrap();

        let result = t.take_auto_result().expect("cycle result");
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].capacity_mah, 250);
        assert_eq!(result.steps[0].label, "LiPo");
    }

    #[test]
    fn stop_mid_cycle_finishes_the_partial_result() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        let config = TestConfig::charge(TestMode::ChargeLiPo, 1.0, 1, 0).with_auto_cycle(0);
        t.configure(config).unwrap();
        t.start().unwrap();
        mock.push_frame(auto_frame(1, 4, 480));
        t.poll().unwrap();

        mock.push_frame(idle_frame());
        t.stop().unwrap();
        assert!(t.is_idle());
        let result = t.take_auto_result().expect("partial cycle result");
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].capacity_mah, 480);
    }

    #[test]
    fn checksum_corruption_is_rejected_and_state_kept() {
        let (mut t, mock) = tester();
        mock.push_frame(testing_frame(0, 950));
        let before = t.poll().unwrap();

        let mut bad = testing_frame(0, 999);
        bad[7] ^= 0x01; // flip a capacity payload bit
        mock.push_frame(bad);
        assert!(matches!(t.poll(), Err(ZkError::Checksum { .. })));
        assert_eq!(t.last_status(), Some(&before));
        assert!(!t.is_idle());
    }

    #[test]
    fn timeout_leaves_the_session_usable() {
        let (mut t, mock) = tester();
        mock.push_timeout();
        assert!(matches!(t.poll(), Err(ZkError::Timeout)));
        mock.push_frame(idle_frame());
        assert!(t.poll().is_ok());
    }

    #[test]
    fn monitor_cutoff_needs_a_monitor_configuration() {
        let (mut t, mock) = tester();
        assert!(matches!(
            t.set_monitor_cutoff(0.05),
            Err(ZkError::InvalidState { .. })
        ));

        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        t.configure(TestConfig::monitor(0.0)).unwrap();
        t.set_monitor_cutoff(0.05).unwrap();
        assert_eq!(t.config().unwrap().cutoff_current_a, 0.05);

        let sent = mock.sent();
        let frame = sent.last().unwrap();
        assert_eq!(frame[1], ACTION_SET_PARAMS);
        // 0.05 A scales to raw 50.
        assert_eq!((frame[2], frame[3]), (0, 50));
    }

    #[test]
    fn resistance_measurement_divides_drop_by_current() {
        let (mut t, mock) = tester();
        // Drop of 50 mV at 300 mA is 166 mOhm.
        mock.push_frame(build_response(STATE_IDLE, 300, 3700, 50, 0, 0, 0, 0, MODEL));
        assert_eq!(t.measure_resistance(300).unwrap(), 166);
    }

    #[test]
    fn resistance_current_is_range_checked() {
        let (mut t, _mock) = tester();
        assert!(matches!(
            t.measure_resistance(0),
            Err(ZkError::InvalidParameter(_))
        ));
        assert!(matches!(
            t.measure_resistance(30_001),
            Err(ZkError::InvalidParameter(_))
        ));
    }

    #[test]
    fn current_calibration_requires_a_running_cc_discharge() {
        let (mut t, mock) = tester();
        assert!(matches!(
            t.calibrate_current(1.0, CalibrationPoint::Lower),
            Err(ZkError::InvalidState { .. })
        ));

        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        t.configure(TestConfig::constant_current_discharge(1.0, 2.8, 0))
            .unwrap();
        t.start().unwrap();
        t.calibrate_current(1.0, CalibrationPoint::Upper).unwrap();

        let sent = mock.sent();
        let frame = sent.last().unwrap();
        assert_eq!(frame[1], ACTION_CALIBRATE);
        // Selector 3 (current, upper) in the hi digit of p1 plus 1000/240.
        assert_eq!((frame[2], frame[3]), (3, 4));
        // Remainder 1000 % 240 = 40, pre-multiplied: 40*240 = 9600 = 40*240 + 0.
        assert_eq!((frame[4], frame[5]), (40, 0));
    }

    #[test]
    fn voltage_calibration_is_idle_only() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame());
        t.calibrate_voltage(4.2, CalibrationPoint::Lower).unwrap();
        let sent = mock.sent();
        assert_eq!(sent[0][1], ACTION_CALIBRATE);
        // 4200 = 17*240 + 120; lower voltage selector is 0.
        assert_eq!((sent[0][2], sent[0][3]), (0, 17));
    }

    #[test]
    fn init_state_counts_as_off() {
        let (mut t, mock) = tester();
        mock.push_frame(build_response(STATE_INIT * 10, 0, 0, 0, 0, 0, 0, 0, MODEL));
        let status = t.poll().unwrap();
        assert_eq!(status.state, DeviceState::Off);
    }

    #[test]
    fn connect_sends_link_on_without_reading() {
        let (mut t, mock) = tester();
        t.connect().unwrap();
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][1], ACTION_LINK_ON);
        // No queued reply was consumed.
        assert_eq!(mock.shared.borrow().replies.len(), 0);
    }

    #[test]
    fn unknown_program_code_is_rejected_without_mutation() {
        let (mut t, mock) = tester();
        mock.push_frame(idle_frame());
        mock.push_frame(idle_frame());
        t.configure(TestConfig::constant_current_discharge(1.0, 2.8, 0))
            .unwrap();
        t.start().unwrap();
        mock.push_frame(testing_frame(0, 500));
        let before = t.poll().unwrap();

        // Program 8 is not defined; the frame passes the checksum but
        // must still be rejected whole.
        mock.push_frame(testing_frame(8, 999));
        assert!(matches!(t.poll(), Err(ZkError::MalformedFrame(_))));
        assert_eq!(t.last_status(), Some(&before));
        assert!(!t.is_idle());
    }

    #[test]
    fn disconnect_sends_link_off_without_reading() {
        let (mut t, mock) = tester();
        t.disconnect().unwrap();
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][1], ACTION_LINK_OFF);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut t, mock) = tester();
        t.close().unwrap();
        t.close().unwrap();
        assert!(mock.shared.borrow().closed);
    }
}
