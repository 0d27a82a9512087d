//! `ScannerInterfuse`: owner of every hardware task of one scanner.
//!
//! A scan line is one clocked hardware transaction:
//!
//! ```text
//! clock: stop -> finite(N+1)            [pixel clock: route clock -> PFI]
//! AO:    stop -> sample clock(N) -> write (no auto start)
//! AI:    stop -> sample clock(N)                              (optional)
//! TT:    close old -> count_between_markers(detector, marker, N) -> clear
//! start  AO -> AI -> counter -> clock ; wait(rw_timeout * 2 * N)
//! AI read/stop -> on demand ; clock stop ; AO stop -> on demand ; unroute
//! counts * clock_frequency  (NaN -> 0)
//! ```
//!
//! Any failure yields the `[[-1]]` line at the [`ScannerInterfuse::scan_line`]
//! boundary; [`ScannerInterfuse::try_scan_line`] exposes the typed error.

use crate::interfuse::tasks::TaskTable;
use crate::units::UnitConverter;
use qscan_common::consts::{CONTINUOUS_CLOCK_SAMPLES, DEFAULT_DUTY_CYCLE};
use qscan_common::hal::driver::HardwareBackend;
use qscan_common::hal::types::{SampleMode, TimingType};
use qscan_common::prelude::*;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const CLOCK_TASK_NAME: &str = "qscan-clock";
const OUTPUT_TASK_NAME: &str = "qscan-ao";
const INPUT_TASK_NAME: &str = "qscan-ai";

/// Polls of the counter after the clock finished, at most one clock period
/// apart and together no longer than one read/write timeout.
const COUNTER_READY_POLLS: u32 = 20;

/// Wait budget of one clocked line.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LineTimeouts {
    /// `rw_timeout * 2 * samples` for the clock to finish.
    clock: Duration,
    /// Pause between counter polls.
    poll_interval: Duration,
}

impl LineTimeouts {
    fn new(rw_timeout_s: f64, samples: usize, rate: f64) -> Result<Self, HalError> {
        let clock = seconds(rw_timeout_s * 2.0 * samples as f64)?;
        let poll_cap = seconds(rw_timeout_s)? / COUNTER_READY_POLLS;
        let poll_interval = Duration::try_from_secs_f64(1.0 / rate)
            .map_or(poll_cap, |period| period.min(poll_cap));
        Ok(Self {
            clock,
            poll_interval,
        })
    }
}

fn seconds(value: f64) -> Result<Duration, HalError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| HalError::ConfigError(format!("timeout of {value} s: {e}")))
}

/// Single owner of the clock, analog-output, analog-input and counter tasks.
pub struct ScannerInterfuse {
    config: ScannerConfig,
    tagger: TaggerConfig,
    daq: Box<dyn DaqDevice>,
    photon_counter: Box<dyn PhotonCounter>,
    units: UnitConverter,
    tasks: TaskTable,
    measurement: Option<Box<dyn CounterMeasurement>>,
    next_counter_id: u32,
    detector_channel: Option<i32>,
    marker_channel: i32,
    clock_channel: Option<String>,
    clock_frequency: f64,
    position: Vec<f64>,
    last_analog_data: Vec<f64>,
}

impl ScannerInterfuse {
    /// Validate the configuration and take ownership of a hardware backend.
    ///
    /// No task is created until [`ScannerInterfuse::activate`].
    pub fn new(
        config: ScannerConfig,
        tagger: TaggerConfig,
        backend: HardwareBackend,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        tagger.validate()?;

        let marker_channel = backend
            .counter
            .channel_code(&tagger.marker_channel)
            .ok_or_else(|| {
                ScanError::Configuration(format!(
                    "unknown marker channel '{}'",
                    tagger.marker_channel
                ))
            })?;
        let units = UnitConverter::new(
            config.position_ranges.clone(),
            config.voltage_ranges.clone(),
        )?;
        let position = config
            .position_ranges
            .iter()
            .map(|range| 0.0_f64.clamp(range.min, range.max))
            .collect();
        let clock_frequency = config.clock_frequency;

        Ok(Self {
            config,
            tagger,
            daq: backend.daq,
            photon_counter: backend.counter,
            units,
            tasks: TaskTable::new(),
            measurement: None,
            next_counter_id: 0,
            detector_channel: None,
            marker_channel,
            clock_channel: None,
            clock_frequency,
            position,
            last_analog_data: Vec::new(),
        })
    }

    // ─── Activation ─────────────────────────────────────────────────

    /// Resolve the detector channel, open the output (and input) task and
    /// drive the axes to the current position.
    pub fn activate(&mut self) -> Result<(), ScanError> {
        let codes = self
            .tagger
            .detector_channels
            .iter()
            .map(|name| {
                self.photon_counter.channel_code(name).ok_or_else(|| {
                    ScanError::Configuration(format!("unknown detector channel '{name}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let detector = match codes.as_slice() {
            [single] => *single,
            many => self.photon_counter.combiner(many)?,
        };
        self.detector_channel = Some(detector);

        let channels = self.config.ao_channels.clone();
        let ranges = self.config.voltage_ranges.clone();
        self.create_output_task(&channels, &ranges)?;

        if !self.config.ai_channels.is_empty() {
            let channels = self.config.ai_channels.clone();
            let ranges = self.config.ai_voltage_ranges.clone();
            self.create_ai_task(&channels, &ranges)?;
        }

        let target: Vec<Option<f64>> = self.position.iter().copied().map(Some).collect();
        self.set_position(&target)?;

        info!(
            "Scanner interfuse active on {} ({} axes, detector channel {}, marker channel {})",
            self.daq.name(),
            self.units.axes(),
            detector,
            self.marker_channel
        );
        Ok(())
    }

    /// Close every task and reset the card.
    pub fn deactivate(&mut self) -> Result<(), ScanError> {
        let closed = self.close_all_tasks();
        if let Err(e) = self.daq.reset_hardware() {
            warn!("Failed to reset {}: {}", self.daq.name(), e);
        }
        self.detector_channel = None;
        info!("Scanner interfuse deactivated");
        closed
    }

    /// Reopen the output (and input) task after a teardown closed them.
    ///
    /// Tasks that are still open are left alone.
    pub fn reopen_tasks(&mut self) -> Result<(), ScanError> {
        if self.tasks.handle(TaskKind::AnalogOutput).is_none() {
            let channels = self.config.ao_channels.clone();
            let ranges = self.config.voltage_ranges.clone();
            self.create_output_task(&channels, &ranges)?;
        }
        if !self.config.ai_channels.is_empty() && self.tasks.handle(TaskKind::AnalogInput).is_none()
        {
            let channels = self.config.ai_channels.clone();
            let ranges = self.config.ai_voltage_ranges.clone();
            self.create_ai_task(&channels, &ranges)?;
        }
        Ok(())
    }

    // ─── Task creation ──────────────────────────────────────────────

    /// Create the free-running scan clock.
    ///
    /// `channel` defaults to the configured clock channel.
    pub fn create_clock_task(
        &mut self,
        frequency: f64,
        channel: Option<&str>,
    ) -> Result<(), ScanError> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(ScanError::Configuration(format!(
                "clock frequency must be positive, got {frequency}"
            )));
        }
        let channel = channel.unwrap_or(self.config.clock_channel.as_str()).to_string();
        if channel.trim().is_empty() {
            return Err(ScanError::Configuration("clock channel not set".to_string()));
        }
        if let Some(open) = self.tasks.handle(TaskKind::Clock) {
            return Err(ScanError::Configuration(format!(
                "clock task {open} is still open; close it first"
            )));
        }

        let handle =
            self.daq
                .create_co_task(CLOCK_TASK_NAME, &channel, frequency, DEFAULT_DUTY_CYCLE)?;
        self.tasks.insert(TaskKind::Clock, handle)?;
        self.daq
            .cfg_implicit_timing(handle, SampleMode::Continuous, CONTINUOUS_CLOCK_SAMPLES)?;
        self.tasks.transition(TaskKind::Clock, TaskState::Configured)?;

        self.clock_frequency = frequency;
        self.clock_channel = Some(channel);
        debug!("Clock task {} created at {} Hz", handle, frequency);
        Ok(())
    }

    /// Create the analog-output task.
    pub fn create_output_task(
        &mut self,
        channels: &[String],
        voltage_ranges: &[ValueRange],
    ) -> Result<(), ScanError> {
        check_channel_ranges("analog output", channels, voltage_ranges)?;
        let handle = self
            .daq
            .create_ao_task(OUTPUT_TASK_NAME, channels, voltage_ranges)?;
        self.register(TaskKind::AnalogOutput, handle)
    }

    /// Create the analog-input task.
    pub fn create_ai_task(
        &mut self,
        channels: &[String],
        voltage_ranges: &[ValueRange],
    ) -> Result<(), ScanError> {
        check_channel_ranges("analog input", channels, voltage_ranges)?;
        let handle = self
            .daq
            .create_ai_task(INPUT_TASK_NAME, channels, voltage_ranges)?;
        self.register(TaskKind::AnalogInput, handle)
    }

    fn register(&mut self, kind: TaskKind, handle: TaskHandle) -> Result<(), ScanError> {
        if let Err(e) = self.tasks.insert(kind, handle) {
            // the device already created it; do not leak the task
            if let Err(close_err) = self.daq.close_task(handle) {
                warn!("Failed to release duplicate {} task: {}", kind, close_err);
            }
            return Err(e);
        }
        debug!("{} task {} created", kind, handle);
        Ok(())
    }

    // ─── Scan line ──────────────────────────────────────────────────

    /// Run one clocked line and return counts per second.
    ///
    /// Returns the `[[-1]]` line on any failure, after logging it.
    pub fn scan_line(&mut self, path: &LinePath, use_pixel_clock: bool) -> CountsArray {
        match self.try_scan_line(path, use_pixel_clock) {
            Ok(counts) => counts,
            Err(e) => {
                error!("Scan line of {} samples failed: {}", path.samples(), e);
                CountsArray::failure()
            }
        }
    }

    /// Run one clocked line.
    pub fn try_scan_line(
        &mut self,
        path: &LinePath,
        use_pixel_clock: bool,
    ) -> Result<CountsArray, ScanError> {
        let voltages = self.units.line_to_voltages(path)?;
        let samples = path.samples();
        let clock = self.tasks.require(TaskKind::Clock)?;
        let clock_channel = self
            .clock_channel
            .clone()
            .ok_or_else(|| ScanError::Configuration("clock channel not set".to_string()))?;

        self.daq.stop_task(clock)?;
        self.tasks.transition(TaskKind::Clock, TaskState::Stopped)?;
        self.daq
            .cfg_implicit_timing(clock, SampleMode::Finite, samples + 1)?;
        self.tasks.transition(TaskKind::Clock, TaskState::Configured)?;

        let route = if use_pixel_clock {
            let pfi = self.config.pixel_clock_channel.clone().ok_or_else(|| {
                ScanError::Configuration("pixel clock requested but not configured".to_string())
            })?;
            self.daq.connect_ctr_to_pfi(&clock_channel, &pfi)?;
            Some(pfi)
        } else {
            None
        };

        let result = self.run_clocked_line(clock, &clock_channel, &voltages, samples);

        if let Some(pfi) = route {
            if let Err(e) = self.daq.disconnect_ctr_to_pfi(&clock_channel, &pfi) {
                warn!("Failed to disconnect pixel clock {}: {}", pfi, e);
                if result.is_ok() {
                    return Err(e.into());
                }
            }
        }

        let counts = result?;
        for (axis, row) in path.rows().iter().enumerate() {
            if let (Some(slot), Some(&last)) = (self.position.get_mut(axis), row.last()) {
                *slot = last;
            }
        }
        Ok(CountsArray::from_line(counts))
    }

    fn run_clocked_line(
        &mut self,
        clock: TaskHandle,
        clock_channel: &str,
        voltages: &[Vec<f64>],
        samples: usize,
    ) -> Result<Vec<f64>, ScanError> {
        let ao = self.tasks.require(TaskKind::AnalogOutput)?;
        let source = format!("{clock_channel}InternalOutput");
        let rate = self.clock_frequency;
        let timeouts = LineTimeouts::new(self.config.read_write_timeout_s, samples, rate)?;

        self.daq.stop_task(ao)?;
        self.tasks.transition(TaskKind::AnalogOutput, TaskState::Stopped)?;
        self.daq.cfg_samp_clk_timing(ao, rate, &source, samples)?;
        self.tasks.transition(TaskKind::AnalogOutput, TaskState::Configured)?;
        self.daq.write_task(ao, voltages, false)?;

        let ai = self.tasks.handle(TaskKind::AnalogInput);
        if let Some(ai) = ai {
            self.daq.stop_task(ai)?;
            self.tasks.transition(TaskKind::AnalogInput, TaskState::Stopped)?;
            self.daq.cfg_samp_clk_timing(ai, rate, &source, samples)?;
            self.tasks.transition(TaskKind::AnalogInput, TaskState::Configured)?;
        }

        self.close_counter_task()?;
        let detector = self.detector_channel.ok_or_else(|| {
            ScanError::Configuration("scanner not activated: no detector channel".to_string())
        })?;
        let mut measurement = self.photon_counter.count_between_markers(
            detector,
            self.marker_channel,
            None,
            samples,
        )?;
        measurement.clear()?;
        self.next_counter_id += 1;
        self.tasks
            .insert(TaskKind::Counter, TaskHandle(self.next_counter_id))?;
        self.tasks.transition(TaskKind::Counter, TaskState::Configured)?;
        let measurement = self.measurement.insert(measurement);

        self.daq.start_task(ao)?;
        self.tasks.transition(TaskKind::AnalogOutput, TaskState::Running)?;
        if let Some(ai) = ai {
            self.daq.start_task(ai)?;
            self.tasks.transition(TaskKind::AnalogInput, TaskState::Running)?;
        }
        measurement.start()?;
        self.tasks.transition(TaskKind::Counter, TaskState::Running)?;
        self.daq.start_task(clock)?;
        self.tasks.transition(TaskKind::Clock, TaskState::Running)?;

        self.daq.wait_until_done(clock, timeouts.clock)?;

        if let Some(ai) = ai {
            self.last_analog_data = self.daq.read_task(ai, samples)?;
            self.daq.stop_task(ai)?;
            self.tasks.transition(TaskKind::AnalogInput, TaskState::Stopped)?;
            self.daq.set_timing_type(ai, TimingType::OnDemand)?;
            self.tasks.transition(TaskKind::AnalogInput, TaskState::Configured)?;
        }
        self.daq.stop_task(clock)?;
        self.tasks.transition(TaskKind::Clock, TaskState::Stopped)?;
        self.daq.stop_task(ao)?;
        self.tasks.transition(TaskKind::AnalogOutput, TaskState::Stopped)?;
        self.daq.set_timing_type(ao, TimingType::OnDemand)?;
        self.tasks.transition(TaskKind::AnalogOutput, TaskState::Configured)?;

        let measurement = self
            .measurement
            .as_mut()
            .ok_or_else(|| ScanError::Configuration("counter vanished".to_string()))?;
        let mut polls = 0;
        while !measurement.ready() {
            if polls >= COUNTER_READY_POLLS {
                return Err(HalError::Timeout(timeouts.poll_interval * COUNTER_READY_POLLS).into());
            }
            std::thread::sleep(timeouts.poll_interval);
            polls += 1;
        }
        let raw = measurement.data()?;
        measurement.stop()?;
        self.tasks.transition(TaskKind::Counter, TaskState::Stopped)?;

        if raw.len() != samples {
            return Err(HalError::CommunicationError(format!(
                "counter returned {} bins, expected {}",
                raw.len(),
                samples
            ))
            .into());
        }
        Ok(raw
            .into_iter()
            .map(|count| if count.is_nan() { 0.0 } else { count * rate })
            .collect())
    }

    // ─── Position ───────────────────────────────────────────────────

    /// Drive the axes to `target` with an on-demand write.
    ///
    /// `None` keeps an axis where it is. Every value is range checked before
    /// anything is written; nothing is written if one fails.
    pub fn set_position(&mut self, target: &[Option<f64>]) -> Result<(), ScanError> {
        if target.len() > self.units.axes() {
            return Err(ScanError::Configuration(format!(
                "{} positions given for {} axes",
                target.len(),
                self.units.axes()
            )));
        }
        let mut next = self.position.clone();
        for (axis, value) in target.iter().enumerate() {
            if let Some(value) = *value {
                self.units.check_position(axis, value)?;
                next[axis] = value;
            }
        }
        let voltages = next
            .iter()
            .enumerate()
            .map(|(axis, &p)| self.units.position_to_voltage(axis, p).map(|v| vec![v]))
            .collect::<Result<Vec<_>, _>>()?;

        let ao = self.tasks.require(TaskKind::AnalogOutput)?;
        self.daq.write_task(ao, &voltages, true)?;
        self.tasks.transition(TaskKind::AnalogOutput, TaskState::Running)?;
        self.position = next;
        Ok(())
    }

    /// Last commanded position per axis.
    pub fn position(&self) -> &[f64] {
        &self.position
    }

    /// Axis labels, one per analog-output channel.
    pub fn scanner_axes(&self) -> Vec<&'static str> {
        SCANNER_AXIS_NAMES[..self.units.axes()].to_vec()
    }

    /// Position range per axis.
    pub fn position_ranges(&self) -> &[ValueRange] {
        self.units.position_ranges()
    }

    /// Replace the position calibration.
    pub fn set_position_ranges(&mut self, ranges: Vec<ValueRange>) -> Result<(), ScanError> {
        self.check_axis_count("position", ranges.len())?;
        self.units = UnitConverter::new(ranges, self.units.voltage_ranges().to_vec())?;
        Ok(())
    }

    /// Voltage range per axis.
    pub fn voltage_ranges(&self) -> &[ValueRange] {
        self.units.voltage_ranges()
    }

    /// Replace the voltage calibration.
    pub fn set_voltage_ranges(&mut self, ranges: Vec<ValueRange>) -> Result<(), ScanError> {
        self.check_axis_count("voltage", ranges.len())?;
        self.units = UnitConverter::new(self.units.position_ranges().to_vec(), ranges)?;
        Ok(())
    }

    fn check_axis_count(&self, what: &str, given: usize) -> Result<(), ScanError> {
        if given != self.units.axes() {
            return Err(ScanError::Configuration(format!(
                "{given} {what} ranges given for {} axes",
                self.units.axes()
            )));
        }
        Ok(())
    }

    // ─── Teardown ───────────────────────────────────────────────────

    /// Close the clock task. No-op when already closed.
    pub fn close_clock_task(&mut self) -> Result<(), ScanError> {
        self.clock_channel = None;
        self.close_daq_task(TaskKind::Clock)
    }

    /// Close the analog-output task. No-op when already closed.
    pub fn close_output_task(&mut self) -> Result<(), ScanError> {
        self.close_daq_task(TaskKind::AnalogOutput)
    }

    /// Close the analog-input task. No-op when already closed.
    pub fn close_ai_task(&mut self) -> Result<(), ScanError> {
        self.close_daq_task(TaskKind::AnalogInput)
    }

    /// Stop and drop the counter measurement. No-op when already closed.
    pub fn close_counter_task(&mut self) -> Result<(), ScanError> {
        self.tasks.remove(TaskKind::Counter);
        let Some(mut measurement) = self.measurement.take() else {
            return Ok(());
        };
        let stopped = measurement.stop();
        let cleared = measurement.clear();
        stopped.and(cleared).map_err(|e| {
            warn!("Failed to close counter measurement: {}", e);
            ScanError::from(e)
        })
    }

    /// Close every task, continuing past failures. Returns the first failure.
    pub fn close_all_tasks(&mut self) -> Result<(), ScanError> {
        let results = [
            self.close_clock_task(),
            self.close_ai_task(),
            self.close_counter_task(),
            self.close_output_task(),
        ];
        results.into_iter().collect::<Result<Vec<()>, _>>().map(|_| ())
    }

    fn close_daq_task(&mut self, kind: TaskKind) -> Result<(), ScanError> {
        let Some(handle) = self.tasks.remove(kind) else {
            return Ok(());
        };
        if let Err(e) = self.daq.stop_task(handle) {
            warn!("Failed to stop {} task {}: {}", kind, handle, e);
        }
        self.daq.close_task(handle).map_err(|e| {
            error!("Failed to close {} task {}: {}", kind, handle, e);
            ScanError::from(e)
        })?;
        debug!("{} task {} closed", kind, handle);
        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────────

    /// Lifecycle state of one task kind.
    pub fn task_state(&self, kind: TaskKind) -> TaskState {
        self.tasks.state(kind)
    }

    /// Lifecycle state of every task kind.
    pub fn task_states(&self) -> Vec<(TaskKind, TaskState)> {
        self.tasks.states()
    }

    /// Frequency of the current (or last) clock task.
    pub fn clock_frequency(&self) -> f64 {
        self.clock_frequency
    }

    /// Analog-input samples of the last line, channels concatenated.
    pub fn last_analog_data(&self) -> &[f64] {
        &self.last_analog_data
    }

    /// Static scanner configuration.
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }
}

fn check_channel_ranges(
    what: &str,
    channels: &[String],
    voltage_ranges: &[ValueRange],
) -> Result<(), ScanError> {
    if channels.is_empty() {
        return Err(ScanError::Configuration(format!("no {what} channels")));
    }
    if channels.len() != voltage_ranges.len() {
        return Err(ScanError::Configuration(format!(
            "{} {what} channels but {} voltage ranges",
            channels.len(),
            voltage_ranges.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::{self, SimulationConfig, SimulationHandle};

    fn scanner_config() -> ScannerConfig {
        ScannerConfig {
            read_write_timeout_s: 10.0,
            ao_channels: vec!["/Dev1/AO0".into(), "/Dev1/AO1".into()],
            voltage_ranges: vec![ValueRange::new(-10.0, 10.0), ValueRange::new(-4.0, 4.0)],
            position_ranges: vec![ValueRange::new(0.0, 100.0), ValueRange::new(-40.0, 40.0)],
            clock_channel: "/Dev1/Ctr2".into(),
            clock_frequency: 1000.0,
            pixel_clock_channel: Some("/Dev1/PFI6".into()),
            ai_channels: vec![],
            ai_voltage_ranges: vec![],
        }
    }

    fn tagger_config() -> TaggerConfig {
        TaggerConfig {
            detector_channels: vec!["one".into(), "two".into()],
            marker_channel: "eight".into(),
        }
    }

    fn interfuse_with(config: ScannerConfig) -> (ScannerInterfuse, SimulationHandle) {
        let (backend, handle) = simulation::create(SimulationConfig::default());
        let mut scanner = ScannerInterfuse::new(config, tagger_config(), backend).unwrap();
        scanner.activate().unwrap();
        (scanner, handle)
    }

    fn line(samples: usize) -> LinePath {
        let ramp: Vec<f64> = (0..samples)
            .map(|i| -20.0 + 40.0 * i as f64 / (samples - 1) as f64)
            .collect();
        LinePath::from_ramp(1, &ramp, &[50.0, 0.0]).unwrap()
    }

    #[test]
    fn activation_opens_output_only() {
        let (scanner, handle) = interfuse_with(scanner_config());
        assert_eq!(scanner.task_state(TaskKind::AnalogOutput), TaskState::Running);
        assert_eq!(scanner.task_state(TaskKind::Clock), TaskState::Closed);
        assert_eq!(scanner.task_state(TaskKind::AnalogInput), TaskState::Closed);
        assert_eq!(scanner.scanner_axes(), vec!["x", "y"]);
        // 0 clamped into [0, 100] on x, 0 on y
        assert_eq!(handle.output_voltages(), vec![-10.0, 0.0]);
    }

    #[test]
    fn clock_task_rejects_bad_frequency_and_double_open() {
        let (mut scanner, _) = interfuse_with(scanner_config());
        assert!(matches!(
            scanner.create_clock_task(0.0, None),
            Err(ScanError::Configuration(_))
        ));
        assert!(matches!(
            scanner.create_clock_task(f64::NAN, None),
            Err(ScanError::Configuration(_))
        ));
        scanner.create_clock_task(500.0, None).unwrap();
        assert_eq!(scanner.task_state(TaskKind::Clock), TaskState::Configured);
        assert!(scanner.create_clock_task(500.0, None).is_err());
        scanner.close_clock_task().unwrap();
        scanner.create_clock_task(800.0, Some("/Dev1/Ctr3")).unwrap();
        assert_eq!(scanner.clock_frequency(), 800.0);
    }

    #[test]
    fn output_task_requires_matching_ranges() {
        let (mut scanner, _) = interfuse_with(scanner_config());
        scanner.close_output_task().unwrap();
        let err = scanner
            .create_output_task(&["/Dev1/AO0".into()], &[])
            .unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn scan_line_returns_rates_and_restores_on_demand() {
        let (mut scanner, handle) = interfuse_with(scanner_config());
        scanner.create_clock_task(1000.0, None).unwrap();

        let counts = scanner.scan_line(&line(50), true);
        assert!(!counts.is_failure());
        assert_eq!(counts.shape(), (1, 50));
        assert!(counts.line().iter().all(|&rate| rate >= 0.0));
        assert_eq!(handle.lines_played(), 1);
        assert!(handle.active_routes().is_empty());
        assert_eq!(scanner.task_state(TaskKind::Clock), TaskState::Stopped);
        assert_eq!(scanner.task_state(TaskKind::AnalogOutput), TaskState::Configured);
        assert_eq!(scanner.task_state(TaskKind::Counter), TaskState::Stopped);
        assert_eq!(scanner.position()[1], 20.0);
    }

    #[test]
    fn scan_line_peak_is_visible() {
        let (mut scanner, _) = interfuse_with(scanner_config());
        scanner.create_clock_task(1000.0, None).unwrap();
        let counts = scanner.scan_line(&line(101), true).into_line();
        // default spectrum line sits at 0 V, the middle of the y sweep
        let peak = counts
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((45..=55).contains(&peak), "peak at {peak}");
    }

    #[test]
    fn hardware_failure_yields_sentinel_and_unroutes() {
        let (mut scanner, handle) = interfuse_with(scanner_config());
        scanner.create_clock_task(1000.0, None).unwrap();
        handle.inject_timeouts(1);

        let counts = scanner.scan_line(&line(20), true);
        assert!(counts.is_failure());
        assert!(handle.active_routes().is_empty());

        // next line recovers
        let counts = scanner.scan_line(&line(20), true);
        assert_eq!(counts.shape(), (1, 20));
    }

    #[test]
    fn missing_counts_time_out() {
        let (mut scanner, handle) = interfuse_with(scanner_config());
        scanner.create_clock_task(5000.0, None).unwrap();
        handle.inject_missing_counts(1);
        let err = scanner.try_scan_line(&line(10), true).unwrap_err();
        assert!(matches!(err, ScanError::HardwareIo(HalError::Timeout(_))));
    }

    #[test]
    fn line_timeouts_are_bounded() {
        let timeouts = LineTimeouts::new(10.0, 100, 1000.0).unwrap();
        assert_eq!(timeouts.clock, Duration::from_secs(2000));
        assert!((timeouts.poll_interval.as_secs_f64() - 1e-3).abs() < 1e-9);

        // slow clock: every poll together stays within one read/write timeout
        let timeouts = LineTimeouts::new(10.0, 100, 0.05).unwrap();
        assert_eq!(timeouts.poll_interval * COUNTER_READY_POLLS, Duration::from_secs(10));

        // clock period too long for a Duration
        let timeouts = LineTimeouts::new(10.0, 10, 1e-300).unwrap();
        assert_eq!(timeouts.poll_interval, Duration::from_millis(500));

        assert!(matches!(
            LineTimeouts::new(1e18, 1000, 1000.0),
            Err(HalError::ConfigError(_))
        ));
    }

    #[test]
    fn scan_line_without_clock_fails() {
        let (mut scanner, _) = interfuse_with(scanner_config());
        assert!(scanner.scan_line(&line(10), false).is_failure());
    }

    #[test]
    fn pixel_clock_requires_configuration() {
        let mut config = scanner_config();
        config.pixel_clock_channel = None;
        let (mut scanner, _) = interfuse_with(config);
        scanner.create_clock_task(1000.0, None).unwrap();
        assert!(scanner.scan_line(&line(10), true).is_failure());
        assert!(!scanner.scan_line(&line(10), false).is_failure());
    }

    #[test]
    fn analog_input_is_sampled() {
        let mut config = scanner_config();
        config.ai_channels = vec!["/Dev1/AI0".into()];
        config.ai_voltage_ranges = vec![ValueRange::new(-10.0, 10.0)];
        let (mut scanner, _) = interfuse_with(config);
        assert_eq!(scanner.task_state(TaskKind::AnalogInput), TaskState::Created);
        scanner.create_clock_task(1000.0, None).unwrap();
        assert!(!scanner.scan_line(&line(30), false).is_failure());
        assert_eq!(scanner.last_analog_data().len(), 30);
        assert_eq!(scanner.task_state(TaskKind::AnalogInput), TaskState::Configured);
    }

    #[test]
    fn set_position_checks_before_writing() {
        let (mut scanner, handle) = interfuse_with(scanner_config());
        scanner.set_position(&[Some(100.0), Some(40.0)]).unwrap();
        assert_eq!(handle.output_voltages(), vec![10.0, 4.0]);

        let err = scanner.set_position(&[Some(10.0), Some(41.0)]).unwrap_err();
        assert!(matches!(err, ScanError::Range { axis: 1, .. }));
        // nothing written, x untouched
        assert_eq!(handle.output_voltages(), vec![10.0, 4.0]);
        assert_eq!(scanner.position(), &[100.0, 40.0]);

        scanner.set_position(&[None, Some(0.0)]).unwrap();
        assert_eq!(scanner.position(), &[100.0, 0.0]);
        assert!(scanner.set_position(&[None, None, Some(1.0)]).is_err());
    }

    #[test]
    fn range_setters_validate() {
        let (mut scanner, _) = interfuse_with(scanner_config());
        assert!(
            scanner
                .set_position_ranges(vec![ValueRange::new(0.0, 1.0)])
                .is_err()
        );
        assert!(
            scanner
                .set_voltage_ranges(vec![ValueRange::new(1.0, 0.0), ValueRange::new(0.0, 1.0)])
                .is_err()
        );
        scanner
            .set_position_ranges(vec![ValueRange::new(0.0, 10.0), ValueRange::new(0.0, 10.0)])
            .unwrap();
        assert_eq!(scanner.position_ranges()[0], ValueRange::new(0.0, 10.0));
    }

    #[test]
    fn close_is_idempotent_and_total() {
        let (mut scanner, _) = interfuse_with(scanner_config());
        scanner.create_clock_task(1000.0, None).unwrap();
        assert!(!scanner.scan_line(&line(10), true).is_failure());

        scanner.close_all_tasks().unwrap();
        assert!(
            scanner
                .task_states()
                .iter()
                .all(|(_, state)| *state == TaskState::Closed)
        );
        scanner.close_clock_task().unwrap();
        scanner.close_counter_task().unwrap();
        scanner.close_all_tasks().unwrap();
        scanner.deactivate().unwrap();
    }

    #[test]
    fn reopen_after_teardown() {
        let (mut scanner, handle) = interfuse_with(scanner_config());
        scanner.close_all_tasks().unwrap();
        assert!(scanner.set_position(&[Some(10.0)]).is_err());

        scanner.reopen_tasks().unwrap();
        assert_eq!(scanner.task_state(TaskKind::AnalogOutput), TaskState::Created);
        scanner.set_position(&[Some(100.0)]).unwrap();
        assert_eq!(handle.output_voltages()[0], 10.0);
        // already open: nothing to do
        scanner.reopen_tasks().unwrap();
    }
}
