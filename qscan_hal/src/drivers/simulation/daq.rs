//! Simulated NI X-series card.

use super::bench::{SharedBench, take_fault};
use qscan_common::hal::driver::{DaqDevice, HalError};
use qscan_common::hal::types::{SampleMode, TaskHandle, TimingType, ValueRange};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug)]
enum SimTaskKind {
    CounterOutput { frequency: f64 },
    AnalogOutput { ranges: Vec<ValueRange> },
    AnalogInput { channels: usize },
}

#[derive(Debug)]
struct SimTask {
    name: String,
    kind: SimTaskKind,
    timing: TimingType,
    mode: SampleMode,
    samples: usize,
    running: bool,
    /// Simulated duration of the last finite run, seconds.
    last_run: Option<f64>,
}

/// Simulated DAQ card.
pub struct SimDaq {
    bench: SharedBench,
    tasks: HashMap<TaskHandle, SimTask>,
    next_id: u32,
}

impl SimDaq {
    pub(crate) fn new(bench: SharedBench) -> Self {
        Self {
            bench,
            tasks: HashMap::new(),
            next_id: 1,
        }
    }

    fn add_task(&mut self, name: &str, kind: SimTaskKind) -> Result<TaskHandle, HalError> {
        if self.tasks.values().any(|task| task.name == name) {
            return Err(HalError::ConfigError(format!(
                "task name '{name}' already in use"
            )));
        }
        let handle = TaskHandle(self.next_id);
        self.next_id += 1;
        self.tasks.insert(
            handle,
            SimTask {
                name: name.to_string(),
                kind,
                timing: TimingType::OnDemand,
                mode: SampleMode::Finite,
                samples: 1,
                running: false,
                last_run: None,
            },
        );
        trace!("Simulated task '{}' created as {}", name, handle);
        Ok(handle)
    }

    fn task(&mut self, handle: TaskHandle) -> Result<&mut SimTask, HalError> {
        self.tasks
            .get_mut(&handle)
            .ok_or(HalError::InvalidTask(handle))
    }
}

fn check_analog_channels(channels: &[String], ranges: &[ValueRange]) -> Result<(), HalError> {
    if channels.is_empty() || channels.len() != ranges.len() {
        return Err(HalError::ConfigError(format!(
            "{} channels with {} voltage ranges",
            channels.len(),
            ranges.len()
        )));
    }
    Ok(())
}

impl DaqDevice for SimDaq {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn create_co_task(
        &mut self,
        task_name: &str,
        channel: &str,
        frequency: f64,
        duty_cycle: f64,
    ) -> Result<TaskHandle, HalError> {
        if channel.is_empty() || !(frequency > 0.0) || !(0.0..=1.0).contains(&duty_cycle) {
            return Err(HalError::ConfigError(format!(
                "invalid pulse train on '{channel}': {frequency} Hz, duty {duty_cycle}"
            )));
        }
        self.add_task(task_name, SimTaskKind::CounterOutput { frequency })
    }

    fn create_ao_task(
        &mut self,
        task_name: &str,
        channels: &[String],
        voltage_ranges: &[ValueRange],
    ) -> Result<TaskHandle, HalError> {
        check_analog_channels(channels, voltage_ranges)?;
        self.add_task(
            task_name,
            SimTaskKind::AnalogOutput {
                ranges: voltage_ranges.to_vec(),
            },
        )
    }

    fn create_ai_task(
        &mut self,
        task_name: &str,
        channels: &[String],
        voltage_ranges: &[ValueRange],
    ) -> Result<TaskHandle, HalError> {
        check_analog_channels(channels, voltage_ranges)?;
        self.add_task(
            task_name,
            SimTaskKind::AnalogInput {
                channels: channels.len(),
            },
        )
    }

    fn write_task(
        &mut self,
        task: TaskHandle,
        data: &[Vec<f64>],
        auto_start: bool,
    ) -> Result<(), HalError> {
        let bench = self.bench.clone();
        let sim = self.task(task)?;
        let SimTaskKind::AnalogOutput { ranges } = &sim.kind else {
            return Err(HalError::ConfigError(format!(
                "{task} is not an analog output task"
            )));
        };
        if data.len() != ranges.len() {
            return Err(HalError::CommunicationError(format!(
                "{} rows written to {} channels",
                data.len(),
                ranges.len()
            )));
        }
        for (row, range) in data.iter().zip(ranges) {
            if row.is_empty() || row.len() != data[0].len() {
                return Err(HalError::CommunicationError(
                    "ragged or empty write buffer".to_string(),
                ));
            }
            if let Some(&bad) = row.iter().find(|&&v| !range.contains(v)) {
                return Err(HalError::CommunicationError(format!(
                    "{bad} V outside {range}"
                )));
            }
        }

        let mut bench = bench.lock();
        if sim.timing == TimingType::SampleClock && !auto_start {
            if take_fault(&mut bench.faults.write_failures) {
                return Err(HalError::CommunicationError(
                    "simulated buffer write failure".to_string(),
                ));
            }
            bench.clocked_buffer = Some(data.to_vec());
        } else {
            bench.output_voltages = data.iter().filter_map(|row| row.last().copied()).collect();
            if auto_start {
                sim.running = true;
            }
        }
        Ok(())
    }

    fn read_task(&mut self, task: TaskHandle, samples: usize) -> Result<Vec<f64>, HalError> {
        let bench = self.bench.clone();
        let sim = self.task(task)?;
        let SimTaskKind::AnalogInput { channels } = sim.kind else {
            return Err(HalError::ConfigError(format!(
                "{task} is not an analog input task"
            )));
        };
        // loopback of the scanned output
        let line = bench.lock().last_line.clone();
        let per_channel: Vec<f64> = (0..samples)
            .map(|i| line.get(i).copied().unwrap_or(0.0))
            .collect();
        Ok(per_channel.repeat(channels))
    }

    fn cfg_samp_clk_timing(
        &mut self,
        task: TaskHandle,
        rate: f64,
        source: &str,
        samples_per_channel: usize,
    ) -> Result<(), HalError> {
        let sim = self.task(task)?;
        if matches!(sim.kind, SimTaskKind::CounterOutput { .. }) {
            return Err(HalError::ConfigError(
                "counter output uses implicit timing".to_string(),
            ));
        }
        if !(rate > 0.0) || source.is_empty() || samples_per_channel == 0 {
            return Err(HalError::ConfigError(format!(
                "invalid sample clock: {rate} Hz from '{source}', {samples_per_channel} samples"
            )));
        }
        sim.timing = TimingType::SampleClock;
        sim.mode = SampleMode::Finite;
        sim.samples = samples_per_channel;
        Ok(())
    }

    fn cfg_implicit_timing(
        &mut self,
        task: TaskHandle,
        mode: SampleMode,
        samples_per_channel: usize,
    ) -> Result<(), HalError> {
        let sim = self.task(task)?;
        if !matches!(sim.kind, SimTaskKind::CounterOutput { .. }) || samples_per_channel == 0 {
            return Err(HalError::ConfigError(format!(
                "implicit timing not applicable to {task}"
            )));
        }
        sim.timing = TimingType::Implicit;
        sim.mode = mode;
        sim.samples = samples_per_channel;
        Ok(())
    }

    fn set_timing_type(&mut self, task: TaskHandle, timing: TimingType) -> Result<(), HalError> {
        self.task(task)?.timing = timing;
        Ok(())
    }

    fn connect_ctr_to_pfi(&mut self, counter_channel: &str, pfi: &str) -> Result<(), HalError> {
        let mut bench = self.bench.lock();
        let route = (counter_channel.to_string(), pfi.to_string());
        if !bench.routes.contains(&route) {
            bench.routes.push(route);
        }
        Ok(())
    }

    fn disconnect_ctr_to_pfi(&mut self, counter_channel: &str, pfi: &str) -> Result<(), HalError> {
        let mut bench = self.bench.lock();
        let before = bench.routes.len();
        bench
            .routes
            .retain(|(ctr, line)| !(ctr == counter_channel && line == pfi));
        if bench.routes.len() == before {
            return Err(HalError::CommunicationError(format!(
                "no route {counter_channel} -> {pfi}"
            )));
        }
        Ok(())
    }

    fn start_task(&mut self, task: TaskHandle) -> Result<(), HalError> {
        let bench = self.bench.clone();
        let sim = self.task(task)?;
        sim.running = true;
        sim.last_run = None;
        if let SimTaskKind::CounterOutput { frequency } = sim.kind {
            if sim.mode == SampleMode::Finite {
                bench.lock().play_line(frequency, sim.samples);
                sim.last_run = Some(sim.samples as f64 / frequency);
                debug!("Simulated {} clock edges at {} Hz", sim.samples, frequency);
            }
        }
        Ok(())
    }

    fn stop_task(&mut self, task: TaskHandle) -> Result<(), HalError> {
        self.task(task)?.running = false;
        Ok(())
    }

    fn close_task(&mut self, task: TaskHandle) -> Result<(), HalError> {
        self.tasks
            .remove(&task)
            .map(|_| ())
            .ok_or(HalError::InvalidTask(task))
    }

    fn wait_until_done(&mut self, task: TaskHandle, timeout: Duration) -> Result<(), HalError> {
        let bench = self.bench.clone();
        let sim = self.task(task)?;
        let realtime = {
            let mut bench = bench.lock();
            if take_fault(&mut bench.faults.timeouts) {
                return Err(HalError::Timeout(timeout));
            }
            bench.config.realtime
        };
        match sim.last_run {
            Some(duration) if duration <= timeout.as_secs_f64() => {
                if realtime {
                    std::thread::sleep(Duration::from_secs_f64(duration));
                }
                sim.running = false;
                Ok(())
            }
            _ => Err(HalError::Timeout(timeout)),
        }
    }

    fn reset_hardware(&mut self) -> Result<(), HalError> {
        self.tasks.clear();
        let mut bench = self.bench.lock();
        bench.routes.clear();
        bench.clocked_buffer = None;
        debug!("Simulated card reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::{SimulationConfig, bench::BenchState};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn daq() -> SimDaq {
        SimDaq::new(Arc::new(Mutex::new(BenchState::new(
            SimulationConfig::default(),
        ))))
    }

    fn ao(daq: &mut SimDaq) -> TaskHandle {
        daq.create_ao_task(
            "ao",
            &["/Dev1/AO0".to_string()],
            &[ValueRange::new(-1.0, 1.0)],
        )
        .unwrap()
    }

    #[test]
    fn task_names_are_unique_until_closed() {
        let mut daq = daq();
        let first = ao(&mut daq);
        assert!(
            daq.create_ao_task("ao", &["/Dev1/AO1".to_string()], &[ValueRange::new(0.0, 1.0)])
                .is_err()
        );
        daq.close_task(first).unwrap();
        assert!(matches!(
            daq.close_task(first),
            Err(HalError::InvalidTask(_))
        ));
        ao(&mut daq);
    }

    #[test]
    fn writes_are_range_checked() {
        let mut daq = daq();
        let task = ao(&mut daq);
        assert!(daq.write_task(task, &[vec![1.5]], true).is_err());
        daq.write_task(task, &[vec![0.5]], true).unwrap();
        assert_eq!(daq.bench.lock().output_voltages, vec![0.5]);
    }

    #[test]
    fn finite_clock_plays_buffer_and_times_out_when_too_slow() {
        let mut daq = daq();
        let out = ao(&mut daq);
        let clock = daq.create_co_task("clock", "/Dev1/Ctr0", 100.0, 0.5).unwrap();

        daq.cfg_samp_clk_timing(out, 100.0, "/Dev1/Ctr0InternalOutput", 3)
            .unwrap();
        daq.write_task(out, &[vec![0.0, 0.1, 0.2]], false).unwrap();
        daq.cfg_implicit_timing(clock, SampleMode::Finite, 4).unwrap();
        daq.start_task(clock).unwrap();
        assert_eq!(daq.bench.lock().lines_played, 1);
        assert_eq!(daq.bench.lock().output_voltages, vec![0.2]);

        // 4 edges at 100 Hz take 40 ms
        assert!(daq.wait_until_done(clock, Duration::from_millis(10)).is_err());
        daq.start_task(clock).unwrap();
        daq.wait_until_done(clock, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn continuous_clock_never_completes() {
        let mut daq = daq();
        let clock = daq.create_co_task("clock", "/Dev1/Ctr0", 100.0, 0.5).unwrap();
        daq.cfg_implicit_timing(clock, SampleMode::Continuous, 10_000)
            .unwrap();
        daq.start_task(clock).unwrap();
        assert!(matches!(
            daq.wait_until_done(clock, Duration::from_secs(1)),
            Err(HalError::Timeout(_))
        ));
    }

    #[test]
    fn routes_must_exist_to_disconnect() {
        let mut daq = daq();
        daq.connect_ctr_to_pfi("/Dev1/Ctr0", "/Dev1/PFI6").unwrap();
        daq.disconnect_ctr_to_pfi("/Dev1/Ctr0", "/Dev1/PFI6").unwrap();
        assert!(daq.disconnect_ctr_to_pfi("/Dev1/Ctr0", "/Dev1/PFI6").is_err());
    }

    #[test]
    fn injected_write_failure_hits_clocked_write_only() {
        let mut daq = daq();
        let out = ao(&mut daq);
        daq.bench.lock().faults.write_failures = 1;
        daq.write_task(out, &[vec![0.0]], true).unwrap();
        daq.cfg_samp_clk_timing(out, 10.0, "src", 1).unwrap();
        assert!(daq.write_task(out, &[vec![0.0]], false).is_err());
        daq.write_task(out, &[vec![0.0]], false).unwrap();
    }
}
