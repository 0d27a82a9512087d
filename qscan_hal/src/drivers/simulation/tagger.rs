//! Simulated TimeTagger.

use super::bench::SharedBench;
use parking_lot::Mutex;
use qscan_common::hal::driver::{
    CorrelationConfig, CounterMeasurement, HalError, HistogramConfig, PhotonCounter,
    bin_width_for_refresh_rate,
};
use std::sync::Arc;

/// Fluorescence lifetime used for histogram/correlation shapes, picoseconds.
const LIFETIME_PS: f64 = 12_000.0;

/// First channel number handed out by [`SimTagger::combiner`].
const FIRST_VIRTUAL_CHANNEL: i32 = 100;

/// Storage behind one simulated measurement.
#[derive(Debug)]
pub struct MeasurementBuffer {
    values: Vec<f64>,
    filled: usize,
    running: bool,
    fixed: Option<Vec<f64>>,
}

impl MeasurementBuffer {
    fn marker_gated(n_values: usize) -> Self {
        Self {
            values: vec![f64::NAN; n_values],
            filled: 0,
            running: false,
            fixed: None,
        }
    }

    fn fixed(values: Vec<f64>) -> Self {
        Self {
            values: vec![f64::NAN; values.len()],
            filled: 0,
            running: false,
            fixed: Some(values),
        }
    }

    /// Append per-pixel counts while running.
    pub(crate) fn record(&mut self, counts: &[f64]) {
        if !self.running {
            return;
        }
        for &count in counts {
            if self.filled >= self.values.len() {
                break;
            }
            self.values[self.filled] = count;
            self.filled += 1;
        }
    }
}

/// A measurement on the simulated counter.
pub struct SimMeasurement {
    buffer: Arc<Mutex<MeasurementBuffer>>,
}

impl CounterMeasurement for SimMeasurement {
    fn start(&mut self) -> Result<(), HalError> {
        let mut buffer = self.buffer.lock();
        buffer.running = true;
        if let Some(values) = buffer.fixed.clone() {
            buffer.filled = values.len();
            buffer.values = values;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HalError> {
        self.buffer.lock().running = false;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), HalError> {
        let mut buffer = self.buffer.lock();
        buffer.values.iter_mut().for_each(|v| *v = f64::NAN);
        buffer.filled = 0;
        Ok(())
    }

    fn ready(&self) -> bool {
        let buffer = self.buffer.lock();
        buffer.filled >= buffer.values.len()
    }

    fn data(&self) -> Result<Vec<f64>, HalError> {
        Ok(self.buffer.lock().values.clone())
    }
}

/// Simulated photon counter attached to the bench.
pub struct SimTagger {
    bench: SharedBench,
    next_virtual_channel: i32,
}

impl SimTagger {
    pub(crate) fn new(bench: SharedBench) -> Self {
        Self {
            bench,
            next_virtual_channel: FIRST_VIRTUAL_CHANNEL,
        }
    }

    fn fixed(values: Vec<f64>) -> Box<dyn CounterMeasurement> {
        Box::new(SimMeasurement {
            buffer: Arc::new(Mutex::new(MeasurementBuffer::fixed(values))),
        })
    }

    fn background_rate(&self) -> f64 {
        self.bench.lock().config.spectrum.background_rate
    }
}

fn require_channels(channels: &[i32]) -> Result<(), HalError> {
    if channels.is_empty() {
        return Err(HalError::ConfigError("no channels given".to_string()));
    }
    Ok(())
}

fn require_bins(bin_width_ps: u64, number_of_bins: usize) -> Result<(), HalError> {
    if bin_width_ps == 0 || number_of_bins == 0 {
        return Err(HalError::ConfigError(
            "bin width and bin count must be positive".to_string(),
        ));
    }
    Ok(())
}

impl PhotonCounter for SimTagger {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn combiner(&mut self, channels: &[i32]) -> Result<i32, HalError> {
        require_channels(channels)?;
        let channel = self.next_virtual_channel;
        self.next_virtual_channel += 1;
        Ok(channel)
    }

    fn count_between_markers(
        &mut self,
        click_channel: i32,
        begin_channel: i32,
        _end_channel: Option<i32>,
        n_values: usize,
    ) -> Result<Box<dyn CounterMeasurement>, HalError> {
        if n_values == 0 {
            return Err(HalError::ConfigError("n_values must be positive".to_string()));
        }
        if click_channel == begin_channel {
            return Err(HalError::ConfigError(format!(
                "click and marker channel are both {click_channel}"
            )));
        }
        let buffer = Arc::new(Mutex::new(MeasurementBuffer::marker_gated(n_values)));
        self.bench.lock().armed.push(Arc::downgrade(&buffer));
        Ok(Box::new(SimMeasurement { buffer }))
    }

    fn histogram(
        &mut self,
        config: &HistogramConfig,
    ) -> Result<Box<dyn CounterMeasurement>, HalError> {
        require_bins(config.bin_width_ps, config.number_of_bins)?;
        let peak = self.background_rate();
        let values = (0..config.number_of_bins)
            .map(|bin| {
                let t = (bin as u64 * config.bin_width_ps) as f64;
                (peak * (-t / LIFETIME_PS).exp()).round()
            })
            .collect();
        Ok(Self::fixed(values))
    }

    fn correlation(
        &mut self,
        config: &CorrelationConfig,
    ) -> Result<Box<dyn CounterMeasurement>, HalError> {
        require_bins(config.bin_width_ps, config.number_of_bins)?;
        let center = config.number_of_bins as f64 / 2.0;
        let values = (0..config.number_of_bins)
            .map(|bin| {
                let tau = (bin as f64 - center).abs() * config.bin_width_ps as f64;
                100.0 * (1.0 - (-tau / LIFETIME_PS).exp())
            })
            .collect();
        Ok(Self::fixed(values))
    }

    fn countrate(&mut self, channels: &[i32]) -> Result<Box<dyn CounterMeasurement>, HalError> {
        require_channels(channels)?;
        Ok(Self::fixed(vec![self.background_rate(); channels.len()]))
    }

    fn counter(
        &mut self,
        channels: &[i32],
        refresh_rate: f64,
        n_values: usize,
    ) -> Result<Box<dyn CounterMeasurement>, HalError> {
        require_channels(channels)?;
        let bin_width_ps = bin_width_for_refresh_rate(refresh_rate)?;
        require_bins(bin_width_ps, n_values)?;
        let per_bin = (self.background_rate() * bin_width_ps as f64 * 1e-12).round();
        Ok(Self::fixed(vec![per_bin; channels.len() * n_values]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::{SimulationConfig, bench::BenchState};

    fn tagger() -> (SimTagger, SharedBench) {
        let bench = Arc::new(Mutex::new(BenchState::new(SimulationConfig::default())));
        (SimTagger::new(Arc::clone(&bench)), bench)
    }

    #[test]
    fn count_between_markers_fills_only_while_running() {
        let (mut tagger, bench) = tagger();
        let mut measurement = tagger.count_between_markers(1, 8, None, 3).unwrap();
        bench.lock().clocked_buffer = Some(vec![vec![0.0, 0.0, 0.0]]);
        bench.lock().play_line(1000.0, 4);
        assert!(!measurement.ready());

        measurement.start().unwrap();
        bench.lock().clocked_buffer = Some(vec![vec![0.0, 0.0, 0.0]]);
        bench.lock().play_line(1000.0, 4);
        assert!(measurement.ready());
        assert_eq!(measurement.data().unwrap(), vec![52.0, 52.0, 52.0]);

        measurement.clear().unwrap();
        assert!(!measurement.ready());
        assert!(measurement.data().unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn dropped_measurements_are_pruned() {
        let (mut tagger, bench) = tagger();
        drop(tagger.count_between_markers(1, 8, None, 2).unwrap());
        bench.lock().clocked_buffer = Some(vec![vec![0.0, 0.0]]);
        bench.lock().play_line(1000.0, 3);
        assert!(bench.lock().armed.is_empty());
    }

    #[test]
    fn constructor_validation() {
        let (mut tagger, _) = tagger();
        assert!(tagger.count_between_markers(1, 8, None, 0).is_err());
        assert!(tagger.count_between_markers(8, 8, None, 4).is_err());
        assert!(tagger.combiner(&[]).is_err());
        assert_eq!(tagger.combiner(&[1, 2]).unwrap(), FIRST_VIRTUAL_CHANNEL);
        assert_eq!(tagger.combiner(&[1, 2]).unwrap(), FIRST_VIRTUAL_CHANNEL + 1);
        assert!(tagger.counter(&[1], 0.0, 10).is_err());
    }

    #[test]
    fn fixed_measurements_are_ready_after_start() {
        let (mut tagger, _) = tagger();
        let mut histogram = tagger
            .histogram(&HistogramConfig {
                channel: 1,
                trigger_channel: 2,
                bin_width_ps: 1000,
                number_of_bins: 50,
            })
            .unwrap();
        assert!(!histogram.ready());
        histogram.start().unwrap();
        assert!(histogram.ready());
        let data = histogram.data().unwrap();
        assert_eq!(data.len(), 50);
        assert!(data[0] > data[49]);

        let mut rate = tagger.countrate(&[1, 2]).unwrap();
        rate.start().unwrap();
        assert_eq!(rate.data().unwrap(), vec![2000.0, 2000.0]);

        let mut trace = tagger.counter(&[1], 1000.0, 5).unwrap();
        trace.start().unwrap();
        assert_eq!(trace.data().unwrap(), vec![2.0; 5]);

        let mut g2 = tagger
            .correlation(&CorrelationConfig {
                channel_start: 1,
                channel_stop: 2,
                bin_width_ps: 500,
                number_of_bins: 40,
            })
            .unwrap();
        g2.start().unwrap();
        let g2 = g2.data().unwrap();
        assert!(g2[20] < g2[0]);
    }
}
