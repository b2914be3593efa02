use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{AudioConfig, Result};

/// Byte written to the time-domain buffer for a zero sample.
pub const SILENCE: u8 = 128;

/// Frequency analyser producing byte spectra for visual consumption.
///
/// Keeps the most recent `fft_size` samples. Every [`update`](Self::update)
/// windows them with a Blackman window, transforms them, smooths the
/// magnitudes over time and maps the decibel range onto `0..=255`. Bin `k`
/// covers the frequency `k * sample_rate / fft_size`.
pub struct FrequencyAnalyser {
    config: AudioConfig,
    history: Vec<f32>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    frequency_bytes: Vec<u8>,
    time_bytes: Vec<u8>,
    processed_samples: u64,
    fft: FftResources,
}

impl FrequencyAnalyser {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        config.validate()?;
        let size = config.fft_size;
        let bins = size / 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);

        Ok(Self {
            config: config.clone(),
            history: vec![0.0; size],
            window: (0..size).map(|index| blackman_value(index, size)).collect(),
            smoothed: vec![0.0; bins],
            frequency_bytes: vec![0; bins],
            time_bytes: vec![SILENCE; size],
            processed_samples: 0,
            fft: FftResources {
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            },
        })
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    /// Number of frequency bins, half the FFT size.
    pub fn bin_count(&self) -> usize {
        self.frequency_bytes.len()
    }

    pub fn processed_samples(&self) -> u64 {
        self.processed_samples
    }

    /// Appends samples to the analysis window, discarding the oldest ones.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let size = self.history.len();
        if samples.len() >= size {
            self.history
                .copy_from_slice(&samples[samples.len() - size..]);
        } else {
            self.history.copy_within(samples.len().., 0);
            self.history[size - samples.len()..].copy_from_slice(samples);
        }
        self.processed_samples += samples.len() as u64;
    }

    /// Recomputes the frequency and time-domain buffers from the current
    /// window.
    pub fn update(&mut self) -> Result<()> {
        let size = self.history.len();
        for ((input, sample), weight) in self
            .fft
            .input
            .iter_mut()
            .zip(&self.history)
            .zip(&self.window)
        {
            *input = sample * weight;
        }
        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        let tau = self.config.smoothing_time_constant;
        let range = self.config.max_decibels - self.config.min_decibels;
        for ((smoothed, byte), bin) in self
            .smoothed
            .iter_mut()
            .zip(&mut self.frequency_bytes)
            .zip(&self.fft.spectrum)
        {
            let magnitude = bin.norm() / size as f32;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
            let decibels = if *smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 * (decibels - self.config.min_decibels) / range;
            *byte = scaled.floor().clamp(0.0, 255.0) as u8;
        }

        for (byte, sample) in self.time_bytes.iter_mut().zip(&self.history) {
            *byte = (128.0 * (1.0 + sample)).floor().clamp(0.0, 255.0) as u8;
        }
        Ok(())
    }

    /// Bytes per frequency bin as of the last update.
    pub fn frequency_buffer(&self) -> &[u8] {
        &self.frequency_bytes
    }

    /// Window samples mapped to bytes, 128 being silence.
    pub fn time_domain_buffer(&self) -> &[u8] {
        &self.time_bytes
    }

    /// Bin index covering `hz`, if the frequency is within the analysed range.
    pub fn bin_for(&self, hz: f32) -> Option<usize> {
        if !hz.is_finite() || hz < 0.0 {
            return None;
        }
        let bin = (hz * self.config.fft_size as f32 / self.config.sample_rate as f32).floor();
        let bin = bin as usize;
        (bin < self.bin_count()).then_some(bin)
    }

    /// Strength of the bin covering `hz`.
    pub fn frequency_strength(&self, hz: f32) -> Option<u8> {
        self.bin_for(hz).map(|bin| self.frequency_bytes[bin])
    }

    /// Clears the sample window and the smoothing state.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.smoothed.fill(0.0);
        self.frequency_bytes.fill(0);
        self.time_bytes.fill(SILENCE);
        self.processed_samples = 0;
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for FrequencyAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyAnalyser")
            .field("config", &self.config)
            .field("bins", &self.frequency_bytes.len())
            .field("processed_samples", &self.processed_samples)
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    let phase = 2.0 * PI * index as f32 / len as f32;
    a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyser(smoothing: f32) -> FrequencyAnalyser {
        FrequencyAnalyser::new(&AudioConfig {
            sample_rate: 8_000,
            fft_size: 256,
            smoothing_time_constant: smoothing,
            ..AudioConfig::default()
        })
        .unwrap()
    }

    fn tone(hz: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * hz * n as f32 / 8_000.0).sin())
            .collect()
    }

    #[test]
    fn silence_maps_to_floor_and_midpoint() {
        let mut analyser = analyser(0.0);
        analyser.update().unwrap();

        assert_eq!(analyser.frequency_buffer().len(), 128);
        assert!(analyser.frequency_buffer().iter().all(|&byte| byte == 0));
        assert!(analyser
            .time_domain_buffer()
            .iter()
            .all(|&byte| byte == SILENCE));
    }

    #[test]
    fn tone_peaks_in_its_bin() {
        let mut analyser = analyser(0.0);
        // 1000 Hz at 8 kHz / 256 lands exactly on bin 32.
        analyser.push_samples(&tone(1_000.0, 0.01, 256));
        analyser.update().unwrap();

        let buffer = analyser.frequency_buffer();
        let peak = buffer
            .iter()
            .enumerate()
            .max_by_key(|(_, byte)| **byte)
            .map(|(bin, _)| bin)
            .unwrap();
        assert_eq!(peak, 32);
        assert_eq!(analyser.frequency_strength(1_000.0), Some(buffer[32]));
        assert!(buffer[32] > buffer[100]);
    }

    #[test]
    fn bins_follow_floor_of_scaled_frequency() {
        let analyser = analyser(0.0);
        assert_eq!(analyser.bin_for(0.0), Some(0));
        assert_eq!(analyser.bin_for(31.0), Some(0));
        assert_eq!(analyser.bin_for(31.25), Some(1));
        assert_eq!(analyser.bin_for(3_999.0), Some(127));
        assert_eq!(analyser.bin_for(4_000.0), None);
        assert_eq!(analyser.frequency_strength(-5.0), None);
    }

    #[test]
    fn smoothing_carries_previous_frames() {
        let mut smooth = analyser(0.9);
        let mut raw = analyser(0.0);
        let loud = tone(1_000.0, 1.0, 256);
        for analyser in [&mut smooth, &mut raw] {
            analyser.push_samples(&loud);
            analyser.update().unwrap();
            analyser.push_samples(&[0.0; 256]);
            analyser.update().unwrap();
        }
        assert!(smooth.frequency_strength(1_000.0) > raw.frequency_strength(1_000.0));
    }

    #[test]
    fn window_keeps_latest_samples() {
        let mut analyser = analyser(0.0);
        analyser.push_samples(&[1.0; 200]);
        analyser.push_samples(&[-1.0; 100]);
        analyser.update().unwrap();

        let time = analyser.time_domain_buffer();
        assert_eq!(time[0], 255);
        assert_eq!(time[155], 255);
        assert_eq!(time[156], 0);
        assert_eq!(time[255], 0);
        assert_eq!(analyser.processed_samples(), 300);

        analyser.reset();
        assert_eq!(analyser.processed_samples(), 0);
    }
}
