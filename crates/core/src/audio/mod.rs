use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::{AudioConfig, FrequencyAnalyser, Result, VisualizerError};

/// Owns the frequency analyser that audio input is fed into.
///
/// The analyser lives behind a shared lock so scene nodes can read it through
/// [`SpectrumHandle`]s while the audio side keeps pushing samples.
#[derive(Debug)]
pub struct AudioSession {
    analyser: Arc<Mutex<FrequencyAnalyser>>,
    sample_rate: u32,
}

impl AudioSession {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let analyser = FrequencyAnalyser::new(config)?;
        debug!(
            sample_rate = config.sample_rate,
            fft_size = config.fft_size,
            "audio session created"
        );
        Ok(Self {
            analyser: Arc::new(Mutex::new(analyser)),
            sample_rate: config.sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns a read view over the shared analyser.
    pub fn spectrum(&self) -> SpectrumHandle {
        SpectrumHandle::new(self.analyser.clone())
    }

    /// Feeds a block of samples into the analysis window.
    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut analyser = self.lock()?;
        analyser.push_samples(samples);
        Ok(())
    }

    /// Refreshes the frequency and time-domain buffers. Called once per frame.
    pub fn update(&self) -> Result<()> {
        let mut analyser = self.lock()?;
        analyser.update()
    }

    pub fn reset(&self) -> Result<()> {
        let mut analyser = self.lock()?;
        analyser.reset();
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, FrequencyAnalyser>> {
        lock_analyser(&self.analyser)
    }
}

/// Shared, thread-safe view over the analyser managed by [`AudioSession`].
#[derive(Clone)]
pub struct SpectrumHandle {
    shared: Arc<Mutex<FrequencyAnalyser>>,
}

impl SpectrumHandle {
    pub(crate) fn new(shared: Arc<Mutex<FrequencyAnalyser>>) -> Self {
        Self { shared }
    }

    /// Byte strength of the bin covering `hz`, `None` when out of range.
    pub fn frequency_strength(&self, hz: f32) -> Result<Option<u8>> {
        let analyser = self.lock()?;
        Ok(analyser.frequency_strength(hz))
    }

    /// Copies the current frequency buffer into `out`, resizing it as needed.
    pub fn copy_frequency_buffer(&self, out: &mut Vec<u8>) -> Result<()> {
        let analyser = self.lock()?;
        out.clear();
        out.extend_from_slice(analyser.frequency_buffer());
        Ok(())
    }

    /// Copies the current time-domain buffer into `out`, resizing it as needed.
    pub fn copy_time_domain_buffer(&self, out: &mut Vec<u8>) -> Result<()> {
        let analyser = self.lock()?;
        out.clear();
        out.extend_from_slice(analyser.time_domain_buffer());
        Ok(())
    }

    pub fn bin_count(&self) -> Result<usize> {
        Ok(self.lock()?.bin_count())
    }

    fn lock(&self) -> Result<MutexGuard<'_, FrequencyAnalyser>> {
        lock_analyser(&self.shared)
    }
}

impl std::fmt::Debug for SpectrumHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumHandle").finish()
    }
}

fn lock_analyser(shared: &Mutex<FrequencyAnalyser>) -> Result<MutexGuard<'_, FrequencyAnalyser>> {
    shared
        .lock()
        .map_err(|_| VisualizerError::msg("frequency analyser has been poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> AudioSession {
        AudioSession::new(&AudioConfig {
            sample_rate: 8_000,
            fft_size: 256,
            smoothing_time_constant: 0.0,
            ..AudioConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn handles_observe_pushed_samples() {
        let audio = session();
        let spectrum = audio.spectrum();
        assert_eq!(spectrum.frequency_strength(1_000.0).unwrap(), Some(0));

        let tone: Vec<f32> = (0..256)
            .map(|n| (2.0 * std::f32::consts::PI * 1_000.0 * n as f32 / 8_000.0).sin())
            .collect();
        audio.push_samples(&tone).unwrap();
        audio.update().unwrap();

        let strength = spectrum.frequency_strength(1_000.0).unwrap().unwrap();
        assert!(strength > 0);

        let mut bins = Vec::new();
        spectrum.clone().copy_frequency_buffer(&mut bins).unwrap();
        assert_eq!(bins.len(), spectrum.bin_count().unwrap());
        assert_eq!(bins[32], strength);
    }

    #[test]
    fn time_domain_copy_reflects_window() {
        let audio = session();
        audio.push_samples(&[0.5; 256]).unwrap();
        audio.update().unwrap();

        let mut samples = vec![1, 2, 3];
        audio.spectrum().copy_time_domain_buffer(&mut samples).unwrap();
        assert_eq!(samples.len(), 256);
        assert!(samples.iter().all(|&byte| byte == 192));
    }

    #[test]
    fn rejects_invalid_configuration() {
        let err = AudioSession::new(&AudioConfig {
            fft_size: 100,
            ..AudioConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, VisualizerError::InvalidInput(_)));
    }

    #[test]
    fn poisoned_lock_surfaces_as_error() {
        let audio = session();
        let spectrum = audio.spectrum();
        let shared = spectrum.shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.lock().unwrap();
            panic!("poison the analyser");
        })
        .join();

        assert!(spectrum.frequency_strength(100.0).is_err());
        assert!(audio.update().is_err());
    }
}
