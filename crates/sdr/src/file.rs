// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use num_complex::Complex32;

use crate::buffer::DataBuffer;
use crate::config::Settings;
use crate::{IQSample, Source, SourceError};
use iq_dsp::downsampler::FcPos;

/// Raw IQ file sample formats.
#[derive(Debug, Clone, Copy)]
pub enum SampleFormat {
    /// Complex float32 pairs, little-endian.
    Cf32,
    /// Complex int16 pairs, little-endian.
    Cs16,
    /// Complex int8 pairs.
    Cs8,
}

const DEFAULT_BLOCK_LENGTH: usize = 65536;

/// File-backed source: reads raw IQ samples and streams them as blocks.
///
/// Lets the whole pipeline run without radio hardware. Configured with
/// `path=<file>` plus the common keys; the file is read as fast as the
/// consumer drains it, with no rate pacing.
pub struct FileSource {
    path: String,
    format: SampleFormat,
    frequency: u64,
    sample_rate: u32,
    decim: u32,
    fc_pos: FcPos,
    block_length: usize,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FileSource {
    pub fn new() -> Self {
        Self {
            path: String::new(),
            format: SampleFormat::Cf32,
            frequency: 100_000_000,
            sample_rate: 1_000_000,
            decim: 0,
            fc_pos: FcPos::Center,
            block_length: DEFAULT_BLOCK_LENGTH,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    fn read_block(
        reader: &mut BufReader<File>,
        format: SampleFormat,
        num_samples: usize,
    ) -> std::io::Result<Vec<IQSample>> {
        let bytes_per_sample = match format {
            SampleFormat::Cf32 => 8,
            SampleFormat::Cs16 => 4,
            SampleFormat::Cs8 => 2,
        };
        let mut buf = vec![0u8; num_samples * bytes_per_sample];
        let mut filled = 0;
        // read() may return short counts; fill until EOF or the block is full
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let actual = filled / bytes_per_sample;

        let mut out = Vec::with_capacity(actual);
        for i in 0..actual {
            let base = i * bytes_per_sample;
            let sample = match format {
                SampleFormat::Cf32 => {
                    let re = f32::from_le_bytes(buf[base..base + 4].try_into().unwrap());
                    let im = f32::from_le_bytes(buf[base + 4..base + 8].try_into().unwrap());
                    Complex32::new(re, im)
                }
                SampleFormat::Cs16 => {
                    let re = i16::from_le_bytes([buf[base], buf[base + 1]]);
                    let im = i16::from_le_bytes([buf[base + 2], buf[base + 3]]);
                    Complex32::new(re as f32 / 32768.0, im as f32 / 32768.0)
                }
                SampleFormat::Cs8 => {
                    let re = buf[base] as i8;
                    let im = buf[base + 1] as i8;
                    Complex32::new(re as f32 / 128.0, im as f32 / 128.0)
                }
            };
            out.push(sample);
        }
        Ok(out)
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for FileSource {
    fn configure(&mut self, config: &str) -> Result<(), SourceError> {
        let cfg = Settings::parse(config);
        cfg.check_keys(&["path", "format", "freq", "srate", "decim", "fcpos", "blklen"])?;

        self.path = cfg
            .get("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SourceError::Config("missing required key 'path'".to_string()))?
            .to_string();

        self.format = match cfg.get("format").unwrap_or("cf32") {
            "cf32" => SampleFormat::Cf32,
            "cs16" => SampleFormat::Cs16,
            "cs8" => SampleFormat::Cs8,
            other => {
                return Err(SourceError::Config(format!(
                    "invalid value for format: '{}' (expected cf32, cs16 or cs8)",
                    other
                )))
            }
        };

        self.frequency = cfg.get_u64("freq", self.frequency)?;
        self.sample_rate = cfg.get_u32("srate", self.sample_rate)?;
        if self.sample_rate == 0 {
            return Err(SourceError::Config("srate must be positive".to_string()));
        }
        self.decim = cfg.decimation()?;
        self.fc_pos = cfg.fc_pos()?;
        self.block_length = cfg.get_u32("blklen", self.block_length as u32)? as usize;
        if self.block_length == 0 {
            return Err(SourceError::Config("blklen must be positive".to_string()));
        }
        Ok(())
    }

    fn get_configured_frequency(&self) -> f64 {
        self.frequency as f64
    }

    fn get_frequency(&self) -> f64 {
        self.frequency as f64
    }

    fn get_sample_rate(&self) -> f64 {
        self.sample_rate as f64
    }

    fn get_decimation(&self) -> u32 {
        self.decim
    }

    fn get_fc_pos(&self) -> FcPos {
        self.fc_pos
    }

    fn start(
        &mut self,
        buffer: Arc<DataBuffer<IQSample>>,
        stop: Arc<AtomicBool>,
    ) -> Result<(), SourceError> {
        let file = File::open(&self.path)
            .map_err(|e| SourceError::Open(format!("failed to open {}: {}", self.path, e)))?;
        let mut reader = BufReader::with_capacity(1 << 20, file);

        let format = self.format;
        let block_length = self.block_length;
        let path = self.path.clone();
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        self.thread = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
                match Self::read_block(&mut reader, format, block_length) {
                    Ok(block) if block.is_empty() => {
                        log::info!("end of file: {}", path);
                        break;
                    }
                    Ok(block) => buffer.push(block),
                    Err(e) => {
                        log::error!("read error on {}: {}", path, e);
                        break;
                    }
                }
            }
            buffer.push_end();
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("iq-sdr-test-{}-{}", std::process::id(), name))
    }

    fn write_cf32(path: &PathBuf, samples: &[Complex32]) {
        let mut f = File::create(path).unwrap();
        for s in samples {
            f.write_all(&s.re.to_le_bytes()).unwrap();
            f.write_all(&s.im.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn test_configure_reports_rates() {
        let mut src = FileSource::new();
        src.configure("path=/dev/null,freq=100000000,srate=1000000,decim=1")
            .unwrap();
        assert_eq!(src.get_sample_rate(), 1_000_000.0);
        assert_eq!(src.get_configured_frequency(), 100_000_000.0);
        assert_eq!(src.get_decimation(), 1);
    }

    #[test]
    fn test_configure_rejects_missing_path() {
        let mut src = FileSource::new();
        assert!(matches!(
            src.configure("srate=1000000"),
            Err(SourceError::Config(_))
        ));
    }

    #[test]
    fn test_configure_rejects_bad_format() {
        let mut src = FileSource::new();
        let err = src.configure("path=/dev/null,format=cu64").unwrap_err();
        assert!(err.to_string().contains("cu64"));
    }

    #[test]
    fn test_streams_file_then_signals_end() {
        let path = temp_path("stream.cf32");
        let samples: Vec<Complex32> = (0..300)
            .map(|i| Complex32::new(i as f32, 0.5 * i as f32))
            .collect();
        write_cf32(&path, &samples);

        let mut src = FileSource::new();
        src.configure(&format!("path={},blklen=128", path.display()))
            .unwrap();

        let buffer = Arc::new(DataBuffer::new());
        let stop = Arc::new(AtomicBool::new(false));
        src.start(Arc::clone(&buffer), stop).unwrap();

        let mut collected = Vec::new();
        loop {
            let block = buffer.pull();
            if block.is_empty() {
                break;
            }
            collected.extend_from_slice(&block);
        }
        src.stop();
        std::fs::remove_file(&path).ok();

        assert_eq!(collected, samples);
        assert!(buffer.pull_end_reached());
    }

    #[test]
    fn test_start_fails_on_missing_file() {
        let mut src = FileSource::new();
        src.configure("path=/nonexistent/iq.cf32").unwrap();
        let buffer = Arc::new(DataBuffer::new());
        let stop = Arc::new(AtomicBool::new(false));
        assert!(matches!(
            src.start(buffer, stop),
            Err(SourceError::Open(_))
        ));
    }

    #[test]
    fn test_stop_before_start_is_safe() {
        let mut src = FileSource::new();
        src.stop();
        src.stop();
    }
}
