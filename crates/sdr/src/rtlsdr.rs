// Copyright 2025-2026 CEMAXECUTER LLC

use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use num_complex::Complex32;

use crate::buffer::DataBuffer;
use crate::config::Settings;
use crate::{IQSample, Source, SourceError};
use iq_dsp::downsampler::FcPos;

type RtlSdrDev = c_void;

extern "C" {
    fn rtlsdr_get_device_count() -> u32;
    fn rtlsdr_get_device_name(index: u32) -> *const c_char;
    fn rtlsdr_open(dev: *mut *mut RtlSdrDev, index: u32) -> c_int;
    fn rtlsdr_close(dev: *mut RtlSdrDev) -> c_int;
    fn rtlsdr_set_center_freq(dev: *mut RtlSdrDev, freq: u32) -> c_int;
    fn rtlsdr_get_center_freq(dev: *mut RtlSdrDev) -> u32;
    fn rtlsdr_set_sample_rate(dev: *mut RtlSdrDev, rate: u32) -> c_int;
    fn rtlsdr_get_sample_rate(dev: *mut RtlSdrDev) -> u32;
    fn rtlsdr_set_tuner_gain_mode(dev: *mut RtlSdrDev, manual: c_int) -> c_int;
    fn rtlsdr_set_tuner_gain(dev: *mut RtlSdrDev, gain: c_int) -> c_int;
    fn rtlsdr_get_tuner_gain(dev: *mut RtlSdrDev) -> c_int;
    fn rtlsdr_get_tuner_gains(dev: *mut RtlSdrDev, gains: *mut c_int) -> c_int;
    fn rtlsdr_set_agc_mode(dev: *mut RtlSdrDev, on: c_int) -> c_int;
    fn rtlsdr_reset_buffer(dev: *mut RtlSdrDev) -> c_int;
    fn rtlsdr_read_sync(
        dev: *mut RtlSdrDev,
        buf: *mut c_void,
        len: c_int,
        n_read: *mut c_int,
    ) -> c_int;
}

/// Raw device pointer moved into the producer thread (single owner).
struct DeviceHandle(*mut RtlSdrDev);

unsafe impl Send for DeviceHandle {}

/// List attached RTL-SDR devices by name.
pub fn get_device_names() -> Result<Vec<String>, SourceError> {
    let count = unsafe { rtlsdr_get_device_count() };
    let mut names = Vec::with_capacity(count as usize);
    for i in 0..count {
        let name_ptr = unsafe { rtlsdr_get_device_name(i) };
        let name = if name_ptr.is_null() {
            String::from("(unknown)")
        } else {
            unsafe { std::ffi::CStr::from_ptr(name_ptr) }
                .to_string_lossy()
                .to_string()
        };
        names.push(name);
    }
    Ok(names)
}

#[derive(Debug, Clone, Copy)]
enum GainMode {
    Auto,
    Manual(i32), // tenths of a dB
}

/// RTL-SDR source using the librtlsdr C API, sync-read loop.
pub struct RtlSdrSource {
    dev: Option<DeviceHandle>,
    config_freq: u64,
    tuned_freq: u64,
    sample_rate: u32,
    gain: GainMode,
    agc: bool,
    decim: u32,
    fc_pos: FcPos,
    block_length: usize,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RtlSdrSource {
    /// Claim a device by ordinal index.
    pub fn open(devidx: u32) -> Result<Self, SourceError> {
        let count = unsafe { rtlsdr_get_device_count() };
        if devidx >= count {
            return Err(SourceError::Open(format!(
                "invalid device index {} ({} devices found)",
                devidx, count
            )));
        }

        let mut dev: *mut RtlSdrDev = ptr::null_mut();
        let r = unsafe { rtlsdr_open(&mut dev, devidx) };
        if r != 0 || dev.is_null() {
            return Err(SourceError::Open(format!("rtlsdr_open failed: {}", r)));
        }

        Ok(Self {
            dev: Some(DeviceHandle(dev)),
            config_freq: 100_000_000,
            tuned_freq: 100_000_000,
            sample_rate: 1_000_000,
            gain: GainMode::Auto,
            agc: false,
            decim: 0,
            fc_pos: FcPos::Center,
            block_length: 65536,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    fn dev_ptr(&self) -> Result<*mut RtlSdrDev, SourceError> {
        self.dev
            .as_ref()
            .map(|h| h.0)
            .ok_or_else(|| SourceError::Open("device already consumed by start".to_string()))
    }

    fn supported_gains(&self) -> Vec<i32> {
        let dev = match self.dev.as_ref() {
            Some(h) => h.0,
            None => return Vec::new(),
        };
        unsafe {
            let count = rtlsdr_get_tuner_gains(dev, ptr::null_mut());
            if count <= 0 {
                return Vec::new();
            }
            let mut gains = vec![0 as c_int; count as usize];
            rtlsdr_get_tuner_gains(dev, gains.as_mut_ptr());
            gains
        }
    }

    fn gain_list_string(&self) -> String {
        self.supported_gains()
            .iter()
            .map(|g| format!("{:.1}", *g as f64 / 10.0))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Source for RtlSdrSource {
    fn configure(&mut self, config: &str) -> Result<(), SourceError> {
        let cfg = Settings::parse(config);
        cfg.check_keys(&["freq", "srate", "decim", "fcpos", "gain", "blklen", "agc"])?;

        let freq = cfg.get_u64("freq", self.config_freq)?;
        if !(10_000_000..=2_200_000_000).contains(&freq) {
            return Err(SourceError::Config(format!(
                "invalid value for freq: {} (valid range 10M to 2.2G)",
                freq
            )));
        }

        let srate = cfg.get_u32("srate", self.sample_rate)?;
        let valid_srate =
            (225_001..=300_000).contains(&srate) || (900_001..=3_200_000).contains(&srate);
        if !valid_srate {
            return Err(SourceError::Config(format!(
                "invalid value for srate: {} (valid ranges [225001, 300000], [900001, 3200000])",
                srate
            )));
        }

        self.gain = match cfg.get("gain") {
            None | Some("auto") => GainMode::Auto,
            Some("list") => {
                return Err(SourceError::Config(format!(
                    "valid gain values (dB): {}",
                    self.gain_list_string()
                )))
            }
            Some(v) => {
                let db: f64 = v.parse().map_err(|_| {
                    SourceError::Config(format!("invalid value for gain: '{}'", v))
                })?;
                let tenths = (db * 10.0).round() as i32;
                if !self.supported_gains().contains(&tenths) {
                    return Err(SourceError::Config(format!(
                        "gain {} dB not supported (valid values: {})",
                        db,
                        self.gain_list_string()
                    )));
                }
                GainMode::Manual(tenths)
            }
        };

        self.agc = cfg.has("agc");
        self.decim = cfg.decimation()?;
        self.fc_pos = cfg.fc_pos()?;

        // read_sync wants a byte count that is a multiple of 512
        let blklen = cfg.get_u32("blklen", self.block_length as u32)? as usize;
        self.block_length = (blklen.max(1024) / 256) * 256;

        let dev = self.dev_ptr()?;
        unsafe {
            let r = rtlsdr_set_sample_rate(dev, srate);
            if r != 0 {
                return Err(SourceError::Config(format!(
                    "rtlsdr_set_sample_rate({}) failed: {}",
                    srate, r
                )));
            }
            self.sample_rate = rtlsdr_get_sample_rate(dev);

            let r = rtlsdr_set_center_freq(dev, freq as u32);
            if r != 0 {
                return Err(SourceError::Config(format!(
                    "rtlsdr_set_center_freq({}) failed: {}",
                    freq, r
                )));
            }
            self.config_freq = freq;
            self.tuned_freq = rtlsdr_get_center_freq(dev) as u64;

            match self.gain {
                GainMode::Auto => {
                    let r = rtlsdr_set_tuner_gain_mode(dev, 0);
                    if r != 0 {
                        return Err(SourceError::Config(format!(
                            "rtlsdr_set_tuner_gain_mode failed: {}",
                            r
                        )));
                    }
                }
                GainMode::Manual(tenths) => {
                    rtlsdr_set_tuner_gain_mode(dev, 1);
                    let r = rtlsdr_set_tuner_gain(dev, tenths);
                    if r != 0 {
                        return Err(SourceError::Config(format!(
                            "rtlsdr_set_tuner_gain failed: {}",
                            r
                        )));
                    }
                }
            }

            rtlsdr_set_agc_mode(dev, if self.agc { 1 } else { 0 });
        }

        Ok(())
    }

    fn get_configured_frequency(&self) -> f64 {
        self.config_freq as f64
    }

    fn get_frequency(&self) -> f64 {
        self.tuned_freq as f64
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

    fn log_specific_parms(&self) {
        match self.gain {
            GainMode::Auto => log::info!("LNA gain: auto"),
            GainMode::Manual(tenths) => {
                let actual = self
                    .dev
                    .as_ref()
                    .map(|h| unsafe { rtlsdr_get_tuner_gain(h.0) })
                    .unwrap_or(tenths);
                log::info!("LNA gain: {:.1} dB", actual as f64 / 10.0);
            }
        }
        log::info!("RTL AGC mode: {}", if self.agc { "enabled" } else { "disabled" });
    }

    fn start(
        &mut self,
        buffer: Arc<DataBuffer<IQSample>>,
        stop: Arc<AtomicBool>,
    ) -> Result<(), SourceError> {
        let handle = self
            .dev
            .take()
            .ok_or_else(|| SourceError::Open("source already started".to_string()))?;

        unsafe {
            // Flush stale samples accumulated since open.
            rtlsdr_reset_buffer(handle.0);
        }

        let block_length = self.block_length;
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        self.thread = Some(std::thread::spawn(move || {
            let handle = handle;
            let nbytes = block_length * 2;
            let mut raw = vec![0u8; nbytes];

            while running.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
                let mut n_read: c_int = 0;
                let r = unsafe {
                    rtlsdr_read_sync(
                        handle.0,
                        raw.as_mut_ptr() as *mut c_void,
                        nbytes as c_int,
                        &mut n_read,
                    )
                };
                if r != 0 {
                    log::error!("rtlsdr_read_sync error: {}", r);
                    break;
                }

                let num_samples = n_read as usize / 2;
                let mut block = Vec::with_capacity(num_samples);
                for i in 0..num_samples {
                    // u8 samples centered on 127.5
                    let re = (raw[2 * i] as f32 - 127.5) * (1.0 / 127.5);
                    let im = (raw[2 * i + 1] as f32 - 127.5) * (1.0 / 127.5);
                    block.push(Complex32::new(re, im));
                }
                buffer.push(block);
            }

            unsafe {
                rtlsdr_close(handle.0);
            }
            buffer.push_end();
            log::info!("RTL-SDR streaming stopped");
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

impl Drop for RtlSdrSource {
    fn drop(&mut self) {
        self.stop();
        // Close the handle if start() never consumed it.
        if let Some(handle) = self.dev.take() {
            unsafe {
                rtlsdr_close(handle.0);
            }
        }
    }
}
