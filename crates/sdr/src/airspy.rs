// Copyright 2025-2026 CEMAXECUTER LLC

use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use num_complex::Complex32;

use crate::buffer::DataBuffer;
use crate::config::Settings;
use crate::{IQSample, Source, SourceError};
use iq_dsp::downsampler::FcPos;

type AirspyDevice = c_void;

const AIRSPY_SUCCESS: c_int = 0;
const AIRSPY_SAMPLE_FLOAT32_IQ: c_int = 0;

#[repr(C)]
struct AirspyTransfer {
    device: *mut AirspyDevice,
    ctx: *mut c_void,
    samples: *mut c_void,
    sample_count: c_int,
    dropped_samples: u64,
    sample_type: c_int,
}

extern "C" {
    fn airspy_list_devices(serials: *mut u64, count: c_int) -> c_int;
    fn airspy_open_sn(device: *mut *mut AirspyDevice, serial_number: u64) -> c_int;
    fn airspy_close(device: *mut AirspyDevice) -> c_int;
    fn airspy_set_freq(device: *mut AirspyDevice, freq_hz: u32) -> c_int;
    fn airspy_set_samplerate(device: *mut AirspyDevice, samplerate: u32) -> c_int;
    fn airspy_get_samplerates(device: *mut AirspyDevice, buffer: *mut u32, len: u32) -> c_int;
    fn airspy_set_sample_type(device: *mut AirspyDevice, sample_type: c_int) -> c_int;
    fn airspy_set_lna_gain(device: *mut AirspyDevice, value: u8) -> c_int;
    fn airspy_set_mixer_gain(device: *mut AirspyDevice, value: u8) -> c_int;
    fn airspy_set_vga_gain(device: *mut AirspyDevice, value: u8) -> c_int;
    fn airspy_set_lna_agc(device: *mut AirspyDevice, value: u8) -> c_int;
    fn airspy_set_mixer_agc(device: *mut AirspyDevice, value: u8) -> c_int;
    fn airspy_set_rf_bias(device: *mut AirspyDevice, value: u8) -> c_int;
    fn airspy_start_rx(
        device: *mut AirspyDevice,
        callback: unsafe extern "C" fn(*mut AirspyTransfer) -> c_int,
        rx_ctx: *mut c_void,
    ) -> c_int;
    fn airspy_stop_rx(device: *mut AirspyDevice) -> c_int;
}

fn list_serials() -> Vec<u64> {
    let count = unsafe { airspy_list_devices(ptr::null_mut(), 0) };
    if count <= 0 {
        return Vec::new();
    }
    let mut serials = vec![0u64; count as usize];
    unsafe { airspy_list_devices(serials.as_mut_ptr(), count) };
    serials
}

/// List attached Airspy devices by serial number.
pub fn get_device_names() -> Result<Vec<String>, SourceError> {
    Ok(list_serials()
        .iter()
        .map(|s| format!("Airspy serial {:016X}", s))
        .collect())
}

/// Callback context: sample blocks are already f32 I/Q, so the callback
/// converts in place and ships complete blocks.
struct RxContext {
    tx: Sender<Vec<Complex32>>,
}

unsafe extern "C" fn rx_callback(transfer: *mut AirspyTransfer) -> c_int {
    let ctx = &*((*transfer).ctx as *const RxContext);
    let count = (*transfer).sample_count as usize;
    let samples = (*transfer).samples as *const f32;

    let mut block = Vec::with_capacity(count);
    for i in 0..count {
        let re = *samples.add(2 * i);
        let im = *samples.add(2 * i + 1);
        block.push(Complex32::new(re, im));
    }

    let _ = ctx.tx.try_send(block);
    0
}

/// Airspy source using the libairspy C API (FLOAT32_IQ sample type).
pub struct AirspySource {
    dev: *mut AirspyDevice,
    ctx: *mut RxContext,
    config_freq: u64,
    sample_rate: u32,
    lna_gain: u32,
    mixer_gain: u32,
    vga_gain: u32,
    antbias: bool,
    lna_agc: bool,
    mixer_agc: bool,
    decim: u32,
    fc_pos: FcPos,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

unsafe impl Send for AirspySource {}

impl AirspySource {
    /// Claim a device by ordinal index.
    pub fn open(devidx: u32) -> Result<Self, SourceError> {
        let serials = list_serials();
        let serial = *serials.get(devidx as usize).ok_or_else(|| {
            SourceError::Open(format!(
                "invalid device index {} ({} devices found)",
                devidx,
                serials.len()
            ))
        })?;

        let mut dev: *mut AirspyDevice = ptr::null_mut();
        let r = unsafe { airspy_open_sn(&mut dev, serial) };
        if r != AIRSPY_SUCCESS || dev.is_null() {
            return Err(SourceError::Open(format!("airspy_open failed: {}", r)));
        }

        let r = unsafe { airspy_set_sample_type(dev, AIRSPY_SAMPLE_FLOAT32_IQ) };
        if r != AIRSPY_SUCCESS {
            unsafe { airspy_close(dev) };
            return Err(SourceError::Open(format!(
                "airspy_set_sample_type failed: {}",
                r
            )));
        }

        Ok(Self {
            dev,
            ctx: ptr::null_mut(),
            config_freq: 100_000_000,
            sample_rate: 10_000_000,
            lna_gain: 8,
            mixer_gain: 8,
            vga_gain: 8,
            antbias: false,
            lna_agc: false,
            mixer_agc: false,
            decim: 0,
            fc_pos: FcPos::Center,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    /// Sample rates supported by the attached unit, queried dynamically.
    fn supported_rates(&self) -> Vec<u32> {
        unsafe {
            let mut count: u32 = 0;
            airspy_get_samplerates(self.dev, &mut count, 0);
            if count == 0 {
                return Vec::new();
            }
            let mut rates = vec![0u32; count as usize];
            airspy_get_samplerates(self.dev, rates.as_mut_ptr(), count);
            rates
        }
    }
}

impl Source for AirspySource {
    fn configure(&mut self, config: &str) -> Result<(), SourceError> {
        let cfg = Settings::parse(config);
        cfg.check_keys(&[
            "freq", "srate", "decim", "fcpos", "lgain", "mgain", "vgain", "antbias", "lagc",
            "magc",
        ])?;

        let freq = cfg.get_u64("freq", self.config_freq)?;
        if !(24_000_000..=1_800_000_000).contains(&freq) {
            return Err(SourceError::Config(format!(
                "invalid value for freq: {} (valid range 24M to 1.8G)",
                freq
            )));
        }

        let rates = self.supported_rates();
        let srate = match cfg.get("srate") {
            Some("list") => {
                return Err(SourceError::Config(format!(
                    "valid srate values: {:?}",
                    rates
                )))
            }
            _ => cfg.get_u32("srate", self.sample_rate)?,
        };
        if !rates.contains(&srate) {
            return Err(SourceError::Config(format!(
                "invalid value for srate: {} (device supports {:?})",
                srate, rates
            )));
        }

        let lgain = cfg.get_u32("lgain", self.lna_gain)?;
        if lgain > 14 {
            return Err(SourceError::Config(format!(
                "invalid value for lgain: {} (valid range 0 to 14)",
                lgain
            )));
        }
        let mgain = cfg.get_u32("mgain", self.mixer_gain)?;
        if mgain > 15 {
            return Err(SourceError::Config(format!(
                "invalid value for mgain: {} (valid range 0 to 15)",
                mgain
            )));
        }
        let vgain = cfg.get_u32("vgain", self.vga_gain)?;
        if vgain > 15 {
            return Err(SourceError::Config(format!(
                "invalid value for vgain: {} (valid range 0 to 15)",
                vgain
            )));
        }

        self.config_freq = freq;
        self.sample_rate = srate;
        self.lna_gain = lgain;
        self.mixer_gain = mgain;
        self.vga_gain = vgain;
        self.antbias = cfg.has("antbias");
        self.lna_agc = cfg.has("lagc");
        self.mixer_agc = cfg.has("magc");
        self.decim = cfg.decimation()?;
        self.fc_pos = cfg.fc_pos()?;

        unsafe {
            let r = airspy_set_samplerate(self.dev, srate);
            if r != AIRSPY_SUCCESS {
                return Err(SourceError::Config(format!(
                    "airspy_set_samplerate({}) failed: {}",
                    srate, r
                )));
            }
            let r = airspy_set_freq(self.dev, freq as u32);
            if r != AIRSPY_SUCCESS {
                return Err(SourceError::Config(format!(
                    "airspy_set_freq({}) failed: {}",
                    freq, r
                )));
            }
            airspy_set_lna_gain(self.dev, lgain as u8);
            airspy_set_mixer_gain(self.dev, mgain as u8);
            airspy_set_vga_gain(self.dev, vgain as u8);
            airspy_set_lna_agc(self.dev, self.lna_agc as u8);
            airspy_set_mixer_agc(self.dev, self.mixer_agc as u8);
            airspy_set_rf_bias(self.dev, self.antbias as u8);
        }

        Ok(())
    }

    fn get_configured_frequency(&self) -> f64 {
        self.config_freq as f64
    }

    fn get_frequency(&self) -> f64 {
        self.config_freq as f64
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
        log::info!(
            "LNA gain: {} dB, mixer gain: {} dB, VGA gain: {} dB",
            self.lna_gain,
            self.mixer_gain,
            self.vga_gain,
        );
        log::info!(
            "LNA AGC: {}, mixer AGC: {}, antenna bias: {}",
            if self.lna_agc { "enabled" } else { "disabled" },
            if self.mixer_agc { "enabled" } else { "disabled" },
            if self.antbias { "enabled" } else { "disabled" },
        );
    }

    fn start(
        &mut self,
        buffer: Arc<DataBuffer<IQSample>>,
        stop: Arc<AtomicBool>,
    ) -> Result<(), SourceError> {
        if self.thread.is_some() {
            return Err(SourceError::Open("source already started".to_string()));
        }

        let (tx, rx) = bounded::<Vec<Complex32>>(64);
        let ctx = Box::into_raw(Box::new(RxContext { tx }));

        let r = unsafe { airspy_start_rx(self.dev, rx_callback, ctx as *mut c_void) };
        if r != AIRSPY_SUCCESS {
            unsafe {
                drop(Box::from_raw(ctx));
            }
            return Err(SourceError::Transfer(format!(
                "airspy_start_rx failed: {}",
                r
            )));
        }
        self.ctx = ctx;

        log::info!(
            "Airspy streaming started ({} MHz, {} MS/s)",
            self.config_freq / 1_000_000,
            self.sample_rate / 1_000_000,
        );

        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);
        self.thread = Some(std::thread::spawn(move || {
            run_forwarder(rx, buffer, running, stop);
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        if !self.ctx.is_null() {
            unsafe {
                airspy_stop_rx(self.dev);
                drop(Box::from_raw(self.ctx));
            }
            self.ctx = ptr::null_mut();
        }
    }
}

fn run_forwarder(
    rx: Receiver<Vec<Complex32>>,
    buffer: Arc<DataBuffer<IQSample>>,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(block) => buffer.push(block),
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    buffer.push_end();
    log::info!("Airspy streaming stopped");
}

impl Drop for AirspySource {
    fn drop(&mut self) {
        self.stop();
        unsafe {
            airspy_close(self.dev);
        }
    }
}
