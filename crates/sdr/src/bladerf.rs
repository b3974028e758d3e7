// Copyright 2025-2026 CEMAXECUTER LLC

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use num_complex::Complex32;

use crate::buffer::DataBuffer;
use crate::config::Settings;
use crate::{IQSample, Source, SourceError};
use iq_dsp::downsampler::FcPos;

type BladerfDevice = c_void;

const BLADERF_MODULE_RX: c_int = 0;
const BLADERF_CHANNEL_RX_0: c_int = 0;
const BLADERF_FORMAT_SC16_Q11: c_int = 1;

// bladerf_lna_gain enum: BYPASS = 1, MID = 2, MAX = 3
const BLADERF_LNA_GAIN_BYPASS: c_int = 1;
const BLADERF_LNA_GAIN_MID: c_int = 2;
const BLADERF_LNA_GAIN_MAX: c_int = 3;

#[repr(C)]
struct BladerfDevinfo {
    backend: c_int,
    serial: [c_char; 33],
    usb_bus: u8,
    usb_addr: u8,
    instance: c_uint,
    manufacturer: [c_char; 33],
    product: [c_char; 33],
}

extern "C" {
    fn bladerf_open(device: *mut *mut BladerfDevice, identifier: *const c_char) -> c_int;
    fn bladerf_close(device: *mut BladerfDevice);
    fn bladerf_set_frequency(dev: *mut BladerfDevice, ch: c_int, frequency: u64) -> c_int;
    fn bladerf_get_frequency(dev: *mut BladerfDevice, ch: c_int, frequency: *mut u64) -> c_int;
    fn bladerf_set_bandwidth(
        dev: *mut BladerfDevice,
        ch: c_int,
        bandwidth: c_uint,
        actual: *mut c_uint,
    ) -> c_int;
    fn bladerf_set_sample_rate(
        dev: *mut BladerfDevice,
        ch: c_int,
        rate: c_uint,
        actual: *mut c_uint,
    ) -> c_int;
    fn bladerf_set_lna_gain(dev: *mut BladerfDevice, gain: c_int) -> c_int;
    fn bladerf_set_rxvga1(dev: *mut BladerfDevice, gain: c_int) -> c_int;
    fn bladerf_set_rxvga2(dev: *mut BladerfDevice, gain: c_int) -> c_int;
    fn bladerf_sync_config(
        dev: *mut BladerfDevice,
        layout: c_int,
        format: c_int,
        num_buffers: c_uint,
        buffer_size: c_uint,
        num_transfers: c_uint,
        stream_timeout: c_uint,
    ) -> c_int;
    fn bladerf_sync_rx(
        dev: *mut BladerfDevice,
        samples: *mut c_void,
        num_samples: c_uint,
        metadata: *mut c_void,
        timeout_ms: c_uint,
    ) -> c_int;
    fn bladerf_enable_module(dev: *mut BladerfDevice, ch: c_int, enable: bool) -> c_int;
    fn bladerf_get_device_list(devices: *mut *mut BladerfDevinfo) -> c_int;
    fn bladerf_free_device_list(devices: *mut BladerfDevinfo);
}

const LNA_GAINS_DB: [u32; 3] = [0, 3, 6];
const VGA1_RANGE: std::ops::RangeInclusive<u32> = 5..=30;
const VGA2_RANGE: std::ops::RangeInclusive<u32> = 0..=30;

/// List attached bladeRF devices by serial number.
pub fn get_device_names() -> Result<Vec<String>, SourceError> {
    let mut devs: *mut BladerfDevinfo = ptr::null_mut();
    let count = unsafe { bladerf_get_device_list(&mut devs) };
    if count <= 0 || devs.is_null() {
        return Ok(Vec::new());
    }

    let mut names = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let dev = unsafe { &*devs.add(i) };
        let serial = unsafe { std::ffi::CStr::from_ptr(dev.serial.as_ptr()) }
            .to_string_lossy()
            .to_string();
        names.push(format!("bladeRF instance {} serial {}", dev.instance, serial));
    }
    unsafe { bladerf_free_device_list(devs) };
    Ok(names)
}

struct DeviceHandle(*mut BladerfDevice);

unsafe impl Send for DeviceHandle {}

/// bladeRF source using the libbladeRF C API, sync RX in SC16_Q11.
pub struct BladeRfSource {
    dev: Option<DeviceHandle>,
    config_freq: u64,
    tuned_freq: u64,
    sample_rate: u32,
    bandwidth: u32,
    lna_gain: u32,
    vga1_gain: u32,
    vga2_gain: u32,
    decim: u32,
    fc_pos: FcPos,
    block_length: usize,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BladeRfSource {
    /// Claim a device by ordinal index.
    pub fn open(devidx: u32) -> Result<Self, SourceError> {
        let mut devs: *mut BladerfDevinfo = ptr::null_mut();
        let count = unsafe { bladerf_get_device_list(&mut devs) };
        if count <= 0 || devs.is_null() {
            return Err(SourceError::Open("no bladeRF devices found".to_string()));
        }
        if devidx as c_int >= count {
            unsafe { bladerf_free_device_list(devs) };
            return Err(SourceError::Open(format!(
                "invalid device index {} ({} devices found)",
                devidx, count
            )));
        }
        let instance = unsafe { (*devs.add(devidx as usize)).instance };
        unsafe { bladerf_free_device_list(devs) };

        let identifier = CString::new(format!("*:instance={}", instance))
            .map_err(|e| SourceError::Open(format!("CString error: {}", e)))?;
        let mut dev: *mut BladerfDevice = ptr::null_mut();
        let r = unsafe { bladerf_open(&mut dev, identifier.as_ptr()) };
        if r != 0 || dev.is_null() {
            return Err(SourceError::Open(format!("bladerf_open failed: {}", r)));
        }

        Ok(Self {
            dev: Some(DeviceHandle(dev)),
            config_freq: 300_000_000,
            tuned_freq: 300_000_000,
            sample_rate: 1_000_000,
            bandwidth: 1_500_000,
            lna_gain: 3,
            vga1_gain: 20,
            vga2_gain: 9,
            decim: 0,
            fc_pos: FcPos::Center,
            block_length: 8192,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    fn dev_ptr(&self) -> Result<*mut BladerfDevice, SourceError> {
        self.dev
            .as_ref()
            .map(|h| h.0)
            .ok_or_else(|| SourceError::Open("device already consumed by start".to_string()))
    }
}

impl Source for BladeRfSource {
    fn configure(&mut self, config: &str) -> Result<(), SourceError> {
        let cfg = Settings::parse(config);
        cfg.check_keys(&[
            "freq", "srate", "decim", "fcpos", "bw", "lgain", "v1gain", "v2gain",
        ])?;

        let freq = cfg.get_u64("freq", self.config_freq)?;
        if !(100_000..=3_800_000_000).contains(&freq) {
            return Err(SourceError::Config(format!(
                "invalid value for freq: {} (valid range 100k to 3.8G)",
                freq
            )));
        }

        let srate = cfg.get_u32("srate", self.sample_rate)?;
        if !(48_000..=40_000_000).contains(&srate) {
            return Err(SourceError::Config(format!(
                "invalid value for srate: {} (valid range 48k to 40M)",
                srate
            )));
        }

        let bw = cfg.get_u32("bw", self.bandwidth)?;

        let lgain = cfg.get_u32("lgain", self.lna_gain)?;
        if !LNA_GAINS_DB.contains(&lgain) {
            return Err(SourceError::Config(format!(
                "invalid value for lgain: {} (valid values: {:?})",
                lgain, LNA_GAINS_DB
            )));
        }
        let v1gain = cfg.get_u32("v1gain", self.vga1_gain)?;
        if !VGA1_RANGE.contains(&v1gain) {
            return Err(SourceError::Config(format!(
                "invalid value for v1gain: {} (valid range 5 to 30)",
                v1gain
            )));
        }
        let v2gain = cfg.get_u32("v2gain", self.vga2_gain)?;
        if !VGA2_RANGE.contains(&v2gain) || v2gain % 3 != 0 {
            return Err(SourceError::Config(format!(
                "invalid value for v2gain: {} (valid values: 0 to 30 in steps of 3)",
                v2gain
            )));
        }

        self.decim = cfg.decimation()?;
        self.fc_pos = cfg.fc_pos()?;

        let dev = self.dev_ptr()?;
        unsafe {
            let mut actual_rate: c_uint = 0;
            let r = bladerf_set_sample_rate(dev, BLADERF_CHANNEL_RX_0, srate, &mut actual_rate);
            if r != 0 {
                return Err(SourceError::Config(format!(
                    "bladerf_set_sample_rate({}) failed: {}",
                    srate, r
                )));
            }
            self.sample_rate = if actual_rate > 0 { actual_rate } else { srate };

            let mut actual_bw: c_uint = 0;
            let r = bladerf_set_bandwidth(dev, BLADERF_CHANNEL_RX_0, bw, &mut actual_bw);
            if r != 0 {
                return Err(SourceError::Config(format!(
                    "bladerf_set_bandwidth({}) failed: {}",
                    bw, r
                )));
            }
            self.bandwidth = if actual_bw > 0 { actual_bw } else { bw };

            let r = bladerf_set_frequency(dev, BLADERF_CHANNEL_RX_0, freq);
            if r != 0 {
                return Err(SourceError::Config(format!(
                    "bladerf_set_frequency({}) failed: {}",
                    freq, r
                )));
            }
            self.config_freq = freq;
            let mut tuned: u64 = 0;
            if bladerf_get_frequency(dev, BLADERF_CHANNEL_RX_0, &mut tuned) == 0 && tuned > 0 {
                self.tuned_freq = tuned;
            } else {
                self.tuned_freq = freq;
            }

            let lna = match lgain {
                0 => BLADERF_LNA_GAIN_BYPASS,
                3 => BLADERF_LNA_GAIN_MID,
                _ => BLADERF_LNA_GAIN_MAX,
            };
            bladerf_set_lna_gain(dev, lna);
            bladerf_set_rxvga1(dev, v1gain as c_int);
            bladerf_set_rxvga2(dev, v2gain as c_int);
        }

        self.lna_gain = lgain;
        self.vga1_gain = v1gain;
        self.vga2_gain = v2gain;

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
        log::info!(
            "LNA gain: {} dB, VGA1 gain: {} dB, VGA2 gain: {} dB",
            self.lna_gain,
            self.vga1_gain,
            self.vga2_gain,
        );
        log::info!("bandwidth: {} Hz", self.bandwidth);
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

        let buf_size = self.block_length as c_uint;
        unsafe {
            let r = bladerf_sync_config(
                handle.0,
                BLADERF_MODULE_RX,
                BLADERF_FORMAT_SC16_Q11,
                16,
                buf_size,
                8,
                3500,
            );
            if r != 0 {
                self.dev = Some(handle);
                return Err(SourceError::Transfer(format!(
                    "bladerf_sync_config failed: {}",
                    r
                )));
            }
            let r = bladerf_enable_module(handle.0, BLADERF_MODULE_RX, true);
            if r != 0 {
                self.dev = Some(handle);
                return Err(SourceError::Transfer(format!(
                    "bladerf_enable_module failed: {}",
                    r
                )));
            }
        }

        log::info!(
            "bladeRF streaming started ({} MHz, {} MS/s)",
            self.config_freq / 1_000_000,
            self.sample_rate as u64 / 1_000_000,
        );

        let block_length = self.block_length;
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        self.thread = Some(std::thread::spawn(move || {
            let handle = handle;
            let mut raw = vec![0i16; block_length * 2];

            while running.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
                let r = unsafe {
                    bladerf_sync_rx(
                        handle.0,
                        raw.as_mut_ptr() as *mut c_void,
                        block_length as c_uint,
                        ptr::null_mut(),
                        3500,
                    )
                };
                if r != 0 {
                    log::error!("bladerf_sync_rx error: {}", r);
                    break;
                }

                let mut block = Vec::with_capacity(block_length);
                for i in 0..block_length {
                    // SC16_Q11: 12-bit data in [-2048, 2047]
                    let re = raw[2 * i] as f32 / 2048.0;
                    let im = raw[2 * i + 1] as f32 / 2048.0;
                    block.push(Complex32::new(re, im));
                }
                buffer.push(block);
            }

            unsafe {
                bladerf_enable_module(handle.0, BLADERF_MODULE_RX, false);
                bladerf_close(handle.0);
            }
            buffer.push_end();
            log::info!("bladeRF streaming stopped");
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

impl Drop for BladeRfSource {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.dev.take() {
            unsafe {
                bladerf_close(handle.0);
            }
        }
    }
}
