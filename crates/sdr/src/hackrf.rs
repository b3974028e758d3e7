// Copyright 2025-2026 CEMAXECUTER LLC

use std::os::raw::{c_char, c_int, c_void};
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

const HACKRF_SUCCESS: c_int = 0;

#[repr(C)]
struct HackrfDeviceList {
    serial_numbers: *mut *mut c_char,
    usb_board_ids: *mut c_int,
    usb_device_index: *mut c_int,
    devicecount: c_int,
    usb_devices: *mut *mut c_void,
    usb_devicecount: c_int,
}

#[repr(C)]
struct HackrfTransfer {
    device: *mut c_void,
    buffer: *mut u8,
    buffer_length: i32,
    valid_length: i32,
    rx_ctx: *mut c_void,
    tx_ctx: *mut c_void,
}

type HackrfDevice = c_void;

extern "C" {
    fn hackrf_init() -> c_int;
    fn hackrf_exit() -> c_int;
    fn hackrf_open_by_serial(
        desired_serial_number: *const c_char,
        device: *mut *mut HackrfDevice,
    ) -> c_int;
    fn hackrf_close(device: *mut HackrfDevice) -> c_int;
    fn hackrf_set_sample_rate(device: *mut HackrfDevice, freq_hz: f64) -> c_int;
    fn hackrf_set_freq(device: *mut HackrfDevice, freq_hz: u64) -> c_int;
    fn hackrf_set_lna_gain(device: *mut HackrfDevice, value: u32) -> c_int;
    fn hackrf_set_vga_gain(device: *mut HackrfDevice, value: u32) -> c_int;
    fn hackrf_set_baseband_filter_bandwidth(device: *mut HackrfDevice, bw_hz: u32) -> c_int;
    fn hackrf_set_amp_enable(device: *mut HackrfDevice, value: u8) -> c_int;
    fn hackrf_set_antenna_enable(device: *mut HackrfDevice, value: u8) -> c_int;
    fn hackrf_start_rx(
        device: *mut HackrfDevice,
        callback: unsafe extern "C" fn(*mut HackrfTransfer) -> c_int,
        rx_ctx: *mut c_void,
    ) -> c_int;
    fn hackrf_stop_rx(device: *mut HackrfDevice) -> c_int;
    fn hackrf_device_list() -> *mut HackrfDeviceList;
    fn hackrf_device_list_free(list: *mut HackrfDeviceList);
}

const LNA_GAINS_DB: [u32; 6] = [0, 8, 16, 24, 32, 40];
// Valid baseband filter bandwidths in MHz
const FILTER_BANDWIDTHS_MHZ: [f64; 16] = [
    1.75, 2.5, 3.5, 5.0, 5.5, 6.0, 7.0, 8.0, 9.0, 10.0, 12.0, 14.0, 15.0, 20.0, 24.0, 28.0,
];

/// List attached HackRF devices by serial number.
pub fn get_device_names() -> Result<Vec<String>, SourceError> {
    unsafe {
        let r = hackrf_init();
        if r != HACKRF_SUCCESS {
            return Err(SourceError::Open(format!("hackrf_init failed: {}", r)));
        }

        let list = hackrf_device_list();
        if list.is_null() {
            hackrf_exit();
            return Err(SourceError::Open(
                "hackrf_device_list returned null".to_string(),
            ));
        }

        let count = (*list).devicecount as usize;
        let mut names = Vec::with_capacity(count);
        for i in 0..count {
            let serial_ptr = *(*list).serial_numbers.add(i);
            let serial = if serial_ptr.is_null() {
                String::from("(no serial)")
            } else {
                std::ffi::CStr::from_ptr(serial_ptr)
                    .to_string_lossy()
                    .trim_start_matches('0')
                    .to_string()
            };
            names.push(format!("HackRF serial {}", serial));
        }

        hackrf_device_list_free(list);
        hackrf_exit();
        Ok(names)
    }
}

fn serial_by_index(devidx: u32) -> Result<String, SourceError> {
    unsafe {
        let list = hackrf_device_list();
        if list.is_null() {
            return Err(SourceError::Open(
                "hackrf_device_list returned null".to_string(),
            ));
        }
        let count = (*list).devicecount;
        let result = if (devidx as c_int) < count {
            let serial_ptr = *(*list).serial_numbers.add(devidx as usize);
            if serial_ptr.is_null() {
                Err(SourceError::Open(format!("device {} has no serial", devidx)))
            } else {
                Ok(std::ffi::CStr::from_ptr(serial_ptr)
                    .to_string_lossy()
                    .to_string())
            }
        } else {
            Err(SourceError::Open(format!(
                "invalid device index {} ({} devices found)",
                devidx, count
            )))
        };
        hackrf_device_list_free(list);
        result
    }
}

/// Context handed to the libhackrf RX callback. The callback only moves
/// raw byte chunks into the channel; all conversion happens on the
/// converter thread.
struct RxContext {
    tx: Sender<Vec<i8>>,
}

unsafe extern "C" fn rx_callback(transfer: *mut HackrfTransfer) -> c_int {
    let ctx = &*((*transfer).rx_ctx as *const RxContext);
    let valid = (*transfer).valid_length as usize;
    let buffer = (*transfer).buffer;

    let mut chunk = Vec::with_capacity(valid);
    for i in 0..valid {
        chunk.push(*(buffer.add(i) as *const i8));
    }

    // Dropped on overrun; the source buffer applies its own accounting.
    let _ = ctx.tx.try_send(chunk);
    0
}

struct DeviceHandle(*mut HackrfDevice);

unsafe impl Send for DeviceHandle {}

/// HackRF One / Jawbreaker source using the libhackrf C API.
pub struct HackRfSource {
    dev: *mut HackrfDevice,
    ctx: *mut RxContext,
    config_freq: u64,
    sample_rate: u32,
    lna_gain: u32,
    vga_gain: u32,
    bandwidth_hz: u32,
    extamp: bool,
    antbias: bool,
    decim: u32,
    fc_pos: FcPos,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

unsafe impl Send for HackRfSource {}

impl HackRfSource {
    /// Claim a device by ordinal index.
    pub fn open(devidx: u32) -> Result<Self, SourceError> {
        unsafe {
            let r = hackrf_init();
            if r != HACKRF_SUCCESS {
                return Err(SourceError::Open(format!("hackrf_init failed: {}", r)));
            }
        }

        let serial = match serial_by_index(devidx) {
            Ok(s) => s,
            Err(e) => {
                unsafe { hackrf_exit() };
                return Err(e);
            }
        };

        let cs = std::ffi::CString::new(serial)
            .map_err(|e| SourceError::Open(format!("CString error: {}", e)))?;
        let mut dev: *mut HackrfDevice = ptr::null_mut();
        let r = unsafe { hackrf_open_by_serial(cs.as_ptr(), &mut dev) };
        if r != HACKRF_SUCCESS {
            unsafe { hackrf_exit() };
            return Err(SourceError::Open(format!("hackrf_open failed: {}", r)));
        }

        Ok(Self {
            dev,
            ctx: ptr::null_mut(),
            config_freq: 100_000_000,
            sample_rate: 5_000_000,
            lna_gain: 16,
            vga_gain: 22,
            bandwidth_hz: 2_500_000,
            extamp: false,
            antbias: false,
            decim: 0,
            fc_pos: FcPos::Center,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    fn run_converter(
        rx: Receiver<Vec<i8>>,
        buffer: Arc<DataBuffer<IQSample>>,
        running: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
    ) {
        while running.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
            match rx.recv_timeout(Duration::from_millis(500)) {
                Ok(chunk) => {
                    let num_samples = chunk.len() / 2;
                    let mut block = Vec::with_capacity(num_samples);
                    for i in 0..num_samples {
                        let re = chunk[2 * i] as f32 / 128.0;
                        let im = chunk[2 * i + 1] as f32 / 128.0;
                        block.push(Complex32::new(re, im));
                    }
                    buffer.push(block);
                }
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        buffer.push_end();
        log::info!("HackRF streaming stopped");
    }
}

impl Source for HackRfSource {
    fn configure(&mut self, config: &str) -> Result<(), SourceError> {
        let cfg = Settings::parse(config);
        cfg.check_keys(&[
            "freq", "srate", "decim", "fcpos", "lgain", "vgain", "bwfilter", "extamp", "antbias",
        ])?;

        let freq = cfg.get_u64("freq", self.config_freq)?;
        if !(1_000_000..=6_000_000_000).contains(&freq) {
            return Err(SourceError::Config(format!(
                "invalid value for freq: {} (valid range 1M to 6G)",
                freq
            )));
        }

        let srate = cfg.get_u32("srate", self.sample_rate)?;
        if !(2_500_000..=20_000_000).contains(&srate) {
            return Err(SourceError::Config(format!(
                "invalid value for srate: {} (valid range [2500000, 20000000])",
                srate
            )));
        }

        let lgain = match cfg.get("lgain") {
            Some("list") => {
                return Err(SourceError::Config(format!(
                    "valid lgain values (dB): {:?}",
                    LNA_GAINS_DB
                )))
            }
            _ => cfg.get_u32("lgain", self.lna_gain)?,
        };
        if !LNA_GAINS_DB.contains(&lgain) {
            return Err(SourceError::Config(format!(
                "invalid value for lgain: {} (valid values: {:?})",
                lgain, LNA_GAINS_DB
            )));
        }

        let vgain = match cfg.get("vgain") {
            Some("list") => {
                return Err(SourceError::Config(
                    "valid vgain values (dB): 0 to 62 in steps of 2".to_string(),
                ))
            }
            _ => cfg.get_u32("vgain", self.vga_gain)?,
        };
        if vgain > 62 || vgain % 2 != 0 {
            return Err(SourceError::Config(format!(
                "invalid value for vgain: {} (valid values: 0 to 62 in steps of 2)",
                vgain
            )));
        }

        let bw_mhz = match cfg.get("bwfilter") {
            Some("list") => {
                return Err(SourceError::Config(format!(
                    "valid bwfilter values (MHz): {:?}",
                    FILTER_BANDWIDTHS_MHZ
                )))
            }
            _ => cfg.get_f64("bwfilter", self.bandwidth_hz as f64 / 1e6)?,
        };
        if !FILTER_BANDWIDTHS_MHZ.iter().any(|&b| (b - bw_mhz).abs() < 1e-6) {
            return Err(SourceError::Config(format!(
                "invalid value for bwfilter: {} (valid values in MHz: {:?})",
                bw_mhz, FILTER_BANDWIDTHS_MHZ
            )));
        }

        self.config_freq = freq;
        self.sample_rate = srate;
        self.lna_gain = lgain;
        self.vga_gain = vgain;
        self.bandwidth_hz = (bw_mhz * 1e6) as u32;
        self.extamp = cfg.has("extamp");
        self.antbias = cfg.has("antbias");
        self.decim = cfg.decimation()?;
        self.fc_pos = cfg.fc_pos()?;

        unsafe {
            let r = hackrf_set_sample_rate(self.dev, srate as f64);
            if r != HACKRF_SUCCESS {
                return Err(SourceError::Config(format!(
                    "hackrf_set_sample_rate({}) failed: {}",
                    srate, r
                )));
            }
            let r = hackrf_set_freq(self.dev, freq);
            if r != HACKRF_SUCCESS {
                return Err(SourceError::Config(format!(
                    "hackrf_set_freq({}) failed: {}",
                    freq, r
                )));
            }
            let r = hackrf_set_baseband_filter_bandwidth(self.dev, self.bandwidth_hz);
            if r != HACKRF_SUCCESS {
                return Err(SourceError::Config(format!(
                    "hackrf_set_baseband_filter_bandwidth failed: {}",
                    r
                )));
            }
            hackrf_set_lna_gain(self.dev, lgain);
            hackrf_set_vga_gain(self.dev, vgain);
            hackrf_set_amp_enable(self.dev, self.extamp as u8);
            hackrf_set_antenna_enable(self.dev, self.antbias as u8);
        }

        Ok(())
    }

    fn get_configured_frequency(&self) -> f64 {
        self.config_freq as f64
    }

    fn get_frequency(&self) -> f64 {
        // HackRF tunes to the exact requested frequency.
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
        log::info!("LNA gain: {} dB, VGA gain: {} dB", self.lna_gain, self.vga_gain);
        log::info!("filter bandwidth: {} Hz", self.bandwidth_hz);
        log::info!(
            "extra amplifier: {}, antenna bias: {}",
            if self.extamp { "enabled" } else { "disabled" },
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

        let (tx, rx) = bounded::<Vec<i8>>(64);
        let ctx = Box::into_raw(Box::new(RxContext { tx }));

        let r = unsafe { hackrf_start_rx(self.dev, rx_callback, ctx as *mut c_void) };
        if r != HACKRF_SUCCESS {
            unsafe {
                drop(Box::from_raw(ctx));
            }
            return Err(SourceError::Transfer(format!(
                "hackrf_start_rx failed: {}",
                r
            )));
        }
        self.ctx = ctx;

        log::info!(
            "HackRF streaming started ({} MHz, {} MS/s)",
            self.config_freq / 1_000_000,
            self.sample_rate / 1_000_000,
        );

        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);
        self.thread = Some(std::thread::spawn(move || {
            Self::run_converter(rx, buffer, running, stop);
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
                hackrf_stop_rx(self.dev);
                drop(Box::from_raw(self.ctx));
            }
            self.ctx = ptr::null_mut();
        }
    }
}

impl Drop for HackRfSource {
    fn drop(&mut self) {
        self.stop();
        unsafe {
            hackrf_close(self.dev);
            hackrf_exit();
        }
    }
}
