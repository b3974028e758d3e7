// Copyright 2025-2026 CEMAXECUTER LLC

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use iq_dsp::downsampler::Downsampler;
use iq_output::SampleSink;
use iq_sdr::buffer::DataBuffer;
use iq_sdr::{IQSample, Source, SourceError};

/// Background writer: drains the output buffer into the sink.
///
/// After draining the buffer to empty, waits until it refills to
/// `minfill` so it does not spin on a buffer that is still priming.
/// Exits once the buffer reports end-of-stream and is empty.
fn write_output_data(
    mut sink: Box<dyn SampleSink>,
    buffer: &DataBuffer<IQSample>,
    minfill: usize,
    stop: &AtomicBool,
) {
    loop {
        if buffer.queued_samples() == 0 && !stop.load(Ordering::Relaxed) {
            buffer.wait_buffer_fill(minfill);
        }

        if buffer.pull_end_reached() {
            break;
        }

        let samples = buffer.pull();
        if samples.is_empty() {
            break;
        }
        if let Err(e) = sink.write(&samples) {
            log::error!("output: {}", e);
        }
    }
}

/// Run the streaming pipeline until cancellation or end of stream.
///
/// Starts the source's producer thread, then pulls blocks from the
/// source buffer, downsamples, and forwards them either directly to the
/// sink or through an output buffer drained by a writer thread
/// (`outputbuf_samples > 0`). The first processed block of a run is
/// discarded: the hardware IF filters are still settling right after
/// start.
pub fn run(
    mut source: Box<dyn Source>,
    mut downsampler: Downsampler,
    sink: Box<dyn SampleSink>,
    outputbuf_samples: usize,
    stop: Arc<AtomicBool>,
) -> Result<(), SourceError> {
    let source_buffer: Arc<DataBuffer<IQSample>> = Arc::new(DataBuffer::new());
    let ifrate = source.get_sample_rate();

    source.start(Arc::clone(&source_buffer), Arc::clone(&stop))?;

    let output_buffer: Arc<DataBuffer<IQSample>> = Arc::new(DataBuffer::new());
    let mut direct_sink = None;
    let mut writer = None;

    if outputbuf_samples > 0 {
        log::info!("output buffer: {} samples", outputbuf_samples);
        let buffer = Arc::clone(&output_buffer);
        let stop_flag = Arc::clone(&stop);
        writer = Some(thread::spawn(move || {
            write_output_data(sink, &buffer, outputbuf_samples, &stop_flag);
        }));
    } else {
        direct_sink = Some(sink);
    }

    let mut inbuf_length_warning = false;
    let mut block: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        // Overflow check on the source side: detection only, the
        // producer is never throttled and the warning fires once.
        if !inbuf_length_warning && source_buffer.queued_samples() as f64 > 10.0 * ifrate {
            log::warn!("input buffer is growing (system too slow)");
            inbuf_length_warning = true;
        }

        let iqsamples = source_buffer.pull();
        if iqsamples.is_empty() {
            // Natural end of stream from the source.
            break;
        }

        let outsamples = downsampler.process(iqsamples);

        // Throw away the first block: IF filters are still starting up.
        if block > 0 {
            if let Some(sink) = direct_sink.as_mut() {
                if let Err(e) = sink.write(&outsamples) {
                    log::error!("output: {}", e);
                }
            } else {
                output_buffer.push(outsamples);
            }
        }
        block += 1;
    }

    if stop.load(Ordering::Relaxed) {
        log::info!("got stop signal, shutting down");
    }

    source.stop();
    output_buffer.push_end();
    if let Some(handle) = writer {
        let _ = handle.join();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iq_dsp::downsampler::FcPos;
    use iq_output::SinkError;
    use iq_sdr::IQSampleVector;
    use num_complex::Complex32;
    use std::sync::Mutex;
    use std::thread::JoinHandle;
    use std::time::Duration;

    /// Source that emits a fixed list of blocks, then end-of-stream.
    /// With `hold_until_stop`, emits nothing until cancellation.
    struct MockSource {
        blocks: Vec<IQSampleVector>,
        hold_until_stop: bool,
        thread: Option<JoinHandle<()>>,
    }

    impl MockSource {
        fn new(blocks: Vec<IQSampleVector>) -> Self {
            Self {
                blocks,
                hold_until_stop: false,
                thread: None,
            }
        }

        fn holding() -> Self {
            Self {
                blocks: Vec::new(),
                hold_until_stop: true,
                thread: None,
            }
        }
    }

    impl Source for MockSource {
        fn configure(&mut self, _config: &str) -> Result<(), SourceError> {
            Ok(())
        }

        fn get_configured_frequency(&self) -> f64 {
            100_000_000.0
        }

        fn get_frequency(&self) -> f64 {
            100_000_000.0
        }

        fn get_sample_rate(&self) -> f64 {
            1_000_000.0
        }

        fn start(
            &mut self,
            buffer: Arc<DataBuffer<IQSample>>,
            stop: Arc<AtomicBool>,
        ) -> Result<(), SourceError> {
            let blocks = std::mem::take(&mut self.blocks);
            let hold = self.hold_until_stop;
            self.thread = Some(thread::spawn(move || {
                if hold {
                    while !stop.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(5));
                    }
                } else {
                    for block in blocks {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        buffer.push(block);
                    }
                }
                buffer.push_end();
            }));
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
        }
    }

    /// Sink that records every written block.
    struct MockSink {
        written: Arc<Mutex<Vec<IQSampleVector>>>,
    }

    impl SampleSink for MockSink {
        fn write(&mut self, samples: &[Complex32]) -> Result<(), SinkError> {
            self.written.lock().unwrap().push(samples.to_vec());
            Ok(())
        }
    }

    fn mock_sink() -> (Box<MockSink>, Arc<Mutex<Vec<IQSampleVector>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(MockSink {
                written: Arc::clone(&written),
            }),
            written,
        )
    }

    fn block(tag: f32, len: usize) -> IQSampleVector {
        (0..len)
            .map(|i| Complex32::new(tag, i as f32))
            .collect()
    }

    #[test]
    fn test_first_block_discarded_direct_mode() {
        let blocks = vec![block(0.0, 16), block(1.0, 16), block(2.0, 16)];
        let source = Box::new(MockSource::new(blocks.clone()));
        let (sink, written) = mock_sink();
        let downsampler = Downsampler::new(0, FcPos::Center).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        run(source, downsampler, sink, 0, stop).unwrap();

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 2, "first block must be discarded");
        assert_eq!(written[0], blocks[1]);
        assert_eq!(written[1], blocks[2]);
    }

    #[test]
    fn test_first_block_discarded_buffered_mode() {
        let blocks = vec![block(0.0, 8), block(1.0, 8), block(2.0, 8), block(3.0, 8)];
        let source = Box::new(MockSource::new(blocks.clone()));
        let (sink, written) = mock_sink();
        let downsampler = Downsampler::new(0, FcPos::Center).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        run(source, downsampler, sink, 4, stop).unwrap();

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 3);
        for (i, expected) in blocks[1..].iter().enumerate() {
            assert_eq!(&written[i], expected, "block {} out of order", i);
        }
    }

    #[test]
    fn test_downsampling_halves_forwarded_blocks() {
        let blocks = vec![block(0.0, 64), block(1.0, 64)];
        let source = Box::new(MockSource::new(blocks));
        let (sink, written) = mock_sink();
        let downsampler = Downsampler::new(1, FcPos::Center).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        run(source, downsampler, sink, 0, stop).unwrap();

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].len(), 32);
    }

    #[test]
    fn test_cancellation_unblocks_pipeline() {
        let source = Box::new(MockSource::holding());
        let (sink, written) = mock_sink();
        let downsampler = Downsampler::new(0, FcPos::Center).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_setter = Arc::clone(&stop);
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stop_setter.store(true, Ordering::Relaxed);
        });

        // The main loop is blocked in pull() on an empty buffer; the
        // producer observes the flag, signals end-of-stream, and the
        // whole pipeline unwinds without a residual blocked thread.
        run(source, downsampler, sink, 4, stop).unwrap();
        canceller.join().unwrap();

        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sink_errors_do_not_halt_pipeline() {
        struct FailingSink {
            calls: Arc<Mutex<usize>>,
        }
        impl SampleSink for FailingSink {
            fn write(&mut self, _samples: &[Complex32]) -> Result<(), SinkError> {
                *self.calls.lock().unwrap() += 1;
                Err(SinkError::Send(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "network down",
                )))
            }
        }

        let calls = Arc::new(Mutex::new(0));
        let sink = Box::new(FailingSink {
            calls: Arc::clone(&calls),
        });
        let blocks = vec![block(0.0, 8), block(1.0, 8), block(2.0, 8)];
        let source = Box::new(MockSource::new(blocks));
        let downsampler = Downsampler::new(0, FcPos::Center).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        run(source, downsampler, sink, 0, stop).unwrap();

        // Every post-discard block is still attempted.
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
