//! The muxer: stream registry, statistics, worker thread, lifecycle
//!
//! One worker thread repeatedly picks the stream whose container-reported
//! running pts is smallest, pops a packet from its queue, rescales its
//! timestamps into the stream's time base, and hands it to the container.
//! The worker exits once every stream is finished and drained.
//!
//! Encoders feed the muxer through [`PacketSink`] handles; each stream's
//! queue has its own lock, held only for push/pop, so encoder tasks never
//! contend with container writes.

use crate::container::{CodecDesc, Container, ContainerLibrary, FormatDesc};
use crate::encoder::Encoder;
use crate::error::{MuxerError, MuxerResult};
use crate::packet::Packet;
use glcast_core::{rescale, NO_TIMESTAMP};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

/// Fixed capacity of the stream registry (video + audio).
pub const MAX_STREAMS: usize = 2;

/// How long the worker naps when every eligible queue is momentarily
/// empty. There is no condition variable; this bounds the added latency.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// "No pts seen yet", in seconds. Orders below every real timestamp.
const NOPTS_SECONDS: f64 = f64::MIN;

struct StreamData {
    done: bool,
    queue: VecDeque<Packet>,
}

struct StatsData {
    total_bytes: u64,
    bit_rate: f64,
    window_pts: f64,
    window_bytes: u64,
}

struct Shared {
    streams: Vec<Mutex<StreamData>>,
    stats: Mutex<StatsData>,
    stream_count: AtomicUsize,
    started: AtomicBool,
    is_done: AtomicBool,
    error_occurred: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let mut streams = Vec::with_capacity(MAX_STREAMS);
        for _ in 0..MAX_STREAMS {
            streams.push(Mutex::new(StreamData {
                done: false,
                queue: VecDeque::new(),
            }));
        }
        Self {
            streams,
            stats: Mutex::new(StatsData {
                total_bytes: 0,
                bit_rate: 0.0,
                window_pts: NOPTS_SECONDS,
                window_bytes: 0,
            }),
            stream_count: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            is_done: AtomicBool::new(false),
            error_occurred: AtomicBool::new(false),
        }
    }

    fn add_packet(&self, stream_index: usize, packet: Packet) {
        assert!(self.started.load(Ordering::Acquire), "muxer not started");
        assert!(stream_index < self.stream_count.load(Ordering::Acquire));
        self.streams[stream_index]
            .lock()
            .unwrap()
            .queue
            .push_back(packet);
    }

    fn end_stream(&self, stream_index: usize) {
        assert!(stream_index < self.stream_count.load(Ordering::Acquire));
        self.streams[stream_index].lock().unwrap().done = true;
    }

    fn queued_packet_count(&self, stream_index: usize) -> usize {
        assert!(stream_index < self.stream_count.load(Ordering::Acquire));
        self.streams[stream_index].lock().unwrap().queue.len()
    }
}

/// Cloneable ingestion handle handed to encoder tasks.
#[derive(Clone)]
pub struct PacketSink {
    shared: Arc<Shared>,
}

impl PacketSink {
    /// Append a packet to stream `stream_index`'s queue. Legal only after
    /// the muxer has started. Queues are unbounded here; backpressure is
    /// the encoder's concern.
    pub fn add_packet(&self, stream_index: usize, packet: Packet) {
        self.shared.add_packet(stream_index, packet);
    }

    /// Mark stream `stream_index` finished. The worker drains whatever is
    /// still queued and then stops considering the stream.
    pub fn end_stream(&self, stream_index: usize) {
        self.shared.end_stream(stream_index);
    }

    pub fn queued_packet_count(&self, stream_index: usize) -> usize {
        self.shared.queued_packet_count(stream_index)
    }
}

/// Interleaves registered packet streams into one container file.
pub struct Muxer {
    output_path: PathBuf,
    format: FormatDesc,
    container: Arc<Mutex<Box<dyn Container>>>,
    encoders: Vec<Option<Box<dyn Encoder>>>,
    shared: Arc<Shared>,
    stream_count: usize,
    started: bool,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muxer")
            .field("output_path", &self.output_path)
            .field("stream_count", &self.stream_count)
            .field("started", &self.started)
            .finish()
    }
}

impl Muxer {
    /// Resolve the container format by name, allocate the writing context
    /// and open the output file.
    pub fn new(
        library: &dyn ContainerLibrary,
        container_name: &str,
        output_path: impl AsRef<Path>,
    ) -> MuxerResult<Self> {
        let format = library
            .guess_format(container_name)
            .ok_or_else(|| MuxerError::FormatNotFound(container_name.to_string()))?;
        info!("Using format {} ({})", format.name, format.long_name);

        let output_path = output_path.as_ref().to_path_buf();
        let mut container = library.alloc_context(format.clone());
        container.open(&output_path)?;

        let mut encoders = Vec::with_capacity(MAX_STREAMS);
        encoders.resize_with(MAX_STREAMS, || None);

        Ok(Self {
            output_path,
            format,
            container: Arc::new(Mutex::new(container)),
            encoders,
            shared: Arc::new(Shared::new()),
            stream_count: 0,
            started: false,
            worker: None,
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Add a stream to the container. Legal only before `start`; indices
    /// are assigned densely from 0.
    pub fn create_stream(&mut self, mut codec: CodecDesc) -> MuxerResult<usize> {
        assert!(!self.started, "streams must be created before start");
        if self.stream_count >= MAX_STREAMS {
            return Err(MuxerError::TooManyStreams(MAX_STREAMS));
        }

        // some containers store codec headers globally instead of in-band
        if self.format.needs_global_header {
            codec.global_header = true;
        }

        let index = self.container.lock().unwrap().new_stream(codec)?;
        debug_assert_eq!(index, self.stream_count);
        self.stream_count += 1;
        self.shared
            .stream_count
            .store(self.stream_count, Ordering::Release);
        Ok(index)
    }

    /// Bind the encoder feeding stream `stream_index`. Exactly one per
    /// stream, before `start`.
    pub fn register_encoder(&mut self, stream_index: usize, encoder: Box<dyn Encoder>) {
        assert!(!self.started, "encoders must register before start");
        assert!(stream_index < self.stream_count, "no such stream");
        assert!(
            self.encoders[stream_index].is_none(),
            "stream {stream_index} already has an encoder"
        );
        self.encoders[stream_index] = Some(encoder);
    }

    /// Write the container header and spawn the worker. The stream count
    /// is frozen from here on.
    pub fn start(&mut self) -> MuxerResult<()> {
        assert!(!self.started, "muxer already started");
        for i in 0..self.stream_count {
            assert!(self.encoders[i].is_some(), "stream {i} has no encoder");
        }

        if let Err(e) = self.container.lock().unwrap().write_header() {
            error!("Can't write header: {e}");
            return Err(MuxerError::HeaderWrite);
        }

        self.started = true;
        self.shared.started.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let container = self.container.clone();
        let stream_count = self.stream_count;
        self.worker = Some(std::thread::spawn(move || {
            worker_main(shared, container, stream_count)
        }));

        Ok(())
    }

    /// Ask every encoder to flush. Non-blocking; each encoder ends its
    /// stream through its sink once the flush completes, and the worker
    /// exits after draining.
    pub fn finish(&self) {
        assert!(self.started, "muxer not started");
        info!("Finishing encoders ...");
        for encoder in self.encoders.iter().flatten() {
            encoder.finish();
        }
    }

    /// Ingestion handle for encoder tasks.
    pub fn sink(&self) -> PacketSink {
        PacketSink {
            shared: self.shared.clone(),
        }
    }

    /// Append a packet to stream `stream_index`'s queue. Legal only after
    /// `start`.
    pub fn add_packet(&self, stream_index: usize, packet: Packet) {
        self.shared.add_packet(stream_index, packet);
    }

    /// Mark stream `stream_index` finished.
    pub fn end_stream(&self, stream_index: usize) {
        self.shared.end_stream(stream_index);
    }

    pub fn queued_packet_count(&self, stream_index: usize) -> usize {
        self.shared.queued_packet_count(stream_index)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether the worker has drained every stream and exited cleanly.
    pub fn is_done(&self) -> bool {
        self.shared.is_done.load(Ordering::Acquire)
    }

    /// Whether the worker died on a container write or rescale failure.
    pub fn error_occurred(&self) -> bool {
        self.shared.error_occurred.load(Ordering::Acquire)
    }

    /// Bytes accepted by the container so far.
    pub fn total_bytes(&self) -> u64 {
        self.shared.stats.lock().unwrap().total_bytes
    }

    /// Sliding-window estimate of the output bit rate, in bits per second
    /// of stream time.
    pub fn actual_bit_rate(&self) -> f64 {
        self.shared.stats.lock().unwrap().bit_rate
    }

    /// Write the trailer if we ever started, destroy the encoders, and
    /// close the container. Runs with the worker joined.
    fn free(&mut self) {
        // a worker that died unwinding may have poisoned the lock
        let mut container = match self.container.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.started {
            if container.write_trailer().is_err() {
                // drop context: log and move on
                error!("Can't write trailer, continuing anyway");
            }
            self.started = false;
        }
        for slot in self.encoders.iter_mut() {
            slot.take();
        }
        container.close();
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if self.started {
            info!("Stopping encoders ...");
            for encoder in self.encoders.iter().flatten() {
                encoder.stop();
            }
            if let Some(worker) = self.worker.take() {
                info!("Waiting for muxer thread to stop ...");
                let _ = worker.join();
            }
        }
        self.free();
    }
}

fn worker_main(
    shared: Arc<Shared>,
    container: Arc<Mutex<Box<dyn Container>>>,
    stream_count: usize,
) {
    info!("Muxer thread started");
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        mux_loop(&shared, &container, stream_count)
    }));
    match outcome {
        Ok(Ok(())) => {
            shared.is_done.store(true, Ordering::Release);
            info!("Muxer thread stopped");
        }
        Ok(Err(e)) => {
            shared.error_occurred.store(true, Ordering::Release);
            error!("Error in muxer thread: {e}");
        }
        Err(_) => {
            shared.error_occurred.store(true, Ordering::Release);
            error!("Unknown panic in muxer thread");
        }
    }
}

fn mux_loop(
    shared: &Shared,
    container: &Mutex<Box<dyn Container>>,
    stream_count: usize,
) -> MuxerResult<()> {
    loop {
        // Find the oldest stream that isn't done yet, judged by the
        // container-reported pts of its last write. A stream that has
        // never been written orders below everything, so first writes go
        // in index order; ties also go to the lowest index.
        let mut oldest_stream = None;
        let mut oldest_pts = f64::MAX;
        {
            let container = container.lock().unwrap();
            for i in 0..stream_count {
                let stream = shared.streams[i].lock().unwrap();
                if !stream.done || !stream.queue.is_empty() {
                    let ticks = container.stream_pts(i);
                    let pts = if ticks == NO_TIMESTAMP {
                        NOPTS_SECONDS
                    } else {
                        ticks as f64 * container.stream_time_base(i).to_f64()
                    };
                    if pts < oldest_pts {
                        oldest_stream = Some(i);
                        oldest_pts = pts;
                    }
                }
            }
        }

        // every stream done and drained
        let Some(index) = oldest_stream else {
            return Ok(());
        };

        let packet = shared.streams[index].lock().unwrap().queue.pop_front();
        let Some(mut packet) = packet else {
            std::thread::sleep(QUEUE_POLL_INTERVAL);
            continue;
        };

        packet.stream_index = index;

        let total_bytes = {
            let mut container = container.lock().unwrap();
            let codec_tb = container.codec_time_base(index);
            let stream_tb = container.stream_time_base(index);
            if packet.pts != NO_TIMESTAMP {
                packet.pts = rescale(packet.pts, codec_tb, stream_tb);
            }
            if packet.dts != NO_TIMESTAMP {
                packet.dts = rescale(packet.dts, codec_tb, stream_tb);
            }

            container.write_interleaved(&mut packet)?;
            // the payload now belongs to the container
            debug_assert!(packet.is_consumed());

            container.bytes_written()
        };

        let mut stats = shared.stats.lock().unwrap();
        stats.total_bytes = total_bytes;
        if stats.window_pts == NOPTS_SECONDS && oldest_pts != NOPTS_SECONDS {
            stats.window_pts = oldest_pts;
            stats.window_bytes = total_bytes;
        }
        if stats.window_pts != NOPTS_SECONDS {
            let timedelta = oldest_pts - stats.window_pts;
            if timedelta > 0.999999 {
                stats.bit_rate = ((total_bytes - stats.window_bytes) * 8) as f64 / timedelta;
                stats.window_pts = oldest_pts;
                stats.window_bytes = total_bytes;
            }
        }
    }
}
