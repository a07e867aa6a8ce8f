//! 测试辅助：脚本化的解封装器、WAV 构造和事件断言
use crate::core::{
    AudioEncoding, AudioFormat, EventQueue, MediaEvent, MediaFormat, Result, SourceConfig,
    SourceError, VideoEncoding, VideoFormat,
};
use crate::source::demuxer::{
    BufferPoll, DemuxedBuffer, Demuxer, DemuxerStream, PushData, ReadOffset, SeekFlags,
};
use crate::source::{MediaSource, MemoryByteStream};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// 模拟流每个缓冲的时长（100ms）
pub const MOCK_BUFFER_TICKS: i64 = 1_000_000;

pub fn test_config() -> SourceConfig {
    SourceConfig {
        reader_poll_interval_ms: 5,
        ..Default::default()
    }
}

/// 取下一个事件，超时则测试失败
pub fn next_event(queue: &EventQueue) -> MediaEvent {
    match queue.get_event_timeout(EVENT_TIMEOUT) {
        Ok(Some(event)) => event,
        Ok(None) => panic!("timed out waiting for event"),
        Err(e) => panic!("event queue failed: {}", e),
    }
}

/// 依次取 n 个事件的名字
pub fn event_names(queue: &EventQueue, n: usize) -> Vec<&'static str> {
    (0..n).map(|_| next_event(queue).name()).collect()
}

pub fn assert_no_event(queue: &EventQueue, wait: Duration) {
    if let Ok(Some(event)) = queue.get_event_timeout(wait) {
        panic!("unexpected event {:?}", event);
    }
}

/// 轮询等待条件成立
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// 被释放时计数的令牌内容
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn new(counter: &Arc<AtomicUsize>) -> Self {
        Self(Arc::clone(counter))
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// 缓冲耗尽之后的拉取结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockTail {
    EndOfStream,
    Unavailable,
    Error,
}

pub struct MockStreamSpec {
    format: MediaFormat,
    buffers: usize,
    tail: MockTail,
    duration: Option<i64>,
    fail_enable: bool,
    fail_seek: bool,
    retry: bool,
    gate: Option<Receiver<()>>,
}

impl MockStreamSpec {
    fn new(format: MediaFormat, buffers: usize) -> Self {
        Self {
            format,
            buffers,
            tail: MockTail::EndOfStream,
            duration: None,
            fail_enable: false,
            fail_seek: false,
            retry: false,
            gate: None,
        }
    }

    pub fn video(buffers: usize) -> Self {
        Self::new(
            MediaFormat::Video(VideoFormat {
                encoding: VideoEncoding::H264,
                width: 320,
                height: 240,
                fps_n: 10,
                fps_d: 1,
            }),
            buffers,
        )
    }

    pub fn audio(buffers: usize) -> Self {
        Self::new(
            MediaFormat::Audio(AudioFormat {
                encoding: AudioEncoding::Aac,
                channels: 2,
                rate: 48000,
                channel_mask: 0x3,
            }),
            buffers,
        )
    }

    pub fn with_tail(mut self, tail: MockTail) -> Self {
        self.tail = tail;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn failing_enable(mut self) -> Self {
        self.fail_enable = true;
        self
    }

    /// 第一次 seek（从 0 启动）成功，之后的 seek 全部失败
    pub fn failing_seek(mut self) -> Self {
        self.fail_seek = true;
        self
    }

    /// 每个缓冲之前先返回一次 Retry
    pub fn retrying(mut self) -> Self {
        self.retry = true;
        self
    }

    /// 每次拉取都要等测试通过返回的发送端放行（disconnect 也不会提前放行）
    pub fn gated(mut self) -> (Sender<()>, Self) {
        let (tx, rx) = bounded(16);
        self.gate = Some(rx);
        (tx, self)
    }
}

#[derive(Default)]
struct MockCounters {
    calls: AtomicUsize,
    pulls: AtomicUsize,
    disconnected: AtomicBool,
    seeks: Mutex<Vec<i64>>,
    enabled: Mutex<Vec<usize>>,
    disabled: Mutex<Vec<usize>>,
}

impl MockCounters {
    fn call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MockStreamState {
    position: usize,
    handed_out: bool,
    retried: bool,
    enabled: Option<MediaFormat>,
}

struct MockStream {
    index: usize,
    spec: MockStreamSpec,
    state: Mutex<MockStreamState>,
    counters: Arc<MockCounters>,
}

impl MockStream {
    fn wait_gate(&self) {
        let Some(gate) = &self.spec.gate else {
            return;
        };
        let _ = gate.recv_timeout(EVENT_TIMEOUT);
    }
}

impl DemuxerStream for MockStream {
    fn preferred_format(&self) -> MediaFormat {
        self.counters.call();
        self.spec.format.clone()
    }

    fn current_format(&self) -> Option<MediaFormat> {
        self.counters.call();
        self.state.lock().enabled.clone()
    }

    fn enable(&self, format: &MediaFormat) -> Result<()> {
        self.counters.call();
        if self.spec.fail_enable {
            return Err(SourceError::Demuxer("enable failed".to_string()));
        }
        self.counters.enabled.lock().push(self.index);
        self.state.lock().enabled = Some(format.clone());
        Ok(())
    }

    fn disable(&self) {
        self.counters.call();
        self.state.lock().enabled = None;
        self.counters.disabled.lock().push(self.index);
    }

    fn seek(&self, _rate: f64, start: i64, _stop: Option<i64>, _flags: SeekFlags) -> Result<()> {
        self.counters.call();
        let mut seeks = self.counters.seeks.lock();
        seeks.push(start);
        if self.spec.fail_seek && seeks.len() > 1 {
            return Err(SourceError::Demuxer("seek failed".to_string()));
        }
        let mut state = self.state.lock();
        state.position = (start / MOCK_BUFFER_TICKS) as usize;
        state.handed_out = false;
        Ok(())
    }

    fn next_buffer(&self) -> BufferPoll {
        self.counters.call();
        self.counters.pulls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate();
        if self.counters.is_disconnected() && self.spec.gate.is_none() {
            return BufferPoll::Unavailable;
        }

        let mut state = self.state.lock();
        if self.spec.retry && !state.retried {
            state.retried = true;
            return BufferPoll::Retry;
        }
        state.retried = false;

        if state.position >= self.spec.buffers {
            return match self.spec.tail {
                MockTail::EndOfStream => BufferPoll::EndOfStream,
                MockTail::Unavailable => BufferPoll::Unavailable,
                MockTail::Error => BufferPoll::Error("mock failure".to_string()),
            };
        }

        state.handed_out = true;
        let position = state.position as i64;
        BufferPoll::Buffer(DemuxedBuffer {
            data: vec![self.index as u8; 4],
            pts: Some(position * MOCK_BUFFER_TICKS),
            duration: Some(MOCK_BUFFER_TICKS),
            discontinuity: position == 0,
            delta: false,
        })
    }

    fn release_buffer(&self) {
        self.counters.call();
        let mut state = self.state.lock();
        if state.handed_out {
            state.handed_out = false;
            state.position += 1;
        }
    }

    fn duration(&self) -> Option<i64> {
        self.counters.call();
        self.spec.duration
    }
}

/// 脚本化的解封装器：不请求任何字节，流内容由 MockStreamSpec 决定
pub struct MockDemuxer {
    streams: Vec<Arc<MockStream>>,
    counters: Arc<MockCounters>,
}

impl MockDemuxer {
    pub fn new(specs: Vec<MockStreamSpec>) -> Arc<Self> {
        let counters = Arc::new(MockCounters::default());
        let streams = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                Arc::new(MockStream {
                    index,
                    spec,
                    state: Mutex::new(MockStreamState::default()),
                    counters: Arc::clone(&counters),
                })
            })
            .collect();
        Arc::new(Self { streams, counters })
    }

    /// 除读取协议和 disconnect 之外的调用次数
    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.counters.pulls.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> Vec<i64> {
        self.counters.seeks.lock().clone()
    }

    /// 成功 enable 的流索引（按调用顺序）
    pub fn enabled(&self) -> Vec<usize> {
        self.counters.enabled.lock().clone()
    }

    pub fn disabled(&self) -> Vec<usize> {
        self.counters.disabled.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.counters.is_disconnected()
    }
}

impl Demuxer for MockDemuxer {
    fn connect(&self, _file_size: u64, _url: Option<&str>) -> Result<usize> {
        self.counters.call();
        Ok(self.streams.len())
    }

    fn stream(&self, index: usize) -> Option<Arc<dyn DemuxerStream>> {
        self.counters.call();
        self.streams
            .get(index)
            .map(|s| Arc::clone(s) as Arc<dyn DemuxerStream>)
    }

    fn next_read_offset(&self, timeout: Duration) -> ReadOffset {
        if self.counters.is_disconnected() {
            return ReadOffset::Disconnected;
        }
        thread::sleep(timeout.min(Duration::from_millis(2)));
        ReadOffset::Pending
    }

    fn push_data(&self, _data: PushData) {}

    fn disconnect(&self) {
        self.counters.disconnected.store(true, Ordering::SeqCst);
    }

    fn description(&self) -> String {
        format!("mock ({} streams)", self.streams.len())
    }
}

/// 基于模拟解封装器创建媒体源
pub fn mock_source(specs: Vec<MockStreamSpec>) -> (MediaSource, Arc<MockDemuxer>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let demuxer = MockDemuxer::new(specs);
    let source = MediaSource::new(
        Arc::new(MemoryByteStream::from_bytes(vec![0; 64])),
        demuxer.clone(),
        test_config(),
    )
    .expect("mock source");
    (source, demuxer)
}

/// 构造一个 WAV 文件（format_tag 1 = PCM，3 = IEEE float）
pub fn wav_bytes(format_tag: u16, channels: u16, rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
    let block_align = channels * bits / 8;
    let mut out = Vec::with_capacity(44 + data.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&format_tag.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}
