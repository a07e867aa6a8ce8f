use crate::core::{
    AudioEncoding, AudioFormat, MediaFormat, Result, SourceError, TICKS_PER_SECOND,
};
use crate::source::demuxer::{
    BufferPoll, DemuxedBuffer, Demuxer, DemuxerStream, PushData, ReadOffset, SeekFlags,
};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// 一次读请求
#[derive(Debug, Clone, Copy)]
struct ReadRequest {
    offset: u64,
    size: u32,
    /// 是否已交给读取线程
    served: bool,
}

/// 一次读取的结果
#[derive(Debug)]
enum ReadResult {
    Data(Vec<u8>),
    EndOfData,
    Failure,
    Disconnected,
}

#[derive(Default)]
struct WaveState {
    request: Option<ReadRequest>,
    response: Option<PushData>,
    disconnected: bool,

    enabled: Option<AudioFormat>,
    /// 数据块内的字节位置
    position: u64,
    /// seek 设置的结束位置
    stop: Option<u64>,
    /// 已交出、等待释放的缓冲长度
    handed_out: Option<u64>,
    discontinuity: bool,
}

/// 推模式读取协议：解析方发出请求并等待，读取线程取走请求、读完后推回结果
struct WaveShared {
    state: Mutex<WaveState>,
    // 有新请求或已断开
    request_cond: Condvar,
    // 请求已完成、请求槽空闲或已断开
    done_cond: Condvar,
}

impl WaveShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(WaveState::default()),
            request_cond: Condvar::new(),
            done_cond: Condvar::new(),
        }
    }

    /// 阻塞读取 [offset, offset + size)，同一时刻只有一个请求在途
    fn read(&self, offset: u64, size: u32) -> ReadResult {
        let mut state = self.state.lock();
        while state.request.is_some() && !state.disconnected {
            self.done_cond.wait(&mut state);
        }
        if state.disconnected {
            return ReadResult::Disconnected;
        }

        state.request = Some(ReadRequest {
            offset,
            size,
            served: false,
        });
        state.response = None;
        self.request_cond.notify_all();

        while state.response.is_none() && !state.disconnected {
            self.done_cond.wait(&mut state);
        }
        state.request = None;
        let response = state.response.take();
        self.done_cond.notify_all();

        match response {
            Some(PushData::Data(data)) if data.is_empty() => ReadResult::EndOfData,
            Some(PushData::Data(data)) => ReadResult::Data(data),
            Some(PushData::EndOfData) => ReadResult::EndOfData,
            Some(PushData::Failure) => ReadResult::Failure,
            None => ReadResult::Disconnected,
        }
    }
}

/// WAV（RIFF/WAVE）解封装器
///
/// 只有一个音频流；所有字节都通过 next_read_offset / push_data 由读取线程提供。
/// 选择 32 位浮点输出时在拉取时完成样本格式转换。
pub struct WaveDemuxer {
    shared: Arc<WaveShared>,
    chunk_size: u32,
    stream: Mutex<Option<Arc<WaveStream>>>,
}

impl WaveDemuxer {
    /// `chunk_size`：每个样本的目标字节数（会按帧对齐）
    pub fn new(chunk_size: u32) -> Self {
        Self {
            shared: Arc::new(WaveShared::new()),
            chunk_size,
            stream: Mutex::new(None),
        }
    }

    fn read_exact(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        match self.shared.read(offset, size) {
            ReadResult::Data(data) if data.len() == size as usize => Ok(data),
            ReadResult::Data(_) | ReadResult::EndOfData => {
                Err(SourceError::Demuxer(format!("WAV 文件在 {} 处被截断", offset)))
            }
            ReadResult::Failure => Err(SourceError::Demuxer(format!("读取 {} 失败", offset))),
            ReadResult::Disconnected => Err(SourceError::Demuxer("解封装器已断开".to_string())),
        }
    }
}

impl Demuxer for WaveDemuxer {
    fn connect(&self, file_size: u64, url: Option<&str>) -> Result<usize> {
        info!("🔍 解析 WAV: {}", url.unwrap_or("<stream>"));

        let header = self.read_exact(0, 12)?;
        if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
            return Err(SourceError::UnsupportedContainer);
        }

        let mut format = None;
        let mut offset = 12u64;
        let (data_offset, data_size) = loop {
            if offset + 8 > file_size {
                return Err(SourceError::Demuxer("找不到 data 块".to_string()));
            }
            let chunk = self.read_exact(offset, 8)?;
            let id = [chunk[0], chunk[1], chunk[2], chunk[3]];
            let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);

            match &id {
                b"fmt " => {
                    let body = self.read_exact(offset + 8, size)?;
                    format = Some(parse_fmt_chunk(&body)?);
                }
                b"data" => {
                    let start = offset + 8;
                    break (start, u64::from(size).min(file_size.saturating_sub(start)));
                }
                _ => debug!("跳过块 {:?} ({} 字节)", String::from_utf8_lossy(&id), size),
            }
            // 块按 2 字节对齐
            offset += 8 + u64::from(size) + u64::from(size & 1);
        };

        let format = format.ok_or_else(|| SourceError::Demuxer("data 块之前没有 fmt 块".into()))?;
        let block_align = u64::from(format.block_align().unwrap_or(1).max(1));
        let data_size = data_size - data_size % block_align;

        info!(
            "✅ WAV: {:?} {} 声道 {} Hz, 数据 {} 字节",
            format.encoding, format.channels, format.rate, data_size
        );

        let stream = WaveStream {
            shared: Arc::clone(&self.shared),
            format,
            block_align,
            chunk_size: aligned_chunk(self.chunk_size, block_align),
            data_offset,
            data_size,
        };
        *self.stream.lock() = Some(Arc::new(stream));
        Ok(1)
    }

    fn stream(&self, index: usize) -> Option<Arc<dyn DemuxerStream>> {
        if index != 0 {
            return None;
        }
        self.stream
            .lock()
            .as_ref()
            .map(|s| Arc::clone(s) as Arc<dyn DemuxerStream>)
    }

    fn next_read_offset(&self, timeout: Duration) -> ReadOffset {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.disconnected {
                return ReadOffset::Disconnected;
            }
            if let Some(request) = state.request.as_mut() {
                if !request.served {
                    request.served = true;
                    return ReadOffset::Request {
                        offset: request.offset,
                        size: request.size,
                    };
                }
            }
            if self
                .shared
                .request_cond
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return ReadOffset::Pending;
            }
        }
    }

    fn push_data(&self, data: PushData) {
        let mut state = self.shared.state.lock();
        let waiting = matches!(state.request, Some(ReadRequest { served: true, .. }));
        if !waiting || state.response.is_some() {
            warn!("⚠️ 没有等待中的读请求，丢弃推送的数据");
            return;
        }
        state.response = Some(data);
        self.shared.done_cond.notify_all();
    }

    fn disconnect(&self) {
        let mut state = self.shared.state.lock();
        if !state.disconnected {
            debug!("WAV 解封装器断开");
        }
        state.disconnected = true;
        self.shared.request_cond.notify_all();
        self.shared.done_cond.notify_all();
    }

    fn description(&self) -> String {
        match self.stream.lock().as_ref() {
            Some(stream) => format!(
                "WAV {:?} {}ch {}Hz",
                stream.format.encoding, stream.format.channels, stream.format.rate
            ),
            None => "WAV (未连接)".to_string(),
        }
    }
}

/// WAV 的唯一音频流
struct WaveStream {
    shared: Arc<WaveShared>,
    format: AudioFormat,
    block_align: u64,
    chunk_size: u64,
    data_offset: u64,
    data_size: u64,
}

impl WaveStream {
    fn bytes_to_ticks(&self, bytes: u64) -> i64 {
        let frames = bytes / self.block_align;
        (u128::from(frames) * TICKS_PER_SECOND as u128 / u128::from(self.format.rate.max(1))) as i64
    }

    fn ticks_to_bytes(&self, ticks: i64) -> u64 {
        let frames = u128::from(ticks.max(0) as u64) * u128::from(self.format.rate)
            / TICKS_PER_SECOND as u128;
        (frames as u64).saturating_mul(self.block_align).min(self.data_size)
    }

    fn float_format(&self) -> AudioFormat {
        AudioFormat {
            encoding: AudioEncoding::PcmF32,
            ..self.format.clone()
        }
    }
}

impl DemuxerStream for WaveStream {
    fn preferred_format(&self) -> MediaFormat {
        MediaFormat::Audio(self.format.clone())
    }

    fn current_format(&self) -> Option<MediaFormat> {
        self.shared.state.lock().enabled.clone().map(MediaFormat::Audio)
    }

    fn enable(&self, format: &MediaFormat) -> Result<()> {
        let native = MediaFormat::Audio(self.format.clone());
        let float = MediaFormat::Audio(self.float_format());
        let enabled = if native.is_compatible(format) {
            self.format.clone()
        } else if float.is_compatible(format) {
            self.float_format()
        } else {
            return Err(SourceError::InvalidMediaType);
        };
        debug!("启用 WAV 流: {:?}", enabled.encoding);
        self.shared.state.lock().enabled = Some(enabled);
        Ok(())
    }

    fn disable(&self) {
        self.shared.state.lock().enabled = None;
    }

    fn seek(&self, _rate: f64, start: i64, stop: Option<i64>, _flags: SeekFlags) -> Result<()> {
        if start < 0 {
            return Err(SourceError::InvalidSeekPosition(start));
        }
        let mut state = self.shared.state.lock();
        state.position = self.ticks_to_bytes(start);
        state.stop = stop.map(|t| self.ticks_to_bytes(t));
        state.handed_out = None;
        state.discontinuity = true;
        debug!("WAV seek: {} -> 字节 {}", start, state.position);
        Ok(())
    }

    fn next_buffer(&self) -> BufferPoll {
        let (position, size, target) = {
            let state = self.shared.state.lock();
            if state.disconnected {
                return BufferPoll::Unavailable;
            }
            let Some(target) = state.enabled.clone() else {
                return BufferPoll::Unavailable;
            };
            let end = state.stop.unwrap_or(self.data_size).min(self.data_size);
            if state.position >= end {
                return BufferPoll::EndOfStream;
            }
            (state.position, self.chunk_size.min(end - state.position), target)
        };

        let data = match self.shared.read(self.data_offset + position, size as u32) {
            ReadResult::Data(data) => data,
            ReadResult::EndOfData => return BufferPoll::EndOfStream,
            ReadResult::Failure => {
                return BufferPoll::Error(format!("读取 WAV 数据失败 (偏移 {})", position))
            }
            ReadResult::Disconnected => return BufferPoll::Unavailable,
        };

        let read = data.len() as u64;
        let discontinuity = {
            let mut state = self.shared.state.lock();
            state.handed_out = Some(read);
            std::mem::take(&mut state.discontinuity)
        };

        let data = if target.encoding == self.format.encoding {
            data
        } else {
            convert_to_f32(self.format.encoding, &data)
        };

        BufferPoll::Buffer(DemuxedBuffer {
            data,
            pts: Some(self.bytes_to_ticks(position)),
            duration: Some(self.bytes_to_ticks(read)),
            discontinuity,
            delta: false,
        })
    }

    fn release_buffer(&self) {
        let mut state = self.shared.state.lock();
        if let Some(read) = state.handed_out.take() {
            state.position += read;
        }
    }

    fn duration(&self) -> Option<i64> {
        Some(self.bytes_to_ticks(self.data_size))
    }
}

fn aligned_chunk(chunk_size: u32, block_align: u64) -> u64 {
    let chunk = u64::from(chunk_size);
    (chunk - chunk % block_align).max(block_align)
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// 解析 fmt 块
fn parse_fmt_chunk(body: &[u8]) -> Result<AudioFormat> {
    if body.len() < 16 {
        return Err(SourceError::Demuxer(format!("fmt 块太短: {} 字节", body.len())));
    }
    let mut tag = le_u16(body, 0);
    let channels = le_u16(body, 2);
    let rate = le_u32(body, 4);
    let bits = le_u16(body, 14);
    let mut channel_mask = 0;

    if tag == WAVE_FORMAT_EXTENSIBLE {
        if body.len() < 40 {
            return Err(SourceError::Demuxer("WAVE_FORMAT_EXTENSIBLE 块太短".to_string()));
        }
        channel_mask = le_u32(body, 20);
        // 子格式 GUID 的前两个字节就是实际的格式标签
        tag = le_u16(body, 24);
    }

    let encoding = match (tag, bits) {
        (WAVE_FORMAT_PCM, 8) => AudioEncoding::PcmU8,
        (WAVE_FORMAT_PCM, 16) => AudioEncoding::PcmS16,
        (WAVE_FORMAT_PCM, 24) => AudioEncoding::PcmS24,
        (WAVE_FORMAT_PCM, 32) => AudioEncoding::PcmS32,
        (WAVE_FORMAT_IEEE_FLOAT, 32) => AudioEncoding::PcmF32,
        (WAVE_FORMAT_IEEE_FLOAT, 64) => AudioEncoding::PcmF64,
        _ => {
            return Err(SourceError::Demuxer(format!(
                "不支持的 WAV 编码: tag=0x{:04x} bits={}",
                tag, bits
            )))
        }
    };
    if channels == 0 || rate == 0 {
        return Err(SourceError::Demuxer("声道数或采样率为 0".to_string()));
    }

    if channel_mask == 0 {
        channel_mask = default_channel_mask(channels);
    }

    Ok(AudioFormat {
        encoding,
        channels,
        rate,
        channel_mask,
    })
}

fn default_channel_mask(channels: u16) -> u32 {
    match channels {
        1 => 0x4, // 前中
        2 => 0x3, // 前左 | 前右
        n if n < 32 => (1u32 << n) - 1,
        _ => 0,
    }
}

/// 把 PCM 样本转换成小端 32 位浮点
fn convert_to_f32(encoding: AudioEncoding, data: &[u8]) -> Vec<u8> {
    let samples: Vec<f32> = match encoding {
        AudioEncoding::PcmU8 => data.iter().map(|&b| (f32::from(b) - 128.0) / 128.0).collect(),
        AudioEncoding::PcmS16 => data
            .chunks_exact(2)
            .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32768.0)
            .collect(),
        AudioEncoding::PcmS24 => data
            .chunks_exact(3)
            .map(|c| (i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8) as f32 / 8_388_608.0)
            .collect(),
        AudioEncoding::PcmS32 => data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        AudioEncoding::PcmF64 => data
            .chunks_exact(8)
            .map(|c| {
                f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
            })
            .collect(),
        AudioEncoding::PcmF32 | AudioEncoding::Mpeg1 { .. } | AudioEncoding::Aac => {
            return data.to_vec()
        }
    };
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MediaEvent, SourceConfig, StartPosition, TimeFormat};
    use crate::source::{MediaSource, MemoryByteStream};
    use crate::testing::{event_names, next_event, test_config, wav_bytes};

    /// 8000 Hz 立体声 16 位，1000 帧（125ms）
    fn stereo_s16() -> Vec<u8> {
        let data: Vec<u8> = (0..1000i16)
            .flat_map(|n| {
                let l = (n * 16).to_le_bytes();
                let r = (-n * 16).to_le_bytes();
                [l[0], l[1], r[0], r[1]]
            })
            .collect();
        wav_bytes(WAVE_FORMAT_PCM, 2, 8000, 16, &data)
    }

    fn wave_source(bytes: Vec<u8>, chunk: u32) -> Result<MediaSource> {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = SourceConfig {
            read_chunk_size: chunk,
            ..test_config()
        };
        MediaSource::new(
            Arc::new(MemoryByteStream::from_bytes(bytes)),
            Arc::new(WaveDemuxer::new(config.read_chunk_size)),
            config,
        )
    }

    /// 请求样本直到流结束，返回 (pts, 数据长度, 首个样本是否不连续)
    fn drain(source: &MediaSource) -> (Vec<i64>, usize, bool) {
        let stream = source.stream(0).unwrap();
        let mut pts = Vec::new();
        let mut total = 0;
        let mut first_discontinuity = false;
        loop {
            stream.request_sample(None).unwrap();
            match next_event(stream.event_queue()) {
                MediaEvent::MediaSample(sample) => {
                    if pts.is_empty() {
                        first_discontinuity = sample.discontinuity;
                    }
                    pts.push(sample.pts);
                    total += sample.data.len();
                }
                MediaEvent::EndOfStream => return (pts, total, first_discontinuity),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_fmt_chunk() {
        let bytes = wav_bytes(WAVE_FORMAT_IEEE_FLOAT, 1, 44100, 32, &[]);
        let format = parse_fmt_chunk(&bytes[20..36]).unwrap();
        assert_eq!(format.encoding, AudioEncoding::PcmF32);
        assert_eq!(format.channels, 1);
        assert_eq!(format.rate, 44100);
        assert_eq!(format.channel_mask, 0x4);

        let bytes = wav_bytes(0x0055, 2, 44100, 0, &[]);
        assert!(parse_fmt_chunk(&bytes[20..36]).is_err());
    }

    #[test]
    fn test_parse_extensible_fmt_chunk() {
        let mut body = Vec::new();
        body.extend_from_slice(&WAVE_FORMAT_EXTENSIBLE.to_le_bytes());
        body.extend_from_slice(&6u16.to_le_bytes());
        body.extend_from_slice(&48000u32.to_le_bytes());
        body.extend_from_slice(&(48000u32 * 18).to_le_bytes());
        body.extend_from_slice(&18u16.to_le_bytes());
        body.extend_from_slice(&24u16.to_le_bytes());
        body.extend_from_slice(&22u16.to_le_bytes());
        body.extend_from_slice(&24u16.to_le_bytes());
        body.extend_from_slice(&0x3Fu32.to_le_bytes());
        body.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
        body.extend_from_slice(&[0u8; 14]);

        let format = parse_fmt_chunk(&body).unwrap();
        assert_eq!(format.encoding, AudioEncoding::PcmS24);
        assert_eq!(format.channels, 6);
        assert_eq!(format.channel_mask, 0x3F);
        assert_eq!(format.block_align(), Some(18));
    }

    #[test]
    fn test_convert_to_f32() {
        let converted = convert_to_f32(AudioEncoding::PcmS16, &[0x00, 0x40, 0x00, 0xC0]);
        let samples: Vec<f32> = converted
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(samples, vec![0.5, -0.5]);

        let converted = convert_to_f32(AudioEncoding::PcmU8, &[128, 0]);
        assert_eq!(converted.len(), 8);
        assert_eq!(f32::from_le_bytes([converted[4], converted[5], converted[6], converted[7]]), -1.0);
    }

    #[test]
    fn test_aligned_chunk() {
        assert_eq!(aligned_chunk(1000, 6), 996);
        assert_eq!(aligned_chunk(2, 6), 6);
    }

    #[test]
    fn test_plays_whole_file() {
        let source = wave_source(stereo_s16(), 1000).unwrap();
        let pd = source.create_presentation_descriptor().unwrap();
        assert_eq!(pd.duration(), Some(1_250_000));
        assert!(source.characteristics().unwrap().has_duration);

        source.start(&pd, TimeFormat::Default, StartPosition::At(0)).unwrap();
        assert_eq!(
            event_names(source.stream(0).unwrap().event_queue(), 1),
            vec!["StreamStarted"]
        );

        let (pts, total, first_discontinuity) = drain(&source);
        assert_eq!(total, 4000);
        assert_eq!(pts.len(), 4);
        assert_eq!(pts[0], 0);
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        assert!(first_discontinuity);

        assert_eq!(
            event_names(source.event_queue(), 3),
            vec!["NewStream", "SourceStarted", "EndOfPresentation"]
        );
        source.shutdown().unwrap();
    }

    #[test]
    fn test_seek_to_middle() {
        let source = wave_source(stereo_s16(), 4096).unwrap();
        let stream = source.stream(0).unwrap();
        let pd = source.create_presentation_descriptor().unwrap();

        source.start(&pd, TimeFormat::Default, StartPosition::At(0)).unwrap();
        source
            .start(&pd, TimeFormat::Default, StartPosition::At(625_000))
            .unwrap();
        assert_eq!(
            event_names(stream.event_queue(), 2),
            vec!["StreamStarted", "StreamSeeked"]
        );

        let (pts, total, _) = drain(&source);
        assert_eq!(pts[0], 625_000);
        assert_eq!(total, 2000);
    }

    #[test]
    fn test_float_output_is_negotiated() {
        let source = wave_source(stereo_s16(), 4000).unwrap();
        let stream = source.stream(0).unwrap();
        let mut pd = source.create_presentation_descriptor().unwrap();

        let float = pd.stream_descriptor(0).unwrap().1.media_types()[1].clone();
        pd.stream_descriptor_mut(0)
            .unwrap()
            .set_current_media_type(&float)
            .unwrap();
        source.start(&pd, TimeFormat::Default, StartPosition::At(0)).unwrap();
        assert_eq!(event_names(stream.event_queue(), 1), vec!["StreamStarted"]);

        let (_, total, _) = drain(&source);
        assert_eq!(total, 8000);
    }

    #[test]
    fn test_rejects_non_wave_data() {
        let err = wave_source(b"OggS not a wave file at all".to_vec(), 1000).err();
        assert!(matches!(err, Some(SourceError::UnsupportedContainer)));
    }

    #[test]
    fn test_truncated_header_fails() {
        let mut bytes = stereo_s16();
        bytes.truncate(30);
        assert!(wave_source(bytes, 1000).is_err());
    }
}
