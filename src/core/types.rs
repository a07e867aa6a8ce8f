use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 时间单位：100 纳秒（每秒 10_000_000 个 tick）
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// 媒体源状态
///
/// OPENING 只存在于构造过程中，SHUTDOWN 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Opening,
    Stopped,
    Paused,
    Running,
    Shutdown,
}

/// Start 的时间格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    /// 100 纳秒为单位的呈现时间
    #[default]
    Default,
    /// 以帧为单位（不支持）
    Frames,
    /// 以字节偏移为单位（不支持）
    Bytes,
}

/// Start 的起始位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// 未指定：从停止状态启动时按 0 处理，否则为恢复播放
    #[default]
    Unspecified,
    /// 指定位置（100ns）
    At(i64),
}

impl StartPosition {
    pub fn is_specified(&self) -> bool {
        matches!(self, StartPosition::At(_))
    }

    pub fn time(&self) -> Option<i64> {
        match self {
            StartPosition::At(t) => Some(*t),
            StartPosition::Unspecified => None,
        }
    }
}

/// 调用方提供的不透明令牌
///
/// 核心代码不解释其内容，只负责随样本一起交还，或在 flush/关闭时丢弃（释放）
#[derive(Clone)]
pub struct Token(Arc<dyn Any + Send + Sync>);

impl Token {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Token(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// 两个令牌是否指向同一个对象
    pub fn ptr_eq(&self, other: &Token) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:p})", Arc::as_ptr(&self.0))
    }
}

/// 媒体样本：一段带时间戳的数据
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Vec<u8>,
    pub pts: i64,      // 显示时间戳（100ns）
    pub duration: i64, // 持续时间（100ns）
    pub discontinuity: bool,
    pub key_frame: bool,
    pub token: Option<Token>,
}

impl Sample {
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }
}

/// 主类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MajorType {
    Audio,
    Video,
    Unknown,
}

/// 音频编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoding {
    PcmU8,
    PcmS16,
    PcmS24,
    PcmS32,
    PcmF32,
    PcmF64,
    Mpeg1 { layer: u8 },
    Aac,
}

impl AudioEncoding {
    /// 未压缩 PCM 的每采样位数
    pub fn bits_per_sample(&self) -> Option<u16> {
        match self {
            AudioEncoding::PcmU8 => Some(8),
            AudioEncoding::PcmS16 => Some(16),
            AudioEncoding::PcmS24 => Some(24),
            AudioEncoding::PcmS32 | AudioEncoding::PcmF32 => Some(32),
            AudioEncoding::PcmF64 => Some(64),
            AudioEncoding::Mpeg1 { .. } | AudioEncoding::Aac => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        self.bits_per_sample().is_some()
    }
}

/// 视频编码（含未压缩像素格式）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoEncoding {
    Bgra,
    Bgrx,
    Bgr,
    Rgb15,
    Rgb16,
    Ayuv,
    I420,
    Nv12,
    Uyvy,
    Yuy2,
    Yv12,
    Yvyu,
    H264,
    Cinepak,
}

impl VideoEncoding {
    pub fn is_raw(&self) -> bool {
        !matches!(self, VideoEncoding::H264 | VideoEncoding::Cinepak)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub channels: u16,
    pub rate: u32,
    pub channel_mask: u32,
}

impl AudioFormat {
    /// 每个采样帧的字节数（仅 PCM）
    pub fn block_align(&self) -> Option<u32> {
        self.encoding
            .bits_per_sample()
            .map(|bits| u32::from(bits) / 8 * u32::from(self.channels))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub encoding: VideoEncoding,
    pub width: u32,
    pub height: i32, // 负数表示自上而下
    pub fps_n: u32,
    pub fps_d: u32,
}

/// 流格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaFormat {
    Unknown,
    Audio(AudioFormat),
    Video(VideoFormat),
}

impl MediaFormat {
    pub fn major_type(&self) -> MajorType {
        match self {
            MediaFormat::Audio(_) => MajorType::Audio,
            MediaFormat::Video(_) => MajorType::Video,
            MediaFormat::Unknown => MajorType::Unknown,
        }
    }

    /// 判断两个格式是否兼容
    ///
    /// 音频比较编码、声道数和采样率；视频比较编码、宽度和高度绝对值，不比较帧率
    pub fn is_compatible(&self, other: &MediaFormat) -> bool {
        match (self, other) {
            (MediaFormat::Audio(a), MediaFormat::Audio(b)) => {
                a.encoding == b.encoding && a.channels == b.channels && a.rate == b.rate
            }
            (MediaFormat::Video(a), MediaFormat::Video(b)) => {
                a.encoding == b.encoding
                    && a.width == b.width
                    && a.height.unsigned_abs() == b.height.unsigned_abs()
            }
            (MediaFormat::Unknown, MediaFormat::Unknown) => true,
            _ => false,
        }
    }
}

/// 媒体源特性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceCharacteristics {
    pub can_seek: bool,
    pub can_pause: bool,
    pub has_duration: bool,
}

/// 将 100ns 时间转换为毫秒（用于日志）
pub fn ticks_to_ms(ticks: i64) -> i64 {
    ticks / (TICKS_PER_SECOND / 1000)
}
