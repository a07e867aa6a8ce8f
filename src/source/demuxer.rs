use crate::core::{MediaFormat, Result};
use std::sync::Arc;
use std::time::Duration;

/// 解封装器希望读取的下一段字节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOffset {
    /// 请求读取 [offset, offset + size)
    Request { offset: u64, size: u32 },
    /// 暂无请求（等待超时），调用方稍后重试
    Pending,
    /// 已断开，读取线程应退出
    Disconnected,
}

/// 推送给解封装器的读取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushData {
    /// 读取到的数据（长度为 0 同样表示到达数据末尾）
    Data(Vec<u8>),
    /// 请求位置超出文件末尾
    EndOfData,
    /// 读取失败
    Failure,
}

/// Seek 标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekFlags {
    /// 对齐到关键帧
    pub key_frame: bool,
    /// 不刷新已缓冲的数据
    pub no_flush: bool,
}

/// 解封装器输出的一个缓冲
#[derive(Debug, Clone, Default)]
pub struct DemuxedBuffer {
    pub data: Vec<u8>,
    pub pts: Option<i64>,      // 100ns
    pub duration: Option<i64>, // 100ns
    pub discontinuity: bool,
    pub delta: bool, // 非关键帧
}

/// 拉取缓冲的结果
#[derive(Debug)]
pub enum BufferPoll {
    /// 得到一个缓冲
    Buffer(DemuxedBuffer),
    /// 收到非数据事件（例如分段变化），应再次拉取
    Retry,
    /// 当前没有数据（刷新中或已断开），本次请求结束且不产生事件
    Unavailable,
    /// 流结束
    EndOfStream,
    /// 解封装器已观察到不可恢复的错误
    Error(String),
}

/// 解封装器抽象接口
///
/// 推模式：读取线程不断询问 `next_read_offset`，从字节流读出对应数据后 `push_data` 回来。
/// 实现必须允许读取线程与命令工作线程并发调用（内部自行同步）。
pub trait Demuxer: Send + Sync {
    /// 连接并解析容器，返回流数量
    ///
    /// 解析过程中需要的数据由读取线程提供，所以调用前读取线程必须已经启动
    fn connect(&self, file_size: u64, url: Option<&str>) -> Result<usize>;

    /// 按索引获取流
    fn stream(&self, index: usize) -> Option<Arc<dyn DemuxerStream>>;

    /// 等待下一个读请求，最多等待 `timeout`
    fn next_read_offset(&self, timeout: Duration) -> ReadOffset;

    /// 推送读取结果
    fn push_data(&self, data: PushData);

    /// 断开连接：唤醒所有阻塞中的读请求和拉取调用
    fn disconnect(&self);

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 单个基本流的句柄
pub trait DemuxerStream: Send + Sync {
    /// 解封装器给出的首选格式
    fn preferred_format(&self) -> MediaFormat;

    /// 当前启用的格式
    fn current_format(&self) -> Option<MediaFormat>;

    /// 以指定格式启用该流
    fn enable(&self, format: &MediaFormat) -> Result<()>;

    /// 禁用该流
    fn disable(&self);

    /// Seek（影响整个容器），位置单位 100ns
    fn seek(&self, rate: f64, start: i64, stop: Option<i64>, flags: SeekFlags) -> Result<()>;

    /// 拉取下一个缓冲，可能阻塞直到数据到达
    fn next_buffer(&self) -> BufferPoll;

    /// 释放上一次 `next_buffer` 返回的缓冲
    fn release_buffer(&self);

    /// 流时长（100ns）
    fn duration(&self) -> Option<i64> {
        None
    }

    /// 语言代码
    fn language(&self) -> Option<String> {
        None
    }
}
