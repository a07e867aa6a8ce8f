use thiserror::Error;

use crate::core::types::SourceState;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("媒体源已关闭")]
    Shutdown,

    #[error("状态 {from:?} 下不允许执行 {op}")]
    InvalidStateTransition { from: SourceState, op: &'static str },

    #[error("流未被选中或已停止")]
    StreamInactive,

    #[error("流已到达结尾")]
    EndOfStream,

    #[error("不支持的时间格式")]
    UnsupportedTimeFormat,

    #[error("无效的 Seek 位置: {0}")]
    InvalidSeekPosition(i64),

    #[error("无效的流索引: {0}")]
    InvalidStreamIndex(usize),

    #[error("参数错误: {0}")]
    InvalidArgument(String),

    #[error("不支持的媒体类型")]
    InvalidMediaType,

    #[error("不支持 thinning 播放")]
    ThinningUnsupported,

    #[error("不支持的播放速率: {0}")]
    UnsupportedRate(f32),

    #[error("容器中没有可用的流")]
    NoStreams,

    #[error("无法识别的容器格式")]
    UnsupportedContainer,

    #[error("解封装错误: {0}")]
    Demuxer(String),

    #[error("命令队列错误: {0}")]
    WorkQueue(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl SourceError {
    /// 是否为“已关闭”错误
    pub fn is_shutdown(&self) -> bool {
        matches!(self, SourceError::Shutdown)
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
