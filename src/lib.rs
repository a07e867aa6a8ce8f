//! 异步流式媒体源引擎
//!
//! 给定一个字节流和一个解封装器，按基本流输出带时间戳的样本；
//! 支持 seek、暂停/恢复、速率变化和流结束通知，调用方线程从不阻塞。

pub mod core;
pub mod source;

#[cfg(test)]
mod testing;

pub use crate::core::{
    EventQueue, MediaEvent, MediaFormat, Result, Sample, SourceConfig, SourceError, SourceState,
    StartPosition, TimeFormat, Token,
};
pub use crate::source::{
    MediaSource, MediaStream, PresentationDescriptor, SourceCreationResult, SourceFactory,
    WaveDemuxer,
};
