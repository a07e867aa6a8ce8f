// 媒体源引擎

pub mod byte_stream;
pub mod command;
pub mod demuxer; // 解封装器抽象接口
pub mod descriptor;
pub mod media_source;
pub mod media_stream;
pub mod reader_thread; // 读取线程管理
pub mod source_factory; // 媒体源工厂（异步创建）
pub mod wave_demuxer;
pub mod work_queue;

pub use byte_stream::{ByteStream, FileByteStream, IoByteStream, MemoryByteStream};
pub use demuxer::{BufferPoll, DemuxedBuffer, Demuxer, DemuxerStream, PushData, ReadOffset, SeekFlags};
pub use descriptor::{PresentationDescriptor, StreamDescriptor};
pub use media_source::{MediaSource, FASTEST_RATE, SLOWEST_RATE};
pub use media_stream::MediaStream;
pub use reader_thread::ReaderThread;
pub use source_factory::{SourceCreationResult, SourceFactory};
pub use wave_demuxer::WaveDemuxer;
pub use work_queue::WorkQueue;
