use crate::core::{Result, SourceConfig, SourceError};
use crate::source::byte_stream::{ByteStream, FileByteStream};
use crate::source::media_source::MediaSource;
use crate::source::wave_demuxer::WaveDemuxer;
use crossbeam_channel::Sender;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 媒体源创建结果
pub enum SourceCreationResult {
    /// 创建成功
    Success { source: MediaSource, url: String },
    /// 创建失败
    Failed { url: String, error: SourceError },
}

/// 媒体源工厂 - 负责按文件内容选择解封装器并创建媒体源
///
/// 使用方法：
/// ```no_run
/// use crossbeam_channel::unbounded;
/// use myy_source::{SourceConfig, SourceCreationResult, SourceFactory};
///
/// let (tx, rx) = unbounded();
/// SourceFactory::create_async("music.wav", SourceConfig::default(), tx).unwrap();
///
/// match rx.recv().unwrap() {
///     SourceCreationResult::Success { source, .. } => {
///         let pd = source.create_presentation_descriptor().unwrap();
///         println!("{} 个流", pd.stream_count());
///     }
///     SourceCreationResult::Failed { error, .. } => {
///         eprintln!("创建失败: {}", error);
///     }
/// }
/// ```
pub struct SourceFactory;

impl SourceFactory {
    /// 同步打开本地文件（会阻塞到容器解析完成）
    pub fn open_file<P: AsRef<Path>>(path: P, config: SourceConfig) -> Result<MediaSource> {
        let stream = FileByteStream::open(path.as_ref())?;
        sniff_wave(&stream)?;
        info!("📁 识别为 WAV: {}", path.as_ref().display());

        let demuxer = WaveDemuxer::new(config.read_chunk_size);
        MediaSource::new(Arc::new(stream), Arc::new(demuxer), config)
    }

    /// 异步创建媒体源（在子线程中）
    ///
    /// 参数：
    /// - path: 本地文件路径
    /// - config: 媒体源配置
    /// - result_tx: 结果发送通道
    pub fn create_async(
        path: impl Into<PathBuf>,
        config: SourceConfig,
        result_tx: Sender<SourceCreationResult>,
    ) -> Result<JoinHandle<()>> {
        let path = path.into();
        let handle = thread::Builder::new()
            .name(format!("{}-open", config.thread_name))
            .spawn(move || {
                let url = path.to_string_lossy().to_string();
                info!("🔨 开始在子线程中创建媒体源: {}", url);

                let result = match Self::open_file(&path, config) {
                    Ok(source) => SourceCreationResult::Success { source, url },
                    Err(error) => SourceCreationResult::Failed { url, error },
                };

                if result_tx.send(result).is_err() {
                    error!("❌ 发送媒体源创建结果失败: 接收端已关闭");
                } else {
                    info!("✅ 媒体源创建结果已发送");
                }
            })?;
        Ok(handle)
    }
}

/// 检查 RIFF/WAVE 文件头
fn sniff_wave(stream: &dyn ByteStream) -> Result<()> {
    let mut header = [0u8; 12];
    stream.set_position(0)?;
    let mut filled = 0;
    while filled < header.len() {
        let n = stream.read(&mut header[filled..])?;
        if n == 0 {
            return Err(SourceError::UnsupportedContainer);
        }
        filled += n;
    }
    stream.set_position(0)?;

    if &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE" {
        Ok(())
    } else {
        Err(SourceError::UnsupportedContainer)
    }
}
