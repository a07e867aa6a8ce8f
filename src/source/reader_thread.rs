use crate::core::{Result, SourceConfig};
use crate::source::byte_stream::ByteStream;
use crate::source::demuxer::{Demuxer, PushData, ReadOffset};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use std::io;
use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 读取线程管理器
/// - 唯一执行阻塞 IO 的地方：按解封装器的请求从字节流读数据并推回去
/// - 不持有媒体源的锁，只接触字节流和解封装器
/// - 取消信号是一个永不发送的通道：stop() drop 发送端，线程在轮询点看到 Disconnected 后退出
pub struct ReaderThread {
    thread_handle: Option<JoinHandle<()>>,
    cancel_tx: Option<Sender<()>>,
    demuxer: Arc<dyn Demuxer>,
}

impl ReaderThread {
    /// 启动读取线程
    pub fn start(
        demuxer: Arc<dyn Demuxer>,
        byte_stream: Arc<dyn ByteStream>,
        file_size: u64,
        config: &SourceConfig,
    ) -> Result<Self> {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let poll_interval = config.reader_poll_interval();

        let thread_demuxer = Arc::clone(&demuxer);
        let thread_handle = thread::Builder::new()
            .name(format!("{}-reader", config.thread_name))
            .spawn(move || {
                Self::read_loop(
                    &*thread_demuxer,
                    &*byte_stream,
                    file_size,
                    poll_interval,
                    cancel_rx,
                );
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            cancel_tx: Some(cancel_tx),
            demuxer,
        })
    }

    /// 读取循环（在独立线程中运行）
    ///
    /// 关键点：
    /// - next_read_offset 最多等待 poll_interval，之后回到轮询点检查取消信号
    /// - 请求范围按文件长度裁剪；起点在文件末尾之后的请求推送 EndOfData
    /// - 读取失败只推送 Failure，不退出循环
    fn read_loop(
        demuxer: &dyn Demuxer,
        byte_stream: &dyn ByteStream,
        file_size: u64,
        poll_interval: Duration,
        cancel_rx: Receiver<()>,
    ) {
        info!("{} 📖 读取线程启动: {}", log_ctx(), demuxer.description());

        let mut request_count: usize = 0;
        let mut bytes_read: u64 = 0;
        let mut failure_count: usize = 0;

        loop {
            match cancel_rx.try_recv() {
                Err(TryRecvError::Disconnected) => {
                    debug!("{} 收到取消信号", log_ctx());
                    break;
                }
                Ok(()) | Err(TryRecvError::Empty) => {}
            }

            let (offset, size) = match demuxer.next_read_offset(poll_interval) {
                ReadOffset::Request { offset, size } => (offset, size),
                ReadOffset::Pending => continue,
                ReadOffset::Disconnected => {
                    debug!("{} 解封装器已断开", log_ctx());
                    break;
                }
            };

            request_count += 1;

            let size = clamp_request(offset, size, file_size);
            if size == 0 {
                debug!("{} 请求 offset={} 超出文件末尾 ({})", log_ctx(), offset, file_size);
                demuxer.push_data(PushData::EndOfData);
                continue;
            }

            match read_range(byte_stream, offset, size) {
                Ok(data) => {
                    if data.len() != size as usize {
                        warn!(
                            "{} ⚠️ 短读: offset={} 期望 {} 实际 {}",
                            log_ctx(),
                            offset,
                            size,
                            data.len()
                        );
                    }
                    bytes_read += data.len() as u64;
                    demuxer.push_data(PushData::Data(data));
                }
                Err(e) => {
                    failure_count += 1;
                    error!("{} ❌ 读取失败 offset={} size={}: {}", log_ctx(), offset, size, e);
                    demuxer.push_data(PushData::Failure);
                }
            }
        }

        info!(
            "{} 🛑 读取线程退出（共 {} 个请求，读取 {} 字节，失败 {} 次）",
            log_ctx(),
            request_count,
            bytes_read,
            failure_count
        );
    }

    /// 停止线程
    /// - drop 取消信号的发送端
    /// - 断开解封装器，唤醒阻塞中的 next_read_offset
    /// - join 线程
    pub fn stop(&mut self) {
        if self.thread_handle.is_none() {
            return;
        }
        debug!("{} ReaderThread::stop() called", log_ctx());
        self.cancel_tx.take();
        self.demuxer.disconnect();

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("{} ❌ 读取线程 panic", log_ctx());
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ ReaderThread 被 drop，但未调用 stop()，正在尝试停止", log_ctx());
            self.stop();
        }
    }
}

/// 按文件长度裁剪请求大小，起点不在文件内时返回 0
fn clamp_request(offset: u64, size: u32, file_size: u64) -> u32 {
    if offset >= file_size {
        0
    } else {
        (file_size - offset).min(u64::from(size)) as u32
    }
}

fn read_range(byte_stream: &dyn ByteStream, offset: u64, size: u32) -> io::Result<Vec<u8>> {
    byte_stream.set_position(offset)?;

    let mut buf = vec![0u8; size as usize];
    let mut filled = 0;
    while filled < buf.len() {
        let n = byte_stream.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}
