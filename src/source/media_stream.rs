use crate::core::{EventQueue, MediaEvent, Result, Sample, SourceError, SourceState, Token};
use crate::source::demuxer::{BufferPoll, DemuxerStream};
use crate::source::descriptor::StreamDescriptor;
use crate::source::media_source::{SourceInner, SourceShared};
use log::{debug, error, warn};
use parking_lot::MutexGuard;
use std::fmt;
use std::process;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 基本流
///
/// 打开媒体源时按解封装器的流列表创建，直到媒体源销毁前一直存在。
/// active/eos 标志和令牌队列放在媒体源的 `SourceInner` 中，由源的锁统一保护。
pub struct MediaStream {
    id: usize,
    source: Weak<SourceShared>,
    demuxer_stream: Arc<dyn DemuxerStream>,
    descriptor: StreamDescriptor,
    event_queue: EventQueue,
}

impl MediaStream {
    pub(crate) fn new(
        id: usize,
        source: Weak<SourceShared>,
        demuxer_stream: Arc<dyn DemuxerStream>,
        descriptor: StreamDescriptor,
    ) -> Self {
        Self {
            id,
            source,
            demuxer_stream,
            descriptor,
            event_queue: EventQueue::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// 打开时的流描述符
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// 请求一个样本
    ///
    /// 立即返回；样本（携带同一个令牌）稍后以 MediaSample 事件出现在本流的事件队列上。
    /// 暂停期间的请求会被记住，恢复播放后按请求顺序交付。
    pub fn request_sample(&self, token: Option<Token>) -> Result<()> {
        let source = self.source.upgrade().ok_or(SourceError::Shutdown)?;
        source.request_sample(self.id, token)
    }

    pub fn event_queue(&self) -> &EventQueue {
        &self.event_queue
    }

    pub fn get_event(&self) -> Result<MediaEvent> {
        self.event_queue.get_event()
    }

    pub fn get_event_timeout(&self, timeout: Duration) -> Result<Option<MediaEvent>> {
        self.event_queue.get_event_timeout(timeout)
    }

    pub(crate) fn demuxer_stream(&self) -> &dyn DemuxerStream {
        &*self.demuxer_stream
    }

    /// 投递流事件，队列已关闭时只记录日志
    pub(crate) fn queue_event(&self, event: MediaEvent) {
        let name = event.name();
        if let Err(e) = self.event_queue.queue_event(event) {
            debug!("{} 流 {} 丢弃事件 {}: {}", log_ctx(), self.id, name, e);
        }
    }

    /// 为一个令牌生产样本（在命令工作线程上执行，调用时持有源的锁）
    ///
    /// 拉取调用可能一直阻塞到读取线程送来数据，所以拉取期间释放源的锁；
    /// 重新加锁后如果源已关闭则直接返回，不再碰解封装器。
    pub(crate) fn wait_on_sample(
        &self,
        source: &SourceShared,
        inner: &mut MutexGuard<'_, SourceInner>,
        token: Option<Token>,
    ) {
        loop {
            let poll = MutexGuard::unlocked(inner, || self.demuxer_stream.next_buffer());

            if inner.state == SourceState::Shutdown {
                debug!("{} 流 {} 拉取期间媒体源已关闭", log_ctx(), self.id);
                return;
            }

            match poll {
                BufferPoll::Buffer(buffer) => {
                    // 数据已拷出，归还解封装器一侧的缓冲
                    self.demuxer_stream.release_buffer();
                    let sample = Sample {
                        data: buffer.data,
                        pts: buffer.pts.unwrap_or(0),
                        duration: buffer.duration.unwrap_or(0),
                        discontinuity: buffer.discontinuity,
                        key_frame: !buffer.delta,
                        token,
                    };
                    self.queue_event(MediaEvent::MediaSample(sample));
                    return;
                }
                BufferPoll::Retry => continue,
                BufferPoll::Unavailable => {
                    debug!("{} 流 {} 暂无数据", log_ctx(), self.id);
                    return;
                }
                BufferPoll::EndOfStream => {
                    self.end_of_stream(source, inner);
                    return;
                }
                BufferPoll::Error(message) => {
                    error!("{} ❌ 流 {} 解封装失败: {}", log_ctx(), self.id, message);
                    source.fatal_error(SourceError::Demuxer(message));
                    return;
                }
            }
        }
    }

    fn end_of_stream(&self, source: &SourceShared, inner: &mut SourceInner) {
        let Some(slot) = inner.streams.get_mut(self.id) else {
            warn!("{} ⚠️ 流 {} 不在媒体源中", log_ctx(), self.id);
            return;
        };
        slot.eos = true;
        debug!("{} 🏁 流 {} 到达结尾", log_ctx(), self.id);
        self.queue_event(MediaEvent::EndOfStream);

        let all_ended = inner.streams.iter().filter(|s| s.active).all(|s| s.eos);
        if all_ended {
            debug!("{} 🏁 所有活动流均已结束", log_ctx());
            source.queue_event(MediaEvent::EndOfPresentation);
        }
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("major_type", &self.descriptor.major_type())
            .field("event_queue", &self.event_queue)
            .finish()
    }
}
