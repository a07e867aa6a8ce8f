use crate::core::{Result, Sample, SourceError};
use crate::source::MediaStream;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 媒体事件
///
/// 源级事件投递到源的事件队列，流级事件投递到对应流的事件队列
#[derive(Debug)]
pub enum MediaEvent {
    // ===== 源事件 =====
    NewStream(Arc<MediaStream>),
    UpdatedStream(Arc<MediaStream>),
    SourceStarted { position: Option<i64> },
    SourceSeeked { position: Option<i64> },
    SourcePaused,
    SourceStopped,
    EndOfPresentation,
    RateChanged { rate: f32 },
    Error(SourceError),

    // ===== 流事件 =====
    StreamStarted { position: Option<i64> },
    StreamSeeked { position: Option<i64> },
    StreamPaused,
    StreamStopped,
    MediaSample(Sample),
    EndOfStream,
}

impl MediaEvent {
    /// 事件名（用于日志）
    pub fn name(&self) -> &'static str {
        match self {
            MediaEvent::NewStream(_) => "NewStream",
            MediaEvent::UpdatedStream(_) => "UpdatedStream",
            MediaEvent::SourceStarted { .. } => "SourceStarted",
            MediaEvent::SourceSeeked { .. } => "SourceSeeked",
            MediaEvent::SourcePaused => "SourcePaused",
            MediaEvent::SourceStopped => "SourceStopped",
            MediaEvent::EndOfPresentation => "EndOfPresentation",
            MediaEvent::RateChanged { .. } => "RateChanged",
            MediaEvent::Error(_) => "Error",
            MediaEvent::StreamStarted { .. } => "StreamStarted",
            MediaEvent::StreamSeeked { .. } => "StreamSeeked",
            MediaEvent::StreamPaused => "StreamPaused",
            MediaEvent::StreamStopped => "StreamStopped",
            MediaEvent::MediaSample(_) => "MediaSample",
            MediaEvent::EndOfStream => "EndOfStream",
        }
    }
}

/// 事件队列
///
/// 多生产者；关闭后不再接受新事件，已排队的事件仍可取出，取完后返回 Shutdown
pub struct EventQueue {
    // 关闭时 drop 发送端，接收端在取完剩余事件后得到 Disconnected
    sender: Mutex<Option<Sender<MediaEvent>>>,
    receiver: Receiver<MediaEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// 投递事件
    pub fn queue_event(&self, event: MediaEvent) -> Result<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(event).map_err(|_| SourceError::Shutdown),
            None => Err(SourceError::Shutdown),
        }
    }

    /// 阻塞等待下一个事件
    pub fn get_event(&self) -> Result<MediaEvent> {
        self.receiver.recv().map_err(|_| SourceError::Shutdown)
    }

    /// 等待下一个事件，超时返回 Ok(None)
    pub fn get_event_timeout(&self, timeout: Duration) -> Result<Option<MediaEvent>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Shutdown),
        }
    }

    /// 非阻塞取事件
    pub fn try_get_event(&self) -> Result<Option<MediaEvent>> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SourceError::Shutdown),
        }
    }

    /// 关闭队列（终态）
    pub fn shutdown(&self) {
        self.sender.lock().take();
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.receiver.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
