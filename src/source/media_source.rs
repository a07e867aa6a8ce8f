use crate::core::{
    ticks_to_ms, EventQueue, MediaEvent, Result, SourceCharacteristics, SourceConfig, SourceError,
    SourceState, StartPosition, TimeFormat, Token,
};
use crate::source::byte_stream::ByteStream;
use crate::source::command::Command;
use crate::source::demuxer::{Demuxer, DemuxerStream, SeekFlags};
use crate::source::descriptor::{PresentationDescriptor, StreamDescriptor};
use crate::source::media_stream::MediaStream;
use crate::source::reader_thread::ReaderThread;
use crate::source::work_queue::{SerialQueue, WorkQueue};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::process;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// 最慢播放速率（0 表示擦洗/单帧）
pub const SLOWEST_RATE: f32 = 0.0;
/// 最快播放速率
pub const FASTEST_RATE: f32 = 1e6;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 单个流的可变状态
#[derive(Debug, Default)]
pub(crate) struct StreamSlot {
    /// 已生效的选中状态（工作线程维护）
    pub(crate) active: bool,
    /// 所有已提交命令执行完之后的选中状态（调用方校验用）
    pub(crate) projected_active: bool,
    pub(crate) eos: bool,
    /// 暂停期间积压的样本请求
    pub(crate) tokens: VecDeque<Option<Token>>,
}

/// 源级锁保护的全部可变状态
#[derive(Debug)]
pub(crate) struct SourceInner {
    /// 已生效的状态
    pub(crate) state: SourceState,
    /// 所有已提交命令执行完之后的状态
    pub(crate) projected: SourceState,
    /// 已提交但未执行、会清除 EOS 标志的 Start 数量
    pub(crate) pending_eos_resets: usize,
    pub(crate) rate: f32,
    pub(crate) streams: Vec<StreamSlot>,
}

impl SourceInner {
    fn flush_tokens(&mut self) -> usize {
        self.streams
            .iter_mut()
            .map(|slot| slot.tokens.drain(..).count())
            .sum()
    }
}

/// 媒体源内部共享对象：调用方、命令工作线程和流对象都通过它访问状态
pub(crate) struct SourceShared {
    pub(crate) inner: Mutex<SourceInner>,
    demuxer: Arc<dyn Demuxer>,
    byte_stream: Arc<dyn ByteStream>,
    streams: Vec<Arc<MediaStream>>,
    event_queue: EventQueue,
    commands: SerialQueue<Command>,
    reader: Mutex<Option<ReaderThread>>,
    descriptor: PresentationDescriptor,
    // 最后一个媒体源释放时工作队列随之销毁
    _work_queue: Arc<WorkQueue>,
}

impl SourceShared {
    /// 投递源事件，队列已关闭时只记录日志
    pub(crate) fn queue_event(&self, event: MediaEvent) {
        let name = event.name();
        if let Err(e) = self.event_queue.queue_event(event) {
            debug!("{} 丢弃源事件 {}: {}", log_ctx(), name, e);
        }
    }

    /// 不可恢复的错误：投递错误事件后关闭源的事件队列
    pub(crate) fn fatal_error(&self, error: SourceError) {
        self.queue_event(MediaEvent::Error(error));
        self.event_queue.shutdown();
    }

    fn stream(&self, index: usize) -> Result<&Arc<MediaStream>> {
        self.streams
            .get(index)
            .ok_or(SourceError::InvalidStreamIndex(index))
    }

    fn submit(&self, command: Command) -> Result<()> {
        let name = command.name();
        self.commands.submit(command).map_err(|e| {
            error!("{} ❌ 提交命令 {} 失败: {}", log_ctx(), name, e);
            e
        })
    }

    /// 校验并提交样本请求
    ///
    /// 在持锁状态下提交，保证校验所依据的预期状态与命令顺序一致
    pub(crate) fn request_sample(&self, index: usize, token: Option<Token>) -> Result<()> {
        let inner = self.inner.lock();
        if inner.projected == SourceState::Shutdown {
            return Err(SourceError::Shutdown);
        }
        let slot = inner
            .streams
            .get(index)
            .ok_or(SourceError::InvalidStreamIndex(index))?;
        if !slot.projected_active {
            return Err(SourceError::StreamInactive);
        }
        if slot.eos && inner.pending_eos_resets == 0 {
            return Err(SourceError::EndOfStream);
        }
        self.submit(Command::RequestSample {
            stream: index,
            token,
        })
    }

    // ===== 命令工作线程 =====

    /// 执行一个命令（串行队列保证同一时刻只有一个命令在执行）
    fn execute(&self, command: Command) {
        let mut inner = self.inner.lock();
        if inner.state == SourceState::Shutdown {
            debug!("{} 媒体源已关闭，丢弃命令 {}", log_ctx(), command.name());
            return;
        }

        debug!("{} ▶ 执行命令 {}", log_ctx(), command.name());
        match command {
            Command::Start {
                descriptor,
                position,
                resets_eos,
            } => self.run_start(&mut inner, &descriptor, position, resets_eos),
            Command::Pause => self.run_pause(&mut inner),
            Command::Stop => self.run_stop(&mut inner),
            Command::RequestSample { stream, token } => {
                self.run_request_sample(&mut inner, stream, token)
            }
        }
    }

    fn run_start(
        &self,
        inner: &mut MutexGuard<'_, SourceInner>,
        descriptor: &PresentationDescriptor,
        position: StartPosition,
        resets_eos: bool,
    ) {
        let seek_message = inner.state != SourceState::Stopped && position.is_specified();
        // 从停止状态启动时没有指定位置等同于从 0 开始
        let position = if inner.state == SourceState::Stopped && !position.is_specified() {
            StartPosition::At(0)
        } else {
            position
        };
        if resets_eos {
            inner.pending_eos_resets = inner.pending_eos_resets.saturating_sub(1);
        }

        info!(
            "{} ▶️ Start: {:?} -> Running, 位置 {:?}",
            log_ctx(),
            inner.state,
            position.time().map(ticks_to_ms)
        );

        // seek 作用于整个容器，只对第一个流发一次；失败则放弃本次 Start，状态保持不变
        if let (StartPosition::At(time), Some(first)) = (position, self.streams.first()) {
            let rate = f64::from(inner.rate);
            if let Err(e) = first
                .demuxer_stream()
                .seek(rate, time, None, SeekFlags::default())
            {
                error!(
                    "{} ❌ seek 到 {}ms 失败，放弃 Start（保持 {:?}）: {}",
                    log_ctx(),
                    ticks_to_ms(time),
                    inner.state,
                    e
                );
                return;
            }
        }

        for stream in &self.streams {
            let id = stream.id();
            let selected = descriptor.is_selected(id);
            let was_active = inner.streams[id].active;

            if position.is_specified() {
                inner.streams[id].eos = false;
            }

            if !selected {
                if was_active {
                    debug!("{} 流 {} 取消选中", log_ctx(), id);
                    stream.demuxer_stream().disable();
                }
                inner.streams[id].active = false;
                continue;
            }

            let format = match descriptor.stream_descriptor(id) {
                Some((_, sd)) => sd.current_media_type().clone(),
                None => continue,
            };
            let unchanged =
                was_active && stream.demuxer_stream().current_format().as_ref() == Some(&format);
            if unchanged {
                debug!("{} 流 {} 格式未变，无需重新启用", log_ctx(), id);
            } else if let Err(e) = stream.demuxer_stream().enable(&format) {
                error!("{} ❌ 启用流 {} 失败: {}", log_ctx(), id, e);
                inner.streams[id].active = false;
                continue;
            }
            inner.streams[id].active = true;

            let appeared = if was_active {
                MediaEvent::UpdatedStream(Arc::clone(stream))
            } else {
                MediaEvent::NewStream(Arc::clone(stream))
            };
            self.queue_event(appeared);
            stream.queue_event(if seek_message {
                MediaEvent::StreamSeeked {
                    position: position.time(),
                }
            } else {
                MediaEvent::StreamStarted {
                    position: position.time(),
                }
            });
        }

        inner.state = SourceState::Running;
        self.queue_event(if seek_message {
            MediaEvent::SourceSeeked {
                position: position.time(),
            }
        } else {
            MediaEvent::SourceStarted {
                position: position.time(),
            }
        });

        if position.is_specified() {
            // seek 或重新开始：积压的请求已过期，直接丢弃（释放令牌）
            let dropped = inner.flush_tokens();
            if dropped > 0 {
                debug!("{} 🧹 丢弃 {} 个过期的样本请求", log_ctx(), dropped);
            }
            return;
        }

        // 恢复播放：按请求顺序交付暂停期间积压的请求
        for stream in &self.streams {
            let id = stream.id();
            let tokens = std::mem::take(&mut inner.streams[id].tokens);
            if !tokens.is_empty() {
                debug!("{} 流 {} 交付 {} 个积压请求", log_ctx(), id, tokens.len());
            }
            for token in tokens {
                if inner.state == SourceState::Shutdown {
                    return;
                }
                let slot = &inner.streams[id];
                if slot.active && !slot.eos {
                    stream.wait_on_sample(self, inner, token);
                }
            }
        }
    }

    fn run_pause(&self, inner: &mut SourceInner) {
        if inner.state != SourceState::Running {
            warn!("{} ⚠️ Pause: 当前状态 {:?}，忽略", log_ctx(), inner.state);
            return;
        }
        for stream in &self.streams {
            if inner.streams[stream.id()].active {
                stream.queue_event(MediaEvent::StreamPaused);
            }
        }
        inner.state = SourceState::Paused;
        info!("{} ⏸ Paused", log_ctx());
        self.queue_event(MediaEvent::SourcePaused);
    }

    fn run_stop(&self, inner: &mut SourceInner) {
        for stream in &self.streams {
            let slot = &mut inner.streams[stream.id()];
            if slot.active {
                stream.queue_event(MediaEvent::StreamStopped);
                slot.active = false;
            }
        }
        let dropped = inner.flush_tokens();
        inner.state = SourceState::Stopped;
        info!("{} ⏹ Stopped（丢弃 {} 个积压请求）", log_ctx(), dropped);
        self.queue_event(MediaEvent::SourceStopped);
    }

    fn run_request_sample(
        &self,
        inner: &mut MutexGuard<'_, SourceInner>,
        index: usize,
        token: Option<Token>,
    ) {
        let Some(stream) = self.streams.get(index) else {
            warn!("{} ⚠️ 无效的流索引 {}", log_ctx(), index);
            return;
        };
        let slot = &inner.streams[index];
        if !slot.active || slot.eos {
            debug!("{} 流 {} 未激活或已结束，丢弃请求", log_ctx(), index);
            return;
        }

        let state = inner.state;
        match state {
            SourceState::Paused => inner.streams[index].tokens.push_back(token),
            SourceState::Running => stream.wait_on_sample(self, inner, token),
            state => debug!("{} 状态 {:?} 下丢弃样本请求", log_ctx(), state),
        }
    }
}

/// 异步媒体源
///
/// 所有改变状态的操作都只做同步校验后把命令放进串行队列，由命令工作线程按提交顺序执行；
/// 结果通过源和各个流的事件队列通知调用方。调用方线程从不阻塞在解封装器上。
pub struct MediaSource {
    shared: Arc<SourceShared>,
}

impl MediaSource {
    /// 使用进程内共享的工作队列创建媒体源
    pub fn new(
        byte_stream: Arc<dyn ByteStream>,
        demuxer: Arc<dyn Demuxer>,
        config: SourceConfig,
    ) -> Result<Self> {
        let work_queue = WorkQueue::shared(&config)?;
        Self::with_work_queue(byte_stream, demuxer, config, work_queue)
    }

    /// 使用指定的工作队列创建媒体源
    ///
    /// 构造期间完成连接和流枚举，任何失败都会停止读取线程并返回错误
    pub fn with_work_queue(
        byte_stream: Arc<dyn ByteStream>,
        demuxer: Arc<dyn Demuxer>,
        config: SourceConfig,
        work_queue: Arc<WorkQueue>,
    ) -> Result<Self> {
        let file_size = byte_stream.length()?;
        let url = byte_stream.url();
        info!(
            "{} 📂 打开媒体源: {} ({} 字节)",
            log_ctx(),
            url.as_deref().unwrap_or("<stream>"),
            file_size
        );

        // 解析容器需要的数据由读取线程提供，先启动它
        let mut reader = ReaderThread::start(
            Arc::clone(&demuxer),
            Arc::clone(&byte_stream),
            file_size,
            &config,
        )?;

        let demuxer_streams = match Self::connect(&*demuxer, file_size, url.as_deref()) {
            Ok(streams) => streams,
            Err(e) => {
                error!("{} ❌ 连接解封装器失败: {}", log_ctx(), e);
                reader.stop();
                return Err(e);
            }
        };

        let descriptors: Vec<StreamDescriptor> = demuxer_streams
            .iter()
            .enumerate()
            .map(|(id, ds)| StreamDescriptor::from_demuxer_stream(id, &**ds))
            .collect();
        let descriptor =
            PresentationDescriptor::new(descriptors.clone(), file_size, config.select_all_streams);

        let stream_count = demuxer_streams.len();
        let queue_name = format!("{}-commands", config.thread_name);
        let shared = Arc::new_cyclic(|weak: &Weak<SourceShared>| {
            let streams = demuxer_streams
                .into_iter()
                .zip(descriptors)
                .enumerate()
                .map(|(id, (ds, sd))| Arc::new(MediaStream::new(id, weak.clone(), ds, sd)))
                .collect();

            let worker = weak.clone();
            let commands = work_queue.serial_queue(queue_name, move |command: Command| {
                if let Some(shared) = worker.upgrade() {
                    shared.execute(command);
                }
            });

            SourceShared {
                inner: Mutex::new(SourceInner {
                    state: SourceState::Opening,
                    projected: SourceState::Opening,
                    pending_eos_resets: 0,
                    rate: 1.0,
                    streams: (0..stream_count).map(|_| StreamSlot::default()).collect(),
                }),
                demuxer,
                byte_stream,
                streams,
                event_queue: EventQueue::new(),
                commands,
                reader: Mutex::new(Some(reader)),
                descriptor,
                _work_queue: work_queue,
            }
        });

        {
            let mut inner = shared.inner.lock();
            inner.state = SourceState::Stopped;
            inner.projected = SourceState::Stopped;
        }
        info!(
            "{} ✅ 媒体源就绪: {} 个流, 时长 {:?}ms",
            log_ctx(),
            stream_count,
            shared.descriptor.duration().map(ticks_to_ms)
        );

        Ok(Self { shared })
    }

    fn connect(
        demuxer: &dyn Demuxer,
        file_size: u64,
        url: Option<&str>,
    ) -> Result<Vec<Arc<dyn DemuxerStream>>> {
        let count = demuxer.connect(file_size, url)?;
        if count == 0 {
            return Err(SourceError::NoStreams);
        }
        (0..count)
            .map(|index| {
                demuxer
                    .stream(index)
                    .ok_or_else(|| SourceError::Demuxer(format!("解封装器缺少流 {}", index)))
            })
            .collect()
    }

    fn check_alive(&self) -> Result<MutexGuard<'_, SourceInner>> {
        let inner = self.shared.inner.lock();
        if inner.projected == SourceState::Shutdown {
            return Err(SourceError::Shutdown);
        }
        Ok(inner)
    }

    /// 创建呈现描述符（默认选中状态的副本）
    pub fn create_presentation_descriptor(&self) -> Result<PresentationDescriptor> {
        let _inner = self.check_alive()?;
        Ok(self.shared.descriptor.clone())
    }

    /// 开始、恢复或 seek
    ///
    /// - 停止状态下未指定位置时从 0 开始
    /// - 运行/暂停状态下未指定位置为恢复播放（可同时改变选中的流）
    pub fn start(
        &self,
        descriptor: &PresentationDescriptor,
        time_format: TimeFormat,
        position: StartPosition,
    ) -> Result<()> {
        let mut inner = self.check_alive()?;

        if descriptor.stream_count() != self.shared.streams.len() {
            return Err(SourceError::InvalidArgument(format!(
                "描述符包含 {} 个流，媒体源有 {} 个",
                descriptor.stream_count(),
                self.shared.streams.len()
            )));
        }
        if time_format != TimeFormat::Default {
            return Err(SourceError::UnsupportedTimeFormat);
        }
        if let StartPosition::At(time) = position {
            let beyond_end = self
                .shared
                .descriptor
                .duration()
                .map_or(false, |duration| time > duration);
            if time < 0 || beyond_end {
                return Err(SourceError::InvalidSeekPosition(time));
            }
        }
        if inner.projected == SourceState::Opening {
            return Err(SourceError::InvalidStateTransition {
                from: inner.projected,
                op: "Start",
            });
        }

        let resets_eos = position.is_specified() || inner.projected == SourceState::Stopped;
        self.shared.submit(Command::Start {
            descriptor: descriptor.clone(),
            position,
            resets_eos,
        })?;

        if resets_eos {
            inner.pending_eos_resets += 1;
        }
        inner.projected = SourceState::Running;
        for (id, slot) in inner.streams.iter_mut().enumerate() {
            slot.projected_active = descriptor.is_selected(id);
        }
        Ok(())
    }

    /// 暂停，只能从运行状态进入
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.check_alive()?;
        if inner.projected != SourceState::Running {
            return Err(SourceError::InvalidStateTransition {
                from: inner.projected,
                op: "Pause",
            });
        }
        self.shared.submit(Command::Pause)?;
        inner.projected = SourceState::Paused;
        Ok(())
    }

    /// 停止，可从运行或暂停状态进入
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.check_alive()?;
        if !matches!(inner.projected, SourceState::Running | SourceState::Paused) {
            return Err(SourceError::InvalidStateTransition {
                from: inner.projected,
                op: "Stop",
            });
        }
        self.shared.submit(Command::Stop)?;
        inner.projected = SourceState::Stopped;
        for slot in inner.streams.iter_mut() {
            slot.projected_active = false;
        }
        Ok(())
    }

    /// 关闭媒体源（终态）
    ///
    /// 返回前读取线程已经退出；之后的所有操作返回 Shutdown，不再调用解封装器
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == SourceState::Shutdown {
                return Err(SourceError::Shutdown);
            }
            info!("{} 🛑 关闭媒体源（当前状态 {:?}）", log_ctx(), inner.state);
            inner.state = SourceState::Shutdown;
            inner.projected = SourceState::Shutdown;
            inner.flush_tokens();
        }

        self.shared.commands.close();
        if let Some(mut reader) = self.shared.reader.lock().take() {
            reader.stop();
        }
        self.shared.byte_stream.close();

        self.shared.event_queue.shutdown();
        for stream in &self.shared.streams {
            stream.event_queue().shutdown();
        }
        info!("{} ✅ 媒体源已关闭: {}", log_ctx(), self.shared.demuxer.description());
        Ok(())
    }

    /// 设置播放速率
    pub fn set_rate(&self, thin: bool, rate: f32) -> Result<()> {
        let mut inner = self.check_alive()?;
        let nearest = Self::nearest_rate(thin, rate)?;
        if nearest != rate {
            return Err(SourceError::UnsupportedRate(rate));
        }
        inner.rate = rate;
        info!("{} ⏩ 播放速率: {}", log_ctx(), rate);
        self.shared.queue_event(MediaEvent::RateChanged { rate });
        Ok(())
    }

    /// 当前速率：(thin, rate)
    pub fn rate(&self) -> Result<(bool, f32)> {
        let inner = self.check_alive()?;
        Ok((false, inner.rate))
    }

    pub fn slowest_rate(&self, thin: bool) -> Result<f32> {
        let _inner = self.check_alive()?;
        Self::nearest_rate(thin, SLOWEST_RATE)
    }

    pub fn fastest_rate(&self, thin: bool) -> Result<f32> {
        let _inner = self.check_alive()?;
        Self::nearest_rate(thin, FASTEST_RATE)
    }

    /// 检查速率是否支持，返回最接近的可用速率
    pub fn is_rate_supported(&self, thin: bool, rate: f32) -> Result<f32> {
        let _inner = self.check_alive()?;
        Self::nearest_rate(thin, rate)
    }

    fn nearest_rate(thin: bool, rate: f32) -> Result<f32> {
        if thin {
            return Err(SourceError::ThinningUnsupported);
        }
        if !rate.is_finite() || rate < SLOWEST_RATE {
            return Err(SourceError::UnsupportedRate(rate));
        }
        Ok(rate.min(FASTEST_RATE))
    }

    pub fn characteristics(&self) -> Result<SourceCharacteristics> {
        let _inner = self.check_alive()?;
        Ok(SourceCharacteristics {
            can_seek: self.shared.demuxer.is_seekable(),
            can_pause: true,
            has_duration: self.shared.descriptor.duration().is_some(),
        })
    }

    /// 当前已生效的状态
    pub fn state(&self) -> SourceState {
        self.shared.inner.lock().state
    }

    pub fn stream_count(&self) -> usize {
        self.shared.streams.len()
    }

    pub fn stream(&self, index: usize) -> Result<Arc<MediaStream>> {
        self.shared.stream(index).map(Arc::clone)
    }

    pub fn event_queue(&self) -> &EventQueue {
        &self.shared.event_queue
    }

    pub fn get_event(&self) -> Result<MediaEvent> {
        self.shared.event_queue.get_event()
    }

    pub fn get_event_timeout(&self, timeout: Duration) -> Result<Option<MediaEvent>> {
        self.shared.event_queue.get_event_timeout(timeout)
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        if self.shared.inner.lock().state != SourceState::Shutdown {
            warn!("{} ⚠ MediaSource 被 drop，但未调用 shutdown()，正在关闭", log_ctx());
            let _ = self.shutdown();
        }
    }
}
