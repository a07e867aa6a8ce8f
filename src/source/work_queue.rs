//! 命令工作队列：所有媒体源共享一个线程池，每个媒体源拥有一条串行队列。
use crate::core::{Result, SourceConfig, SourceError};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;

/// 进程内共享的工作队列：第一个媒体源创建它，最后一个使用者释放时销毁
static SHARED_WORK_QUEUE: Mutex<Weak<WorkQueue>> = parking_lot::const_mutex(Weak::new());

/// 共享的任务执行上下文
///
/// 命令体可能阻塞在解封装器的拉取调用上，所以每个命令都在 spawn_blocking 线程上执行；
/// 异步任务只负责按顺序取命令。
pub struct WorkQueue {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl WorkQueue {
    /// 创建一个独立的工作队列
    pub fn new(config: &SourceConfig) -> Result<Arc<Self>> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .max_blocking_threads(config.max_blocking_threads.max(1))
            .thread_name(format!("{}-work", config.thread_name))
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        info!(
            "🧵 创建命令工作队列: {} 个工作线程, 阻塞线程上限 {}",
            config.worker_threads.max(1),
            config.max_blocking_threads.max(1)
        );

        Ok(Arc::new(Self {
            runtime: Some(runtime),
            handle,
        }))
    }

    /// 获取进程内共享的工作队列，不存在时创建
    pub fn shared(config: &SourceConfig) -> Result<Arc<Self>> {
        let mut slot = SHARED_WORK_QUEUE.lock();
        if let Some(queue) = slot.upgrade() {
            return Ok(queue);
        }
        let queue = Self::new(config)?;
        *slot = Arc::downgrade(&queue);
        Ok(queue)
    }

    /// 创建一条串行队列：提交的条目按 FIFO 顺序逐个交给 `handler`，同一时刻最多执行一个
    pub fn serial_queue<C, F>(&self, name: impl Into<String>, handler: F) -> SerialQueue<C>
    where
        C: Send + 'static,
        F: Fn(C) + Send + Sync + 'static,
    {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<C>();
        let handler = Arc::new(handler);

        let task_name = name.clone();
        self.handle.spawn(async move {
            debug!("串行队列 {} 启动", task_name);
            while let Some(item) = rx.recv().await {
                let handler = Arc::clone(&handler);
                if let Err(e) = tokio::task::spawn_blocking(move || handler(item)).await {
                    error!("❌ 串行队列 {} 的命令执行失败: {}", task_name, e);
                }
            }
            debug!("串行队列 {} 已关闭", task_name);
        });

        SerialQueue {
            name,
            sender: Mutex::new(Some(tx)),
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        // 最后一个使用者可能就在池线程上，不能阻塞等待
        if let Some(runtime) = self.runtime.take() {
            info!("🧹 销毁命令工作队列");
            runtime.shutdown_background();
        }
    }
}

/// 串行队列的提交端
pub struct SerialQueue<C> {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<C>>>,
}

impl<C> SerialQueue<C> {
    /// 提交一个条目
    pub fn submit(&self, item: C) -> Result<()> {
        let sender = self.sender.lock();
        let tx = sender.as_ref().ok_or(SourceError::Shutdown)?;
        tx.send(item)
            .map_err(|_| SourceError::WorkQueue(format!("串行队列 {} 已停止", self.name)))
    }

    /// 关闭队列：已提交的条目仍会被执行，之后的提交失败
    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}
