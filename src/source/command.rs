use crate::core::{StartPosition, Token};
use crate::source::descriptor::PresentationDescriptor;

/// 媒体源命令
///
/// 由调用方操作创建，经串行队列交给工作线程执行后释放
#[derive(Debug)]
pub enum Command {
    Start {
        descriptor: PresentationDescriptor,
        position: StartPosition,
        /// 提交时是否计入了待执行的 EOS 重置（见 SourceInner::pending_eos_resets）
        resets_eos: bool,
    },
    Pause,
    Stop,
    RequestSample {
        stream: usize,
        token: Option<Token>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "Start",
            Command::Pause => "Pause",
            Command::Stop => "Stop",
            Command::RequestSample { .. } => "RequestSample",
        }
    }
}
