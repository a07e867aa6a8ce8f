// 核心数据结构和类型定义

pub mod types;
pub mod error;
pub mod config;
pub mod event;

// 重新导出常用类型
pub use types::*;
pub use error::*;
pub use config::SourceConfig;
pub use event::{EventQueue, MediaEvent};
