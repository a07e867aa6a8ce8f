use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 媒体源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// 共享命令工作队列的线程数
    pub worker_threads: usize,
    /// 执行命令体的阻塞线程池上限
    pub max_blocking_threads: usize,
    /// 读取线程单次等待读请求的时长（毫秒）
    pub reader_poll_interval_ms: u64,
    /// 内置 WAV 解封装器每个样本读取的字节数
    pub read_chunk_size: u32,
    /// 默认是否选中全部流（否则每种主类型只选第一个）
    pub select_all_streams: bool,
    /// 线程名前缀
    pub thread_name: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_blocking_threads: 16,
            reader_poll_interval_ms: 50,
            read_chunk_size: 16384,
            select_all_streams: false,
            thread_name: "myy-source".to_string(),
        }
    }
}

impl SourceConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn reader_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reader_poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SourceConfig::from_json_str(r#"{ "worker_threads": 4 }"#).unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.read_chunk_size, 16384);
        assert!(!config.select_all_streams);
    }

    #[test]
    fn test_bad_json_is_reported() {
        let err = SourceConfig::from_json_str("{ worker_threads: ").unwrap_err();
        assert!(matches!(err, crate::core::SourceError::Json(_)));
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = SourceConfig {
            reader_poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.reader_poll_interval(), Duration::from_millis(1));
    }
}
