use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// 可 seek 的字节流
///
/// 读取线程独占地执行 set_position + read；close 之后所有操作返回错误
pub trait ByteStream: Send + Sync {
    fn length(&self) -> io::Result<u64>;

    fn set_position(&self, offset: u64) -> io::Result<()>;

    /// 读取最多 buf.len() 字节，返回实际读取的字节数
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&self) {}

    /// 来源地址（用于调试和传给解封装器）
    fn url(&self) -> Option<String> {
        None
    }
}

/// 基于 Read + Seek 的字节流
pub struct IoByteStream<R> {
    inner: Mutex<Option<R>>,
    url: Option<String>,
}

pub type FileByteStream = IoByteStream<File>;
pub type MemoryByteStream = IoByteStream<Cursor<Vec<u8>>>;

impl<R: Read + Seek + Send> IoByteStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: Mutex::new(Some(reader)),
            url: None,
        }
    }

    pub fn with_url(reader: R, url: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Some(reader)),
            url: Some(url.into()),
        }
    }
}

impl IoByteStream<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::with_url(file, path.as_ref().to_string_lossy()))
    }
}

impl IoByteStream<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(Cursor::new(bytes))
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "字节流已关闭")
}

impl<R: Read + Seek + Send> ByteStream for IoByteStream<R> {
    fn length(&self) -> io::Result<u64> {
        let mut guard = self.inner.lock();
        let reader = guard.as_mut().ok_or_else(closed)?;
        let current = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(current))?;
        Ok(end)
    }

    fn set_position(&self, offset: u64) -> io::Result<()> {
        let mut guard = self.inner.lock();
        let reader = guard.as_mut().ok_or_else(closed)?;
        reader.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let reader = guard.as_mut().ok_or_else(closed)?;
        reader.read(buf)
    }

    fn close(&self) {
        self.inner.lock().take();
    }

    fn url(&self) -> Option<String> {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stream_read_at_position() {
        let stream = MemoryByteStream::from_bytes((0u8..10).collect());
        assert_eq!(stream.length().unwrap(), 10);

        stream.set_position(4).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [4, 5, 6]);
    }

    #[test]
    fn test_closed_stream_fails() {
        let stream = MemoryByteStream::from_bytes(vec![1, 2, 3]);
        stream.close();
        assert!(stream.length().is_err());
        assert!(stream.read(&mut [0u8; 1]).is_err());
    }
}
