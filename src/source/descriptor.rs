use crate::core::{
    AudioEncoding, AudioFormat, MajorType, MediaFormat, Result, SourceError, VideoEncoding,
    VideoFormat,
};
use crate::source::demuxer::DemuxerStream;
use std::collections::HashSet;

/// 流描述符：流 ID、可选媒体类型及当前类型
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    id: usize,
    media_types: Vec<MediaFormat>,
    current: usize,
    duration: Option<i64>,
    language: Option<String>,
}

impl StreamDescriptor {
    /// 根据解封装器的首选格式构建
    pub fn from_demuxer_stream(id: usize, stream: &dyn DemuxerStream) -> Self {
        Self::new(
            id,
            offered_media_types(&stream.preferred_format()),
            stream.duration(),
            stream.language(),
        )
    }

    pub fn new(
        id: usize,
        media_types: Vec<MediaFormat>,
        duration: Option<i64>,
        language: Option<String>,
    ) -> Self {
        let media_types = if media_types.is_empty() {
            vec![MediaFormat::Unknown]
        } else {
            media_types
        };
        Self {
            id,
            media_types,
            current: 0,
            duration,
            language,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn major_type(&self) -> MajorType {
        self.media_types[0].major_type()
    }

    pub fn media_types(&self) -> &[MediaFormat] {
        &self.media_types
    }

    pub fn current_media_type(&self) -> &MediaFormat {
        &self.media_types[self.current]
    }

    /// 设置当前媒体类型，只接受与已提供类型兼容的格式
    pub fn set_current_media_type(&mut self, format: &MediaFormat) -> Result<()> {
        let index = self
            .media_types
            .iter()
            .position(|offered| offered.is_compatible(format))
            .ok_or(SourceError::InvalidMediaType)?;
        self.current = index;
        Ok(())
    }

    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }
}

/// 呈现描述符：全部基本流及其选中状态
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationDescriptor {
    streams: Vec<(StreamDescriptor, bool)>,
    total_length: u64,
}

impl PresentationDescriptor {
    /// 构建描述符
    ///
    /// `select_all` 为 false 时每种主类型只默认选中第一个流
    pub fn new(streams: Vec<StreamDescriptor>, total_length: u64, select_all: bool) -> Self {
        let mut seen = HashSet::new();
        let streams = streams
            .into_iter()
            .map(|sd| {
                let selected = select_all
                    || (sd.major_type() != MajorType::Unknown && seen.insert(sd.major_type()));
                (sd, selected)
            })
            .collect();
        Self {
            streams,
            total_length,
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// 按索引获取 (是否选中, 流描述符)
    pub fn stream_descriptor(&self, index: usize) -> Option<(bool, &StreamDescriptor)> {
        self.streams.get(index).map(|(sd, selected)| (*selected, sd))
    }

    pub fn stream_descriptor_mut(&mut self, index: usize) -> Result<&mut StreamDescriptor> {
        self.streams
            .get_mut(index)
            .map(|(sd, _)| sd)
            .ok_or(SourceError::InvalidStreamIndex(index))
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.streams.get(index).map(|(_, s)| *s).unwrap_or(false)
    }

    pub fn select_stream(&mut self, index: usize) -> Result<()> {
        self.set_selected(index, true)
    }

    pub fn deselect_stream(&mut self, index: usize) -> Result<()> {
        self.set_selected(index, false)
    }

    fn set_selected(&mut self, index: usize, selected: bool) -> Result<()> {
        let entry = self
            .streams
            .get_mut(index)
            .ok_or(SourceError::InvalidStreamIndex(index))?;
        entry.1 = selected;
        Ok(())
    }

    /// 整体时长：所有流时长的最大值
    pub fn duration(&self) -> Option<i64> {
        self.streams.iter().filter_map(|(sd, _)| sd.duration()).max()
    }

    /// 字节流总长度
    pub fn total_length(&self) -> u64 {
        self.total_length
    }
}

/// 根据首选格式列出对外提供的媒体类型
///
/// 未压缩音频额外提供 32 位浮点；未压缩视频额外提供常见的 YUV/RGB 格式
pub fn offered_media_types(preferred: &MediaFormat) -> Vec<MediaFormat> {
    let mut types = vec![preferred.clone()];
    match preferred {
        MediaFormat::Audio(audio) if audio.encoding.is_raw() => {
            if audio.encoding != AudioEncoding::PcmF32 {
                types.push(MediaFormat::Audio(AudioFormat {
                    encoding: AudioEncoding::PcmF32,
                    ..audio.clone()
                }));
            }
        }
        MediaFormat::Video(video) if video.encoding.is_raw() => {
            for encoding in [
                VideoEncoding::Nv12,
                VideoEncoding::I420,
                VideoEncoding::Yuy2,
                VideoEncoding::Bgrx,
            ] {
                if encoding != video.encoding {
                    types.push(MediaFormat::Video(VideoFormat {
                        encoding,
                        ..video.clone()
                    }));
                }
            }
        }
        _ => {}
    }
    types
}
