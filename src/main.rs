use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use myy_source::core::ticks_to_ms;
use myy_source::{
    MediaEvent, MediaSource, MediaStream, SourceConfig, SourceCreationResult, SourceFactory,
    StartPosition, TimeFormat, Token,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 单个流的播放统计
#[derive(Default)]
struct StreamStats {
    samples: usize,
    bytes: usize,
    last_pts: Option<i64>,
    ended: bool,
}

fn load_config() -> Result<SourceConfig> {
    match std::env::var("MYY_SOURCE_CONFIG") {
        Ok(path) => SourceConfig::from_json_file(&path)
            .with_context(|| format!("读取配置文件 {} 失败", path)),
        Err(_) => Ok(SourceConfig::default()),
    }
}

fn open(path: String, config: SourceConfig) -> Result<MediaSource> {
    let (tx, rx) = unbounded();
    SourceFactory::create_async(path, config, tx)?;

    match rx.recv()? {
        SourceCreationResult::Success { source, url } => {
            info!("✅ 已打开: {}", url);
            Ok(source)
        }
        SourceCreationResult::Failed { url, error } => Err(anyhow!("打开 {} 失败: {}", url, error)),
    }
}

/// 每个活动流始终保持一个未完成的样本请求，直到整个呈现结束
fn play(source: &MediaSource) -> Result<BTreeMap<usize, StreamStats>> {
    let pd = source.create_presentation_descriptor()?;
    source.start(&pd, TimeFormat::Default, StartPosition::At(0))?;

    let mut streams: Vec<Arc<MediaStream>> = Vec::new();
    let mut stats: BTreeMap<usize, StreamStats> = BTreeMap::new();
    let mut requested: u64 = 0;

    loop {
        let mut idle = true;

        while let Some(event) = source.event_queue().try_get_event()? {
            idle = false;
            match event {
                MediaEvent::NewStream(stream) => {
                    info!("🆕 新流 {}: {:?}", stream.id(), stream.descriptor().major_type());
                    stream.request_sample(Some(Token::new(requested)))?;
                    requested += 1;
                    stats.entry(stream.id()).or_default();
                    streams.push(stream);
                }
                MediaEvent::EndOfPresentation => {
                    info!("🏁 播放结束");
                    return Ok(stats);
                }
                MediaEvent::Error(e) => bail!("媒体源出错: {}", e),
                other => debug!("源事件: {}", other.name()),
            }
        }

        for stream in &streams {
            while let Some(event) = stream.event_queue().try_get_event()? {
                idle = false;
                let entry = stats.entry(stream.id()).or_default();
                match event {
                    MediaEvent::MediaSample(sample) => {
                        entry.samples += 1;
                        entry.bytes += sample.data.len();
                        entry.last_pts = Some(sample.pts);
                        debug!(
                            "流 {} 样本 pts={}ms token={:?}",
                            stream.id(),
                            ticks_to_ms(sample.pts),
                            sample.token().and_then(|t| t.downcast_ref::<u64>())
                        );
                        stream.request_sample(Some(Token::new(requested)))?;
                        requested += 1;
                    }
                    MediaEvent::EndOfStream => {
                        info!("流 {} 结束", stream.id());
                        entry.ended = true;
                    }
                    other => debug!("流 {} 事件: {}", stream.id(), other.name()),
                }
            }
        }

        if idle {
            thread::sleep(Duration::from_millis(2));
        }
    }
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Source 启动");

    let Some(path) = std::env::args().nth(1) else {
        bail!("用法: myy_source <file.wav>");
    };
    let config = load_config()?;
    let source = open(path, config)?;

    let result = play(&source);
    if let Err(e) = source.shutdown() {
        warn!("⚠️ 关闭媒体源失败: {}", e);
    }

    for (id, s) in result? {
        println!(
            "流 {}: {} 个样本, {} 字节, 最后 pts {}ms{}",
            id,
            s.samples,
            s.bytes,
            s.last_pts.map(ticks_to_ms).unwrap_or(0),
            if s.ended { "" } else { "（未结束）" }
        );
    }
    Ok(())
}
