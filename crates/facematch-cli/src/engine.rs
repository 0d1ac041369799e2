use facematch_core::{EmbeddingPipeline, Extraction, Image, Region};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("decoding {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an embed request.
pub struct EmbedResult {
    pub extraction: Extraction,
    /// Seed handed to the fallback generator for this request.
    pub seed: u64,
}

/// Messages sent to the engine thread.
enum EngineRequest {
    Embed {
        path: PathBuf,
        region: Option<Region>,
        reply: oneshot::Sender<Result<EmbedResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request an embedding of the image file at `path`.
    pub async fn embed(&self, path: PathBuf, region: Option<Region>) -> Result<EmbedResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                path,
                region,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Monotonic fallback seeds: start time plus a per-request counter.
struct SeedSource {
    base: u64,
    counter: u64,
}

impl SeedSource {
    fn from_clock() -> Self {
        Self::from_time(SystemTime::now())
    }

    /// Nanosecond resolution, so processes started within the same second
    /// still get distinct seeds.
    fn from_time(now: SystemTime) -> Self {
        let base = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self { base, counter: 0 }
    }

    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.base.wrapping_add(self.counter)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Extraction is CPU-bound; one thread with a bounded queue keeps the
/// load predictable no matter how many requests are in flight.
pub fn spawn_engine(pipeline: EmbeddingPipeline, queue_depth: usize) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            let mut seeds = SeedSource::from_clock();
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed {
                        path,
                        region,
                        reply,
                    } => {
                        let result = run_embed(&pipeline, path, region, seeds.next());
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::debug!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Decode the image file and run the pipeline on it.
fn run_embed(
    pipeline: &EmbeddingPipeline,
    path: PathBuf,
    region: Option<Region>,
    seed: u64,
) -> Result<EmbedResult, EngineError> {
    let decoded = image::open(&path).map_err(|source| EngineError::Decode {
        path: path.clone(),
        source,
    })?;
    let image = Image::from_dynamic(&decoded);

    tracing::debug!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "embed: image decoded"
    );

    let extraction = pipeline.run(&image, region, seed);
    tracing::info!(
        path = %path.display(),
        step = ?extraction.path,
        provenance = ?extraction.embedding.provenance(),
        "embed: done"
    );

    Ok(EmbedResult { extraction, seed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::{ExtractionPath, PipelineConfig};

    #[test]
    fn test_seeds_increase() {
        let mut seeds = SeedSource { base: 10, counter: 0 };
        assert_eq!(seeds.next(), 11);
        assert_eq!(seeds.next(), 12);
    }

    #[test]
    fn test_seeds_differ_within_one_second() {
        let t = UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let mut a = SeedSource::from_time(t);
        let mut b = SeedSource::from_time(t + std::time::Duration::from_millis(250));
        assert_ne!(a.next(), b.next());
    }

    #[tokio::test]
    async fn test_engine_embeds_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        image::RgbImage::from_fn(120, 100, |x, y| image::Rgb([(x * 2) as u8, (y * 2) as u8, 90]))
            .save(&path)
            .unwrap();

        let pipeline = EmbeddingPipeline::new(PipelineConfig::default()).unwrap();
        let engine = spawn_engine(pipeline, 2).unwrap();
        let result = engine.embed(path, None).await.unwrap();

        assert_eq!(result.extraction.path, ExtractionPath::Region);
        assert_eq!(result.extraction.embedding.len(), 128);
        assert!(!result.extraction.embedding.is_fallback());
        assert!(result.seed > 0);
    }

    #[tokio::test]
    async fn test_engine_reports_undecodable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-image.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let pipeline = EmbeddingPipeline::new(PipelineConfig::default()).unwrap();
        let engine = spawn_engine(pipeline, 1).unwrap();
        assert!(matches!(
            engine.embed(path, None).await,
            Err(EngineError::Decode { .. })
        ));
    }
}
