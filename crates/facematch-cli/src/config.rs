use facematch_core::matcher::MatchError;
use facematch_core::pipeline::ConfigError as PipelineConfigError;
use facematch_core::{
    EmbeddingPipeline, FallbackHandling, MatchPolicy, PipelineConfig, SimilarityConvention,
    SimilarityMatcher,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("match policy: {0}")]
    Policy(#[from] MatchError),
    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineConfigError),
}

/// Optional TOML config file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    target_size: Option<u32>,
    output_size: Option<usize>,
    margin_ratio: Option<f32>,
    convention: Option<SimilarityConvention>,
    threshold: Option<f32>,
    fallback: Option<FallbackHandling>,
    gallery_path: Option<PathBuf>,
    store_fallback: Option<bool>,
    queue_depth: Option<usize>,
}

/// CLI configuration: TOML file values overridden by `FACEMATCH_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub policy: MatchPolicy,
    /// JSON file holding enrolled embeddings.
    pub gallery_path: PathBuf,
    /// Whether `enroll` may store a fallback-sourced embedding.
    pub store_fallback: bool,
    /// Pending requests the extraction engine will queue.
    pub queue_depth: usize,
}

impl Config {
    /// Load from `path` (or `FACEMATCH_CONFIG`) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env("FACEMATCH_CONFIG").map(PathBuf::from));

        let file = match path {
            Some(path) => read_file(&path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, env)
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            target_size: env_parse(&env, "FACEMATCH_TARGET_SIZE")
                .or(file.target_size)
                .unwrap_or(defaults.target_size),
            output_size: env_parse(&env, "FACEMATCH_OUTPUT_SIZE")
                .or(file.output_size)
                .unwrap_or(defaults.output_size),
            margin_ratio: env_parse(&env, "FACEMATCH_MARGIN_RATIO")
                .or(file.margin_ratio)
                .unwrap_or(defaults.margin_ratio),
        };

        // Unknown conventions are an error, never a silent default: scores
        // from two conventions must not meet.
        let convention = match env("FACEMATCH_CONVENTION") {
            Some(v) => v.parse()?,
            None => file.convention.unwrap_or(SimilarityConvention::Cosine),
        };
        let threshold = env_parse(&env, "FACEMATCH_THRESHOLD")
            .or(file.threshold)
            .unwrap_or_else(|| convention.default_threshold());
        let fallback = match env("FACEMATCH_FALLBACK") {
            Some(v) => v.parse()?,
            None => file.fallback.unwrap_or_default(),
        };
        let policy = MatchPolicy::new(convention, threshold)?.with_fallback(fallback);

        let gallery_path = env("FACEMATCH_GALLERY")
            .map(PathBuf::from)
            .or(file.gallery_path)
            .unwrap_or_else(|| default_data_dir(&env).join("gallery.json"));

        let store_fallback = env("FACEMATCH_STORE_FALLBACK")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .or(file.store_fallback)
            .unwrap_or(false);

        let queue_depth = env_parse(&env, "FACEMATCH_QUEUE_DEPTH")
            .or(file.queue_depth)
            .unwrap_or(DEFAULT_QUEUE_DEPTH)
            .max(1);

        Ok(Self {
            pipeline,
            policy,
            gallery_path,
            store_fallback,
            queue_depth,
        })
    }

    /// Build the embedding pipeline, rejecting a degenerate configuration.
    pub fn build_pipeline(&self) -> Result<EmbeddingPipeline, ConfigError> {
        Ok(EmbeddingPipeline::new(self.pipeline)?)
    }

    pub fn build_matcher(&self) -> Result<SimilarityMatcher, ConfigError> {
        Ok(SimilarityMatcher::new(self.policy, self.pipeline.output_size)?)
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
}

/// Parse `key` from the environment. Unparsable values are ignored with a warning.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}
