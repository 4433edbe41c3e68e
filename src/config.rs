use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub papers: Option<PapersConfig>,
    pub patents: Option<PatentsConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Paper family: bulk tar archives grouped under year directories.
#[derive(Debug, Deserialize, Clone)]
pub struct PapersConfig {
    pub db_path: PathBuf,
    pub archive_root: PathBuf,
    #[serde(default = "default_paper_globs")]
    pub include_globs: Vec<String>,
}

/// Patent family: bulk zip archives under grant/application subdirectories.
#[derive(Debug, Deserialize, Clone)]
pub struct PatentsConfig {
    pub db_path: PathBuf,
    pub archive_root: PathBuf,
    #[serde(default = "default_patent_globs")]
    pub include_globs: Vec<String>,
}

fn default_paper_globs() -> Vec<String> {
    vec!["*.tar".to_string()]
}

fn default_patent_globs() -> Vec<String> {
    vec!["*.zip".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_cache_budget_mb")]
    pub max_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_cache_dir(),
            max_size_mb: default_cache_budget_mb(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_cache_budget_mb() -> u64 {
    1024
}

impl CacheConfig {
    pub fn budget_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    /// Parallel archive workers; 0 means one per available core.
    #[serde(default)]
    pub workers: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { workers: 0 }
    }
}

impl ScannerConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Open archive file handles kept in the LRU pool.
    #[serde(default = "default_max_open_archives")]
    pub max_open_archives: usize,
    /// Decompressed patent XML streams kept resident. These run to hundreds
    /// of megabytes each, so the default is deliberately small.
    #[serde(default = "default_max_xml_streams")]
    pub max_xml_streams: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_open_archives: default_max_open_archives(),
            max_xml_streams: default_max_xml_streams(),
        }
    }
}

fn default_max_open_archives() -> usize {
    16
}

fn default_max_xml_streams() -> usize {
    2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.papers.is_none() && config.patents.is_none() {
        anyhow::bail!("config must define at least one of [papers] or [patents]");
    }

    if config.cache.enabled && config.cache.max_size_mb == 0 {
        anyhow::bail!("cache.max_size_mb must be > 0 when the cache is enabled");
    }

    if config.retrieval.max_open_archives == 0 {
        anyhow::bail!("retrieval.max_open_archives must be >= 1");
    }

    if config.retrieval.max_xml_streams == 0 {
        anyhow::bail!("retrieval.max_xml_streams must be >= 1");
    }

    Ok(())
}
