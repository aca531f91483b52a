use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use ::config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "igefa_scraper.toml";
const ENV_PREFIX: &str = "IGEFA";
const MAX_RETRIES_LIMIT: u32 = 10;

/// How extracted records reach the CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum WriteMode {
    /// Append each row to the CSV as soon as it is extracted.
    Direct,
    /// Collect rows in a JSON buffer and write the CSV once at the end.
    Buffered,
}

/// Which failed items get recorded as processed (and are therefore never
/// fetched again).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Record permanent failures; transient ones are retried next run.
    PermanentOnly,
    /// Only successes are recorded; every failure is retried next run.
    SuccessOnly,
    /// Every terminal outcome is recorded; nothing is retried.
    RecordAll,
}

impl RetryPolicy {
    pub fn records_failure(self, transient: bool) -> bool {
        match self {
            RetryPolicy::PermanentOnly => !transient,
            RetryPolicy::SuccessOnly => false,
            RetryPolicy::RecordAll => true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    /// Listing page URL with a `{page}` placeholder.
    pub listing_url: String,
    /// JSON pointer into `__NEXT_DATA__` where `{ products: [...] }` lives.
    pub feed_pointer: String,
    pub output_dir: PathBuf,
    pub progress_file: String,
    pub output_file: String,
    pub buffer_file: String,
    pub max_pages: u32,
    pub max_empty_pages: u32,
    pub concurrency: usize,
    pub write_mode: WriteMode,
    pub retry_policy: RetryPolicy,
    pub supplier: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://store.igefa.de".into(),
            listing_url: "https://store.igefa.de/c/alle-produkte?page={page}".into(),
            feed_pointer: "/props/pageProps/initialProductData".into(),
            output_dir: PathBuf::from("output"),
            progress_file: "progress.json".into(),
            output_file: "scraped_data.csv".into(),
            buffer_file: "buffer.json".into(),
            max_pages: 50,
            max_empty_pages: 2,
            concurrency: 8,
            write_mode: WriteMode::Direct,
            retry_policy: RetryPolicy::PermanentOnly,
            supplier: "igefa Handelsgesellschaft".into(),
            timeout_secs: 30,
            max_retries: 3,
            backoff_ms: 2000,
            user_agent: concat!("igefa_scraper/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (explicit path must exist, the default
    /// one may not), then `IGEFA_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.concurrency > 0, "concurrency must be at least 1");
        ensure!(
            self.max_retries <= MAX_RETRIES_LIMIT,
            "max_retries must be at most {}",
            MAX_RETRIES_LIMIT
        );
        ensure!(
            self.listing_url.contains("{page}"),
            "listing_url must contain a {{page}} placeholder"
        );
        Ok(())
    }

    pub fn progress_path(&self) -> PathBuf {
        self.output_dir.join(&self.progress_file)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file)
    }

    pub fn buffer_path(&self) -> PathBuf {
        self.output_dir.join(&self.buffer_file)
    }

    pub fn listing_page_url(&self, page: u32) -> String {
        self.listing_url.replace("{page}", &page.to_string())
    }

    /// Canonical detail URL for a listing hit.
    pub fn product_url(&self, slug: &str, id: &str) -> String {
        format!("{}/p/{}/{}", self.base_url.trim_end_matches('/'), slug, id)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_rejected() {
        let s = Settings {
            concurrency: 0,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn excessive_retries_rejected() {
        let s = Settings {
            max_retries: 64,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn product_url_from_slug_and_id() {
        let s = Settings {
            base_url: "https://shop.test/".into(),
            ..Default::default()
        };
        assert_eq!(s.product_url("a", "1"), "https://shop.test/p/a/1");
    }

    #[test]
    fn listing_page_substitutes_number() {
        let s = Settings::default();
        assert!(s.listing_page_url(3).ends_with("?page=3"));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraper.toml");
        std::fs::write(
            &path,
            "concurrency = 3\nwrite_mode = \"buffered\"\nretry_policy = \"record_all\"\n",
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.concurrency, 3);
        assert_eq!(s.write_mode, WriteMode::Buffered);
        assert_eq!(s.retry_policy, RetryPolicy::RecordAll);
        assert_eq!(s.max_pages, 50);
    }

    #[test]
    fn load_rejects_listing_url_without_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraper.toml");
        std::fs::write(&path, "listing_url = \"https://shop.test/c/all\"\n").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn retry_policy_decisions() {
        assert!(RetryPolicy::PermanentOnly.records_failure(false));
        assert!(!RetryPolicy::PermanentOnly.records_failure(true));
        assert!(!RetryPolicy::SuccessOnly.records_failure(false));
        assert!(RetryPolicy::RecordAll.records_failure(true));
    }
}
