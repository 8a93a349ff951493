use std::path::{Path, PathBuf};

use aem_store::SnapshotFile;
use chrono::Duration;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v12.0";

const CONVERSIONS_ROUTE: &str = "aem_conversions";
const CONVERSION_CONFIGS_ROUTE: &str = "aem_conversion_configs";

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    app_id: String,
    graph_base_url: String,
    access_token: Option<String>,
    data_dir: PathBuf,
    report_file_name: String,
    config_file_name: String,
    refresh_window: Duration,
    request_timeout: std::time::Duration,
}

impl ReporterConfig {
    /// Defaults: app id `app`, 24 hour refresh window, 30 second request
    /// timeout, snapshots `aem_report.json` and `aem_config.json` in `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_id: "app".to_string(),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            access_token: None,
            data_dir: data_dir.into(),
            report_file_name: "aem_report.json".to_string(),
            config_file_name: "aem_config.json".to_string(),
            refresh_window: Duration::hours(24),
            request_timeout: std::time::Duration::from_secs(30),
        }
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn graph_base_url(mut self, url: impl Into<String>) -> Self {
        self.graph_base_url = url.into();
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn report_file_name(mut self, name: impl Into<String>) -> Self {
        self.report_file_name = name.into();
        self
    }

    pub fn config_file_name(mut self, name: impl Into<String>) -> Self {
        self.config_file_name = name.into();
        self
    }

    /// How long a configuration refresh stays fresh.
    pub fn refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    pub fn request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn get_graph_base_url(&self) -> &str {
        &self.graph_base_url
    }

    pub fn get_access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn get_data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn get_refresh_window(&self) -> Duration {
        self.refresh_window
    }

    pub fn get_request_timeout(&self) -> std::time::Duration {
        self.request_timeout
    }

    /// Snapshot of the invocation list.
    pub fn report_file(&self) -> SnapshotFile {
        SnapshotFile::new(self.data_dir.join(&self.report_file_name))
    }

    /// Snapshot of the configuration store.
    pub fn config_file(&self) -> SnapshotFile {
        SnapshotFile::new(self.data_dir.join(&self.config_file_name))
    }

    pub fn conversions_path(&self) -> String {
        format!("{}/{CONVERSIONS_ROUTE}", self.app_id)
    }

    pub fn conversion_configs_path(&self) -> String {
        format!("{}/{CONVERSION_CONFIGS_ROUTE}", self.app_id)
    }
}
