use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use domain_compute::{model::vo::AppSpec, service::AppLoader};
use regex::Regex;

/// Where an app spec lives.
#[derive(Debug, PartialEq, Eq)]
pub enum SpecLocation {
    Path(PathBuf),
    Url(String),
}

/// Loads app specs from the filesystem or over http.
pub struct SpecLoader {
    client: Arc<reqwest::Client>,
    github_blob: Regex,
}

impl SpecLoader {
    pub fn new(client: Arc<reqwest::Client>) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            github_blob: Regex::new(r"^https://github\.com/([^/]+)/([^/]+)/blob/(.+)$")?,
        })
    }

    /// GitHub blob pages are swapped for their raw content url.
    pub fn locate(&self, spec_uri: &str) -> SpecLocation {
        if let Some(captures) = self.github_blob.captures(spec_uri) {
            return SpecLocation::Url(format!(
                "https://raw.githubusercontent.com/{}/{}/{}",
                &captures[1], &captures[2], &captures[3]
            ));
        }
        if spec_uri.starts_with("http://") || spec_uri.starts_with("https://") {
            return SpecLocation::Url(spec_uri.to_string());
        }
        let path = spec_uri.strip_prefix("file://").unwrap_or(spec_uri);
        SpecLocation::Path(PathBuf::from(path))
    }
}

/// JSON first, YAML otherwise.
pub fn parse_app_spec(text: &str) -> anyhow::Result<AppSpec> {
    match serde_json::from_str(text) {
        Ok(spec) => Ok(spec),
        Err(json_error) => serde_yaml::from_str(text)
            .with_context(|| format!("Neither JSON ({json_error}) nor YAML")),
    }
}

#[async_trait]
impl AppLoader for SpecLoader {
    async fn load(&self, spec_uri: &str) -> anyhow::Result<AppSpec> {
        let text = match self.locate(spec_uri) {
            SpecLocation::Path(path) => tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Unable to read {}", path.display()))?,
            SpecLocation::Url(url) => self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?,
        };
        parse_app_spec(&text).with_context(|| format!("Invalid app spec at {spec_uri}"))
    }
}
