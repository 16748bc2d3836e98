use std::time::Duration;

use anyhow::Context as _;
use futures::future::BoxFuture;
use infrastructure::HttpClientConfig;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use crate::device::DeviceFunction;

/// Sisyphus kinetic sand table. "On" means the table is awake.
pub struct SisbotTable {
    url: String,
    client: ClientWithMiddleware,
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    resp: Vec<StateItem>,
}

#[derive(Debug, Deserialize)]
struct StateItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_sleeping: Option<String>,
}

impl SisbotTable {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = HttpClientConfig::new(None, Some(Duration::from_secs(10))).new_tracing_client()?;

        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, endpoint: &str) -> anyhow::Result<String> {
        let url = format!("{}/sisbot/{}", self.url, endpoint);

        let body = self
            .client
            .post(&url)
            .form(&[("data", "{}")])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(body)
    }

    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn is_awake(&self) -> anyhow::Result<Option<bool>> {
        let body = self.post("state").await.context("Error reading sand table state")?;
        let awake = parse_awake(&body)?;

        tracing::info!("Sand table is {}", if awake { "awake" } else { "asleep" });
        Ok(Some(awake))
    }

    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn set_awake(&self, awake: bool) -> anyhow::Result<()> {
        let endpoint = if awake { "wake_sisbot" } else { "sleep_sisbot" };
        self.post(endpoint)
            .await
            .with_context(|| format!("Error calling {} on sand table", endpoint))?;
        Ok(())
    }
}

impl DeviceFunction for SisbotTable {
    fn get(&self) -> BoxFuture<'_, anyhow::Result<Option<bool>>> {
        Box::pin(self.is_awake())
    }

    fn set(&self, on: bool) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(self.set_awake(on))
    }
}

// is_sleeping is a string, not a boolean
fn parse_awake(body: &str) -> anyhow::Result<bool> {
    let state: StateResponse = serde_json::from_str(body).context("Invalid sand table state")?;

    state
        .resp
        .iter()
        .find(|item| item.kind == "sisbot")
        .map(|sisbot| sisbot.is_sleeping.as_deref() == Some("false"))
        .context("No sisbot in sand table state")
}
