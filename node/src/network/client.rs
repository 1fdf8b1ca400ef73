// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::errors::ProviderError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// HTTP client for one cluster member.
#[derive(Debug, Clone)]
pub struct PeerClient {
    base_url: String,
    client: Client,
    auth_token: Option<String>,
}

impl PeerClient {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base_url: url.into().trim_end_matches('/').to_string(),
            client,
            auth_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.post(url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// POST `body` as JSON and decode the JSON reply.
    pub async fn call<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .post(path)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Transport(format!(
                "{}{} failed: {}",
                self.base_url,
                path,
                resp.status()
            )));
        }

        resp.json().await.map_err(|e| ProviderError::Transport(e.to_string()))
    }

    /// POST `body` as JSON, ignoring the reply body.
    pub async fn notify<B>(&self, path: &str, body: &B) -> Result<(), ProviderError>
    where
        B: Serialize + ?Sized,
    {
        let resp = self
            .post(path)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Transport(format!(
                "{}{} failed: {}",
                self.base_url,
                path,
                resp.status()
            )));
        }
        Ok(())
    }
}
