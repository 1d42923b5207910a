use async_trait::async_trait;
use common::error::AppError;
use serde_json::Value;

/// Sends one request body to the generation endpoint.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Returns the decoded JSON envelope. Non-success HTTP statuses are errors.
    async fn post(&self, url: &str, api_key: Option<&str>, body: &Value)
        -> Result<Value, AppError>;
}

#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        api_key: Option<&str>,
        body: &Value,
    ) -> Result<Value, AppError> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Inference(format!(
                "Inference call failed with status {}",
                status.as_u16()
            )));
        }

        Ok(response.json::<Value>().await?)
    }
}
