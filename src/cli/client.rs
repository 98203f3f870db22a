use anyhow::{Context, Result, anyhow, bail};
use reqwest::{Method, Url};
use serde_json::Value;

/// Thin JSON client for the daemon's HTTP API. Every call unwraps the
/// success envelope or turns the error envelope into an `anyhow` error.
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid API url '{}'", base))?;
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("API url cannot be a base: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Value> {
        self.call(Method::GET, segments, query, None).await
    }

    pub async fn post(&self, segments: &[&str], body: Value) -> Result<Value> {
        self.call(Method::POST, segments, &[], Some(body)).await
    }

    pub async fn call(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let url = self.url(segments)?;
        let mut req = self.http.request(method, url).query(query);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() => bail!(
                "scriptd daemon is not reachable at {}. Run 'scriptd daemon start' first.",
                self.base
            ),
            Err(e) => return Err(e.into()),
        };
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("daemon returned a non-JSON response ({})", status))?;
        unwrap_envelope(body)
    }
}

/// `{"success": true, ...}` passes through; anything else becomes an error
/// carrying the daemon's message.
pub(crate) fn unwrap_envelope(body: Value) -> Result<Value> {
    if body.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("request failed");
    match body.pointer("/error/kind").and_then(Value::as_str) {
        Some(kind) => bail!("{} ({})", message, kind),
        None => bail!("{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn segments_are_percent_encoded() {
        let client = ApiClient::new("http://127.0.0.1:17990").unwrap();
        let url = client.url(&["api", "commands", "backup db"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:17990/api/commands/backup%20db");
    }

    #[test]
    fn error_envelope_becomes_error() {
        let err = unwrap_envelope(json!({
            "success": false,
            "error": {"kind": "not_found", "message": "command not found: x"}
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "command not found: x (not_found)");
    }

    #[test]
    fn success_envelope_passes_through() {
        let body = unwrap_envelope(json!({"success": true, "jobs": []})).unwrap();
        assert!(body["jobs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_daemon_has_a_clear_message() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ApiClient::new(&format!("http://127.0.0.1:{}", port)).unwrap();
        let err = client.get(&["health"], &[]).await.unwrap_err();
        assert!(err.to_string().contains("not reachable"));
    }
}
