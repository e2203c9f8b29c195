use std::time::Duration;

use {async_trait::async_trait, reqwest::header::CONTENT_TYPE, tracing::debug};

use crate::{capabilities::HttpClient, error::CapabilityError};

/// Target and credentials of an outbound call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundRequest {
    pub url: String,
    /// Basic auth is only sent when the user name is non-empty.
    pub username: String,
    pub password: String,
    pub headers: Vec<(String, String)>,
}

impl OutboundRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    fn apply(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if !self.username.is_empty() {
            builder = builder.basic_auth(&self.username, Some(&self.password));
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }
}

/// [`HttpClient`] backed by a shared `reqwest` client.
///
/// Non-2xx responses are not errors: the body is handed to the script as is.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, CapabilityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CapabilityError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    async fn finish(&self, builder: reqwest::RequestBuilder) -> Result<String, CapabilityError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;
        debug!(status = %resp.status(), url = %resp.url(), "outbound request done");
        resp.text()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, request: &OutboundRequest) -> Result<String, CapabilityError> {
        self.finish(request.apply(self.client.get(&request.url)))
            .await
    }

    async fn post_json(
        &self,
        request: &OutboundRequest,
        body: String,
    ) -> Result<String, CapabilityError> {
        let builder = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.finish(request.apply(builder)).await
    }
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher};

    fn client() -> ReqwestHttpClient {
        ReqwestHttpClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn get_sends_basic_auth_when_user_given() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/items")
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .with_body("[1,2]")
            .create_async()
            .await;

        let req = OutboundRequest {
            username: "user".into(),
            password: "pass".into(),
            ..OutboundRequest::new(format!("{}/items", server.url()))
        };
        assert_eq!(client().get(&req).await.unwrap(), "[1,2]");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_omits_auth_without_user() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/open")
            .match_header("authorization", Matcher::Missing)
            .with_status(404)
            .with_body("nope")
            .create_async()
            .await;

        let req = OutboundRequest::new(format!("{}/open", server.url()));
        assert_eq!(client().get(&req).await.unwrap(), "nope");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn post_json_sets_content_type_and_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_header("x-trace", "42")
            .match_body(Matcher::JsonString(r#"{"a":1}"#.into()))
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let req = OutboundRequest {
            headers: vec![("X-Trace".into(), "42".into())],
            ..OutboundRequest::new(format!("{}/hook", server.url()))
        };
        let body = client()
            .post_json(&req, r#"{"a":1}"#.into())
            .await
            .unwrap();
        assert_eq!(body, r#"{"ok":true}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let req = OutboundRequest::new("http://127.0.0.1:1/");
        assert!(matches!(
            client().get(&req).await,
            Err(CapabilityError::Http(_))
        ));
    }
}
