//! REST client for the platform API.

use std::time::Duration;

use async_trait::async_trait;
use mangasync_api_types::{AdIntensity, Comment, CommentContentRequest, ErrorBody, SeriesCard};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::application::ad_intensity::{AD_INTENSITY_PATH, AdIntensityApi};
use crate::application::comments::{CommentTarget, CommentsApi};
use crate::application::error::ApiError;
use crate::application::sections::{Section, SectionsApi};

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::decode(err.to_string())
        } else {
            ApiError::transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        ApiError::InvalidUrl(err.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(origin: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(origin)?.join("/")?;
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("mangasync/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.url(path)?;
        debug!(%method, %url, "Sending API request");
        Ok(self.client.request(method, url))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(Method::GET, path)?.send().await?;
        Self::handle(response).await
    }

    /// Send a request whose response body is ignored on success.
    pub async fn send_unit(
        &self,
        method: Method,
        path: &str,
        body: Option<&CommentContentRequest>,
    ) -> Result<(), ApiError> {
        let mut request = self.request(method, path)?;
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::check(response).await.map(drop)
    }

    async fn handle<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|err| ApiError::decode(format!("failed to parse body: {err}")))
    }

    /// Turn a non-2xx response into [`ApiError::Status`], keeping the
    /// server's `message` when the body carries one.
    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let bytes = response.bytes().await.unwrap_or_default();
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .ok()
            .and_then(ErrorBody::into_reason);
        Err(ApiError::status(status.as_u16(), message))
    }
}

#[async_trait]
impl CommentsApi for ApiClient {
    async fn list_comments(&self, target: &CommentTarget) -> Result<Vec<Comment>, ApiError> {
        self.get_json(&target.endpoint()).await
    }

    async fn create_comment(&self, target: &CommentTarget, content: &str) -> Result<(), ApiError> {
        let body = CommentContentRequest {
            content: content.to_string(),
        };
        self.send_unit(Method::POST, &target.endpoint(), Some(&body))
            .await
    }

    async fn update_comment(&self, comment_id: &str, content: &str) -> Result<(), ApiError> {
        let body = CommentContentRequest {
            content: content.to_string(),
        };
        self.send_unit(Method::PATCH, &comment_path(comment_id), Some(&body))
            .await
    }

    async fn delete_comment(&self, comment_id: &str) -> Result<(), ApiError> {
        self.send_unit(Method::DELETE, &comment_path(comment_id), None)
            .await
    }
}

#[async_trait]
impl SectionsApi for ApiClient {
    async fn section(&self, section: Section) -> Result<Vec<SeriesCard>, ApiError> {
        self.get_json(&section.path()).await
    }
}

#[async_trait]
impl AdIntensityApi for ApiClient {
    async fn ad_intensity(&self) -> Result<AdIntensity, ApiError> {
        self.get_json(AD_INTENSITY_PATH).await
    }
}

fn comment_path(comment_id: &str) -> String {
    format!("/api/comments/{comment_id}")
}
