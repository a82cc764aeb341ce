//! HTTP access to the message routes.

use futures::future::BoxFuture;
use parley_proto::{Message, MessagePage, Scope};
use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Where a feed loads pages from.
pub trait PageSource: Send + Sync {
    /// One page newest first, older than `cursor` when given.
    fn fetch(
        &self,
        scope: Scope,
        container_id: Uuid,
        cursor: Option<Uuid>,
    ) -> BoxFuture<'_, ClientResult<MessagePage>>;
}

#[derive(Serialize)]
struct CreateBody<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_url: Option<&'a str>,
}

#[derive(Serialize)]
struct EditBody<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Bearer-authenticated client for one server.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpClient {
    pub fn new(base: Url, token: impl Into<String>) -> Self {
        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            http: reqwest::Client::new(),
            base,
            token: token.into(),
        }
    }

    /// Websocket endpoint on the same host.
    pub fn ws_url(&self) -> ClientResult<Url> {
        let mut url = self.base.join("ws")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl(format!("no websocket endpoint for {}", self.base)))?;
        Ok(url)
    }

    fn endpoint(&self, scope: Scope, container_id: Uuid, message_id: Option<Uuid>) -> ClientResult<Url> {
        let (path, param) = match scope {
            Scope::Channel => ("api/messages", "channel_id"),
            Scope::Conversation => ("api/direct-messages", "conversation_id"),
        };
        let mut url = match message_id {
            Some(id) => self.base.join(&format!("{path}/{id}"))?,
            None => self.base.join(path)?,
        };
        url.query_pairs_mut()
            .append_pair(param, &container_id.to_string());
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> ClientResult<T> {
        let resp = req.bearer_auth(&self.token).send().await?;
        decode(resp).await
    }

    pub async fn create(
        &self,
        scope: Scope,
        container_id: Uuid,
        content: &str,
        file_url: Option<&str>,
    ) -> ClientResult<Message> {
        let url = self.endpoint(scope, container_id, None)?;
        self.send(self.http.post(url).json(&CreateBody { content, file_url }))
            .await
    }

    pub async fn edit(
        &self,
        scope: Scope,
        container_id: Uuid,
        message_id: Uuid,
        content: &str,
    ) -> ClientResult<Message> {
        let url = self.endpoint(scope, container_id, Some(message_id))?;
        self.send(self.http.patch(url).json(&EditBody { content }))
            .await
    }

    pub async fn delete(
        &self,
        scope: Scope,
        container_id: Uuid,
        message_id: Uuid,
    ) -> ClientResult<Message> {
        let url = self.endpoint(scope, container_id, Some(message_id))?;
        self.send(self.http.delete(url)).await
    }

    pub async fn fetch_page(
        &self,
        scope: Scope,
        container_id: Uuid,
        cursor: Option<Uuid>,
    ) -> ClientResult<MessagePage> {
        let mut url = self.endpoint(scope, container_id, None)?;
        if let Some(cursor) = cursor {
            url.query_pairs_mut()
                .append_pair("cursor", &cursor.to_string());
        }
        self.send(self.http.get(url)).await
    }
}

impl PageSource for HttpClient {
    fn fetch(
        &self,
        scope: Scope,
        container_id: Uuid,
        cursor: Option<Uuid>,
    ) -> BoxFuture<'_, ClientResult<MessagePage>> {
        Box::pin(self.fetch_page(scope, container_id, cursor))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ClientResult<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string(),
    };
    Err(ClientError::from_status(status.as_u16(), message))
}
