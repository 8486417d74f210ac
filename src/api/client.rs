use anyhow::{bail, Context, Result};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::types::{AuthResponse, Conversation, ConversationDetail};

/// What a chat session needs from the persistence backend
#[async_trait::async_trait]
pub trait ConversationApi: Send + Sync {
    /// Current bearer token, if signed in
    async fn token(&self) -> Option<String>;

    async fn create_conversation(&self, title: &str) -> Result<Conversation>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail>;
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct NewConversation<'a> {
    title: &'a str,
}

/// HTTP client for the REST backend. Holds the access token in memory.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            token: RwLock::new(None),
        })
    }

    pub fn with_token(self, token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
            ..self
        }
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        self.authenticate("/auth/login", email, password).await
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<AuthResponse> {
        self.authenticate("/auth/signup", email, password).await
    }

    pub async fn logout(&self) {
        info!("Signing out");
        self.set_token(None).await;
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> Result<AuthResponse> {
        info!("Authenticating {} via {}", email, path);

        let res = self
            .http
            .post(self.url(path))
            .json(&Credentials { email, password })
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", path))?;

        let auth: AuthResponse = self.read(res).await?;
        self.set_token(Some(auth.access_token.clone())).await;

        Ok(auth)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.read().await.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let req = self.authorized(self.http.get(self.url(path))).await;
        let res = req
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;
        self.read(res).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let req = self.authorized(self.http.post(self.url(path))).await;
        let res = req
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", path))?;
        self.read(res).await
    }

    async fn read<T: DeserializeOwned>(&self, res: Response) -> Result<T> {
        let status = res.status();

        if status == StatusCode::UNAUTHORIZED {
            // Expired or revoked token: forget it so the next login starts clean
            warn!("Backend rejected the access token, clearing it");
            self.set_token(None).await;
            bail!("Unauthorized (401)");
        }

        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            bail!("Backend returned {}: {}", status, body);
        }

        res.json::<T>().await.context("Failed to parse backend response")
    }
}

#[async_trait::async_trait]
impl ConversationApi for ApiClient {
    async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let conversation: Conversation = self
            .post_json("/conversations", &NewConversation { title })
            .await?;
        info!("Created conversation {} ({:?})", conversation.id, conversation.title);
        Ok(conversation)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.get_json("/conversations").await
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail> {
        self.get_json(&format!("/conversations/{}", id)).await
    }
}
