use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::api::{PlatformApi, Repository, SearchQuery};
use crate::correlation::{CorrelationId, CorrelationMiddleware};
use crate::issue::IssueRecord;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// The search API never returns more than this many results for one query.
const SEARCH_RESULT_CAP: u64 = 1000;
const DEFAULT_PAGE_SIZE: u32 = 100;

/// GitHub App client. Hands out per-installation API handles.
#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_base: String,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
}

#[derive(Debug, Deserialize)]
pub struct Installation {
    pub id: u64,
    pub account: Option<Account>,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    items: Vec<IssueRecord>,
}

#[derive(Debug, Deserialize)]
struct InstallationRepositoriesResponse {
    repositories: Vec<Repository>,
}

#[derive(Debug, Serialize)]
struct AddLabelsRequest<'a> {
    labels: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct ReviewRequest<'a> {
    reviewers: [&'a str; 1],
}

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String) -> Result<Self> {
        Self::with_api_base(app_id, private_key, DEFAULT_API_URL)
    }

    pub fn with_api_base(app_id: u64, private_key: String, api_base: &str) -> Result<Self> {
        Ok(Self {
            client: create_github_client()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// API handle authenticated as `installation_id`.
    pub fn installation(&self, installation_id: u64) -> InstallationApi {
        InstallationApi {
            github: self.clone(),
            auth: Auth::Installation(installation_id),
            page_size: DEFAULT_PAGE_SIZE,
            correlation_id: None,
        }
    }

    /// API handle using a fixed token, e.g. a personal access token.
    pub fn with_token(&self, token: impl Into<String>) -> InstallationApi {
        InstallationApi {
            github: self.clone(),
            auth: Auth::Token(token.into()),
            page_size: DEFAULT_PAGE_SIZE,
            correlation_id: None,
        }
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // Issued 60 seconds ago to account for clock skew
            exp: now + 600, // Expires in 10 minutes
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    pub async fn get_installation_token(&self, installation_id: u64) -> Result<String> {
        // Reuse a cached token while it has more than five minutes left
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs()
                    > 300
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );

        info!("Requesting new installation access token for {}", installation_id);

        let response = check(
            self.client.post(&url).bearer_auth(jwt),
            "installation token request",
        )
        .await?;

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = chrono::DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);

        let expires_at_system =
            UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp().max(0) as u64);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                installation_id,
                (token_response.token.clone(), expires_at_system),
            );
        }

        Ok(token_response.token)
    }

    /// Every installation of this app.
    pub async fn list_installations(&self) -> Result<Vec<Installation>> {
        let jwt = self.generate_jwt()?;
        let url = format!("{}/app/installations", self.api_base);
        let mut installations = Vec::new();

        for page in 1u32.. {
            let response = check(
                self.client
                    .get(&url)
                    .bearer_auth(&jwt)
                    .query(&[("per_page", DEFAULT_PAGE_SIZE), ("page", page)]),
                "installation listing",
            )
            .await?;
            let batch: Vec<Installation> = response
                .json()
                .await
                .context("Failed to parse installation list")?;
            let done = batch.len() < DEFAULT_PAGE_SIZE as usize;
            installations.extend(batch);
            if done {
                break;
            }
        }

        Ok(installations)
    }
}

#[derive(Clone)]
enum Auth {
    Installation(u64),
    Token(String),
}

/// [`PlatformApi`] backed by the GitHub REST API.
#[derive(Clone)]
pub struct InstallationApi {
    github: GitHubClient,
    auth: Auth,
    page_size: u32,
    correlation_id: Option<String>,
}

impl InstallationApi {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Tag every request made through this handle with `correlation_id`.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    async fn token(&self) -> Result<String> {
        match &self.auth {
            Auth::Installation(id) => self.github.get_installation_token(*id).await,
            Auth::Token(token) => Ok(token.clone()),
        }
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let mut builder = builder
            .bearer_auth(self.token().await?)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(id) = &self.correlation_id {
            builder = builder.with_extension(CorrelationId(id.clone()));
        }
        Ok(builder)
    }

    async fn search_page(&self, query: &str, page: u32) -> Result<SearchResponse> {
        let url = format!("{}/search/issues", self.github.api_base);
        let builder = self.github.client.get(&url).query(&[
            ("q", query.to_string()),
            ("per_page", self.page_size.to_string()),
            ("page", page.to_string()),
        ]);
        let response = check(self.authorized(builder).await?, "issue search").await?;
        response
            .json()
            .await
            .context("Failed to parse search response")
    }
}

#[async_trait]
impl PlatformApi for InstallationApi {
    async fn add_labels(&self, issue_url: &str, labels: &[&str]) -> Result<()> {
        let builder = self
            .github
            .client
            .post(format!("{}/labels", issue_url))
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(&AddLabelsRequest { labels })?);
        check(self.authorized(builder).await?, "label addition").await?;
        Ok(())
    }

    async fn remove_label(&self, issue_url: &str, label: &str) -> Result<()> {
        let mut url = Url::parse(issue_url).context("Invalid issue URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Issue URL cannot take a path: {}", issue_url))?
            .push("labels")
            .push(label);
        let builder = self.github.client.delete(url);
        check(self.authorized(builder).await?, "label removal").await?;
        Ok(())
    }

    async fn post_comment(&self, comments_url: &str, body: &str) -> Result<()> {
        let builder = self
            .github
            .client
            .post(comments_url)
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(&CreateCommentRequest { body })?);
        check(self.authorized(builder).await?, "comment").await?;
        Ok(())
    }

    async fn request_review(&self, pull_request_url: &str, reviewer: &str) -> Result<()> {
        let builder = self
            .github
            .client
            .post(format!("{}/requested_reviewers", pull_request_url))
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(&ReviewRequest {
                reviewers: [reviewer],
            })?);
        check(self.authorized(builder).await?, "review request").await?;
        Ok(())
    }

    fn search_issues<'a>(&'a self, query: &SearchQuery) -> BoxStream<'a, Result<IssueRecord>> {
        let query = query.to_string();
        let page_size = u64::from(self.page_size);

        stream::try_unfold(Some(1u32), move |page| {
            let query = query.clone();
            async move {
                let Some(page) = page else {
                    return anyhow::Ok(None);
                };
                let response = self.search_page(&query, page).await?;
                let seen = u64::from(page) * page_size;
                let exhausted = (response.items.len() as u64) < page_size
                    || seen >= response.total_count.min(SEARCH_RESULT_CAP);
                let next = (!exhausted).then_some(page + 1);
                anyhow::Ok(Some((response.items, next)))
            }
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, anyhow::Error>)))
        .try_flatten()
        .boxed()
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let url = format!("{}/installation/repositories", self.github.api_base);
        let mut repositories = Vec::new();

        for page in 1u32.. {
            let builder = self
                .github
                .client
                .get(&url)
                .query(&[("per_page", self.page_size), ("page", page)]);
            let response = check(self.authorized(builder).await?, "repository listing").await?;
            let batch: InstallationRepositoriesResponse = response
                .json()
                .await
                .context("Failed to parse repository list")?;
            let done = batch.repositories.len() < self.page_size as usize;
            repositories.extend(batch.repositories);
            if done {
                break;
            }
        }

        Ok(repositories)
    }
}

/// Send a request and turn non-success statuses into errors carrying the body.
async fn check(builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
    let response = builder
        .send()
        .await
        .with_context(|| format!("Failed to send {}", what))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .context("Failed to read error response body")?;
        error!("GitHub API error during {}: {} - {}", what, status, error_text);
        return Err(anyhow!(
            "GitHub API error during {}: {} - {}",
            what,
            status,
            error_text
        ));
    }

    Ok(response)
}

pub fn create_github_client() -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(concat!("marvin-mk2/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    Ok(ClientBuilder::new(client).with(CorrelationMiddleware).build())
}
