use std::collections::BTreeMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::WikiConfig;

pub const NS_MAIN: i32 = 0;
pub const NS_CATEGORY: i32 = 14;

const PAGE_BATCH_SIZE: usize = 50;

/// Error payload returned by the MediaWiki API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("MediaWiki API error [{code}]: {info}")]
pub struct ApiError {
    pub code: String,
    pub info: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    EditConflict,
    MissingTitle,
    Protected,
    PermissionDenied,
    BadToken,
    Transient,
    Other,
}

impl ApiError {
    pub fn new(code: &str, info: &str) -> Self {
        Self {
            code: code.to_string(),
            info: info.to_string(),
        }
    }

    pub fn kind(&self) -> ApiErrorKind {
        match self.code.as_str() {
            "editconflict" => ApiErrorKind::EditConflict,
            "missingtitle" | "nocreate-missing" => ApiErrorKind::MissingTitle,
            "protectedpage" | "cascadeprotected" | "protectednamespace"
            | "protectednamespace-interface" | "protectedtitle" => ApiErrorKind::Protected,
            "permissiondenied" | "blocked" | "autoblocked" | "assertuserfailed"
            | "assertbotfailed" => ApiErrorKind::PermissionDenied,
            "badtoken" => ApiErrorKind::BadToken,
            "maxlag" | "ratelimited" | "readonly" => ApiErrorKind::Transient,
            _ => ApiErrorKind::Other,
        }
    }
}

/// Find a typed API error anywhere in an error chain.
pub fn api_error_kind(error: &anyhow::Error) -> Option<ApiErrorKind> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ApiError>())
        .map(ApiError::kind)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub title: String,
    pub namespace: i32,
    pub exists: bool,
    pub page_id: Option<i64>,
    pub revision_id: Option<i64>,
    pub timestamp: Option<String>,
    pub content: String,
}

impl RemotePage {
    pub fn missing(title: &str) -> Self {
        Self {
            title: title.to_string(),
            namespace: NS_MAIN,
            exists: false,
            page_id: None,
            revision_id: None,
            timestamp: None,
            content: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CategoryMember {
    pub title: String,
    #[serde(rename = "ns")]
    pub namespace: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub title: String,
    pub text: String,
    pub summary: String,
    pub base_timestamp: Option<String>,
    pub minor: bool,
    pub bot: bool,
    pub allow_create: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditResult {
    pub title: String,
    pub new_revision_id: Option<i64>,
    pub no_change: bool,
}

pub trait WikiReadApi {
    /// Members of a category. An empty namespace list means every namespace.
    fn category_members(&mut self, category: &str, namespaces: &[i32])
    -> Result<Vec<CategoryMember>>;
    fn template_references(&mut self, template: &str, namespaces: &[i32]) -> Result<Vec<String>>;
    fn links_to(&mut self, title: &str, namespaces: &[i32]) -> Result<Vec<String>>;
    /// Current text of each title, in request order. Missing pages come back
    /// with `exists == false`.
    fn get_pages(&mut self, titles: &[String]) -> Result<Vec<RemotePage>>;
    fn expand_template(&mut self, text: &str, title: &str) -> Result<String>;
    fn request_count(&self) -> usize;

    fn get_page(&mut self, title: &str) -> Result<RemotePage> {
        let pages = self.get_pages(&[title.to_string()])?;
        Ok(pages
            .into_iter()
            .next()
            .unwrap_or_else(|| RemotePage::missing(title)))
    }
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn edit_page(&mut self, request: &EditRequest) -> Result<EditResult>;
    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
    pub maxlag: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &WikiConfig) -> Self {
        Self {
            api_url: config.api_url_owned().unwrap_or_default(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
            maxlag: env_value_u64("WIKI_MAXLAG", 5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    api_url: Url,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn from_config(config: &WikiConfig) -> Result<Self> {
        Self::new(MediaWikiClientConfig::from_config(config))
    }

    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!(
                "WIKI_API_URL is not configured; set it in the environment or in [wiki] api_url"
            );
        }
        let api_url = Url::parse(config.api_url.trim())
            .with_context(|| format!("invalid WIKI_API_URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            api_url,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn request_json(
        &mut self,
        method: Method,
        params: &[(&str, String)],
        is_write: bool,
    ) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let mut pairs = Vec::with_capacity(params.len() + 3);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        if self.config.maxlag > 0 {
            pairs.push(("maxlag".to_string(), self.config.maxlag.to_string()));
        }
        for (key, value) in params {
            pairs.push(((*key).to_string(), value.clone()));
        }

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let request = match method {
                Method::Get => self.client.get(self.api_url.clone()).query(&pairs),
                Method::Post => self.client.post(self.api_url.clone()).form(&pairs),
            };
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            debug!("HTTP {status} from MediaWiki API, retrying");
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    if let Some(error) = parse_api_error(&payload) {
                        if attempt < max_retries && error.kind() == ApiErrorKind::Transient {
                            warn!("{error}; retrying");
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        return Err(error.into());
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        debug!("transport error from MediaWiki API, retrying: {error}");
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json(
            Method::Get,
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
            ],
            false,
        )?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    /// POST a write action with a csrf token, refreshing the token once if
    /// the server rejects it.
    fn post_with_token(&mut self, params: &[(&str, String)]) -> Result<Value> {
        for refreshed in [false, true] {
            let token = self.ensure_csrf_token()?;
            let mut with_token = params.to_vec();
            with_token.push(("token", token));
            match self.request_json(Method::Post, &with_token, true) {
                Err(error)
                    if !refreshed && api_error_kind(&error) == Some(ApiErrorKind::BadToken) =>
                {
                    debug!("csrf token rejected, fetching a new one");
                    self.csrf_token = None;
                }
                other => return other,
            }
        }
        bail!("MediaWiki API rejected the csrf token twice")
    }

    /// Run a `list=` query, following `continue` until exhausted.
    fn query_list(&mut self, list: &str, params: &[(&str, String)]) -> Result<Vec<CategoryMember>> {
        let mut items = Vec::new();
        let mut continuation: BTreeMap<String, String> = BTreeMap::new();

        loop {
            let mut request: Vec<(&str, String)> = vec![
                ("action", "query".to_string()),
                ("list", list.to_string()),
            ];
            request.extend(params.iter().cloned());
            for (key, value) in &continuation {
                request.push((key.as_str(), value.clone()));
            }

            let response = self.request_json(Method::Get, &request, false)?;
            let batch = response
                .get("query")
                .and_then(|query| query.get(list))
                .cloned()
                .unwrap_or(Value::Array(Vec::new()));
            let batch: Vec<CategoryMember> = serde_json::from_value(batch)
                .with_context(|| format!("failed to decode {list} API response"))?;
            items.extend(batch);

            continuation = continuation_params(&response);
            if continuation.is_empty() {
                break;
            }
        }

        Ok(items)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn category_members(
        &mut self,
        category: &str,
        namespaces: &[i32],
    ) -> Result<Vec<CategoryMember>> {
        let mut params = vec![
            ("cmtitle", prefixed_title("Category", category)),
            ("cmlimit", "max".to_string()),
        ];
        if !namespaces.is_empty() {
            params.push(("cmnamespace", join_namespaces(namespaces)));
        }
        self.query_list("categorymembers", &params)
    }

    fn template_references(&mut self, template: &str, namespaces: &[i32]) -> Result<Vec<String>> {
        let mut params = vec![
            ("eititle", prefixed_title("Template", template)),
            ("eilimit", "max".to_string()),
        ];
        if !namespaces.is_empty() {
            params.push(("einamespace", join_namespaces(namespaces)));
        }
        let items = self.query_list("embeddedin", &params)?;
        Ok(items.into_iter().map(|item| item.title).collect())
    }

    fn links_to(&mut self, title: &str, namespaces: &[i32]) -> Result<Vec<String>> {
        let mut params = vec![
            ("bltitle", title.trim().to_string()),
            ("bllimit", "max".to_string()),
        ];
        if !namespaces.is_empty() {
            params.push(("blnamespace", join_namespaces(namespaces)));
        }
        let items = self.query_list("backlinks", &params)?;
        Ok(items.into_iter().map(|item| item.title).collect())
    }

    fn get_pages(&mut self, titles: &[String]) -> Result<Vec<RemotePage>> {
        let mut results = Vec::with_capacity(titles.len());
        for batch in titles.chunks(PAGE_BATCH_SIZE) {
            let response = self.request_json(
                Method::Get,
                &[
                    ("action", "query".to_string()),
                    ("titles", batch.join("|")),
                    ("prop", "revisions".to_string()),
                    ("rvprop", "content|timestamp|ids".to_string()),
                    ("rvslots", "main".to_string()),
                ],
                false,
            )?;
            results.extend(pages_from_response(response, batch)?);
        }
        Ok(results)
    }

    fn expand_template(&mut self, text: &str, title: &str) -> Result<String> {
        let response = self.request_json(
            Method::Post,
            &[
                ("action", "expandtemplates".to_string()),
                ("text", text.to_string()),
                ("title", title.to_string()),
                ("prop", "wikitext".to_string()),
            ],
            false,
        )?;
        response
            .get("expandtemplates")
            .and_then(|expanded| expanded.get("wikitext"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing expandtemplates payload in API response"))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json(
            Method::Get,
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
            false,
        )?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json(
            Method::Post,
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn edit_page(&mut self, request: &EditRequest) -> Result<EditResult> {
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", request.title.clone()),
            ("text", request.text.clone()),
            ("summary", request.summary.clone()),
        ];
        if let Some(timestamp) = &request.base_timestamp {
            params.push(("basetimestamp", timestamp.clone()));
        }
        if request.minor {
            params.push(("minor", "1".to_string()));
        }
        if request.bot {
            params.push(("bot", "1".to_string()));
        }
        if !request.allow_create {
            params.push(("nocreate", "1".to_string()));
        }

        let response = self.post_with_token(&params)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                request.title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }

        Ok(EditResult {
            title: edit.title.unwrap_or_else(|| request.title.clone()),
            new_revision_id: edit.newrevid,
            no_change: edit.nochange.unwrap_or(false),
        })
    }

    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()> {
        self.post_with_token(&[
            ("action", "delete".to_string()),
            ("title", title.to_string()),
            ("reason", reason.to_string()),
        ])?;
        Ok(())
    }
}

const OFFLINE_MESSAGE: &str =
    "this run needs the wiki but WIKI_API_URL is not configured; set it in the environment or in [wiki] api_url";

/// Stand-in for runs that work from dumps only. Every call fails.
#[derive(Debug, Default)]
pub struct OfflineWiki;

impl WikiReadApi for OfflineWiki {
    fn category_members(
        &mut self,
        _category: &str,
        _namespaces: &[i32],
    ) -> Result<Vec<CategoryMember>> {
        bail!(OFFLINE_MESSAGE)
    }

    fn template_references(&mut self, _template: &str, _namespaces: &[i32]) -> Result<Vec<String>> {
        bail!(OFFLINE_MESSAGE)
    }

    fn links_to(&mut self, _title: &str, _namespaces: &[i32]) -> Result<Vec<String>> {
        bail!(OFFLINE_MESSAGE)
    }

    fn get_pages(&mut self, _titles: &[String]) -> Result<Vec<RemotePage>> {
        bail!(OFFLINE_MESSAGE)
    }

    fn expand_template(&mut self, _text: &str, _title: &str) -> Result<String> {
        bail!(OFFLINE_MESSAGE)
    }

    fn request_count(&self) -> usize {
        0
    }
}

impl WikiWriteApi for OfflineWiki {
    fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
        bail!(OFFLINE_MESSAGE)
    }

    fn edit_page(&mut self, _request: &EditRequest) -> Result<EditResult> {
        bail!(OFFLINE_MESSAGE)
    }

    fn delete_page(&mut self, _title: &str, _reason: &str) -> Result<()> {
        bail!(OFFLINE_MESSAGE)
    }
}

fn parse_api_error(payload: &Value) -> Option<ApiError> {
    let error = payload.get("error")?;
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    let info = error
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or("unknown info");
    Some(ApiError::new(code, info))
}

fn continuation_params(payload: &Value) -> BTreeMap<String, String> {
    let Some(Value::Object(map)) = payload.get("continue") else {
        return BTreeMap::new();
    };
    map.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Match a revisions query response back to the titles that were asked for.
fn pages_from_response(response: Value, requested: &[String]) -> Result<Vec<RemotePage>> {
    let parsed: QueryResponse =
        serde_json::from_value(response).context("failed to decode page content API response")?;

    let normalized = parsed
        .query
        .normalized
        .into_iter()
        .map(|item| (item.from, item.to))
        .collect::<BTreeMap<_, _>>();
    let mut by_title = BTreeMap::new();
    for page in parsed.query.pages {
        let revision = page.revisions.into_iter().next();
        let exists = !page.missing.unwrap_or(false)
            && !page.invalid.unwrap_or(false)
            && revision.is_some();
        let (revision_id, timestamp, content) = match revision {
            Some(revision) => (
                Some(revision.revid),
                Some(revision.timestamp),
                revision
                    .slots
                    .and_then(|slots| slots.main)
                    .map(|slot| slot.content)
                    .unwrap_or_default(),
            ),
            None => (None, None, String::new()),
        };
        by_title.insert(
            page.title.clone(),
            RemotePage {
                title: page.title,
                namespace: page.ns.unwrap_or(NS_MAIN),
                exists,
                page_id: page.pageid,
                revision_id,
                timestamp,
                content,
            },
        );
    }

    Ok(requested
        .iter()
        .map(|title| {
            let key = normalized.get(title).unwrap_or(title);
            by_title
                .get(key)
                .cloned()
                .unwrap_or_else(|| RemotePage::missing(title))
        })
        .collect())
}

fn prefixed_title(namespace: &str, title: &str) -> String {
    let title = title.trim();
    match title.split_once(':') {
        Some((prefix, _)) if prefix.trim().eq_ignore_ascii_case(namespace) => title.to_string(),
        _ => format!("{namespace}:{title}"),
    }
}

fn join_namespaces(namespaces: &[i32]) -> String {
    namespaces
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    normalized: Vec<NormalizedTitle>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct NormalizedTitle {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    pageid: Option<i64>,
    ns: Option<i32>,
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    title: Option<String>,
    newrevid: Option<i64>,
    nochange: Option<bool>,
}

/// In-memory wiki shared by the unit tests of the modules built on the API traits.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{BTreeMap, BTreeSet, VecDeque};

    use anyhow::Result;

    use super::{
        ApiError, CategoryMember, EditRequest, EditResult, RemotePage, WikiReadApi, WikiWriteApi,
    };

    #[derive(Debug, Default)]
    pub struct MockWiki {
        pub pages: BTreeMap<String, RemotePage>,
        pub categories: BTreeMap<String, Vec<CategoryMember>>,
        pub references: BTreeMap<String, Vec<String>>,
        pub backlinks: BTreeMap<String, Vec<String>>,
        pub expansions: BTreeMap<String, String>,
        /// Texts another editor saves right after we fetch the page.
        pub concurrent_edits: BTreeMap<String, VecDeque<String>>,
        /// Error codes returned by `delete_page` before it succeeds;
        /// `"transport"` stands for a network failure.
        pub delete_failures: BTreeMap<String, VecDeque<String>>,
        pub protected: BTreeSet<String>,
        pub edits: Vec<EditRequest>,
        pub deleted: Vec<String>,
        pub logged_in: bool,
        pub request_count: usize,
        revision: i64,
    }

    impl MockWiki {
        pub fn with_page(mut self, title: &str, text: &str) -> Self {
            self.store(title, text);
            self
        }

        pub fn text(&self, title: &str) -> Option<&str> {
            self.pages
                .get(title)
                .filter(|page| page.exists)
                .map(|page| page.content.as_str())
        }

        fn store(&mut self, title: &str, text: &str) -> i64 {
            self.revision += 1;
            self.pages.insert(
                title.to_string(),
                RemotePage {
                    title: title.to_string(),
                    namespace: 0,
                    exists: true,
                    page_id: Some(1),
                    revision_id: Some(self.revision),
                    timestamp: Some(format!("2026-01-01T00:00:{:02}Z", self.revision)),
                    content: text.to_string(),
                },
            );
            self.revision
        }
    }

    impl WikiReadApi for MockWiki {
        fn category_members(
            &mut self,
            category: &str,
            namespaces: &[i32],
        ) -> Result<Vec<CategoryMember>> {
            self.request_count += 1;
            let members = self.categories.get(category).cloned().unwrap_or_default();
            Ok(members
                .into_iter()
                .filter(|member| namespaces.is_empty() || namespaces.contains(&member.namespace))
                .collect())
        }

        fn template_references(
            &mut self,
            template: &str,
            _namespaces: &[i32],
        ) -> Result<Vec<String>> {
            self.request_count += 1;
            Ok(self.references.get(template).cloned().unwrap_or_default())
        }

        fn links_to(&mut self, title: &str, _namespaces: &[i32]) -> Result<Vec<String>> {
            self.request_count += 1;
            Ok(self.backlinks.get(title).cloned().unwrap_or_default())
        }

        fn get_pages(&mut self, titles: &[String]) -> Result<Vec<RemotePage>> {
            self.request_count += 1;
            let mut out = Vec::new();
            for title in titles {
                let page = self
                    .pages
                    .get(title)
                    .cloned()
                    .unwrap_or_else(|| RemotePage::missing(title));
                out.push(page);
                let concurrent = self
                    .concurrent_edits
                    .get_mut(title)
                    .and_then(VecDeque::pop_front);
                if let Some(text) = concurrent {
                    self.store(title, &text);
                }
            }
            Ok(out)
        }

        fn expand_template(&mut self, text: &str, _title: &str) -> Result<String> {
            self.request_count += 1;
            Ok(self
                .expansions
                .get(text)
                .cloned()
                .unwrap_or_else(|| text.to_string()))
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    impl WikiWriteApi for MockWiki {
        fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
            self.request_count += 1;
            self.logged_in = true;
            Ok(())
        }

        fn edit_page(&mut self, request: &EditRequest) -> Result<EditResult> {
            self.request_count += 1;
            if self.protected.contains(&request.title) {
                return Err(ApiError::new("protectedpage", "This page has been protected").into());
            }
            let current = self.pages.get(&request.title).cloned();
            let Some(current) = current.filter(|page| page.exists) else {
                if !request.allow_create {
                    return Err(ApiError::new("missingtitle", "The page doesn't exist").into());
                }
                let revision = self.store(&request.title, &request.text);
                self.edits.push(request.clone());
                return Ok(EditResult {
                    title: request.title.clone(),
                    new_revision_id: Some(revision),
                    no_change: false,
                });
            };
            if request.base_timestamp.is_some() && request.base_timestamp != current.timestamp {
                return Err(ApiError::new("editconflict", "Edit conflict").into());
            }
            if current.content == request.text {
                return Ok(EditResult {
                    title: request.title.clone(),
                    new_revision_id: None,
                    no_change: true,
                });
            }
            let revision = self.store(&request.title, &request.text);
            self.edits.push(request.clone());
            Ok(EditResult {
                title: request.title.clone(),
                new_revision_id: Some(revision),
                no_change: false,
            })
        }

        fn delete_page(&mut self, title: &str, _reason: &str) -> Result<()> {
            self.request_count += 1;
            let failure = self
                .delete_failures
                .get_mut(title)
                .and_then(VecDeque::pop_front);
            if let Some(code) = failure {
                if code == "transport" {
                    anyhow::bail!("failed to call MediaWiki API: connection reset");
                }
                return Err(ApiError::new(&code, "simulated failure").into());
            }
            if self.protected.contains(title) {
                return Err(ApiError::new("protectedpage", "This page has been protected").into());
            }
            match self.pages.get_mut(title).filter(|page| page.exists) {
                Some(page) => {
                    page.exists = false;
                    self.deleted.push(title.to_string());
                    Ok(())
                }
                None => Err(ApiError::new("missingtitle", "The page doesn't exist").into()),
            }
        }
    }
}
