//! Authenticated, paginated reads against the ServiceNow Table API.
//!
//! Each `fetch_*` call walks `sysparm_offset` in `sysparm_limit` steps until
//! the offset passes `X-Total-Count` and returns the complete collection.
//! Pages may come back short, or empty, when ACLs hide rows. Without the
//! header a short page ends the walk. Transport and auth failures surface
//! as errors, never as empty collections.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use url::Url;

use kbmirror_shared::{
    Article, Catalog, Category, Credentials, ExportConfig, Fetched, KbMirrorError, KnowledgeBase,
    RejectedRecord, Result,
};

use crate::records::{RawArticle, RawCategory, RawKnowledgeBase, RawUser, TableRecord};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("kbmirror/", env!("CARGO_PKG_VERSION"));

/// Header carrying the size of the whole query result.
const TOTAL_COUNT_HEADER: &str = "X-Total-Count";

/// Envelope of every Table API response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

// ---------------------------------------------------------------------------
// ServiceNowClient
// ---------------------------------------------------------------------------

/// Read-only client for the knowledge-base tables of one instance.
pub struct ServiceNowClient {
    client: Client,
    base_url: Url,
    credentials: Credentials,
    page_size: u32,
    article_query: Option<String>,
}

impl ServiceNowClient {
    /// Create a client for the instance named in `config`.
    pub fn new(config: &ExportConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KbMirrorError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.instance_url.clone(),
            credentials: config.credentials.clone(),
            page_size: config.page_size,
            article_query: config.article_query.clone(),
        })
    }

    /// Fetch all three collections, in order. Any connectivity error aborts.
    #[instrument(skip_all, fields(instance = %self.base_url))]
    pub async fn fetch_catalog(&self) -> Result<Catalog> {
        let knowledge_bases = self.fetch_knowledge_bases().await?;
        let categories = self.fetch_categories().await?;
        let articles = self.fetch_articles().await?;

        let catalog = Catalog::from_fetched(knowledge_bases, categories, articles);
        info!(
            knowledge_bases = catalog.knowledge_bases.len(),
            categories = catalog.categories.len(),
            articles = catalog.articles.len(),
            rejected = catalog.rejected.len(),
            "catalog fetched"
        );
        Ok(catalog)
    }

    /// Every row of `kb_knowledge_base`.
    pub async fn fetch_knowledge_bases(&self) -> Result<Fetched<KnowledgeBase>> {
        self.fetch_table::<RawKnowledgeBase>(None).await
    }

    /// Every row of `kb_category`.
    pub async fn fetch_categories(&self) -> Result<Fetched<Category>> {
        self.fetch_table::<RawCategory>(None).await
    }

    /// Every row of `kb_knowledge` matching the configured query, with
    /// author display names resolved.
    pub async fn fetch_articles(&self) -> Result<Fetched<Article>> {
        let mut fetched = self
            .fetch_table::<RawArticle>(self.article_query.as_deref())
            .await?;
        self.resolve_authors(&mut fetched.records).await?;
        Ok(fetched)
    }

    /// Look up one `sys_user` display name.
    ///
    /// An HTTP error status (missing user, no read access) yields `None`;
    /// transport failures are returned as errors.
    pub async fn fetch_user_name(&self, sys_id: &str) -> Result<Option<String>> {
        let url = self.table_url(&format!("sys_user/{sys_id}"))?;
        let query = [
            ("sysparm_fields", RawUser::FIELDS.to_string()),
            ("sysparm_exclude_reference_link", "true".to_string()),
        ];

        match self.get_json::<Envelope<RawUser>>(url, &query).await {
            Ok(envelope) => Ok(envelope.result.display_name()),
            Err(e @ (KbMirrorError::Auth { .. } | KbMirrorError::Api { .. })) => {
                warn!(user = sys_id, error = %e, "author lookup failed, leaving name empty");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Page through one table, validating each row.
    #[instrument(skip_all, fields(table = R::TABLE.name()))]
    async fn fetch_table<R: TableRecord>(&self, filter: Option<&str>) -> Result<Fetched<R::Record>> {
        let url = self.table_url(R::TABLE.name())?;

        // A stable sort order keeps offsets meaningful between pages.
        let sysparm_query = match filter {
            Some(q) => format!("{q}^ORDERBYsys_id"),
            None => "ORDERBYsys_id".to_string(),
        };

        let mut fetched = Fetched::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut offset: u64 = 0;

        loop {
            let query = [
                ("sysparm_query", sysparm_query.clone()),
                ("sysparm_fields", R::FIELDS.to_string()),
                ("sysparm_exclude_reference_link", "true".to_string()),
                ("sysparm_limit", self.page_size.to_string()),
                ("sysparm_offset", offset.to_string()),
            ];

            let response = self.send(url.clone(), &query).await?;
            let total = total_count(&response);
            let page: Envelope<Vec<serde_json::Value>> = decode(&url, response).await?;
            let rows = page.result.len();
            debug!(offset, rows, total, "fetched page");

            for row in page.result {
                match serde_json::from_value::<R>(row) {
                    Ok(raw) => {
                        let sys_id = raw.sys_id().map(str::to_string);
                        let duplicate = sys_id.as_ref().is_some_and(|id| !seen.insert(id.clone()));
                        if duplicate {
                            fetched.rejected.push(reject(R::TABLE, sys_id, "duplicate sys_id"));
                            continue;
                        }
                        match raw.validate() {
                            Ok(record) => fetched.records.push(record),
                            Err(reason) => fetched.rejected.push(reject(R::TABLE, sys_id, reason)),
                        }
                    }
                    Err(e) => {
                        fetched
                            .rejected
                            .push(reject(R::TABLE, None, format!("undecodable row: {e}")));
                    }
                }
            }

            offset += u64::from(self.page_size);
            let done = match total {
                Some(total) => offset >= total,
                None => rows < self.page_size as usize,
            };
            if done {
                break;
            }
        }

        for rejected in &fetched.rejected {
            warn!(
                sys_id = rejected.sys_id.as_deref().unwrap_or("?"),
                reason = %rejected.reason,
                "rejected record"
            );
        }
        info!(
            records = fetched.records.len(),
            rejected = fetched.rejected.len(),
            "table fetched"
        );

        Ok(fetched)
    }

    /// Fill in author display names, one lookup per distinct author.
    async fn resolve_authors(&self, articles: &mut [Article]) -> Result<()> {
        let ids: BTreeSet<String> = articles
            .iter()
            .filter_map(|a| a.author.as_ref().map(|au| au.sys_id.clone()))
            .collect();

        if ids.is_empty() {
            return Ok(());
        }
        debug!(authors = ids.len(), "resolving author names");

        let mut names: HashMap<String, String> = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(name) = self.fetch_user_name(&id).await? {
                names.insert(id, name);
            }
        }

        for author in articles.iter_mut().filter_map(|a| a.author.as_mut()) {
            if let Some(name) = names.get(&author.sys_id) {
                author.name = name.clone();
            }
        }
        Ok(())
    }

    fn table_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(&format!("api/now/table/{path}"))
            .map_err(|e| KbMirrorError::config(format!("invalid table path '{path}': {e}")))
    }

    /// GET a URL with basic auth and decode its JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
        let response = self.send(url.clone(), query).await?;
        decode(&url, response).await
    }

    /// GET a URL with basic auth, mapping error statuses to errors.
    async fn send(&self, url: Url, query: &[(&str, String)]) -> Result<Response> {
        let response = self
            .client
            .get(url.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KbMirrorError::Network(format!("{url}: request timed out"))
                } else {
                    KbMirrorError::Network(format!("could not reach {url}: {e}"))
                }
            })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                return Err(KbMirrorError::Auth {
                    status: status.as_u16(),
                    message: "check the username and password".into(),
                });
            }
            StatusCode::FORBIDDEN => {
                return Err(KbMirrorError::Auth {
                    status: status.as_u16(),
                    message: format!("access to {} is forbidden for this user", url.path()),
                });
            }
            s if !s.is_success() => {
                return Err(KbMirrorError::Api {
                    status: s.as_u16(),
                    url: url.to_string(),
                });
            }
            _ => {}
        }

        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T> {
    let body = response
        .bytes()
        .await
        .map_err(|e| KbMirrorError::Network(format!("{url}: body read failed: {e}")))?;

    serde_json::from_slice(&body)
        .map_err(|e| KbMirrorError::parse(format!("invalid JSON from {url}: {e}")))
}

fn total_count(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(TOTAL_COUNT_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn reject(
    table: kbmirror_shared::Table,
    sys_id: Option<String>,
    reason: impl Into<String>,
) -> RejectedRecord {
    RejectedRecord {
        table,
        sys_id,
        reason: reason.into(),
    }
}
