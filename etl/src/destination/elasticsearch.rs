use etl_config::shared::{ElasticsearchConfig, IndexConfig, LoadConfig};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::{Mutation, MutationAction};

const NDJSON: &str = "application/x-ndjson";

/// Maximum number of item failures copied into a bulk error.
const MAX_REPORTED_ITEM_ERRORS: usize = 3;

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

/// Elasticsearch destination talking to the cluster's REST API.
#[derive(Debug, Clone)]
pub struct ElasticsearchDestination {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<SecretString>,
}

impl ElasticsearchDestination {
    /// Builds the HTTP client and checks that the cluster answers.
    pub async fn connect(config: &ElasticsearchConfig) -> EtlResult<Self> {
        let destination = Self::new(config)?;

        let response = destination
            .request(destination.client.get(destination.url("")))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(
                ErrorKind::DestinationConnectionFailed,
                "Elasticsearch cluster is not reachable",
                format!("GET / returned {}", response.status())
            );
        }

        info!(url = %destination.base_url, "connected to elasticsearch");

        Ok(destination)
    }

    /// Builds the destination without contacting the cluster.
    pub fn new(config: &ElasticsearchConfig) -> EtlResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| {
                etl_error!(
                    ErrorKind::ConfigError,
                    "Elasticsearch HTTP client could not be built",
                    err
                )
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => builder.basic_auth(
                username,
                self.password
                    .as_ref()
                    .map(|password| password.expose_secret().to_string()),
            ),
            None => builder,
        }
    }
}

/// Renders mutations as the newline-delimited body of a `_bulk` request.
///
/// Creates become `index` actions so a replayed document overwrites the previous version,
/// updates become partial `update` actions and the parent id is used as routing key.
pub fn encode_bulk_body(load: &LoadConfig, mutations: &[Mutation]) -> EtlResult<String> {
    let mut body = String::new();

    for mutation in mutations {
        let mut meta = Map::new();
        meta.insert("_index".to_string(), Value::String(load.index.clone()));
        meta.insert("_id".to_string(), Value::String(mutation.id.clone()));
        if let Some(doc_type) = &load.doc_type {
            meta.insert("_type".to_string(), Value::String(doc_type.clone()));
        }
        if let Some(parent) = &mutation.parent {
            meta.insert("routing".to_string(), Value::String(parent.clone()));
        }

        let (op, source) = match mutation.action {
            MutationAction::Create => ("index", Some(mutation.data.clone())),
            MutationAction::Update => ("update", Some(json!({ "doc": mutation.data }))),
            MutationAction::Delete => ("delete", None),
        };

        let mut action = Map::new();
        action.insert(op.to_string(), Value::Object(meta));

        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        if let Some(source) = source {
            body.push_str(&serde_json::to_string(&source)?);
            body.push('\n');
        }
    }

    Ok(body)
}

/// Collects the first item failures of a bulk response.
fn item_errors(items: &[Map<String, Value>]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.values().next())
        .filter_map(|result| {
            let error = result.get("error")?;
            let id = result.get("_id").and_then(Value::as_str).unwrap_or("?");
            let reason = error
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            Some(format!("{id}: {reason}"))
        })
        .take(MAX_REPORTED_ITEM_ERRORS)
        .collect()
}

async fn ensure_success(
    response: Response,
    kind: ErrorKind,
    description: &'static str,
) -> EtlResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unavailable>".to_string());
    bail!(kind, description, format!("status {status}, body `{body}`"));
}

impl Destination for ElasticsearchDestination {
    fn name() -> &'static str {
        "elasticsearch"
    }

    async fn index_exists(&self, index: &str) -> EtlResult<bool> {
        let response = self
            .request(self.client.head(self.url(index)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => bail!(
                ErrorKind::DestinationIndexSetupFailed,
                "Index lookup failed",
                format!("HEAD /{index} returned {status}")
            ),
        }
    }

    async fn create_index(&self, index: &IndexConfig) -> EtlResult<()> {
        let body = index.body.clone().unwrap_or_else(|| json!({}));
        let response = self
            .request(self.client.put(self.url(&index.index)))
            .json(&body)
            .send()
            .await?;
        ensure_success(
            response,
            ErrorKind::DestinationIndexSetupFailed,
            "Index creation failed",
        )
        .await?;

        info!(index = %index.index, "created index");

        Ok(())
    }

    async fn put_mapping(&self, load: &LoadConfig) -> EtlResult<()> {
        let path = match &load.doc_type {
            Some(doc_type) => format!("{}/_mapping/{doc_type}", load.index),
            None => format!("{}/_mapping", load.index),
        };

        let response = self
            .request(self.client.put(self.url(&path)))
            .json(&load.body)
            .send()
            .await?;
        ensure_success(
            response,
            ErrorKind::DestinationIndexSetupFailed,
            "Mapping update failed",
        )
        .await?;

        info!(index = %load.index, doc_type = ?load.doc_type, "put mapping");

        Ok(())
    }

    async fn bulk(&self, load: &LoadConfig, mutations: Vec<Mutation>) -> EtlResult<()> {
        if mutations.is_empty() {
            return Ok(());
        }

        let body = encode_bulk_body(load, &mutations)?;
        debug!(
            index = %load.index,
            count = mutations.len(),
            bytes = body.len(),
            "sending bulk request"
        );

        let response = self
            .request(self.client.post(self.url("_bulk")))
            .header(CONTENT_TYPE, NDJSON)
            .body(body)
            .send()
            .await?;
        let response = ensure_success(
            response,
            ErrorKind::DestinationBulkFailed,
            "Bulk request failed",
        )
        .await?;

        let response: BulkResponse = response.json().await?;
        if response.errors {
            let errors = item_errors(&response.items);
            bail!(
                ErrorKind::DestinationBulkFailed,
                "Bulk request rejected some mutations",
                errors.join("; ")
            );
        }

        Ok(())
    }
}
