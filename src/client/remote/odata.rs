/**
 * OData HTTP Transport
 *
 * Implements `RemoteServiceClient` on top of reqwest for services speaking
 * the OData v2 JSON dialect:
 *
 * - reads:   GET  {service}/{EntitySet}?$format=json[&$filter=..]
 * - counts:  GET  {service}/{EntitySet}/$count[?$filter=..]
 * - creates: POST {service}/{EntitySet}
 * - keyed:   GET  {service}/{EntitySet}(key='v',...)?$format=json
 *
 * Response envelopes `{d:{results:[..]}}`, `{d:[..]}`, `{results:[..]}`,
 * `{value:[..]}` and bare arrays are all accepted.
 */

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;

use super::{key_predicate, with_deadline, Query, RemoteError, RemoteServiceClient, RequestContext};
use crate::shared::config::CollectionConfig;
use crate::shared::record::Record;

/// HTTP transport for OData services
#[derive(Debug, Clone)]
pub struct ODataClient {
    client: Client,
    base_url: String,
}

impl ODataClient {
    /// Create a client rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client reusing an existing reqwest client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn entity_set_url(&self, target: &CollectionConfig) -> Result<Url, RemoteError> {
        Url::parse(&target.entity_set_url(&self.base_url))
            .map_err(|e| RemoteError::Network(format!("invalid URL: {}", e)))
    }

    fn count_url(&self, target: &CollectionConfig) -> Result<Url, RemoteError> {
        let mut url = self.entity_set_url(target)?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Network("URL cannot be a base".to_string()))?
            .push("$count");
        Ok(url)
    }

    fn entity_url(
        &self,
        target: &CollectionConfig,
        keys: &[(String, String)],
    ) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&target.service_url(&self.base_url))
            .map_err(|e| RemoteError::Network(format!("invalid URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Network("URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&format!("{}({})", target.entity_set, key_predicate(keys)));
        Ok(url)
    }

    fn prepare(&self, request: RequestBuilder, ctx: &RequestContext) -> RequestBuilder {
        let request = request
            .timeout(ctx.deadline)
            .header(ACCEPT, "application/json");
        match &ctx.basic_auth {
            Some(auth) => request.basic_auth(&auth.username, Some(&auth.password)),
            None => request,
        }
    }

    async fn send(request: RequestBuilder, ctx: &RequestContext) -> Result<Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(e, ctx))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("[Remote] HTTP {} - {}", status, body);
            return Err(RemoteError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn json_body(response: Response, ctx: &RequestContext) -> Result<Value, RemoteError> {
        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(ctx.deadline)
            } else {
                RemoteError::Decode(e.to_string())
            }
        })
    }
}

fn map_transport_error(err: reqwest::Error, ctx: &RequestContext) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(ctx.deadline)
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

/// Extract the record array from a collection response
pub fn parse_collection(body: &Value) -> Result<Vec<Record>, RemoteError> {
    let rows = body
        .pointer("/d/results")
        .or_else(|| body.get("d").filter(|d| d.is_array()))
        .or_else(|| body.get("results"))
        .or_else(|| body.get("value"))
        .or_else(|| Some(body).filter(|b| b.is_array()))
        .and_then(Value::as_array)
        .ok_or_else(|| RemoteError::Decode("response carries no result array".to_string()))?;

    rows.iter()
        .map(|row| Record::from_json(row).map_err(|e| RemoteError::Decode(e.to_string())))
        .collect()
}

/// Extract a single entity from a response
pub fn parse_entity(body: &Value) -> Result<Record, RemoteError> {
    let entity = body
        .get("d")
        .filter(|d| d.is_object())
        .map(|d| d.get("results").filter(|r| r.is_object()).unwrap_or(d))
        .unwrap_or(body);
    Record::from_json(entity).map_err(|e| RemoteError::Decode(e.to_string()))
}

#[async_trait]
impl RemoteServiceClient for ODataClient {
    async fn fetch(
        &self,
        target: &CollectionConfig,
        query: &Query,
        ctx: &RequestContext,
    ) -> Result<Vec<Record>, RemoteError> {
        let url = self.entity_set_url(target)?;
        let request = self.prepare(self.client.get(url).query(&query.to_params()), ctx);

        with_deadline(ctx.deadline, async {
            let response = Self::send(request, ctx).await?;
            let body = Self::json_body(response, ctx).await?;
            parse_collection(&body)
        })
        .await
    }

    async fn count(
        &self,
        target: &CollectionConfig,
        query: &Query,
        ctx: &RequestContext,
    ) -> Result<u64, RemoteError> {
        let url = self.count_url(target)?;
        let mut request = self.client.get(url);
        if let Some(filter) = query.odata_filter() {
            request = request.query(&[("$filter", filter)]);
        }
        let request = self.prepare(request, ctx);

        with_deadline(ctx.deadline, async {
            let response = Self::send(request, ctx).await?;
            let text = response
                .text()
                .await
                .map_err(|e| map_transport_error(e, ctx))?;
            text.trim()
                .parse::<u64>()
                .map_err(|_| RemoteError::Decode(format!("invalid count: {}", text.trim())))
        })
        .await
    }

    async fn create(
        &self,
        target: &CollectionConfig,
        record: &Record,
        ctx: &RequestContext,
    ) -> Result<Record, RemoteError> {
        let url = self.entity_set_url(target)?;
        let request = self.prepare(
            self.client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .json(&record.to_json()),
            ctx,
        );

        with_deadline(ctx.deadline, async {
            let response = Self::send(request, ctx).await?;
            if response.status() == StatusCode::NO_CONTENT {
                return Ok(Record::new());
            }
            let body = Self::json_body(response, ctx).await?;
            parse_entity(&body)
        })
        .await
    }

    async fn read_entity(
        &self,
        target: &CollectionConfig,
        keys: &[(String, String)],
        ctx: &RequestContext,
    ) -> Result<Option<Record>, RemoteError> {
        let url = self.entity_url(target, keys)?;
        let request = self.prepare(self.client.get(url).query(&[("$format", "json")]), ctx);

        with_deadline(ctx.deadline, async {
            match Self::send(request, ctx).await {
                Ok(response) => {
                    let body = Self::json_body(response, ctx).await?;
                    parse_entity(&body).map(Some)
                }
                Err(RemoteError::Server { status: 404, .. }) => Ok(None),
                Err(err) => Err(err),
            }
        })
        .await
    }

    fn name(&self) -> &'static str {
        "odata"
    }
}
