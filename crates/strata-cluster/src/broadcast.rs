//! Intra-cluster HTTP client
//!
//! One shared `reqwest` client per node; broadcasts run concurrently and
//! return per-node results so callers decide whether a single failure aborts
//! the operation (txn begin) or is merely logged (metasync fan-out).

use crate::snode::Snode;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use strata_common::msg::headers;
use strata_common::{Error, NodeId, Result};
use tracing::debug;

/// Outcome of one broadcast leg
#[derive(Debug)]
pub struct BcastResult {
    pub node: NodeId,
    pub err: Option<Error>,
}

/// HTTP client for proxy↔target control and data traffic
pub struct IntraClient {
    http: reqwest::Client,
    self_node: Snode,
}

impl IntraClient {
    #[must_use]
    pub fn new(self_node: Snode) -> Self {
        Self {
            http: reqwest::Client::new(),
            self_node,
        }
    }

    #[must_use]
    pub fn self_node(&self) -> &Snode {
        &self.self_node
    }

    fn decorate(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header(headers::NODE_ID, self.self_node.id.as_str());
        if self.self_node.is_proxy() {
            req.header(headers::PROXY_ID, self.self_node.id.as_str())
        } else {
            req
        }
    }

    fn transport_err(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::ConnectionFailed(e.to_string())
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let msg = resp.text().await.unwrap_or_default();
        Err(Error::internal(format!("{}: {}", status.as_u16(), msg)))
    }

    /// POST a JSON body to one node
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &T,
        timeout: Duration,
    ) -> Result<()> {
        let resp = self
            .decorate(self.http.post(url))
            .query(query)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(Self::transport_err)?;
        Self::check(resp).await.map(|_| ())
    }

    /// POST a JSON body and parse a JSON reply
    pub async fn post_json_rx<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<R> {
        let resp = self
            .decorate(self.http.post(url))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(Self::transport_err)?;
        let resp = Self::check(resp).await?;
        resp.json().await.map_err(|e| Error::internal(e.to_string()))
    }

    /// GET with a JSON body and a JSON reply (the listing protocol carries
    /// its cursor messages this way)
    pub async fn get_json_rx<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<R> {
        let resp = self
            .decorate(self.http.get(url))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(Self::transport_err)?;
        let resp = Self::check(resp).await?;
        resp.json().await.map_err(|e| Error::internal(e.to_string()))
    }

    /// GET raw bytes; the caller interprets the status (a 404 may simply mean
    /// "not stored here")
    pub async fn get_bytes(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(u16, bytes::Bytes)> {
        let resp = self
            .decorate(self.http.get(url))
            .timeout(timeout)
            .send()
            .await
            .map_err(Self::transport_err)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(Self::transport_err)?;
        Ok((status, body))
    }

    /// PUT raw bytes with extra headers
    pub async fn put_bytes(
        &self,
        url: &str,
        body: bytes::Bytes,
        extra_headers: &[(&str, String)],
        timeout: Duration,
    ) -> Result<()> {
        let mut req = self.decorate(self.http.put(url)).timeout(timeout);
        for (name, value) in extra_headers {
            req = req.header(*name, value);
        }
        let resp = req.body(body).send().await.map_err(Self::transport_err)?;
        Self::check(resp).await.map(|_| ())
    }

    /// DELETE to one node
    pub async fn delete(&self, url: &str, timeout: Duration) -> Result<()> {
        let resp = self
            .decorate(self.http.delete(url))
            .timeout(timeout)
            .send()
            .await
            .map_err(Self::transport_err)?;
        Self::check(resp).await.map(|_| ())
    }

    /// DELETE with a JSON body (token revocation)
    pub async fn delete_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<()> {
        let resp = self
            .decorate(self.http.delete(url))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(Self::transport_err)?;
        Self::check(resp).await.map(|_| ())
    }

    /// Concurrently POST `body` to `path` on every node; one result per node
    pub async fn bcast_post<T: Serialize + Sync + ?Sized>(
        &self,
        nodes: &[Snode],
        path: &str,
        query: &[(&str, String)],
        body: &T,
        timeout: Duration,
    ) -> Vec<BcastResult> {
        debug!(n = nodes.len(), path, "broadcast");
        let futs = nodes.iter().map(|node| {
            let url = node.control_url(path);
            async move {
                let err = self.post_json(&url, query, body, timeout).await.err();
                BcastResult {
                    node: node.id.clone(),
                    err,
                }
            }
        });
        join_all(futs).await
    }
}

/// First failed leg of a broadcast, if any
#[must_use]
pub fn first_err(results: Vec<BcastResult>) -> Option<(NodeId, Error)> {
    results
        .into_iter()
        .find_map(|r| r.err.map(|e| (r.node, e)))
}
