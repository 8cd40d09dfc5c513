//! Proxy HTTP handlers
//!
//! The control plane lives here: bucket actions (dispatched into the txn
//! protocol), the listing front-end over target query handles, cluster
//! membership, notifications, token revocation, and the metasync receiver.
//! Object data requests are redirected to the owning target.

use crate::state::ProxyState;
use crate::txn;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{any, delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_cluster::metasync::{self, MetasyncBody};
use strata_cluster::{NotifMsg, Snode, TokenList};
use strata_common::{
    Action, ActionMsg, Bck, BucketName, BucketPropsToUpdate, Error, NodeId, Provider,
};
use strata_xaction::{BucketEntry, ObjectsQuery};
use tracing::{info, warn};

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/buckets/{bucket}", post(bucket_action).get(list_bucket))
        .route("/v1/tokens", delete(revoke_tokens))
        .route("/v1/notifs", post(notif_finished))
        .route("/v1/metasync", post(metasync_recv))
        .route("/v1/cluster/join", post(cluster_join))
        .route("/v1/cluster/leave/{id}", delete(cluster_leave))
        .route("/v1/smap", get(get_smap))
        .route("/v1/bmd", get(get_bmd))
        .route("/v1/objects/{bucket}/{*obj}", any(redirect_object))
        .route("/s3/{bucket}/{*obj}", any(redirect_s3))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn parse_bck(name: &str) -> Result<Bck, Error> {
    Ok(Bck::strata(BucketName::new(name)?))
}

/// Non-primary proxies forward control-plane writes to the primary
async fn forward_to_primary<T: Serialize>(
    state: &ProxyState,
    path: &str,
    body: &T,
) -> ApiResult<StatusCode> {
    let url = state.primary_url(path)?;
    info!(url, "forwarding to primary");
    state
        .client
        .post_json(&url, &[], body, state.config.timeout.long_timeout)
        .await?;
    Ok(StatusCode::OK)
}

//
// bucket control plane
//

async fn bucket_action(
    State(state): State<Arc<ProxyState>>,
    Path(bucket): Path<String>,
    Json(msg): Json<ActionMsg>,
) -> ApiResult<StatusCode> {
    if !state.is_primary() {
        return forward_to_primary(&state, &format!("v1/buckets/{bucket}"), &msg).await;
    }
    let bck = parse_bck(&bucket)?;

    match msg.action {
        Action::CreateBucket => {
            let props = match msg.value {
                Some(v) => Some(serde_json::from_value(v).map_err(Error::from)?),
                None => None,
            };
            txn::create_bucket(&state, &bck, props).await?;
        }
        Action::DestroyBucket => {
            txn::destroy_bucket(&state, &bck, Action::DestroyBucket).await?;
        }
        Action::EvictBucket => {
            // eviction drops local caches of a cloud bucket, remote backing stays
            let bck = Bck::new(Provider::Cloud, bck.name);
            txn::destroy_bucket(&state, &bck, Action::EvictBucket).await?;
        }
        Action::MakeNCopies => {
            let copies = msg
                .value
                .as_ref()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| Error::invalid_argument("copies value missing"))?;
            txn::make_n_copies(&state, &bck, copies).await?;
        }
        Action::SetBucketProps => {
            let update: BucketPropsToUpdate = match msg.value {
                Some(v) => serde_json::from_value(v).map_err(Error::from)?,
                None => BucketPropsToUpdate::default(),
            };
            txn::set_bucket_props(&state, &bck, Action::SetBucketProps, update).await?;
        }
        Action::ResetBucketProps => {
            txn::set_bucket_props(
                &state,
                &bck,
                Action::ResetBucketProps,
                BucketPropsToUpdate::default(),
            )
            .await?;
        }
        Action::RenameBucket => {
            let to = parse_dest_bck(&msg)?;
            txn::rename_bucket(&state, &bck, &to).await?;
        }
        Action::CopyBucket => {
            let to = parse_dest_bck(&msg)?;
            txn::copy_bucket(&state, &bck, &to).await?;
        }
        Action::EcEncode => {
            let v = msg
                .value
                .as_ref()
                .ok_or_else(|| Error::invalid_argument("ec config missing"))?;
            let data = v.get("data_slices").and_then(|x| x.as_u64()).unwrap_or(0) as usize;
            let parity = v.get("parity_slices").and_then(|x| x.as_u64()).unwrap_or(0) as usize;
            txn::ec_encode(&state, &bck, data, parity).await?;
        }
        action => {
            return Err(
                Error::invalid_argument(format!("unsupported bucket action {action}")).into(),
            )
        }
    }
    Ok(StatusCode::OK)
}

fn parse_dest_bck(msg: &ActionMsg) -> Result<Bck, Error> {
    let v = msg
        .value
        .as_ref()
        .ok_or_else(|| Error::invalid_argument("destination bucket missing"))?;
    serde_json::from_value(v.clone()).map_err(Error::from)
}

//
// listing front-end: init target handles, peek everywhere, merge one page,
// discard exactly what was returned
//

#[derive(Debug, Deserialize)]
struct ListParams {
    handle: Option<String>,
    count: Option<usize>,
    prefix: Option<String>,
}

#[derive(Debug, Serialize)]
struct BucketListPage {
    handle: String,
    entries: Vec<BucketEntry>,
}

#[derive(Debug, Serialize)]
struct InitMsg<'a> {
    handle: &'a str,
    query: ObjectsQuery,
}

#[derive(Debug, Serialize)]
struct NextMsg<'a> {
    handle: &'a str,
    size: usize,
}

#[derive(Debug, Deserialize)]
struct BucketList {
    entries: Vec<BucketEntry>,
}

async fn list_bucket(
    State(state): State<Arc<ProxyState>>,
    Path(bucket): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<BucketListPage>> {
    let bck = parse_bck(&bucket)?;
    {
        let bmd = state.bmd.get();
        let props = bmd
            .get(&bck)
            .ok_or_else(|| Error::BucketDoesNotExist(bck.clone()))?;
        if props.renamed.is_some() {
            return Err(Error::BucketDoesNotExist(bck).into());
        }
    }

    let count = params.count.unwrap_or(1000).clamp(1, 10_000);
    let smap = state.smap.get();
    if smap.count_targets() == 0 {
        return Err(Error::NoTargets.into());
    }
    let timeout = state.config.timeout.long_timeout;

    // fresh listings get a handle and a result set on every target
    let handle = match params.handle {
        Some(h) => h,
        None => {
            let handle = uuid::Uuid::new_v4().to_string();
            let init = InitMsg {
                handle: &handle,
                query: ObjectsQuery {
                    bck: bck.clone(),
                    prefix: params.prefix.clone(),
                },
            };
            for tgt in smap.tmap.values() {
                state
                    .client
                    .post_json(&tgt.control_url("v1/query/init"), &[], &init, timeout)
                    .await?;
            }
            handle
        }
    };

    // peek one page from every target and merge-sort
    let mut merged: Vec<BucketEntry> = Vec::new();
    for tgt in smap.tmap.values() {
        let page: BucketList = state
            .client
            .get_json_rx(
                &tgt.control_url("v1/query/peek"),
                &NextMsg {
                    handle: &handle,
                    size: count,
                },
                timeout,
            )
            .await?;
        merged.extend(page.entries);
    }
    merged.sort_by(|a, b| a.name.cmp(&b.name));
    merged.truncate(count);

    // advance every target's cursor past what this page returned
    if let Some(last) = merged.last() {
        for tgt in smap.tmap.values() {
            let url = tgt.control_url(&format!("v1/query/discard/{handle}/{}", last.name));
            if let Err(e) = state.client.put_bytes(&url, bytes_empty(), &[], timeout).await {
                warn!(node = %tgt.id, %e, "discard failed");
            }
        }
    }

    Ok(Json(BucketListPage {
        handle,
        entries: merged,
    }))
}

fn bytes_empty() -> bytes::Bytes {
    bytes::Bytes::new()
}

//
// tokens, notifications, metasync
//

async fn revoke_tokens(
    State(state): State<Arc<ProxyState>>,
    Json(list): Json<TokenList>,
) -> ApiResult<StatusCode> {
    if !state.is_primary() {
        let url = state.primary_url("v1/tokens")?;
        state
            .client
            .delete_json(&url, &list, state.config.timeout.cplane_operation)
            .await?;
        return Ok(StatusCode::OK);
    }
    if let Some(merged) = state.tokens.merge(&list) {
        let body = MetasyncBody {
            tokens: Some((*merged).clone()),
            ..Default::default()
        };
        state.metasyncer.sync(body);
        info!(version = merged.version, "revocation list metasynced");
    }
    Ok(StatusCode::OK)
}

async fn notif_finished(
    State(state): State<Arc<ProxyState>>,
    Json(msg): Json<NotifMsg>,
) -> ApiResult<StatusCode> {
    state.notifs.finished(&msg)?;
    Ok(StatusCode::OK)
}

async fn metasync_recv(
    State(state): State<Arc<ProxyState>>,
    Json(body): Json<MetasyncBody>,
) -> StatusCode {
    metasync::apply_received(body, &state.smap, &state.bmd, &state.rmd, &state.tokens);
    StatusCode::OK
}

//
// cluster membership
//

async fn cluster_join(
    State(state): State<Arc<ProxyState>>,
    Json(snode): Json<Snode>,
) -> ApiResult<Response> {
    if !state.is_primary() {
        let url = state.primary_url("v1/cluster/join")?;
        let snapshot: strata_cluster::ClusterSnapshot = state
            .client
            .post_json_rx(&url, &snode, state.config.timeout.long_timeout)
            .await?;
        return Ok(Json(snapshot).into_response());
    }

    let joined = state.smap.modify(|sm| {
        let map = if snode.is_proxy() {
            &mut sm.pmap
        } else {
            &mut sm.tmap
        };
        map.insert(snode.id.clone(), snode.clone());
    });
    info!(node = %snode, version = joined.version, "node joined");

    state
        .metasyncer
        .sync(MetasyncBody::smap((*joined).clone()));
    Ok(Json(state.snapshot()).into_response())
}

async fn cluster_leave(
    State(state): State<Arc<ProxyState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.is_primary() {
        let url = state.primary_url(&format!("v1/cluster/leave/{id}"))?;
        state
            .client
            .delete(&url, state.config.timeout.cplane_operation)
            .await?;
        return Ok(StatusCode::OK);
    }
    let id = NodeId::new(id);
    let left = state.smap.modify(|sm| {
        sm.pmap.remove(&id);
        sm.tmap.remove(&id);
    });
    info!(node = %id, version = left.version, "node left");
    state.metasyncer.sync(MetasyncBody::smap((*left).clone()));
    Ok(StatusCode::OK)
}

async fn get_smap(State(state): State<Arc<ProxyState>>) -> Json<strata_cluster::Smap> {
    Json((*state.smap.get()).clone())
}

async fn get_bmd(State(state): State<Arc<ProxyState>>) -> Json<strata_cluster::Bmd> {
    Json((*state.bmd.get()).clone())
}

//
// data-plane redirects: the proxy stays out of the payload path
//

async fn redirect_object(
    State(state): State<Arc<ProxyState>>,
    Path((bucket, obj)): Path<(String, String)>,
) -> ApiResult<Response> {
    redirect(&state, &bucket, &obj, "v1/objects")
}

async fn redirect_s3(
    State(state): State<Arc<ProxyState>>,
    Path((bucket, obj)): Path<(String, String)>,
) -> ApiResult<Response> {
    redirect(&state, &bucket, &obj, "s3")
}

fn redirect(state: &ProxyState, bucket: &str, obj: &str, prefix: &str) -> ApiResult<Response> {
    let bck = parse_bck(bucket)?;
    {
        let bmd = state.bmd.get();
        let props = bmd
            .get(&bck)
            .ok_or_else(|| Error::BucketDoesNotExist(bck.clone()))?;
        if props.renamed.is_some() {
            return Err(Error::BucketDoesNotExist(bck).into());
        }
    }
    let uname = format!("{}/{}", bck.uid(), obj);
    let smap = state.smap.get();
    let tgt = smap.hrw_target(&uname)?;
    let location = format!(
        "{}/{}/{}/{}",
        tgt.public_url.trim_end_matches('/'),
        prefix,
        bucket,
        obj
    );
    let mut resp = Redirect::temporary(&location).into_response();
    if let Ok(value) = header::HeaderValue::from_str(tgt.id.as_str()) {
        resp.headers_mut()
            .insert(header::HeaderName::from_static("x-strata-redirect-node"), value);
    }
    Ok(resp)
}
