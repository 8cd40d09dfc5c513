//! Target HTTP handlers
//!
//! Thin adapters mapping REST verbs onto the core: object I/O, the txn
//! server, the metasync receiver, EC peer endpoints, listing handles, and
//! mountpath administration.

use crate::rungroup;
use crate::state::TargetState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use strata_cluster::metasync::MetasyncBody;
use strata_cluster::Lom;
use strata_common::msg::txn_phase;
use strata_common::{access, ActionMsg, Bck, BucketName, Error, ObjName, Provider};
use strata_ec::{peer, SliceMeta, ECMD_HEADER};
use strata_xaction::{BucketEntry, ObjectsListingXact, ObjectsQuery};
use tracing::warn;

/// Error wrapper carrying the status-code mapping onto the wire
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.0.to_string()).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: Arc<TargetState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/metasync", post(metasync_recv))
        .route("/v1/txn/{bucket}/{phase}", post(txn_handler))
        .route(
            "/v1/objects/{bucket}/{*obj}",
            get(get_object)
                .put(put_object)
                .head(head_object)
                .delete(delete_object),
        )
        .route(
            "/s3/{bucket}/{*obj}",
            get(crate::s3::get_object)
                .put(crate::s3::put_object)
                .head(crate::s3::head_object)
                .delete(crate::s3::delete_object),
        )
        .route("/v1/ec/meta/{provider}/{bucket}/{*obj}", get(ec_get_meta))
        .route(
            "/v1/ec/slice/{provider}/{bucket}/{*obj}",
            get(ec_get_slice).put(ec_put_slice),
        )
        .route(
            "/v1/ec/replica/{provider}/{bucket}/{*obj}",
            get(ec_get_replica).put(ec_put_replica),
        )
        .route(
            "/v1/ec/object/{provider}/{bucket}/{*obj}",
            delete(ec_delete),
        )
        .route("/v1/query/init", post(query_init))
        .route("/v1/query/peek", get(query_peek))
        .route("/v1/query/next", get(query_next))
        .route("/v1/query/discard/{handle}/{*upto}", put(query_discard))
        .route("/v1/mountpaths", get(list_mountpaths).post(mountpath_admin))
        .route("/v1/xactions", get(xaction_stats))
        .route("/v1/xactions/{id}", delete(xaction_abort))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

//
// object data plane (shared with the /s3 routes)
//

pub fn parse_bck(state: &TargetState, bucket: &str) -> Result<Bck, Error> {
    let bck = Bck::strata(BucketName::new(bucket)?);
    let props = state.bucket_props(&bck)?;
    if props.renamed.is_some() {
        // the bucket moved away under rename; its old name no longer serves
        return Err(Error::BucketDoesNotExist(bck));
    }
    Ok(bck)
}

pub async fn read_object(
    state: &Arc<TargetState>,
    bucket: &str,
    obj: &str,
) -> Result<(Lom, Vec<u8>), Error> {
    let bck = parse_bck(state, bucket)?;
    let props = state.bucket_props(&bck)?;
    if !props.access.has(access::GET) {
        return Err(Error::AccessDenied {
            bucket: bck.to_string(),
            op: "GET".to_string(),
        });
    }
    let mut lom = state.lom(bck.clone(), ObjName::new(obj)?)?;
    let _rguard = state.lom_locks.pair(&lom.uname()).rlock().await;

    if !lom.load()? {
        drop(_rguard);
        if !props.ec.enabled {
            return Err(Error::ObjectNotFound {
                bucket: bck.to_string(),
                object: obj.to_string(),
            });
        }
        // local miss: reconstruct from the cluster
        let wguard = state.lom_locks.pair(&lom.uname()).lock().await;
        state.xget.restore(lom.clone()).await?;
        if !lom.load()? {
            return Err(Error::ObjectNotFound {
                bucket: bck.to_string(),
                object: obj.to_string(),
            });
        }
        drop(wguard);
    }
    let payload = lom.load_payload()?;
    Ok((lom, payload))
}

pub async fn write_object(
    state: &Arc<TargetState>,
    bucket: &str,
    obj: &str,
    body: Bytes,
    etag: Option<String>,
) -> Result<Lom, Error> {
    let bck = parse_bck(state, bucket)?;
    let props = state.bucket_props(&bck)?;
    if !props.access.has(access::PUT) {
        return Err(Error::AccessDenied {
            bucket: bck.to_string(),
            op: "PUT".to_string(),
        });
    }
    let mut lom = state.lom(bck.clone(), ObjName::new(obj)?)?;
    let _wguard = state.lom_locks.pair(&lom.uname()).lock().await;

    lom.save_payload(&body, props.cksum, props.versioning.enabled)?;
    if let Some(etag) = etag {
        // kept for the /s3 surface; persisted with the sidecar
        lom.set_custom("etag", etag)?;
    }
    drop(_wguard);

    if props.ec.enabled {
        // the object is durable locally; protection is applied before we
        // acknowledge so a lost mountpath right after the PUT is recoverable
        if let Err(e) = state.xput.encode(lom.clone()).await {
            warn!(obj = %lom.uname(), %e, "EC encode after PUT failed");
        }
    }
    if props.mirror.enabled {
        let st = Arc::clone(state);
        let bck = bck.clone();
        let copies = props.mirror.copies;
        tokio::task::spawn_blocking(move || {
            if let Err(e) = crate::mirror::mirror_bucket(&st, &bck, copies) {
                warn!(%bck, %e, "post-PUT mirroring failed");
            }
        });
    }
    Ok(lom)
}

pub async fn remove_object(
    state: &Arc<TargetState>,
    bucket: &str,
    obj: &str,
) -> Result<(), Error> {
    let bck = parse_bck(state, bucket)?;
    let props = state.bucket_props(&bck)?;
    if !props.access.has(access::OBJ_DELETE) {
        return Err(Error::AccessDenied {
            bucket: bck.to_string(),
            op: "DELETE".to_string(),
        });
    }
    let mut lom = state.lom(bck.clone(), ObjName::new(obj)?)?;
    let _wguard = state.lom_locks.pair(&lom.uname()).lock().await;
    let existed = lom.load()?;
    if !existed && !props.ec.enabled {
        return Err(Error::ObjectNotFound {
            bucket: bck.to_string(),
            object: obj.to_string(),
        });
    }
    lom.remove()?;
    drop(_wguard);

    if props.ec.enabled {
        if let Err(e) = state.xput.cleanup(lom).await {
            warn!(%e, "EC cleanup after DELETE failed");
        }
    }
    Ok(())
}

pub async fn stat_object(
    state: &Arc<TargetState>,
    bucket: &str,
    obj: &str,
) -> Result<Lom, Error> {
    let bck = parse_bck(state, bucket)?;
    let mut lom = state.lom(bck.clone(), ObjName::new(obj)?)?;
    if !lom.load()? {
        return Err(Error::ObjectNotFound {
            bucket: bck.to_string(),
            object: obj.to_string(),
        });
    }
    Ok(lom)
}

async fn get_object(
    State(state): State<Arc<TargetState>>,
    Path((bucket, obj)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (lom, payload) = read_object(&state, &bucket, &obj).await?;
    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, payload.len());
    if let Some(cksum) = lom.cksum() {
        resp = resp.header("x-strata-cksum", cksum.to_string());
    }
    if let Some(version) = lom.version() {
        resp = resp.header("x-strata-version", version);
    }
    Ok(resp
        .body(Body::from(payload))
        .map_err(|e| Error::internal(e.to_string()))?)
}

async fn put_object(
    State(state): State<Arc<TargetState>>,
    Path((bucket, obj)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    write_object(&state, &bucket, &obj, body, None).await?;
    Ok(StatusCode::OK)
}

async fn head_object(
    State(state): State<Arc<TargetState>>,
    Path((bucket, obj)): Path<(String, String)>,
) -> ApiResult<Response> {
    let lom = stat_object(&state, &bucket, &obj).await?;
    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, lom.size());
    if let Some(cksum) = lom.cksum() {
        resp = resp.header("x-strata-cksum", cksum.to_string());
    }
    Ok(resp
        .body(Body::empty())
        .map_err(|e| Error::internal(e.to_string()))?)
}

async fn delete_object(
    State(state): State<Arc<TargetState>>,
    Path((bucket, obj)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    remove_object(&state, &bucket, &obj).await?;
    Ok(StatusCode::NO_CONTENT)
}

//
// intra-cluster control plane
//

async fn metasync_recv(
    State(state): State<Arc<TargetState>>,
    Json(body): Json<MetasyncBody>,
) -> StatusCode {
    state.apply_metasync(body);
    StatusCode::OK
}

async fn txn_handler(
    State(state): State<Arc<TargetState>>,
    Path((bucket, phase)): Path<(String, String)>,
    Json(msg): Json<ActionMsg>,
) -> ApiResult<StatusCode> {
    let bck = Bck::strata(BucketName::new(&bucket).map_err(Error::from)?);
    match phase.as_str() {
        txn_phase::BEGIN => crate::txn::begin(&state, bck, msg)?,
        txn_phase::COMMIT => crate::txn::commit(&state, &msg.uuid)?,
        txn_phase::ABORT => crate::txn::abort(&state, &msg.uuid),
        other => {
            return Err(Error::invalid_argument(format!("unknown txn phase {other}")).into())
        }
    }
    Ok(StatusCode::OK)
}

//
// EC peer endpoints
//

fn ec_lom(state: &TargetState, provider: &str, bucket: &str, obj: &str) -> Result<Lom, Error> {
    let provider = match provider {
        "strata" => Provider::Strata,
        "cloud" => Provider::Cloud,
        other => return Err(Error::invalid_argument(format!("unknown provider {other}"))),
    };
    let bck = Bck::new(provider, BucketName::new(bucket)?);
    state.lom(bck, ObjName::new(obj)?)
}

fn parse_ecmd(headers: &HeaderMap) -> Result<SliceMeta, Error> {
    let raw = headers
        .get(ECMD_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::invalid_argument("missing EC metadata header"))?;
    serde_json::from_str(raw).map_err(Error::from)
}

async fn ec_get_meta(
    State(state): State<Arc<TargetState>>,
    Path((provider, bucket, obj)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let lom = ec_lom(&state, &provider, &bucket, &obj)?;
    match peer::local_meta(&lom)? {
        Some(meta) => Ok(Json(meta).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn ec_get_slice(
    State(state): State<Arc<TargetState>>,
    Path((provider, bucket, obj)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let lom = ec_lom(&state, &provider, &bucket, &obj)?;
    match peer::local_slice(&lom)? {
        Some(data) => Ok((StatusCode::OK, data).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn ec_put_slice(
    State(state): State<Arc<TargetState>>,
    Path((provider, bucket, obj)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let lom = ec_lom(&state, &provider, &bucket, &obj)?;
    let meta = parse_ecmd(&headers)?;
    peer::store_slice(&lom, &meta, &body)?;
    Ok(StatusCode::OK)
}

async fn ec_get_replica(
    State(state): State<Arc<TargetState>>,
    Path((provider, bucket, obj)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let mut lom = ec_lom(&state, &provider, &bucket, &obj)?;
    if !lom.load()? {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    Ok((StatusCode::OK, lom.load_payload()?).into_response())
}

async fn ec_put_replica(
    State(state): State<Arc<TargetState>>,
    Path((provider, bucket, obj)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let mut lom = ec_lom(&state, &provider, &bucket, &obj)?;
    let meta = parse_ecmd(&headers)?;
    let cksum_ty = state
        .bucket_props(lom.bck())
        .map(|p| p.cksum)
        .unwrap_or_default();
    let _wguard = state.lom_locks.pair(&lom.uname()).lock().await;
    peer::store_replica(&mut lom, &meta, &body, cksum_ty)?;
    Ok(StatusCode::OK)
}

async fn ec_delete(
    State(state): State<Arc<TargetState>>,
    Path((provider, bucket, obj)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let mut lom = ec_lom(&state, &provider, &bucket, &obj)?;
    let _wguard = state.lom_locks.pair(&lom.uname()).lock().await;
    peer::cleanup(&mut lom);
    Ok(StatusCode::OK)
}

//
// listing / query
//

#[derive(Debug, Deserialize)]
struct InitMsg {
    handle: String,
    query: ObjectsQuery,
}

#[derive(Debug, Deserialize)]
struct NextMsg {
    handle: String,
    size: usize,
}

#[derive(Debug, Serialize)]
struct BucketList {
    entries: Vec<BucketEntry>,
}

async fn query_init(
    State(state): State<Arc<TargetState>>,
    Json(msg): Json<InitMsg>,
) -> ApiResult<StatusCode> {
    if state.queries.get(&msg.handle).is_ok() {
        // the handle is live; the client resumes paging
        return Ok(StatusCode::OK);
    }
    let xact = ObjectsListingXact::start(
        msg.query,
        Arc::clone(&state.mpaths),
        state.config.xaction.idle_timeout,
    );
    state.queries.put(msg.handle, xact);
    Ok(StatusCode::OK)
}

async fn query_peek(
    State(state): State<Arc<TargetState>>,
    Json(msg): Json<NextMsg>,
) -> ApiResult<Json<BucketList>> {
    let xact = state.queries.get(&msg.handle)?;
    let entries = xact.peek_n(msg.size).await?;
    Ok(Json(BucketList { entries }))
}

async fn query_next(
    State(state): State<Arc<TargetState>>,
    Json(msg): Json<NextMsg>,
) -> ApiResult<Json<BucketList>> {
    let xact = state.queries.get(&msg.handle)?;
    let entries = xact.next_n(msg.size).await?;
    Ok(Json(BucketList { entries }))
}

async fn query_discard(
    State(state): State<Arc<TargetState>>,
    Path((handle, upto)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let xact = state.queries.get(&handle)?;
    xact.discard_until(&upto);
    Ok(StatusCode::OK)
}

//
// mountpath administration
//

#[derive(Debug, Deserialize)]
struct MountpathReq {
    action: String,
    mpath: String,
}

#[derive(Debug, Serialize)]
struct MountpathList {
    available: Vec<String>,
    disabled: Vec<String>,
}

async fn list_mountpaths(State(state): State<Arc<TargetState>>) -> Json<MountpathList> {
    let all = state.mpaths.all();
    let (avail, disabled): (Vec<_>, Vec<_>) = all.iter().partition(|m| m.is_enabled());
    Json(MountpathList {
        available: avail.iter().map(|m| m.path().display().to_string()).collect(),
        disabled: disabled
            .iter()
            .map(|m| m.path().display().to_string())
            .collect(),
    })
}

async fn mountpath_admin(
    State(state): State<Arc<TargetState>>,
    Json(req): Json<MountpathReq>,
) -> ApiResult<StatusCode> {
    let mpath = std::path::PathBuf::from(&req.mpath);
    match req.action.as_str() {
        "add" => rungroup::add_mountpath(&state, &mpath).await?,
        "remove" => rungroup::remove_mountpath(&state, &mpath).await?,
        "enable" => rungroup::enable_mountpath(&state, &mpath).await?,
        "disable" => rungroup::disable_mountpath(&state, &mpath).await?,
        other => {
            return Err(Error::invalid_argument(format!("unknown mountpath action {other}")).into())
        }
    }
    Ok(StatusCode::OK)
}

//
// xaction introspection
//

async fn xaction_stats(
    State(state): State<Arc<TargetState>>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Vec<strata_xaction::XactStats>> {
    let mut stats = state.registry.stats();
    if let Some(kind) = q.get("kind") {
        stats.retain(|s| &s.kind == kind);
    }
    Json(stats)
}

async fn xaction_abort(
    State(state): State<Arc<TargetState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.abort(&id)?;
    Ok(StatusCode::OK)
}
