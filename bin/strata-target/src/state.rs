//! Shared target state

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strata_cluster::{
    metasync, Bmd, BmdOwner, ClusterSnapshot, IntraClient, Lom, NotifMsg, RmdOwner, SmapOwner,
    Snode,
};
use strata_cluster::namelock::NameLocker;
use strata_cluster::tokens::TokenStore;
use strata_common::config::Config;
use strata_common::{Bck, BucketProps, Error, Result};
use strata_ec::{EcCtx, XactGet, XactPut};
use strata_fs::{Mountpaths, MpathEventRunner};
use strata_xaction::{QueryRegistry, Xact, XactBase, XactRegistry};
use tracing::{info, warn};

pub struct TargetState {
    snode: Snode,
    pub client: Arc<IntraClient>,
    pub smap: Arc<SmapOwner>,
    pub bmd: Arc<BmdOwner>,
    pub rmd: Arc<RmdOwner>,
    pub tokens: TokenStore,
    pub mpaths: Arc<Mountpaths>,
    pub config: Arc<Config>,
    pub lom_locks: NameLocker,
    pub txns: crate::txn::TxnTable,
    pub xput: Arc<XactPut>,
    pub xget: Arc<XactGet>,
    pub queries: Arc<QueryRegistry>,
    pub registry: Arc<XactRegistry>,
    pub runners: Mutex<Vec<Arc<dyn MpathEventRunner>>>,
    proxy_endpoint: String,
}

impl TargetState {
    pub fn new(
        snode: Snode,
        mountpaths: Vec<String>,
        data_dir: PathBuf,
        proxy_endpoint: String,
        config: Arc<Config>,
    ) -> Result<Self> {
        let mpaths = Arc::new(Mountpaths::new());
        for path in &mountpaths {
            std::fs::create_dir_all(path)?;
            let mp = mpaths.add(path.as_str())?;
            mpaths.create_provider_dirs(&mp)?;
        }

        std::fs::create_dir_all(&data_dir)?;
        let bmd_path = data_dir.join(".strata.bmd");
        let initial_bmd = match BmdOwner::load(&bmd_path)? {
            Some(bmd) => {
                info!(version = bmd.version, "loaded BMD from disk");
                bmd
            }
            None => Bmd::new(""),
        };
        let bmd = Arc::new(BmdOwner::new(initial_bmd).with_persistence(bmd_path));

        let client = Arc::new(IntraClient::new(snode.clone()));
        let smap = Arc::new(SmapOwner::default());
        let ctx = Arc::new(EcCtx {
            client: Arc::clone(&client),
            smap: Arc::clone(&smap),
            bmd: Arc::clone(&bmd),
            mpaths: Arc::clone(&mpaths),
            config: Arc::clone(&config),
        });

        let xput = XactPut::new(Arc::clone(&ctx), config.xaction.idle_timeout);
        let xget = XactGet::new(Arc::clone(&ctx), config.xaction.idle_timeout);
        let registry = XactRegistry::new(config.xaction.reap_after);
        registry.insert(xput.clone() as Arc<dyn Xact>);
        registry.insert(xget.clone() as Arc<dyn Xact>);

        let runners: Vec<Arc<dyn MpathEventRunner>> = vec![
            Arc::clone(&xput) as Arc<dyn MpathEventRunner>,
            Arc::clone(&xget) as Arc<dyn MpathEventRunner>,
        ];

        Ok(Self {
            snode,
            client,
            smap,
            bmd,
            rmd: Arc::new(RmdOwner::default()),
            tokens: TokenStore::default(),
            mpaths,
            config,
            lom_locks: NameLocker::new(),
            txns: crate::txn::TxnTable::new(),
            xput,
            xget,
            queries: QueryRegistry::new(),
            registry,
            runners: Mutex::new(runners),
            proxy_endpoint,
        })
    }

    #[must_use]
    pub fn snode(&self) -> &Snode {
        &self.snode
    }

    #[must_use]
    pub fn proxy_endpoint(&self) -> &str {
        &self.proxy_endpoint
    }

    /// Control URL on the primary proxy for `path`
    #[must_use]
    pub fn primary_url(&self, path: &str) -> String {
        let smap = self.smap.get();
        match smap.primary() {
            Some(primary) => primary.control_url(path),
            None => format!(
                "{}/{}",
                self.proxy_endpoint.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
        }
    }

    /// Register with the primary and adopt the returned metadata
    pub async fn join_cluster(&self) -> Result<()> {
        let url = self.primary_url("v1/cluster/join");
        let reply: ClusterSnapshot = self
            .client
            .post_json_rx(&url, self.snode(), Duration::from_secs(5))
            .await?;
        self.smap.put(reply.smap);
        self.bmd.receive(reply.bmd);
        self.rmd.receive(reply.rmd);
        self.tokens.receive(reply.tokens);
        Ok(())
    }

    /// Drop out of the cluster map (last mountpath gone)
    pub async fn deregister(&self) -> Result<()> {
        let url = self.primary_url(&format!("v1/cluster/leave/{}", self.snode.id));
        self.client.delete(&url, Duration::from_secs(5)).await
    }

    /// Report a long-running operation's completion to the primary
    pub async fn post_notif(&self, uuid: &str, err: Option<String>) {
        let msg = NotifMsg {
            uuid: uuid.to_string(),
            node_id: self.snode.id.clone(),
            err,
        };
        let url = self.primary_url("v1/notifs");
        if let Err(e) = self
            .client
            .post_json(&url, &[], &msg, Duration::from_secs(5))
            .await
        {
            warn!(uuid, %e, "failed to post completion notification");
        }
    }

    /// Current props of `bck`, or DoesNotExist
    pub fn bucket_props(&self, bck: &Bck) -> Result<BucketProps> {
        self.bmd
            .get()
            .get(bck)
            .cloned()
            .ok_or_else(|| Error::BucketDoesNotExist(bck.clone()))
    }

    /// Initialize a LOM for `bck/obj` on this target
    pub fn lom(&self, bck: Bck, obj: strata_common::ObjName) -> Result<Lom> {
        Lom::init(bck, obj, &self.mpaths)
    }

    /// Apply a metasync delta, maintaining bucket directories for BMD diffs
    pub fn apply_metasync(&self, body: metasync::MetasyncBody) {
        let old_bmd = self.bmd.get();
        let new_rmd = body.rmd.clone();
        metasync::apply_received(body, &self.smap, &self.bmd, &self.rmd, &self.tokens);
        let new_bmd = self.bmd.get();

        if new_bmd.version > old_bmd.version {
            // buckets that appeared get their canonical directories
            for (provider, buckets) in &new_bmd.providers {
                for name in buckets.keys() {
                    let bck = Bck::new(*provider, name.clone());
                    if old_bmd.get(&bck).is_none() {
                        if let Err(e) = self.mpaths.create_bucket_dirs(&bck) {
                            warn!(%bck, %e, "failed to create bucket dirs");
                        }
                    }
                }
            }
            // buckets that disappeared lose their local content
            for (provider, buckets) in &old_bmd.providers {
                for name in buckets.keys() {
                    let bck = Bck::new(*provider, name.clone());
                    if new_bmd.get(&bck).is_none() {
                        if let Err(e) = self.mpaths.destroy_bucket_dirs(&bck) {
                            warn!(%bck, %e, "failed to destroy bucket dirs");
                        }
                    }
                }
            }
        }

        if let Some(rmd) = new_rmd {
            if rmd.resilver && self.rmd.get().version == rmd.version {
                self.start_resilver();
            }
        }
    }

    /// Local rebalance: revisit every object on this target. Kicked by
    /// mountpath changes and RMD bumps.
    pub fn start_resilver(&self) {
        let bmd = self.bmd.get();
        let mpaths = Arc::clone(&self.mpaths);
        let mut created = false;
        let xact: Arc<dyn Xact> = self.registry.renew("resilver", None, || {
            created = true;
            Arc::new(ResilverXact(XactBase::new("resilver", None)))
        });
        if !created {
            // a pass is already running; it will observe the new layout
            return;
        }
        let buckets: Vec<Bck> = bmd
            .providers
            .iter()
            .flat_map(|(p, m)| m.keys().map(move |n| Bck::new(*p, n.clone())))
            .collect();
        tokio::task::spawn_blocking(move || {
            for bck in buckets {
                let opts = strata_fs::walk::WalkBckOptions {
                    bck: bck.clone(),
                    ct: strata_fs::ContentType::Obj,
                    is_aborted: Some({
                        let token = xact.base().abort_token();
                        Arc::new(move || token.is_cancelled())
                    }),
                };
                let res = strata_fs::walk_bck(&mpaths, &opts, &mut |entry| {
                    xact.base().objs_inc();
                    xact.base().bytes_add(entry.size as i64);
                    Ok(())
                });
                if let Err(e) = res {
                    warn!(%bck, %e, "resilver walk failed");
                }
            }
            xact.base().finish();
            info!(
                objects = xact.base().obj_count(),
                "resilver pass finished"
            );
        });
    }

    pub fn shutdown(&self) {
        self.registry.abort_all();
        strata_ec::xact::shutdown_all(&self.xput, &self.xget);
    }
}

struct ResilverXact(XactBase);

impl Xact for ResilverXact {
    fn base(&self) -> &XactBase {
        &self.0
    }
}
