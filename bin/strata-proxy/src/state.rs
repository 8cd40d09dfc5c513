//! Shared proxy state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strata_cluster::namelock::NameLocker;
use strata_cluster::tokens::TokenStore;
use strata_cluster::{
    Bmd, BmdOwner, ClusterSnapshot, IntraClient, Metasyncer, NotifListeners, RmdOwner, Smap,
    SmapOwner, Snode,
};
use strata_common::config::Config;
use strata_common::{Error, NodeId, Result};
use tracing::info;

pub struct ProxyState {
    snode: Snode,
    is_primary_config: bool,
    primary_endpoint: Option<String>,
    pub client: Arc<IntraClient>,
    pub smap: Arc<SmapOwner>,
    pub bmd: Arc<BmdOwner>,
    pub rmd: Arc<RmdOwner>,
    pub tokens: TokenStore,
    pub notifs: NotifListeners,
    pub namelocks: NameLocker,
    pub metasyncer: Metasyncer,
    pub config: Arc<Config>,
}

impl ProxyState {
    pub fn new(
        snode: Snode,
        is_primary: bool,
        primary_endpoint: Option<String>,
        data_dir: PathBuf,
        config: Arc<Config>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let bmd_path = data_dir.join(".strata.bmd");
        let initial_bmd = match BmdOwner::load(&bmd_path)? {
            Some(bmd) => {
                info!(version = bmd.version, "loaded BMD from disk");
                bmd
            }
            None => Bmd::new(uuid::Uuid::new_v4().to_string()),
        };
        let bmd = Arc::new(BmdOwner::new(initial_bmd).with_persistence(bmd_path));

        let smap = Arc::new(if is_primary {
            let mut sm = Smap {
                version: 1,
                uuid: uuid::Uuid::new_v4().to_string(),
                primary_id: snode.id.clone(),
                ..Default::default()
            };
            sm.pmap.insert(snode.id.clone(), snode.clone());
            SmapOwner::new(sm)
        } else {
            SmapOwner::default()
        });

        let client = Arc::new(IntraClient::new(snode.clone()));
        let metasyncer = Metasyncer::new(Arc::clone(&client), Arc::clone(&smap));

        Ok(Self {
            snode,
            is_primary_config: is_primary,
            primary_endpoint,
            client,
            smap,
            bmd,
            rmd: Arc::new(RmdOwner::default()),
            tokens: TokenStore::default(),
            notifs: NotifListeners::new(),
            namelocks: NameLocker::new(),
            metasyncer,
            config,
        })
    }

    #[must_use]
    pub fn snode(&self) -> &Snode {
        &self.snode
    }

    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.snode.id
    }

    /// Whether this proxy currently owns cluster-metadata writes
    #[must_use]
    pub fn is_primary(&self) -> bool {
        let smap = self.smap.get();
        if smap.version == 0 {
            return self.is_primary_config;
        }
        smap.is_primary(&self.snode.id)
    }

    /// Control URL on the primary for `path` (forwarding)
    pub fn primary_url(&self, path: &str) -> Result<String> {
        let smap = self.smap.get();
        if let Some(primary) = smap.primary() {
            return Ok(primary.control_url(path));
        }
        self.primary_endpoint
            .as_ref()
            .map(|ep| {
                format!(
                    "{}/{}",
                    ep.trim_end_matches('/'),
                    path.trim_start_matches('/')
                )
            })
            .ok_or_else(|| Error::internal("no known primary"))
    }

    /// Non-primary proxies join through the primary
    pub async fn join_cluster(&self) -> Result<()> {
        let url = self.primary_url("v1/cluster/join")?;
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

    /// The cluster metadata bundle handed to joining nodes
    #[must_use]
    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            smap: (*self.smap.get()).clone(),
            bmd: (*self.bmd.get()).clone(),
            rmd: (*self.rmd.get()).clone(),
            tokens: (*self.tokens.get()).clone(),
        }
    }
}
