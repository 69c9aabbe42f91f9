use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::authz::store::PermissionStore;
use crate::authz::Authorizer;
use crate::config::{expandenv, CommonConfig, PathSet};
use crate::context::GatewayContext;
use crate::db::config::DbConfig;
use crate::db::Database;
use crate::logs::LogsConfig;
use crate::refresh::Refresher;

use super::proxy::Proxy;
use super::GatewayServer;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "GatewayConfig::default_bind")]
    pub bind: String,

    /// Address of the SVN server, `host:port` or a full `http://` base url.
    #[serde(default)]
    pub upstream: String,

    /// Path prefix under which the repositories are served.
    #[serde(default = "GatewayConfig::default_prefix")]
    pub prefix: String,

    /// Request paths that are always forwarded, whoever asks.
    #[serde(default = "GatewayConfig::default_bypass")]
    pub bypass: Vec<String>,

    #[serde(default = "GatewayConfig::default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default = "GatewayConfig::default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    #[serde(default = "GatewayConfig::default_upstream_connect_timeout_secs")]
    pub upstream_connect_timeout_secs: u64,

    #[serde(default = "GatewayConfig::default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    pub keep_alive_secs: Option<u64>,

    pub workers: Option<u64>,

    #[serde(default = "GatewayConfig::default_payload_limit_mib")]
    pub payload_limit_mib: usize,

    #[serde(default)]
    pub db: DbConfig,

    #[serde(default)]
    pub logs: LogsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            upstream: String::new(),
            prefix: Self::default_prefix(),
            bypass: Self::default_bypass(),
            refresh_interval_secs: Self::default_refresh_interval_secs(),
            max_backoff_secs: Self::default_max_backoff_secs(),
            upstream_connect_timeout_secs: Self::default_upstream_connect_timeout_secs(),
            upstream_timeout_secs: Self::default_upstream_timeout_secs(),
            keep_alive_secs: None,
            workers: None,
            payload_limit_mib: Self::default_payload_limit_mib(),
            db: DbConfig::default(),
            logs: LogsConfig::default(),
        }
    }
}

impl CommonConfig for GatewayConfig {
    fn complete(&mut self, ps: &PathSet) -> Result<()> {
        self.bind = expandenv("bind", &self.bind)?;
        if self.bind.is_empty() {
            bail!("bind is required");
        }

        self.upstream = expandenv("upstream", &self.upstream)?;
        self.upstream = self.upstream.trim_end_matches('/').to_string();
        if self.upstream.is_empty() {
            bail!("upstream is required");
        }
        if !self.upstream.starts_with("http://") && !self.upstream.starts_with("https://") {
            self.upstream = format!("http://{}", self.upstream);
        }

        self.prefix = expandenv("prefix", &self.prefix)?;
        if !self.prefix.starts_with('/') {
            bail!("prefix must start with '/'");
        }
        // A trailing slash would leave the repository name at the start of
        // the stripped path, where it is never checked.
        self.prefix = self.prefix.trim_end_matches('/').to_string();

        if self.refresh_interval_secs == 0 {
            bail!("refresh_interval_secs must be greater than 0");
        }
        if self.max_backoff_secs < self.refresh_interval_secs {
            bail!("max_backoff_secs must not be less than refresh_interval_secs");
        }

        if self.upstream_connect_timeout_secs == 0 {
            bail!("upstream_connect_timeout_secs must be greater than 0");
        }
        if self.upstream_timeout_secs == 0 {
            bail!("upstream_timeout_secs must be greater than 0");
        }

        if let Some(keep_alive_secs) = self.keep_alive_secs {
            if keep_alive_secs == 0 {
                bail!("keep_alive_secs must be greater than 0");
            }
        }

        if let Some(workers) = self.workers {
            if workers == 0 {
                bail!("workers must be greater than 0");
            }
        }

        if self.payload_limit_mib < Self::MIN_PAYLOAD_LIMIT_MIB
            || self.payload_limit_mib > Self::MAX_PAYLOAD_LIMIT_MIB
        {
            bail!(
                "payload_limit_mib must be in range [{}, {}]",
                Self::MIN_PAYLOAD_LIMIT_MIB,
                Self::MAX_PAYLOAD_LIMIT_MIB
            );
        }

        self.db.complete(ps).context("db")?;
        self.logs.complete(ps).context("logs")?;

        Ok(())
    }
}

impl GatewayConfig {
    const MIN_PAYLOAD_LIMIT_MIB: usize = 1;
    const MAX_PAYLOAD_LIMIT_MIB: usize = 4096;

    pub fn build_ctx(&self, store: Arc<PermissionStore>) -> Result<Arc<GatewayContext>> {
        let authz = Authorizer::new(store, &self.bypass);
        let proxy = Proxy::new(
            self.upstream.clone(),
            Duration::from_secs(self.upstream_connect_timeout_secs),
            Duration::from_secs(self.upstream_timeout_secs),
        )
        .context("init upstream client")?;

        Ok(Arc::new(GatewayContext {
            authz,
            proxy,
            prefix: self.prefix.clone(),
        }))
    }

    pub fn build_refresher(
        &self,
        db: Arc<Database>,
        store: Arc<PermissionStore>,
    ) -> Arc<Refresher> {
        Arc::new(Refresher::new(
            db,
            store,
            Duration::from_secs(self.refresh_interval_secs),
            Duration::from_secs(self.max_backoff_secs),
        ))
    }

    pub fn build_server(&self, ctx: Arc<GatewayContext>) -> GatewayServer {
        let mut srv = GatewayServer::new(self.bind.clone(), ctx, self.payload_limit_mib);
        if let Some(keep_alive_secs) = self.keep_alive_secs {
            srv.set_keep_alive_secs(keep_alive_secs);
        }
        if let Some(workers) = self.workers {
            srv.set_workers(workers);
        }
        srv
    }

    fn default_bind() -> String {
        String::from("0.0.0.0:80")
    }

    fn default_prefix() -> String {
        String::from("/svn/root")
    }

    fn default_bypass() -> Vec<String> {
        vec![String::from("/favicon.ico")]
    }

    fn default_refresh_interval_secs() -> u64 {
        10
    }

    fn default_max_backoff_secs() -> u64 {
        5 * 60
    }

    fn default_upstream_connect_timeout_secs() -> u64 {
        10
    }

    fn default_upstream_timeout_secs() -> u64 {
        60 * 60
    }

    fn default_payload_limit_mib() -> usize {
        256
    }
}
