//! Node assembly: open the store, wire the components, bind and serve.

use std::{future::Future, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use axum::Router;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    catchup::{CatchUp, DEFAULT_SYNC_INTERVAL, DEFAULT_SYNC_TIMEOUT},
    http,
    primary::Primary,
    publish::{DEFAULT_PUSH_TIMEOUT, Publisher},
    store::Store,
};

#[derive(Debug, Clone)]
pub struct PrimaryConfig {
    pub name: String,
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    /// Base URLs of the replicas to push to.
    pub replicas: Vec<String>,
    pub push_timeout: Duration,
}

impl PrimaryConfig {
    pub fn new(name: impl Into<String>, listen: SocketAddr, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            listen,
            data_dir: data_dir.into(),
            replicas: Vec::new(),
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub name: String,
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    /// Without a primary the replica only receives pushes.
    pub primary: Option<String>,
    pub sync_interval: Duration,
    pub sync_timeout: Duration,
}

impl ReplicaConfig {
    pub fn new(name: impl Into<String>, listen: SocketAddr, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            listen,
            data_dir: data_dir.into(),
            primary: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

pub struct PrimaryNode {
    name: String,
    listener: TcpListener,
    router: Router,
    store: Store,
}

impl PrimaryNode {
    pub async fn bind(config: PrimaryConfig) -> Result<Self> {
        let store = Store::open_for_node(&config.data_dir, &config.name)
            .await
            .with_context(|| format!("opening store in {}", config.data_dir.display()))?;
        let publisher = Publisher::new(config.replicas, config.push_timeout)
            .context("building push client")?;
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("binding {}", config.listen))?;

        info!(node = %config.name, replicas = ?publisher.replicas(), "primary configured");
        let router = http::primary::router(Primary::new(store.clone(), publisher), &config.name);

        Ok(Self {
            name: config.name,
            listener,
            router,
            store,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let PrimaryNode {
            name,
            listener,
            router,
            store,
        } = self;

        info!(node = %name, addr = %listener.local_addr()?, "primary listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("serving primary")?;

        info!(node = %name, "primary shutting down");
        store.close().await.context("closing store")?;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(ctrl_c()).await
    }
}

pub struct ReplicaNode {
    name: String,
    listener: TcpListener,
    router: Router,
    store: Store,
    catchup: Option<CatchUp>,
    sync_interval: Duration,
}

impl ReplicaNode {
    pub async fn bind(config: ReplicaConfig) -> Result<Self> {
        let store = Store::open_for_node(&config.data_dir, &config.name)
            .await
            .with_context(|| format!("opening store in {}", config.data_dir.display()))?;
        let catchup = config
            .primary
            .as_deref()
            .map(|url| CatchUp::new(url, store.clone(), config.sync_timeout))
            .transpose()
            .context("building sync client")?;
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("binding {}", config.listen))?;

        let primary_url = catchup.as_ref().map(CatchUp::primary_url);
        info!(node = %config.name, primary = ?primary_url, "replica configured");
        let router = http::replica::router(store.clone(), &config.name, primary_url);

        Ok(Self {
            name: config.name,
            listener,
            router,
            store,
            catchup,
            sync_interval: config.sync_interval,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves pushes and runs catch-up (if a primary is configured) until
    /// `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ReplicaNode {
            name,
            listener,
            router,
            store,
            catchup,
            sync_interval,
        } = self;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let catchup_task: Option<JoinHandle<()>> = catchup.map(|catchup| {
            tokio::spawn(catchup.run(sync_interval, async move {
                let _ = stop_rx.await;
            }))
        });

        info!(node = %name, addr = %listener.local_addr()?, "replica listening");
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("serving replica");

        info!(node = %name, "replica shutting down");
        let _ = stop_tx.send(());
        if let Some(task) = catchup_task {
            if let Err(err) = task.await {
                warn!(error = %err, "catch-up task ended abnormally");
            }
        }

        served?;
        store.close().await.context("closing store")?;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(ctrl_c()).await
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}
