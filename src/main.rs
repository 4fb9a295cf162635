// Copyright 2020 Boban Acimovic
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[macro_use]
extern crate log;
use anyhow::Context;
use clap::Parser;
use kube::Client;
use std::sync::Arc;
use tokio::sync::watch;

mod admission;
mod bootstrap;
mod client;
mod config;
mod crd;
mod credentials;
mod error;
mod registration;
mod server;
#[cfg(test)]
mod testing;

use bootstrap::Bootstrap;
use client::KubeApi;
use config::Config;
use credentials::CredentialStore;
use error::StartupError;
use registration::Registrar;

/// Pod admission webhook with cert-manager trust bootstrap
#[derive(Parser, Debug)]
#[clap(name = "pod-webhook")]
struct Opt {
    /// Namespaces the webhooks apply to
    #[clap(long, value_delimiter = ',', default_value = config::DEFAULT_NAMESPACE)]
    namespaces: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info,kube=warn"))
        .init();

    let opt = Opt::parse();
    info!("Options: {:?}", opt);

    let cfg = Config::with_namespaces(&opt.namespaces);
    info!("Config: {:#?}", cfg);

    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown requested");
            let _ = tx.send(true);
        });
    }

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;
    let api = Arc::new(KubeApi::new(client));

    let app = async {
        let res = start(&cfg, api, rx.clone()).await;
        let _ = tx.send(true);
        res
    };
    let ((), res) = futures::future::join(server::serve_health(cfg.health_port, rx.clone()), app).await;

    res.map_err(|e| {
        error!("{}", e);
        anyhow::Error::new(e)
    })
}

/// Bootstrap trust, register the webhooks and serve until shutdown.
async fn start(cfg: &Config, api: Arc<KubeApi>, rx: watch::Receiver<bool>) -> Result<(), StartupError> {
    let creds = CredentialStore::from_config(cfg);
    tokio::select! {
        res = prepare(cfg, api.as_ref(), &creds) => res?,
        _ = server::wait_for_shutdown(rx.clone()) => {
            info!("shutdown requested before serving");
            return Ok(());
        }
    }
    server::serve(cfg, &creds, api, rx).await;
    Ok(())
}

async fn prepare(cfg: &Config, api: &KubeApi, creds: &CredentialStore) -> Result<(), StartupError> {
    Bootstrap::new(api, cfg).run(creds).await?;

    let registrar = Registrar::new(api, cfg);
    registrar.register_validating(&cfg.namespaces).await?;
    registrar.register_mutating(&cfg.namespaces).await?;

    creds.verify().await.map_err(StartupError::Credentials)
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = term.recv() => {},
            }
        }
        Err(e) => {
            warn!("failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
