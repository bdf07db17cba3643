//! TCP bridge for one device
//!
//! Listens on a TCP port and serves each accepted client a device
//! transport forwarded over the adb server. All connection tasks live in a
//! [`JoinSet`] owned by the accept task, so aborting that one task tears
//! down the listener and every live connection together.

use super::client::AdbClient;
use super::transport::{BridgeContext, serve_connection};
use async_trait::async_trait;
use common::{BridgeAuth, BridgeHandle, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub struct AdbBridge {
    ctx: Arc<BridgeContext>,
    bind_host: String,
    port: Option<u16>,
    accept_task: Option<JoinHandle<()>>,
}

impl AdbBridge {
    pub fn new(serial: &str, client: AdbClient, bind_host: &str, auth: BridgeAuth) -> Self {
        Self {
            ctx: Arc::new(BridgeContext {
                serial: serial.to_string(),
                client,
                auth,
            }),
            bind_host: bind_host.to_string(),
            port: None,
            accept_task: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

#[async_trait]
impl BridgeHandle for AdbBridge {
    async fn listen(&mut self, port: u16) -> Result<()> {
        if self.accept_task.is_some() {
            return Err(Error::Bridge(format!(
                "bridge for {} is already listening",
                self.ctx.serial
            )));
        }

        let listener = TcpListener::bind((self.bind_host.as_str(), port)).await?;
        info!(
            "Bridge for {} listening on {}:{}",
            self.ctx.serial, self.bind_host, port
        );

        self.port = Some(port);
        self.accept_task = Some(tokio::spawn(accept_loop(listener, self.ctx.clone())));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            info!(
                "Bridge for {} on port {:?} closed",
                self.ctx.serial, self.port
            );
        }
    }

    fn port(&self) -> Option<u16> {
        self.port
    }
}

impl Drop for AdbBridge {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<BridgeContext>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    info!("Bridge client {} connected to {}", peer, ctx.serial);
                    let ctx = ctx.clone();
                    connections.spawn(async move {
                        match serve_connection(socket, ctx.clone()).await {
                            Ok(()) => debug!("Bridge client {} disconnected from {}", peer, ctx.serial),
                            Err(e) => warn!("Bridge client {} on {} failed: {}", peer, ctx.serial, e),
                        }
                    });
                }
                Err(e) => {
                    warn!("Accept failed on bridge for {}: {}", ctx.serial, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}
