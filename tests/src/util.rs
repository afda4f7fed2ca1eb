use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use vortex_common::config::SweepOptions;
use vortex_core::DiscoveryCoordinator;
use vortex_core::network::{NoopResolver, TcpConnector};

pub const FIXTURE_BANNER: &str = "SSH-2.0-VortexFixture_1.0\r\n";

/// A listener on 127.0.0.1 that greets every connection with [`FIXTURE_BANNER`].
pub struct BannerService {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl BannerService {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = socket.write_all(FIXTURE_BANNER.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Ok(Self { addr, task })
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for BannerService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A loopback port with nothing behind it.
pub async fn closed_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

pub fn loopback_coordinator() -> DiscoveryCoordinator {
    DiscoveryCoordinator::new(Arc::new(TcpConnector), Arc::new(NoopResolver))
}

/// Short timeouts and the fixture's port as the liveness probe.
pub fn fixture_options(ports: &[u16], liveness_port: u16) -> SweepOptions {
    SweepOptions {
        ports: ports.iter().copied().collect::<BTreeSet<u16>>(),
        liveness_port,
        port_timeout: Duration::from_millis(500),
        banner_timeout: Duration::from_millis(500),
        host_timeout: Duration::from_secs(5),
        resolve_hostnames: false,
        ..SweepOptions::default()
    }
}
