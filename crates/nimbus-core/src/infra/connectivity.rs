use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::resource::Resource;

/// Decides whether a resource can currently be used.
pub trait ConnectivityCheck {
    fn is_reachable(&self, resource: &Resource) -> Pin<Box<dyn Future<Output = bool>>>;
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectivityKind {
    #[default]
    Tcp,
    None,
}

pub fn create_connectivity_check(
    kind: ConnectivityKind,
    timeout: Duration,
    retries: u32,
) -> Box<dyn ConnectivityCheck> {
    match kind {
        ConnectivityKind::Tcp => Box::new(TcpConnectivity { timeout, retries }),
        ConnectivityKind::None => Box::new(AlwaysReachable),
    }
}

/// Opens a TCP connection to the `host`/`port` of the resource.
pub struct TcpConnectivity {
    timeout: Duration,
    retries: u32,
}

impl TcpConnectivity {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }
}

impl ConnectivityCheck for TcpConnectivity {
    fn is_reachable(&self, resource: &Resource) -> Pin<Box<dyn Future<Output = bool>>> {
        let (Some(host), Some(port)) = (resource.host(), resource.port()) else {
            log::debug!("Resource {} has no address, considering it unreachable", resource.id());
            return Box::pin(async { false });
        };
        let host = host.to_string();
        let id = resource.id().to_string();
        let timeout = self.timeout;
        let attempts = self.retries.max(1);

        Box::pin(async move {
            for attempt in 1..=attempts {
                match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
                    Ok(Ok(_)) => return true,
                    Ok(Err(error)) => {
                        log::debug!("Connection to {id} ({host}:{port}) failed, attempt {attempt}/{attempts}: {error}");
                    }
                    Err(_) => {
                        log::debug!("Connection to {id} ({host}:{port}) timed out, attempt {attempt}/{attempts}");
                    }
                }
            }
            false
        })
    }
}

pub struct AlwaysReachable;

impl ConnectivityCheck for AlwaysReachable {
    fn is_reachable(&self, _resource: &Resource) -> Pin<Box<dyn Future<Output = bool>>> {
        Box::pin(async { true })
    }
}
