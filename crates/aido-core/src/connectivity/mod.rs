//! Online/offline tracking.
//!
//! `ConnectivityMonitor` holds the current state in a `tokio::sync::watch`
//! channel; subscribers observe transitions only. The platform signal is an
//! HTTP reachability probe behind [`ConnectivityProbe`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::Result;

/// Source of the current connectivity signal.
pub trait ConnectivityProbe: Send + Sync + 'static {
    /// Whether the API is reachable right now.
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;
}

/// Probe that requests `GET {api_base_url}{probe_path}`.
///
/// Any HTTP response counts as online, whatever its status; transport errors
/// and timeouts count as offline.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.probe_url(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ConnectivityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                tracing::debug!("Probe {} answered HTTP {}", self.url, response.status());
                true
            }
            Err(error) => {
                tracing::debug!("Probe {} unreachable: {}", self.url, error);
                false
            }
        }
    }
}

/// Shared online/offline state with transition notifications.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    /// Initialize from the probe's current answer.
    pub async fn from_probe<P: ConnectivityProbe>(probe: &P) -> Self {
        Self::new(probe.is_reachable().await)
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Record the latest signal; returns true when it was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::info!("Connectivity lost");
            }
        }
        changed
    }

    /// Receiver notified on each transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Poll `probe` every `interval` and publish transitions.
    ///
    /// Runs until the returned handle is aborted.
    pub fn spawn_probe_loop<P: ConnectivityProbe>(
        &self,
        probe: P,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.set_online(probe.is_reachable().await);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct ToggleProbe(Arc<AtomicBool>);

    impl ConnectivityProbe for ToggleProbe {
        async fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    async fn spawn_status_server(status_line: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let address = listener.local_addr().expect("local address");
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
        );

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request_buffer = [0_u8; 1024];
                let _ = socket.read(&mut request_buffer).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        format!("http://{address}")
    }

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let address = listener.local_addr().expect("local address");
        drop(listener);
        format!("http://{address}")
    }

    #[test]
    fn set_online_reports_transitions_only() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(monitor.is_online());
        assert!(!monitor.set_online(true));
    }

    #[tokio::test]
    async fn subscribers_see_transition() {
        let monitor = ConnectivityMonitor::new(false);
        let mut receiver = monitor.subscribe();

        monitor.set_online(true);

        receiver.changed().await.unwrap();
        assert!(*receiver.borrow_and_update());
        monitor.set_online(true);
        assert!(!receiver.has_changed().unwrap());
    }

    #[tokio::test]
    async fn http_probe_treats_any_response_as_online() {
        let base = spawn_status_server("503 Service Unavailable").await;
        let config = ClientConfig::for_base_url(&base).unwrap();
        let probe = HttpProbe::new(&config).unwrap();

        assert!(probe.url().ends_with("/api/health"));
        assert!(probe.is_reachable().await);
    }

    #[tokio::test]
    async fn http_probe_treats_refused_connection_as_offline() {
        let config = ClientConfig::for_base_url(&closed_port_url().await).unwrap();
        let probe = HttpProbe::new(&config).unwrap();
        assert!(!probe.is_reachable().await);
    }

    #[tokio::test]
    async fn monitor_initializes_from_probe() {
        let flag = Arc::new(AtomicBool::new(true));
        let monitor = ConnectivityMonitor::from_probe(&ToggleProbe(flag)).await;
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn probe_loop_publishes_changes() {
        let flag = Arc::new(AtomicBool::new(false));
        let monitor = ConnectivityMonitor::new(false);
        let mut receiver = monitor.subscribe();
        let handle =
            monitor.spawn_probe_loop(ToggleProbe(Arc::clone(&flag)), Duration::from_millis(10));

        flag.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), receiver.changed())
            .await
            .expect("transition within timeout")
            .unwrap();
        assert!(monitor.is_online());

        handle.abort();
    }
}
