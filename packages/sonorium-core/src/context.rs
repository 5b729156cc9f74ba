//! The advertised network endpoint.
//!
//! Sessions hand stream URLs to network speakers, so the core must know
//! the address those speakers can reach it at. That endpoint is mutable at
//! runtime: the real port is announced once the listener has bound (it may
//! have been auto-assigned), and the IP can be re-detected when the host
//! network changes.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

/// Strategy for finding the IP that speakers can reach us at.
///
/// The headless server uses [`SystemIpDetector`]; shells with their own
/// network awareness inject something else.
pub trait IpDetector: Send + Sync {
    fn detect(&self) -> Result<IpAddr, NetworkError>;
}

/// Detects the primary outbound interface address.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIpDetector;

impl IpDetector for SystemIpDetector {
    fn detect(&self) -> Result<IpAddr, NetworkError> {
        local_ip_address::local_ip().map_err(|e| NetworkError::Detection(e.to_string()))
    }
}

/// Errors from endpoint detection.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// No usable local IP could be determined.
    #[error("could not determine a reachable local IP: {0}")]
    Detection(String),

    /// The endpoint was configured explicitly; there is nothing to
    /// re-detect.
    #[error("endpoint is fixed by configuration")]
    Fixed,
}

/// The ip:port pair speakers fetch streams from.
struct Endpoint {
    ip: IpAddr,
    port: u16,
}

/// Shared, mutable view of the advertised endpoint.
///
/// Cheap to clone; every clone observes the same endpoint. URL builders
/// read the endpoint at call time, so a late-bound port or a re-detected
/// IP flows into every URL handed out afterwards.
#[derive(Clone)]
pub struct NetworkContext {
    endpoint: Arc<RwLock<Endpoint>>,
    port_ready: Arc<Notify>,
    detector: Option<Arc<dyn IpDetector>>,
}

impl NetworkContext {
    /// An endpoint pinned by configuration. Port 0 means "announced later,
    /// once the listener is bound".
    pub fn fixed(ip: IpAddr, port: u16) -> Self {
        Self {
            endpoint: Arc::new(RwLock::new(Endpoint { ip, port })),
            port_ready: Arc::new(Notify::new()),
            detector: None,
        }
    }

    /// An endpoint whose IP comes from `detector`, now and on demand.
    ///
    /// # Errors
    ///
    /// Fails when the initial detection finds no usable address.
    pub fn detected(port: u16, detector: Arc<dyn IpDetector>) -> Result<Self, NetworkError> {
        let ip = detector.detect()?;
        Ok(Self {
            endpoint: Arc::new(RwLock::new(Endpoint { ip, port })),
            port_ready: Arc::new(Notify::new()),
            detector: Some(detector),
        })
    }

    /// Loopback endpoint for tests.
    #[cfg(test)]
    pub fn loopback() -> Self {
        Self::fixed(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 0)
    }

    /// The currently advertised IP.
    pub fn advertised_ip(&self) -> IpAddr {
        self.endpoint.read().ip
    }

    /// The currently advertised port (0 until announced).
    pub fn port(&self) -> u16 {
        self.endpoint.read().port
    }

    /// Records the port the listener actually bound and wakes anything
    /// blocked in [`bound_port`](Self::bound_port).
    pub fn announce_port(&self, port: u16) {
        self.endpoint.write().port = port;
        self.port_ready.notify_waiters();
    }

    /// Waits until a nonzero port has been announced, then returns it.
    pub async fn bound_port(&self) -> u16 {
        loop {
            let notified = self.port_ready.notified();
            let port = self.port();
            if port != 0 {
                return port;
            }
            notified.await;
        }
    }

    /// Runs the detector again and stores the result. Fails with
    /// [`NetworkError::Fixed`] on explicitly configured endpoints.
    pub fn redetect_ip(&self) -> Result<IpAddr, NetworkError> {
        let detector = self.detector.as_ref().ok_or(NetworkError::Fixed)?;
        let ip = detector.detect()?;
        self.endpoint.write().ip = ip;
        Ok(ip)
    }

    /// `http://ip:port`, from the endpoint as it is right now.
    pub fn base_url(&self) -> String {
        let endpoint = self.endpoint.read();
        format!("http://{}:{}", endpoint.ip, endpoint.port)
    }

    /// Broadcast stream URL for a channel.
    pub fn channel_stream_url(&self, channel_id: u32) -> String {
        format!("{}/stream/channel{}", self.base_url(), channel_id)
    }

    /// Legacy one-off stream URL for a theme.
    pub fn theme_stream_url(&self, theme_id: &str) -> String {
        format!("{}/stream/{}", self.base_url(), theme_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDetector {
        ip: IpAddr,
        calls: AtomicUsize,
    }

    impl IpDetector for CountingDetector {
        fn detect(&self) -> Result<IpAddr, NetworkError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.ip)
        }
    }

    #[test]
    fn fixed_endpoint_refuses_redetection() {
        let ctx = NetworkContext::fixed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 8080);
        assert_eq!(ctx.advertised_ip().to_string(), "10.0.0.5");
        assert_eq!(ctx.port(), 8080);
        assert!(matches!(ctx.redetect_ip(), Err(NetworkError::Fixed)));
    }

    #[test]
    fn detected_endpoint_queries_the_detector_once_up_front() {
        let detector = Arc::new(CountingDetector {
            ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)),
            calls: AtomicUsize::new(0),
        });
        let shared: Arc<dyn IpDetector> = detector.clone();
        let ctx = NetworkContext::detected(0, shared).unwrap();
        assert_eq!(ctx.advertised_ip().to_string(), "192.168.1.42");
        assert_eq!(detector.calls.load(Ordering::Relaxed), 1);

        ctx.redetect_ip().unwrap();
        assert_eq!(detector.calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn urls_reflect_the_endpoint_at_call_time() {
        let ctx = NetworkContext::fixed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 0);
        assert_eq!(ctx.channel_stream_url(3), "http://10.0.0.5:0/stream/channel3");

        ctx.announce_port(9000);
        assert_eq!(ctx.channel_stream_url(3), "http://10.0.0.5:9000/stream/channel3");
        assert_eq!(
            ctx.theme_stream_url("forest"),
            "http://10.0.0.5:9000/stream/forest"
        );
    }

    #[test]
    fn clones_share_one_endpoint() {
        let ctx = NetworkContext::loopback();
        let view = ctx.clone();
        ctx.announce_port(7777);
        assert_eq!(view.port(), 7777);
    }

    #[tokio::test]
    async fn bound_port_returns_once_announced() {
        let ctx = NetworkContext::loopback();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.bound_port().await });
        // Give the waiter a moment to park on the notify.
        tokio::task::yield_now().await;
        ctx.announce_port(8123);
        assert_eq!(handle.await.unwrap(), 8123);
    }
}
