//! Network liveness probe for the worker.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::Result;
use crate::restart::HealthProbe;

/// Probes `GET <scheme>://127.0.0.1:<port>/`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    /// Certificate validation is disabled: the worker is reached over
    /// loopback with whatever certificate it was launched with.
    pub fn new(port: u16, tls: bool, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()?;
        let scheme = if tls { "https" } else { "http" };
        Ok(Self {
            client,
            url: format!("{scheme}://127.0.0.1:{port}/"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Check health endpoint
pub(super) async fn check_health(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            log::trace!("Health probe {url} failed: {e}");
            false
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn is_responsive(&self) -> bool {
        check_health(&self.client, &self.url).await
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    use super::*;

    async fn serve(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn responsive_on_2xx() {
        let port = serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let probe = HttpProbe::new(port, false, Duration::from_secs(2)).unwrap();
        assert!(probe.is_responsive().await);
    }

    #[tokio::test]
    async fn unresponsive_on_error_status_or_closed_port() {
        let port = serve(Router::new().route(
            "/",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let probe = HttpProbe::new(port, false, Duration::from_secs(2)).unwrap();
        assert!(!probe.is_responsive().await);

        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);
        let probe = HttpProbe::new(closed_port, false, Duration::from_secs(2)).unwrap();
        assert!(!probe.is_responsive().await);
    }

    #[test]
    fn scheme_follows_tls_flag() {
        let probe = HttpProbe::new(8188, true, Duration::from_secs(1)).unwrap();
        assert_eq!(probe.url(), "https://127.0.0.1:8188/");
    }
}
