//! Control-plane listener serving plaintext HTTP and HTTPS on one port.
//!
//! With TLS configured, the first bytes of every connection are peeked: a
//! TLS handshake record (`0x16`) gets a server handshake on the same socket,
//! anything else is served as plaintext HTTP/1.

pub mod tls;
mod urls;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::{Extension, Router};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

pub use urls::{access_urls, advertised_hosts, AccessUrl};

/// First byte of a TLS handshake record.
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

const PEEK_LEN: usize = 6;
const PEEK_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plaintext and TLS on the same port.
    Dual,
    Http,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dual => "dual",
            Self::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sniffed {
    Tls,
    Plain,
    Closed,
}

/// Look at the first bytes without consuming them.
async fn sniff(tcp: &TcpStream) -> Sniffed {
    let mut buf = [0u8; PEEK_LEN];
    match tokio::time::timeout(PEEK_TIMEOUT, tcp.peek(&mut buf)).await {
        Ok(Ok(0)) => Sniffed::Closed,
        Ok(Ok(_)) if buf[0] == TLS_HANDSHAKE_RECORD => Sniffed::Tls,
        Ok(Ok(_)) => Sniffed::Plain,
        Ok(Err(e)) => {
            log::debug!("Peek failed: {e}");
            Sniffed::Closed
        }
        // Silent client: let the HTTP parser deal with it.
        Err(_) => Sniffed::Plain,
    }
}

pub struct ControlListener {
    listener: TcpListener,
    router: Router,
    tls: Option<TlsAcceptor>,
}

impl ControlListener {
    /// Bind `host:port`. A port already in use is a configuration error.
    pub async fn bind(host: &str, port: u16, router: Router, tls: Option<TlsAcceptor>) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            AppError::config(format!("Cannot bind control API on {host}:{port}: {e}"))
        })?;
        Ok(Self {
            listener,
            router,
            tls,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn protocol(&self) -> Protocol {
        if self.tls.is_some() {
            Protocol::Dual
        } else {
            Protocol::Http
        }
    }

    /// Accept connections until `running` is cancelled.
    pub async fn run(self, running: CancellationToken) {
        let Self {
            listener,
            router,
            tls,
        } = self;
        loop {
            let accepted = tokio::select! {
                () = running.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((tcp, peer)) => {
                    let router = router.clone();
                    let tls = tls.clone();
                    tokio::spawn(handle_connection(tcp, peer, router, tls));
                }
                Err(e) => {
                    log::warn!("Accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        log::info!("Control API listener stopped");
    }
}

async fn handle_connection(
    mut tcp: TcpStream,
    peer: SocketAddr,
    router: Router,
    tls: Option<TlsAcceptor>,
) {
    if let Some(acceptor) = tls {
        match sniff(&tcp).await {
            Sniffed::Closed => return,
            Sniffed::Plain => {}
            Sniffed::Tls => {
                match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(&mut tcp)).await {
                    Ok(Ok(stream)) => {
                        serve(stream, router, peer).await;
                        return;
                    }
                    Ok(Err(e)) => {
                        log::warn!("TLS handshake with {peer} failed, serving as plaintext: {e}");
                    }
                    Err(_) => {
                        log::warn!("TLS handshake with {peer} timed out, serving as plaintext");
                    }
                }
            }
        }
    }
    serve(tcp, router, peer).await;
}

async fn serve<I>(io: I, router: Router, peer: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send,
{
    let router = router.layer(Extension(ConnectInfo(peer)));
    let service = TowerToHyperService::new(router);
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        log::debug!("Connection from {peer} ended with error: {e}");
    }
}
