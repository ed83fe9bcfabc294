use std::sync::Arc;

use herald_common::{ClientTimeouts, internal};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
};

use super::error::{ClientError, Result};

fn tls_config() -> Result<ClientConfig> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        root_store
            .add(cert)
            .map_err(|e| ClientError::Tls(format!("Failed to add certificate: {e}")))?;
    }

    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    if root_store.is_empty() {
        return Err(ClientError::Tls(
            "No trusted root certificates available".to_string(),
        ));
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

/// Opens a TCP connection to `host:port` and completes a TLS handshake
/// before any SMTP traffic is exchanged (implicit TLS, usually port 465).
///
/// The connect and the handshake together are bounded by the connect
/// timeout.
///
/// # Errors
///
/// Returns `ClientError::Timeout` if the deadline passes, `ClientError::Io`
/// if the connection fails and `ClientError::Tls` if the handshake or
/// certificate validation fails.
#[tracing::instrument(skip(timeouts))]
pub async fn connect_tls(
    host: &str,
    port: u16,
    timeouts: &ClientTimeouts,
) -> Result<TlsStream<TcpStream>> {
    let connector = TlsConnector::from(Arc::new(tls_config()?));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ClientError::Tls(format!("Invalid domain: {e}")))?;

    let handshake = async {
        let stream = TcpStream::connect((host, port)).await?;
        internal!(level = DEBUG, "Connected to {host}:{port}, starting TLS");

        connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::Tls(e.to_string()))
    };

    tokio::time::timeout(timeouts.connect(), handshake)
        .await
        .map_err(|_| ClientError::Timeout { step: "connect" })?
}
