use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use uptime_core::models::{CheckResult, Monitor};

use super::{Checker, elapsed_ms, probe_timeout, target_host, target_port};

pub const EXPIRY_WARNING_DAYS: i64 = 7;
const DEFAULT_TLS_PORT: u16 = 443;

/// Handshakes and reads the leaf certificate's `notAfter`.
pub struct SslChecker;

/// Accepts any chain so expired or self-signed certificates can still be
/// inspected. Handshake signatures are still verified.
#[derive(Debug)]
struct InspectOnly(Arc<CryptoProvider>);

impl ServerCertVerifier for InspectOnly {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn connector() -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InspectOnly(provider)))
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

impl SslChecker {
    async fn peer_not_after(host: &str, port: u16) -> Result<DateTime<Utc>> {
        let tcp = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("connection to {host}:{port} failed"))?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| anyhow!("invalid server name {host}: {e}"))?;
        let tls = connector()?
            .connect(server_name, tcp)
            .await
            .with_context(|| format!("TLS handshake with {host}:{port} failed"))?;

        let (_, session) = tls.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| anyhow!("{host} presented no certificate"))?;
        let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| anyhow!("unreadable certificate from {host}: {e}"))?;
        DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| anyhow!("certificate from {host} has an out of range expiry"))
    }
}

#[async_trait]
impl Checker for SslChecker {
    async fn check(&self, monitor: &Monitor) -> Result<CheckResult> {
        let host = target_host(&monitor.target);
        let port = monitor
            .port
            .or_else(|| target_port(&monitor.target))
            .unwrap_or(DEFAULT_TLS_PORT);

        let started = Instant::now();
        let not_after = timeout(probe_timeout(monitor), Self::peer_not_after(&host, port))
            .await
            .map_err(|_| anyhow!("TLS handshake with {host}:{port} timed out"))??;
        Ok(evaluate_expiry(not_after, Utc::now(), elapsed_ms(started)))
    }
}

/// Whole days left, rounded down. Expired certificates report a negative count.
pub fn evaluate_expiry(
    not_after: DateTime<Utc>,
    now: DateTime<Utc>,
    response_time_ms: u64,
) -> CheckResult {
    let days = (not_after - now).num_seconds().div_euclid(86_400);
    if not_after <= now {
        return CheckResult::down(
            format!("SSL certificate expired on {}", not_after.format("%Y-%m-%d")),
            response_time_ms,
        )
        .with_ssl_expiry_days(days);
    }

    let result = CheckResult::up(response_time_ms).with_ssl_expiry_days(days);
    if days <= EXPIRY_WARNING_DAYS {
        result.with_warning(format!("SSL certificate expires in {days} days"))
    } else {
        result
    }
}
