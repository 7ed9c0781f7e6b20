// ABOUTME: HTTP upgrade handshake that turns a TCP (or TLS) socket into a connector session
//
// The client sends a bodiless POST carrying `Upgrade: GRIDAPICONNECTOR` and two
// random correlation ids, then expects `HTTP/1.1 101`. Any other status is a
// dial failure carrying the server's status text.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::config::ConnectorConfig;
use super::error::{ConnectorError, ConnectorResult};

/// Value of the `Upgrade` header on both sides of the exchange
pub const UPGRADE_PROTOCOL: &str = "GRIDAPICONNECTOR";

/// Status code that accepts the upgrade
pub const SWITCHING_PROTOCOLS: u16 = 101;

const STATUS_PREFIX: &str = "HTTP/1.1 ";
const MAX_LINE_LEN: usize = 8 * 1024;

/// Any duplex byte stream a session can run over
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased transport (plain TCP, TLS, or an in-memory pipe)
pub type BoxedTransport = Box<dyn Transport>;

/// Details of an accepted upgrade
#[derive(Debug, Clone)]
pub struct Upgrade {
    /// Value sent as `X-Request-ID`
    pub request_id: Uuid,
    /// Value sent as `X-Request-RNDID`
    pub random_id: Uuid,
    /// Response headers, keys lowercased
    pub headers: HashMap<String, String>,
}

/// Build the connector URL for an endpoint
///
/// A trailing slash is ensured before the connector path is appended.
pub fn connector_url(endpoint: &str, connector_path: &str) -> ConnectorResult<Url> {
    let mut raw = endpoint.to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    raw.push_str(connector_path);

    let url = Url::parse(&raw).map_err(|e| ConnectorError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConnectorError::UnsupportedScheme(other.to_string())),
    }
}

/// Form-encoded path and query used as the request target
///
/// `!`, `(` and `)` stay literal, as the connector servers expect.
pub fn request_target(url: &Url) -> String {
    let mut path_and_query = url.path().to_string();
    if let Some(query) = url.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }
    // Each escaped byte is yielded as its own chunk
    url::form_urlencoded::byte_serialize(path_and_query.as_bytes())
        .map(|chunk| match chunk {
            "%21" => "!",
            "%28" => "(",
            "%29" => ")",
            other => other,
        })
        .collect()
}

/// Open a socket to `endpoint`, secure it if needed and perform the upgrade
///
/// On failure the socket is dropped, which closes it.
pub async fn dial(
    endpoint: &str,
    config: &ConnectorConfig,
    tls: Option<&Arc<ClientConfig>>,
) -> ConnectorResult<BufReader<BoxedTransport>> {
    let url = connector_url(endpoint, &config.connector_path)?;
    let host = url
        .host_str()
        .ok_or_else(|| ConnectorError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "missing host".to_string(),
        })?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ConnectorError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "missing port".to_string(),
        })?;

    debug!("Dialing {host}:{port} for {url}");
    let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| ConnectorError::ConnectTimeout {
            host: host.clone(),
            port,
            timeout: config.connect_timeout,
        })??;
    tcp.set_nodelay(true)?;

    let transport: BoxedTransport = if url.scheme() == "https" {
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| ConnectorError::Tls(format!("invalid server name '{host}': {e}")))?;
        let stream = tls_connector(tls)
            .connect(server_name, tcp)
            .await
            .map_err(|e| ConnectorError::Tls(e.to_string()))?;
        Box::new(stream)
    } else {
        Box::new(tcp)
    };

    let mut stream = BufReader::new(transport);
    upgrade(&mut stream, &request_target(&url)).await?;
    Ok(stream)
}

/// Run the upgrade exchange over an already-open stream
pub async fn upgrade<S>(stream: &mut BufReader<S>, target: &str) -> ConnectorResult<Upgrade>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request_id = Uuid::new_v4();
    let random_id = Uuid::new_v4();
    debug!("Upgrade request {request_id} (rnd {random_id}) for {target}");

    let request = format!(
        "POST {target} HTTP/1.1\r\n\
         X-Request-ID: {request_id}\r\n\
         X-Request-RNDID: {random_id}\r\n\
         Upgrade: {UPGRADE_PROTOCOL}\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let status_line = read_line(stream).await?;
    let Some(status_text) = status_line.strip_prefix(STATUS_PREFIX) else {
        return Err(ConnectorError::InvalidProtocol);
    };
    let status_text = status_text.to_string();

    let mut headers = HashMap::new();
    loop {
        let line = read_line(stream).await?;
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(": ")
            .ok_or_else(|| ConnectorError::MalformedHeader(line.clone()))?;
        headers.insert(key.to_lowercase(), value.to_string());
    }

    if let Some(length) = headers.get("content-length") {
        let length: u64 = length
            .trim()
            .parse()
            .map_err(|_| ConnectorError::MalformedHeader(format!("content-length: {length}")))?;
        let drained = tokio::io::copy(&mut (&mut *stream).take(length), &mut tokio::io::sink()).await?;
        if drained != length {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
    }

    let status: u16 = status_line
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| ConnectorError::MalformedHeader(status_line.clone()))?;
    if status != SWITCHING_PROTOCOLS {
        return Err(ConnectorError::Status(status_text));
    }

    debug!("Upgrade {request_id} accepted");
    Ok(Upgrade {
        request_id,
        random_id,
        headers,
    })
}

/// Read one LF-terminated line, dropping carriage returns
async fn read_line<S>(stream: &mut BufReader<S>) -> ConnectorResult<String>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = u64::try_from(MAX_LINE_LEN + 1).unwrap_or(u64::MAX);
    (&mut *stream).take(limit).read_until(b'\n', &mut buf).await?;

    if buf.last() != Some(&b'\n') {
        if buf.len() > MAX_LINE_LEN {
            return Err(ConnectorError::MalformedHeader("line too long".to_string()));
        }
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    buf.retain(|b| *b != b'\r' && *b != b'\n');
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn tls_connector(custom: Option<&Arc<ClientConfig>>) -> TlsConnector {
    let config = custom.map_or_else(
        || {
            let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        },
        Arc::clone,
    );
    TlsConnector::from(config)
}
