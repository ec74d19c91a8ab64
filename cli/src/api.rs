// HTTP clients for the overlay services
//
// HttpDirectory and HttpTransport put the core Directory/Transport traits
// on top of the registry, relay and user HTTP routes. The remaining
// functions back the CLI commands that talk to running nodes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use onionrelay_core::directory::{Directory, DirectoryError, RelayRecord};
use onionrelay_core::relay::{
    routes, DeliverRequest, NodeRegistryResponse, RegisterNodeRequest, ResultResponse,
    SendMessageRequest, StatusResponse, STATUS_LIVE,
};
use onionrelay_core::topology::{NodeAddress, Topology};
use onionrelay_core::transport::{Transport, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;

fn json_request<T: Serialize>(
    method: Method,
    addr: SocketAddr,
    route: &str,
    body: &T,
) -> Result<Request<Body>> {
    let json = serde_json::to_vec(body)?;
    Ok(Request::builder()
        .method(method)
        .uri(format!("http://{}{}", addr, route))
        .header("content-type", "application/json")
        .body(Body::from(json))?)
}

fn get_request(addr: SocketAddr, route: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(Method::GET)
        .uri(format!("http://{}{}", addr, route))
        .body(Body::empty())?)
}

/// Send a request and collect status and body
async fn exchange(
    client: &Client<HttpConnector>,
    req: Request<Body>,
) -> Result<(StatusCode, hyper::body::Bytes), hyper::Error> {
    let resp = client.request(req).await?;
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body()).await?;
    Ok((status, body))
}

// ============================================================================
// DIRECTORY
// ============================================================================

/// The registry service as a [`Directory`]
#[derive(Clone)]
pub struct HttpDirectory {
    client: Client<HttpConnector>,
    registry: SocketAddr,
}

impl HttpDirectory {
    pub fn new(registry: SocketAddr) -> Self {
        Self {
            client: Client::new(),
            registry,
        }
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn register(&self, record: RelayRecord) -> Result<(), DirectoryError> {
        let req = json_request(
            Method::POST,
            self.registry,
            routes::REGISTER_NODE,
            &RegisterNodeRequest::from(record),
        )
        .map_err(|e| DirectoryError::Rejected(e.to_string()))?;

        let (status, body) = exchange(&self.client, req)
            .await
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;
        if !status.is_success() {
            return Err(DirectoryError::Rejected(format!(
                "{}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        let response: StatusResponse = serde_json::from_slice(&body)
            .map_err(|e| DirectoryError::MalformedResponse(e.to_string()))?;
        if response.success {
            Ok(())
        } else {
            Err(DirectoryError::Rejected(
                response.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }

    async fn list(&self) -> Result<Vec<RelayRecord>, DirectoryError> {
        let req = get_request(self.registry, routes::NODE_REGISTRY)
            .map_err(|e| DirectoryError::Rejected(e.to_string()))?;

        let (status, body) = exchange(&self.client, req)
            .await
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;
        if !status.is_success() {
            return Err(DirectoryError::Rejected(status.to_string()));
        }

        let response: NodeRegistryResponse = serde_json::from_slice(&body)
            .map_err(|e| DirectoryError::MalformedResponse(e.to_string()))?;
        Ok(response.relays)
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Delivers to `POST /message` on whichever node owns the address
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector>,
    topology: Topology,
}

impl HttpTransport {
    pub fn new(topology: Topology) -> Self {
        Self {
            client: Client::new(),
            topology,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, to: NodeAddress, message: String) -> Result<(), TransportError> {
        let addr = self.topology.resolve(to)?;
        let req = json_request(Method::POST, addr, routes::MESSAGE, &DeliverRequest { message })
            .map_err(|e| TransportError::ConnectionFailed {
                address: to,
                reason: e.to_string(),
            })?;

        let (status, body) =
            exchange(&self.client, req)
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    address: to,
                    reason: e.to_string(),
                })?;

        if status.is_success() {
            Ok(())
        } else {
            let reason = serde_json::from_slice::<StatusResponse>(&body)
                .ok()
                .and_then(|response| response.error)
                .unwrap_or_else(|| status.to_string());
            Err(TransportError::Rejected {
                address: to,
                reason,
            })
        }
    }
}

// ============================================================================
// CLI HELPERS
// ============================================================================

/// Check whether a service answers its liveness probe
pub async fn is_live(addr: SocketAddr) -> bool {
    let client = Client::new();
    let Ok(req) = get_request(addr, routes::STATUS) else {
        return false;
    };
    match exchange(&client, req).await {
        Ok((status, body)) => status.is_success() && body.as_ref() == STATUS_LIVE.as_bytes(),
        Err(_) => false,
    }
}

/// Ask a running user node to send a message through the overlay
pub async fn send_via_user(
    topology: &Topology,
    from: u32,
    destination_id: u32,
    message: &str,
) -> Result<()> {
    let addr = topology.resolve(topology.user_address(from))?;
    let req = json_request(
        Method::POST,
        addr,
        routes::SEND_MESSAGE,
        &SendMessageRequest {
            message: message.to_string(),
            destination_id,
        },
    )?;

    let (status, body) = exchange(&Client::new(), req)
        .await
        .with_context(|| format!("User {} is not reachable at {}", from, addr))?;
    let response: StatusResponse = serde_json::from_slice(&body)
        .with_context(|| format!("Unexpected response ({})", status))?;

    if response.success {
        Ok(())
    } else {
        anyhow::bail!(
            "Failed to send message: {}",
            response
                .error
                .unwrap_or_else(|| "Unknown error".to_string())
        )
    }
}

/// Read one introspection route
pub async fn fetch_result<T: DeserializeOwned>(addr: SocketAddr, route: &str) -> Result<Option<T>> {
    let req = get_request(addr, route)?;
    let (status, body) = exchange(&Client::new(), req)
        .await
        .with_context(|| format!("{} is not reachable", addr))?;

    if !status.is_success() {
        anyhow::bail!(
            "Request failed with status {}: {}",
            status,
            String::from_utf8_lossy(&body)
        );
    }

    let response: ResultResponse<T> =
        serde_json::from_slice(&body).context("Failed to parse introspection response")?;
    Ok(response.result)
}

/// Relay listing straight from the registry
pub async fn fetch_registry(topology: &Topology) -> Result<Vec<RelayRecord>> {
    HttpDirectory::new(topology.registry_addr())
        .list()
        .await
        .context("Failed to read the node registry")
}
