// HTTP services — registry, relay and user nodes over hyper
//
// Every node is one hyper server on its topology address. Request bodies
// are parsed into the core wire schemas before anything else happens;
// failures come back as `{"success": false, "error": ...}` with a status
// code that says whose fault it was.

use futures::future::{BoxFuture, FutureExt};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use onionrelay_core::crypto::CryptoError;
use onionrelay_core::directory::{Directory, DirectoryError, MemoryDirectory, RelayRecord};
use onionrelay_core::privacy::CircuitError;
use onionrelay_core::relay::{
    parse_request, routes, DeliverRequest, NodeRegistryResponse, OnionRouter,
    RegisterNodeRequest, ResultResponse, SendMessageRequest, StatusResponse, STATUS_LIVE,
};
use onionrelay_core::topology::{Topology, TopologyError};
use onionrelay_core::transport::Transport;
use onionrelay_core::user::{SendError, UserNode};
use onionrelay_core::KeyPair;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;

pub type ServeFuture = BoxFuture<'static, Result<(), hyper::Error>>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Relay {id} failed to register: {source}")]
    Registration { id: u32, source: DirectoryError },
    #[error("Key generation failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Key generation task failed: {0}")]
    KeyTask(#[from] JoinError),
    #[error("Invalid address: {0}")]
    Address(#[from] TopologyError),
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: hyper::Error },
}

/// What sits behind one listening socket
pub enum NodeService {
    Registry(Arc<MemoryDirectory>),
    Relay(Arc<OnionRouter>),
    User(Arc<UserNode>),
}

// ============================================================================
// STARTUP
// ============================================================================

/// Bind the registry. The returned future serves until the process exits.
pub fn start_registry(topology: &Topology) -> Result<(Arc<MemoryDirectory>, ServeFuture), ServiceError> {
    let directory = Arc::new(MemoryDirectory::new());
    let addr = topology.registry_addr();
    let serve = bind(addr, NodeService::Registry(directory.clone()))?;
    tracing::info!("Registry listening on {}", addr);
    Ok((directory, serve))
}

/// Generate keys, register with the directory, then bind.
///
/// A relay that cannot register must not start: nobody could route to it.
pub async fn start_relay(
    id: u32,
    topology: &Topology,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
) -> Result<(Arc<OnionRouter>, ServeFuture), ServiceError> {
    let addr = topology.resolve(topology.relay_address(id))?;
    let router = Arc::new(OnionRouter::new(id, generate_keys().await?, transport));

    directory
        .register(RelayRecord::new(id, router.public_key()?))
        .await
        .map_err(|source| ServiceError::Registration { id, source })?;

    let serve = bind(addr, NodeService::Relay(router.clone()))?;
    tracing::info!(
        "Relay {} listening on {} (key {})",
        id,
        addr,
        router.fingerprint()?
    );
    Ok((router, serve))
}

/// RSA keygen takes long enough to stall the runtime; run it off-thread
async fn generate_keys() -> Result<KeyPair, ServiceError> {
    Ok(tokio::task::spawn_blocking(KeyPair::generate).await??)
}

pub fn start_user(
    id: u32,
    topology: &Topology,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
) -> Result<(Arc<UserNode>, ServeFuture), ServiceError> {
    let user = Arc::new(UserNode::new(id, topology.clone(), directory, transport));
    let addr = topology.resolve(user.address())?;
    let serve = bind(addr, NodeService::User(user.clone()))?;
    tracing::info!("User {} listening on {}", id, addr);
    Ok((user, serve))
}

/// Bind synchronously so that the socket accepts connections before the
/// caller moves on; serving happens when the future is polled.
fn bind(addr: SocketAddr, service: NodeService) -> Result<ServeFuture, ServiceError> {
    let service = Arc::new(service);
    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle_request(req, service.clone()))) }
    });

    let server = Server::try_bind(&addr)
        .map_err(|source| ServiceError::Bind { addr, source })?
        .serve(make_svc);
    Ok(server.boxed())
}

// ============================================================================
// ROUTING
// ============================================================================

pub async fn handle_request(
    req: Request<Body>,
    service: Arc<NodeService>,
) -> Result<Response<Body>, Infallible> {
    if req.method() == Method::GET && req.uri().path() == routes::STATUS {
        return Ok(text_response(StatusCode::OK, STATUS_LIVE));
    }

    let response = match service.as_ref() {
        NodeService::Registry(directory) => handle_registry(req, directory).await,
        NodeService::Relay(router) => handle_relay(req, router).await,
        NodeService::User(user) => handle_user(req, user).await,
    };
    Ok(response)
}

async fn handle_registry(req: Request<Body>, directory: &MemoryDirectory) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, routes::REGISTER_NODE) => {
            let request: RegisterNodeRequest = match read_json(req).await {
                Ok(request) => request,
                Err(response) => return response,
            };
            match directory.register(request.into()).await {
                Ok(()) => json_response(StatusCode::OK, &StatusResponse::ok()),
                Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
            }
        }
        (&Method::GET, routes::NODE_REGISTRY) => match directory.list().await {
            Ok(relays) => json_response(StatusCode::OK, &NodeRegistryResponse { relays }),
            Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
        _ => not_found(),
    }
}

async fn handle_relay(req: Request<Body>, router: &OnionRouter) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, routes::MESSAGE) => {
            let request: DeliverRequest = match read_json(req).await {
                Ok(request) => request,
                Err(response) => return response,
            };
            match router.handle_envelope(request.message).await {
                Ok(_) => json_response(StatusCode::OK, &StatusResponse::ok()),
                Err(e) if e.is_client_error() => failure(StatusCode::BAD_REQUEST, e),
                Err(e) => failure(StatusCode::BAD_GATEWAY, e),
            }
        }
        (&Method::GET, routes::LAST_RECEIVED_ENCRYPTED) => json_response(
            StatusCode::OK,
            &ResultResponse::new(router.observation().last_received_encrypted),
        ),
        (&Method::GET, routes::LAST_RECEIVED_DECRYPTED) => json_response(
            StatusCode::OK,
            &ResultResponse::new(router.observation().last_received_decrypted),
        ),
        (&Method::GET, routes::LAST_DESTINATION) => json_response(
            StatusCode::OK,
            &ResultResponse::new(router.observation().last_destination),
        ),
        (&Method::GET, routes::PRIVATE_KEY) => match router.private_key() {
            Ok(key) => json_response(StatusCode::OK, &ResultResponse::new(Some(key))),
            Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
        _ => not_found(),
    }
}

async fn handle_user(req: Request<Body>, user: &UserNode) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, routes::MESSAGE) => {
            let request: DeliverRequest = match read_json(req).await {
                Ok(request) => request,
                Err(response) => return response,
            };
            user.receive(request.message);
            json_response(StatusCode::OK, &StatusResponse::ok())
        }
        (&Method::POST, routes::SEND_MESSAGE) => {
            let request: SendMessageRequest = match read_json(req).await {
                Ok(request) => request,
                Err(response) => return response,
            };
            match user
                .send_message(&request.message, request.destination_id)
                .await
            {
                Ok(_) => json_response(StatusCode::OK, &StatusResponse::ok()),
                Err(e) => failure(send_error_status(&e), e),
            }
        }
        (&Method::GET, routes::LAST_RECEIVED_MESSAGE) => json_response(
            StatusCode::OK,
            &ResultResponse::new(user.observation().last_received_message),
        ),
        (&Method::GET, routes::LAST_SENT_MESSAGE) => json_response(
            StatusCode::OK,
            &ResultResponse::new(user.observation().last_sent_message),
        ),
        (&Method::GET, routes::LAST_CIRCUIT) => json_response(
            StatusCode::OK,
            &ResultResponse::new(user.observation().last_circuit),
        ),
        _ => not_found(),
    }
}

fn send_error_status(error: &SendError) -> StatusCode {
    match error {
        SendError::Circuit(CircuitError::InsufficientRelays { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SendError::Circuit(_) => StatusCode::INTERNAL_SERVER_ERROR,
        // A bad key or an unreachable hop is somebody else's fault
        SendError::Directory(_) | SendError::Onion(_) | SendError::Transport(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, Response<Body>> {
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| failure(StatusCode::BAD_REQUEST, e))?;
    parse_request(&body).map_err(|e| {
        tracing::debug!("Rejected request: {}", e);
        failure(StatusCode::BAD_REQUEST, e)
    })
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(json) => {
            let mut response = Response::new(Body::from(json));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)),
    }
}

fn text_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn failure(status: StatusCode, error: impl Display) -> Response<Body> {
    json_response(status, &StatusResponse::failed(error.to_string()))
}

fn not_found() -> Response<Body> {
    text_response(StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{fetch_result, is_live, send_via_user, HttpDirectory, HttpTransport};
    use onionrelay_core::{LocalOverlay, NodeAddress};
    use std::net::{IpAddr, Ipv4Addr};

    fn get(route: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(route)
            .body(Body::empty())
            .unwrap()
    }

    fn post(route: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(route)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(service: &Arc<NodeService>, req: Request<Body>) -> (StatusCode, String) {
        let resp = handle_request(req, service.clone()).await.unwrap();
        let status = resp.status();
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_status_is_live_everywhere() {
        let overlay = LocalOverlay::default();
        let relay = overlay.add_relay(1).await.unwrap();
        let user = overlay.add_user(1).unwrap();

        for service in [
            NodeService::Registry(overlay.directory()),
            NodeService::Relay(relay),
            NodeService::User(user),
        ] {
            let service = Arc::new(service);
            assert_eq!(
                call(&service, get("/status")).await,
                (StatusCode::OK, "live".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_registry_register_and_list() {
        let service = Arc::new(NodeService::Registry(Arc::new(MemoryDirectory::new())));

        let (status, body) = call(
            &service,
            post("/registerNode", r#"{"id":1,"publicKey":"k1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"success":true}"#);

        let (status, body) = call(&service, get("/getNodeRegistry")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"relays":[{"id":1,"publicKey":"k1"}]}"#);
    }

    #[tokio::test]
    async fn test_malformed_bodies_rejected() {
        let service = Arc::new(NodeService::Registry(Arc::new(MemoryDirectory::new())));
        let (status, body) = call(&service, post("/registerNode", r#"{"id":"one"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains(r#""success":false"#));

        let overlay = LocalOverlay::default();
        let user = Arc::new(NodeService::User(overlay.add_user(1).unwrap()));
        let (status, _) = call(&user, post("/sendMessage", r#"{"message":"hi"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_route_and_method() {
        let service = Arc::new(NodeService::Registry(Arc::new(MemoryDirectory::new())));
        assert_eq!(call(&service, get("/nope")).await.0, StatusCode::NOT_FOUND);
        assert_eq!(
            call(&service, get("/registerNode")).await.0,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_relay_routes() {
        let overlay = LocalOverlay::default();
        let relay = overlay.add_relay(1).await.unwrap();
        let service = Arc::new(NodeService::Relay(relay.clone()));

        let (_, body) = call(&service, get("/getLastMessageDestination")).await;
        assert_eq!(body, r#"{"result":null}"#);

        // Garbage is a client error and is still recorded
        let (status, _) = call(&service, post("/message", r#"{"message":"garbage"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, body) = call(&service, get("/getLastReceivedEncryptedMessage")).await;
        assert_eq!(body, r#"{"result":"garbage"}"#);

        let (status, body) = call(&service, get("/getPrivateKey")).await;
        assert_eq!(status, StatusCode::OK);
        let key: ResultResponse<String> = serde_json::from_str(&body).unwrap();
        assert_eq!(key.result, Some(relay.private_key().unwrap()));
    }

    #[tokio::test]
    async fn test_user_routes_over_local_overlay() {
        let overlay = LocalOverlay::default();
        for id in 1..=3 {
            overlay.add_relay(id).await.unwrap();
        }
        let sender = Arc::new(NodeService::User(overlay.add_user(1).unwrap()));
        let recipient = Arc::new(NodeService::User(overlay.add_user(7).unwrap()));

        let (status, body) = call(
            &sender,
            post("/sendMessage", r#"{"message":"hello","destinationId":7}"#),
        )
        .await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, r#"{"success":true}"#));

        let (_, body) = call(&recipient, get("/getLastReceivedMessage")).await;
        assert_eq!(body, r#"{"result":"hello"}"#);
        let (_, body) = call(&sender, get("/getLastSentMessage")).await;
        assert_eq!(body, r#"{"result":"hello"}"#);

        let (_, body) = call(&sender, get("/getLastCircuit")).await;
        let circuit: ResultResponse<Vec<u32>> = serde_json::from_str(&body).unwrap();
        assert_eq!(circuit.result.map(|ids| ids.len()), Some(3));

        // Plain delivery
        let (status, _) = call(&recipient, post("/message", r#"{"message":"direct"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&recipient, get("/getLastReceivedMessage")).await;
        assert_eq!(body, r#"{"result":"direct"}"#);
    }

    #[tokio::test]
    async fn test_send_with_too_few_relays_is_unavailable() {
        let overlay = LocalOverlay::default();
        overlay.add_relay(1).await.unwrap();
        let sender = Arc::new(NodeService::User(overlay.add_user(1).unwrap()));

        let (status, body) = call(
            &sender,
            post("/sendMessage", r#"{"message":"hello","destinationId":2}"#),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("Not enough relays"));
    }

    #[tokio::test]
    async fn test_relay_start_fails_without_registry() {
        let topology = Topology {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            registry_port: 47_999,
            relay_base_port: 47_900,
            user_base_port: 47_800,
        };
        let result = start_relay(
            1,
            &topology,
            Arc::new(HttpDirectory::new(topology.registry_addr())),
            Arc::new(HttpTransport::new(topology.clone())),
        )
        .await;
        assert!(matches!(result, Err(ServiceError::Registration { id: 1, .. })));
    }

    #[tokio::test]
    async fn test_relay_keygen_leaves_runtime_free() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let topology = Topology {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            registry_port: 47_799,
            relay_base_port: 47_700,
            user_base_port: 47_650,
        };
        let directory = Arc::new(MemoryDirectory::new());

        // Single-threaded runtime: the counter only moves if start_relay yields
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            }
        });

        let (router, _serve) = start_relay(
            1,
            &topology,
            directory.clone(),
            Arc::new(HttpTransport::new(topology.clone())),
        )
        .await
        .unwrap();
        ticker.abort();

        assert!(ticks.load(Ordering::Relaxed) > 0);
        assert_eq!(
            directory.list().await.unwrap(),
            vec![RelayRecord::new(1, router.public_key().unwrap())]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_http_overlay_end_to_end() {
        let topology = Topology {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            registry_port: 47_600,
            relay_base_port: 47_500,
            user_base_port: 47_400,
        };
        let directory: Arc<dyn Directory> = Arc::new(HttpDirectory::new(topology.registry_addr()));
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(topology.clone()));

        let (_, serve) = start_registry(&topology).unwrap();
        tokio::spawn(serve);
        assert!(is_live(topology.registry_addr()).await);

        for id in 1..=3 {
            let (_, serve) = start_relay(id, &topology, directory.clone(), transport.clone())
                .await
                .unwrap();
            tokio::spawn(serve);
        }
        for id in [1, 7] {
            let (_, serve) = start_user(id, &topology, directory.clone(), transport.clone()).unwrap();
            tokio::spawn(serve);
        }

        send_via_user(&topology, 1, 7, "hello").await.unwrap();

        let user_addr = topology.resolve(topology.user_address(7)).unwrap();
        let received: Option<String> = fetch_result(user_addr, routes::LAST_RECEIVED_MESSAGE)
            .await
            .unwrap();
        assert_eq!(received.as_deref(), Some("hello"));

        let sender_addr = topology.resolve(topology.user_address(1)).unwrap();
        let circuit: Option<Vec<u32>> = fetch_result(sender_addr, routes::LAST_CIRCUIT)
            .await
            .unwrap();
        let circuit = circuit.unwrap();

        // The exit relay resolved the destination user's address
        let exit_addr = topology
            .resolve(topology.relay_address(circuit[2]))
            .unwrap();
        let destination: Option<NodeAddress> = fetch_result(exit_addr, routes::LAST_DESTINATION)
            .await
            .unwrap();
        assert_eq!(destination, Some(topology.user_address(7)));
    }
}
