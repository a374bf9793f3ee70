//! In-process HTTP server used by unit tests to stand in for the API and the exception collector.
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    Router,
};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

type Responder = dyn Fn(usize, &RecordedRequest) -> (StatusCode, String) + Send + Sync;

struct ServerState {
    requests: Mutex<Vec<RecordedRequest>>,
    responder: Box<Responder>,
}

pub(crate) struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    /// Start a server that answers `200 {}` to everything.
    pub fn ok() -> TestServer {
        TestServer::start(|_, _| (StatusCode::OK, "{}".to_owned()))
    }

    /// Start a server whose response is computed from the zero-based request index and the
    /// request itself.
    pub fn start(
        responder: impl Fn(usize, &RecordedRequest) -> (StatusCode, String) + Send + Sync + 'static,
    ) -> TestServer {
        let _ = env_logger::builder().is_test(true).try_init();

        let state = Arc::new(ServerState {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        });

        // Binding synchronously so the port accepts connections before `start` returns.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });

        TestServer { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let request = RecordedRequest {
        method,
        path: uri.path().to_owned(),
        headers,
        body,
    };

    let mut requests = state.requests.lock().unwrap();
    let response = (state.responder)(requests.len(), &request);
    requests.push(request);
    response
}
