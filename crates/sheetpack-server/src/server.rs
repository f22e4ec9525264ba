//! Development server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::sync::RwLock;
use tower_http::compression::CompressionLayer;

use sheetpack_bundle::{error_page, BuildError, Compilation, Compiler, PipelineConfig};

use crate::watcher::FileWatcher;
use crate::websocket::{next_message, HmrHub, HmrMessage};

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(SocketAddr, String),

    #[error("File watch error: {0}")]
    WatchError(String),

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// What the server currently serves.
pub struct ServerState {
    /// Last successful compilation
    pub compilation: Option<Compilation>,

    /// Message of the last failed compilation, cleared by the next success
    pub error: Option<String>,

    pub hmr: HmrHub,
}

impl ServerState {
    fn new() -> Self {
        Self {
            compilation: None,
            error: None,
            hmr: HmrHub::new(),
        }
    }

    /// Artifact bytes and content type for a request path.
    pub fn lookup(&self, path: &str) -> Option<(&'static str, Vec<u8>)> {
        let compilation = self.compilation.as_ref()?;
        let name = path.trim_start_matches('/');
        let name = if name.is_empty() {
            compilation.html.name.as_str()
        } else {
            name
        };

        compilation
            .get(name)
            .map(|artifact| (content_type(&artifact.name), artifact.bytes.clone()))
    }
}

pub type SharedState = Arc<RwLock<ServerState>>;

/// Development server.
pub struct DevServer {
    config: Arc<PipelineConfig>,
    compiler: Compiler,
}

impl DevServer {
    /// Create a new development server.
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        let compiler = Compiler::new(Arc::clone(&config)).with_hot(config.dev_server.hot);
        Self { config, compiler }
    }

    /// Run the first compilation.
    ///
    /// Lint and transform errors are kept in the state and shown in the
    /// browser; every other error stops the server from starting.
    pub async fn initial_state(&self) -> Result<SharedState, ServerError> {
        let mut state = ServerState::new();

        match compile(&self.compiler).await {
            Ok(compilation) => {
                tracing::info!(
                    "Compiled {} modules in {}ms",
                    compilation.modules.len(),
                    compilation.duration_ms
                );
                state.compilation = Some(compilation);
            }
            Err(e) if e.is_recoverable() => {
                tracing::error!("{}", e);
                state.error = Some(e.to_string());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Arc::new(RwLock::new(state)))
    }

    /// Start the development server.
    pub async fn start(self) -> Result<(), ServerError> {
        let options = &self.config.dev_server;
        let addr: SocketAddr = format!("{}:{}", options.host, options.port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", options.host, options.port)))?;

        let state = self.initial_state().await?;

        let (watcher, mut rx) = FileWatcher::new(&[self.config.context.clone()])
            .map_err(|e| ServerError::WatchError(e.to_string()))?;

        let compiler = self.compiler.clone();
        let state_clone = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                for event in &batch {
                    tracing::info!("{}", event);
                }
                rebuild(&compiler, &state_clone).await;
            }
            // Keep watcher alive
            drop(watcher);
        });

        let app = router(state, options.compress);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        let url = format!("http://{}", addr);
        tracing::info!("Dev server running at {}", url);

        if options.open {
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        }

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        Ok(())
    }
}

/// Routes: `/` and every artifact from memory, `/__hmr` for updates.
pub fn router(state: SharedState, compress: bool) -> Router {
    let router = Router::new()
        .route("/", get(index_handler))
        .route("/__hmr", get(ws_handler))
        .fallback(artifact_handler)
        .with_state(state);

    if compress {
        router.layer(CompressionLayer::new())
    } else {
        router
    }
}

async fn compile(compiler: &Compiler) -> Result<Compilation, BuildError> {
    let compiler = compiler.clone();
    tokio::task::spawn_blocking(move || compiler.compile())
        .await
        .map_err(|e| BuildError::WriteError(format!("build task failed: {}", e)))?
}

/// Recompile after a change and tell the clients what changed. A failed
/// compilation keeps the previous artifacts and is reported as an error.
pub async fn rebuild(compiler: &Compiler, state: &SharedState) {
    let result = compile(compiler).await;
    let mut state = state.write().await;

    match result {
        Ok(next) => {
            let recovering = state.error.take().is_some();
            let messages = updates(state.compilation.as_ref(), &next, recovering);
            tracing::info!(
                "Rebuilt {} modules in {}ms",
                next.modules.len(),
                next.duration_ms
            );
            state.compilation = Some(next);
            for message in messages {
                state.hmr.send(message);
            }
        }
        Err(e) => {
            tracing::error!("{}", e);
            let message = e.to_string();
            state.error = Some(message.clone());
            state.hmr.send(HmrMessage::Error { message });
        }
    }
}

/// Messages that bring a client from `previous` to `next`.
fn updates(previous: Option<&Compilation>, next: &Compilation, recovering: bool) -> Vec<HmrMessage> {
    let Some(previous) = previous else {
        return vec![HmrMessage::Reload];
    };

    if previous.html != next.html || previous.assets != next.assets {
        return vec![HmrMessage::Reload];
    }

    let mut messages = Vec::new();

    if previous.stylesheet != next.stylesheet {
        match &next.stylesheet {
            Some(stylesheet) => messages.push(HmrMessage::CssUpdate {
                href: format!("/{}", stylesheet.name),
            }),
            None => return vec![HmrMessage::Reload],
        }
    }

    let modules: std::collections::BTreeMap<String, String> = next
        .modules
        .iter()
        .filter(|(id, body)| previous.modules.get(*id) != Some(*body))
        .map(|(id, body)| (id.clone(), body.clone()))
        .collect();

    if !modules.is_empty() || (recovering && messages.is_empty()) {
        messages.push(HmrMessage::Update { modules });
    }

    messages
}

/// Handler for the index page.
async fn index_handler(State(state): State<SharedState>) -> Response {
    let state = state.read().await;

    if let Some((content_type, bytes)) = state.lookup("/") {
        return ([(header::CONTENT_TYPE, content_type)], bytes).into_response();
    }

    let message = state.error.as_deref().unwrap_or("Build has not finished yet");
    Html(error_page(message)).into_response()
}

/// Handler for every other artifact.
async fn artifact_handler(State(state): State<SharedState>, uri: Uri) -> Response {
    let state = state.read().await;

    match state.lookup(uri.path()) {
        Some((content_type, bytes)) => (
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-store"),
            ],
            bytes,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

/// Handler for the HMR WebSocket endpoint.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_ws(mut socket: WebSocket, state: SharedState) {
    let (mut rx, error) = {
        let state = state.read().await;
        (state.hmr.subscribe(), state.error.clone())
    };

    let mut greeting = vec![HmrMessage::Connected];
    if let Some(message) = error {
        greeting.push(HmrMessage::Error { message });
    }

    for message in greeting {
        if send(&mut socket, &message).await.is_err() {
            return;
        }
    }

    // Forward HMR messages to the client
    while let Some(message) = next_message(&mut rx).await {
        if send(&mut socket, &message).await.is_err() {
            break;
        }
    }
}

async fn send(socket: &mut WebSocket, message: &HmrMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

fn content_type(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension.to_ascii_lowercase().as_str() {
        "html" => "text/html; charset=utf-8",
        "js" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "map" | "json" => "application/json",
        "ico" => "image/x-icon",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sheetpack_bundle::Mode;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn write_project(root: &Path) {
        write(
            root,
            "src/index.html",
            "<!DOCTYPE html>\n<html>\n<head>\n  <title>{{ title }}</title>\n</head>\n<body>\n  <div id=\"app\"></div>\n</body>\n</html>\n",
        );
        write(root, "src/favicon.ico", "ico");
        write(root, "src/scss/index.scss", ".excel { color: red; }\n");
        write(
            root,
            "src/index.js",
            "import './scss/index.scss';\n\nconsole.log('excel');\n",
        );
        write(root, "node_modules/@babel/polyfill/index.js", "module.exports = {};\n");
    }

    fn server(root: &Path) -> DevServer {
        DevServer::new(Arc::new(PipelineConfig::new(root, Mode::Development)))
    }

    #[tokio::test]
    async fn serves_artifacts_from_memory() {
        let temp = tempdir().unwrap();
        write_project(temp.path());

        let state = server(temp.path()).initial_state().await.unwrap();
        let state = state.read().await;

        let (content_type, html) = state.lookup("/").unwrap();
        assert_eq!(content_type, "text/html; charset=utf-8");
        assert!(String::from_utf8(html).unwrap().contains("bundle.js"));

        let (content_type, script) = state.lookup("/bundle.js").unwrap();
        assert_eq!(content_type, "application/javascript; charset=utf-8");
        assert!(String::from_utf8(script).unwrap().contains("/__hmr"));

        assert!(state.lookup("/bundle.css").is_some());
        assert!(state.lookup("/bundle.js.map").is_some());
        assert!(state.lookup("/favicon.ico").is_some());
        assert!(state.lookup("/missing.js").is_none());
        assert!(!temp.path().join("dist").exists());
    }

    #[tokio::test]
    async fn invalid_script_keeps_serving_previous_build() {
        let temp = tempdir().unwrap();
        write_project(temp.path());

        let dev = server(temp.path());
        let state = dev.initial_state().await.unwrap();
        let mut rx = state.read().await.hmr.subscribe();

        write(temp.path(), "src/index.js", "import './scss/index.scss';\nconst = ;\n");
        rebuild(&dev.compiler, &state).await;

        match rx.try_recv() {
            Ok(HmrMessage::Error { message }) => assert!(message.contains("index.js")),
            other => panic!("expected error message, got {:?}", other),
        }

        let state = state.read().await;
        assert!(state.error.is_some());
        assert!(state.lookup("/bundle.js").is_some());
    }

    #[tokio::test]
    async fn lint_error_at_startup_is_reported_not_fatal() {
        let temp = tempdir().unwrap();
        write_project(temp.path());
        write(temp.path(), "src/index.js", "debugger;\n");

        let state = server(temp.path()).initial_state().await.unwrap();
        let state = state.read().await;

        assert!(state.compilation.is_none());
        assert!(state.error.as_deref().unwrap().contains("no-debugger"));
    }

    #[tokio::test]
    async fn coverage_error_at_startup_is_fatal() {
        let temp = tempdir().unwrap();
        write_project(temp.path());
        write(temp.path(), "src/notes.md", "# notes\n");

        let err = server(temp.path()).initial_state().await.err().unwrap();
        assert!(matches!(err, ServerError::Build(BuildError::Coverage(_))));
    }

    #[tokio::test]
    async fn script_change_sends_module_update() {
        let temp = tempdir().unwrap();
        write_project(temp.path());

        let dev = server(temp.path());
        let state = dev.initial_state().await.unwrap();
        let mut rx = state.read().await.hmr.subscribe();

        write(
            temp.path(),
            "src/index.js",
            "import './scss/index.scss';\n\nconsole.log('sheet');\n",
        );
        rebuild(&dev.compiler, &state).await;

        match rx.try_recv() {
            Ok(HmrMessage::Update { modules }) => {
                assert_eq!(modules.keys().collect::<Vec<_>>(), vec!["./src/index.js"]);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn style_change_swaps_stylesheet() {
        let temp = tempdir().unwrap();
        write_project(temp.path());

        let dev = server(temp.path());
        let state = dev.initial_state().await.unwrap();
        let mut rx = state.read().await.hmr.subscribe();

        write(temp.path(), "src/scss/index.scss", ".excel { color: blue; }\n");
        rebuild(&dev.compiler, &state).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            HmrMessage::CssUpdate {
                href: "/bundle.css".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type("bundle.js.map"), "application/json");
        assert_eq!(content_type("favicon.ICO"), "image/x-icon");
        assert_eq!(content_type("LICENSE"), "application/octet-stream");
    }
}
