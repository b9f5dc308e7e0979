//! Helpers for testing the web server and service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. To avoid dropping it too early, assign it to a variable in the
//!    test function (e.g. `let cache_dir = test::tempdir()`).
//!
//!  - When using [`MockUpstream`] or [`Server`], hold on to them until all requests have been
//!    made. A dropped server stops answering, and requests to it fail.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `artifact_stats` crates and mutes
///    all other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "artifact_stats=trace,artifact_stats_service=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`keep`](TempDir::keep) is called. Use it as a guard to automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    /// Creates a new test server from the given `axum` router.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://{}/{}", self.addr(), path).parse().unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Default)]
struct MockProject {
    id: String,
    artifacts: BTreeMap<String, Vec<i64>>,
}

#[derive(Debug, Default)]
struct MockState {
    projects: Mutex<BTreeMap<String, MockProject>>,
    latest_releases: Mutex<BTreeMap<(String, String), String>>,
    stars: Mutex<BTreeMap<(String, String), u64>>,
    hits: Mutex<BTreeMap<String, usize>>,
    failing: AtomicBool,
    delay: Mutex<Duration>,
}

/// An upstream speaking the Nexus statistics XML dialect and the GitHub repository JSON API.
///
/// Every request is counted per path. The upstream can be switched to fail every request with
/// a `503`, or to answer slowly.
pub struct MockUpstream {
    server: Server,
    state: Arc<MockState>,
}

impl MockUpstream {
    pub fn new() -> Self {
        let state = Arc::new(MockState::default());

        let router = Router::new()
            .route("/service/local/stats/projects", get(nexus_projects))
            .route("/service/local/stats/coord/:id", get(nexus_coord))
            .route("/service/local/stats/timeline", get(nexus_timeline))
            .route("/service/local/lucene/search", get(nexus_search))
            .route("/repos/:owner/:repo", get(github_repository))
            .layer(middleware::from_fn_with_state(state.clone(), count_hits))
            .with_state(state.clone());

        let server = Server::with_router(router);
        Self { server, state }
    }

    /// The `host:port` to configure connectors with. The scheme is `http`.
    pub fn host(&self) -> String {
        self.server.addr().to_string()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }

    /// Adds a Nexus artifact, or replaces its monthly download counts.
    pub fn set_timeline(&self, project_id: &str, group: &str, artifact: &str, timeline: &[i64]) {
        let mut projects = self.state.projects.lock().unwrap();
        let project = projects.entry(group.to_owned()).or_default();
        project.id = project_id.to_owned();
        project
            .artifacts
            .insert(artifact.to_owned(), timeline.to_vec());
    }

    pub fn set_latest_release(&self, group: &str, artifact: &str, version: &str) {
        self.state
            .latest_releases
            .lock()
            .unwrap()
            .insert((group.to_owned(), artifact.to_owned()), version.to_owned());
    }

    pub fn set_stars(&self, owner: &str, repository: &str, stars: u64) {
        self.state
            .stars
            .lock()
            .unwrap()
            .insert((owner.to_owned(), repository.to_owned()), stars);
    }

    /// Makes every following request fail with `503 Service Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every following response.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// The number of requests to `path` so far.
    pub fn hits(&self, path: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    /// All requests so far, by path.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let hits = self.state.hits.lock().unwrap();
        hits.iter().map(|(path, hits)| (path.clone(), *hits)).collect()
    }
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

async fn count_hits(State(state): State<Arc<MockState>>, request: Request, next: Next) -> Response {
    {
        let mut hits = state.hits.lock().unwrap();
        *hits.entry(request.uri().path().to_owned()).or_default() += 1;
    }

    let delay = *state.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if state.failing.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    next.run(request).await
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

async fn nexus_projects(State(state): State<Arc<MockState>>) -> Response {
    let projects = state.projects.lock().unwrap();
    let mut body = String::from("<statsProjectListResp><data>");
    for (name, project) in projects.iter() {
        body.push_str(&format!(
            "<statsProject><id>{}</id><name>{name}</name></statsProject>",
            project.id
        ));
    }
    body.push_str("</data></statsProjectListResp>");
    xml(body)
}

async fn nexus_coord(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    let projects = state.projects.lock().unwrap();
    let Some(project) = query
        .get("g")
        .and_then(|group| projects.get(group))
        .filter(|project| project.id == id)
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut body = String::from("<statsCoordResp><data>");
    for artifact in project.artifacts.keys() {
        body.push_str(&format!("<coord>{artifact}</coord>"));
    }
    body.push_str("</data></statsCoordResp>");
    xml(body)
}

async fn nexus_timeline(
    State(state): State<Arc<MockState>>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    let projects = state.projects.lock().unwrap();
    let (Some(group), Some(artifact)) = (query.get("g"), query.get("a")) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some((project, timeline)) = projects
        .get(group)
        .and_then(|project| Some((project, project.artifacts.get(artifact)?)))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let total: i64 = timeline.iter().sum();
    let ints: String = timeline.iter().map(|v| format!("<int>{v}</int>")).collect();
    xml(format!(
        "<statsTimelineResp><data><projectId>{}</projectId><groupId>{group}</groupId>\
         <artifactId>{artifact}</artifactId><type>raw</type><total>{total}</total>\
         <timeline>{ints}</timeline></data></statsTimelineResp>",
        project.id
    ))
}

async fn nexus_search(
    State(state): State<Arc<MockState>>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    let (Some(group), Some(artifact)) = (query.get("g"), query.get("a")) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let releases = state.latest_releases.lock().unwrap();
    let artifact_xml = match releases.get(&(group.clone(), artifact.clone())) {
        Some(version) => format!(
            "<artifact><groupId>{group}</groupId><artifactId>{artifact}</artifactId>\
             <latestRelease>{version}</latestRelease></artifact>"
        ),
        None => String::new(),
    };
    xml(format!(
        "<searchNGResponse><totalCount>1</totalCount><data>{artifact_xml}</data></searchNGResponse>"
    ))
}

async fn github_repository(
    State(state): State<Arc<MockState>>,
    Path((owner, repo)): Path<(String, String)>,
) -> Response {
    match state.stars.lock().unwrap().get(&(owner.clone(), repo.clone())) {
        Some(stars) => Json(serde_json::json!({
            "full_name": format!("{owner}/{repo}"),
            "stargazers_count": stars,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "message": "Not Found" })),
        )
            .into_response(),
    }
}
