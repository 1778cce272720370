use chan::Sender;
use hyper::status::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use datatype::{Method, Url};
use http::{Client, Request, Response, ResponseData};


/// A recorded request for later inspection by tests.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path:   String,
    pub body:   Option<Vec<u8>>,
}

struct TestState {
    replies:  Mutex<VecDeque<Vec<u8>>>,
    routes:   Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<Recorded>>,
}

/// An in-memory `Client` for tests: either replays a fixed list of response
/// bodies in order, or routes by URL path. Every request is recorded.
#[derive(Clone)]
pub struct TestClient {
    state: Arc<TestState>,
}

impl Default for TestClient {
    fn default() -> Self {
        TestClient::from(Vec::new())
    }
}

impl TestClient {
    /// Reply with each body in turn, then 404.
    pub fn from(replies: Vec<Vec<u8>>) -> TestClient {
        TestClient {
            state: Arc::new(TestState {
                replies:  Mutex::new(replies.into_iter().collect()),
                routes:   Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    /// Reply according to the request's URL path, 404 on unknown paths.
    pub fn routed(routes: HashMap<String, Vec<u8>>) -> TestClient {
        TestClient {
            state: Arc::new(TestState {
                replies:  Mutex::new(VecDeque::new()),
                routes:   Mutex::new(routes),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    /// Add or replace a route after creation.
    pub fn set_route(&self, path: &str, body: Vec<u8>) {
        self.state.routes.lock().unwrap().insert(path.into(), body);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    /// The recorded requests matching an HTTP method, e.g. all `PUT`s.
    pub fn requests_for(&self, method: &str) -> Vec<Recorded> {
        self.requests().into_iter().filter(|req| req.method == method).collect()
    }

    fn reply_to(&self, method: &Method, url: &Url) -> Response {
        if let Some(body) = self.state.replies.lock().unwrap().pop_front() {
            return Response::Success(ResponseData { code: StatusCode::Ok, body: body });
        }
        match self.state.routes.lock().unwrap().get(url.path()) {
            Some(body) => Response::Success(ResponseData { code: StatusCode::Ok, body: body.clone() }),
            None => match *method {
                // writes against unrouted paths are acknowledged
                Method::Put | Method::Post => Response::Success(ResponseData { code: StatusCode::Ok, body: Vec::new() }),
                Method::Get => Response::Failed(ResponseData { code: StatusCode::NotFound, body: Vec::new() }),
            }
        }
    }
}

impl Client for TestClient {
    fn chan_request(&self, req: Request, resp_tx: Sender<Response>) {
        let resp = self.reply_to(&req.method, &req.url);
        self.state.requests.lock().unwrap().push(Recorded {
            method: format!("{}", req.method),
            path:   req.url.path().into(),
            body:   req.body,
        });
        resp_tx.send(resp);
    }

    fn is_testing(&self) -> bool { true }
}
