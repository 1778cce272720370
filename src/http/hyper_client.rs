use chan::Sender;
use hyper::Client as HyperHttp;
use hyper::client::Body;
use hyper::header::{Connection, ContentLength, ContentType, Headers};
use std::io::Read;
use std::time::Duration;
use time;

use datatype::Error;
use http::{Client, Request, Response, ResponseData};


/// A thin wrapper around a synchronous hyper client with bounded timeouts.
pub struct HyperClient {
    client: HyperHttp,
}

impl Default for HyperClient {
    fn default() -> Self {
        HyperClient::new(Duration::from_secs(30))
    }
}

impl HyperClient {
    pub fn new(timeout: Duration) -> Self {
        let mut client = HyperHttp::new();
        client.set_read_timeout(Some(timeout));
        client.set_write_timeout(Some(timeout));
        HyperClient { client: client }
    }

    fn send(&self, req: Request) -> Response {
        let started = time::precise_time_ns();
        let mut headers = Headers::new();
        headers.set(Connection::close());
        headers.set(ContentLength(req.body.as_ref().map_or(0, |body| body.len() as u64)));
        headers.set(ContentType::json());

        let mut request = self.client
            .request(req.method.clone().into(), (*req.url).clone())
            .headers(headers);
        if let Some(ref body) = req.body {
            request = request.body(Body::BufBody(body, body.len()));
        }

        match request.send() {
            Ok(mut resp) => {
                let latency = time::precise_time_ns() as f64 - started as f64;
                debug!("response status: {} ({}ms)", resp.status, (latency / 1e6) as u32);
                let mut body = Vec::new();
                if let Err(err) = resp.read_to_end(&mut body) {
                    return Response::Error(Box::new(Error::Client(format!("couldn't read response body: {}", err))));
                }
                let data = ResponseData { code: resp.status, body: body };
                if resp.status.is_success() {
                    Response::Success(data)
                } else {
                    Response::Failed(data)
                }
            }

            Err(err) => Response::Error(Box::new(Error::Client(format!("couldn't send request: {}", err))))
        }
    }
}

impl Client for HyperClient {
    fn chan_request(&self, req: Request, resp_tx: Sender<Response>) {
        resp_tx.send(self.send(req));
    }
}
