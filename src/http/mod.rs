pub mod http_client;
pub mod hyper_client;
pub mod test_client;

pub use self::http_client::{Client, Request, Response, ResponseData};
pub use self::hyper_client::HyperClient;
pub use self::test_client::TestClient;
