use reqwest::Client;
use std::time::Duration;

pub fn new_api_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(300)) // 5 minutes to cover slow multimodal inference calls
        .connect_timeout(Duration::from_secs(60))
        .pool_idle_timeout(Some(Duration::from_secs(240)))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .expect("Failed to build HTTP client")
}
