//! Shared `reqwest::Client`, reused across upstream calls for connection pooling.
//!
//! Grounded on `examples/grafbase-nexus/crates/llm/src/http_client.rs`.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;

pub(crate) fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            Client::builder()
                .timeout(Duration::from_secs(120))
                .pool_idle_timeout(Some(Duration::from_secs(5)))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .build()
                .expect("failed to build default HTTP client")
        })
        .clone()
}
