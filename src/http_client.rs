use std::time::Duration;

use reqwest::Client;

/// 无整体超时的客户端：用于流式调用，连接阶段由调用方单独计时。
pub fn client() -> Result<Client, reqwest::Error> {
    Client::builder().build()
}

/// 带整体超时的客户端：用于非流式调用，单次尝试整体受限。
pub fn client_with_timeout(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}
