use http::HeaderMap;
use http::header::{self, HeaderName};

/// Destination (`host:port`) for bastion-mode TCP dialing.
pub const JUMP_DESTINATION_HEADER: &str = "Cf-Access-Jump-Destination";

/// Marks a request coming from a private-network client.
pub const PROXY_SOURCE_HEADER: &str = "Cf-Cloudflared-Proxy-Src";

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

/// Copies `headers` minus hop-by-hop ones and anything the `Connection`
/// header names.
pub fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();

    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(named.iter()) {
        out.remove(name);
    }
    out.remove("proxy-connection");
    out
}
