//! Endpoint address resolution.
//!
//! An address is either scheme-qualified (`ws://`, `wss://`, or `http(s)://`
//! which maps to `ws(s)://`) or a path resolved against the page origin.
//! A secure origin always yields `wss`.

use url::Url;

use crate::error::ClientError;

pub fn resolve_address(address: &str, origin: Option<&Url>) -> Result<Url, ClientError> {
    match Url::parse(address) {
        Ok(url) => websocket_scheme(url, address),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let origin = origin.ok_or_else(|| {
                ClientError::invalid_address(address, "relative address with no page origin")
            })?;
            let url = origin
                .join(address)
                .map_err(|e| ClientError::invalid_address(address, e.to_string()))?;
            websocket_scheme(url, address)
        }
        Err(e) => Err(ClientError::invalid_address(address, e.to_string())),
    }
}

fn websocket_scheme(mut url: Url, address: &str) -> Result<Url, ClientError> {
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ClientError::invalid_address(
                address,
                format!("unsupported scheme `{other}`"),
            ));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::invalid_address(address, "cannot switch scheme"))?;
    Ok(url)
}
