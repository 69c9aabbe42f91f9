use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use actix_web::body::{BodySize, MessageBody};
use actix_web::http::header::{self, HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::{HttpRequest, HttpResponse};
use anyhow::{Context, Result};
use log::debug;
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Url};

/// Forwards requests to the upstream SVN server.
pub struct Proxy {
    client: Client,
    upstream: String,
}

impl Proxy {
    /// Headers describing the connection to the gateway, never copied from
    /// one side to the other.
    const HOP_HEADERS: [&str; 5] = [
        "connection",
        "keep-alive",
        "transfer-encoding",
        "content-length",
        "upgrade",
    ];

    const FORWARDED_FOR: &str = "x-forwarded-for";

    pub fn new(upstream: String, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        // Redirects are handed back to the client, never followed.
        let client = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client, upstream })
    }

    pub async fn forward(&self, req: &HttpRequest, body: Bytes) -> Result<HttpResponse> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.upstream, path_and_query);
        let url = Url::parse(&url).with_context(|| format!("parse upstream url '{url}'"))?;

        let method = Method::from_bytes(req.method().as_str().as_bytes())
            .with_context(|| format!("unsupported method '{}'", req.method()))?;

        let is_head = method == Method::HEAD;
        let mut builder = self.client.request(method, url.clone());
        let mut forwarded_for = None;
        for (name, value) in req.headers() {
            if *name == header::HOST || Self::is_hop_header(name.as_str()) {
                continue;
            }
            if name.as_str() == Self::FORWARDED_FOR {
                forwarded_for = value.to_str().ok().map(String::from);
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        if let Some(peer) = req.peer_addr() {
            let peer = peer.ip().to_string();
            let value = match forwarded_for {
                Some(chain) if !chain.is_empty() => format!("{chain}, {peer}"),
                _ => peer,
            };
            builder = builder.header(Self::FORWARDED_FOR, value);
        } else if let Some(chain) = forwarded_for {
            builder = builder.header(Self::FORWARDED_FOR, chain);
        }

        let resp = builder
            .body(body)
            .send()
            .await
            .with_context(|| format!("send request to upstream '{url}'"))?;

        if resp.status().is_redirection() {
            if let Some(location) = resp.headers().get(reqwest::header::LOCATION) {
                let location = location.to_str().context("parse upstream location")?;
                let target = Self::rewrite_location(&url, location)?;
                debug!("Upstream redirected {url} to {location}, rewritten to {target}");
                return Ok(HttpResponse::Found()
                    .insert_header((header::LOCATION, target))
                    .finish());
            }
        }

        let status = StatusCode::from_u16(resp.status().as_u16())
            .context("parse upstream status code")?;
        let mut out = HttpResponse::build(status);
        for (name, value) in resp.headers() {
            if Self::is_hop_header(name.as_str()) {
                continue;
            }
            let name = HeaderName::from_bytes(name.as_str().as_bytes());
            let value = HeaderValue::from_bytes(value.as_bytes());
            if let (Ok(name), Ok(value)) = (name, value) {
                out.append_header((name, value));
            }
        }

        // A HEAD response carries no body, so the length cannot be
        // recomputed from it.
        if is_head {
            let length = resp
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(length) = length {
                return Ok(out.no_chunking(length).body(HeadBody));
            }
        }

        let body = resp.bytes().await.context("read upstream response body")?;
        Ok(out.body(body))
    }

    /// Keeps only the path and query of a redirect target, so the client
    /// stays on the gateway's host.
    fn rewrite_location(base: &Url, location: &str) -> Result<String> {
        let target = base
            .join(location)
            .with_context(|| format!("resolve upstream location '{location}'"))?;
        let mut rewritten = target.path().to_string();
        if let Some(query) = target.query() {
            rewritten.push('?');
            rewritten.push_str(query);
        }
        Ok(rewritten)
    }

    fn is_hop_header(name: &str) -> bool {
        Self::HOP_HEADERS
            .iter()
            .any(|hop| hop.eq_ignore_ascii_case(name))
    }
}

/// Empty body whose size is left unknown, so that an explicit
/// `Content-Length` header is written out as is.
struct HeadBody;

impl MessageBody for HeadBody {
    type Error = Infallible;

    fn size(&self) -> BodySize {
        BodySize::Stream
    }

    fn poll_next(
        self: Pin<&mut Self>,
        _cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        Poll::Ready(None)
    }
}
