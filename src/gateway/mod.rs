pub mod config;
pub mod identity;
pub mod proxy;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use actix_web::web::{self, Bytes, Data, PayloadConfig};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use sd_notify::NotifyState;

use crate::context::GatewayContext;

use identity::{normalize_path, Identity};

pub struct GatewayServer {
    ctx: Arc<GatewayContext>,

    keep_alive_secs: Option<u64>,
    workers: Option<u64>,

    bind: String,

    payload_limit_mib: usize,
}

impl GatewayServer {
    const FORBIDDEN_MESSAGE: &str = "Unauthorized Access";
    const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

    pub fn new(bind: String, ctx: Arc<GatewayContext>, payload_limit_mib: usize) -> Self {
        Self {
            ctx,
            keep_alive_secs: None,
            workers: None,
            bind,
            payload_limit_mib,
        }
    }

    pub fn set_keep_alive_secs(&mut self, keep_alive_secs: u64) {
        self.keep_alive_secs = Some(keep_alive_secs);
    }

    pub fn set_workers(&mut self, workers: u64) {
        self.workers = Some(workers);
    }

    pub async fn run(self) -> Result<()> {
        let ctx = self.ctx.clone();
        let payload_limit = self.payload_limit_mib * 1024 * 1024;
        let mut srv = HttpServer::new(move || {
            App::new()
                .app_data(Data::new(ctx.clone()))
                .app_data(PayloadConfig::new(payload_limit))
                .default_service(web::route().to(Self::handle))
        });

        info!("Binding to http://{}", self.bind);
        srv = srv.bind(&self.bind).context("bind gateway server")?;

        if let Some(keep_alive) = self.keep_alive_secs {
            srv = srv.keep_alive(Duration::from_secs(keep_alive));
        }
        if let Some(workers) = self.workers {
            srv = srv.workers(workers as usize);
        }

        sd_notify::notify(true, &[NotifyState::Ready]).context("notify systemd")?;
        info!("Starting gateway server");
        srv.run().await.context("run server")?;

        info!("Server stopped by user");
        Ok(())
    }

    async fn handle(req: HttpRequest, body: Bytes, ctx: Data<Arc<GatewayContext>>) -> HttpResponse {
        Self::recover(Self::serve(req, body, ctx)).await
    }

    /// Runs a request on its own task so that a panic while serving it ends
    /// in a 500 instead of a dropped connection.
    async fn recover<F>(fut: F) -> HttpResponse
    where
        F: Future<Output = HttpResponse> + 'static,
    {
        match actix_web::rt::spawn(fut).await {
            Ok(resp) => resp,
            Err(e) => {
                error!("Request handler panicked: {e}");
                Self::internal_error()
            }
        }
    }

    async fn serve(req: HttpRequest, body: Bytes, ctx: Data<Arc<GatewayContext>>) -> HttpResponse {
        let identity = Identity::from_headers(req.headers());

        // Without credentials the upstream server issues its own challenge.
        if identity != Identity::Missing {
            let path = normalize_path(req.uri().path());
            if !ctx.authz.is_bypass(&path) {
                let repo_path = match path.strip_prefix(ctx.prefix.as_str()) {
                    Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
                    _ => {
                        debug!("Path '{path}' is outside prefix '{}'", ctx.prefix);
                        return Self::forbidden();
                    }
                };

                let method = req.method().as_str();
                let peer = req
                    .peer_addr()
                    .map(|addr| addr.ip().to_string())
                    .unwrap_or_default();
                info!(
                    "{} {method} {repo_path} from {peer}",
                    identity.user().unwrap_or("<anonymous>")
                );

                if !ctx.authz.can_access(identity.user(), method, repo_path) {
                    return Self::forbidden();
                }
            }
        }

        match ctx.proxy.forward(&req, body).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Forward {} {} failed: {e:#}", req.method(), req.uri());
                Self::internal_error()
            }
        }
    }

    fn forbidden() -> HttpResponse {
        HttpResponse::Forbidden().body(Self::FORBIDDEN_MESSAGE)
    }

    fn internal_error() -> HttpResponse {
        HttpResponse::InternalServerError().body(Self::INTERNAL_ERROR_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use actix_web::http::{header, StatusCode};
    use actix_web::test::{self, TestRequest};
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;

    use crate::authz::store::{PermissionStore, RepositoryTree, User, PERM_READ, PERM_WRITE};
    use crate::authz::Authorizer;

    use super::proxy::Proxy;
    use super::*;

    async fn upstream_handler(req: HttpRequest, body: Bytes) -> HttpResponse {
        if req.uri().path() == "/svn/root/docs/trunk/dir" {
            return HttpResponse::MovedPermanently()
                .insert_header((
                    header::LOCATION,
                    "http://10.9.9.9:8080/svn/root/docs/trunk/dir/?r=3",
                ))
                .finish();
        }
        if req.uri().path() == "/svn/root/docs/trunk/big.bin" {
            return HttpResponse::Ok()
                .content_type("application/octet-stream")
                .body(vec![b'x'; 1234]);
        }

        let forwarded_for = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let has_auth = req.headers().contains_key(header::AUTHORIZATION);
        HttpResponse::Ok()
            .insert_header(("x-upstream-forwarded-for", forwarded_for))
            .insert_header(("x-upstream-auth", has_auth.to_string()))
            .body(format!(
                "{} {} {}",
                req.method(),
                req.uri(),
                String::from_utf8_lossy(&body)
            ))
    }

    fn start_upstream() -> String {
        let srv = HttpServer::new(|| App::new().default_service(web::route().to(upstream_handler)))
            .workers(1)
            .bind(("127.0.0.1", 0))
            .unwrap();
        let addr = srv.addrs()[0];
        actix_web::rt::spawn(srv.run());
        format!("http://{addr}")
    }

    fn test_ctx(upstream: &str) -> Arc<GatewayContext> {
        let store = Arc::new(PermissionStore::new());
        let mut docs = RepositoryTree::new(1, "docs");
        docs.insert("/trunk", 1);
        store.replace_repo(docs);
        store.replace_user(User {
            uid: 1,
            name: String::from("alice"),
            perms: HashMap::from([(1, PERM_READ | PERM_WRITE)]),
        });
        store.replace_user(User {
            uid: 2,
            name: String::from("bob"),
            perms: HashMap::from([(1, PERM_READ)]),
        });
        store.mark_warm();

        Arc::new(GatewayContext {
            authz: Authorizer::new(store, &[String::from("/favicon.ico")]),
            proxy: Proxy::new(
                upstream.to_string(),
                Duration::from_secs(1),
                Duration::from_secs(5),
            )
            .unwrap(),
            prefix: String::from("/svn/root"),
        })
    }

    fn basic(user: &str) -> (header::HeaderName, String) {
        let token = BASE64_STANDARD.encode(format!("{user}:secret"));
        (header::AUTHORIZATION, format!("Basic {token}"))
    }

    async fn call(ctx: Arc<GatewayContext>, req: TestRequest) -> (StatusCode, String) {
        let app = test::init_service(
            App::new()
                .app_data(Data::new(ctx))
                .default_service(web::route().to(GatewayServer::handle)),
        )
        .await;
        let resp = test::call_service(&app, req.to_request()).await;
        let status = resp.status();
        let body = test::read_body(resp).await;
        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[actix_web::test]
    async fn test_forward() {
        let ctx = test_ctx(&start_upstream());
        let app = test::init_service(
            App::new()
                .app_data(Data::new(ctx))
                .default_service(web::route().to(GatewayServer::handle)),
        )
        .await;

        let req = TestRequest::put()
            .uri("/svn/root/docs/trunk/a.txt?x=1")
            .insert_header(basic("alice"))
            .insert_header(("x-forwarded-for", "192.168.1.9"))
            .peer_addr("10.1.2.3:5555".parse().unwrap())
            .set_payload("hello")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("x-upstream-forwarded-for").unwrap(),
            "192.168.1.9, 10.1.2.3"
        );
        assert_eq!(resp.headers().get("x-upstream-auth").unwrap(), "true");
        let body = test::read_body(resp).await;
        assert_eq!(body, "PUT /svn/root/docs/trunk/a.txt?x=1 hello");
    }

    #[actix_web::test]
    async fn test_forward_without_credentials() {
        let ctx = test_ctx(&start_upstream());

        // Not checked at all: the upstream server challenges the client.
        let req = TestRequest::delete()
            .uri("/svn/root/docs/branches/x")
            .peer_addr("10.1.2.3:5555".parse().unwrap());
        let (status, body) = call(ctx, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "DELETE /svn/root/docs/branches/x ");
    }

    #[actix_web::test]
    async fn test_forbidden() {
        let upstream = start_upstream();

        let cases = [
            ("bob", "/svn/root/docs/trunk/a.txt"),
            ("bob", "/svn//root/docs//trunk/a.txt"),
            ("alice", "/svn/root/docs/tags/1.0"),
            ("alice", "/other/docs/trunk/a.txt"),
            ("alice", "/svn/rootx/docs/trunk/a.txt"),
            ("mallory", "/svn/root/docs/trunk/a.txt"),
            ("alice", "/svn/root/docs/secret/x"),
            ("alice", "/svn/root/docs/trunk/../secret/x"),
            ("alice", "/svn/root/docs/trunk/%2e%2e/secret/x"),
            ("alice", "/svn/root/docs/trunk/%2E%2E/%2e%2e/tools/x"),
            ("alice", "/svn/root/docs/trunk/./a.txt"),
            ("alice", "/svn/root/../other/x"),
        ];
        for (user, uri) in cases {
            let req = TestRequest::put().uri(uri).insert_header(basic(user));
            let (status, body) = call(test_ctx(&upstream), req).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{user} {uri}");
            assert_eq!(body, "Unauthorized Access");
        }

        // Malformed credentials count as anonymous.
        let req = TestRequest::get()
            .uri("/svn/root/docs/trunk/a.txt")
            .insert_header((header::AUTHORIZATION, "Basic ????"));
        let (status, _) = call(test_ctx(&upstream), req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_allowed() {
        let upstream = start_upstream();

        let cases = [
            ("bob", "/svn/root/docs/trunk/a.txt"),
            ("bob", "/svn/root/docs/"),
            ("bob", "/svn/root/"),
            ("bob", "/svn/root"),
            ("mallory", "/favicon.ico"),
        ];
        for (user, uri) in cases {
            let req = TestRequest::get().uri(uri).insert_header(basic(user));
            let (status, body) = call(test_ctx(&upstream), req).await;
            assert_eq!(status, StatusCode::OK, "{user} {uri}");
            assert_eq!(body, format!("GET {uri} "));
        }
    }

    #[actix_web::test]
    async fn test_head_keeps_length() {
        let ctx = test_ctx(&start_upstream());
        let app = test::init_service(
            App::new()
                .app_data(Data::new(ctx))
                .default_service(web::route().to(GatewayServer::handle)),
        )
        .await;

        let req = TestRequest::default()
            .method(actix_web::http::Method::HEAD)
            .uri("/svn/root/docs/trunk/big.bin")
            .insert_header(basic("bob"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_LENGTH).unwrap(), "1234");
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
        let body = test::read_body(resp).await;
        assert!(body.is_empty());

        let req = TestRequest::get()
            .uri("/svn/root/docs/trunk/big.bin")
            .insert_header(basic("bob"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(body.len(), 1234);
    }

    #[actix_web::test]
    async fn test_redirect_rewrite() {
        let ctx = test_ctx(&start_upstream());
        let req = TestRequest::get()
            .uri("/svn/root/docs/trunk/dir")
            .insert_header(basic("bob"));
        let app = test::init_service(
            App::new()
                .app_data(Data::new(ctx))
                .default_service(web::route().to(GatewayServer::handle)),
        )
        .await;
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/svn/root/docs/trunk/dir/?r=3"
        );
    }

    #[actix_web::test]
    async fn test_upstream_unreachable() {
        let ctx = test_ctx("http://127.0.0.1:1");
        let req = TestRequest::get()
            .uri("/svn/root/docs/trunk/a.txt")
            .insert_header(basic("alice"));
        let (status, body) = call(ctx, req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error");
    }

    async fn explode() -> HttpResponse {
        panic!("boom")
    }

    #[actix_web::test]
    async fn test_recover_panic() {
        let resp = GatewayServer::recover(explode()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = GatewayServer::recover(async { HttpResponse::NoContent().finish() }).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
}
