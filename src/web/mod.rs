//! Defines Stagger's HTTP interface: the JSON API under `/api` and the
//! static web UI that fronts it.

mod api;
mod static_files;
mod util;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

use crate::app::App;

pub struct HttpServer {
    app: Arc<App>,
}

impl HttpServer {
    pub fn new(app: Arc<App>) -> Self {
        HttpServer { app }
    }

    /// Runs the HTTP surface on the calling thread, forever.
    pub fn start(self, address: SocketAddr) -> anyhow::Result<()> {
        let rt = Runtime::new()?;
        let listener = rt.block_on(TcpListener::bind(address))?;

        rt.block_on(accept_loop(listener, self.app));
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, app: Arc<App>) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("Failed to accept connection: {}", err);
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let app = Arc::clone(&app);

        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let app = Arc::clone(&app);

                async move { Ok::<_, Infallible>(handle(app, request).await) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                log::debug!("Error serving connection: {}", err);
            }
        });
    }
}

async fn handle(app: Arc<App>, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let head_request = request.method() == Method::HEAD;
    let path = request.uri().path();

    let mut response = if path == "/healthz" && (request.method() == Method::GET || head_request) {
        util::empty_ok()
    } else if path.starts_with("/api") {
        api::call(app, request).await
    } else {
        static_files::call(app, request).await
    };

    // HEAD shares each handler's status and headers; only the body is
    // withheld.
    if head_request {
        *response.body_mut() = Full::default();
    }

    response
}
