use gapi_gateway::{config, db, logger, server};

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|info| {
        logger::error("panic", &info.to_string());
    }));

    db::init();
    logger::init();
    logger::info("startup", "gapi-gateway starting");

    let cfg = config::load();
    let addr: std::net::SocketAddr = cfg.bind_addr.parse().expect("invalid bind_addr in settings.toml");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind listen address");
    logger::info("startup", &format!("listening on {addr}"));

    let app = server::app();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server exited with error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    logger::info("shutdown", "received Ctrl+C, shutting down");
}
