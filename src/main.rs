//! Conversational-AI SaaS backend
//!
//! Accounts, subscription billing, and a chat API that proxies a hosted
//! model provider with streaming responses.

use parley_api::api;
use parley_api::core::assistant::UpstreamModelClient;
use parley_api::core::services::{
    LogNotifier, MyAccountService, MyBillingService, MyConversationService, MyMemoryService,
    MyUsageService,
};
use parley_api::infrastructure::database::DatabaseConnection;
use parley_api::infrastructure::repositories::{
    DbConversationRepository, DbMemoryRepository, DbSessionRepository, DbUserRepository,
    DbWebhookEventRepository,
};

use axum::Router;
use axum::http::{HeaderValue, Method};
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::info;
use tokio::runtime::{Builder, Runtime};
use tower_http::cors::{Any, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(web_server_task());

    Ok(())
}

async fn web_server_task() {
    let provider = ServiceCollection::new()
        .add(DatabaseConnection::singleton())
        .add(UpstreamModelClient::singleton())
        .add(LogNotifier::singleton())
        .add(DbUserRepository::scoped())
        .add(DbSessionRepository::scoped())
        .add(DbConversationRepository::scoped())
        .add(DbMemoryRepository::scoped())
        .add(DbWebhookEventRepository::scoped())
        .add(MyAccountService::scoped())
        .add(MyConversationService::scoped())
        .add(MyUsageService::scoped())
        .add(MyMemoryService::scoped())
        .add(MyBillingService::scoped())
        .build_provider()
        .unwrap();

    let database = provider.get_required::<DatabaseConnection>();
    sqlx::migrate!()
        .run(&**database)
        .await
        .expect("failed to run database migrations");

    let app = Router::new()
        .nest("/auth", api::auth::router())
        .nest("/projects", api::projects::router())
        .nest("/conversations", api::conversations::router())
        .nest("/billing", api::billing::router())
        .nest("/admin", api::admin::router())
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_origin([
                    "http://localhost:3000".parse::<HeaderValue>().unwrap(),
                    "http://localhost:5173".parse::<HeaderValue>().unwrap(),
                ]),
        )
        .with_provider(provider);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_owned());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
    info!("Shutting down...");
}
