//! Webhook gateway server bootstrap and router wiring.

use super::*;

/// Run the webhook gateway until ctrl-c.
pub async fn run_webhook_gateway(config: WebhookGatewayConfig) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind webhook gateway on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound webhook gateway address")?;

    println!(
        "webhook gateway listening: addr={} webhook={} store_configured={}",
        local_addr,
        GITHUB_WEBHOOK_ENDPOINT,
        config.store.is_some()
    );

    let state = Arc::new(WebhookGatewayState::new(config));
    let app = build_webhook_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("webhook gateway exited unexpectedly")?;
    Ok(())
}

pub fn build_webhook_gateway_router(state: Arc<WebhookGatewayState>) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(GITHUB_WEBHOOK_ENDPOINT, post(handle_github_webhook))
        .route(ACTIVITY_ENDPOINT, get(handle_activity))
        .route(TASKS_ENDPOINT, get(handle_tasks))
        .fallback(handle_not_found)
        .with_state(state)
}
