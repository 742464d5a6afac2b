use std::sync::Arc;

use axum::Router;
use sales_agent_rag_webapp::{
    api,
    app_state::AppState,
    config::AppConfig,
    llm::LlmManager,
    rag::RetrievalAnswerer,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env()?;

    // 3. Clientes de embeddings y chat (se crean una vez y se reutilizan)
    let llm_manager = LlmManager::from_config(&cfg)?;
    let answerer = Arc::new(RetrievalAnswerer::from_config(&cfg, &llm_manager)?);

    // 4. Cargar o construir el índice vectorial. Si falla, la primera
    //    pregunta lo volverá a intentar.
    if let Err(e) = answerer.warm_up().await {
        error!("No se pudo preparar el índice vectorial al arrancar: {}", e);
    }

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState::new(answerer);

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr).await?;
    let server_url = format!("http://{}", cfg.server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Apagado ordenado con Ctrl-C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("No se pudo escuchar Ctrl-C: {}", e);
            }
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
