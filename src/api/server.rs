use anyhow::Result;
use tokio::net::TcpListener;

use crate::storage::engine::Library;

pub async fn serve(port: u16, library: Library) -> Result<()> {
    let app = super::routes::create_router(library);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
