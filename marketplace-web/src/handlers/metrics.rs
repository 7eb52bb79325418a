use marketplace_core::error::AppError;

pub async fn metrics() -> Result<String, AppError> {
    Ok(crate::services::metrics::get_metrics()?)
}
