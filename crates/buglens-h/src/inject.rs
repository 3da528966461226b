use buglens_engine::prebuffer::INIT_SCRIPT;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use std::future::Future;
use std::time::Duration;

/// Maximum retries for context errors during page navigation.
const MAX_CONTEXT_RETRIES: u32 = 10;

/// Delay between retries when context is not found (page navigating).
const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

/// Retries `operation` while it fails with a transient context error.
/// Any other error is returned immediately as its message.
async fn retry_on_context_error<T, E, F, Fut>(
    operation_name: &str,
    mut operation: F,
) -> Result<T, String>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..MAX_CONTEXT_RETRIES {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let err_str = e.to_string();
                if !is_context_error(&err_str) {
                    return Err(err_str);
                }
                tracing::debug!(
                    "{} context error (attempt {}/{}), retrying...",
                    operation_name,
                    attempt + 1,
                    MAX_CONTEXT_RETRIES
                );
                last_error = Some(err_str);
                tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| format!("{} failed after retries", operation_name)))
}

/// Registers the console buffer for every future document and installs it
/// in the current one.
pub async fn install_prebuffer(page: &Page) -> Result<(), String> {
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(INIT_SCRIPT))
        .await
        .map_err(|e| format!("Failed to register console buffer: {}", e))?;

    retry_on_context_error("Console buffer install", || page.evaluate(INIT_SCRIPT)).await?;
    Ok(())
}
