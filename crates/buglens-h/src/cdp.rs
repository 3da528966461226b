use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A launched Chromium instance plus the task driving its protocol handler.
pub struct BrowserHost {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    user_data_dir: PathBuf,
    cleanup_user_data_dir: bool,
}

impl BrowserHost {
    pub async fn launch(visible: bool) -> Result<Self, HostError> {
        let mut config_builder = BrowserConfig::builder();
        config_builder = config_builder.no_sandbox(); // Often needed in docker/CI/restricted envs
        let (user_data_dir, cleanup_user_data_dir) = resolve_user_data_dir()?;
        config_builder = config_builder.user_data_dir(&user_data_dir);

        if visible {
            tracing::info!("Launching browser in visible mode");
            config_builder = config_builder.with_head();
        } else {
            tracing::info!("Launching browser in headless mode");
        }

        if let Ok(chrome_bin) = std::env::var("CHROME_BIN") {
            tracing::info!("Using custom Chrome binary: {}", chrome_bin);
            config_builder = config_builder.chrome_executable(chrome_bin);
        }

        let config = config_builder
            .build()
            .map_err(|e| HostError::Launch(format!("invalid browser config: {}", e)))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HostError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(e) = h {
                    tracing::error!("Browser handler error (ignoring): {}", e);
                    continue;
                }
            }
            tracing::info!("Browser handler task ended");
        });

        Ok(Self {
            browser,
            handler_task: Some(handler_task),
            user_data_dir,
            cleanup_user_data_dir,
        })
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    pub async fn open_page(&self, url: &str) -> Result<Page, HostError> {
        self.browser
            .new_page(url)
            .await
            .map_err(|e| HostError::Page(format!("failed to open {}: {}", url, e)))
    }

    /// Every open page target.
    pub async fn pages(&self) -> Result<Vec<Page>, HostError> {
        self.browser
            .pages()
            .await
            .map_err(|e| HostError::Page(e.to_string()))
    }

    pub async fn close(&mut self) -> Result<(), HostError> {
        self.browser
            .close()
            .await
            .map_err(|e| HostError::Launch(format!("error closing browser: {}", e)))?;
        if let Some(task) = self.handler_task.take() {
            if let Err(e) = task.await {
                tracing::debug!("Browser handler task did not finish cleanly: {}", e);
            }
        }

        if self.cleanup_user_data_dir {
            if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
                tracing::debug!(
                    "Failed to clean up user-data-dir {}: {}",
                    self.user_data_dir.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

/// Target id of a page, as used by the capture engine.
pub fn target_id(page: &Page) -> String {
    page.target_id().inner().clone()
}

fn resolve_user_data_dir() -> Result<(PathBuf, bool), HostError> {
    if let Ok(dir) = std::env::var("BUGLENS_USER_DATA_DIR") {
        let path = PathBuf::from(dir);
        std::fs::create_dir_all(&path)?;
        tracing::info!(
            "Using user data dir from BUGLENS_USER_DATA_DIR: {}",
            path.display()
        );
        return Ok((path, false));
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let unique = format!("buglens-chromium-profile-{}-{}", std::process::id(), nanos);
    let path = std::env::temp_dir().join(unique);
    std::fs::create_dir_all(&path)?;
    tracing::info!("Using isolated user data dir: {}", path.display());
    Ok((path, true))
}
