use anyhow::{Result, Context};
use async_trait::async_trait;
use thirtyfour::prelude::*;
use std::time::Duration;
use tracing::{debug, error};

use crate::browser::{DriverFactory, PageDriver};
use crate::cli::config::{BrowserSettings, Selectors};
use crate::crawler::task::RawCommentItem;

/// WebDriver-backed browser session for one crawl target
pub struct BrowserSession {
    /// WebDriver instance
    driver: WebDriver,

    /// Class names of the comment widgets
    selectors: Selectors,

    /// How long to wait for the "load more" control to become clickable
    element_wait: Duration,
}

impl BrowserSession {
    /// Start a new Chrome session against the configured WebDriver server
    pub async fn start(config: &BrowserSettings, selectors: Selectors) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();

        // Set headless mode if configured
        if config.headless {
            caps.set_headless()?;
        }

        caps.add_chrome_arg("--no-sandbox")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg("--disable-gpu")?;
        caps.add_chrome_arg("--disable-cache")?;
        caps.add_chrome_arg(&format!("--window-size={},{}", config.window_size.0, config.window_size.1))?;

        // Hide the automation flag from the page
        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;

        let driver = WebDriver::new(&config.webdriver_url, caps).await
            .context(format!("Failed to connect to WebDriver at {}", config.webdriver_url))?;

        driver.set_page_load_timeout(Duration::from_secs(config.page_load_timeout_secs)).await?;

        debug!("Browser session started");

        Ok(Self {
            driver,
            selectors,
            element_wait: Duration::from_secs(config.element_wait_secs),
        })
    }

    /// Text of the first descendant with the given class, if any
    async fn child_text(element: &WebElement, class: &str) -> Option<String> {
        let child = element.find(By::ClassName(class)).await.ok()?;
        child.text().await.ok()
    }

    /// Attribute of the first descendant with the given class, if any
    async fn child_attr(element: &WebElement, class: &str, attr: &str) -> Option<String> {
        let child = element.find(By::ClassName(class)).await.ok()?;
        child.attr(attr).await.ok().flatten()
    }
}

#[async_trait]
impl PageDriver for BrowserSession {
    async fn load_page(&self, url: &str) -> Result<()> {
        debug!("Navigating to: {}", url);
        self.driver.goto(url).await
            .context(format!("Failed to navigate to URL: {}", url))?;

        Ok(())
    }

    async fn click_load_more(&self) -> Result<bool> {
        let button = match self.driver.query(By::ClassName(&self.selectors.load_more))
            .wait(self.element_wait, Duration::from_millis(500))
            .and_clickable()
            .first()
            .await
        {
            Ok(button) => button,
            Err(e) => {
                debug!("No clickable 'load more' control: {}", e);
                return Ok(false);
            }
        };

        // Script click avoids overlay interception
        self.driver.execute("arguments[0].click();", vec![button.to_json()?]).await
            .context("Failed to click 'load more'")?;

        Ok(true)
    }

    async fn reset_session(&self) -> Result<()> {
        self.driver.delete_all_cookies().await
            .context("Failed to delete cookies")?;

        self.driver.execute("window.scrollTo(0, document.body.scrollHeight);", Vec::new()).await
            .context("Failed to scroll to the end of the page")?;

        Ok(())
    }

    async fn extract_items(&self) -> Result<Vec<RawCommentItem>> {
        let elements = self.driver.find_all(By::ClassName(&self.selectors.comment)).await
            .context("Failed to find comment elements")?;

        let mut items = Vec::with_capacity(elements.len());
        for element in &elements {
            items.push(RawCommentItem {
                element_id: element.attr("id").await.ok().flatten(),
                username: Self::child_text(element, &self.selectors.username).await,
                body: Self::child_text(element, &self.selectors.body).await,
                meta: Self::child_text(element, &self.selectors.meta).await,
                rating_style: Self::child_attr(element, &self.selectors.rating_fill, "style").await,
            });
        }

        Ok(items)
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.driver.clone().quit().await {
            error!("Error closing browser session: {}", e);
        }
        debug!("Browser session closed");

        Ok(())
    }
}

/// Starts a new Chrome session per crawl target
pub struct WebDriverFactory {
    browser: BrowserSettings,
    selectors: Selectors,
}

impl WebDriverFactory {
    pub fn new(browser: BrowserSettings, selectors: Selectors) -> Self {
        Self { browser, selectors }
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn open(&self) -> Result<Box<dyn PageDriver>> {
        let session = BrowserSession::start(&self.browser, self.selectors.clone()).await?;
        Ok(Box::new(session))
    }
}
