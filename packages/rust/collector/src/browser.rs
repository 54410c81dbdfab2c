//! Headless Chrome engine for the live, client-rendered composition page.

use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use indexflow_shared::{IndexFlowError, RawTable, Result, SourceConfig, TableView};
use tracing::{debug, info, instrument};

use crate::source::PagedTableSource;

/// Chrome is killed when idle longer than this.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(120);

/// An exclusively owned browser with one tab.
///
/// Dropping the session closes the tab and terminates the browser process, so
/// every exit path of a collector pass releases it.
pub struct BrowserSession {
    tab: Arc<Tab>,
    _browser: Browser,
}

impl BrowserSession {
    pub fn launch(headless: bool) -> Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(headless)
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .build()
            .map_err(|e| IndexFlowError::Session(format!("invalid launch options: {e}")))?;

        let browser = Browser::new(options)
            .map_err(|e| IndexFlowError::Session(format!("failed to launch Chrome: {e}")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| IndexFlowError::Session(format!("failed to open tab: {e}")))?;

        debug!(headless, "browser session opened");
        Ok(Self {
            tab,
            _browser: browser,
        })
    }

    pub fn tab(&self) -> &Tab {
        &self.tab
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(true) {
            debug!(error = %e, "tab close failed");
        }
        debug!("browser session closed");
    }
}

/// Reads one table view through a dedicated [`BrowserSession`].
pub struct BrowserTableSource {
    config: SourceConfig,
    view: TableView,
    session: BrowserSession,
}

impl BrowserTableSource {
    /// Launch a session and load the source page.
    #[instrument(skip(config), fields(url = %config.url))]
    pub fn open(config: SourceConfig, view: TableView) -> Result<Self> {
        let session = BrowserSession::launch(config.headless)?;

        session
            .tab()
            .navigate_to(&config.url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| IndexFlowError::page_load(format!("{}: {e}", config.url)))?;

        info!(%view, "source page loaded");
        Ok(Self {
            config,
            view,
            session,
        })
    }

    fn wait_for_table(&self) -> Result<Element<'_>> {
        self.session
            .tab()
            .wait_for_element_with_custom_timeout(&self.config.table_selector, self.config.wait_timeout)
            .map_err(|e| {
                IndexFlowError::page_load(format!(
                    "'{}' not found after {:?}: {e}",
                    self.config.table_selector, self.config.wait_timeout
                ))
            })
    }

    fn select_segment(&self) -> Result<()> {
        let tab = self.session.tab();
        tab.wait_for_element_with_custom_timeout(&self.config.segment_selector, self.config.wait_timeout)
            .map_err(|e| {
                IndexFlowError::page_load(format!(
                    "segment filter '{}' not found: {e}",
                    self.config.segment_selector
                ))
            })?;

        let script = segment_script(&self.config.segment_selector, &self.config.segment_value)?;
        let result = tab
            .evaluate(&script, false)
            .map_err(|e| IndexFlowError::Session(format!("segment script failed: {e}")))?;

        if result.value.as_ref().and_then(|v| v.as_bool()) != Some(true) {
            return Err(IndexFlowError::page_load(format!(
                "segment filter '{}' did not accept value '{}'",
                self.config.segment_selector, self.config.segment_value
            )));
        }

        std::thread::sleep(self.config.settle);
        Ok(())
    }
}

impl PagedTableSource for BrowserTableSource {
    fn view(&self) -> TableView {
        self.view
    }

    #[instrument(skip_all, fields(view = %self.view))]
    fn setup(&mut self) -> Result<()> {
        self.wait_for_table()?;
        if self.view == TableView::Sectors {
            self.select_segment()?;
            self.wait_for_table()?;
        }
        Ok(())
    }

    fn goto_page(&mut self, page: usize) -> Result<()> {
        let xpath = self.config.pager_xpath_for(page);
        self.session
            .tab()
            .wait_for_xpath_with_custom_timeout(&xpath, self.config.wait_timeout)
            .and_then(|link| link.click().map(|_| ()))
            .map_err(|e| IndexFlowError::pagination(page, format!("pager link {xpath}: {e}")))?;

        std::thread::sleep(self.config.settle);
        Ok(())
    }

    fn read_table(&mut self) -> Result<RawTable> {
        let html = self
            .wait_for_table()?
            .get_content()
            .map_err(|e| IndexFlowError::page_load(format!("failed to read table HTML: {e}")))?;
        Ok(RawTable::new(html))
    }
}

/// Script that sets a `<select>` value and fires its change event.
/// Evaluates to `true` when the element exists.
fn segment_script(selector: &str, value: &str) -> Result<String> {
    Ok(format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return false; \
         el.value = {val}; \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
         return true; }})()",
        sel = js_literal(selector)?,
        val = js_literal(value)?,
    ))
}

/// JSON string literals are valid JS string literals.
fn js_literal(s: &str) -> Result<String> {
    serde_json::to_string(s)
        .map_err(|e| IndexFlowError::config(format!("cannot quote '{s}' for script: {e}")))
}
