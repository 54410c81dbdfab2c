//! Static HTML engine: each page is a plain GET with query parameters.
//!
//! Suited to server-rendered mirrors of the composition page (and to tests
//! against a mock server). The live B3 page renders client-side and needs the
//! browser engine.

use std::time::Duration;

use indexflow_shared::{IndexFlowError, RawTable, Result, SourceConfig, TableView};
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use crate::source::PagedTableSource;

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("IndexFlow/", env!("CARGO_PKG_VERSION"));

/// Reads pages with blocking `reqwest`. Must not be driven from inside an
/// async runtime thread; use `spawn_blocking`.
pub struct HttpTableSource {
    config: SourceConfig,
    view: TableView,
    client: Client,
    base: Url,
    selector: Selector,
    current: Option<String>,
}

impl HttpTableSource {
    pub fn new(config: SourceConfig, view: TableView) -> Result<Self> {
        let base = Url::parse(&config.url)
            .map_err(|e| IndexFlowError::config(format!("invalid source url '{}': {e}", config.url)))?;

        let selector = Selector::parse(&config.table_selector).map_err(|e| {
            IndexFlowError::config(format!(
                "invalid table selector '{}': {e}",
                config.table_selector
            ))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.wait_timeout.max(Duration::from_secs(1)))
            .build()
            .map_err(|e| IndexFlowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            view,
            client,
            base,
            selector,
            current: None,
        })
    }

    /// URL of `page` for this source's view.
    pub fn page_url(&self, page: usize) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(&self.config.page_param, &page.to_string());
            if self.view == TableView::Sectors {
                query.append_pair(&self.config.segment_param, &self.config.segment_value);
            }
        }
        url
    }

    fn fetch(&self, page: usize) -> Result<String> {
        let url = self.page_url(page);
        debug!(%url, page, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|e| IndexFlowError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexFlowError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .map_err(|e| IndexFlowError::Network(format!("{url}: body read failed: {e}")))
    }
}

impl PagedTableSource for HttpTableSource {
    fn view(&self) -> TableView {
        self.view
    }

    #[instrument(skip_all, fields(view = %self.view))]
    fn setup(&mut self) -> Result<()> {
        let body = self
            .fetch(1)
            .map_err(|e| IndexFlowError::page_load(e.to_string()))?;
        self.current = Some(body);
        Ok(())
    }

    fn goto_page(&mut self, page: usize) -> Result<()> {
        let body = self
            .fetch(page)
            .map_err(|e| IndexFlowError::pagination(page, e.to_string()))?;
        self.current = Some(body);
        Ok(())
    }

    fn read_table(&mut self) -> Result<RawTable> {
        if self.current.is_none() {
            self.setup()?;
        }
        let body = self.current.as_deref().unwrap_or_default();

        let doc = Html::parse_document(body);
        doc.select(&self.selector)
            .next()
            .map(|table| RawTable::new(table.html()))
            .ok_or_else(|| {
                IndexFlowError::page_load(format!(
                    "no element matching '{}' on {} page",
                    self.config.table_selector, self.view
                ))
            })
    }
}
