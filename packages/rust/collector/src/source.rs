//! The paged table capability shared by every fetch engine.

use indexflow_shared::{
    IndexFlowError, RawTable, Result, SourceConfig, SourceEngine, TableView,
};

/// A remote table split across pages, read one page at a time.
///
/// One value drives one exclusive session against the remote page. A fresh
/// source is opened per collector pass; sources are never restarted.
pub trait PagedTableSource {
    /// Which table view this source reads.
    fn view(&self) -> TableView;

    /// One-off preparation before page 1 is read (e.g. selecting a filter).
    fn setup(&mut self) -> Result<()>;

    /// Navigate to `page` (1-based). Failures are recoverable: the walk skips
    /// that page.
    fn goto_page(&mut self, page: usize) -> Result<()>;

    /// Read the table currently displayed. Failing to find the table is a
    /// fatal [`IndexFlowError::PageLoad`].
    fn read_table(&mut self) -> Result<RawTable>;
}

impl<S: PagedTableSource + ?Sized> PagedTableSource for &mut S {
    fn view(&self) -> TableView {
        (**self).view()
    }

    fn setup(&mut self) -> Result<()> {
        (**self).setup()
    }

    fn goto_page(&mut self, page: usize) -> Result<()> {
        (**self).goto_page(page)
    }

    fn read_table(&mut self) -> Result<RawTable> {
        (**self).read_table()
    }
}

impl<S: PagedTableSource + ?Sized> PagedTableSource for Box<S> {
    fn view(&self) -> TableView {
        (**self).view()
    }

    fn setup(&mut self) -> Result<()> {
        (**self).setup()
    }

    fn goto_page(&mut self, page: usize) -> Result<()> {
        (**self).goto_page(page)
    }

    fn read_table(&mut self) -> Result<RawTable> {
        (**self).read_table()
    }
}

/// Opens one fresh source per collector pass.
pub trait SourceFactory {
    fn open(&self, view: TableView) -> Result<Box<dyn PagedTableSource>>;
}

/// Factory that picks the engine from configuration.
#[derive(Debug, Clone)]
pub struct TableSourceFactory {
    config: SourceConfig,
}

impl TableSourceFactory {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

impl SourceFactory for TableSourceFactory {
    fn open(&self, view: TableView) -> Result<Box<dyn PagedTableSource>> {
        match self.config.engine {
            SourceEngine::Http => Ok(Box::new(crate::http::HttpTableSource::new(
                self.config.clone(),
                view,
            )?)),
            #[cfg(feature = "browser")]
            SourceEngine::Browser => Ok(Box::new(crate::browser::BrowserTableSource::open(
                self.config.clone(),
                view,
            )?)),
            #[cfg(not(feature = "browser"))]
            SourceEngine::Browser => Err(IndexFlowError::config(
                "the browser engine is not compiled in; rebuild with the `browser` feature \
                 or set source.engine = \"http\"",
            )),
        }
    }
}

/// Treat any navigation failure as a recoverable pagination error for `page`.
pub(crate) fn as_pagination_error(page: usize, err: IndexFlowError) -> IndexFlowError {
    match err {
        IndexFlowError::Pagination { .. } => err,
        other => IndexFlowError::pagination(page, other.to_string()),
    }
}
