//! Sequential pagination over a [`PagedTableSource`].

use std::iter::FusedIterator;

use indexflow_shared::{RawPage, RawTable, Result, TableView};
use tracing::{debug, error, warn};

use crate::source::{PagedTableSource, as_pagination_error};

/// Walk `page_count` pages of `source`, lazily.
///
/// Page 1 is read as loaded. Pages 2..=N are navigated to first; a navigation
/// failure skips that page and the walk continues. A failure to read the
/// table ends the walk: the error is yielded once and the iterator is fused.
pub fn walk<S: PagedTableSource>(page_count: usize, source: S) -> PageWalk<S> {
    PageWalk {
        source,
        page_count,
        next_page: 1,
        skipped: Vec::new(),
        finished: false,
    }
}

/// Closure form of [`walk`]: `page_ready` reads the displayed table,
/// `goto_page` activates the pager control for a page.
pub fn walk_fns<R, G>(page_count: usize, page_ready: R, goto_page: G) -> PageWalk<FnSource<R, G>>
where
    R: FnMut() -> Result<RawTable>,
    G: FnMut(usize) -> Result<()>,
{
    walk(page_count, FnSource::new(page_ready, goto_page))
}

/// Lazy sequence of pages produced by [`walk`].
#[derive(Debug)]
pub struct PageWalk<S> {
    source: S,
    page_count: usize,
    next_page: usize,
    skipped: Vec<usize>,
    finished: bool,
}

impl<S> PageWalk<S> {
    /// Pages whose navigation failed so far.
    pub fn skipped(&self) -> &[usize] {
        &self.skipped
    }
}

impl<S: PagedTableSource> Iterator for PageWalk<S> {
    type Item = Result<RawPage>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished && self.next_page <= self.page_count {
            let page = self.next_page;
            self.next_page += 1;
            let view = self.source.view();

            if page > 1 {
                if let Err(e) = self.source.goto_page(page) {
                    let err = as_pagination_error(page, e);
                    warn!(%view, page, error = %err, "navigation failed, skipping page");
                    self.skipped.push(page);
                    continue;
                }
            }

            return match self.source.read_table() {
                Ok(table) => {
                    debug!(%view, page, bytes = table.html.len(), "page read");
                    Some(Ok(RawPage { index: page, table }))
                }
                Err(e) => {
                    error!(%view, page, error = %e, "table not available, aborting walk");
                    self.finished = true;
                    Some(Err(e))
                }
            };
        }

        None
    }
}

impl<S: PagedTableSource> FusedIterator for PageWalk<S> {}

/// Adapts a pair of closures to [`PagedTableSource`].
pub struct FnSource<R, G> {
    view: TableView,
    page_ready: R,
    goto_page: G,
}

impl<R, G> FnSource<R, G> {
    /// Closure sources report [`TableView::Constituents`] unless told otherwise.
    pub fn new(page_ready: R, goto_page: G) -> Self {
        Self {
            view: TableView::Constituents,
            page_ready,
            goto_page,
        }
    }

    pub fn with_view(mut self, view: TableView) -> Self {
        self.view = view;
        self
    }
}

impl<R, G> std::fmt::Debug for FnSource<R, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource").field("view", &self.view).finish()
    }
}

impl<R, G> PagedTableSource for FnSource<R, G>
where
    R: FnMut() -> Result<RawTable>,
    G: FnMut(usize) -> Result<()>,
{
    fn view(&self) -> TableView {
        self.view
    }

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn goto_page(&mut self, page: usize) -> Result<()> {
        (self.goto_page)(page)
    }

    fn read_table(&mut self) -> Result<RawTable> {
        (self.page_ready)()
    }
}
