//! Generic HTML table parsing: header grid resolution and body cell text.
//!
//! Cells spanning several columns or rows are replicated into every slot they
//! cover, so each row of the resulting grid has one entry per column.

use scraper::{ElementRef, Html, Selector};

/// Upper bounds browsers apply to `colspan` and `rowspan`.
const MAX_COLSPAN: usize = 1000;
const MAX_ROWSPAN: usize = 65534;

/// A table reduced to resolved column labels and cell text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTable {
    /// One label per column, after collapsing multi-level headers.
    pub columns: Vec<String>,
    /// Body rows (`<tbody>` then `<tfoot>`), padded or truncated to `columns.len()`.
    pub rows: Vec<Vec<String>>,
}

impl ParsedTable {
    /// Index of the column labelled `label`.
    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == label)
    }
}

#[derive(Debug, Clone)]
struct Cell {
    text: String,
    is_header: bool,
    colspan: usize,
    rowspan: usize,
}

/// Parse every `<table>` element in `html`.
pub fn parse_tables(html: &str) -> Vec<ParsedTable> {
    let doc = Html::parse_fragment(html);
    let table_sel = Selector::parse("table").unwrap();

    doc.select(&table_sel).map(parse_table).collect()
}

fn parse_table(table: ElementRef<'_>) -> ParsedTable {
    let thead_sel = Selector::parse("thead > tr").unwrap();
    let tbody_sel = Selector::parse("tbody > tr").unwrap();
    let tfoot_sel = Selector::parse("tfoot > tr").unwrap();

    let mut header_rows: Vec<Vec<Cell>> = table.select(&thead_sel).map(row_cells).collect();
    let mut body_rows: Vec<Vec<Cell>> = table.select(&tbody_sel).map(row_cells).collect();

    // Without a <thead>, leading rows made only of <th> cells are the header.
    if header_rows.is_empty() {
        let leading = body_rows
            .iter()
            .take_while(|row| !row.is_empty() && row.iter().all(|c| c.is_header))
            .count();
        header_rows = body_rows.drain(..leading).collect();
    }
    body_rows.extend(table.select(&tfoot_sel).map(row_cells));

    let header_grid = expand_grid(&header_rows);
    let body_grid = expand_grid(&body_rows);

    let width = header_grid
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or_else(|| body_grid.iter().map(Vec::len).max().unwrap_or(0));

    let columns = (0..width)
        .map(|col| collapse_label(&header_grid, col))
        .collect();

    let rows = body_grid
        .into_iter()
        .map(|mut row| {
            row.resize(width, String::new());
            row
        })
        .collect();

    ParsedTable { columns, rows }
}

/// Deepest non-empty label for `col`, falling back towards the top level.
fn collapse_label(header_grid: &[Vec<String>], col: usize) -> String {
    header_grid
        .iter()
        .rev()
        .filter_map(|level| level.get(col))
        .find(|label| !label.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn row_cells(row: ElementRef<'_>) -> Vec<Cell> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .map(|el| Cell {
            text: normalize_text(el),
            is_header: el.value().name() == "th",
            colspan: span_attr(el, "colspan", MAX_COLSPAN),
            rowspan: span_attr(el, "rowspan", MAX_ROWSPAN),
        })
        .collect()
}

fn span_attr(el: ElementRef<'_>, name: &str, max: usize) -> usize {
    el.value()
        .attr(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .map_or(1, |n| n.min(max))
}

/// Cell text with runs of whitespace collapsed to one space.
fn normalize_text(el: ElementRef<'_>) -> String {
    let text: String = el.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lay cells out on a rectangular grid, honoring colspan and rowspan.
fn expand_grid(rows: &[Vec<Cell>]) -> Vec<Vec<String>> {
    // Per column: (rows still covered, text) of a cell spanning downwards.
    let mut carry: Vec<(usize, String)> = Vec::new();
    let mut grid = Vec::with_capacity(rows.len());

    for row in rows {
        let mut out: Vec<String> = Vec::new();
        let mut cells = row.iter();

        loop {
            let col = out.len();
            if let Some((remaining, text)) = carry.get_mut(col).filter(|(r, _)| *r > 0) {
                *remaining -= 1;
                out.push(text.clone());
                continue;
            }

            let Some(cell) = cells.next() else {
                // Flush spans that still cover columns to the right.
                if carry[col.min(carry.len())..].iter().any(|(r, _)| *r > 0) {
                    out.push(String::new());
                    continue;
                }
                break;
            };

            for _ in 0..cell.colspan {
                let col = out.len();
                if carry.len() <= col {
                    carry.resize(col + 1, (0, String::new()));
                }
                carry[col] = (cell.rowspan - 1, cell.text.clone());
                out.push(cell.text.clone());
            }
        }

        grid.push(out);
    }

    grid
}
