use std::sync::Arc;

use log::debug;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::records::RawRow;

use super::decode::PageResult;
use super::executor::RequestExecutor;
use super::request::FetchRequest;

/// Follows `Next-Page` continuations until exhaustion and stitches the pages together.
pub struct PaginatingFetcher {
    executor: Arc<RequestExecutor>,
    config: Arc<Config>,
}

impl PaginatingFetcher {
    pub fn new(executor: Arc<RequestExecutor>, config: Arc<Config>) -> Self {
        Self { executor, config }
    }

    /// Fetch every page of `request`. Pages are requested strictly one after another
    /// and their rows kept in arrival order. The header is taken from the first page
    /// that carries rows; if no page does, the result is empty and headerless.
    pub async fn fetch_all(&self, request: &FetchRequest) -> Result<PageResult> {
        let format = request.output_format();
        let mut current = request.clone();
        let mut merged = PageResult::empty();
        let mut pages = 0usize;

        loop {
            let url = current.url(&self.config);
            let query = current.query_pairs();
            let page = self.executor.fetch_page(&url, &query, format).await?;
            pages += 1;

            let next = page.next_page.clone();
            absorb_page(&mut merged, page, pages)?;

            match next {
                Some(next_url) => {
                    debug!("Requesting next page for {}: {}", request, next_url);
                    current = current.with_cursor(next_url);
                }
                None => break,
            }
        }

        debug!(
            "Fetched {} rows across {} page(s) for {}",
            merged.rows.len(),
            pages,
            request
        );
        Ok(merged)
    }
}

fn absorb_page(merged: &mut PageResult, page: PageResult, page_no: usize) -> Result<()> {
    if page.rows.is_empty() {
        return Ok(());
    }

    if merged.rows.is_empty() {
        merged.columns = page.columns;
    } else if page.columns != merged.columns {
        let self_describing = page.rows.iter().all(|row| matches!(row, RawRow::Keyed(_)));
        if !self_describing {
            return Err(AppError::malformed(format!(
                "page {} header {:?} differs from first page header {:?}",
                page_no, page.columns, merged.columns
            )));
        }
        for column in page.columns {
            if !merged.columns.contains(&column) {
                merged.columns.push(column);
            }
        }
    }

    merged.rows.extend(page.rows);
    Ok(())
}
