//! Keyset-paginated record reader shared by the SQL backends.

use pieceport_types::IndexRecord;

use crate::error;

type FetchPage<'a> =
    Box<dyn FnMut(i64, usize) -> error::Result<Vec<(i64, IndexRecord)>> + Send + 'a>;

/// Lazily pulls `(row_id, record)` pages ordered by row id.
///
/// The backend lock is only held while a page is fetched, never while
/// the caller consumes records.
pub(crate) struct PagedRecords<'a> {
    fetch: FetchPage<'a>,
    page_size: usize,
    buffer: std::vec::IntoIter<(i64, IndexRecord)>,
    last_id: i64,
    exhausted: bool,
}

impl<'a> PagedRecords<'a> {
    pub(crate) fn new(
        page_size: usize,
        fetch: impl FnMut(i64, usize) -> error::Result<Vec<(i64, IndexRecord)>> + Send + 'a,
    ) -> Self {
        Self {
            fetch: Box::new(fetch),
            page_size: page_size.max(1),
            buffer: Vec::new().into_iter(),
            last_id: 0,
            exhausted: false,
        }
    }
}

impl Iterator for PagedRecords<'_> {
    type Item = error::Result<IndexRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((id, record)) = self.buffer.next() {
                self.last_id = id;
                return Some(Ok(record));
            }
            if self.exhausted {
                return None;
            }
            match (self.fetch)(self.last_id, self.page_size) {
                Ok(page) => {
                    if page.len() < self.page_size {
                        self.exhausted = true;
                    }
                    if page.is_empty() {
                        return None;
                    }
                    self.buffer = page.into_iter();
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
