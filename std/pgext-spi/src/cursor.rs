use std::fmt;
use std::iter::FusedIterator;
use std::rc::Rc;

use pgext_core::{Datum, SpiTupleTable};

use crate::session::Spi;
use crate::SpiHost;

/// Pull iterator over the rows of one SPI query.
///
/// Each item holds the row's `N` attributes, `None` for NULL. The first
/// `next` past the last row finishes the SPI connection; later calls keep
/// returning `None`.
pub struct Cursor<'h, H: SpiHost + ?Sized, const N: usize> {
    session: Option<Spi<'h, H>>,
    host: &'h H,
    table: Rc<SpiTupleTable>,
    position: u64,
    total: u64,
}

impl<'h, H: SpiHost + ?Sized, const N: usize> Cursor<'h, H, N> {
    pub(crate) fn new(session: Spi<'h, H>, table: Rc<SpiTupleTable>, total: u64) -> Self {
        Self {
            host: session.host(),
            session: Some(session),
            table,
            position: 0,
            total,
        }
    }

    /// Rows in the result.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// True once the connection has been finished.
    pub fn is_exhausted(&self) -> bool {
        self.session.is_none()
    }

    pub fn table(&self) -> &SpiTupleTable {
        &self.table
    }
}

impl<H: SpiHost + ?Sized, const N: usize> Iterator for Cursor<'_, H, N> {
    type Item = [Option<Datum>; N];

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.total {
            if let Some(session) = self.session.take() {
                tracing::debug!(rows = self.total, "cursor exhausted");
                session.finish();
            }
            return None;
        }

        let tuple = &self.table.vals[self.position as usize];
        let mut values = [Datum::NULL; N];
        let mut nulls = [false; N];
        self.host
            .heap_deform_tuple(tuple, &self.table.tupdesc, &mut values, &mut nulls);
        self.position += 1;

        let mut row = [None; N];
        for (slot, (value, isnull)) in row.iter_mut().zip(values.into_iter().zip(nulls)) {
            if !isnull {
                *slot = Some(value);
            }
        }
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total.saturating_sub(self.position) as usize;
        (remaining, Some(remaining))
    }
}

impl<H: SpiHost + ?Sized, const N: usize> ExactSizeIterator for Cursor<'_, H, N> {}

impl<H: SpiHost + ?Sized, const N: usize> FusedIterator for Cursor<'_, H, N> {}

impl<H: SpiHost + ?Sized, const N: usize> fmt::Debug for Cursor<'_, H, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("arity", &N)
            .field("position", &self.position)
            .field("total", &self.total)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::mock::ScriptedSpi;
    use crate::session::query;

    #[test]
    fn test_k_rows_then_none_and_single_finish() {
        let host = ScriptedSpi::with_rows(&[&[Some(1), Some(10)], &[Some(2), None], &[None, Some(30)]]);
        let mut cursor = query::<_, 2>(&host, "select a, b from t");
        assert_eq!(cursor.len(), 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let row = cursor.next().unwrap();
            seen.push(row.map(|v| v.map(|d| d.as_i64())));
            assert_eq!(host.finishes.get(), 0);
        }
        assert_eq!(
            seen,
            vec![[Some(1), Some(10)], [Some(2), None], [None, Some(30)]]
        );

        assert!(cursor.next().is_none());
        assert_eq!(host.finishes.get(), 1);
        assert!(cursor.is_exhausted());

        for _ in 0..3 {
            assert!(cursor.next().is_none());
        }
        assert_eq!(host.finishes.get(), 1);
        assert_eq!(host.connects.get(), 1);
    }

    #[test]
    fn test_empty_result_finishes_on_first_next() {
        let host = ScriptedSpi::with_rows(&[]);
        host.natts.set(1);
        let mut cursor = query::<_, 1>(&host, "select x from empty");
        assert_eq!(host.finishes.get(), 0);
        assert!(cursor.next().is_none());
        assert_eq!(host.finishes.get(), 1);
    }

    #[test]
    fn test_for_loop_consumes_and_finishes() {
        let host = ScriptedSpi::with_rows(&[&[Some(5)], &[Some(6)], &[Some(7)], &[Some(8)]]);
        let total: i64 = query::<_, 1>(&host, "select n from t")
            .filter_map(|[n]| n.map(|d| d.as_i64()))
            .sum();
        assert_eq!(total, 26);
        assert_eq!(host.finishes.get(), 1);
    }

    #[test]
    fn test_abandoned_cursor_leaves_connection_open() {
        let host = ScriptedSpi::with_rows(&[&[Some(1)], &[Some(2)]]);
        {
            let mut cursor = query::<_, 1>(&host, "select n from t");
            cursor.next();
        }
        assert_eq!(host.connects.get(), 1);
        assert_eq!(host.finishes.get(), 0);
    }

    #[test]
    fn test_processed_bounds_rows() {
        let host = ScriptedSpi::with_rows(&[&[Some(1)], &[Some(2)], &[Some(3)]]);
        host.processed.set(2);
        let rows: Vec<_> = query::<_, 1>(&host, "select n from t").collect();
        assert_eq!(rows.len(), 2);
    }
}
