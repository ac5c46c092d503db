use std::collections::VecDeque;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::models::MealRecord;
use crate::storage::{MealKey, MealStore};

/// Keyset-paginated iterator over a hostel's meal records.
///
/// Fetches `page_size` rows at a time; a storage error is yielded once and
/// ends the sequence.
pub struct MealCursor<'a> {
    store: MealStore<'a>,
    hostel_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
    page_size: usize,
    after: Option<MealKey>,
    buffer: VecDeque<MealRecord>,
    exhausted: bool,
}

impl<'a> MealCursor<'a> {
    pub(crate) fn new(
        store: MealStore<'a>,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            hostel_id,
            start,
            end,
            page_size,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let page = self
            .store
            .page(self.hostel_id, self.start, self.end, self.after, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(MealKey::of(last));
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for MealCursor<'_> {
    type Item = Result<MealRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
