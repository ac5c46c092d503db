use std::collections::VecDeque;

use uuid::Uuid;

use crate::error::Result;
use crate::models::PricePoint;
use crate::storage::{BazarStore, PriceKey};

/// Unit price observations for one item name, oldest first
pub struct PriceHistory<'a> {
    store: BazarStore<'a>,
    name: String,
    hostel_id: Option<Uuid>,
    market_id: Option<Uuid>,
    page_size: usize,
    after: Option<PriceKey>,
    buffer: VecDeque<PricePoint>,
    exhausted: bool,
}

impl<'a> PriceHistory<'a> {
    pub(crate) fn new(
        store: BazarStore<'a>,
        name: String,
        hostel_id: Option<Uuid>,
        market_id: Option<Uuid>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            name,
            hostel_id,
            market_id,
            page_size,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let page = self.store.price_page(
            &self.name,
            self.hostel_id,
            self.market_id,
            self.after.as_ref(),
            self.page_size,
        )?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        for (key, point) in page {
            self.after = Some(key);
            self.buffer.push_back(point);
        }
        Ok(())
    }
}

impl Iterator for PriceHistory<'_> {
    type Item = Result<PricePoint>;

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
