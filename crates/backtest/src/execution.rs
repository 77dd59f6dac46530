use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info};

use straddle_core::OrderCoordinator;

/// One instruction accepted by the paper coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRecord {
    InitialStraddle {
        call_id: String,
        put_id: String,
        quantity: Decimal,
    },
    Shift {
        from_id: String,
        to_id: String,
        quantity: Decimal,
    },
    CloseAll {
        ids: Vec<String>,
    },
}

#[derive(Debug, Default)]
struct Book {
    /// Net short quantity per contract id.
    short: HashMap<String, Decimal>,
    orders: Vec<OrderRecord>,
    fail_next: u32,
}

/// Simulated order coordinator that keeps a net short book.
///
/// Instructions fill immediately. [`fail_next`](Self::fail_next) makes the
/// following calls fail without touching the book.
#[derive(Debug, Default)]
pub struct PaperOrderCoordinator {
    book: Mutex<Book>,
}

impl PaperOrderCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next `count` instructions.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Every accepted instruction in order.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderRecord> {
        self.lock().orders.clone()
    }

    /// Net short quantity held in `id`.
    #[must_use]
    pub fn short_quantity(&self, id: &str) -> Decimal {
        self.lock().short.get(id).copied().unwrap_or(Decimal::ZERO)
    }

    /// Contract ids with a non-zero short quantity, sorted.
    #[must_use]
    pub fn open_positions(&self) -> Vec<(String, Decimal)> {
        let book = self.lock();
        let mut open: Vec<(String, Decimal)> = book
            .short
            .iter()
            .filter(|(_, qty)| !qty.is_zero())
            .map(|(id, qty)| (id.clone(), *qty))
            .collect();
        open.sort();
        open
    }

    fn lock(&self) -> MutexGuard<'_, Book> {
        match self.book.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn admit(book: &mut Book, action: &str) -> Result<()> {
        if book.fail_next > 0 {
            book.fail_next -= 1;
            bail!("paper coordinator rejected {action}");
        }
        Ok(())
    }
}

#[async_trait]
impl OrderCoordinator for PaperOrderCoordinator {
    async fn place_initial_straddle(
        &self,
        call_id: &str,
        put_id: &str,
        quantity: Decimal,
    ) -> Result<()> {
        let mut book = self.lock();
        Self::admit(&mut book, "initial straddle")?;

        *book.short.entry(call_id.to_string()).or_default() += quantity;
        *book.short.entry(put_id.to_string()).or_default() += quantity;
        book.orders.push(OrderRecord::InitialStraddle {
            call_id: call_id.to_string(),
            put_id: put_id.to_string(),
            quantity,
        });

        info!(call_id, put_id, %quantity, "Paper: sold straddle");
        Ok(())
    }

    async fn shift_quantity(&self, from_id: &str, to_id: &str, quantity: Decimal) -> Result<()> {
        let mut book = self.lock();
        Self::admit(&mut book, "shift")?;

        *book.short.entry(from_id.to_string()).or_default() -= quantity;
        *book.short.entry(to_id.to_string()).or_default() += quantity;
        book.orders.push(OrderRecord::Shift {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            quantity,
        });

        debug!(from_id, to_id, %quantity, "Paper: shifted quantity");
        Ok(())
    }

    async fn close_all(&self, ids: &[String]) -> Result<()> {
        let mut book = self.lock();
        Self::admit(&mut book, "close all")?;

        for id in ids {
            book.short.remove(id);
        }
        book.orders.push(OrderRecord::CloseAll { ids: ids.to_vec() });

        info!(count = ids.len(), "Paper: closed positions");
        Ok(())
    }
}
