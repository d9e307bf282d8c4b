//! The library's entities.

pub mod borrowers;
pub mod checkouts;
pub mod items;

use std::sync::Arc;

pub use borrowers::{Borrower, Borrowers};
pub use checkouts::{Checkout, Checkouts, FeeInfo, History, Ledger};
pub use items::{Item, Items};

use crate::routes::RouteRegistrar;
use crate::store::Store;

/// Every entity over one shared store.
pub struct Library {
    pub borrowers: Arc<Borrowers>,
    pub items: Arc<Items>,
    pub checkouts: Arc<Checkouts>,
    pub history: Arc<History>,
}

impl Library {
    pub fn new(store: Arc<dyn Store>, loan_days: i64) -> Self {
        let ledger = Arc::new(Ledger::new(store.clone()));
        Library {
            borrowers: Arc::new(Borrowers::new(store.clone(), ledger.clone(), loan_days)),
            items: Arc::new(Items::new(store, ledger.clone(), loan_days)),
            checkouts: Arc::new(Checkouts::new(ledger.clone())),
            history: Arc::new(History::new(ledger)),
        }
    }

    /// Register the REST routes of every entity and its custom methods.
    pub fn register(&self, registrar: &mut RouteRegistrar) {
        registrar.register_entity(self.borrowers.clone(), &["payFees", "renewAllItems"]);
        registrar.register_entity(self.items.clone(), &["checkout", "checkin", "renew"]);
        registrar.register_entity(self.checkouts.clone(), &["payFee"]);
        registrar.register_entity(self.history.clone(), &["payFee"]);
    }
}
