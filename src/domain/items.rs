//! Library items and circulation: checkout, checkin, renew.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::borrowers::{Borrower, BORROWERS};
use crate::domain::checkouts::{Checkout, Ledger};
use crate::entity::{DeletePolicy, Entity, EntityBase, Flag};
use crate::error::AppError;
use crate::query::Criteria;
use crate::schema::{Column, ColumnDomain, TableSchema};
use crate::sql::SetValue;
use crate::store::Store;

pub const ITEM_STATES: &[&str] = &["CIRCULATING", "STORED", "DELETED", "LOST"];

pub static ITEMS: Lazy<TableSchema> = Lazy::new(|| {
    TableSchema::builder("items", "barcode")
        .surrogate_key("id")
        .add_column(Column::new("id").domain(ColumnDomain::Integer))
        .add_column(Column::new("barcode").label("Barcode"))
        .add_column(Column::new("title").label("Title").contains())
        .add_column(Column::new("author").label("Author").contains())
        .add_column(Column::new("seriestitle").label("Series").contains())
        .add_column(Column::new("category").label("Category"))
        .add_column(Column::new("subject").label("Subject"))
        .add_column(Column::new("age").label("Age"))
        .add_column(
            Column::new("state")
                .label("State")
                .domain(ColumnDomain::Enum(ITEM_STATES))
                .required(),
        )
        .build()
});

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: Option<i64>,
    pub barcode: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub seriestitle: Option<String>,
    pub category: Option<String>,
    pub subject: Option<String>,
    pub age: Option<String>,
    pub state: String,
    /// Current checkout, with the `checkout` flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout: Option<Checkout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Checkout>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ItemFlag {
    Checkout,
    History,
}

impl Flag for ItemFlag {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "checkout" => Some(ItemFlag::Checkout),
            "history" => Some(ItemFlag::History),
            _ => None,
        }
    }
}

pub enum ItemExpansion {
    Checkout(Option<Checkout>),
    History(Vec<Checkout>),
}

#[derive(Deserialize)]
struct CheckoutRequest {
    borrowernumber: i64,
}

pub struct Items {
    base: EntityBase<Item>,
    borrowers: EntityBase<Borrower>,
    ledger: Arc<Ledger>,
    loan_days: i64,
}

impl Items {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<Ledger>, loan_days: i64) -> Self {
        Items {
            base: EntityBase::new(store.clone(), &ITEMS),
            borrowers: EntityBase::new(store, &BORROWERS),
            ledger,
            loan_days,
        }
    }

    fn due_date(&self) -> NaiveDate {
        today() + Duration::days(self.loan_days)
    }

    async fn current_checkout(&self, barcode: &str) -> Result<Option<Checkout>, AppError> {
        self.ledger
            .current()
            .find(&Criteria::new().with("barcode", barcode))
            .await
    }

    async fn checkout(&self, key: &str, body: Value) -> Result<Item, AppError> {
        let request: CheckoutRequest = serde_json::from_value(body)
            .map_err(|_| AppError::Validation(vec!["borrowernumber".into()]))?;
        let mut item = self.base.get(key).await?;
        if self.current_checkout(&item.barcode).await?.is_some() {
            return Err(AppError::conflict(
                "ALREADY_CHECKED_OUT",
                format!("item {} is already checked out", item.barcode),
            ));
        }
        let borrower = self.borrowers.get(&request.borrowernumber.to_string()).await?;
        let mut row = Map::new();
        row.insert("barcode".into(), json!(item.barcode));
        row.insert("borrowernumber".into(), json!(borrower.borrowernumber));
        row.insert("checkout_date".into(), json!(today()));
        row.insert("date_due".into(), json!(self.due_date()));
        row.insert("fine_due".into(), json!(0));
        row.insert("fine_paid".into(), json!(0));
        let checkout = self.ledger.current().create(&row).await?;
        tracing::info!(barcode = %item.barcode, borrowernumber = borrower.borrowernumber, "item checked out");
        item.checkout = Some(checkout);
        Ok(item)
    }

    /// Move the current checkout into history, returned today.
    async fn checkin(&self, key: &str) -> Result<Item, AppError> {
        let item = self.base.get(key).await?;
        let checkout = self.current_checkout(&item.barcode).await?.ok_or_else(|| {
            AppError::conflict("NOT_CHECKED_OUT", format!("item {} is not checked out", item.barcode))
        })?;
        let mut row = Map::new();
        row.insert("barcode".into(), json!(checkout.barcode));
        row.insert("borrowernumber".into(), json!(checkout.borrowernumber));
        row.insert("checkout_date".into(), json!(checkout.checkout_date));
        row.insert("returndate".into(), json!(today()));
        row.insert("fine_due".into(), json!(checkout.fine_due));
        row.insert("fine_paid".into(), json!(checkout.fine_paid));
        self.ledger.returned().create(&row).await?;
        self.ledger
            .current()
            .remove(&checkout.barcode, DeletePolicy::Hard)
            .await?;
        tracing::info!(barcode = %item.barcode, "item checked in");
        Ok(item)
    }

    async fn renew(&self, key: &str) -> Result<Item, AppError> {
        let mut item = self.base.get(key).await?;
        let criteria = Criteria::new().with("barcode", item.barcode.as_str());
        let due = SetValue::Value(json!(self.due_date()));
        let renewed = self
            .ledger
            .current()
            .update_where(&criteria, &[("date_due", due)])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                AppError::conflict("NOT_CHECKED_OUT", format!("item {} is not checked out", item.barcode))
            })?;
        item.checkout = Some(renewed);
        Ok(item)
    }
}

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[async_trait]
impl Entity for Items {
    type Record = Item;
    type Flag = ItemFlag;
    type Expansion = ItemExpansion;

    fn base(&self) -> &EntityBase<Item> {
        &self.base
    }

    async fn load(&self, item: &Item, flag: ItemFlag) -> Result<ItemExpansion, AppError> {
        Ok(match flag {
            ItemFlag::Checkout => ItemExpansion::Checkout(self.current_checkout(&item.barcode).await?),
            ItemFlag::History => ItemExpansion::History(self.ledger.item_history(&item.barcode).await?),
        })
    }

    fn attach(item: &mut Item, expansion: ItemExpansion) {
        match expansion {
            ItemExpansion::Checkout(checkout) => item.checkout = checkout,
            ItemExpansion::History(history) => item.history = Some(history),
        }
    }

    async fn invoke(&self, method: &str, key: &str, body: Value) -> Result<Value, AppError> {
        let item = match method {
            "checkout" => self.checkout(key, body).await?,
            "checkin" => self.checkin(key).await?,
            "renew" => self.renew(key).await?,
            _ => return Err(AppError::UnknownMethod(method.to_string())),
        };
        Ok(serde_json::to_value(item)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checkouts::CHECKOUTS;
    use crate::entity::DynEntity;
    use crate::store::MockStore;

    fn item_row() -> Value {
        json!({
            "id": 3, "barcode": "X1", "title": "Dune", "author": "Herbert",
            "seriestitle": null, "category": "SF", "subject": null, "age": null,
            "state": "CIRCULATING"
        })
    }

    fn checkout_row() -> Value {
        json!({
            "id": 8, "barcode": "X1", "borrowernumber": 4,
            "checkout_date": "2024-03-01", "date_due": "2024-03-22",
            "fine_due": 1.5, "fine_paid": 0.0
        })
    }

    fn items(store: MockStore) -> Items {
        let store: Arc<dyn Store> = Arc::new(store);
        Items::new(store.clone(), Arc::new(Ledger::new(store)), 21)
    }

    #[tokio::test]
    async fn get_without_flags_leaves_expansions_absent() {
        let mut store = MockStore::new();
        store.expect_fetch_optional().times(1).returning(|_| Ok(Some(item_row())));
        let item = items(store).fetch("X1", None).await.unwrap();
        assert_eq!(item["title"], json!("Dune"));
        assert!(item.get("checkout").is_none());
        assert!(item.get("history").is_none());
    }

    #[tokio::test]
    async fn checkout_flag_attaches_current_checkout() {
        let mut store = MockStore::new();
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.contains(r#"FROM "items""#))
            .returning(|_| Ok(Some(item_row())));
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.contains(r#"FROM "checkouts""#))
            .returning(|_| Ok(Some(checkout_row())));
        let item = items(store).fetch("X1", Some("checkout,bogus")).await.unwrap();
        assert_eq!(item["checkout"]["borrowernumber"], json!(4));
        assert!(item.get("history").is_none());
    }

    #[tokio::test]
    async fn checkout_of_checked_out_item_conflicts() {
        let mut store = MockStore::new();
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.contains(r#"FROM "items""#))
            .returning(|_| Ok(Some(item_row())));
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.contains(r#"FROM "checkouts""#))
            .returning(|_| Ok(Some(checkout_row())));
        let err = items(store)
            .invoke_method("checkout", "X1", json!({ "borrowernumber": 4 }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
        assert_eq!(err.code(), "ALREADY_CHECKED_OUT");
    }

    #[tokio::test]
    async fn checkout_without_borrower_fails_validation() {
        let store = MockStore::new();
        let err = items(store)
            .invoke_method("checkout", "X1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref f) if f == &vec!["borrowernumber".to_string()]));
    }

    #[tokio::test]
    async fn checkout_creates_row_due_after_loan_period() {
        let due = (today() + Duration::days(21)).format("%Y-%m-%d").to_string();
        let mut store = MockStore::new();
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.contains(r#"FROM "items""#))
            .returning(|_| Ok(Some(item_row())));
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.starts_with("SELECT") && q.sql.contains(r#"FROM "checkouts""#))
            .returning(|_| Ok(None));
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.contains(r#"FROM "borrowers""#))
            .returning(|_| {
                Ok(Some(json!({
                    "id": 1, "borrowernumber": 4, "surname": "Smith", "firstname": null,
                    "contactname": null, "phone": null, "emailaddress": "a@b.org",
                    "sycamoreid": null, "state": "ACTIVE"
                })))
            });
        let expected_due = due.clone();
        store
            .expect_fetch_optional()
            .withf(move |q| q.sql.starts_with(r#"INSERT INTO "checkouts""#) && q.params.contains(&json!(expected_due)))
            .returning(|_| Ok(Some(checkout_row())));

        let item = items(store)
            .invoke_method("checkout", "X1", json!({ "borrowernumber": 4 }))
            .await
            .unwrap();
        assert_eq!(item["checkout"]["barcode"], json!("X1"));
    }

    #[tokio::test]
    async fn checkin_moves_checkout_to_history() {
        let mut store = MockStore::new();
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.contains(r#"FROM "items""#))
            .returning(|_| Ok(Some(item_row())));
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.starts_with("SELECT") && q.sql.contains(r#"FROM "checkouts""#))
            .returning(|_| Ok(Some(checkout_row())));
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.starts_with(r#"INSERT INTO "history""#))
            .times(1)
            .returning(|_| {
                Ok(Some(json!({
                    "id": 30, "barcode": "X1", "borrowernumber": 4,
                    "checkout_date": "2024-03-01", "returndate": "2024-03-20",
                    "fine_due": 1.5, "fine_paid": 0.0
                })))
            });
        store
            .expect_execute()
            .withf(|q| q.sql.starts_with(r#"DELETE FROM "checkouts""#))
            .times(1)
            .returning(|_| Ok(1));

        let item = items(store).invoke_method("checkin", "X1", Value::Null).await.unwrap();
        assert_eq!(item["barcode"], json!("X1"));
    }

    #[tokio::test]
    async fn renew_of_idle_item_conflicts() {
        let mut store = MockStore::new();
        store
            .expect_fetch_optional()
            .returning(|_| Ok(Some(item_row())));
        store
            .expect_fetch_all()
            .withf(|q| q.sql.starts_with(r#"UPDATE "checkouts" SET "date_due" = $1::date"#))
            .returning(|_| Ok(vec![]));
        let err = items(store).invoke_method("renew", "X1", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "NOT_CHECKED_OUT");
    }

    #[test]
    fn schemas_share_barcode_domain() {
        assert!(ITEMS.natural_key().column_domain().is_text());
        assert!(CHECKOUTS.natural_key().column_domain().is_text());
    }
}
