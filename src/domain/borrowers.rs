//! Borrowers (families) with their checkouts, history and fees.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::checkouts::{Checkout, FeeInfo, Ledger};
use crate::domain::items::today;
use crate::entity::{DeletePolicy, Entity, EntityBase, Flag, Flags};
use crate::error::{AppError, AuthFailure};
use crate::query::{Criteria, QueryOptions};
use crate::routes::{Reply, RouteEntry};
use crate::schema::{Column, ColumnDomain, TableSchema};
use crate::sql::SetValue;
use crate::store::Store;

pub const BORROWER_STATES: &[&str] = &["ACTIVE", "INACTIVE"];

/// One or more addresses separated by commas.
const EMAIL_LIST: &str = r"^\s*[^@\s,]+@[^@\s,]+(\s*,\s*[^@\s,]+@[^@\s,]+)*\s*$";

pub static BORROWERS: Lazy<TableSchema> = Lazy::new(|| {
    TableSchema::builder("borrowers", "borrowernumber")
        .surrogate_key("id")
        .add_column(Column::new("id").domain(ColumnDomain::Integer))
        .add_column(
            Column::new("borrowernumber")
                .label("Borrower number")
                .domain(ColumnDomain::Integer)
                .internal(),
        )
        .add_column(Column::new("surname").label("Last name").contains())
        .add_column(Column::new("firstname").label("First name").contains())
        .add_column(Column::new("contactname").label("Contact name").contains())
        .add_column(Column::new("phone").label("Phone number"))
        .add_column(
            Column::new("emailaddress")
                .label("Email")
                .domain(ColumnDomain::pattern(EMAIL_LIST))
                .contains()
                .required(),
        )
        .add_column(Column::new("sycamoreid").label("Sycamore ID"))
        .add_column(
            Column::new("state")
                .domain(ColumnDomain::Enum(BORROWER_STATES))
                .required(),
        )
        .build()
});

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Borrower {
    pub id: Option<i64>,
    pub borrowernumber: i64,
    pub surname: Option<String>,
    pub firstname: Option<String>,
    pub contactname: Option<String>,
    pub phone: Option<String>,
    pub emailaddress: Option<String>,
    pub sycamoreid: Option<String>,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Checkout>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Checkout>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<FeeInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BorrowerFlag {
    Items,
    History,
    Fees,
}

impl Flag for BorrowerFlag {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "items" => Some(BorrowerFlag::Items),
            "history" => Some(BorrowerFlag::History),
            "fees" => Some(BorrowerFlag::Fees),
            _ => None,
        }
    }
}

pub enum BorrowerExpansion {
    Items(Vec<Checkout>),
    History(Vec<Checkout>),
    Fees(FeeInfo),
}

pub struct Borrowers {
    base: EntityBase<Borrower>,
    ledger: Arc<Ledger>,
    loan_days: i64,
}

impl Borrowers {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<Ledger>, loan_days: i64) -> Self {
        Borrowers {
            base: EntityBase::new(store, &BORROWERS),
            ledger,
            loan_days,
        }
    }

    async fn pay_fees(&self, key: &str) -> Result<FeeInfo, AppError> {
        let borrower = self.base.get(key).await?;
        self.ledger.pay_borrower_fees(borrower.borrowernumber).await?;
        self.ledger.fees(borrower.borrowernumber).await
    }

    /// Push the due date of every current checkout out by one loan period.
    async fn renew_all_items(&self, key: &str) -> Result<Vec<Checkout>, AppError> {
        let borrower = self.base.get(key).await?;
        let due = today() + chrono::Duration::days(self.loan_days);
        let criteria = Criteria::new().with("borrowernumber", borrower.borrowernumber);
        let renewed = self
            .ledger
            .current()
            .update_where(&criteria, &[("date_due", SetValue::Value(json!(due)))])
            .await?;
        tracing::info!(borrowernumber = borrower.borrowernumber, renewed = renewed.len(), "items renewed");
        Ok(renewed)
    }
}

#[async_trait]
impl Entity for Borrowers {
    type Record = Borrower;
    type Flag = BorrowerFlag;
    type Expansion = BorrowerExpansion;

    fn base(&self) -> &EntityBase<Borrower> {
        &self.base
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::SetState {
            column: "state",
            value: "INACTIVE",
        }
    }

    async fn load(&self, borrower: &Borrower, flag: BorrowerFlag) -> Result<BorrowerExpansion, AppError> {
        let number = borrower.borrowernumber;
        Ok(match flag {
            BorrowerFlag::Items => BorrowerExpansion::Items(self.ledger.borrower_checkouts(number).await?),
            BorrowerFlag::History => {
                let page = self
                    .ledger
                    .borrower_history(number, &QueryOptions::default())
                    .await?;
                BorrowerExpansion::History(page.rows)
            }
            BorrowerFlag::Fees => BorrowerExpansion::Fees(self.ledger.fees(number).await?),
        })
    }

    fn attach(borrower: &mut Borrower, expansion: BorrowerExpansion) {
        match expansion {
            BorrowerExpansion::Items(items) => borrower.items = Some(items),
            BorrowerExpansion::History(history) => borrower.history = Some(history),
            BorrowerExpansion::Fees(fees) => borrower.fees = Some(fees),
        }
    }

    async fn invoke(&self, method: &str, key: &str, _body: Value) -> Result<Value, AppError> {
        match method {
            "payFees" => Ok(serde_json::to_value(self.pay_fees(key).await?)?),
            "renewAllItems" => Ok(serde_json::to_value(self.renew_all_items(key).await?)?),
            _ => Err(AppError::UnknownMethod(method.to_string())),
        }
    }

    /// `GET /borrowers/me`: the caller's own record with items and fees.
    /// `GET /borrowers/:key/history`: paged history, newest first.
    fn routes(self: Arc<Self>) -> Vec<RouteEntry> {
        let own = self.clone();
        let me = RouteEntry::new(Method::GET, "/borrowers/me", move |call| {
            let borrowers = own.clone();
            async move {
                let caller = call.caller.ok_or(AppError::Unauthorized(AuthFailure::NoUser))?;
                let flags = Flags::of(&[BorrowerFlag::Items, BorrowerFlag::Fees]);
                let borrower = Entity::get(&*borrowers, &caller.user, &flags).await?;
                Ok::<_, AppError>(Reply::Json(serde_json::to_value(borrower)?))
            }
        })
        .action("profile", "read");

        let history = RouteEntry::new(Method::GET, "/borrowers/:key/history", move |call| {
            let borrowers = self.clone();
            async move {
                let key = call.param("key")?;
                let borrower = borrowers.base.get(key).await?;
                let options = QueryOptions::from_query(&call.query)?;
                let page = borrowers
                    .ledger
                    .borrower_history(borrower.borrowernumber, &options)
                    .await?;
                Ok::<_, AppError>(Reply::Json(serde_json::to_value(page)?))
            }
        })
        .action("borrowers", "read");
        vec![me, history]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::DynEntity;
    use crate::store::MockStore;

    fn borrower_row() -> Value {
        json!({
            "id": 1, "borrowernumber": 4, "surname": "Smith", "firstname": "Ann",
            "contactname": "Jo Smith", "phone": null, "emailaddress": "jo@example.org",
            "sycamoreid": null, "state": "ACTIVE"
        })
    }

    fn checkout(barcode: &str, due: f64, paid: f64) -> Value {
        json!({
            "id": 1, "barcode": barcode, "borrowernumber": 4,
            "checkout_date": "2024-03-01", "date_due": "2024-03-22",
            "fine_due": due, "fine_paid": paid
        })
    }

    fn borrowers(store: MockStore) -> Arc<Borrowers> {
        let store: Arc<dyn Store> = Arc::new(store);
        Arc::new(Borrowers::new(store.clone(), Arc::new(Ledger::new(store)), 21))
    }

    fn expect_borrower(store: &mut MockStore) {
        store
            .expect_fetch_optional()
            .withf(|q| q.sql.contains(r#"FROM "borrowers""#))
            .returning(|_| Ok(Some(borrower_row())));
    }

    #[tokio::test]
    async fn fees_flag_totals_outstanding_fines() {
        let mut store = MockStore::new();
        expect_borrower(&mut store);
        store
            .expect_fetch_all()
            .withf(|q| q.sql.contains(r#"FROM "checkouts""#) && q.sql.contains(r#"COALESCE("fine_due", 0) > COALESCE("fine_paid", 0)"#))
            .returning(|_| Ok(vec![checkout("A", 5.0, 0.0)]));
        store
            .expect_fetch_all()
            .withf(|q| q.sql.contains(r#"FROM "history""#))
            .returning(|_| Ok(vec![]));
        store
            .expect_fetch_all()
            .withf(|q| q.sql.contains(r#"FROM "items""#))
            .returning(|_| Ok(vec![json!({ "barcode": "A", "title": "Dune", "category": "SF" })]));

        let borrower = borrowers(store).fetch("4", Some("fees")).await.unwrap();
        assert_eq!(borrower["fees"]["total"], json!(5.0));
        assert_eq!(borrower["fees"]["items"].as_array().map(Vec::len), Some(1));
        assert!(borrower.get("items").is_none());
        assert!(borrower.get("history").is_none());
    }

    #[tokio::test]
    async fn items_and_history_flags_load_concurrently() {
        let mut store = MockStore::new();
        expect_borrower(&mut store);
        store
            .expect_fetch_all()
            .withf(|q| q.sql.contains(r#"FROM "checkouts""#))
            .times(1)
            .returning(|_| Ok(vec![checkout("A", 0.0, 0.0)]));
        store
            .expect_fetch_all()
            .withf(|q| q.sql.contains(r#"FROM "history""#) && q.sql.contains(r#"ORDER BY "returndate" DESC"#))
            .times(1)
            .returning(|_| Ok(vec![]));
        store
            .expect_fetch_all()
            .withf(|q| q.sql.contains(r#"FROM "items""#))
            .returning(|_| Ok(vec![]));

        let borrower = borrowers(store).fetch("4", Some("items,history")).await.unwrap();
        assert_eq!(borrower["items"].as_array().map(Vec::len), Some(1));
        assert_eq!(borrower["history"], json!([]));
        assert!(borrower.get("fees").is_none());
    }

    #[tokio::test]
    async fn remove_marks_inactive() {
        let mut store = MockStore::new();
        store
            .expect_execute()
            .withf(|q| {
                q.sql.starts_with(r#"UPDATE "borrowers" SET "state" = $1 WHERE "borrowernumber" = $2"#)
                    && q.params == vec![json!("INACTIVE"), json!(4)]
            })
            .times(1)
            .returning(|_| Ok(1));
        borrowers(store).remove_record("4").await.unwrap();
    }

    #[tokio::test]
    async fn create_requires_email_list_and_state() {
        let store = MockStore::new();
        let err = borrowers(store)
            .create_record(json!({ "surname": "Smith", "emailaddress": "not an address" }))
            .await
            .unwrap_err();
        match err {
            AppError::Validation(fields) => assert_eq!(fields, vec!["emailaddress", "state"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn email_pattern_accepts_lists() {
        let column = BORROWERS.column("emailaddress").unwrap();
        assert!(column.column_domain().parse("emailaddress", "a@b.org, c@d.org").is_ok());
        assert!(column.column_domain().parse("emailaddress", "a@b.org,").is_err());
    }

    #[test]
    fn borrower_number_is_not_listed() {
        let names: Vec<_> = BORROWERS.fields_metadata().iter().map(|f| f.name).collect();
        assert!(!names.contains(&"borrowernumber"));
        assert_eq!(names.first(), Some(&"id"));
    }
}
