//! Current checkouts, returned checkouts (history), and fee aggregation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{borrowers::BORROWERS, items::ITEMS};
use crate::entity::{Entity, EntityBase, NoFlag};
use crate::error::AppError;
use crate::query::{Criteria, LogicalOp, QueryOptions, QueryResult, MAX_LIMIT};
use crate::schema::{Column, ColumnDomain, TableSchema};
use crate::sql::{self, SetValue};
use crate::store::Store;

pub static CHECKOUTS: Lazy<TableSchema> = Lazy::new(|| {
    TableSchema::builder("checkouts", "barcode")
        .surrogate_key("id")
        .add_column(Column::new("id").domain(ColumnDomain::Integer))
        .add_column(Column::new("barcode").label("Barcode"))
        .add_column(Column::new("borrowernumber").label("Borrower number").domain(ColumnDomain::Integer))
        .add_column(Column::new("checkout_date").label("Checked out").domain(ColumnDomain::Date))
        .add_column(Column::new("date_due").label("Due").domain(ColumnDomain::Date))
        .add_column(Column::new("fine_due").label("Fine").domain(ColumnDomain::Number))
        .add_column(Column::new("fine_paid").label("Paid").domain(ColumnDomain::Number))
        .build()
});

pub static HISTORY: Lazy<TableSchema> = Lazy::new(|| {
    TableSchema::builder("history", "id")
        .add_column(Column::new("id").domain(ColumnDomain::Integer))
        .add_column(Column::new("barcode").label("Barcode"))
        .add_column(Column::new("borrowernumber").label("Borrower number").domain(ColumnDomain::Integer))
        .add_column(Column::new("checkout_date").label("Checked out").domain(ColumnDomain::Date))
        .add_column(Column::new("returndate").label("Returned").domain(ColumnDomain::Date))
        .add_column(Column::new("fine_due").label("Fine").domain(ColumnDomain::Number))
        .add_column(Column::new("fine_paid").label("Paid").domain(ColumnDomain::Number))
        .build()
});

/// A checkout row, current or returned. `title`, `category` and `surname`
/// are attached from the items and borrowers tables on some reads.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Checkout {
    pub id: Option<i64>,
    pub barcode: String,
    pub borrowernumber: Option<i64>,
    pub checkout_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_due: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returndate: Option<NaiveDate>,
    pub fine_due: Option<f64>,
    pub fine_paid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
}

impl Checkout {
    /// Unpaid part of the fine; never negative.
    pub fn outstanding(&self) -> f64 {
        (self.fine_due.unwrap_or(0.0) - self.fine_paid.unwrap_or(0.0)).max(0.0)
    }
}

pub fn total_fine(checkouts: &[Checkout]) -> f64 {
    checkouts.iter().fold(0.0, |total, c| total + c.outstanding())
}

/// Outstanding fees of one borrower across current and returned checkouts.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FeeInfo {
    pub total: f64,
    pub items: Vec<Checkout>,
    pub history: Vec<Checkout>,
}

impl FeeInfo {
    pub fn new(items: Vec<Checkout>, history: Vec<Checkout>) -> Self {
        FeeInfo {
            total: total_fine(&items) + total_fine(&history),
            items,
            history,
        }
    }
}

/// Queries over the checkout and history tables shared by several entities.
pub struct Ledger {
    store: Arc<dyn Store>,
    current: EntityBase<Checkout>,
    returned: EntityBase<Checkout>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Ledger {
            current: EntityBase::new(store.clone(), &CHECKOUTS),
            returned: EntityBase::new(store.clone(), &HISTORY),
            store,
        }
    }

    pub fn current(&self) -> &EntityBase<Checkout> {
        &self.current
    }

    pub fn returned(&self) -> &EntityBase<Checkout> {
        &self.returned
    }

    /// Current checkouts of a borrower with item title and category.
    pub async fn borrower_checkouts(&self, borrowernumber: i64) -> Result<Vec<Checkout>, AppError> {
        let criteria = Criteria::new().with("borrowernumber", borrowernumber);
        let options = QueryOptions {
            limit: MAX_LIMIT,
            ..QueryOptions::default()
        }
        .ordered("date_due");
        let rows = self.current.query(&criteria, LogicalOp::And, &options).await?.rows;
        self.with_item_details(rows).await
    }

    /// One page of a borrower's returned checkouts, newest first unless
    /// `options` orders otherwise.
    pub async fn borrower_history(
        &self,
        borrowernumber: i64,
        options: &QueryOptions,
    ) -> Result<QueryResult<Checkout>, AppError> {
        let criteria = Criteria::new().with("borrowernumber", borrowernumber);
        let mut options = options.clone();
        if options.order.is_none() {
            options = options.ordered("-returndate");
        }
        let mut page = self.returned.query(&criteria, LogicalOp::And, &options).await?;
        page.rows = self.with_item_details(page.rows).await?;
        Ok(page)
    }

    /// Returned checkouts of an item with the borrower's surname.
    pub async fn item_history(&self, barcode: &str) -> Result<Vec<Checkout>, AppError> {
        let criteria = Criteria::new().with("barcode", barcode);
        let options = QueryOptions {
            limit: MAX_LIMIT,
            ..QueryOptions::default()
        }
        .ordered("-returndate");
        let rows = self.returned.query(&criteria, LogicalOp::And, &options).await?.rows;
        self.with_borrower_names(rows).await
    }

    /// Every row of the borrower, current and returned, with a fine still owed.
    pub async fn fees(&self, borrowernumber: i64) -> Result<FeeInfo, AppError> {
        let (items, history) = tokio::try_join!(
            self.owing(&self.current, borrowernumber, "date_due"),
            self.owing(&self.returned, borrowernumber, "-returndate")
        )?;
        Ok(FeeInfo::new(items, history))
    }

    async fn owing(
        &self,
        base: &EntityBase<Checkout>,
        borrowernumber: i64,
        order: &str,
    ) -> Result<Vec<Checkout>, AppError> {
        let criteria = Criteria::new().with("borrowernumber", borrowernumber);
        let options = QueryOptions::default().ordered(order);
        let rows = base.exceeding(&criteria, "fine_due", "fine_paid", &options).await?;
        self.with_item_details(rows).await
    }

    /// Mark every fine of a borrower paid, in both tables.
    pub async fn pay_borrower_fees(&self, borrowernumber: i64) -> Result<(), AppError> {
        let criteria = Criteria::new().with("borrowernumber", borrowernumber);
        let paid = [("fine_paid", SetValue::Column("fine_due"))];
        let (current, returned) = tokio::try_join!(
            self.current.update_where(&criteria, &paid),
            self.returned.update_where(&criteria, &paid)
        )?;
        tracing::info!(
            borrowernumber,
            checkouts = current.len(),
            history = returned.len(),
            "fees paid"
        );
        Ok(())
    }

    async fn with_item_details(&self, mut rows: Vec<Checkout>) -> Result<Vec<Checkout>, AppError> {
        let barcodes: Vec<Value> = distinct(rows.iter().map(|c| Value::String(c.barcode.clone())));
        if barcodes.is_empty() {
            return Ok(rows);
        }
        let q = sql::select_where_in(&ITEMS, "barcode", &barcodes)?;
        let items: HashMap<String, Value> = self
            .store
            .fetch_all(&q)
            .await?
            .into_iter()
            .filter_map(|item| Some((item.get("barcode")?.as_str()?.to_string(), item)))
            .collect();
        for row in &mut rows {
            if let Some(item) = items.get(&row.barcode) {
                row.title = text(item, "title");
                row.category = text(item, "category");
            }
        }
        Ok(rows)
    }

    async fn with_borrower_names(&self, mut rows: Vec<Checkout>) -> Result<Vec<Checkout>, AppError> {
        let numbers: Vec<Value> = distinct(rows.iter().filter_map(|c| c.borrowernumber).map(Value::from));
        if numbers.is_empty() {
            return Ok(rows);
        }
        let q = sql::select_where_in(&BORROWERS, "borrowernumber", &numbers)?;
        let surnames: HashMap<i64, Option<String>> = self
            .store
            .fetch_all(&q)
            .await?
            .into_iter()
            .filter_map(|b| Some((b.get("borrowernumber")?.as_i64()?, text(&b, "surname"))))
            .collect();
        for row in &mut rows {
            if let Some(surname) = row.borrowernumber.and_then(|n| surnames.get(&n)) {
                row.surname = surname.clone();
            }
        }
        Ok(rows)
    }
}

fn distinct(values: impl Iterator<Item = Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

fn text(row: &Value, field: &str) -> Option<String> {
    row.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Mark one row's fine paid in full.
async fn pay_fee(base: &EntityBase<Checkout>, key: &str) -> Result<Value, AppError> {
    let criteria = base.schema().resolve_natural_key(key)?;
    let paid = base
        .update_where(&criteria, &[("fine_paid", SetValue::Column("fine_due"))])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::not_found(base.name(), key))?;
    tracing::info!(table = base.name(), key, "fee paid");
    Ok(serde_json::to_value(paid)?)
}

/// Current checkouts, keyed by item barcode.
pub struct Checkouts {
    ledger: Arc<Ledger>,
}

impl Checkouts {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Checkouts { ledger }
    }
}

#[async_trait]
impl Entity for Checkouts {
    type Record = Checkout;
    type Flag = NoFlag;
    type Expansion = ();

    fn base(&self) -> &EntityBase<Checkout> {
        self.ledger.current()
    }

    async fn load(&self, _record: &Checkout, flag: NoFlag) -> Result<(), AppError> {
        match flag {}
    }

    fn attach(_: &mut Checkout, _: ()) {}

    async fn invoke(&self, method: &str, key: &str, _body: Value) -> Result<Value, AppError> {
        match method {
            "payFee" => pay_fee(self.ledger.current(), key).await,
            _ => Err(AppError::UnknownMethod(method.to_string())),
        }
    }
}

/// Returned checkouts, keyed by row id.
pub struct History {
    ledger: Arc<Ledger>,
}

impl History {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        History { ledger }
    }
}

#[async_trait]
impl Entity for History {
    type Record = Checkout;
    type Flag = NoFlag;
    type Expansion = ();

    fn base(&self) -> &EntityBase<Checkout> {
        self.ledger.returned()
    }

    async fn load(&self, _record: &Checkout, flag: NoFlag) -> Result<(), AppError> {
        match flag {}
    }

    fn attach(_: &mut Checkout, _: ()) {}

    async fn invoke(&self, method: &str, key: &str, _body: Value) -> Result<Value, AppError> {
        match method {
            "payFee" => pay_fee(self.ledger.returned(), key).await,
            _ => Err(AppError::UnknownMethod(method.to_string())),
        }
    }
}
