use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use payroll_core::money::AmountError;
use payroll_core::types::{invoice_total, Invoice, InvoiceItem, Month, OwnerScope, Period};

use crate::{is_transient, is_unique_violation, parse_decimal, to_rfc3339};

const SELECT_INVOICE: &str = "SELECT id, owner_id, number, customer_name, customer_address, month, year, \
     items_json, total, created_at FROM invoices";

/// Input for a new invoice; the total is derived from the items.
#[derive(Debug, Clone)]
pub struct NewInvoice<'a> {
    pub number: &'a str,
    pub customer_name: &'a str,
    pub customer_address: Option<&'a str>,
    pub period: Period,
    pub items: &'a [InvoiceItem],
}

/// Repository for invoices.
#[derive(Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        owner: &OwnerScope,
        invoice: NewInvoice<'_>,
        now: DateTime<Utc>,
    ) -> Result<Invoice, InvoiceError> {
        let id = Uuid::new_v4().to_string();
        let total = invoice_total(invoice.items)?;
        let items_json = serde_json::to_string(invoice.items)?;

        sqlx::query(
            "INSERT INTO invoices \
             (id, owner_id, number, customer_name, customer_address, month, year, items_json, total, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner.as_str())
        .bind(invoice.number)
        .bind(invoice.customer_name)
        .bind(invoice.customer_address)
        .bind(invoice.period.month.as_str())
        .bind(invoice.period.year)
        .bind(&items_json)
        .bind(total.to_string())
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                InvoiceError::DuplicateNumber(invoice.number.to_string())
            } else {
                InvoiceError::Database(err)
            }
        })?;

        Ok(Invoice {
            id,
            owner: owner.clone(),
            number: invoice.number.to_string(),
            customer_name: invoice.customer_name.to_string(),
            customer_address: invoice.customer_address.map(str::to_string),
            period: invoice.period,
            items: invoice.items.to_vec(),
            total,
            created_at: now,
        })
    }

    /// Lists invoices of one period ordered by invoice number.
    pub async fn list_for_period(
        &self,
        owner: &OwnerScope,
        period: Period,
    ) -> Result<Vec<Invoice>, InvoiceError> {
        let sql = format!("{SELECT_INVOICE} WHERE owner_id = ? AND month = ? AND year = ? ORDER BY number, id");
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(owner.as_str())
            .bind(period.month.as_str())
            .bind(period.year)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(InvoiceRow::into_domain).collect()
    }

    pub async fn fetch(&self, owner: &OwnerScope, id: &str) -> Result<Option<Invoice>, InvoiceError> {
        let sql = format!("{SELECT_INVOICE} WHERE owner_id = ? AND id = ?");
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(owner.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(InvoiceRow::into_domain).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: String,
    owner_id: String,
    number: String,
    customer_name: String,
    customer_address: Option<String>,
    month: String,
    year: i64,
    items_json: String,
    total: String,
    created_at: DateTime<Utc>,
}

impl InvoiceRow {
    fn into_domain(self) -> Result<Invoice, InvoiceError> {
        let owner =
            OwnerScope::parse(&self.owner_id).map_err(|err| InvoiceError::Corrupt(err.to_string()))?;
        let month: Month = self
            .month
            .parse()
            .map_err(|_| InvoiceError::Corrupt(format!("unknown month '{}'", self.month)))?;
        let period = i32::try_from(self.year)
            .ok()
            .and_then(|year| Period::new(month, year).ok())
            .ok_or_else(|| InvoiceError::Corrupt(format!("year {} out of range", self.year)))?;
        let items: Vec<InvoiceItem> = serde_json::from_str(&self.items_json)?;
        let total = parse_decimal("total", &self.total).map_err(InvoiceError::Corrupt)?;

        Ok(Invoice {
            id: self.id,
            owner,
            number: self.number,
            customer_name: self.customer_name,
            customer_address: self.customer_address,
            period,
            items,
            total,
            created_at: self.created_at,
        })
    }
}

/// Errors raised by the invoice repository.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("invoice number {0} is already used in this scope")]
    DuplicateNumber(String),
    #[error("failed to encode or decode invoice items: {0}")]
    Items(#[from] serde_json::Error),
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),
    #[error("stored invoice row is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InvoiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(err) if is_transient(err))
    }
}
