use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use payroll_core::money::{validate_amount, AmountError};
use payroll_core::types::{invoice_total, Invoice, InvoiceItem, OwnerScope, Period, PeriodError};
use payroll_storage::{Database, InvoiceError, NewInvoice};

use crate::retry::{RetryPolicy, Transient};
use crate::router::Clock;

#[derive(Clone)]
pub struct InvoiceService {
    database: Database,
    retry: RetryPolicy,
    clock: Clock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceInput {
    pub number: String,
    pub customer_name: String,
    #[serde(default)]
    pub customer_address: Option<String>,
    #[serde(flatten)]
    pub period: Period,
    pub items: Vec<InvoiceItem>,
}

impl InvoiceService {
    pub fn new(database: Database, retry: RetryPolicy, clock: Clock) -> Self {
        Self {
            database,
            retry,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn create(
        &self,
        owner: &OwnerScope,
        input: InvoiceInput,
    ) -> Result<Invoice, InvoiceServiceError> {
        let period = input.period.validated()?;
        let number = input.number.trim();
        let customer_name = input.customer_name.trim();
        if number.is_empty() {
            return Err(InvoiceServiceError::Invalid("number must not be empty"));
        }
        if customer_name.is_empty() {
            return Err(InvoiceServiceError::Invalid("customer_name must not be empty"));
        }
        if input.items.is_empty() {
            return Err(InvoiceServiceError::Invalid("an invoice needs at least one item"));
        }
        for item in &input.items {
            if item.description.trim().is_empty() {
                return Err(InvoiceServiceError::Invalid("item description must not be empty"));
            }
            if item.quantity == 0 {
                return Err(InvoiceServiceError::Invalid("item quantity must be positive"));
            }
            validate_amount("unit_price", item.unit_price)?;
        }
        invoice_total(&input.items)?;
        let customer_address = input
            .customer_address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty());

        let new_invoice = NewInvoice {
            number,
            customer_name,
            customer_address,
            period,
            items: &input.items,
        };
        let new_invoice = &new_invoice;

        let invoice = self
            .retry
            .run("invoice_create", move || async move {
                Ok::<_, InvoiceServiceError>(
                    self.database
                        .invoices()
                        .create(owner, new_invoice.clone(), self.now())
                        .await?,
                )
            })
            .await?;

        info!(stage = "invoice", owner = %owner, number = %invoice.number, total = %invoice.total, "invoice created");
        Ok(invoice)
    }

    pub async fn list(
        &self,
        owner: &OwnerScope,
        period: Period,
    ) -> Result<Vec<Invoice>, InvoiceServiceError> {
        self.retry
            .run("invoice_list", move || async move {
                Ok::<_, InvoiceServiceError>(
                    self.database.invoices().list_for_period(owner, period).await?,
                )
            })
            .await
    }

    pub async fn fetch(&self, owner: &OwnerScope, id: &str) -> Result<Invoice, InvoiceServiceError> {
        let found = self
            .retry
            .run("invoice_fetch", move || async move {
                Ok::<_, InvoiceServiceError>(self.database.invoices().fetch(owner, id).await?)
            })
            .await?;
        found.ok_or_else(|| InvoiceServiceError::NotFound(id.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum InvoiceServiceError {
    #[error("invalid invoice: {0}")]
    Invalid(&'static str),
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),
    #[error("invalid period: {0}")]
    InvalidPeriod(#[from] PeriodError),
    #[error("invoice number {0} is already used")]
    DuplicateNumber(String),
    #[error("invoice {0} not found")]
    NotFound(String),
    #[error("invoice storage error: {0}")]
    Storage(InvoiceError),
}

impl From<InvoiceError> for InvoiceServiceError {
    fn from(err: InvoiceError) -> Self {
        match err {
            InvoiceError::DuplicateNumber(number) => Self::DuplicateNumber(number),
            InvoiceError::InvalidAmount(err) => Self::InvalidAmount(err),
            other => Self::Storage(other),
        }
    }
}

impl Transient for InvoiceServiceError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_transient())
    }
}
