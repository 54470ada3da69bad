use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;

use payroll_core::roster_csv::RosterCsv;
use payroll_core::types::{Month, OwnerScope, Period, SalaryComponents};
use payroll_storage::Database;
use payroll_util::PayrollSettings;

use crate::export::{DocumentExporter, DocumentSettings};
use crate::invoice::{InvoiceInput, InvoiceService};
use crate::payroll::{PayrollInput, PayrollService, ReplicationRequest};
use crate::problem::ProblemResponse;
use crate::retry::RetryPolicy;
use crate::roster::{EmployeeInput, RosterService};
use crate::scope_lock::ScopeLocks;
use crate::telemetry;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    roster: RosterService,
    payroll: PayrollService,
    invoices: InvoiceService,
    exporter: DocumentExporter,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        settings: &PayrollSettings,
        documents: DocumentSettings,
    ) -> Self {
        Self::with_clock(metrics, storage, settings, documents, Arc::new(Utc::now))
    }

    pub fn with_clock(
        metrics: PrometheusHandle,
        storage: Database,
        settings: &PayrollSettings,
        documents: DocumentSettings,
        clock: Clock,
    ) -> Self {
        let locks = ScopeLocks::new();
        let retry = RetryPolicy::from_settings(settings);
        let roster = RosterService::new(
            storage.clone(),
            locks.clone(),
            retry,
            clock.clone(),
            RosterCsv::new(settings.csv_delimiter),
        );
        let payroll = PayrollService::new(storage.clone(), locks, retry, clock.clone());
        let invoices = InvoiceService::new(storage.clone(), retry, clock.clone());
        let exporter = DocumentExporter::new(storage, retry, clock, documents);
        Self {
            metrics,
            roster,
            payroll,
            invoices,
            exporter,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn roster(&self) -> &RosterService {
        &self.roster
    }

    pub fn payroll(&self) -> &PayrollService {
        &self.payroll
    }

    pub fn invoices(&self) -> &InvoiceService {
        &self.invoices
    }

    pub fn exporter(&self) -> &DocumentExporter {
        &self.exporter
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/owners/:owner/roster/import", post(import_roster))
        .route("/owners/:owner/roster/plan", post(plan_roster))
        .route("/owners/:owner/roster/export", get(export_roster))
        .route(
            "/owners/:owner/employees",
            get(list_employees).post(create_employee),
        )
        .route(
            "/owners/:owner/employees/:id",
            get(fetch_employee)
                .put(update_employee)
                .delete(delete_employee),
        )
        .route(
            "/owners/:owner/payroll",
            get(list_payroll).post(create_payroll),
        )
        .route("/owners/:owner/payroll/replicate", post(replicate_payroll))
        .route("/owners/:owner/payroll/archive", get(payroll_archive))
        .route(
            "/owners/:owner/payroll/:id",
            get(fetch_payroll).put(update_payroll).delete(delete_payroll),
        )
        .route("/owners/:owner/payroll/:id/slip.pdf", get(salary_slip))
        .route(
            "/owners/:owner/invoices",
            get(list_invoices).post(create_invoice),
        )
        .route("/owners/:owner/invoices/archive", get(invoice_archive))
        .route("/owners/:owner/invoices/:id", get(fetch_invoice))
        .route("/owners/:owner/invoices/:id/invoice.pdf", get(invoice_pdf))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
}

#[derive(Debug, Deserialize)]
struct PeriodQuery {
    month: Month,
    year: i32,
}

impl PeriodQuery {
    fn period(&self) -> Result<Period, ProblemResponse> {
        Ok(Period::new(self.month, self.year)?)
    }
}

fn scope(raw: &str) -> Result<OwnerScope, ProblemResponse> {
    Ok(OwnerScope::parse(raw)?)
}

fn attachment(content_type: &'static str, filename: &str, bytes: Vec<u8>) -> Response {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

async fn import_roster(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    let outcome = state.roster().import(&owner, &body).await?;
    Ok(Json(outcome))
}

async fn plan_roster(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    let preview = state.roster().plan(&owner, &body).await?;
    Ok(Json(preview))
}

async fn export_roster(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Response, ProblemResponse> {
    let owner = scope(&owner)?;
    let text = state.roster().export(&owner).await?;
    Ok(attachment("text/csv; charset=utf-8", "roster.csv", text.into_bytes()))
}

async fn list_employees(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    Ok(Json(state.roster().list(&owner).await?))
}

async fn create_employee(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(input): Json<EmployeeInput>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    let record = state.roster().create(&owner, input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn fetch_employee(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    Ok(Json(state.roster().fetch(&owner, &id).await?))
}

async fn update_employee(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, String)>,
    Json(input): Json<EmployeeInput>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    Ok(Json(state.roster().update(&owner, &id, input).await?))
}

async fn delete_employee(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, String)>,
) -> Result<StatusCode, ProblemResponse> {
    let owner = scope(&owner)?;
    state.roster().delete(&owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_payroll(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    let period = query.period()?;
    Ok(Json(state.payroll().list(&owner, period).await?))
}

async fn create_payroll(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(input): Json<PayrollInput>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    let record = state.payroll().create(&owner, input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn fetch_payroll(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    Ok(Json(state.payroll().fetch(&owner, &id).await?))
}

async fn update_payroll(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, String)>,
    Json(components): Json<SalaryComponents>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    Ok(Json(state.payroll().update(&owner, &id, components).await?))
}

async fn delete_payroll(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, String)>,
) -> Result<StatusCode, ProblemResponse> {
    let owner = scope(&owner)?;
    state.payroll().delete(&owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn replicate_payroll(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(request): Json<ReplicationRequest>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    Ok(Json(state.payroll().replicate(&owner, request).await?))
}

async fn salary_slip(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, String)>,
) -> Result<Response, ProblemResponse> {
    let owner = scope(&owner)?;
    let document = state.exporter().salary_slip(&owner, &id).await?;
    let filename = document.filename().to_string();
    Ok(attachment("application/pdf", &filename, document.into_bytes()))
}

async fn payroll_archive(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Response, ProblemResponse> {
    let owner = scope(&owner)?;
    let archive = state
        .exporter()
        .payroll_archive(&owner, query.period()?)
        .await?;
    let filename = archive.filename().to_string();
    Ok(attachment("application/zip", &filename, archive.into_bytes()))
}

async fn list_invoices(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    let period = query.period()?;
    Ok(Json(state.invoices().list(&owner, period).await?))
}

async fn create_invoice(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(input): Json<InvoiceInput>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    let invoice = state.invoices().create(&owner, input).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

async fn fetch_invoice(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let owner = scope(&owner)?;
    Ok(Json(state.invoices().fetch(&owner, &id).await?))
}

async fn invoice_pdf(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, String)>,
) -> Result<Response, ProblemResponse> {
    let owner = scope(&owner)?;
    let document = state.exporter().invoice(&owner, &id).await?;
    let filename = document.filename().to_string();
    Ok(attachment("application/pdf", &filename, document.into_bytes()))
}

async fn invoice_archive(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Response, ProblemResponse> {
    let owner = scope(&owner)?;
    let archive = state
        .exporter()
        .invoice_archive(&owner, query.period()?)
        .await?;
    let filename = archive.filename().to_string();
    Ok(attachment("application/zip", &filename, archive.into_bytes()))
}
