use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use payroll_core::types::{PeriodError, ScopeError};

use crate::export::ExportError;
use crate::invoice::InvoiceServiceError;
use crate::payroll::PayrollServiceError;
use crate::retry::Transient;
use crate::roster::RosterError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                status: status.as_u16(),
                detail: detail.into(),
            },
        }
    }

    fn storage(transient: bool, detail: String) -> Self {
        if transient {
            Self::new(StatusCode::SERVICE_UNAVAILABLE, "storage_busy", detail)
        } else {
            error!(stage = "storage", %detail, "storage failure");
            Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "storage operation failed",
            )
        }
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<ScopeError> for ProblemResponse {
    fn from(err: ScopeError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_owner", err.to_string())
    }
}

impl From<PeriodError> for ProblemResponse {
    fn from(err: PeriodError) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_period", err.to_string())
    }
}

impl From<RosterError> for ProblemResponse {
    fn from(err: RosterError) -> Self {
        match &err {
            RosterError::Parse(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_roster", err.to_string())
            }
            RosterError::Invalid(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_employee", err.to_string())
            }
            RosterError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "employee_not_found", err.to_string())
            }
            RosterError::DuplicateGovernmentId(_) => {
                Self::new(StatusCode::CONFLICT, "duplicate_government_id", err.to_string())
            }
            RosterError::Referenced { .. } => {
                Self::new(StatusCode::CONFLICT, "employee_referenced", err.to_string())
            }
            RosterError::Export(_) => {
                error!(stage = "roster", error = %err, "roster export failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "export_failed", err.to_string())
            }
            RosterError::Storage(_) | RosterError::Database(_) => {
                Self::storage(err.is_transient(), err.to_string())
            }
        }
    }
}

impl From<PayrollServiceError> for ProblemResponse {
    fn from(err: PayrollServiceError) -> Self {
        match &err {
            PayrollServiceError::InvalidAmount(_)
            | PayrollServiceError::InvalidPeriod(_)
            | PayrollServiceError::Replication(_)
            | PayrollServiceError::MissingEmployee(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_payroll", err.to_string())
            }
            PayrollServiceError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "payroll_not_found", err.to_string())
            }
            PayrollServiceError::DuplicatePeriod { .. } => {
                Self::new(StatusCode::CONFLICT, "duplicate_period", err.to_string())
            }
            PayrollServiceError::Storage(_) | PayrollServiceError::Database(_) => {
                Self::storage(err.is_transient(), err.to_string())
            }
        }
    }
}

impl From<InvoiceServiceError> for ProblemResponse {
    fn from(err: InvoiceServiceError) -> Self {
        match &err {
            InvoiceServiceError::Invalid(_)
            | InvoiceServiceError::InvalidAmount(_)
            | InvoiceServiceError::InvalidPeriod(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_invoice", err.to_string())
            }
            InvoiceServiceError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "invoice_not_found", err.to_string())
            }
            InvoiceServiceError::DuplicateNumber(_) => {
                Self::new(StatusCode::CONFLICT, "duplicate_invoice_number", err.to_string())
            }
            InvoiceServiceError::Storage(_) => Self::storage(err.is_transient(), err.to_string()),
        }
    }
}

impl From<ExportError> for ProblemResponse {
    fn from(err: ExportError) -> Self {
        match &err {
            ExportError::PayrollNotFound(_) | ExportError::InvoiceNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "document_not_found", err.to_string())
            }
            ExportError::Employee(_)
            | ExportError::Payroll(_)
            | ExportError::Invoice(_)
            | ExportError::Database(_) => Self::storage(err.is_transient(), err.to_string()),
            ExportError::MissingEmployee { .. }
            | ExportError::Render(_)
            | ExportError::Archive(_)
            | ExportError::Worker(_) => {
                error!(stage = "export", error = %err, "document export failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "render_failed", err.to_string())
            }
        }
    }
}
