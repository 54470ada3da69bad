use payroll_core::types::{EmployeeRecord, PayrollRecord};

use crate::layout::{fit_text, Font, PageWriter, CONTENT_LEFT, CONTENT_RIGHT};
use crate::{canonical_filename, DocumentKind, RenderContext, RenderError, RenderedDocument};

const LINE: i64 = 18;
const LABEL_WIDTH: i64 = 120;
const SIGNATURE_WIDTH: i64 = 180;

/// Renders one salary slip as a single A4 page.
///
/// The record must belong to `employee` and its stored total must equal the
/// sum of its components; the printed total is that stored value.
pub fn render_salary_slip(
    ctx: &RenderContext,
    employee: &EmployeeRecord,
    record: &PayrollRecord,
) -> Result<RenderedDocument, RenderError> {
    if record.employee_id != employee.id {
        return Err(RenderError::EmployeeMismatch {
            record_id: record.id.clone(),
            expected: record.employee_id.clone(),
            actual: employee.id.clone(),
        });
    }
    if !record.total_is_consistent() {
        return Err(RenderError::InconsistentTotal {
            kind: "payroll record",
            id: record.id.clone(),
        });
    }

    let profile = &employee.profile;
    let mut page = PageWriter::new();

    // Header
    page.advance(16);
    page.text(CONTENT_LEFT, page.cursor(), 16, Font::Bold, &ctx.issuer_name);
    page.text_right(
        CONTENT_RIGHT,
        page.cursor(),
        14,
        Font::Bold,
        DocumentKind::SalarySlip.title(),
    );
    page.advance(LINE);
    page.text(
        CONTENT_LEFT,
        page.cursor(),
        10,
        Font::Regular,
        &format!("Period: {}", record.period),
    );
    page.text_right(
        CONTENT_RIGHT,
        page.cursor(),
        10,
        Font::Regular,
        &format!("Issued: {}", ctx.issued_on.format("%Y-%m-%d")),
    );
    page.advance(10);
    page.rule();
    page.advance(LINE);

    // Identity
    let bank = match (&profile.bank, profile.bank_account_number) {
        (Some(bank), Some(account)) => Some(format!("{bank} {account}")),
        (Some(bank), None) => Some(bank.clone()),
        (None, Some(account)) => Some(account.to_string()),
        (None, None) => None,
    };
    let identity = [
        ("Name", Some(profile.name.clone())),
        ("Government ID", Some(profile.government_id.clone())),
        ("Position", Some(profile.position.clone())),
        ("Status", Some(profile.status.label().to_string())),
        ("Bank account", bank),
    ];
    for (label, value) in identity {
        let Some(value) = value else { continue };
        page.text(CONTENT_LEFT, page.cursor(), 10, Font::Bold, label);
        let value = fit_text(&value, 10, CONTENT_RIGHT - CONTENT_LEFT - LABEL_WIDTH);
        page.text(CONTENT_LEFT + LABEL_WIDTH, page.cursor(), 10, Font::Regular, &value);
        page.advance(LINE);
    }
    page.advance(6);

    // Components
    page.text(CONTENT_LEFT, page.cursor(), 10, Font::Bold, "Component");
    page.text_right(CONTENT_RIGHT, page.cursor(), 10, Font::Bold, "Amount");
    page.advance(6);
    page.rule();
    page.advance(LINE - 4);
    for (_, label, amount) in record.components.items() {
        page.text(CONTENT_LEFT, page.cursor(), 10, Font::Regular, label);
        page.text_right(
            CONTENT_RIGHT,
            page.cursor(),
            10,
            Font::Regular,
            &ctx.currency.format(amount),
        );
        page.advance(LINE);
    }
    page.advance(-8);
    page.rule();
    page.advance(LINE);
    page.text(CONTENT_LEFT, page.cursor(), 11, Font::Bold, "Total");
    page.text_right(
        CONTENT_RIGHT,
        page.cursor(),
        11,
        Font::Bold,
        &ctx.currency.format(record.total),
    );
    page.advance(LINE * 3);

    // Signatures
    let employer_x = CONTENT_LEFT;
    let employee_x = CONTENT_RIGHT - SIGNATURE_WIDTH;
    page.text(employer_x, page.cursor(), 10, Font::Regular, "Employer");
    page.text(employee_x, page.cursor(), 10, Font::Regular, "Employee");
    page.advance(LINE * 3);
    let sign_line = page.cursor();
    page.line(employer_x, sign_line, employer_x + SIGNATURE_WIDTH, sign_line);
    page.line(employee_x, sign_line, CONTENT_RIGHT, sign_line);
    page.advance(14);
    page.text(
        employer_x,
        page.cursor(),
        10,
        Font::Regular,
        &fit_text(&ctx.issuer_name, 10, SIGNATURE_WIDTH),
    );
    page.text(
        employee_x,
        page.cursor(),
        10,
        Font::Regular,
        &fit_text(&profile.name, 10, SIGNATURE_WIDTH),
    );

    let bytes = page.finish(DocumentKind::SalarySlip.title())?;
    let filename = canonical_filename(DocumentKind::SalarySlip, &profile.name, record.period);
    Ok(RenderedDocument::new(DocumentKind::SalarySlip, filename, bytes))
}
