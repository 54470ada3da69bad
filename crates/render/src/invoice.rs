use payroll_core::types::{invoice_total, Invoice};

use crate::layout::{fit_text, Font, PageWriter, CONTENT_LEFT, CONTENT_RIGHT};
use crate::{canonical_filename, DocumentKind, RenderContext, RenderError, RenderedDocument};

const LINE: i64 = 18;
const QTY_RIGHT: i64 = CONTENT_LEFT + 320;
const UNIT_RIGHT: i64 = CONTENT_LEFT + 420;
const DESCRIPTION_WIDTH: i64 = 260;

/// Renders an invoice; line items flow onto as many pages as needed and the
/// table header repeats on every continuation page.
pub fn render_invoice(ctx: &RenderContext, invoice: &Invoice) -> Result<RenderedDocument, RenderError> {
    let inconsistent = || RenderError::InconsistentTotal {
        kind: "invoice",
        id: invoice.id.clone(),
    };
    if invoice_total(&invoice.items).map_err(|_| inconsistent())? != invoice.total {
        return Err(inconsistent());
    }

    let mut page = PageWriter::new();

    page.advance(16);
    page.text(CONTENT_LEFT, page.cursor(), 16, Font::Bold, &ctx.issuer_name);
    page.text_right(
        CONTENT_RIGHT,
        page.cursor(),
        14,
        Font::Bold,
        DocumentKind::Invoice.title(),
    );
    page.advance(LINE);
    page.text(
        CONTENT_LEFT,
        page.cursor(),
        10,
        Font::Regular,
        &format!("Number: {}", invoice.number),
    );
    page.text_right(
        CONTENT_RIGHT,
        page.cursor(),
        10,
        Font::Regular,
        &format!("Issued: {}", ctx.issued_on.format("%Y-%m-%d")),
    );
    page.advance(LINE - 4);
    page.text(
        CONTENT_LEFT,
        page.cursor(),
        10,
        Font::Regular,
        &format!("Period: {}", invoice.period),
    );
    page.advance(10);
    page.rule();
    page.advance(LINE);

    page.text(CONTENT_LEFT, page.cursor(), 10, Font::Bold, "Bill to");
    page.advance(LINE - 4);
    page.text(CONTENT_LEFT, page.cursor(), 10, Font::Regular, &invoice.customer_name);
    if let Some(address) = &invoice.customer_address {
        page.advance(LINE - 4);
        let address = fit_text(address, 10, CONTENT_RIGHT - CONTENT_LEFT);
        page.text(CONTENT_LEFT, page.cursor(), 10, Font::Regular, &address);
    }
    page.advance(LINE + 6);

    table_header(&mut page);
    for item in &invoice.items {
        if page.ensure_space(LINE) {
            table_header(&mut page);
        }
        let description = fit_text(&item.description, 10, DESCRIPTION_WIDTH);
        page.text(CONTENT_LEFT, page.cursor(), 10, Font::Regular, &description);
        page.text_right(QTY_RIGHT, page.cursor(), 10, Font::Regular, &item.quantity.to_string());
        page.text_right(
            UNIT_RIGHT,
            page.cursor(),
            10,
            Font::Regular,
            &ctx.currency.format(item.unit_price),
        );
        let amount = item.amount().map_err(|_| inconsistent())?;
        page.text_right(
            CONTENT_RIGHT,
            page.cursor(),
            10,
            Font::Regular,
            &ctx.currency.format(amount),
        );
        page.advance(LINE);
    }

    // Total plus signature block stay together.
    page.ensure_space(LINE * 7);
    page.advance(-8);
    page.rule();
    page.advance(LINE);
    page.text(CONTENT_LEFT, page.cursor(), 11, Font::Bold, "Total");
    page.text_right(
        CONTENT_RIGHT,
        page.cursor(),
        11,
        Font::Bold,
        &ctx.currency.format(invoice.total),
    );
    page.advance(LINE * 3);
    let sign_left = CONTENT_RIGHT - 180;
    page.text(sign_left, page.cursor(), 10, Font::Regular, "Authorized signature");
    page.advance(LINE * 2);
    let sign_line = page.cursor();
    page.line(sign_left, sign_line, CONTENT_RIGHT, sign_line);
    page.advance(14);
    page.text(
        sign_left,
        page.cursor(),
        10,
        Font::Regular,
        &fit_text(&ctx.issuer_name, 10, 180),
    );

    let bytes = page.finish(DocumentKind::Invoice.title())?;
    let filename = canonical_filename(DocumentKind::Invoice, &invoice.number, invoice.period);
    Ok(RenderedDocument::new(DocumentKind::Invoice, filename, bytes))
}

fn table_header(page: &mut PageWriter) {
    page.text(CONTENT_LEFT, page.cursor(), 10, Font::Bold, "Description");
    page.text_right(QTY_RIGHT, page.cursor(), 10, Font::Bold, "Qty");
    page.text_right(UNIT_RIGHT, page.cursor(), 10, Font::Bold, "Unit price");
    page.text_right(CONTENT_RIGHT, page.cursor(), 10, Font::Bold, "Amount");
    page.advance(6);
    page.rule();
    page.advance(LINE - 4);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, period};
    use chrono::{TimeZone, Utc};
    use lopdf::Document;
    use payroll_core::money::Currency;
    use payroll_core::types::{InvoiceItem, OwnerScope};
    use rust_decimal::Decimal;

    fn invoice(lines: usize) -> Invoice {
        let items: Vec<InvoiceItem> = (0..lines)
            .map(|index| InvoiceItem {
                description: format!("Consulting hours, batch {index}"),
                quantity: 2,
                unit_price: Decimal::new(15_050, 2),
            })
            .collect();
        Invoice {
            id: "inv-1".into(),
            owner: OwnerScope::parse("acme").unwrap(),
            number: "INV/2025/001".into(),
            customer_name: "PT Maju".into(),
            customer_address: Some("Jl. Thamrin 10, Jakarta".into()),
            period: period(),
            total: invoice_total(&items).expect("total"),
            items,
            created_at: Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn short_invoice_fits_one_page() {
        let mut ctx = context();
        ctx.currency = Currency::Usd;
        let doc = render_invoice(&ctx, &invoice(3)).expect("render");

        assert_eq!(doc.filename(), "invoice-inv-2025-001-january-2025.pdf");
        let parsed = Document::load_mem(doc.bytes()).expect("parse");
        assert_eq!(parsed.get_pages().len(), 1);
        assert!(doc
            .bytes()
            .windows("$903.00".len())
            .any(|window| window == b"$903.00"));
    }

    #[test]
    fn long_invoice_paginates() {
        let doc = render_invoice(&context(), &invoice(80)).expect("render");
        let parsed = Document::load_mem(doc.bytes()).expect("parse");
        assert!(parsed.get_pages().len() >= 2);
        let last = format!("page {} of {}", parsed.get_pages().len(), parsed.get_pages().len());
        assert!(doc
            .bytes()
            .windows(last.len())
            .any(|window| window == last.as_bytes()));
    }

    #[test]
    fn rejects_tampered_total() {
        let mut invoice = invoice(2);
        invoice.total = Decimal::ONE;
        assert!(matches!(
            render_invoice(&context(), &invoice),
            Err(RenderError::InconsistentTotal { kind: "invoice", .. })
        ));
    }

    #[test]
    fn overflowing_items_are_rejected_without_panicking() {
        let mut invoice = invoice(1);
        invoice.items[0].unit_price = Decimal::MAX;
        assert!(matches!(
            render_invoice(&context(), &invoice),
            Err(RenderError::InconsistentTotal { kind: "invoice", .. })
        ));
    }
}
