use rust_decimal::Decimal;

use crate::domain::evidence::EvidenceId;
use crate::domain::field::CanonicalField;
use crate::domain::issue::{Issue, IssueCode};
use crate::domain::order::{CanonicalOrder, FieldValue, LineItem, ResolutionStatus};

/// Arithmetic tolerance: `abs + rel * |expected|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub abs: Decimal,
    pub rel: Decimal,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { abs: Decimal::new(1, 2), rel: Decimal::new(5, 3) }
    }
}

impl Tolerance {
    /// `None` when the difference or the bound does not fit in a `Decimal`.
    pub fn accepts(&self, expected: Decimal, actual: Decimal) -> Option<bool> {
        let difference = actual.checked_sub(expected)?.abs();
        let bound = self.rel.checked_mul(expected.abs())?.checked_add(self.abs)?;
        Some(difference <= bound)
    }
}

fn overflow(check: &str, evidence: Vec<EvidenceId>) -> Issue {
    Issue::new(
        IssueCode::AmountOverflow,
        format!("{check} skipped: the amounts are too large to compare"),
    )
    .with_evidence(evidence)
}

fn line_evidence(line: &LineItem) -> Vec<EvidenceId> {
    [
        CanonicalField::Sku,
        CanonicalField::Description,
        CanonicalField::Quantity,
        CanonicalField::UnitPrice,
        CanonicalField::LineTotal,
    ]
    .into_iter()
    .filter_map(|field| line.evidence_for(field))
    .flatten()
    .copied()
    .collect()
}

fn ids(values: &[Option<&FieldValue<Decimal>>]) -> Vec<EvidenceId> {
    values.iter().flatten().flat_map(|value| value.evidence.iter().copied()).collect()
}

/// Sum of the lines' effective totals. `Ok(None)` when some line has no
/// total at all, `Err` when the sum overflows.
fn checked_line_sum(lines: &[LineItem]) -> Result<Option<Decimal>, ()> {
    let mut sum = Decimal::ZERO;
    for line in lines {
        let Some(total) = line.effective_total() else {
            return Ok(None);
        };
        sum = sum.checked_add(total).ok_or(())?;
    }
    Ok(Some(sum))
}

/// True when an `unparseable_number` issue already covers this line's cell
/// for `field`.
fn parse_failed(order: &CanonicalOrder, line: &LineItem, field: CanonicalField) -> bool {
    let Some(column) = order.schema.column_for(field) else {
        return false;
    };
    order.issues.with_code(IssueCode::UnparseableNumber).iter().any(|issue| {
        issue.evidence.iter().filter_map(|id| order.evidence.get(*id)).any(|cell| {
            cell.address.row == line.row && cell.address.col == column.index
        })
    })
}

/// Required-field, sign and arithmetic checks. Findings are errors, warnings
/// or info; never blockers.
pub fn validate(order: &CanonicalOrder, tolerance: Tolerance) -> Vec<Issue> {
    let mut issues = Vec::new();

    if order.line_items.is_empty() {
        issues.push(Issue::new(
            IssueCode::NoLineItems,
            "no order lines were found below the header",
        ));
    }

    let sku_mapped = order.schema.mapping(CanonicalField::Sku).is_some();
    let quantity_mapped = order.schema.mapping(CanonicalField::Quantity).is_some();

    for (index, line) in order.line_items.iter().enumerate() {
        let number = index + 1;
        if sku_mapped && line.sku.is_none() {
            issues.push(
                Issue::new(IssueCode::MissingSku, format!("line {number} has no product code"))
                    .with_evidence(line_evidence(line)),
            );
        }
        if quantity_mapped
            && line.quantity.is_none()
            && !parse_failed(order, line, CanonicalField::Quantity)
        {
            issues.push(
                Issue::new(IssueCode::MissingQuantity, format!("line {number} has no quantity"))
                    .with_evidence(line_evidence(line)),
            );
        }
        if let Some(quantity) = &line.quantity {
            if quantity.value.is_sign_negative() && !quantity.value.is_zero() {
                issues.push(
                    Issue::new(
                        IssueCode::NegativeQuantity,
                        format!("line {number} has negative quantity {}", quantity.value),
                    )
                    .with_evidence(quantity.evidence.iter().copied()),
                );
            }
        }
        if let Some(stated) = &line.line_total {
            let inputs = [line.quantity.as_ref(), line.unit_price.as_ref(), Some(stated)];
            let factors = line.quantity.is_some() && line.unit_price.is_some();
            let verdict = line
                .computed_total()
                .map(|computed| (computed, tolerance.accepts(stated.value, computed)));
            match verdict {
                Some((_, Some(true))) => {}
                Some((computed, Some(false))) => issues.push(
                    Issue::new(
                        IssueCode::LineTotalMismatch,
                        format!(
                            "line {number}: quantity x unit price is {computed}, sheet says {}",
                            stated.value
                        ),
                    )
                    .with_evidence(ids(&inputs)),
                ),
                Some((_, None)) | None if factors => {
                    issues.push(overflow(&format!("line {number} total check"), ids(&inputs)));
                }
                Some((_, None)) | None => {}
            }
        }
    }

    let totals = &order.totals;
    let mut line_sum = None;
    if !order.line_items.is_empty() {
        match checked_line_sum(&order.line_items) {
            Ok(sum) => line_sum = sum,
            Err(()) => {
                let evidence = order
                    .line_items
                    .iter()
                    .flat_map(|line| line.line_total.iter())
                    .flat_map(|value| value.evidence.iter().copied())
                    .collect();
                issues.push(overflow("summing the order lines", evidence));
            }
        }
    }

    if let (Some(subtotal), Some(sum)) = (&totals.subtotal, line_sum) {
        match tolerance.accepts(subtotal.value, sum) {
            Some(true) => {}
            Some(false) => issues.push(
                Issue::new(
                    IssueCode::SubtotalMismatch,
                    format!("order lines add up to {sum}, subtotal says {}", subtotal.value),
                )
                .with_evidence(subtotal.evidence.iter().copied()),
            ),
            None => issues.push(overflow("subtotal check", subtotal.evidence.clone())),
        }
    }

    if let Some(total) = &totals.total {
        let base = totals.subtotal.as_ref().map(|value| value.value).or(line_sum);
        if let Some(base) = base {
            let tax = totals.tax.as_ref().map(|value| value.value).unwrap_or(Decimal::ZERO);
            let evidence = ids(&[totals.subtotal.as_ref(), totals.tax.as_ref(), Some(total)]);
            let verdict = base.checked_add(tax).and_then(|expected| {
                tolerance.accepts(total.value, expected).map(|accepted| (expected, accepted))
            });
            match verdict {
                Some((_, true)) => {}
                Some((expected, false)) => issues.push(
                    Issue::new(
                        IssueCode::TotalMismatch,
                        format!("subtotal plus tax is {expected}, total says {}", total.value),
                    )
                    .with_evidence(evidence),
                ),
                None => issues.push(overflow("total check", evidence)),
            }
        }
    }

    if order.customer.status == ResolutionStatus::Missing {
        issues.push(Issue::new(IssueCode::CustomerUnresolved, "no customer found in the workbook"));
    }

    issues
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{validate, Tolerance};
    use crate::domain::column::{ColumnMapping, MappingMethod, SchemaInference};
    use crate::domain::evidence::{CellAddress, EvidenceStore};
    use crate::domain::field::{CanonicalField, ColumnId};
    use crate::domain::issue::{IssueCode, IssueLog, Severity};
    use crate::domain::order::{
        CanonicalOrder, CaseId, ConfidenceBreakdown, CustomerRef, DocumentTotals, FieldValue,
        LineItem, OrderMetadata, ResolutionStatus,
    };

    struct Builder {
        evidence: EvidenceStore,
        lines: Vec<LineItem>,
        totals: DocumentTotals,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                evidence: EvidenceStore::new(),
                lines: Vec::new(),
                totals: DocumentTotals::default(),
            }
        }

        fn number(&mut self, row: u32, col: u32, value: Decimal) -> FieldValue<Decimal> {
            let text = value.to_string();
            let id = self.evidence.record("S", CellAddress::new(row, col), text.clone(), text, None);
            FieldValue::new(value, id)
        }

        fn line(mut self, qty: Option<Decimal>, price: Decimal, total: Decimal) -> Self {
            let row = self.lines.len() as u32 + 1;
            let mut line = LineItem::new(row);
            let id = self.evidence.record("S", CellAddress::new(row, 0), "X", "X", None);
            line.sku = Some(FieldValue::new("X".to_string(), id));
            line.quantity = qty.map(|qty| self.number(row, 1, qty));
            line.unit_price = Some(self.number(row, 2, price));
            line.line_total = Some(self.number(row, 3, total));
            self.lines.push(line);
            self
        }

        fn subtotal(mut self, value: Decimal) -> Self {
            self.totals.subtotal = Some(self.number(50, 3, value));
            self
        }

        fn total(mut self, value: Decimal) -> Self {
            self.totals.total = Some(self.number(52, 3, value));
            self
        }

        fn build(self) -> CanonicalOrder {
            let mapping = |field, column: &str| ColumnMapping {
                field,
                column_id: ColumnId(column.to_string()),
                confidence: 1.0,
                method: MappingMethod::ExactSynonym,
            };
            CanonicalOrder {
                metadata: OrderMetadata {
                    case_id: CaseId("c".to_string()),
                    filename: "f.xlsx".to_string(),
                    source_hash: "sha256:0".to_string(),
                    language_hint: None,
                    version: 1,
                    parent_version: None,
                    sheet: Some("S".to_string()),
                    header_row: Some(0),
                    extracted_at: Utc::now(),
                },
                customer: CustomerRef {
                    name: Some("Acme".to_string()),
                    status: ResolutionStatus::Extracted,
                    evidence: Vec::new(),
                },
                line_items: self.lines,
                totals: self.totals,
                evidence: self.evidence,
                schema: SchemaInference {
                    mappings: vec![
                        mapping(CanonicalField::Sku, "A"),
                        mapping(CanonicalField::Quantity, "B"),
                    ],
                    ..SchemaInference::default()
                },
                confidence: ConfidenceBreakdown::default(),
                issues: IssueLog::new(),
            }
        }
    }

    fn d(value: i64, scale: u32) -> Decimal {
        Decimal::new(value, scale)
    }

    #[test]
    fn zero_quantity_is_valid_and_silent() {
        let order = Builder::new().line(Some(Decimal::ZERO), d(5, 0), Decimal::ZERO).build();
        assert!(validate(&order, Tolerance::default()).is_empty());
    }

    #[test]
    fn negative_quantity_only_warns() {
        let order = Builder::new().line(Some(d(-2, 0)), d(5, 0), d(-10, 0)).build();
        let issues = validate(&order, Tolerance::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::NegativeQuantity);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn arithmetic_checks_respect_tolerance() {
        let within = Builder::new().line(Some(d(3, 0)), d(333, 2), d(1000, 2)).build();
        assert!(validate(&within, Tolerance::default()).is_empty());

        let off = Builder::new()
            .line(Some(d(3, 0)), d(10, 0), d(35, 0))
            .subtotal(d(50, 0))
            .total(d(60, 0))
            .build();
        let codes: Vec<IssueCode> =
            validate(&off, Tolerance::default()).into_iter().map(|issue| issue.code).collect();
        assert_eq!(
            codes,
            vec![IssueCode::LineTotalMismatch, IssueCode::SubtotalMismatch, IssueCode::TotalMismatch]
        );
        assert!(validate(&off, Tolerance::default())
            .iter()
            .all(|issue| issue.severity == Severity::Warning));
    }

    #[test]
    fn oversized_amounts_skip_the_cross_check_instead_of_panicking() {
        let huge: Decimal = "50000000000000000000000000000".parse().expect("fits in a decimal");
        let order = Builder::new()
            .line(Some(d(1, 0)), huge, huge)
            .line(Some(d(1, 0)), huge, huge)
            .total(huge)
            .build();

        let issues = validate(&order, Tolerance::default());
        let overflows: Vec<_> =
            issues.iter().filter(|issue| issue.code == IssueCode::AmountOverflow).collect();
        assert_eq!(overflows.len(), 1);
        assert_eq!(overflows[0].severity, Severity::Warning);
        assert_eq!(overflows[0].evidence.len(), 2);
        assert!(!issues.iter().any(|issue| issue.code == IssueCode::TotalMismatch));
    }

    #[test]
    fn tolerance_gives_no_verdict_when_the_difference_overflows() {
        assert_eq!(Tolerance::default().accepts(Decimal::MAX, Decimal::MIN), None);
        assert_eq!(Tolerance::default().accepts(d(100, 0), d(1005, 1)), Some(true));
    }

    #[test]
    fn missing_required_values_are_errors() {
        let mut order = Builder::new().line(None, d(5, 0), d(5, 0)).build();
        order.line_items[0].sku = None;
        let codes: Vec<IssueCode> =
            validate(&order, Tolerance::default()).into_iter().map(|issue| issue.code).collect();
        assert_eq!(codes, vec![IssueCode::MissingSku, IssueCode::MissingQuantity]);
    }

    #[test]
    fn empty_orders_and_missing_customers_are_reported() {
        let mut order = Builder::new().build();
        order.customer = CustomerRef::missing();
        let codes: Vec<IssueCode> =
            validate(&order, Tolerance::default()).into_iter().map(|issue| issue.code).collect();
        assert_eq!(codes, vec![IssueCode::NoLineItems, IssueCode::CustomerUnresolved]);
    }
}
