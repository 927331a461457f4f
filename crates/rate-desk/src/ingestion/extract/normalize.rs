//! Adjustment normalization: closed-interval grid cells become half-open
//! `[lo, hi)` cells, legacy 2-D loan-amount rows become 1-D bracket keys,
//! and any remaining overlap within a kind rejects the document.

use std::collections::BTreeMap;

use super::{grid_shaped, ExtractedAdjustment, ExtractionDocument};
use crate::catalog::adjustments::{loan_bracket_key, parse_loan_bracket, AdjustmentRule};
use crate::catalog::AdjustmentKind;

/// A store-ready adjustment, minus the offering id the coordinator fills in.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAdjustment {
    pub kind: AdjustmentKind,
    pub rule: AdjustmentRule,
    pub adjustment_points: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("adjustment references unknown program '{0}'")]
    UnknownProgramRef(String),
    #[error("{kind} grid for '{program}' has missing or inverted bounds")]
    MalformedGrid { kind: &'static str, program: String },
    #[error("{kind} adjustments for '{program}' overlap at {detail}")]
    Overlap {
        kind: &'static str,
        program: String,
        detail: String,
    },
    #[error("loan amount bracket '{0}' is malformed")]
    MalformedBracket(String),
    #[error("{kind} adjustment for '{program}' is missing its value key")]
    MissingValueKey { kind: &'static str, program: String },
    #[error("duplicate {kind} key '{key}' for '{program}'")]
    DuplicateKey {
        kind: &'static str,
        key: String,
        program: String,
    },
}

/// Normalize every adjustment in a document, grouped by program reference.
/// The result is deterministic: grids sorted by row then column, keys by
/// value.
pub fn normalize_document(
    document: &ExtractionDocument,
) -> Result<BTreeMap<String, Vec<NormalizedAdjustment>>, NormalizeError> {
    let mut grouped: BTreeMap<(String, AdjustmentKind), Vec<&ExtractedAdjustment>> =
        BTreeMap::new();
    for adjustment in &document.adjustments {
        if !document
            .programs
            .iter()
            .any(|program| program.program_name == adjustment.program_ref)
        {
            return Err(NormalizeError::UnknownProgramRef(
                adjustment.program_ref.clone(),
            ));
        }
        grouped
            .entry((adjustment.program_ref.clone(), adjustment.kind))
            .or_default()
            .push(adjustment);
    }

    let mut normalized: BTreeMap<String, Vec<NormalizedAdjustment>> = BTreeMap::new();
    for ((program_ref, kind), rows) in grouped {
        let batch = match kind {
            AdjustmentKind::FicoLtv => normalize_grid(&program_ref, kind, &rows)?,
            AdjustmentKind::LoanAmount => normalize_loan_amount(&program_ref, &rows)?,
            _ => normalize_keys(&program_ref, kind, &rows)?,
        };
        normalized.entry(program_ref).or_default().extend(batch);
    }

    Ok(normalized)
}

/// Convert the closed-interval cells of one grid to half-open cells.
///
/// Rate sheets publish either shared-boundary rows (`620-660, 660-700`) or
/// gap-of-one integer rows (`620-659, 660-699`); both collapse to
/// `[620, 660)`. The final interval of an integral axis widens by one so
/// its closed top point stays addressable.
fn normalize_grid(
    program: &str,
    kind: AdjustmentKind,
    rows: &[&ExtractedAdjustment],
) -> Result<Vec<NormalizedAdjustment>, NormalizeError> {
    let mut cells = Vec::with_capacity(rows.len());
    for row in rows {
        let (Some(row_min), Some(row_max), Some(col_min), Some(col_max)) =
            (row.row_min, row.row_max, row.col_min, row.col_max)
        else {
            return Err(NormalizeError::MalformedGrid {
                kind: kind.label(),
                program: program.to_string(),
            });
        };
        if !row_min.is_finite() || !col_min.is_finite() || row_min > row_max || col_min > col_max {
            return Err(NormalizeError::MalformedGrid {
                kind: kind.label(),
                program: program.to_string(),
            });
        }
        cells.push(GridCell {
            row: (row_min, row_max),
            col: (col_min, col_max),
            points: row.adjustment_points,
        });
    }

    let row_axis = normalize_axis(cells.iter().map(|cell| cell.row).collect());
    let col_axis = normalize_axis(cells.iter().map(|cell| cell.col).collect());
    for cell in &mut cells {
        cell.row = row_axis[&ordered(cell.row)];
        cell.col = col_axis[&ordered(cell.col)];
    }

    cells.sort_by(|a, b| {
        (a.row.0, a.col.0)
            .partial_cmp(&(b.row.0, b.col.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (i, a) in cells.iter().enumerate() {
        for b in cells.iter().skip(i + 1) {
            if intervals_overlap(a.row, b.row) && intervals_overlap(a.col, b.col) {
                return Err(NormalizeError::Overlap {
                    kind: kind.label(),
                    program: program.to_string(),
                    detail: format!(
                        "[{}, {}) x [{}, {})",
                        b.row.0, b.row.1, b.col.0, b.col.1
                    ),
                });
            }
        }
    }

    Ok(cells
        .into_iter()
        .map(|cell| NormalizedAdjustment {
            kind,
            rule: AdjustmentRule::Grid {
                row_min: cell.row.0,
                row_max: cell.row.1,
                col_min: cell.col.0,
                col_max: cell.col.1,
            },
            adjustment_points: cell.points,
        })
        .collect())
}

struct GridCell {
    row: (f64, f64),
    col: (f64, f64),
    points: f64,
}

/// Key an interval by its bit pattern so the axis map survives NaN-free
/// float lookups.
fn ordered(interval: (f64, f64)) -> (u64, u64) {
    (interval.0.to_bits(), interval.1.to_bits())
}

/// Map each distinct closed interval of one axis to its half-open form.
fn normalize_axis(intervals: Vec<(f64, f64)>) -> BTreeMap<(u64, u64), (f64, f64)> {
    let mut distinct: Vec<(f64, f64)> = Vec::new();
    for interval in intervals {
        if !distinct.contains(&interval) {
            distinct.push(interval);
        }
    }
    distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let integral = distinct
        .iter()
        .all(|(lo, hi)| lo.fract() == 0.0 && hi.fract() == 0.0);

    let mut mapping = BTreeMap::new();
    for (index, interval) in distinct.iter().enumerate() {
        let (lo, hi) = *interval;
        let next_lo = distinct
            .iter()
            .skip(index + 1)
            .map(|(next_lo, _)| *next_lo)
            .find(|next_lo| *next_lo > lo);

        let new_hi = match next_lo {
            // Shared-boundary or gap-of-one successor: snap to its start.
            Some(next) if hi <= next && next - hi <= 1.0 => next,
            _ if integral => hi + 1.0,
            _ => hi,
        };

        mapping.insert(ordered(*interval), (lo, new_hi));
    }
    mapping
}

fn intervals_overlap(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Loan-amount adjustments normalize to 1-D bracket keys. Legacy rows that
/// arrive grid-shaped (bounds in the row axis) migrate to bracket form.
fn normalize_loan_amount(
    program: &str,
    rows: &[&ExtractedAdjustment],
) -> Result<Vec<NormalizedAdjustment>, NormalizeError> {
    let mut brackets: Vec<(u64, u64, f64, String)> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = if grid_shaped(row) {
            let lo = row.row_min.unwrap_or_default();
            let hi = row.row_max.unwrap_or_default();
            if !lo.is_finite() || !hi.is_finite() || lo < 0.0 || lo >= hi {
                return Err(NormalizeError::MalformedGrid {
                    kind: AdjustmentKind::LoanAmount.label(),
                    program: program.to_string(),
                });
            }
            loan_bracket_key(lo.round() as u64, hi.round() as u64)
        } else {
            row.value_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .ok_or_else(|| NormalizeError::MissingValueKey {
                    kind: AdjustmentKind::LoanAmount.label(),
                    program: program.to_string(),
                })?
                .to_string()
        };

        let (lo, hi) =
            parse_loan_bracket(&key).ok_or_else(|| NormalizeError::MalformedBracket(key.clone()))?;
        brackets.push((lo, hi, row.adjustment_points, key));
    }

    brackets.sort_by_key(|(lo, hi, _, _)| (*lo, *hi));
    for pair in brackets.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(NormalizeError::Overlap {
                kind: AdjustmentKind::LoanAmount.label(),
                program: program.to_string(),
                detail: format!("'{}' and '{}'", pair[0].3, pair[1].3),
            });
        }
    }

    Ok(brackets
        .into_iter()
        .map(|(_, _, points, key)| NormalizedAdjustment {
            kind: AdjustmentKind::LoanAmount,
            rule: AdjustmentRule::Key { value_key: key },
            adjustment_points: points,
        })
        .collect())
}

/// 1-D lookup kinds: canonical token per row, no duplicates within a kind.
fn normalize_keys(
    program: &str,
    kind: AdjustmentKind,
    rows: &[&ExtractedAdjustment],
) -> Result<Vec<NormalizedAdjustment>, NormalizeError> {
    let mut seen: Vec<String> = Vec::new();
    let mut batch = Vec::with_capacity(rows.len());
    for row in rows {
        let key = row
            .value_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| NormalizeError::MissingValueKey {
                kind: kind.label(),
                program: program.to_string(),
            })?;

        let canonical = if kind == AdjustmentKind::State {
            key.to_ascii_uppercase()
        } else {
            key.to_ascii_lowercase()
        };
        if seen.contains(&canonical) {
            return Err(NormalizeError::DuplicateKey {
                kind: kind.label(),
                key: canonical,
                program: program.to_string(),
            });
        }
        seen.push(canonical.clone());
        batch.push(NormalizedAdjustment {
            kind,
            rule: AdjustmentRule::Key {
                value_key: canonical,
            },
            adjustment_points: row.adjustment_points,
        });
    }

    batch.sort_by(|a, b| match (&a.rule, &b.rule) {
        (AdjustmentRule::Key { value_key: a }, AdjustmentRule::Key { value_key: b }) => a.cmp(b),
        _ => std::cmp::Ordering::Equal,
    });
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::extract::{ExtractedProgram, ExtractionMetadata};

    fn document(adjustments: Vec<ExtractedAdjustment>) -> ExtractionDocument {
        ExtractionDocument {
            metadata: ExtractionMetadata::default(),
            programs: vec![ExtractedProgram {
                program_name: "DSCR 30yr".to_string(),
                ..ExtractedProgram::default()
            }],
            adjustments,
        }
    }

    fn grid_row(row_min: f64, row_max: f64, col_min: f64, col_max: f64) -> ExtractedAdjustment {
        ExtractedAdjustment {
            program_ref: "DSCR 30yr".to_string(),
            kind: AdjustmentKind::FicoLtv,
            row_min: Some(row_min),
            row_max: Some(row_max),
            col_min: Some(col_min),
            col_max: Some(col_max),
            value_key: None,
            adjustment_points: -0.25,
        }
    }

    fn key_row(kind: AdjustmentKind, key: &str) -> ExtractedAdjustment {
        ExtractedAdjustment {
            program_ref: "DSCR 30yr".to_string(),
            kind,
            row_min: None,
            row_max: None,
            col_min: None,
            col_max: None,
            value_key: Some(key.to_string()),
            adjustment_points: -0.125,
        }
    }

    fn rules_for(document: &ExtractionDocument) -> Vec<NormalizedAdjustment> {
        normalize_document(document)
            .expect("normalizes")
            .remove("DSCR 30yr")
            .expect("program present")
    }

    #[test]
    fn shared_boundary_grid_becomes_half_open() {
        let doc = document(vec![
            grid_row(620.0, 660.0, 60.0, 75.0),
            grid_row(660.0, 700.0, 60.0, 75.0),
        ]);
        let rules = rules_for(&doc);
        assert_eq!(rules.len(), 2);
        let AdjustmentRule::Grid { row_max, .. } = rules[0].rule else {
            panic!("expected grid");
        };
        assert_eq!(row_max, 660.0);
        let AdjustmentRule::Grid {
            row_min, row_max, ..
        } = rules[1].rule
        else {
            panic!("expected grid");
        };
        assert_eq!(row_min, 660.0);
        // Final integral interval keeps its closed top point addressable.
        assert_eq!(row_max, 701.0);
    }

    #[test]
    fn gap_of_one_integer_grid_closes_the_seam() {
        let doc = document(vec![
            grid_row(620.0, 659.0, 60.0, 75.0),
            grid_row(660.0, 699.0, 60.0, 75.0),
        ]);
        let rules = rules_for(&doc);
        let AdjustmentRule::Grid { row_max, .. } = rules[0].rule else {
            panic!("expected grid");
        };
        assert_eq!(row_max, 660.0);
    }

    #[test]
    fn genuinely_overlapping_cells_are_rejected() {
        let doc = document(vec![
            grid_row(620.0, 700.0, 60.0, 75.0),
            grid_row(660.0, 740.0, 60.0, 75.0),
        ]);
        let error = normalize_document(&doc).expect_err("overlap");
        assert!(matches!(error, NormalizeError::Overlap { .. }));
    }

    #[test]
    fn distinct_column_bands_do_not_conflict() {
        let doc = document(vec![
            grid_row(620.0, 660.0, 60.0, 75.0),
            grid_row(620.0, 660.0, 75.0, 90.0),
        ]);
        let rules = rules_for(&doc);
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn legacy_grid_shaped_loan_amount_rows_migrate_to_brackets() {
        let mut legacy = key_row(AdjustmentKind::LoanAmount, "unused");
        legacy.value_key = None;
        legacy.row_min = Some(500_000.0);
        legacy.row_max = Some(1_000_000.0);
        let doc = document(vec![legacy]);
        let rules = rules_for(&doc);
        assert_eq!(
            rules[0].rule,
            AdjustmentRule::Key {
                value_key: "500k-1m".to_string()
            }
        );
    }

    #[test]
    fn overlapping_loan_brackets_are_rejected() {
        let doc = document(vec![
            key_row(AdjustmentKind::LoanAmount, "0-750k"),
            key_row(AdjustmentKind::LoanAmount, "500k-1m"),
        ]);
        let error = normalize_document(&doc).expect_err("bracket overlap");
        assert!(matches!(error, NormalizeError::Overlap { .. }));
    }

    #[test]
    fn duplicate_lookup_keys_are_rejected() {
        let doc = document(vec![
            key_row(AdjustmentKind::Purpose, "purchase"),
            key_row(AdjustmentKind::Purpose, "Purchase"),
        ]);
        let error = normalize_document(&doc).expect_err("duplicate key");
        assert!(matches!(error, NormalizeError::DuplicateKey { .. }));
    }

    #[test]
    fn state_keys_canonicalize_to_uppercase() {
        let doc = document(vec![key_row(AdjustmentKind::State, "ca")]);
        let rules = rules_for(&doc);
        assert_eq!(
            rules[0].rule,
            AdjustmentRule::Key {
                value_key: "CA".to_string()
            }
        );
    }

    #[test]
    fn unknown_program_ref_is_rejected() {
        let mut doc = document(vec![key_row(AdjustmentKind::Purpose, "purchase")]);
        doc.adjustments[0].program_ref = "Mystery".to_string();
        let error = normalize_document(&doc).expect_err("unknown ref");
        assert_eq!(
            error,
            NormalizeError::UnknownProgramRef("Mystery".to_string())
        );
    }
}
