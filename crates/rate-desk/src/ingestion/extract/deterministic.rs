use chrono::NaiveDate;
use regex::Regex;

use super::{
    ExtractedAdjustment, ExtractedProgram, ExtractionDocument, ExtractionError, RateSheetExtractor,
    RateSheetFile,
};
use crate::catalog::AdjustmentKind;

/// Per-lender parsers keyed on layout heuristics: a title regex and the
/// header signature of the program table. Outputs the same contract as the
/// AI backend; fields a layout cannot provide stay null.
pub struct DeterministicExtractor {
    layouts: Vec<Layout>,
}

struct Layout {
    name: &'static str,
    title: Regex,
    header_signature: &'static [&'static str],
    parse: fn(&str) -> Result<ExtractionDocument, ExtractionError>,
}

impl Layout {
    fn matches(&self, text: &str, first_headers: &[String]) -> bool {
        if self.title.is_match(text) {
            return true;
        }
        self.header_signature
            .iter()
            .all(|required| first_headers.iter().any(|header| header == required))
    }
}

impl Default for DeterministicExtractor {
    fn default() -> Self {
        Self::standard()
    }
}

impl DeterministicExtractor {
    /// The stock layout set: the platform's columnar CSV convention plus
    /// lender-specific grids that have stabilized enough to hand-parse.
    pub fn standard() -> Self {
        Self {
            layouts: vec![
                Layout {
                    name: "columnar",
                    title: Regex::new(r"(?im)^#?\s*rate\s+desk\s+columnar").expect("static regex"),
                    header_signature: &["program", "base_rate"],
                    parse: parse_columnar,
                },
                Layout {
                    name: "summit-funding",
                    title: Regex::new(r"(?i)summit\s+funding").expect("static regex"),
                    header_signature: &["program name", "note rate"],
                    parse: parse_summit,
                },
            ],
        }
    }
}

impl RateSheetExtractor for DeterministicExtractor {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    fn extract(&self, file: &RateSheetFile) -> Result<ExtractionDocument, ExtractionError> {
        let text = String::from_utf8_lossy(&file.bytes).into_owned();
        let blocks = split_blocks(&text);
        let first_headers = blocks
            .first()
            .map(|block| block.headers.clone())
            .unwrap_or_default();

        let layout = self
            .layouts
            .iter()
            .find(|layout| layout.matches(&text, &first_headers))
            .ok_or(ExtractionError::UnrecognizedLayout)?;

        let mut document = (layout.parse)(&text)?;
        document.metadata.extraction_method = format!("deterministic:{}", layout.name);
        document.validate()?;
        Ok(document)
    }
}

struct Block {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn split_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if !current.is_empty() {
                if let Some(block) = parse_block(&current) {
                    blocks.push(block);
                }
                current.clear();
            }
        } else if !line.trim_start().starts_with('#') {
            current.push(line);
        }
    }

    blocks
}

fn parse_block(lines: &[&str]) -> Option<Block> {
    let body = lines.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = records
        .next()?
        .ok()?
        .iter()
        .map(|cell| cell.trim().to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for record in records {
        let record = record.ok()?;
        rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
    }

    Some(Block { headers, rows })
}

fn column(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|header| header == name)
}

fn cell<'a>(row: &'a [String], index: Option<usize>) -> Option<&'a str> {
    index
        .and_then(|i| row.get(i))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn parse_rate(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '%' | '$' | ',' | ' '))
        .collect();
    cleaned.parse().ok()
}

fn parse_amount(raw: &str) -> Option<u64> {
    parse_rate(raw).filter(|value| *value >= 0.0).map(|value| value.round() as u64)
}

fn effective_date_in(text: &str) -> Option<NaiveDate> {
    let pattern = Regex::new(r"(?i)effective(?:\s+date)?\s*[:,]?\s*(\d{4}-\d{2}-\d{2})")
        .expect("static regex");
    let capture = pattern.captures(text)?;
    NaiveDate::parse_from_str(&capture[1], "%Y-%m-%d").ok()
}

fn kind_from_token(token: &str) -> Option<AdjustmentKind> {
    match token.trim().to_ascii_lowercase().as_str() {
        "fico_ltv" | "fico/ltv" | "fico x ltv" => Some(AdjustmentKind::FicoLtv),
        "purpose" => Some(AdjustmentKind::Purpose),
        "occupancy" => Some(AdjustmentKind::Occupancy),
        "property_type" | "property type" => Some(AdjustmentKind::PropertyType),
        "loan_amount" | "loan amount" => Some(AdjustmentKind::LoanAmount),
        "lock_period" | "lock period" | "lock" => Some(AdjustmentKind::LockPeriod),
        "state" => Some(AdjustmentKind::State),
        _ => None,
    }
}

/// The platform's canonical columnar CSV: a program table, then one or more
/// adjustment tables separated by blank lines.
fn parse_columnar(text: &str) -> Result<ExtractionDocument, ExtractionError> {
    let mut document = ExtractionDocument {
        metadata: super::ExtractionMetadata {
            effective_date: effective_date_in(text),
            ..Default::default()
        },
        ..Default::default()
    };

    for block in split_blocks(text) {
        let headers = &block.headers;
        if column(headers, "program").is_some() && column(headers, "base_rate").is_some() {
            let name_col = column(headers, "program");
            let slug_col = column(headers, "slug");
            let rate_col = column(headers, "base_rate");
            let fico_col = column(headers, "min_fico");
            let ltv_col = column(headers, "max_ltv");
            let min_loan_col = column(headers, "min_loan");
            let max_loan_col = column(headers, "max_loan");

            for row in &block.rows {
                let Some(name) = cell(row, name_col) else {
                    continue;
                };
                document.programs.push(ExtractedProgram {
                    program_name: name.to_string(),
                    program_type: cell(row, slug_col).map(str::to_string),
                    base_rate: cell(row, rate_col).and_then(parse_rate),
                    min_fico: cell(row, fico_col)
                        .and_then(parse_amount)
                        .map(|fico| fico as u16),
                    max_ltv: cell(row, ltv_col).and_then(parse_rate),
                    min_loan: cell(row, min_loan_col).and_then(parse_amount),
                    max_loan: cell(row, max_loan_col).and_then(parse_amount),
                    allowed_property_types: Vec::new(),
                    allowed_occupancy: Vec::new(),
                });
            }
        } else if column(headers, "kind").is_some() && column(headers, "points").is_some() {
            let program_col = column(headers, "program");
            let kind_col = column(headers, "kind");
            let row_min_col = column(headers, "row_min");
            let row_max_col = column(headers, "row_max");
            let col_min_col = column(headers, "col_min");
            let col_max_col = column(headers, "col_max");
            let key_col = column(headers, "value_key");
            let points_col = column(headers, "points");

            for row in &block.rows {
                let Some(program_ref) = cell(row, program_col) else {
                    continue;
                };
                let kind = cell(row, kind_col)
                    .and_then(kind_from_token)
                    .ok_or_else(|| {
                        ExtractionError::SchemaInvalid(format!(
                            "unknown adjustment kind in row for '{program_ref}'"
                        ))
                    })?;
                let points = cell(row, points_col).and_then(parse_rate).ok_or_else(|| {
                    ExtractionError::SchemaInvalid(format!(
                        "missing adjustment points for '{program_ref}'"
                    ))
                })?;

                document.adjustments.push(ExtractedAdjustment {
                    program_ref: program_ref.to_string(),
                    kind,
                    row_min: cell(row, row_min_col).and_then(parse_rate),
                    row_max: cell(row, row_max_col).and_then(parse_rate),
                    col_min: cell(row, col_min_col).and_then(parse_rate),
                    col_max: cell(row, col_max_col).and_then(parse_rate),
                    value_key: cell(row, key_col).map(str::to_string),
                    adjustment_points: points,
                });
            }
        }
    }

    Ok(document)
}

/// Summit Funding publishes a program table plus a FICO/LTV LLPA grid with
/// its own header names.
fn parse_summit(text: &str) -> Result<ExtractionDocument, ExtractionError> {
    let mut document = ExtractionDocument {
        metadata: super::ExtractionMetadata {
            effective_date: effective_date_in(text),
            lender_hint: Some("Summit Funding".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    for block in split_blocks(text) {
        let headers = &block.headers;
        if column(headers, "note rate").is_some() {
            let name_col = column(headers, "program name");
            let rate_col = column(headers, "note rate");
            let fico_col = column(headers, "fico floor");
            let ltv_col = column(headers, "max ltv");
            let min_loan_col = column(headers, "min loan");
            let max_loan_col = column(headers, "max loan");

            for row in &block.rows {
                let Some(name) = cell(row, name_col) else {
                    continue;
                };
                document.programs.push(ExtractedProgram {
                    program_name: name.to_string(),
                    program_type: None,
                    base_rate: cell(row, rate_col).and_then(parse_rate),
                    min_fico: cell(row, fico_col)
                        .and_then(parse_amount)
                        .map(|fico| fico as u16),
                    max_ltv: cell(row, ltv_col).and_then(parse_rate),
                    min_loan: cell(row, min_loan_col).and_then(parse_amount),
                    max_loan: cell(row, max_loan_col).and_then(parse_amount),
                    allowed_property_types: Vec::new(),
                    allowed_occupancy: Vec::new(),
                });
            }
        } else if column(headers, "fico low").is_some() {
            let program_col = column(headers, "program name");
            let fico_low = column(headers, "fico low");
            let fico_high = column(headers, "fico high");
            let ltv_low = column(headers, "ltv low");
            let ltv_high = column(headers, "ltv high");
            let points_col = column(headers, "adjustment");

            for row in &block.rows {
                let Some(program_ref) = cell(row, program_col) else {
                    continue;
                };
                let points = cell(row, points_col).and_then(parse_rate).ok_or_else(|| {
                    ExtractionError::SchemaInvalid(format!(
                        "missing LLPA value for '{program_ref}'"
                    ))
                })?;
                document.adjustments.push(ExtractedAdjustment {
                    program_ref: program_ref.to_string(),
                    kind: AdjustmentKind::FicoLtv,
                    row_min: cell(row, fico_low).and_then(parse_rate),
                    row_max: cell(row, fico_high).and_then(parse_rate),
                    col_min: cell(row, ltv_low).and_then(parse_rate),
                    col_max: cell(row, ltv_high).and_then(parse_rate),
                    value_key: None,
                    adjustment_points: points,
                });
            }
        }
    }

    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::domain::LenderId;
    use crate::ingestion::sheet::DeclaredType;

    fn file(body: &str) -> RateSheetFile {
        RateSheetFile {
            lender_id: LenderId("ln-a".to_string()),
            declared_type: DeclaredType::Csv,
            bytes: body.as_bytes().to_vec(),
        }
    }

    const COLUMNAR_SHEET: &str = "\
# Rate Desk Columnar Export\n\
# Effective: 2026-08-01\n\
program,slug,base_rate,min_fico,max_ltv,min_loan,max_loan\n\
DSCR 30yr,dscr-30,6.500,660,80,150000,2000000\n\
Bank Statement 30yr,bank-statement-30,7.125,680,85,200000,3000000\n\
\n\
program,kind,row_min,row_max,col_min,col_max,value_key,points\n\
DSCR 30yr,fico_ltv,620,660,60,75,,-0.25\n\
DSCR 30yr,purpose,,,,,cash_out_refinance,-0.375\n\
DSCR 30yr,loan_amount,,,,,500k-1m,-0.125\n";

    const SUMMIT_SHEET: &str = "\
Summit Funding Rate Sheet,Effective: 2026-07-15\n\
\n\
Program Name,Note Rate,FICO Floor,Max LTV,Min Loan,Max Loan\n\
Investor DSCR,6.875%,640,75,100000,1500000\n\
\n\
Program Name,FICO Low,FICO High,LTV Low,LTV High,Adjustment\n\
Investor DSCR,640,680,60,75,-0.50\n\
Investor DSCR,680,740,60,75,-0.25\n";

    #[test]
    fn columnar_layout_parses_programs_and_adjustments() {
        let document = DeterministicExtractor::standard()
            .extract(&file(COLUMNAR_SHEET))
            .expect("parses");

        assert_eq!(document.metadata.extraction_method, "deterministic:columnar");
        assert_eq!(
            document.metadata.effective_date,
            NaiveDate::from_ymd_opt(2026, 8, 1)
        );
        assert_eq!(document.programs.len(), 2);
        assert_eq!(document.programs[0].program_type.as_deref(), Some("dscr-30"));
        assert_eq!(document.programs[0].base_rate, Some(6.5));
        assert_eq!(document.programs[1].min_fico, Some(680));

        assert_eq!(document.adjustments.len(), 3);
        assert_eq!(document.adjustments[0].kind, AdjustmentKind::FicoLtv);
        assert_eq!(document.adjustments[0].row_min, Some(620.0));
        assert_eq!(
            document.adjustments[1].value_key.as_deref(),
            Some("cash_out_refinance")
        );
        assert_eq!(document.adjustments[2].kind, AdjustmentKind::LoanAmount);
    }

    #[test]
    fn summit_layout_is_recognized_by_title() {
        let document = DeterministicExtractor::standard()
            .extract(&file(SUMMIT_SHEET))
            .expect("parses");

        assert_eq!(
            document.metadata.extraction_method,
            "deterministic:summit-funding"
        );
        assert_eq!(
            document.metadata.lender_hint.as_deref(),
            Some("Summit Funding")
        );
        assert_eq!(document.programs.len(), 1);
        assert_eq!(document.programs[0].base_rate, Some(6.875));
        assert_eq!(document.adjustments.len(), 2);
        assert_eq!(document.adjustments[1].adjustment_points, -0.25);
    }

    #[test]
    fn unknown_layout_is_rejected() {
        let error = DeterministicExtractor::standard()
            .extract(&file("totally,unrelated\n1,2\n"))
            .expect_err("layout unknown");
        assert!(matches!(error, ExtractionError::UnrecognizedLayout));
    }

    #[test]
    fn unknown_kind_token_fails_the_parse() {
        let sheet = "\
program,slug,base_rate\nDSCR 30yr,dscr-30,6.5\n\n\
program,kind,points\nDSCR 30yr,mystery_kind,-0.25\n";
        let error = DeterministicExtractor::standard()
            .extract(&file(sheet))
            .expect_err("bad kind");
        assert!(matches!(error, ExtractionError::SchemaInvalid(_)));
    }
}
