use super::{ExtractionError, RateSheetFile};
use crate::ingestion::sheet::DeclaredType;

/// Text rendering of a rate sheet, ready to be prompted into a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub truncated: bool,
}

/// Renders sheet bytes into a transcript. The shipped implementation covers
/// text and CSV bodies; a real PDF renderer plugs in behind this trait.
pub trait Transcriber: Send + Sync {
    fn transcribe(
        &self,
        file: &RateSheetFile,
        char_limit: usize,
    ) -> Result<Transcript, ExtractionError>;
}

/// Default transcriber: CSV tables become pipe-delimited lines; text-bearing
/// PDFs fall back to printable-run scraping.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextTranscriber;

impl Transcriber for TextTranscriber {
    fn transcribe(
        &self,
        file: &RateSheetFile,
        char_limit: usize,
    ) -> Result<Transcript, ExtractionError> {
        let text = match file.declared_type {
            DeclaredType::Csv => csv_to_pipe_tables(&file.bytes)?,
            DeclaredType::Pdf => printable_runs(&file.bytes)?,
            DeclaredType::Xlsx => {
                return Err(ExtractionError::Transcript(
                    "xlsx sheets require a spreadsheet renderer".to_string(),
                ))
            }
        };

        let (text, truncated) = truncate_chars(text, char_limit);
        Ok(Transcript { text, truncated })
    }
}

fn csv_to_pipe_tables(bytes: &[u8]) -> Result<String, ExtractionError> {
    let body = std::str::from_utf8(bytes)
        .map_err(|err| ExtractionError::Transcript(format!("csv body is not utf-8: {err}")))?;

    let mut out = String::with_capacity(body.len());
    for line in body.lines() {
        if line.trim().is_empty() {
            out.push('\n');
            continue;
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(line.as_bytes());
        for record in reader.records() {
            let record = record
                .map_err(|err| ExtractionError::Transcript(format!("malformed csv row: {err}")))?;
            let cells: Vec<&str> = record.iter().map(str::trim).collect();
            out.push_str(&cells.join(" | "));
            out.push('\n');
        }
    }
    Ok(out)
}

/// Scrape printable runs out of a binary body. Catches uncompressed text
/// objects; sheets without any give a clear error instead of junk.
fn printable_runs(bytes: &[u8]) -> Result<String, ExtractionError> {
    const MIN_RUN: usize = 4;
    let mut out = String::new();
    let mut run = String::new();

    for &byte in bytes {
        let ch = byte as char;
        if byte == b'\n' || byte == b'\t' || (0x20u8..0x7f).contains(&byte) {
            run.push(ch);
        } else {
            if run.trim().len() >= MIN_RUN {
                out.push_str(run.trim_end());
                out.push('\n');
            }
            run.clear();
        }
    }
    if run.trim().len() >= MIN_RUN {
        out.push_str(run.trim_end());
        out.push('\n');
    }

    if out.trim().len() < 32 {
        return Err(ExtractionError::Transcript(
            "no extractable text in pdf body".to_string(),
        ));
    }
    Ok(out)
}

fn truncate_chars(text: String, limit: usize) -> (String, bool) {
    if text.chars().count() <= limit {
        return (text, false);
    }
    let cut: String = text.chars().take(limit).collect();
    (cut, true)
}
