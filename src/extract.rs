//! Format-specific text extraction for ingested documents.
//!
//! Dispatches on file extension and returns plain UTF-8 text. Unsupported
//! extensions are an explicit signal, not an error: the ingestion loop skips
//! them with a warning. A malformed document aborts extraction of that file
//! only.
//!
//! Supported formats: PDF (word-level text), PPTX/PPT (slide shape text plus
//! tables rendered as `Header: Value` rows), and plain text (`.txt`, `.md`).

use std::io::Read;
use std::path::Path;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    /// Extension has no registered extractor; the caller should skip the file.
    UnsupportedExtension(String),
    Io(String),
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedExtension(ext) => {
                write!(f, "unsupported file extension: {}", ext)
            }
            ExtractError::Io(e) => write!(f, "read failed: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "slide deck extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract plain text from a document on disk, dispatching by extension.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => {
            let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
            extract_pdf(&bytes)
        }
        "pptx" | "ppt" => {
            let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
            extract_pptx(&bytes)
        }
        "txt" | "md" => std::fs::read_to_string(path).map_err(|e| ExtractError::Io(e.to_string())),
        _ => Err(ExtractError::UnsupportedExtension(ext)),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Extract all slide text from a PPTX archive, slides in numeric order.
fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_slide_text(&xml)?;
        if !text.is_empty() {
            out.push_str(&text);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Pull text out of one slide's XML.
///
/// Shape text (`a:t` runs outside tables) is emitted in document order.
/// Table cells are buffered per row; the first row is treated as headers and
/// each data row becomes `Header: Value` lines, one per non-empty cell, which
/// embeds better than a flat cell dump.
fn extract_slide_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut in_text_run = false;
    let mut table_depth = 0usize;
    let mut headers: Vec<String> = Vec::new();
    let mut current_row: Option<Vec<String>> = None;
    let mut current_cell: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth += 1;
                    headers.clear();
                }
                b"tr" if table_depth > 0 => {
                    current_row = Some(Vec::new());
                }
                b"tc" if table_depth > 0 => {
                    current_cell = Some(String::new());
                }
                b"t" => {
                    in_text_run = true;
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_text_run => {
                let text = te.unescape().unwrap_or_default();
                if let Some(cell) = current_cell.as_mut() {
                    cell.push_str(&text);
                } else if table_depth == 0 {
                    out.push_str(&text);
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"tc" => {
                    if let (Some(row), Some(cell)) = (current_row.as_mut(), current_cell.take()) {
                        row.push(cell.trim().to_string());
                    }
                }
                b"tr" => {
                    if let Some(row) = current_row.take() {
                        if headers.is_empty() {
                            headers = row;
                        } else {
                            for (header, value) in headers.iter().zip(row.iter()) {
                                if !value.is_empty() {
                                    out.push_str(&format!("{}: {}\n", header, value));
                                }
                            }
                            out.push('\n');
                        }
                    }
                }
                b"tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
