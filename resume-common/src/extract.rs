//! Text extraction from uploaded PDF documents.
//!
//! Extraction failures are always permanent: a document that cannot be parsed
//! today will not parse any better on a retry, so the executor records the
//! failure instead of burning retry budget.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lopdf::content::Content;
use lopdf::{Document, Object};
use thiserror::Error;

use crate::error::JobError;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("could not parse document: {0}")]
    InvalidDocument(#[from] lopdf::Error),
    #[error("could not decode content of page {page}: {error}")]
    InvalidContent { page: u32, error: lopdf::Error },
    #[error("unreadable document: {0}")]
    Unreadable(String),
}

impl From<ExtractError> for JobError {
    fn from(error: ExtractError) -> Self {
        JobError::permanent(format!("extraction failed: {error}"))
    }
}

pub trait Extractor: Send + Sync {
    /// Turn raw document bytes into plain UTF-8 text.
    fn extract(&self, data: &[u8]) -> Result<String, ExtractError>;
}

/// Extractor for PDF documents.
///
/// Page text is reassembled positionally rather than in content-stream
/// order: fragments sort top-to-bottom (higher y first), ties left-to-right,
/// and concatenate without separators. Pages join with a single newline.
/// U+FFFD replacement characters produced by lossy decoding are stripped
/// from the result, and empty output is not an error.
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, data: &[u8]) -> Result<String, ExtractError> {
        let document = Document::load_mem(data)?;

        let mut pages = Vec::new();
        for (page_number, page_id) in document.get_pages() {
            let raw = document
                .get_page_content(page_id)
                .map_err(|error| ExtractError::InvalidContent {
                    page: page_number,
                    error,
                })?;
            let content =
                Content::decode(&raw).map_err(|error| ExtractError::InvalidContent {
                    page: page_number,
                    error,
                })?;
            pages.push(page_text(&content));
        }

        Ok(pages.join("\n").replace('\u{FFFD}', ""))
    }
}

/// A run of text shown at a known position on the page.
struct Fragment {
    x: f64,
    y: f64,
    text: String,
}

/// Walk a page's operations tracking the text position, collecting one
/// fragment per show-text operator. Only the translation components of the
/// text matrix are tracked; rotated or skewed text keeps its anchor point,
/// which is enough to order fragments.
fn page_text(content: &Content) -> String {
    let mut fragments: Vec<Fragment> = Vec::new();
    let mut x = 0f64;
    let mut y = 0f64;
    let mut leading = 0f64;

    for operation in &content.operations {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "BT" => {
                x = 0.0;
                y = 0.0;
            }
            "Tm" if operands.len() == 6 => {
                if let (Some(e), Some(f)) = (number(&operands[4]), number(&operands[5])) {
                    x = e;
                    y = f;
                }
            }
            "Td" if operands.len() == 2 => {
                if let (Some(tx), Some(ty)) = (number(&operands[0]), number(&operands[1])) {
                    x += tx;
                    y += ty;
                }
            }
            "TD" if operands.len() == 2 => {
                if let (Some(tx), Some(ty)) = (number(&operands[0]), number(&operands[1])) {
                    x += tx;
                    y += ty;
                    leading = -ty;
                }
            }
            "TL" if operands.len() == 1 => {
                if let Some(tl) = number(&operands[0]) {
                    leading = tl;
                }
            }
            "T*" => y -= leading,
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    push_fragment(&mut fragments, x, y, decode_text(bytes));
                }
            }
            "'" => {
                y -= leading;
                if let Some(Object::String(bytes, _)) = operands.first() {
                    push_fragment(&mut fragments, x, y, decode_text(bytes));
                }
            }
            "\"" => {
                y -= leading;
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    push_fragment(&mut fragments, x, y, decode_text(bytes));
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    let mut text = String::new();
                    for item in items {
                        if let Object::String(bytes, _) = item {
                            text.push_str(&decode_text(bytes));
                        }
                    }
                    push_fragment(&mut fragments, x, y, text);
                }
            }
            _ => {}
        }
    }

    fragments.sort_by(|a, b| {
        b.y.partial_cmp(&a.y)
            .unwrap_or(CmpOrdering::Equal)
            .then(a.x.partial_cmp(&b.x).unwrap_or(CmpOrdering::Equal))
    });

    fragments.into_iter().map(|fragment| fragment.text).collect()
}

fn push_fragment(fragments: &mut Vec<Fragment>, x: f64, y: f64, text: String) {
    if !text.is_empty() {
        fragments.push(Fragment { x, y, text });
    }
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}

/// PDF strings are UTF-16BE when BOM-prefixed, otherwise treated as Latin-1.
/// Lossy UTF-16 decoding may introduce U+FFFD, which the caller strips.
fn decode_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&byte| byte as char).collect()
    }
}

/// Extractor double for tests: canned output and a call counter.
#[derive(Clone)]
pub struct MockExtractor {
    result: Arc<Mutex<Result<String, String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn returning(text: &str) -> Self {
        Self {
            result: Arc::new(Mutex::new(Ok(text.to_owned()))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Arc::new(Mutex::new(Err(reason.to_owned()))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for MockExtractor {
    fn extract(&self, _data: &[u8]) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.result.lock().unwrap() {
            Ok(text) => Ok(text.clone()),
            Err(reason) => Err(ExtractError::Unreadable(reason.clone())),
        }
    }
}
