use std::collections::BTreeMap;

use thiserror::Error;

/// A fully assembled product record, ready for the batch sink and the
/// work queue. Specification keys are kept sorted so the wide-format
/// sink emits a deterministic column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub product_name: String,
    pub source_url: String,
    pub specifications: BTreeMap<String, String>,
    pub comments: Vec<String>,
}

/// A traversal ended without ever finding a product name.
#[derive(Debug, Error)]
#[error("no product name extracted from {url}")]
pub struct IncompleteRecord {
    pub url: String,
}

/// Accumulates one product's data across the detail page and its comment
/// pages. Each in-flight traversal owns its builder exclusively; nothing
/// here is shared between products.
#[derive(Debug)]
pub struct RecordBuilder {
    source_url: String,
    name: Option<String>,
    specifications: BTreeMap<String, String>,
    comments: Vec<String>,
}

impl RecordBuilder {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            name: None,
            specifications: BTreeMap::new(),
            comments: Vec::new(),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Merge specification pairs, overwriting existing keys.
    pub fn merge_specs<I>(&mut self, specs: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.specifications.extend(specs);
    }

    /// Append comment texts in page-visitation order. Duplicates across
    /// overlapping pagination fetches are kept: no source guarantees
    /// stable page boundaries, and dropping repeats would also drop
    /// genuinely repeated comments.
    pub fn append_comments<I>(&mut self, texts: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.comments.extend(texts);
    }

    pub fn finalize(self) -> Result<ProductRecord, IncompleteRecord> {
        let Some(product_name) = self.name else {
            return Err(IncompleteRecord {
                url: self.source_url,
            });
        };
        Ok(ProductRecord {
            product_name,
            source_url: self.source_url,
            specifications: self.specifications,
            comments: self.comments,
        })
    }
}

// ── Tests ──
