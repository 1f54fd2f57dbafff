use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

/// Staging category of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Template,
    Data,
}

impl Category {
    /// Directory under the staging root holding this category.
    pub fn dir(self) -> &'static str {
        match self {
            Category::Template => "templates",
            Category::Data => "data",
        }
    }

    /// Fixed `{suffix}.{ext}` appended to the token of a staged file.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Category::Template => "template.docx",
            Category::Data => "diplomas.xlsx",
        }
    }

    pub fn key_for(self, file_name: &str) -> String {
        format!("{}/{}", self.dir(), file_name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Template => f.write_str("template"),
            Category::Data => f.write_str("data"),
        }
    }
}

/// An uploaded blob persisted in the staging area.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub category: Category,
    pub file_name: String,
    pub size: usize,
}

impl StagedFile {
    pub fn key(&self) -> String {
        self.category.key_for(&self.file_name)
    }
}

/// A single spreadsheet cell as seen by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Blank,
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Blank => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Whether a `{#field}` section over this value renders.
    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Blank => false,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Bool(b) => *b,
            CellValue::Number(n) => *n != 0.0 && !n.is_nan(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Blank => Ok(()),
        }
    }
}

/// One spreadsheet row: column header to cell value, in column order.
pub type RowRecord = IndexMap<String, CellValue>;
