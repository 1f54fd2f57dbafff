//! Placeholder substitution for `.docx` containers.
//!
//! Tags are written `{name}` in the document text. Word frequently splits a
//! single tag over several `<w:t>` runs, so substitution works on the
//! concatenated text of all runs of a part: the value is written into the run
//! where the tag opens and the rest of the tag is removed from the runs that
//! follow. Markup outside the text runs is left byte-for-byte untouched.
//!
//! `{#field}...{/field}` keeps its content once when the row value is truthy
//! and drops it otherwise; `{^field}...{/field}` is the inverse. When both
//! section tags sit alone in their own paragraphs, the tag paragraphs are
//! removed and a dropped section takes every paragraph between them with it.

use crate::models::{CellValue, RowRecord};
use quick_xml::escape::{partial_escape, unescape};
use std::borrow::Cow;
use std::io::{Cursor, Read, Write};
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const DOCUMENT_PART: &str = "word/document.xml";

const TEXT_OPEN: &str = "<w:t";
const TEXT_CLOSE: &str = "</w:t>";
const PARAGRAPH_OPEN: &str = "<w:p";
const PARAGRAPH_CLOSE: &str = "</w:p>";
const LINE_BREAK: &str = "</w:t><w:br/><w:t xml:space=\"preserve\">";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template is not a valid document container: {0}")]
    InvalidContainer(String),

    #[error("Template has no word/document.xml part")]
    MissingDocumentPart,

    #[error("Unclosed tag '{{{0}' in {1}")]
    UnclosedTag(String, String),

    #[error("Unopened tag near '{0}' in {1}")]
    UnopenedTag(String, String),

    #[error("Section '{{#{0}}}' closed by '{{/{1}}}' in {2}")]
    MismatchedSection(String, String, String),

    #[error("Malformed XML in {0}")]
    MalformedXml(String),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
enum PartContent {
    Directory,
    Binary(Vec<u8>),
    Templated(String),
}

#[derive(Debug)]
struct TemplatePart {
    name: String,
    content: PartContent,
}

/// A parsed template, loaded once and rendered for every row of a batch.
#[derive(Debug)]
pub struct TemplateDocument {
    parts: Vec<TemplatePart>,
}

fn is_templated_part(name: &str) -> bool {
    let xml_in = |prefix: &str| name.starts_with(prefix) && name.ends_with(".xml");
    name == DOCUMENT_PART
        || name == "word/footnotes.xml"
        || name == "word/endnotes.xml"
        || xml_in("word/header")
        || xml_in("word/footer")
}

impl TemplateDocument {
    /// Reads the container and checks the tag syntax of every templated part.
    pub fn parse(bytes: &[u8]) -> Result<Self, TemplateError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| TemplateError::InvalidContainer(e.to_string()))?;

        let mut parts = Vec::with_capacity(archive.len());
        let mut has_document = false;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let name = file.name().to_string();

            if file.is_dir() {
                parts.push(TemplatePart {
                    name,
                    content: PartContent::Directory,
                });
                continue;
            }

            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;

            let content = if is_templated_part(&name) {
                has_document |= name == DOCUMENT_PART;
                let xml =
                    String::from_utf8(data).map_err(|_| TemplateError::MalformedXml(name.clone()))?;
                substitute_with(&xml, &name, |_| None)?;
                PartContent::Templated(xml)
            } else {
                PartContent::Binary(data)
            };

            parts.push(TemplatePart { name, content });
        }

        if !has_document {
            return Err(TemplateError::MissingDocumentPart);
        }

        Ok(Self { parts })
    }

    /// Distinct tag and section names used by the template, in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for part in &self.parts {
            if let PartContent::Templated(xml) = &part.content {
                // Syntax was checked in `parse`.
                let _ = substitute_with(xml, &part.name, |tag| {
                    if !names.iter().any(|n| n == tag) {
                        names.push(tag.to_string());
                    }
                    None
                });
            }
        }
        names
    }

    /// Substitutes one row and re-serialises the container with deflate.
    pub fn render(&self, row: &RowRecord, compression_level: i32) -> Result<Vec<u8>, TemplateError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level));

        for part in &self.parts {
            match &part.content {
                PartContent::Directory => writer.add_directory(part.name.clone(), options)?,
                PartContent::Binary(data) => {
                    writer.start_file(part.name.clone(), options)?;
                    writer.write_all(data)?;
                }
                PartContent::Templated(xml) => {
                    let rendered = substitute(xml, row, &part.name)?;
                    writer.start_file(part.name.clone(), options)?;
                    writer.write_all(rendered.as_bytes())?;
                }
            }
        }

        Ok(writer.finish()?.into_inner())
    }
}

/// Substitutes the tags of one XML part with values from `row`.
pub fn substitute<'a>(
    xml: &'a str,
    row: &RowRecord,
    part: &str,
) -> Result<Cow<'a, str>, TemplateError> {
    substitute_with(xml, part, |tag| row.get(tag))
}

struct TextNode {
    open_start: usize,
    open_end: usize,
    close_start: usize,
    /// Byte range of the enclosing `<w:p>` element, closing tag included.
    paragraph: Option<(usize, usize)>,
}

fn enclosing_paragraph(xml: &str, at: usize) -> Option<(usize, usize)> {
    let bytes = xml.as_bytes();
    let mut search = &xml[..at];
    let start = loop {
        let i = search.rfind(PARAGRAPH_OPEN)?;
        // `<w:pPr>` and `<w:proofErr/>` share the prefix.
        if matches!(bytes.get(i + PARAGRAPH_OPEN.len()), Some(b'>' | b' ')) {
            break i;
        }
        search = &search[..i];
    };
    if xml[start..at].contains(PARAGRAPH_CLOSE) {
        return None;
    }
    let end = xml[at..].find(PARAGRAPH_CLOSE)? + at + PARAGRAPH_CLOSE.len();
    Some((start, end))
}

fn find_text_nodes(xml: &str, part: &str) -> Result<Vec<TextNode>, TemplateError> {
    let bytes = xml.as_bytes();
    let mut nodes = Vec::new();
    let mut pos = 0;

    while let Some(rel) = xml[pos..].find(TEXT_OPEN) {
        let open_start = pos + rel;
        let after_name = open_start + TEXT_OPEN.len();

        // `<w:tab/>`, `<w:tbl>`, `<w:tc>`... share the prefix.
        if !matches!(
            bytes.get(after_name),
            Some(b'>' | b'/' | b' ' | b'\t' | b'\r' | b'\n')
        ) {
            pos = after_name;
            continue;
        }

        let open_end = xml[after_name..]
            .find('>')
            .map(|i| after_name + i + 1)
            .ok_or_else(|| TemplateError::MalformedXml(part.to_string()))?;

        if xml[..open_end].ends_with("/>") {
            pos = open_end;
            continue;
        }

        let close_start = xml[open_end..]
            .find(TEXT_CLOSE)
            .map(|i| open_end + i)
            .ok_or_else(|| TemplateError::MalformedXml(part.to_string()))?;

        nodes.push(TextNode {
            open_start,
            open_end,
            close_start,
            paragraph: enclosing_paragraph(xml, open_start),
        });
        pos = close_start + TEXT_CLOSE.len();
    }

    Ok(nodes)
}

/// A closed `{...}` tag: the node it opens in, the node it closes in, its raw text.
struct TagSpan {
    first: usize,
    last: usize,
    raw: String,
}

struct OpenSection {
    name: String,
    kept: bool,
    hides: bool,
    tag: TagSpan,
}

/// The paragraph a tag fills on its own, if any.
fn standalone_paragraph(nodes: &[TextNode], texts: &[Cow<'_, str>], tag: &TagSpan) -> Option<(usize, usize)> {
    let paragraph = nodes[tag.first].paragraph?;
    if nodes[tag.last].paragraph != Some(paragraph) {
        return None;
    }
    let text: String = nodes
        .iter()
        .zip(texts)
        .filter(|(node, _)| node.paragraph == Some(paragraph))
        .map(|(_, text)| text.as_ref())
        .collect();
    (text.trim() == format!("{{{}}}", tag.raw)).then_some(paragraph)
}

fn substitute_with<'a, 'r, F>(xml: &'a str, part: &str, mut resolve: F) -> Result<Cow<'a, str>, TemplateError>
where
    F: FnMut(&str) -> Option<&'r CellValue>,
{
    let nodes = find_text_nodes(xml, part)?;
    let texts = nodes
        .iter()
        .map(|n| unescape(&xml[n.open_end..n.close_start]))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| TemplateError::MalformedXml(part.to_string()))?;

    if !texts.iter().any(|t| t.contains(['{', '}'])) {
        return Ok(Cow::Borrowed(xml));
    }

    let mut out = vec![String::new(); nodes.len()];
    let mut touched = vec![false; nodes.len()];
    let mut pending: Option<(usize, String)> = None;
    let mut sections: Vec<OpenSection> = Vec::new();
    let mut hidden = 0usize;
    let mut removals: Vec<(usize, usize)> = Vec::new();

    for (i, text) in texts.iter().enumerate() {
        for ch in text.chars() {
            let Some((first, mut raw)) = pending.take() else {
                match ch {
                    '{' => {
                        pending = Some((i, String::new()));
                        touched[i] = true;
                    }
                    '}' => {
                        let context: String = out[i].chars().rev().take(20).collect();
                        let context: String = context.chars().rev().collect();
                        return Err(TemplateError::UnopenedTag(
                            format!("{}}}", context),
                            part.to_string(),
                        ));
                    }
                    _ if hidden > 0 => touched[i] = true,
                    _ => push_escaped(&mut out[i], ch),
                }
                continue;
            };

            touched[i] = true;
            match ch {
                '{' => return Err(TemplateError::UnclosedTag(raw, part.to_string())),
                '}' => {}
                _ => {
                    raw.push(ch);
                    pending = Some((first, raw));
                    continue;
                }
            }

            let tag = TagSpan { first, last: i, raw };
            let name = tag.raw.trim();
            match name.chars().next() {
                Some(marker @ ('#' | '^')) => {
                    let name = name[1..].trim().to_string();
                    let truthy = resolve(&name).is_some_and(CellValue::is_truthy);
                    let kept = truthy != (marker == '^');
                    let hides = hidden > 0 || !kept;
                    if hides {
                        hidden += 1;
                    }
                    sections.push(OpenSection { name, kept, hides, tag });
                }
                Some('/') => {
                    let name = name[1..].trim();
                    let Some(section) = sections.pop() else {
                        return Err(TemplateError::UnopenedTag(
                            format!("{{{}}}", tag.raw),
                            part.to_string(),
                        ));
                    };
                    if section.name != name {
                        return Err(TemplateError::MismatchedSection(
                            section.name,
                            name.to_string(),
                            part.to_string(),
                        ));
                    }
                    if section.hides {
                        hidden -= 1;
                    }

                    let open = standalone_paragraph(&nodes, &texts, &section.tag);
                    let close = standalone_paragraph(&nodes, &texts, &tag);
                    if let (Some(open), Some(close)) = (open, close) {
                        if open != close {
                            if section.kept {
                                removals.push(open);
                                removals.push(close);
                            } else {
                                removals.push((open.0, close.1));
                            }
                        }
                    }
                }
                _ => {
                    let value = resolve(name);
                    if hidden == 0 {
                        if let Some(value) = value {
                            out[first].push_str(&escape_value(&value.to_string()));
                        }
                    }
                }
            }
        }
    }

    if let Some((_, raw)) = pending {
        return Err(TemplateError::UnclosedTag(raw, part.to_string()));
    }
    if let Some(section) = sections.pop() {
        return Err(TemplateError::UnclosedTag(section.tag.raw, part.to_string()));
    }

    removals.sort_unstable();
    let mut edits: Vec<(usize, usize, Cow<'_, str>)> = Vec::new();
    for (start, end) in removals {
        match edits.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => edits.push((start, end, Cow::Borrowed(""))),
        }
    }
    for (i, node) in nodes.iter().enumerate() {
        if touched[i] {
            let text = format!(
                "{}{}",
                preserve_space(&xml[node.open_start..node.open_end]),
                out[i]
            );
            edits.push((node.open_start, node.close_start, Cow::Owned(text)));
        }
    }
    edits.sort_by_key(|(start, _, _)| *start);

    let mut result = String::with_capacity(xml.len());
    let mut cursor = 0;
    for (start, end, text) in edits {
        // inside a removed paragraph
        if start < cursor {
            continue;
        }
        result.push_str(&xml[cursor..start]);
        result.push_str(&text);
        cursor = end;
    }
    result.push_str(&xml[cursor..]);

    Ok(Cow::Owned(result))
}

fn preserve_space(open_tag: &str) -> Cow<'_, str> {
    if open_tag.contains("xml:space") {
        Cow::Borrowed(open_tag)
    } else {
        let head = &open_tag[..open_tag.len() - 1];
        Cow::Owned(format!("{} xml:space=\"preserve\">", head))
    }
}

fn push_escaped(buf: &mut String, ch: char) {
    match ch {
        '&' => buf.push_str("&amp;"),
        '<' => buf.push_str("&lt;"),
        '>' => buf.push_str("&gt;"),
        _ => buf.push(ch),
    }
}

fn escape_value(value: &str) -> String {
    value
        .split('\n')
        .map(|line| partial_escape(line.strip_suffix('\r').unwrap_or(line)))
        .collect::<Vec<_>>()
        .join(LINE_BREAK)
}
