use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde_json::{Map, Value};
use zip::ZipArchive;

use super::Converter;
use crate::registry::{extension_of, FileCategory};

/// Full in-memory row/column structure, independent of source encoding.
/// Cell values are kept as strings so delimited↔spreadsheet conversions
/// round-trip exactly; numeric re-typing only happens on JSON output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub struct TabularConverter;

#[async_trait]
impl Converter for TabularConverter {
    fn category(&self) -> FileCategory {
        FileCategory::Tabular
    }

    async fn run(&self, input: &Path, output: &Path, target_ext: &str) -> Result<()> {
        let source_ext = input
            .file_name()
            .and_then(|name| extension_of(&name.to_string_lossy()))
            .unwrap_or_default();
        let input = input.to_owned();
        let output = output.to_owned();
        let target = target_ext.to_lowercase();

        tokio::task::spawn_blocking(move || {
            let table = read_table(&input, &source_ext)?;
            write_table(&table, &output, &target)
        })
        .await
        .context("tabular worker panicked")?
    }
}

pub fn read_table(input: &Path, source_ext: &str) -> Result<Table> {
    let table = match source_ext {
        "csv" => read_csv(input)?,
        "xlsx" => read_xlsx(input)?,
        "json" => read_json(input)?,
        other => bail!("unsupported tabular source: {other}"),
    };
    if table.columns.is_empty() {
        bail!("source table has no columns");
    }
    Ok(table)
}

pub fn write_table(table: &Table, output: &Path, target_ext: &str) -> Result<()> {
    match target_ext {
        "csv" => write_csv(table, output),
        "xlsx" => write_xlsx(table, output),
        "json" => write_json(table, output),
        other => bail!("unsupported tabular target: {other}"),
    }
}

fn read_csv(input: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .from_path(input)
        .context("failed to open CSV")?;
    let columns = reader
        .headers()
        .context("failed to read CSV header")?
        .iter()
        .map(str::to_string)
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("malformed CSV record")?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table { columns, rows })
}

fn write_csv(table: &Table, output: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output).context("failed to create CSV")?;
    writer
        .write_record(&table.columns)
        .context("failed to write CSV header")?;
    for row in &table.rows {
        writer.write_record(row).context("failed to write CSV row")?;
    }
    writer.flush().context("failed to flush CSV")?;
    Ok(())
}

fn read_json(input: &Path) -> Result<Table> {
    let file = File::open(input).context("failed to open JSON")?;
    let records: Vec<Map<String, Value>> =
        serde_json::from_reader(file).context("JSON is not an array of records")?;

    // Column order is first-seen key order across records
    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|column| match record.get(column) {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .collect();

    Ok(Table { columns, rows })
}

fn write_json(table: &Table, output: &Path) -> Result<()> {
    let records: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let mut record = Map::new();
            for (column, cell) in table.columns.iter().zip(row) {
                record.insert(column.clone(), json_cell(cell));
            }
            Value::Object(record)
        })
        .collect();

    let file = File::create(output).context("failed to create JSON")?;
    serde_json::to_writer_pretty(file, &records).context("failed to write JSON records")?;
    Ok(())
}

/// Numeric-looking cells become JSON numbers, everything else stays a string.
fn json_cell(cell: &str) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(cell.to_string())
}

fn read_xlsx(input: &Path) -> Result<Table> {
    let file = File::open(input).context("failed to open spreadsheet")?;
    let mut archive = ZipArchive::new(file).context("spreadsheet is not a zip container")?;

    let shared_strings = match archive.by_name("xl/sharedStrings.xml") {
        Ok(mut part) => {
            let mut xml = String::new();
            part.read_to_string(&mut xml)
                .context("failed to read shared strings")?;
            parse_shared_strings(&xml)?
        }
        Err(_) => Vec::new(),
    };

    let mut xml = String::new();
    archive
        .by_name("xl/worksheets/sheet1.xml")
        .context("spreadsheet has no first worksheet")?
        .read_to_string(&mut xml)
        .context("failed to read worksheet")?;

    let mut raw_rows = parse_worksheet(&xml, &shared_strings)?;
    if raw_rows.is_empty() {
        bail!("spreadsheet has no rows");
    }
    let columns = raw_rows.remove(0);
    // worksheets may omit trailing empty cells; pad to the header width
    for row in &mut raw_rows {
        while row.len() < columns.len() {
            row.push(String::new());
        }
    }
    Ok(Table {
        columns,
        rows: raw_rows,
    })
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"t" => in_text = false,
            Ok(Event::Text(e)) if in_text => {
                current.push_str(&e.decode().context("malformed shared string")?);
            }
            Ok(Event::GeneralRef(e)) if in_text => {
                current.push_str(&super::resolve_entity(&e)?);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"si" => {
                strings.push(std::mem::take(&mut current));
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("malformed shared strings: {e}"),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn parse_worksheet(xml: &str, shared_strings: &[String]) -> Result<Vec<Vec<String>>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut current_row: Vec<String> = Vec::new();
    let mut cell_type = String::new();
    let mut cell_value: Option<String> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"row" => current_row.clear(),
                b"c" => {
                    cell_type.clear();
                    cell_value = None;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            cell_type = String::from_utf8_lossy(&attr.value).into_owned();
                        }
                    }
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"c" => {
                current_row.push(String::new());
            }
            Ok(Event::Text(e)) if in_value => {
                let text = e.decode().context("malformed cell value")?;
                cell_value
                    .get_or_insert_with(String::new)
                    .push_str(&text);
            }
            Ok(Event::GeneralRef(e)) if in_value => {
                cell_value
                    .get_or_insert_with(String::new)
                    .push_str(&super::resolve_entity(&e)?);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let raw = cell_value.take().unwrap_or_default();
                    let resolved = if cell_type == "s" {
                        let index: usize =
                            raw.parse().context("shared string index is not numeric")?;
                        shared_strings
                            .get(index)
                            .with_context(|| format!("shared string {index} out of range"))?
                            .clone()
                    } else {
                        raw
                    };
                    current_row.push(resolved);
                }
                b"row" => rows.push(std::mem::take(&mut current_row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => bail!("malformed worksheet: {e}"),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// Writes a minimal OOXML workbook with a single inline-string worksheet.
/// Inline strings keep cell values byte-exact, which is what makes
/// csv↔xlsx round-trips lossless.
fn write_xlsx(table: &Table, output: &Path) -> Result<()> {
    let file = File::create(output).context("failed to create spreadsheet")?;
    let mut zip = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options)
        .context("failed to start package part")?;
    zip.write_all(CONTENT_TYPES_XML.as_bytes())?;

    zip.start_file("_rels/.rels", options)
        .context("failed to start package part")?;
    zip.write_all(PACKAGE_RELS_XML.as_bytes())?;

    zip.start_file("xl/workbook.xml", options)
        .context("failed to start package part")?;
    zip.write_all(WORKBOOK_XML.as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)
        .context("failed to start package part")?;
    zip.write_all(WORKBOOK_RELS_XML.as_bytes())?;

    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    write_sheet_row(&mut sheet, &table.columns);
    for row in &table.rows {
        write_sheet_row(&mut sheet, row);
    }
    sheet.push_str("</sheetData></worksheet>");

    zip.start_file("xl/worksheets/sheet1.xml", options)
        .context("failed to start worksheet part")?;
    zip.write_all(sheet.as_bytes())?;

    zip.finish().context("failed to finish spreadsheet")?;
    Ok(())
}

fn write_sheet_row(sheet: &mut String, cells: &[String]) {
    sheet.push_str("<row>");
    for cell in cells {
        sheet.push_str(r#"<c t="inlineStr"><is><t>"#);
        sheet.push_str(&escape(cell));
        sheet.push_str("</t></is></c>");
    }
    sheet.push_str("</row>");
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const PACKAGE_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;
