//! Spreadsheet assembly for the download.

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook};
use serde_json::Value;

use crate::datasource::DataTable;

pub const SHEET_NAME: &str = "MyData";
pub const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Header row of column names, then one row per record. Numbers and booleans stay typed;
/// nested values are written as their JSON text.
pub fn build_workbook(table: &DataTable) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME).context("naming worksheet")?;

    for (c, name) in table.columns.iter().enumerate() {
        sheet.write_string_with_format(0, c as u16, name, &bold).context("writing header")?;
    }
    for (r, row) in table.rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, name) in table.columns.iter().enumerate() {
            let c = c as u16;
            match table.cell(row, name) {
                None | Some(Value::Null) => {}
                Some(Value::Bool(b)) => { sheet.write_boolean(r, c, *b)?; }
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(f) => { sheet.write_number(r, c, f)?; }
                    None => { sheet.write_string(r, c, n.to_string())?; }
                },
                Some(Value::String(s)) => { sheet.write_string(r, c, s)?; }
                Some(other) => { sheet.write_string(r, c, other.to_string())?; }
            }
        }
    }
    workbook.save_to_buffer().context("serializing workbook")
}
