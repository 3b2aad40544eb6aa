//! Sheet-qualified cell ranges like `'My Sheet'!A1:Z50`.

use crate::Result;
use anyhow::{bail, Context};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A rectangular range on one sheet. Rows and columns are 1-based and the start is always the
/// top-left corner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRange {
    sheet: String,
    start_row: u32,
    start_col: u32,
    end_row: u32,
    end_col: u32,
}

impl CellRange {
    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn rows(&self) -> u32 {
        self.end_row - self.start_row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end_col - self.start_col + 1
    }

    pub fn start(&self) -> (u32, u32) {
        (self.start_row, self.start_col)
    }

    pub fn end(&self) -> (u32, u32) {
        (self.end_row, self.end_col)
    }
}

impl FromStr for CellRange {
    type Err = anyhow::Error;

    fn from_str(address: &str) -> Result<Self> {
        let Some((sheet, range)) = address.split_once('!') else {
            bail!("address must include sheet name (e.g. Sheet1!A1:B2), got '{address}'");
        };
        let sheet = sheet.trim_matches('\'').to_string();
        let (from, to) = range.split_once(':').unwrap_or((range, range));
        let (start_col, start_row) =
            parse_ref(from).with_context(|| format!("invalid start of range '{from}'"))?;
        let (end_col, end_row) =
            parse_ref(to).with_context(|| format!("invalid end of range '{to}'"))?;
        Ok(Self {
            sheet,
            start_row: start_row.min(end_row),
            start_col: start_col.min(end_col),
            end_row: start_row.max(end_row),
            end_col: start_col.max(end_col),
        })
    }
}

impl Display for CellRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let from = format!("{}{}", col_to_letter(self.start_col), self.start_row);
        let to = format!("{}{}", col_to_letter(self.end_col), self.end_row);
        if from == to {
            write!(f, "{}!{from}", self.sheet)
        } else {
            write!(f, "{}!{from}:{to}", self.sheet)
        }
    }
}

/// Parses `A1`, `$B$2` or `aa100` into `(column, row)`.
fn parse_ref(reference: &str) -> Result<(u32, u32)> {
    let cleaned = reference.replace('$', "").to_ascii_uppercase();
    let split = cleaned
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(cleaned.len());
    let (letters, digits) = cleaned.split_at(split);
    if letters.is_empty() || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("invalid cell reference '{reference}'");
    }
    let row: u32 = digits
        .parse()
        .with_context(|| format!("invalid cell reference '{reference}'"))?;
    if row == 0 {
        bail!("invalid cell reference '{reference}'");
    }
    let col = letters
        .bytes()
        .try_fold(0u32, |col, b| {
            col.checked_mul(26)?.checked_add(u32::from(b - b'A') + 1)
        })
        .with_context(|| format!("invalid cell reference '{reference}'"))?;
    Ok((col, row))
}

/// Converts a 1-based column number to letters: 1 is `A`, 27 is `AA`.
pub fn col_to_letter(col: u32) -> String {
    let mut letters = Vec::new();
    let mut col = col;
    while col > 0 {
        col -= 1;
        letters.push(char::from(b'A' + (col % 26) as u8));
        col /= 26;
    }
    letters.iter().rev().collect()
}
