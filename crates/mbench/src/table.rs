//! CSV codec for the persisted profile table.
//!
//! Rows hold the accumulators plus the derived averages, all with six decimals.
//! Averages are written for readers of the file only; loading ignores them and
//! re-derives averages from the totals. Function names are quoted when they
//! contain separators, quotes or line breaks. Notes are the last column and are
//! written unescaped, so they may contain commas but not newlines.

use std::borrow::Cow;
use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::store::AggregateProfile;

pub const HEADER: [&str; 13] = [
    "Function",
    "Calls",
    "Total Time",
    "Total CPU",
    "Total Memory",
    "Total GPU",
    "Total IO",
    "Avg Duration",
    "Avg CPU Usage",
    "Avg Memory Usage",
    "Avg GPU Usage",
    "Avg IO Usage",
    "Notes",
];

pub(crate) fn write_table<'a, W: Write>(
    writer: &mut W,
    profiles: impl Iterator<Item = &'a AggregateProfile>,
) -> io::Result<()> {
    writeln!(writer, "{}", HEADER.join(","))?;
    for p in profiles {
        let avg = p.averages();
        writeln!(
            writer,
            "{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
            quote_field(&p.name),
            p.calls,
            p.total_time,
            p.total_cpu,
            p.total_memory as f64,
            p.total_gpu as f64,
            p.total_io as f64,
            avg.time,
            avg.cpu,
            avg.memory,
            avg.gpu,
            avg.io,
            p.notes
        )?;
    }
    Ok(())
}

fn quote_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Reads a quoted field body up to its closing quote. Returns the unescaped
/// value and the text after the quote, or `None` if the quote is never closed.
fn unquote(body: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = body.char_indices();
    while let Some((idx, c)) = chars.next() {
        if c != '"' {
            value.push(c);
        } else if body[idx + 1..].starts_with('"') {
            value.push('"');
            chars.next();
        } else {
            return Some((value, &body[idx + 1..]));
        }
    }
    None
}

enum Row {
    Parsed(AggregateProfile),
    /// A quoted field continues on the next line.
    Incomplete,
}

/// Column positions resolved from the header line.
struct Layout {
    width: usize,
    function: usize,
    calls: usize,
    total_time: Option<usize>,
    total_cpu: Option<usize>,
    total_memory: Option<usize>,
    total_gpu: Option<usize>,
    total_io: Option<usize>,
    notes: Option<usize>,
}

impl Layout {
    fn from_header(line: &str, origin: &Path) -> Result<Self> {
        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        let find = |name: &str| columns.iter().position(|c| *c == name);
        let require = |name: &'static str| {
            find(name).ok_or_else(|| Error::InvalidHeader {
                path: origin.to_path_buf(),
                missing: name,
            })
        };

        Ok(Self {
            width: columns.len(),
            function: require("Function")?,
            calls: require("Calls")?,
            total_time: find("Total Time"),
            total_cpu: find("Total CPU"),
            total_memory: find("Total Memory"),
            total_gpu: find("Total GPU"),
            total_io: find("Total IO"),
            notes: find("Notes"),
        })
    }

    /// Splits a row into fields, or `None` while a quoted field is still open.
    fn split<'a>(&self, line: &'a str) -> Result<Option<Vec<Cow<'a, str>>>, String> {
        // Notes are free text in the last column and may contain commas.
        let notes_last = self.notes == Some(self.width - 1);
        let mut fields = Vec::with_capacity(self.width);
        let mut rest = line;
        loop {
            if notes_last && fields.len() == self.width - 1 {
                fields.push(Cow::Borrowed(rest));
                return Ok(Some(fields));
            }
            if let Some(body) = rest.strip_prefix('"') {
                let Some((value, after)) = unquote(body) else {
                    return Ok(None);
                };
                fields.push(Cow::Owned(value));
                if after.is_empty() {
                    return Ok(Some(fields));
                }
                rest = after
                    .strip_prefix(',')
                    .ok_or_else(|| format!("unexpected text after quoted field {}", fields.len()))?;
            } else {
                match rest.split_once(',') {
                    Some((field, next)) => {
                        fields.push(Cow::Borrowed(field));
                        rest = next;
                    }
                    None => {
                        fields.push(Cow::Borrowed(rest));
                        return Ok(Some(fields));
                    }
                }
            }
        }
    }

    fn parse_row(&self, line: &str) -> Result<Row, String> {
        let Some(fields) = self.split(line)? else {
            return Ok(Row::Incomplete);
        };
        if fields.len() != self.width {
            return Err(format!(
                "expected {} fields, found {}",
                self.width,
                fields.len()
            ));
        }

        let name = &fields[self.function];
        if name.is_empty() {
            return Err("empty function name".to_string());
        }

        let seconds = |column: Option<usize>, label: &str| -> Result<f64, String> {
            match column {
                Some(idx) => parse_f64(&fields[idx], label),
                None => Ok(0.0),
            }
        };
        let bytes = |column: Option<usize>, label: &str| -> Result<i64, String> {
            seconds(column, label).map(|v| v.round() as i64)
        };

        Ok(Row::Parsed(AggregateProfile {
            name: name.to_string(),
            calls: parse_calls(&fields[self.calls])?,
            total_time: seconds(self.total_time, "Total Time")?,
            total_cpu: seconds(self.total_cpu, "Total CPU")?,
            total_memory: bytes(self.total_memory, "Total Memory")?,
            total_gpu: bytes(self.total_gpu, "Total GPU")?,
            total_io: bytes(self.total_io, "Total IO")?,
            notes: self
                .notes
                .map(|idx| fields[idx].to_string())
                .unwrap_or_default(),
        }))
    }

    /// Parses the record starting at `lines[0]`, joining lines while a quoted
    /// field is open. Returns the number of lines consumed and the row, `None`
    /// for a blank line.
    fn next_row(&self, lines: &[Vec<u8>]) -> (usize, Result<Option<AggregateProfile>, String>) {
        let mut record = Vec::new();
        for (used, raw) in lines.iter().enumerate() {
            record.extend_from_slice(raw);
            let text = match std::str::from_utf8(&record) {
                Ok(text) => text,
                Err(e) if used == 0 => return (1, Err(format!("invalid UTF-8: {e}"))),
                Err(_) => break,
            };
            let line = trim_newline(text);
            if used == 0 && line.trim().is_empty() {
                return (1, Ok(None));
            }
            match self.parse_row(line) {
                Ok(Row::Parsed(profile)) => return (used + 1, Ok(Some(profile))),
                Ok(Row::Incomplete) => continue,
                Err(reason) => return (used + 1, Err(reason)),
            }
        }
        (1, Err("unterminated quoted field".to_string()))
    }
}

fn trim_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn parse_f64(raw: &str, label: &str) -> Result<f64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("invalid {label} value {raw:?}"))
}

fn parse_calls(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    if let Ok(calls) = raw.parse::<u64>() {
        return Ok(calls);
    }
    // Tolerate "3.0" written by other tools.
    match raw.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v.is_finite() => Ok(v as u64),
        _ => Err(format!("invalid Calls value {raw:?}")),
    }
}

/// Parses a whole table. Malformed data rows, including rows that are not
/// valid UTF-8, are skipped with a warning.
pub(crate) fn read_table<R: BufRead>(
    mut reader: R,
    origin: &Path,
) -> Result<Vec<AggregateProfile>> {
    let mut lines = Vec::new();
    loop {
        let mut raw = Vec::new();
        let read = reader
            .read_until(b'\n', &mut raw)
            .map_err(|source| Error::Load {
                path: origin.to_path_buf(),
                source,
            })?;
        if read == 0 {
            break;
        }
        lines.push(raw);
    }

    let Some(header_idx) = lines
        .iter()
        .position(|raw| !String::from_utf8_lossy(raw).trim().is_empty())
    else {
        return Ok(Vec::new());
    };
    let header = String::from_utf8_lossy(&lines[header_idx]);
    let layout = Layout::from_header(trim_newline(&header), origin)?;

    let mut profiles = Vec::new();
    let mut idx = header_idx + 1;
    while idx < lines.len() {
        let (used, row) = layout.next_row(&lines[idx..]);
        match row {
            Ok(Some(profile)) => profiles.push(profile),
            Ok(None) => {}
            Err(reason) => tracing::warn!(
                "[mbench] skipping row {} of {}: {reason}",
                idx + 1,
                origin.display()
            ),
        }
        idx += used;
    }
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn origin() -> &'static Path {
        Path::new("test.csv")
    }

    fn header() -> String {
        HEADER.join(",")
    }

    #[test]
    fn test_write_row_format() {
        let profile = AggregateProfile {
            name: "test_func".to_string(),
            calls: 1,
            total_time: 1.0,
            total_cpu: 1.0,
            total_memory: 1,
            total_gpu: 1,
            total_io: 1,
            notes: String::new(),
        };
        let mut out = Vec::new();
        write_table(&mut out, std::iter::once(&profile)).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), header());
        assert_eq!(
            lines.next().unwrap(),
            "test_func,1,1.000000,1.000000,1.000000,1.000000,1.000000,1.000000,1.000000,1.000000,1.000000,1.000000,"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_read_full_layout() {
        let csv = format!(
            "{}\ntest_func,1,1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0,\n",
            header()
        );
        let profiles = read_table(Cursor::new(csv), origin()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "test_func");
        assert_eq!(profiles[0].calls, 1);
        assert_eq!(profiles[0].total_memory, 1);
        assert_eq!(profiles[0].notes, "");
    }

    #[test]
    fn test_read_without_average_columns() {
        let csv = "Function,Calls,Total Time,Total CPU,Total Memory,Total GPU,Total IO,Notes\n\
                   parse,4,2.000000,1.000000,4096.000000,0.000000,128.000000,hot loop\n";
        let profiles = read_table(Cursor::new(csv), origin()).unwrap();
        assert_eq!(profiles[0].calls, 4);
        assert_eq!(profiles[0].total_io, 128);
        assert_eq!(profiles[0].notes, "hot loop");
    }

    #[test]
    fn test_notes_may_contain_commas() {
        let csv = format!(
            "{}\nf,2,1.0,1.0,0,0,0,0.5,0.5,0,0,0,slow, but expected\n",
            header()
        );
        let profiles = read_table(Cursor::new(csv), origin()).unwrap();
        assert_eq!(profiles[0].notes, "slow, but expected");
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let csv = format!(
            "{}\n\
             good,1,1.0,1.0,1,1,1,1,1,1,1,1,\n\
             short,1,1.0\n\
             bad_calls,many,1.0,1.0,1,1,1,1,1,1,1,1,\n\
             bad_time,1,fast,1.0,1,1,1,1,1,1,1,1,\n\
             \n\
             also_good,2,2.0,2.0,2,2,2,1,1,1,1,1,note\n",
            header()
        );
        let profiles = read_table(Cursor::new(csv), origin()).unwrap();
        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["good", "also_good"]);
    }

    #[test]
    fn test_names_with_separators_are_quoted() {
        let names = ["train, epoch 1", "say \"hi\"", "two\nlines", " padded "];
        let profiles: Vec<_> = names
            .iter()
            .map(|name| AggregateProfile {
                name: name.to_string(),
                calls: 2,
                total_time: 0.5,
                ..AggregateProfile::default()
            })
            .collect();
        let mut out = Vec::new();
        write_table(&mut out, profiles.iter()).unwrap();

        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.contains("\n\"train, epoch 1\",2,"));
        assert!(text.contains("\n\"say \"\"hi\"\"\",2,"));
        assert!(text.contains("\n padded ,2,"));

        let loaded = read_table(Cursor::new(out), origin()).unwrap();
        let loaded: Vec<_> = loaded.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(loaded, names);
    }

    #[test]
    fn test_unterminated_quote_fails_only_its_row() {
        let csv = format!(
            "{}\n\"broken,1,1.0,1.0,1,1,1,1,1,1,1,1,\nafter,3,1.0,1.0,1,1,1,1,1,1,1,1,\n",
            header()
        );
        let profiles = read_table(Cursor::new(csv), origin()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "after");
        assert_eq!(profiles[0].calls, 3);
    }

    #[test]
    fn test_invalid_utf8_row_is_skipped() {
        let mut csv = format!("{}\ngood,1,1.0,1.0,1,1,1,1,1,1,1,1,\n", header()).into_bytes();
        csv.extend_from_slice(b"bad\xff\xfe,1,1.0,1.0,1,1,1,1,1,1,1,1,\n");
        csv.extend_from_slice(b"also_good,2,2.0,2.0,2,2,2,1,1,1,1,1,\r\n");
        let profiles = read_table(Cursor::new(csv), origin()).unwrap();
        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["good", "also_good"]);
        assert_eq!(profiles[1].notes, "");
    }

    #[test]
    fn test_header_without_function_is_rejected() {
        let csv = "Name,Calls\nf,1\n";
        let err = read_table(Cursor::new(csv), origin()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidHeader {
                missing: "Function",
                ..
            }
        ));
    }

    #[test]
    fn test_empty_input_has_no_rows() {
        assert!(read_table(Cursor::new(""), origin()).unwrap().is_empty());
    }
}
