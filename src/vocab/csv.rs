//! Dictionary CSV import.
//!
//! Expected columns, in order: english, translation, transcription, example.
//! The first row is a header and is always skipped.

use std::path::Path;

use anyhow::{Context, Result};

use super::NewWord;

const REQUIRED_FIELDS: usize = 4;

pub fn read_csv_file(path: &Path) -> Result<Vec<NewWord>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read CSV file {}", path.display()))?;
    Ok(parse_csv(&data))
}

/// Parse dictionary rows, silently dropping malformed ones.
pub fn parse_csv(input: &str) -> Vec<NewWord> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);

    records(input)
        .into_iter()
        .skip(1)
        .filter(|(_, record)| !record.trim().is_empty())
        .filter_map(|(line_no, record)| {
            let fields = split_record(&record);
            if fields.len() < REQUIRED_FIELDS {
                tracing::debug!("Skipping CSV line {}: {} fields", line_no, fields.len());
                return None;
            }
            let mut fields = fields.into_iter();
            let mut next = || fields.next().unwrap_or_default();
            let row = NewWord {
                word: next(),
                translation: next(),
                transcription: next(),
                example: next(),
            };
            if row.word.is_empty() {
                return None;
            }
            Some(row)
        })
        .collect()
}

/// Split the input into records paired with their first line number.
/// A newline inside a quoted field belongs to the field.
fn records(input: &str) -> Vec<(usize, String)> {
    let mut records = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut field_blank = true;
    let mut line_no = 1;
    let mut start_line = 1;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                current.push('"');
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field_blank => {
                current.push('"');
                in_quotes = true;
                field_blank = false;
            }
            '\n' if in_quotes => {
                if current.ends_with('\r') {
                    current.pop();
                }
                current.push('\n');
                line_no += 1;
            }
            '\n' => {
                records.push((start_line, std::mem::take(&mut current)));
                line_no += 1;
                start_line = line_no;
                field_blank = true;
            }
            ',' if !in_quotes => {
                current.push(',');
                field_blank = true;
            }
            _ => {
                if !c.is_whitespace() {
                    field_blank = false;
                }
                current.push(c);
            }
        }
    }
    if !current.is_empty() {
        records.push((start_line, current));
    }
    records
}

/// Split one record into trimmed fields, honoring double-quoted fields
/// and `""` escapes inside them.
fn split_record(record: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = record.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn skips_header_and_short_rows() {
        let csv = "english,translation,transcription,example\n\
                   apple,manzana,ˈæpəl,An apple a day\n\
                   broken,row\n\
                   \n\
                   dog,perro,dɔɡ,The dog barks\n";
        let rows = parse_csv(csv);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].word, "apple");
        assert_eq!(rows[0].transcription, "ˈæpəl");
        assert_eq!(rows[1].example, "The dog barks");
    }

    #[test]
    fn unwraps_quoted_fields() {
        let csv = "h1,h2,h3,h4\n\"run\", \"correr\" ,\"rʌn\",\"Run, Forest, run!\"\n\
                   \"quote\",\"cita\",\"\",\"She said \"\"hi\"\"\"\n";
        let rows = parse_csv(csv);
        assert_eq!(
            rows,
            vec![
                NewWord {
                    word: "run".into(),
                    translation: "correr".into(),
                    transcription: "rʌn".into(),
                    example: "Run, Forest, run!".into(),
                },
                NewWord {
                    word: "quote".into(),
                    translation: "cita".into(),
                    transcription: String::new(),
                    example: "She said \"hi\"".into(),
                },
            ]
        );
    }

    #[test]
    fn ignores_extra_fields_and_blank_words() {
        let csv = "header\r\nsun,sol,sʌn,The sun,extra\r\n,nada,,x\r\n";
        let rows = parse_csv(csv);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].example, "The sun");
    }

    #[test]
    fn header_only_yields_nothing() {
        assert!(parse_csv("english,translation,transcription,example").is_empty());
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn quoted_field_may_span_lines() {
        let csv = "word,translation,transcription,example\r\n\
                   poem,poema,,\"Roses are red,\r\nviolets are blue\"\r\n\
                   tree,árbol,,\"A tree.\"\r\n";
        let rows = parse_csv(csv);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].word, "poem");
        assert_eq!(rows[0].example, "Roses are red,\nviolets are blue");
        assert_eq!(rows[1].word, "tree");
    }

    #[test]
    fn records_remember_where_they_start() {
        let found = records("h\na,\"x\ny\"\nb,z");
        assert_eq!(
            found,
            vec![
                (1, "h".to_string()),
                (2, "a,\"x\ny\"".to_string()),
                (4, "b,z".to_string()),
            ]
        );
    }
}
