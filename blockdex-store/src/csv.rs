//! CSV import
//!
//! Each line is `key,value`, both decimal u64. Blank lines are ignored and lines without
//! two fields are skipped with a warning. A field which isn't a valid u64 stops the load.

use std::io::BufRead;

use anyhow::{Context, Result};
use blockdex::btree::Blockdex;

/// Insert every pair from `input`, in order. Returns the number of pairs inserted.
pub(crate) fn load<R: BufRead>(btree: &mut Blockdex, input: R) -> Result<usize> {
    let mut count = 0;
    for (number, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = parse_line(line, number + 1)? else {
            tracing::warn!("skipping malformed line {}: {line}", number + 1);
            eprintln!("skipping malformed line {}: {line}", number + 1);
            continue;
        };
        btree.insert(key, value)?;
        count += 1;
    }
    tracing::info!("loaded {count} entries");
    Ok(count)
}

fn parse_line(line: &str, number: usize) -> Result<Option<(u64, u64)>> {
    let mut fields = line.split(',');
    let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
        return Ok(None);
    };
    let key = parse_u64(key).with_context(|| format!("line {number}: invalid key"))?;
    let value = parse_u64(value).with_context(|| format!("line {number}: invalid value"))?;
    Ok(Some((key, value)))
}

pub(crate) fn parse_u64(text: &str) -> Result<u64> {
    let text = text.trim();
    text.parse::<u64>()
        .with_context(|| format!("not an unsigned 64 bit integer: {text:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_lines() {
        assert_eq!(parse_line("1,2", 1).expect("parses"), Some((1, 2)));
        assert_eq!(parse_line(" 3 , 4 ", 1).expect("parses"), Some((3, 4)));
        assert_eq!(
            parse_line("18446744073709551615,0", 1).expect("parses"),
            Some((u64::MAX, 0))
        );
        // Extra fields are ignored
        assert_eq!(parse_line("5,6,7", 1).expect("parses"), Some((5, 6)));
        assert_eq!(parse_line("8", 1).expect("parses"), None);
    }

    #[test]
    fn it_rejects_bad_numbers() {
        let err = parse_line("1,-2", 12).expect_err("negative");
        assert!(err.to_string().contains("line 12"));
        assert!(parse_line("x,2", 1).is_err());
        assert!(parse_line("18446744073709551616,2", 1).is_err());
    }

    #[test]
    fn it_loads_csv() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut btree = Blockdex::try_new(dir.path().join("load.idx")).expect("creates index");
        let input = "5,50\n\n3,30\nbroken\n  8,80  \n3,31\n";

        let count = load(&mut btree, input.as_bytes()).expect("loads");

        assert_eq!(count, 4);
        let mut out = vec![];
        btree.export(&mut out).expect("exports");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "3,30\n3,31\n5,50\n8,80\n"
        );
    }
}
