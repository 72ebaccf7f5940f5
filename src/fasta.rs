use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};

use bio::io::fasta;
use camino::Utf8Path;
use tracing::info;

use crate::error::NcfpError;

pub const STDIN_PLACEHOLDER: &str = "-";

pub fn read_records(path: &Utf8Path) -> Result<Vec<fasta::Record>, NcfpError> {
    let source: Box<dyn Read> = if path.as_str() == STDIN_PLACEHOLDER {
        info!("reading sequences from stdin");
        Box::new(io::stdin())
    } else {
        if !path.as_std_path().is_file() {
            return Err(NcfpError::InputNotFound(path.as_std_path().to_path_buf()));
        }
        info!(path = %path, "reading sequences");
        Box::new(
            File::open(path.as_std_path())
                .map_err(|err| NcfpError::Io(format!("open {path}: {err}")))?,
        )
    };
    parse_records(source)
}

pub fn parse_records<R: Read>(source: R) -> Result<Vec<fasta::Record>, NcfpError> {
    let records = fasta::Reader::new(source)
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| NcfpError::FastaParse(err.to_string()))?;
    for record in &records {
        record
            .check()
            .map_err(|err| NcfpError::FastaParse(format!("{}: {err}", record.id())))?;
    }
    Ok(records)
}

/// Writes `records` to `path` via a sibling temp file, so a crash never leaves
/// a half-written output in place.
pub fn write_records(path: &Utf8Path, records: &[fasta::Record]) -> Result<(), NcfpError> {
    let parent = path
        .parent()
        .ok_or_else(|| NcfpError::Io(format!("invalid output path {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| NcfpError::Io(format!("create {parent}: {err}")))?;
    let temp = tempfile::Builder::new()
        .prefix("ncfp-out")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| NcfpError::Io(err.to_string()))?;
    {
        let mut writer = fasta::Writer::new(BufWriter::new(temp.as_file()));
        for record in records {
            writer
                .write_record(record)
                .map_err(|err| NcfpError::Io(err.to_string()))?;
        }
        writer.flush().map_err(|err| NcfpError::Io(err.to_string()))?;
    }
    temp.as_file()
        .flush()
        .map_err(|err| NcfpError::Io(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| NcfpError::Io(format!("write {path}: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_header_and_description() {
        let input = b">ACC1.1 protein X [Escherichia coli]\nMKV\nLLA\n";
        let records = parse_records(&input[..]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), "ACC1.1");
        assert_eq!(records[0].desc(), Some("protein X [Escherichia coli]"));
        assert_eq!(records[0].seq(), b"MKVLLA");
    }
}
