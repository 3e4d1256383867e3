//! # Tabular Input and Output
//!
//! Result tables are exchanged as delimited text through the `polars` CSV
//! engine. Column types are inferred from the whole file, except for the
//! identifier columns, which are always read as text: a sample called `1001`
//! or a gene column that happens to be empty must not turn into numbers.
//!
//! Fixed-schema collaborator inputs (scorer output, SpliceMap reference rows)
//! are read with `csv` + `serde` straight into typed records.

use crate::error::Result;
use polars::prelude::*;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Columns that hold identifiers and are never type-inferred.
pub const IDENTIFIER_COLUMNS: [&str; 16] = [
    "variant",
    "junction",
    "tissue",
    "tissue_cat",
    "event_type",
    "splice_site",
    "Chromosome",
    "Strand",
    "events",
    "gene_id",
    "gene_name",
    "transcript_id",
    "gene_type",
    "sample",
    "samples",
    "genotype",
];

/// Tab for `.tsv`/`.txt`/`.tab`, comma otherwise.
pub fn separator_for(path: &Path) -> u8 {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("tsv") | Some("txt") | Some("tab") => b'\t',
        _ => b',',
    }
}

/// `String` overrides for the identifier columns present in the header of `path`.
fn identifier_schema(path: &Path, separator: u8) -> Result<Schema> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .from_path(path)?;
    let mut schema = Schema::with_capacity(IDENTIFIER_COLUMNS.len());
    for name in reader.headers()?.iter() {
        if IDENTIFIER_COLUMNS.contains(&name) {
            schema.with_column(name.into(), DataType::String);
        }
    }
    Ok(schema)
}

/// Reads a delimited file with a header row.
pub fn read_table(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    log::debug!("Reading table from '{}'", path.display());
    let separator = separator_for(path);
    let identifiers = identifier_schema(path, separator)?;
    let file = File::open(path)?;
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_schema_overwrite(Some(Arc::new(identifiers)))
        .map_parse_options(|options| options.with_separator(separator))
        .into_reader_with_file_handle(file)
        .finish()?;
    Ok(df)
}

/// Writes a frame with a header row.
pub fn write_table(df: &DataFrame, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut df = df.clone();
    let mut file = BufWriter::new(File::create(path)?);
    CsvWriter::new(&mut file)
        .with_separator(separator_for(path))
        .finish(&mut df)?;
    file.flush()?;
    log::info!(
        "Wrote {} rows x {} columns to '{}'",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(())
}

/// Deserializes every record of a delimited file with a header row.
pub fn read_records<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator_for(path))
        .from_path(path)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    log::debug!("Read {} records from '{}'", records.len(), path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;
    use serde::Deserialize;
    use tempfile::Builder;

    fn sample_frame() -> DataFrame {
        df!(
            "gene_name" => ["BRCA1", "TP53"],
            "delta_psi" => [Some(-0.4), None],
            "novel_junction" => [true, false],
        )
        .unwrap()
    }

    #[test]
    fn csv_round_trip_preserves_types() {
        let file = Builder::new().suffix(".csv").tempfile().expect("tempfile");
        write_table(&sample_frame(), file.path()).expect("write csv");

        let df = read_table(file.path()).expect("read csv");
        assert_eq!(
            crate::frame::column_names(&df),
            vec!["gene_name", "delta_psi", "novel_junction"]
        );
        let dpsi = df.column("delta_psi").unwrap().f64().unwrap();
        assert_eq!(dpsi.get(0), Some(-0.4));
        assert_eq!(dpsi.get(1), None);
        let novel = df.column("novel_junction").unwrap().bool().unwrap();
        assert_eq!(novel.get(0), Some(true));
    }

    #[test]
    fn numeric_identifiers_stay_text() {
        let mut file = Builder::new().suffix(".csv").tempfile().expect("tempfile");
        writeln!(file, "variant,sample,genotype,gene_name,count").unwrap();
        writeln!(file, "1:1200:A>G,1001,1,,3").unwrap();
        writeln!(file, "1:1300:C>T,0042,0/1,,4").unwrap();
        file.flush().unwrap();

        let df = read_table(file.path()).expect("read csv");
        let samples = df.column("sample").unwrap().str().unwrap();
        assert_eq!(samples.get(0), Some("1001"));
        assert_eq!(samples.get(1), Some("0042"));
        assert_eq!(df.column("genotype").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("gene_name").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("count").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn tsv_extension_selects_tab_separator() {
        assert_eq!(separator_for(Path::new("a/b.tsv")), b'\t');
        assert_eq!(separator_for(Path::new("a/b.CSV")), b',');

        let file = Builder::new().suffix(".tsv").tempfile().expect("tempfile");
        write_table(&sample_frame(), file.path()).expect("write tsv");
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.starts_with("gene_name\tdelta_psi\tnovel_junction"));
    }

    #[test]
    fn typed_records_are_deserialized() {
        #[derive(Deserialize)]
        struct Row {
            variant: String,
            sample: String,
        }

        let mut file = Builder::new().suffix(".csv").tempfile().expect("tempfile");
        writeln!(file, "variant,sample").unwrap();
        writeln!(file, "17:41201211:G>A,NA00002").unwrap();
        file.flush().unwrap();
        let rows: Vec<Row> = read_records(file.path()).expect("read records");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].variant, "17:41201211:G>A");
        assert_eq!(rows[0].sample, "NA00002");
    }
}
