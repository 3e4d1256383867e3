//! # Junction-Level Prediction Assembly
//!
//! The variant effect scorer emits one record per (variant, junction) with a
//! tissue-independent `delta_logit_psi`. The reference SpliceMap supplies, per
//! tissue, the baseline usage of every junction. This module crosses the two
//! into the canonical junction prediction table: one row per
//! (variant, junction, tissue), with the tissue-specific `delta_psi` derived
//! from the tissue's `ref_psi`.

use crate::error::{OutlierError, Result};
use crate::result::SpliceOutlierResult;
use ahash::{AHashMap, AHashSet};
use polars::prelude::*;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// `ref_psi` is clipped into `[PSI_CLIP, 1 - PSI_CLIP]` before taking the logit.
pub const PSI_CLIP: f64 = 1e-5;

/// Flanking-sequence identifier columns carried through every view.
pub const SEQUENCE_COLUMNS: [&str; 10] = [
    "ref_acceptorIntron",
    "ref_acceptor",
    "ref_exon",
    "ref_donor",
    "ref_donorIntron",
    "alt_acceptorIntron",
    "alt_acceptor",
    "alt_exon",
    "alt_donor",
    "alt_donorIntron",
];

/// Canonical column order and types of the junction prediction table.
pub fn junction_schema() -> Schema {
    let mut fields: Vec<(&str, DataType)> = vec![
        ("variant", DataType::String),
        ("junction", DataType::String),
        ("tissue", DataType::String),
        ("event_type", DataType::String),
        ("Chromosome", DataType::String),
        ("Start", DataType::Int64),
        ("End", DataType::Int64),
        ("Strand", DataType::String),
        ("events", DataType::String),
        ("splice_site", DataType::String),
        ("ref_psi", DataType::Float64),
        ("k", DataType::Float64),
        ("n", DataType::Float64),
        ("median_n", DataType::Float64),
        ("novel_junction", DataType::Boolean),
        ("weak_site_donor", DataType::Boolean),
        ("weak_site_acceptor", DataType::Boolean),
        ("gene_id", DataType::String),
        ("gene_name", DataType::String),
        ("transcript_id", DataType::String),
        ("gene_type", DataType::String),
        ("delta_logit_psi", DataType::Float64),
        ("delta_psi", DataType::Float64),
    ];
    fields.extend(SEQUENCE_COLUMNS.iter().map(|c| (*c, DataType::String)));
    let mut schema = Schema::with_capacity(fields.len());
    for (name, dtype) in fields {
        schema.with_column(name.into(), dtype);
    }
    schema
}

/// Splicing event class of a junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Alternative donor usage; the shared site is the donor.
    Psi5,
    /// Alternative acceptor usage; the shared site is the acceptor.
    Psi3,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Psi5 => "psi5",
            EventType::Psi3 => "psi3",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = OutlierError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "psi5" => Ok(EventType::Psi5),
            "psi3" => Ok(EventType::Psi3),
            other => Err(OutlierError::Configuration(format!(
                "unknown event type '{other}', expected 'psi5' or 'psi3'"
            ))),
        }
    }
}

/// A genomic intron `chrom:start-end:strand`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Junction {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub strand: char,
}

impl FromStr for Junction {
    type Err = OutlierError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || OutlierError::InvalidJunction(s.to_string());
        let (rest, strand) = s.rsplit_once(':').ok_or_else(invalid)?;
        let (chrom, interval) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let (start, end) = interval.split_once('-').ok_or_else(invalid)?;
        let strand = match strand {
            "+" => '+',
            "-" => '-',
            _ => return Err(invalid()),
        };
        let start: u64 = start.parse().map_err(|_| invalid())?;
        let end: u64 = end.parse().map_err(|_| invalid())?;
        if chrom.is_empty() || end < start {
            return Err(invalid());
        }
        Ok(Junction {
            chrom: chrom.to_string(),
            start,
            end,
            strand,
        })
    }
}

impl fmt::Display for Junction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}:{}", self.chrom, self.start, self.end, self.strand)
    }
}

impl Junction {
    /// The single position shared by all junctions of the same event:
    /// the donor for `psi5`, the acceptor for `psi3`.
    pub fn splice_site_position(&self, event_type: EventType) -> u64 {
        match (event_type, self.strand) {
            (EventType::Psi5, '+') | (EventType::Psi3, '-') => self.start,
            _ => self.end,
        }
    }

    pub fn splice_site(&self, event_type: EventType) -> String {
        format!(
            "{}:{}:{}",
            self.chrom,
            self.splice_site_position(event_type),
            self.strand
        )
    }
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn expit(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Shift in PSI implied by a logit-scale shift at the given baseline usage.
pub fn delta_psi(ref_psi: f64, delta_logit_psi: f64) -> f64 {
    let p = ref_psi.clamp(PSI_CLIP, 1.0 - PSI_CLIP);
    expit(logit(p) + delta_logit_psi) - p
}

/// Accepts `true/false`, `True/False`, `1/0`; an empty cell is missing.
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some("true") | Some("True") | Some("TRUE") | Some("1") | Some("1.0") => Ok(Some(true)),
        Some("false") | Some("False") | Some("FALSE") | Some("0") | Some("0.0") => Ok(Some(false)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "cannot interpret '{other}' as a boolean"
        ))),
    }
}

/// Flanking-sequence identifiers of a scored junction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceIds {
    pub ref_acceptor_intron: Option<String>,
    pub ref_acceptor: Option<String>,
    pub ref_exon: Option<String>,
    pub ref_donor: Option<String>,
    pub ref_donor_intron: Option<String>,
    pub alt_acceptor_intron: Option<String>,
    pub alt_acceptor: Option<String>,
    pub alt_exon: Option<String>,
    pub alt_donor: Option<String>,
    pub alt_donor_intron: Option<String>,
}

impl SequenceIds {
    fn values(&self) -> [&Option<String>; 10] {
        [
            &self.ref_acceptor_intron,
            &self.ref_acceptor,
            &self.ref_exon,
            &self.ref_donor,
            &self.ref_donor_intron,
            &self.alt_acceptor_intron,
            &self.alt_acceptor,
            &self.alt_exon,
            &self.alt_donor,
            &self.alt_donor_intron,
        ]
    }
}

/// One output record of the variant effect scorer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawScorerRecord")]
pub struct ScorerRecord {
    pub variant: String,
    pub junction: String,
    pub event_type: EventType,
    pub delta_logit_psi: f64,
    pub sequence: SequenceIds,
}

// Flat on-disk layout; `csv` cannot deserialize flattened structs.
#[derive(Deserialize)]
struct RawScorerRecord {
    variant: String,
    junction: String,
    event_type: EventType,
    delta_logit_psi: f64,
    #[serde(rename = "ref_acceptorIntron", default)]
    ref_acceptor_intron: Option<String>,
    #[serde(default)]
    ref_acceptor: Option<String>,
    #[serde(default)]
    ref_exon: Option<String>,
    #[serde(default)]
    ref_donor: Option<String>,
    #[serde(rename = "ref_donorIntron", default)]
    ref_donor_intron: Option<String>,
    #[serde(rename = "alt_acceptorIntron", default)]
    alt_acceptor_intron: Option<String>,
    #[serde(default)]
    alt_acceptor: Option<String>,
    #[serde(default)]
    alt_exon: Option<String>,
    #[serde(default)]
    alt_donor: Option<String>,
    #[serde(rename = "alt_donorIntron", default)]
    alt_donor_intron: Option<String>,
}

impl From<RawScorerRecord> for ScorerRecord {
    fn from(raw: RawScorerRecord) -> Self {
        ScorerRecord {
            variant: raw.variant,
            junction: raw.junction,
            event_type: raw.event_type,
            delta_logit_psi: raw.delta_logit_psi,
            sequence: SequenceIds {
                ref_acceptor_intron: raw.ref_acceptor_intron,
                ref_acceptor: raw.ref_acceptor,
                ref_exon: raw.ref_exon,
                ref_donor: raw.ref_donor,
                ref_donor_intron: raw.ref_donor_intron,
                alt_acceptor_intron: raw.alt_acceptor_intron,
                alt_acceptor: raw.alt_acceptor,
                alt_exon: raw.alt_exon,
                alt_donor: raw.alt_donor,
                alt_donor_intron: raw.alt_donor_intron,
            },
        }
    }
}

/// One SpliceMap reference row: baseline usage of a junction in one tissue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpliceMapRecord {
    pub junction: String,
    pub tissue: String,
    pub event_type: EventType,
    #[serde(rename = "Chromosome")]
    pub chromosome: String,
    #[serde(rename = "Start")]
    pub start: u64,
    #[serde(rename = "End")]
    pub end: u64,
    #[serde(rename = "Strand")]
    pub strand: String,
    #[serde(default)]
    pub events: Option<String>,
    #[serde(default)]
    pub splice_site: Option<String>,
    #[serde(default)]
    pub ref_psi: Option<f64>,
    #[serde(default)]
    pub k: Option<f64>,
    #[serde(default)]
    pub n: Option<f64>,
    #[serde(default)]
    pub median_n: Option<f64>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub novel_junction: Option<bool>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub weak_site_donor: Option<bool>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub weak_site_acceptor: Option<bool>,
    #[serde(default)]
    pub gene_id: Option<String>,
    #[serde(default)]
    pub gene_name: Option<String>,
    #[serde(default)]
    pub transcript_id: Option<String>,
    #[serde(default)]
    pub gene_type: Option<String>,
}

/// One row of the canonical junction prediction table.
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionPrediction {
    pub variant: String,
    pub junction: String,
    pub tissue: String,
    pub event_type: EventType,
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub strand: String,
    pub events: Option<String>,
    pub splice_site: String,
    pub ref_psi: Option<f64>,
    pub k: Option<f64>,
    pub n: Option<f64>,
    pub median_n: Option<f64>,
    pub novel_junction: Option<bool>,
    pub weak_site_donor: Option<bool>,
    pub weak_site_acceptor: Option<bool>,
    pub gene_id: Option<String>,
    pub gene_name: Option<String>,
    pub transcript_id: Option<String>,
    pub gene_type: Option<String>,
    pub delta_logit_psi: f64,
    pub delta_psi: Option<f64>,
    pub sequence: SequenceIds,
}

impl JunctionPrediction {
    /// Builds the canonical frame, in `junction_schema` column order.
    pub fn to_frame(rows: &[JunctionPrediction]) -> Result<DataFrame> {
        fn strs<'a>(
            name: &str,
            rows: &'a [JunctionPrediction],
            f: impl Fn(&'a JunctionPrediction) -> Option<&'a str>,
        ) -> Column {
            Series::new(name.into(), rows.iter().map(f).collect::<Vec<_>>()).into()
        }
        fn floats(
            name: &str,
            rows: &[JunctionPrediction],
            f: impl Fn(&JunctionPrediction) -> Option<f64>,
        ) -> Column {
            Series::new(name.into(), rows.iter().map(f).collect::<Vec<_>>()).into()
        }
        fn bools(
            name: &str,
            rows: &[JunctionPrediction],
            f: impl Fn(&JunctionPrediction) -> Option<bool>,
        ) -> Column {
            Series::new(name.into(), rows.iter().map(f).collect::<Vec<_>>()).into()
        }
        fn ints(
            name: &str,
            rows: &[JunctionPrediction],
            f: impl Fn(&JunctionPrediction) -> u64,
        ) -> Column {
            Series::new(
                name.into(),
                rows.iter().map(|r| f(r) as i64).collect::<Vec<i64>>(),
            )
            .into()
        }

        let mut columns = vec![
            strs("variant", rows, |r| Some(r.variant.as_str())),
            strs("junction", rows, |r| Some(r.junction.as_str())),
            strs("tissue", rows, |r| Some(r.tissue.as_str())),
            strs("event_type", rows, |r| Some(r.event_type.as_str())),
            strs("Chromosome", rows, |r| Some(r.chromosome.as_str())),
            ints("Start", rows, |r| r.start),
            ints("End", rows, |r| r.end),
            strs("Strand", rows, |r| Some(r.strand.as_str())),
            strs("events", rows, |r| r.events.as_deref()),
            strs("splice_site", rows, |r| Some(r.splice_site.as_str())),
            floats("ref_psi", rows, |r| r.ref_psi),
            floats("k", rows, |r| r.k),
            floats("n", rows, |r| r.n),
            floats("median_n", rows, |r| r.median_n),
            bools("novel_junction", rows, |r| r.novel_junction),
            bools("weak_site_donor", rows, |r| r.weak_site_donor),
            bools("weak_site_acceptor", rows, |r| r.weak_site_acceptor),
            strs("gene_id", rows, |r| r.gene_id.as_deref()),
            strs("gene_name", rows, |r| r.gene_name.as_deref()),
            strs("transcript_id", rows, |r| r.transcript_id.as_deref()),
            strs("gene_type", rows, |r| r.gene_type.as_deref()),
            floats("delta_logit_psi", rows, |r| Some(r.delta_logit_psi)),
            floats("delta_psi", rows, |r| r.delta_psi),
        ];
        for (i, name) in SEQUENCE_COLUMNS.iter().enumerate() {
            columns.push(strs(name, rows, move |r| r.sequence.values()[i].as_deref()));
        }
        Ok(DataFrame::new(columns)?)
    }
}

/// Reference usage tables of every tissue, indexed by (junction, event type).
#[derive(Debug, Clone, Default)]
pub struct SpliceMap {
    by_event: AHashMap<(String, EventType), Vec<SpliceMapRecord>>,
    tissues: Vec<String>,
}

impl SpliceMap {
    pub fn new(records: Vec<SpliceMapRecord>) -> Self {
        let mut by_event: AHashMap<(String, EventType), Vec<SpliceMapRecord>> = AHashMap::new();
        let mut tissues: Vec<String> = Vec::new();
        for record in records {
            if !tissues.contains(&record.tissue) {
                tissues.push(record.tissue.clone());
            }
            by_event
                .entry((record.junction.clone(), record.event_type))
                .or_default()
                .push(record);
        }
        Self { by_event, tissues }
    }

    /// Reads one or more SpliceMap files into a single map.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut records = Vec::new();
        for path in paths {
            records.extend(crate::io::read_records::<SpliceMapRecord>(path)?);
        }
        log::info!(
            "Loaded {} SpliceMap rows from {} file(s)",
            records.len(),
            paths.len()
        );
        Ok(Self::new(records))
    }

    pub fn tissues(&self) -> &[String] {
        &self.tissues
    }

    pub fn lookup(&self, junction: &str, event_type: EventType) -> &[SpliceMapRecord] {
        self.by_event
            .get(&(junction.to_string(), event_type))
            .map_or(&[], Vec::as_slice)
    }
}

/// Merges scorer output with SpliceMap reference rows.
#[derive(Debug, Clone)]
pub struct PredictionAssembler {
    splicemap: SpliceMap,
}

impl PredictionAssembler {
    pub fn new(splicemap: SpliceMap) -> Self {
        Self { splicemap }
    }

    pub fn splicemap(&self) -> &SpliceMap {
        &self.splicemap
    }

    /// Expands one scorer batch into junction predictions, one per tissue that
    /// has a reference row for the scored event.
    pub fn assemble_rows(&self, batch: &[ScorerRecord]) -> Result<Vec<JunctionPrediction>> {
        let mut rows = Vec::with_capacity(batch.len() * self.splicemap.tissues().len().max(1));
        let mut unmatched = 0usize;
        for record in batch {
            let junction: Junction = record.junction.parse()?;
            let references = self.splicemap.lookup(&record.junction, record.event_type);
            if references.is_empty() {
                unmatched += 1;
                continue;
            }
            for reference in references {
                let splice_site = reference
                    .splice_site
                    .clone()
                    .unwrap_or_else(|| junction.splice_site(record.event_type));
                rows.push(JunctionPrediction {
                    variant: record.variant.clone(),
                    junction: record.junction.clone(),
                    tissue: reference.tissue.clone(),
                    event_type: record.event_type,
                    chromosome: reference.chromosome.clone(),
                    start: reference.start,
                    end: reference.end,
                    strand: reference.strand.clone(),
                    events: reference.events.clone(),
                    splice_site,
                    ref_psi: reference.ref_psi,
                    k: reference.k,
                    n: reference.n,
                    median_n: reference.median_n,
                    novel_junction: reference.novel_junction,
                    weak_site_donor: reference.weak_site_donor,
                    weak_site_acceptor: reference.weak_site_acceptor,
                    gene_id: reference.gene_id.clone(),
                    gene_name: reference.gene_name.clone(),
                    transcript_id: reference.transcript_id.clone(),
                    gene_type: reference.gene_type.clone(),
                    delta_logit_psi: record.delta_logit_psi,
                    delta_psi: reference
                        .ref_psi
                        .map(|p| delta_psi(p, record.delta_logit_psi)),
                    sequence: record.sequence.clone(),
                });
            }
        }
        if unmatched > 0 {
            log::debug!("{unmatched} scorer record(s) had no SpliceMap reference row and were dropped");
        }
        Ok(rows)
    }

    pub fn assemble(&self, batch: &[ScorerRecord]) -> Result<DataFrame> {
        JunctionPrediction::to_frame(&self.assemble_rows(batch)?)
    }

    /// Assembles every batch and concatenates them into the base table of a
    /// new result object.
    pub fn predict_on_batches<I>(&self, batches: I) -> Result<SpliceOutlierResult>
    where
        I: IntoIterator<Item = Vec<ScorerRecord>>,
    {
        let mut rows = Vec::new();
        let mut seen: AHashSet<(String, String, String)> = AHashSet::new();
        for (i, batch) in batches.into_iter().enumerate() {
            let assembled = self.assemble_rows(&batch)?;
            log::debug!(
                "Batch {i}: {} scorer records -> {} junction predictions",
                batch.len(),
                assembled.len()
            );
            for row in assembled {
                let key = (row.variant.clone(), row.junction.clone(), row.tissue.clone());
                if !seen.insert(key) {
                    return Err(OutlierError::JoinIntegrity {
                        operation: "assembling junction predictions".to_string(),
                        expected: seen.len(),
                        found: seen.len() + 1,
                        key: format!("{}|{}|{}", row.variant, row.junction, row.tissue),
                    });
                }
                rows.push(row);
            }
        }
        log::info!("Assembled {} junction-level predictions", rows.len());
        SpliceOutlierResult::new(JunctionPrediction::to_frame(&rows)?)
    }

    /// Assembles every batch and writes the junction table to `path`.
    pub fn predict_save<I>(&self, batches: I, path: impl AsRef<Path>) -> Result<SpliceOutlierResult>
    where
        I: IntoIterator<Item = Vec<ScorerRecord>>,
    {
        let result = self.predict_on_batches(batches)?;
        crate::io::write_table(result.df(), path)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn reference(tissue: &str, junction: &str, ref_psi: f64) -> SpliceMapRecord {
        let parsed: Junction = junction.parse().unwrap();
        SpliceMapRecord {
            junction: junction.to_string(),
            tissue: tissue.to_string(),
            event_type: EventType::Psi5,
            chromosome: parsed.chrom.clone(),
            start: parsed.start,
            end: parsed.end,
            strand: parsed.strand.to_string(),
            events: None,
            splice_site: None,
            ref_psi: Some(ref_psi),
            k: Some(10.0),
            n: Some(20.0),
            median_n: Some(15.0),
            novel_junction: Some(false),
            weak_site_donor: Some(false),
            weak_site_acceptor: Some(false),
            gene_id: Some("ENSG00000012048".to_string()),
            gene_name: Some("BRCA1".to_string()),
            transcript_id: None,
            gene_type: Some("protein_coding".to_string()),
        }
    }

    fn scored(variant: &str, junction: &str, dlogit: f64) -> ScorerRecord {
        ScorerRecord {
            variant: variant.to_string(),
            junction: junction.to_string(),
            event_type: EventType::Psi5,
            delta_logit_psi: dlogit,
            sequence: SequenceIds::default(),
        }
    }

    #[test]
    fn parses_and_formats_junction_ids() {
        let j: Junction = "17:41201211-41203079:-".parse().unwrap();
        assert_eq!(j.chrom, "17");
        assert_eq!((j.start, j.end), (41201211, 41203079));
        assert_eq!(j.to_string(), "17:41201211-41203079:-");
        assert!("17:41201211:-".parse::<Junction>().is_err());
        assert!("17:5-1:+".parse::<Junction>().is_err());
        assert!("17:1-5:x".parse::<Junction>().is_err());
    }

    #[test]
    fn splice_site_follows_event_and_strand() {
        let minus: Junction = "17:41201211-41203079:-".parse().unwrap();
        assert_eq!(minus.splice_site(EventType::Psi5), "17:41203079:-");
        assert_eq!(minus.splice_site(EventType::Psi3), "17:41201211:-");

        let plus: Junction = "chr1:100-200:+".parse().unwrap();
        assert_eq!(plus.splice_site(EventType::Psi5), "chr1:100:+");
        assert_eq!(plus.splice_site(EventType::Psi3), "chr1:200:+");
    }

    #[test]
    fn delta_psi_is_zero_without_shift_and_bounded() {
        assert_abs_diff_eq!(delta_psi(0.3, 0.0), 0.0, epsilon = 1e-12);
        assert!(delta_psi(0.5, 3.0) > 0.0);
        assert!(delta_psi(0.5, -3.0) < 0.0);
        let extreme = delta_psi(1.0, -50.0);
        assert!(extreme >= -1.0 && extreme < -0.99);
    }

    #[test]
    fn assembler_crosses_scores_with_every_tissue() {
        let junction = "17:41201211-41203079:-";
        let splicemap = SpliceMap::new(vec![
            reference("testis", junction, 0.8),
            reference("lung", junction, 0.5),
        ]);
        let assembler = PredictionAssembler::new(splicemap);
        let table = assembler
            .assemble(&[
                scored("17:41201500:G>A", junction, -2.0),
                scored("17:41201600:C>T", "17:1-2:+", 1.0),
            ])
            .unwrap();

        assert_eq!(table.height(), 2);
        let schema = junction_schema();
        assert_eq!(
            crate::frame::column_names(&table),
            schema.iter_names().map(|n| n.to_string()).collect::<Vec<_>>()
        );
        for (name, dtype) in schema.iter() {
            assert_eq!(table.column(name.as_str()).unwrap().dtype(), dtype, "{name}");
        }
        let tissues = table.column("tissue").unwrap().str().unwrap();
        assert_eq!(tissues.get(0), Some("testis"));
        assert_eq!(tissues.get(1), Some("lung"));
        let sites = table.column("splice_site").unwrap().str().unwrap();
        assert_eq!(sites.get(0), Some("17:41203079:-"));
        let dpsi = table.column("delta_psi").unwrap().f64().unwrap();
        assert_abs_diff_eq!(dpsi.get(0).unwrap(), delta_psi(0.8, -2.0), epsilon = 1e-12);
        assert_abs_diff_eq!(dpsi.get(1).unwrap(), delta_psi(0.5, -2.0), epsilon = 1e-12);
    }

    #[test]
    fn duplicate_predictions_across_batches_are_rejected() {
        let junction = "17:41201211-41203079:-";
        let assembler = PredictionAssembler::new(SpliceMap::new(vec![reference(
            "testis", junction, 0.8,
        )]));
        let batch = vec![scored("17:41201500:G>A", junction, -2.0)];
        let err = assembler
            .predict_on_batches(vec![batch.clone(), batch])
            .unwrap_err();
        assert!(matches!(err, OutlierError::JoinIntegrity { .. }));
    }
}
