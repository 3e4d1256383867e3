#![deny(unused_variables)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use splice_outlier::cat::{CatSource, TableCatSource};
use splice_outlier::config::RunConfig;
use splice_outlier::ensemble::{LogisticEnsemble, predict_ensemble, train_ensemble};
use splice_outlier::io::{read_records, read_table, write_table};
use splice_outlier::prediction::{PredictionAssembler, ScorerRecord, SpliceMap};
use splice_outlier::score::ScoreSource;
use splice_outlier::{SpliceOutlierResult, ViewName};

#[derive(Parser)]
#[command(
    name = "splice-outlier",
    about = "Aggregation, CAT evidence fusion and ensemble scoring of splicing outlier predictions",
    long_about = "Rolls junction-level variant effect predictions up to splice sites and genes, \
                 fuses RNA-seq evidence from clinically accessible tissues and external variant \
                 scores, and trains or applies ensemble models on the resulting views."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct RunArgs {
    /// Junction-level prediction table (.csv or .tsv)
    #[arg(value_name = "PREDICTIONS")]
    predictions: PathBuf,

    /// Run configuration (.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the junction-level prediction table from scorer output and SpliceMaps
    #[command(about = "Assemble junction predictions (outputs: predictions.csv)")]
    Assemble {
        /// Scorer output with variant, junction, event_type and delta_logit_psi columns
        #[arg(value_name = "SCORER_PATH")]
        scores: PathBuf,

        /// SpliceMap reference tables, one or more per tissue
        #[arg(long, value_name = "PATH", num_args = 1.., required = true)]
        splicemap: Vec<PathBuf>,

        /// Scorer records assembled per batch
        #[arg(long, default_value = "10000")]
        batch_size: usize,

        /// Output table
        #[arg(long, default_value = "predictions.csv")]
        output: PathBuf,
    },

    /// Aggregate predictions and export every view
    #[command(about = "Aggregate and fuse evidence (outputs: <view>.csv)")]
    Aggregate {
        #[command(flatten)]
        run: RunArgs,

        /// Directory the views are written to
        #[arg(long, default_value = "views")]
        output_dir: PathBuf,
    },

    /// Apply a persisted ensemble model to the configured view
    #[command(about = "Apply an ensemble model (outputs: ensemble.csv)")]
    Predict {
        #[command(flatten)]
        run: RunArgs,

        /// Ensemble model (.toml); defaults to ensemble.model from the configuration
        #[arg(long, value_name = "PATH")]
        model: Option<PathBuf>,

        #[arg(long, default_value = "ensemble.csv")]
        output: PathBuf,
    },

    /// Train ensemble models under k-fold cross-validation
    #[command(about = "Train ensemble models (outputs: cv_predictions.csv, model_fold<k>.toml)")]
    Train {
        #[command(flatten)]
        run: RunArgs,

        #[arg(long, default_value = "ensemble")]
        output_dir: PathBuf,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn load_config(path: Option<&PathBuf>) -> CliResult<RunConfig> {
    match path {
        Some(path) => Ok(RunConfig::load(path)?),
        None => Ok(RunConfig::default()),
    }
}

/// Reads predictions and applies every fusion step the configuration names.
fn build_result(run: &RunArgs, config: &RunConfig) -> CliResult<SpliceOutlierResult> {
    let df = read_table(&run.predictions)?;
    let mut result = SpliceOutlierResult::new(df)?.with_config(config.aggregation.clone());
    log::info!(
        "Loaded {} junction predictions across tissues [{}]",
        result.df().height(),
        result.tissues()?.join(", ")
    );

    if let Some(genotypes) = &config.samples.genotypes {
        result.add_samples(&read_table(genotypes)?)?;
        if !config.samples.rna_seq.is_empty() {
            result.filter_by_rna_seq_samples(&config.samples.rna_seq)?;
        }
    }
    for score in &config.score {
        result.add_score(ScoreSource::from_path(&score.name, &score.path)?)?;
    }
    if !config.cat.is_empty() {
        let sources = config
            .cat
            .iter()
            .map(|cat| -> CliResult<Arc<dyn CatSource>> {
                Ok(Arc::new(TableCatSource::from_path(&cat.tissue, &cat.path)?))
            })
            .collect::<CliResult<Vec<_>>>()?;
        result.infer_cat(sources)?;
    }
    Ok(result)
}

fn run_assemble(
    scores: PathBuf,
    splicemap: Vec<PathBuf>,
    batch_size: usize,
    output: PathBuf,
) -> CliResult<()> {
    if batch_size == 0 {
        return Err("--batch-size must be at least 1".into());
    }
    let assembler = PredictionAssembler::new(SpliceMap::from_paths(&splicemap)?);
    let records: Vec<ScorerRecord> = read_records(&scores)?;
    let batches = records.chunks(batch_size).map(<[ScorerRecord]>::to_vec);
    let result = assembler.predict_save(batches, &output)?;
    println!(
        "Wrote {} junction predictions to {}",
        result.df().height(),
        output.display()
    );
    Ok(())
}

fn run_aggregate(run: RunArgs, output_dir: PathBuf) -> CliResult<()> {
    let config = load_config(run.config.as_ref())?;
    let mut result = build_result(&run, &config)?;
    let written = result.write_views(&output_dir)?;
    for path in &written {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_predict(run: RunArgs, model: Option<PathBuf>, output: PathBuf) -> CliResult<()> {
    let config = load_config(run.config.as_ref())?;
    let model_path = model
        .or_else(|| config.ensemble.model.clone())
        .ok_or("no ensemble model given; pass --model or set ensemble.model")?;
    let model = LogisticEnsemble::load(&model_path)?;
    let features = if config.ensemble.features.is_empty() {
        model.feature_names.clone()
    } else {
        config.ensemble.features.clone()
    };

    let mut result = build_result(&run, &config)?;
    let view: ViewName = config.ensemble.view_name()?;
    let scored = predict_ensemble(&model, result.get(view)?, &features)?;
    write_table(scored.frame(), &output)?;
    println!("Scored view '{view}' into {}", output.display());
    Ok(())
}

fn run_train(run: RunArgs, output_dir: PathBuf) -> CliResult<()> {
    let config = load_config(run.config.as_ref())?;
    let options = config.ensemble.train_options();
    if options.features.is_empty() {
        return Err("ensemble.features must list at least one feature column".into());
    }
    let mut result = build_result(&run, &config)?;
    let view = config.ensemble.view_name()?;
    let (cv, models) = train_ensemble(result.get(view)?, &options, &config.ensemble.fitter())?;

    std::fs::create_dir_all(&output_dir)?;
    write_table(cv.frame(), output_dir.join("cv_predictions.csv"))?;
    for (fold, model) in models.iter().enumerate() {
        model.save(output_dir.join(format!("model_fold{fold}.toml")))?;
    }
    println!(
        "Trained {} fold models on view '{view}'; outputs in {}",
        models.len(),
        output_dir.display()
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Assemble {
            scores,
            splicemap,
            batch_size,
            output,
        }) => run_assemble(scores, splicemap, batch_size, output),
        Some(Commands::Aggregate { run, output_dir }) => run_aggregate(run, output_dir),
        Some(Commands::Predict { run, model, output }) => run_predict(run, model, output),
        Some(Commands::Train { run, output_dir }) => run_train(run, output_dir),
        None => Cli::command()
            .print_help()
            .map(|_| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
