use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lexstack::search::ExpanderOptions;
use lexstack::{
    read_hmms, read_lexicon, ArpaNgram, DecoderConfig, DecoderError, Expander, LanguageModel,
    LnaReader, Recognition, Search, Vocabulary,
};

#[derive(Debug, Parser)]
#[command(name = "recognize")]
#[command(about = "Decode a segment of an LNA acoustic stream into word hypotheses")]
struct Args {
    /// HMM inventory file.
    #[arg(long, env = "LEXSTACK_HMM")]
    hmm: PathBuf,
    /// Pronunciation lexicon file.
    #[arg(long, env = "LEXSTACK_LEXICON")]
    lexicon: PathBuf,
    /// ARPA n-gram model, `PATH[:WEIGHT]`. Repeat for a weighted mixture.
    #[arg(long = "ngram")]
    ngrams: Vec<String>,
    /// LNA acoustic stream (file or fifo).
    #[arg(long, env = "LEXSTACK_LNA")]
    lna: PathBuf,
    /// Number of emission models in the LNA stream.
    #[arg(long)]
    models: usize,
    /// Frames the LNA reader retains for rewind within the window.
    #[arg(long, default_value_t = 1024)]
    lna_retain: usize,
    #[arg(long, default_value_t = 0)]
    start_frame: u32,
    #[arg(long)]
    end_frame: Option<u32>,
    /// JSON decoder configuration; the flags below override it.
    #[arg(long, env = "LEXSTACK_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    lm_scale: Option<f32>,
    #[arg(long)]
    word_limit: Option<usize>,
    #[arg(long)]
    hypo_limit: Option<usize>,
    #[arg(long)]
    token_limit: Option<usize>,
    #[arg(long)]
    expand_window: Option<usize>,
    #[arg(long)]
    prune_similar: Option<usize>,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("recognize: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, DecoderError> {
    let mut config = match &args.config {
        Some(path) => DecoderConfig::load(path)?,
        None => DecoderConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;
    init_tracing(config.verbose.max(args.verbose as u32));

    let hmm_file = File::open(&args.hmm).map_err(|e| DecoderError::open("open hmm file", e))?;
    let (hmms, hmm_map) = read_hmms(
        BufReader::new(hmm_file),
        &args.hmm.display().to_string(),
    )?;
    tracing::info!(hmms = hmms.len(), "hmm inventory loaded");

    let mut vocabulary = Vocabulary::new();
    let lexicon_file =
        File::open(&args.lexicon).map_err(|e| DecoderError::open("open lexicon file", e))?;
    let lexicon = read_lexicon(
        BufReader::new(lexicon_file),
        &args.lexicon.display().to_string(),
        &hmm_map,
        &mut vocabulary,
    )?;
    tracing::info!(
        words = vocabulary.len(),
        nodes = lexicon.num_nodes(),
        "lexicon loaded"
    );

    let acoustics = LnaReader::open(&args.lna, args.models, args.lna_retain)?;
    let expander = Expander::new(
        Arc::new(hmms),
        Arc::new(lexicon),
        vocabulary.len(),
        Box::new(acoustics),
        ExpanderOptions::from(&config),
    );
    let vocabulary = Arc::new(vocabulary);
    let mut search = Search::new(expander, Arc::clone(&vocabulary), &config)?;

    for spec in &args.ngrams {
        let (path, weight) = parse_ngram_spec(spec)?;
        let model = ArpaNgram::open(&path)?;
        tracing::info!(
            model = %path.display(),
            order = model.order(),
            weight,
            "ngram model loaded"
        );
        search.add_ngram(Box::new(model), weight);
    }

    let end_frame = args.end_frame.or(config.end_frame).unwrap_or(u32::MAX);
    let reached = search.recognize_segment(args.start_frame, end_frame)?;
    tracing::info!(
        reached,
        frame = search.frame(),
        live_paths = search.live_paths(),
        "segment decoded"
    );

    let recognitions = search.recognitions();
    if recognitions.is_empty() {
        eprintln!("recognize: no surviving hypothesis");
        return Ok(ExitCode::FAILURE);
    }
    for recognition in &recognitions {
        println!("{}", format_recognition(recognition, &config));
    }
    Ok(ExitCode::SUCCESS)
}

fn apply_overrides(config: &mut DecoderConfig, args: &Args) {
    if let Some(lm_scale) = args.lm_scale {
        config.lm_scale = lm_scale;
    }
    if let Some(word_limit) = args.word_limit {
        config.word_limit = word_limit;
    }
    if let Some(hypo_limit) = args.hypo_limit {
        config.hypo_limit = hypo_limit;
    }
    if let Some(token_limit) = args.token_limit {
        config.token_limit = token_limit;
    }
    if let Some(expand_window) = args.expand_window {
        config.expand_window = expand_window;
    }
    if let Some(prune_similar) = args.prune_similar {
        config.prune_similar = prune_similar;
    }
}

fn init_tracing(verbose: u32) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn parse_ngram_spec(spec: &str) -> Result<(PathBuf, f32), DecoderError> {
    if let Some((path, weight)) = spec.rsplit_once(':') {
        if let Ok(weight) = weight.parse::<f32>() {
            if weight <= 0.0 || !weight.is_finite() {
                return Err(DecoderError::config(format!(
                    "ngram weight in {spec} must be positive"
                )));
            }
            return Ok((PathBuf::from(path), weight));
        }
    }
    Ok((PathBuf::from(spec), 1.0))
}

/// `<score> <frame> <word>...` with optional per-word decorations.
fn format_recognition(recognition: &Recognition, config: &DecoderConfig) -> String {
    let mut out = format!("{:.4} {}", recognition.log_prob, recognition.frame);
    for word in &recognition.words {
        out.push(' ');
        if config.print_indices {
            out.push_str(&format!("{}:", word.word_id));
        }
        out.push_str(&word.word);
        if config.print_frames {
            out.push_str(&format!("@{}", word.frame));
        }
        if config.print_probs {
            out.push_str(&format!(
                "[{:.3},{:.3}]",
                word.ac_log_prob, word.lm_log_prob
            ));
        }
    }
    out
}
