use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing_subscriber::EnvFilter;

use seg_eval::{Config, DirectoryPairSource, Evaluator};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    config.validate()?;

    if let Some(num_threads) = config.num_threads {
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()?;
    }

    let mut source = DirectoryPairSource::new(&config.gt_dir, &config.pred_dir);
    if let Some(image_dir) = &config.image_dir {
        source = source.with_image_dir(image_dir);
    }

    let evaluator = Evaluator::from_config(source, &config)?;

    let start_time = Instant::now();
    let metric = evaluator.evaluate().context("Evaluation failed")?;
    tracing::info!(
        minutes = start_time.elapsed().as_secs_f64() / 60.0,
        "finished evaluation"
    );

    let report = metric.report(config.ignore_first)?;
    println!("{report}");

    Ok(())
}
