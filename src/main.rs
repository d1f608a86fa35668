use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use bulkload::constants::MIB;
use bulkload::engine::ImportEngine;
use bulkload::pipeline::events::{ProgressSink, spawn_progress_logger};
use bulkload::schema::{self, SchemaInference, StaticSchema};
use bulkload::source::{DumpSource, RawSource};
use bulkload::store::ConnectionFactory;
use bulkload::store::sqlite::SqliteFactory;
use bulkload::{cli, config, logging};

fn main() -> Result<()> {
    logging::init_logging();

    let cli_opts = cli::parse();
    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    if let Some(workers) = cli_opts.workers {
        cfg.max_workers = workers;
    }
    if let Some(pool_size) = cli_opts.pool_size {
        cfg.pool_size = pool_size;
    }
    if let Some(statements) = cli_opts.chunk_statements {
        cfg.max_statements_per_chunk = statements;
    }
    if let Some(mib) = cli_opts.chunk_mib {
        cfg.max_bytes_per_chunk = mib.saturating_mul(MIB);
    }
    if let Some(retries) = cli_opts.retries {
        cfg.retry_count = retries;
    }
    cfg.validate()?;
    let opts = cfg.import_options()?;

    info!(
        "starting run_id={} config_hash={} input={} target={} workers={} pool_size={}",
        cfg.run_id,
        loaded.config_hash,
        cli_opts.input.display(),
        cli_opts.target.display(),
        opts.max_workers,
        opts.pool.size
    );

    let source = RawSource::open(&cli_opts.input)
        .with_context(|| format!("opening dump {}", cli_opts.input.display()))?;
    let source: Arc<dyn DumpSource> = Arc::new(source);

    if let Some(sample_size) = cli_opts.sample {
        let request = schema::collect_sample(source, &opts, sample_size)?;
        println!("{}", serde_json::to_string_pretty(&request)?);
        return Ok(());
    }

    let factory: Arc<dyn ConnectionFactory> =
        Arc::new(SqliteFactory::new(&cli_opts.target, cfg.sqlite_busy_timeout()));

    if let Some(ddl_path) = &cli_opts.create_table {
        let request = schema::collect_sample(source.clone(), &opts, 5)?;
        let response = StaticSchema::from_file(ddl_path)?.infer(&request)?;
        schema::apply_schema(factory.clone(), &response, opts.execute_timeout)
            .with_context(|| format!("creating table {}", request.table_name))?;
    }

    let (progress, progress_rx) = ProgressSink::bounded(cfg.progress_channel_capacity);
    let progress_logger = spawn_progress_logger(progress_rx);

    let engine = Arc::new(ImportEngine::new());
    let handle = engine.start(source, factory, opts, Some(progress.clone()));

    let ctrlc_engine = engine.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received; finishing in-flight chunks");
        ctrlc_engine.cancel_all();
    })
    .context("installing Ctrl+C handler")?;

    let result = engine.result(handle)?;
    let lost_events = progress.dropped();
    drop(progress);
    if progress_logger.join().is_err() {
        warn!("progress logger panicked");
    }
    if lost_events > 0 {
        info!("{lost_events} progress event(s) dropped under backpressure");
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        bail!(
            "import {:?}: {} of {} chunk(s) failed, {} skipped",
            result.phase,
            result.failed_chunks,
            result.total_chunks,
            result.skipped_chunks
        );
    }
    info!("bulkload run finished");
    Ok(())
}
