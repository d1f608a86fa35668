use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use bulkload::chunk::ChunkBuilder;
use bulkload::config;
use bulkload::encoding::EncodingDetector;
use bulkload::extract::StatementExtractor;
use bulkload::pipeline::{self, ImportOptions};
use bulkload::sanitize::Sanitized;
use bulkload::schema::{self, SchemaResponse};
use bulkload::source::{DumpSource, RawSource, read_prefix};
use bulkload::store::ConnectionFactory;
use bulkload::store::sqlite::SqliteFactory;

fn write_dump(path: &Path, rows: usize) -> u64 {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path).expect("create"));
    writeln!(file, "SET DEFINE OFF;").expect("write");
    for id in 0..rows {
        writeln!(
            file,
            "INSERT INTO \"HIS\".\"PATIENT\" (ID, NAME, NOTE)\n  VALUES ({id}, '患者{id}', 'note; with ''quotes''');"
        )
        .expect("write");
    }
    writeln!(file, "COMMIT;").expect("write");
    file.flush().expect("flush");
    std::fs::metadata(path).expect("metadata").len()
}

fn bench_options() -> ImportOptions {
    let loaded = config::load_config(None).expect("config");
    let mut cfg = loaded.config;
    cfg.run_id = "bench".to_string();
    cfg.max_workers = 4;
    cfg.pool_size = 4;
    cfg.import_options().expect("options")
}

// Extraction, sanitising and chunking only; nothing is executed.
fn extract_and_chunk(source: Arc<dyn DumpSource>, opts: &ImportOptions) -> u64 {
    let prefix = read_prefix(source.as_ref(), opts.encoding_sample_bytes).expect("prefix");
    let guess = EncodingDetector::new(opts.candidates.clone()).detect(&prefix);
    let extractor = StatementExtractor::new(
        source,
        &guess,
        opts.extract,
        opts.sanitizer.clone(),
        None,
    )
    .expect("extractor");

    let mut builder = ChunkBuilder::new(opts.chunk_limits);
    for item in extractor {
        if let Sanitized::Kept(stmt) = opts.sanitizer.clean(item.expect("statement")) {
            builder.push(stmt);
        }
    }
    builder.finish();
    builder.chunks_emitted()
}

fn bench_throughput(c: &mut Criterion) {
    let opts = bench_options();
    let mut group = c.benchmark_group("bulkload");
    group.sample_size(10);

    for rows in [10_000usize, 50_000usize] {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let dump_path = temp_dir.path().join("patient.sql");
        let bytes = write_dump(&dump_path, rows);
        group.throughput(Throughput::Bytes(bytes));

        group.bench_with_input(BenchmarkId::new("extract_only", rows), &rows, |b, _| {
            b.iter(|| {
                let source: Arc<dyn DumpSource> =
                    Arc::new(RawSource::open(&dump_path).expect("source"));
                extract_and_chunk(source, &opts)
            });
        });

        group.bench_with_input(BenchmarkId::new("sqlite_import", rows), &rows, |b, _| {
            b.iter(|| {
                let db_dir = tempfile::tempdir().expect("tempdir");
                let factory: Arc<dyn ConnectionFactory> = Arc::new(SqliteFactory::new(
                    &db_dir.path().join("target.db"),
                    Duration::from_secs(30),
                ));
                let ddl = SchemaResponse {
                    create_table: "CREATE TABLE PATIENT (ID INTEGER, NAME TEXT, NOTE TEXT);"
                        .to_string(),
                    confidence: 1.0,
                };
                schema::apply_schema(factory.clone(), &ddl, Duration::from_secs(30))
                    .expect("schema");
                let source: Arc<dyn DumpSource> =
                    Arc::new(RawSource::open(&dump_path).expect("source"));
                let result = pipeline::run_import(source, factory, &opts);
                assert!(result.success);
                result.total_rows
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
