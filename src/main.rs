use clap::{value_parser, Arg, ArgGroup, ArgMatches, Command};
use logpack::broker::{Client, Server, ServerConfig, DEFAULT_MAX_FRAME_BYTES};
use logpack::generator::EntryGenerator;
use logpack::storage::{
    CompactionOptions, CompactionPolicy, Log, LogConfig, SegmentReader, DEFAULT_MAX_SEGMENT_BYTES,
};
use logpack::{ChunkDecoder, LogEntry, Query};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

type BoxError = Box<dyn std::error::Error>;
type CliResult = Result<(), BoxError>;

fn dir_arg() -> Arg {
    Arg::new("dir")
        .long("dir")
        .short('d')
        .value_parser(value_parser!(PathBuf))
        .required(true)
        .help("Journal directory")
}

fn max_segment_bytes_arg() -> Arg {
    Arg::new("max-segment-bytes")
        .long("max-segment-bytes")
        .value_parser(value_parser!(u64))
        .help("Roll to a new segment after this many bytes")
}

fn query_arg() -> Arg {
    Arg::new("query")
        .long("query")
        .short('q')
        .value_parser(|s: &str| Query::parse(s))
        .help("Only print entries matching this filter, e.g. 'level >= warning and host = web-1'")
}

fn count_arg() -> Arg {
    Arg::new("count")
        .long("count")
        .short('c')
        .value_parser(value_parser!(u64))
        .default_value("1000")
        .help("Number of entries to generate")
}

fn seed_arg() -> Arg {
    Arg::new("seed")
        .long("seed")
        .value_parser(value_parser!(u64))
        .help("Seed for reproducible output")
}

fn cli() -> Command {
    Command::new("logpack")
        .about("Binary log entry codec with a segmented journal and ingest server")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("generate")
                .about("Write synthetic entries into a journal")
                .arg(dir_arg())
                .arg(count_arg())
                .arg(seed_arg())
                .arg(max_segment_bytes_arg()),
        )
        .subcommand(
            Command::new("send")
                .about("Stream synthetic entries to an ingest server")
                .arg(
                    Arg::new("addr")
                        .long("addr")
                        .default_value("127.0.0.1:8080")
                        .help("Server address"),
                )
                .arg(count_arg())
                .arg(seed_arg()),
        )
        .subcommand(
            Command::new("serve")
                .about("Accept framed entries over TCP and append them to a journal")
                .arg(dir_arg())
                .arg(
                    Arg::new("addr")
                        .long("addr")
                        .default_value("127.0.0.1:8080")
                        .help("Listen address"),
                )
                .arg(max_segment_bytes_arg())
                .arg(
                    Arg::new("max-frame-bytes")
                        .long("max-frame-bytes")
                        .value_parser(value_parser!(usize))
                        .help("Largest accepted frame"),
                ),
        )
        .subcommand(
            Command::new("dump")
                .about("Print the entries stored in a journal without modifying it")
                .arg(dir_arg())
                .arg(query_arg()),
        )
        .subcommand(
            Command::new("decode")
                .about("Print entries from a file of back-to-back encoded entries")
                .arg(
                    Arg::new("input")
                        .value_parser(value_parser!(PathBuf))
                        .help("File to read; standard input if omitted"),
                )
                .arg(query_arg()),
        )
        .subcommand(
            Command::new("compact")
                .about("Remove old segments from a journal")
                .arg(dir_arg())
                .arg(
                    Arg::new("keep-segments")
                        .long("keep-segments")
                        .value_parser(value_parser!(usize))
                        .help("Keep only the newest N segments"),
                )
                .arg(
                    Arg::new("max-bytes")
                        .long("max-bytes")
                        .value_parser(value_parser!(u64))
                        .help("Drop oldest segments until the journal is under this size"),
                )
                .arg(
                    Arg::new("max-age-secs")
                        .long("max-age-secs")
                        .value_parser(value_parser!(u64))
                        .help("Drop segments last written before this many seconds ago"),
                )
                .group(
                    ArgGroup::new("policy")
                        .args(["keep-segments", "max-bytes", "max-age-secs"])
                        .required(true),
                ),
        )
}

#[tokio::main]
async fn main() -> CliResult {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("generate", args)) => generate(args),
        Some(("send", args)) => send(args).await,
        Some(("serve", args)) => serve(args).await,
        Some(("dump", args)) => dump(args),
        Some(("decode", args)) => decode(args),
        Some(("compact", args)) => compact(args),
        _ => Ok(()),
    }
}

fn journal_dir(args: &ArgMatches) -> Result<PathBuf, String> {
    args.get_one::<PathBuf>("dir")
        .cloned()
        .ok_or_else(|| "--dir is required".to_string())
}

fn log_config(args: &ArgMatches) -> LogConfig {
    LogConfig {
        max_segment_bytes: args
            .get_one::<u64>("max-segment-bytes")
            .copied()
            .unwrap_or(DEFAULT_MAX_SEGMENT_BYTES),
        ..LogConfig::default()
    }
}

fn generator(args: &ArgMatches) -> EntryGenerator {
    match args.get_one::<u64>("seed") {
        Some(&seed) => EntryGenerator::seeded(seed, 1_700_000_000_000),
        None => EntryGenerator::new(),
    }
}

fn generate(args: &ArgMatches) -> CliResult {
    let dir = journal_dir(args)?;
    let count = args.get_one::<u64>("count").copied().unwrap_or(1000);
    let mut log = Log::open(&dir, log_config(args))?;

    let first = log.next_offset();
    for entry in generator(args).take(count as usize) {
        log.append(&entry)?;
    }
    log.flush()?;
    log::info!(
        "Wrote {} entries to {:?} (offsets {}..{})",
        count,
        dir,
        first,
        log.next_offset()
    );
    Ok(())
}

async fn send(args: &ArgMatches) -> CliResult {
    let addr = args
        .get_one::<String>("addr")
        .cloned()
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let count = args.get_one::<u64>("count").copied().unwrap_or(1000);

    let mut client = Client::connect(&addr).await?;
    let mut last = None;
    for entry in generator(args).take(count as usize) {
        last = Some(client.send(&entry).await?);
    }
    log::info!("Sent {} entries to {}, last offset {:?}", count, addr, last);
    Ok(())
}

async fn serve(args: &ArgMatches) -> CliResult {
    let dir = journal_dir(args)?;
    let addr = args
        .get_one::<String>("addr")
        .cloned()
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let config = ServerConfig {
        max_frame_bytes: args
            .get_one::<usize>("max-frame-bytes")
            .copied()
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES),
    };

    let log = Arc::new(TokioMutex::new(Log::open(&dir, log_config(args))?));
    let mut server = Server::bind(&addr, Arc::clone(&log), config).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;

    log.lock().await.flush()?;
    Ok(())
}

fn dump(args: &ArgMatches) -> CliResult {
    let dir = journal_dir(args)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let printed = dump_journal(&dir, args.get_one::<Query>("query"), &mut out)?;
    out.flush()?;
    log::debug!("Printed {} entries from {:?}", printed, dir);
    Ok(())
}

// Reads segment files directly so a dump never recovers, truncates or
// creates anything.
fn dump_journal<W: Write>(
    dir: &Path,
    query: Option<&Query>,
    out: &mut W,
) -> Result<u64, BoxError> {
    let mut printed = 0;
    for reader in SegmentReader::open_dir(dir)? {
        for item in reader.iter() {
            let (offset, entry) = item?;
            if query.map_or(true, |q| q.matches(&entry)) {
                writeln!(out, "{}", format_entry(offset, &entry))?;
                printed += 1;
            }
        }
    }
    Ok(printed)
}

fn decode(args: &ArgMatches) -> CliResult {
    let query = args.get_one::<Query>("query");
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let printed = match args.get_one::<PathBuf>("input") {
        Some(path) => decode_stream(File::open(path)?, query, &mut out)?,
        None => decode_stream(io::stdin().lock(), query, &mut out)?,
    };
    out.flush()?;
    log::debug!("Printed {} entries", printed);
    Ok(())
}

// Entries are numbered by their position in the stream.
fn decode_stream<R: Read, W: Write>(
    mut input: R,
    query: Option<&Query>,
    out: &mut W,
) -> Result<u64, BoxError> {
    let mut decoder = ChunkDecoder::new();
    let mut chunk = vec![0u8; 64 * 1024];
    let mut index = 0u64;
    let mut printed = 0;
    loop {
        let n = input.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        decoder.push(&chunk[..n]);
        for item in decoder.by_ref() {
            let entry = item?;
            if query.map_or(true, |q| q.matches(&entry)) {
                writeln!(out, "{}", format_entry(index, &entry))?;
                printed += 1;
            }
            index += 1;
        }
    }
    decoder.finish()?;
    Ok(printed)
}

fn format_entry(offset: u64, entry: &LogEntry) -> String {
    let mut line = format!("{} {} {}", offset, entry.timestamp, entry.level_name());
    for property in &entry.properties {
        line.push_str(&format!(" {}={}", property.key, property.value));
    }
    line.push(' ');
    line.push_str(&entry.message);
    line
}

fn compact(args: &ArgMatches) -> CliResult {
    let dir = journal_dir(args)?;
    let policy = if let Some(&keep) = args.get_one::<usize>("keep-segments") {
        CompactionPolicy::RetainMinSegments(keep)
    } else if let Some(&bytes) = args.get_one::<u64>("max-bytes") {
        CompactionPolicy::RetainTotalSize(bytes)
    } else if let Some(&secs) = args.get_one::<u64>("max-age-secs") {
        CompactionPolicy::RetainDuration(Duration::from_secs(secs))
    } else {
        CompactionPolicy::Disabled
    };

    if !dir.is_dir() {
        return Err(format!("{:?} is not a journal directory", dir).into());
    }
    let config = LogConfig {
        compaction: CompactionOptions { policy },
        ..LogConfig::default()
    };
    let mut log = Log::open(&dir, config)?;
    let removed = log.compact()?;
    log::info!(
        "Removed {} segments from {:?}, {} remain",
        removed,
        dir,
        log.segment_count()
    );
    Ok(())
}
