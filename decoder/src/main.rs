use std::{
    collections::HashMap,
    ffi::OsString,
    io::{Cursor, Read, Seek},
    time::Duration,
};

use clap::{Parser, Subcommand};
use mlt_agent::{
    frame::StackFrame,
    reader::{read_mlt, MltChunk},
};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "mlt-decoder")]
#[command(about = "Print the scopes recorded in MLT files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print every sample of every chunk
    Dump {
        /// MLT file to read from
        mlt_file: OsString,
        /// If true, read every `.mlt` entry of a zip archive
        #[arg(long)]
        zip: bool,
        #[arg(long, default_value = "5")]
        stack_depth: usize,
        /// Skip scopes shorter than this
        #[arg(long)]
        #[clap(value_parser = humantime::parse_duration)]
        min_duration: Option<Duration>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print per-scope sample counts and the hottest stacks
    Summary {
        /// MLT file to read from
        mlt_file: OsString,
        /// If true, read every `.mlt` entry of a zip archive
        #[arg(long)]
        zip: bool,
        /// Number of stacks to show per scope
        #[arg(long, default_value = "3")]
        top: usize,
    },
}

fn extract_mlt_from_zip<R: Read + Seek>(reader: R) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut zip = zip::ZipArchive::new(reader)?;

    let mut entries = vec![];
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.name().ends_with(".mlt") {
            let mut buf = vec![];
            std::io::copy(&mut file, &mut buf)?;
            entries.push(buf);
        }
    }

    Ok(entries)
}

fn load_chunks(data: Vec<u8>, zip: bool) -> anyhow::Result<Vec<MltChunk>> {
    if !zip {
        return Ok(read_mlt(&data)?);
    }
    let entries = extract_mlt_from_zip(Cursor::new(data))?;
    if entries.is_empty() {
        anyhow::bail!("no .mlt file found in the archive");
    }
    let mut chunks = vec![];
    for entry in entries {
        chunks.extend(read_mlt(&entry)?);
    }
    Ok(chunks)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt::init();
    match cli.command {
        Commands::Dump {
            mlt_file,
            zip,
            stack_depth,
            min_duration,
            json,
        } => {
            let chunks = load_chunks(std::fs::read(mlt_file)?, zip)?;
            let chunks: Vec<&MltChunk> = chunks
                .iter()
                .filter(|chunk| min_duration.is_none_or(|min| chunk_duration(chunk) >= min))
                .collect();
            tracing::debug!(chunks = chunks.len(), "decoded");
            if json {
                let json: Vec<ChunkJson> = chunks.iter().map(|chunk| ChunkJson::new(chunk)).collect();
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                for chunk in chunks {
                    print_chunk(chunk, stack_depth);
                }
            }
            Ok(())
        }
        Commands::Summary { mlt_file, zip, top } => {
            let chunks = load_chunks(std::fs::read(mlt_file)?, zip)?;
            for chunk in &chunks {
                print_summary(chunk, top);
            }
            Ok(())
        }
    }
}

fn chunk_duration(chunk: &MltChunk) -> Duration {
    Duration::from_nanos(chunk.duration_nanos().max(0) as u64)
}

fn print_header(chunk: &MltChunk) {
    println!(
        "[{:.6}] thread {} ({}) - scope of {}us, {} sample(s)",
        Duration::from_nanos(chunk.start_nanos().max(0) as u64).as_secs_f64(),
        chunk.thread_id(),
        chunk.thread_name().unwrap_or("<unknown>"),
        chunk_duration(chunk).as_micros(),
        chunk.sample_count()
    );
}

fn print_frames(frames: &[StackFrame], stack_depth: usize) {
    for (i, frame) in frames.iter().enumerate() {
        if i == stack_depth {
            println!(
                " - {:3} more frame(s) (pass --stack-depth={} to show)",
                frames.len() - stack_depth,
                frames.len()
            );
            break;
        }
        println!(" - {:3}: {}.{}:{}", i + 1, frame.owner, frame.method, frame.line);
    }
}

fn print_chunk(chunk: &MltChunk, stack_depth: usize) {
    print_header(chunk);
    for (i, frames) in chunk.resolved_samples().iter().enumerate() {
        println!(" sample {i}");
        print_frames(frames, stack_depth);
    }
    println!();
}

fn print_summary(chunk: &MltChunk, top: usize) {
    print_header(chunk);
    let total = chunk.sample_count().max(1);
    for (ptr, count) in hot_stacks(chunk).into_iter().take(top) {
        println!(
            " {count} sample(s) ({:.1}%)",
            count as f64 * 100.0 / total as f64
        );
        print_frames(&chunk.pools().resolve(ptr).unwrap_or_default(), 1);
    }
    println!();
}

/// Stack pointers by number of samples, most frequent first.
fn hot_stacks(chunk: &MltChunk) -> Vec<(i32, usize)> {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for ptr in chunk.stack_ptrs() {
        *counts.entry(ptr).or_default() += 1;
    }
    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|(a_ptr, a), (b_ptr, b)| b.cmp(a).then(a_ptr.cmp(b_ptr)));
    counts
}

#[derive(Debug, Serialize)]
struct ChunkJson<'a> {
    thread_id: u64,
    thread_name: Option<&'a str>,
    start_nanos: i64,
    duration_nanos: i64,
    samples: Vec<Vec<StackFrame>>,
}

impl<'a> ChunkJson<'a> {
    fn new(chunk: &'a MltChunk) -> Self {
        ChunkJson {
            thread_id: chunk.thread_id(),
            thread_name: chunk.thread_name(),
            start_nanos: chunk.start_nanos(),
            duration_nanos: chunk.duration_nanos(),
            samples: chunk.resolved_samples(),
        }
    }
}
