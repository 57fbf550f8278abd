use clap::Parser;
use docrag_context::{ChunkerConfig, TextChunker, normalize_text};
use std::fs;
use std::io::{self, Read};
use std::process;

/// Chunk a text file into JSON output using docrag-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Target chunk length in characters.
    #[arg(short, long, default_value_t = docrag_context::text::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(short, long, default_value_t = docrag_context::text::DEFAULT_CHUNK_OVERLAP)]
    overlap: usize,

    /// How far back from a hard cut to look for a paragraph, sentence or word boundary.
    #[arg(short, long, default_value_t = docrag_context::text::DEFAULT_BOUNDARY_LOOKBACK)]
    lookback: usize,

    /// Chunk the text as-is instead of normalizing whitespace first.
    #[arg(long)]
    raw: bool,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let chunker = match TextChunker::new(ChunkerConfig {
        chunk_size: args.chunk_size,
        overlap: args.overlap,
        boundary_lookback: args.lookback,
    }) {
        Ok(chunker) => chunker,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    };

    let text = if args.raw {
        file_content
    } else {
        normalize_text(&file_content)
    };

    let chunks = chunker.chunk(&text);
    let json_output = serde_json::to_string_pretty(&chunks)?;
    println!("{}", json_output);

    Ok(())
}
