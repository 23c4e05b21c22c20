//! Translate command CLI handler.

use crate::convert::TranslationContext;
use crate::parser::Compression;
use crate::progress::ProgressReader;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;

pub fn run(
    file: PathBuf,
    output: Option<PathBuf>,
    batch_size: usize,
    progress: bool,
) -> anyhow::Result<()> {
    let input = File::open(&file)
        .map_err(|e| anyhow::anyhow!("Cannot open {}: {}", file.display(), e))?;
    let total = input.metadata().map(|m| m.len()).unwrap_or(0);
    let compression = Compression::from_path(&file);
    let mut reader: Box<dyn Read> = compression.wrap_reader(Box::new(input));
    if progress {
        // Decompressed byte counts would overshoot the file size, so the
        // bar tracks compressed input only when the file is plain.
        let tracked = if compression == Compression::None { total } else { 0 };
        reader = Box::new(ProgressReader::spinner(reader, tracked));
    }

    let mut sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stdout().lock()),
    };

    let mut ctx = TranslationContext::new().with_batch_size(batch_size);
    crate::convert::translate_stream(reader, &mut ctx, |sql| {
        sink.write_all(sql.as_bytes())?;
        sink.write_all(b"\n")?;
        Ok(())
    })?;
    sink.flush()?;

    eprintln!(
        "Translated {} statements ({} discarded, {} rows emitted, {} rows skipped)",
        ctx.stats.statements_emitted,
        ctx.stats.statements_discarded,
        ctx.stats.copy_rows_emitted,
        ctx.stats.copy_rows_skipped
    );
    ctx.warnings.print_summary();

    Ok(())
}
