//! Translate the chat bubbles of one screenshot on disk
//! Run with: cargo run --release --bin translate_file -- <input> <lang> [output]

use anyhow::{bail, Context, Result};
use bubble_translate::{core::find_language, BubbleTranslator, Config, Metrics};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bubble_translate=info".into()),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <lang> [output]", args[0]);
        std::process::exit(2);
    }

    let input = Path::new(&args[1]);
    let lang = &args[2];
    if find_language(lang).is_none() {
        bail!("Unsupported target language '{}'", lang);
    }
    let output = args
        .get(3)
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output(input, lang));

    let config = Arc::new(Config::new().context("Failed to load configuration")?);
    let translator = BubbleTranslator::from_config(config, Metrics::new())?;

    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    info!("Loaded {} ({} bytes)", input.display(), bytes.len());

    let (png, report) = translator.translate_bubbles_with_report(&bytes, lang).await?;

    tokio::fs::write(&output, &png)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("\n=== Results ===");
    println!("Image:        {}x{}", report.width, report.height);
    println!("Bubbles:      {}", report.bubbles);
    println!("Rendered:     {}", report.rendered);
    println!("OCR failures: {}", report.ocr_failures);
    println!("Translation:  {:?}", report.translation);
    println!("Output:       {}", output.display());

    Ok(())
}

/// `shot.jpg` + `es` -> `shot.es.png` next to the input
fn default_output(input: &Path, lang: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{}.{}.png", stem, lang))
}
