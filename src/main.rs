use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "manga-translator-rust",
    version,
    about = "OCR, cluster, and translate manga chapter pages"
)]
struct Cli {
    /// Library root: <library>/<source>/<manga>/<chapter>
    #[arg(short = 'd', long = "library")]
    library: String,

    /// Where chapter artifacts are written (defaults to the library root)
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Recognizer script (latin, chinese, japanese, korean)
    #[arg(short = 'L', long = "from")]
    from: Option<String>,

    /// Target language code
    #[arg(short = 'l', long = "to")]
    to: Option<String>,

    /// Translation engine (cloud, statistical)
    #[arg(short = 'e', long = "engine")]
    engine: Option<String>,

    /// Model name for the cloud engine
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Maximum concurrent source groups
    #[arg(long = "max-sources")]
    max_sources: Option<usize>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    manga_translator_rust::logging::init(cli.verbose)?;

    let config = manga_translator_rust::Config {
        library: cli.library,
        output: cli.output,
        from: cli.from,
        to: cli.to,
        engine: cli.engine,
        model: cli.model,
        key: cli.key,
        max_sources: cli.max_sources,
        settings_path: cli.read_settings,
    };

    let summary = manga_translator_rust::run(config).await?;
    println!("{}", summary);
    Ok(())
}
