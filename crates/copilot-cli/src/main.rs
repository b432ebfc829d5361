mod logging;
mod page;
mod repl;
mod server;

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use copilot_contracts::events::EventWriter;
use copilot_contracts::messages::UploadedImage;
use copilot_contracts::prompts::{HighlightStyle, PromptTemplate};
use copilot_engine::config::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use copilot_engine::normalize::DEFAULT_JPEG_QUALITY;
use copilot_engine::{CopilotEngine, EngineConfig, FollowUpImagePolicy, NormalizeOptions};
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "copilot",
    version,
    about = "Chart co-pilot: vision-model analysis of uploaded charts"
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the browser UI and `POST /analyze`.
    Serve(ServeArgs),
    /// Chat about a chart in the terminal.
    Chat(ChatArgs),
    /// Analyze one image and print the result.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Chart to analyze before the first prompt.
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Clone, Args)]
struct EngineArgs {
    #[arg(long, env = "COPILOT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,
    /// Defaults to OPENAI_API_BASE, then OPENAI_BASE_URL.
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: u64,
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
    /// Re-send the chart with each follow-up question (`attach`) or not (`text-only`).
    #[arg(long, default_value = "attach")]
    follow_up_image: FollowUpImagePolicy,
    #[arg(long)]
    no_suggestions: bool,
    #[arg(long)]
    include_recommendations: bool,
    #[arg(long, default_value = "bold")]
    highlight: HighlightStyle,
    /// Ask for an overview readable without domain knowledge.
    #[arg(long)]
    plain_language: bool,
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,
    /// Downscale so the longest side is at most this many pixels.
    #[arg(long)]
    max_dimension: Option<u32>,
    /// Append session events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            model: Some(self.model.clone()),
            api_base: self.api_base.clone(),
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            template: PromptTemplate {
                include_recommendations: self.include_recommendations,
                highlight_style: self.highlight,
                plain_language_overview: self.plain_language,
            },
            follow_up_image: self.follow_up_image,
            suggestions_enabled: !self.no_suggestions,
            normalize: NormalizeOptions {
                jpeg_quality: self.jpeg_quality,
                max_dimension: self.max_dimension,
            },
        }
    }

    fn build_engine(&self) -> Result<CopilotEngine> {
        let mut engine = CopilotEngine::from_config(self.config())?;
        if let Some(path) = &self.events {
            engine = engine.with_events(EventWriter::new(path));
        }
        info!(
            model = engine.model(),
            provider = engine.provider_name(),
            fallback = engine.fallback_reason().unwrap_or("none"),
            "engine ready"
        );
        Ok(engine)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("copilot error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            logging::init_logging(cli.log_json, "info");
            run_serve(args)
        }
        Command::Chat(args) => {
            logging::init_logging(cli.log_json, "warn");
            run_chat(args)
        }
        Command::Analyze(args) => {
            logging::init_logging(cli.log_json, "warn");
            run_analyze(args)
        }
    }
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    // The blocking HTTP client must be created and dropped outside the runtime.
    let engine = Arc::new(args.engine.build_engine()?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting the async runtime")?;
    let result = runtime.block_on(server::serve(
        args.bind,
        server::AppState::new(Arc::clone(&engine)),
    ));
    drop(runtime);
    drop(engine);
    result?;
    Ok(0)
}

fn run_chat(args: ChatArgs) -> Result<i32> {
    let engine = args.engine.build_engine()?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    repl::run_chat(&engine, args.image.as_deref(), stdin.lock(), &mut stdout)?;
    Ok(0)
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let engine = args.engine.build_engine()?;
    let upload = read_upload(&args.image)?;
    let analysis = engine
        .analyze_once(&upload)
        .map_err(|err| anyhow::anyhow!(err.user_message()))?;
    println!("{analysis}");
    Ok(0)
}

fn read_upload(path: &Path) -> Result<UploadedImage> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(UploadedImage::new(file_name, bytes))
}

#[cfg(test)]
mod test_support {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    /// Small bar chart on a transparent background.
    pub(crate) fn chart_png() -> Vec<u8> {
        let mut rgba = RgbaImage::new(24, 16);
        for (x, y, pixel) in rgba.enumerate_pixels_mut() {
            let bar_height = 4 + (x / 6) * 3;
            *pixel = if 16 - y <= bar_height && x % 6 != 0 {
                Rgba([31, 59, 87, 255])
            } else {
                Rgba([0, 0, 0, 0])
            };
        }
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(rgba)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use copilot_contracts::prompts::HighlightStyle;
    use copilot_engine::FollowUpImagePolicy;

    use super::{Cli, Command};

    #[test]
    fn shared_flags_build_engine_config() {
        let cli = Cli::try_parse_from([
            "copilot",
            "chat",
            "--model",
            "gpt-4o-mini",
            "--follow-up-image",
            "text-only",
            "--no-suggestions",
            "--highlight",
            "plain",
            "--plain-language",
            "--max-dimension",
            "1024",
            "--timeout-secs",
            "15",
        ])
        .unwrap();
        let Command::Chat(args) = cli.command else {
            panic!("expected chat");
        };
        let config = args.engine.config();
        assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.follow_up_image, FollowUpImagePolicy::TextOnly);
        assert!(!config.suggestions_enabled);
        assert_eq!(config.template.highlight_style, HighlightStyle::Plain);
        assert!(config.template.plain_language_overview);
        assert!(!config.template.include_recommendations);
        assert_eq!(config.normalize.max_dimension, Some(1024));
        assert_eq!(config.normalize.jpeg_quality, 90);
        assert_eq!(config.timeout.as_secs(), 15);
        assert_eq!(config.max_tokens, 1024);
    }

    #[test]
    fn serve_defaults_and_validation() {
        let cli = Cli::try_parse_from(["copilot", "serve", "--log-json"]).unwrap();
        assert!(cli.log_json);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind.to_string(), "127.0.0.1:8000");
        assert_eq!(args.engine.config().follow_up_image, FollowUpImagePolicy::Attach);

        assert!(Cli::try_parse_from(["copilot", "serve", "--jpeg-quality", "0"]).is_err());
        assert!(Cli::try_parse_from(["copilot", "serve", "--highlight", "loud"]).is_err());
        assert!(Cli::try_parse_from(["copilot", "analyze"]).is_err());
    }
}
