use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ollm_core::chat::{
    html_to_markdown, markdown_to_html, normalize_linebreaks, restore_markdown, Conversation,
    JinjaChatTemplate, TokenizerConfig,
};
use ollm_core::config::ModelConfig;
use ollm_core::quantization::QuantizationConfig;
use ollm_core::utils::device_name;

// ═════════════════════════════════════════════════════════════
//  CLI
// ═════════════════════════════════════════════════════════════

#[derive(Parser, Debug)]
#[command(name = "ollm", about = "Chat prompt, code-block and model config utilities")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a conversation (JSON) through a tokenizer's chat template
    Prompt {
        /// Path to tokenizer_config.json
        #[arg(long)]
        tokenizer_config: PathBuf,

        /// Conversation JSON: {"system": "...", "turns": [{"user": "...", "assistant": "..."}]}
        #[arg(long)]
        conversation: PathBuf,

        /// Model config JSON; its system_message is used when the conversation has none
        #[arg(long)]
        model_config: Option<PathBuf>,

        /// Leave out an empty assistant reply on the last turn
        #[arg(long)]
        check_assistant: bool,

        /// Strip a leading BOS token from the rendered prompt
        #[arg(long)]
        remove_bos: bool,

        /// Use CPU even if GPU is available
        #[arg(long)]
        cpu: bool,
    },
    /// Fenced Markdown code (stdin) to HTML <pre><code> blocks
    Md2html,
    /// HTML <pre><code> blocks (stdin) to fenced Markdown
    Html2md,
    /// Newlines to <br> outside code blocks (stdin)
    Linebreaks,
    /// Undo display formatting (<br> and HTML code blocks) (stdin)
    Restore,
    /// Print a quantization preset as JSON
    Quant {
        /// 4 or 8
        #[arg(long, default_value_t = 4)]
        bits: u8,
    },
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read stdin")?;
    Ok(input)
}

fn write_stdout(text: &str) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn render_prompt(
    tokenizer_config: &Path,
    conversation: &Path,
    model_config: Option<&Path>,
    check_assistant: bool,
    remove_bos: bool,
    cpu: bool,
) -> Result<String> {
    let tokenizer_config = TokenizerConfig::from_file(tokenizer_config)?;
    let template = JinjaChatTemplate::from_config(&tokenizer_config)?;

    let content = std::fs::read_to_string(conversation)
        .with_context(|| format!("Failed to read {}", conversation.display()))?;
    let conversation: Conversation = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", conversation.display()))?;

    let mut config = match model_config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            ModelConfig::from_json_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => ModelConfig::default(),
    };
    if conversation.system.is_some() {
        config.system_message = conversation.system.clone();
    }
    config.cpu_execution(cpu);
    let (device, dtype) = config.device_and_dtype()?;
    info!("Device: {}, dtype: {:?}", device_name(&device), dtype);

    info!(turns = conversation.turns.len(), "Rendering prompt");
    let prompt = config.create_chat_prompt(&conversation.turns, &template, check_assistant, remove_bos)?;
    Ok(prompt)
}

// ═════════════════════════════════════════════════════════════
//  Main
// ═════════════════════════════════════════════════════════════

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Prompt {
            tokenizer_config,
            conversation,
            model_config,
            check_assistant,
            remove_bos,
            cpu,
        } => {
            let prompt = render_prompt(
                &tokenizer_config,
                &conversation,
                model_config.as_deref(),
                check_assistant,
                remove_bos,
                cpu,
            )?;
            write_stdout(&prompt)?;
        }
        Command::Md2html => write_stdout(&markdown_to_html(&read_stdin()?))?,
        Command::Html2md => write_stdout(&html_to_markdown(&read_stdin()?))?,
        Command::Linebreaks => write_stdout(&normalize_linebreaks(&read_stdin()?))?,
        Command::Restore => write_stdout(&restore_markdown(&read_stdin()?))?,
        Command::Quant { bits } => {
            let config = QuantizationConfig::for_bits(bits)
                .with_context(|| format!("Unsupported bit width: {bits} (expected 4 or 8)"))?;
            write_stdout(&serde_json::to_string_pretty(&config)?)?;
            write_stdout("\n")?;
        }
    }
    Ok(())
}
