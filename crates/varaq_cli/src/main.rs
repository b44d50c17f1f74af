mod collab;
mod logger;
mod serve;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use varaq_core::{BuildOptions, build_site};

#[derive(Debug, Parser)]
#[command(name = "varaq", about = "Markdown/math static-site builder.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Render the source tree into a static site.")]
    Build {
        #[arg(long, default_value = "source")]
        source_dir: PathBuf,
        #[arg(long, default_value = "theme")]
        theme_dir: PathBuf,
        #[arg(long, default_value = "build")]
        build_dir: PathBuf,
        #[arg(long)]
        force_recreation: bool,
        #[arg(long, default_value = "GitHub")]
        syntax_theme: String,
        #[arg(long, value_name = "COMMAND")]
        math_command: Option<String>,
        #[arg(long, value_name = "COMMAND")]
        css_minify_command: Option<String>,
    },
    #[command(about = "Serve a built site for local preview.")]
    Serve {
        #[arg(default_value = "build")]
        dir: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

fn main() -> Result<()> {
    logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Build {
            source_dir,
            theme_dir,
            build_dir,
            force_recreation,
            syntax_theme,
            math_command,
            css_minify_command,
        } => {
            let options = BuildOptions {
                source_dir,
                theme_dir,
                build_dir,
                force_recreation,
                syntax_theme,
            };
            let collab =
                collab::collaborators(math_command.as_deref(), css_minify_command.as_deref());
            if let Err(err) = build_site(&options, &collab) {
                log::error!("build failed: {err:#}");
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Serve { dir, host, port } => serve::run_server(&dir, &host, port),
    }
}
