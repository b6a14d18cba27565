use clap::{Parser, Subcommand};
use lectern::cache::BuildMode;
use lectern::{config, output, site};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lectern")]
#[command(about = "Static site generator for courses and blogs")]
#[command(long_about = "\
Static site generator for courses and blogs

site.yaml describes the courses, their lessons and the blog posts; lessons
and posts are markdown files. Builds are incremental: only pages whose
sources changed since the last build are regenerated, and pages that are no
longer declared are removed from the output.

Content structure:

  content/
  ├── config.toml                    # Tool config (optional)
  ├── site.yaml                      # Title, navbar, courses, posts
  ├── partials/header.html           # Shared HTML fragments (optional)
  ├── blog/relatividade/
  │   ├── introducao.md              # Lesson
  │   └── images/fig1.png            # Copied, or inlined as a data URI
  ├── posts/hello.md                 # Blog post
  └── static/                        # Assets copied verbatim

Exit status:
  0    everything was already up to date
  2    some pages were rebuilt, none failed
  1    a page failed to render, a dependency cycle was found, or the build
       could not run at all
  130  interrupted

Run 'lectern gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Content directory
    #[arg(long, default_value = "content", global = true)]
    source: PathBuf,

    /// Output directory
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// Log cache decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the site, regenerating only what changed
    Build {
        /// Discard the build cache and rebuild everything
        #[arg(long)]
        full: bool,
    },
    /// Show which pages are stale and why, without building
    Status,
    /// Validate config.toml and site.yaml and list what would be built
    Check,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<u8, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build { full } => {
            let config = config::load_config(&cli.source)?;
            init_thread_pool(&config.processing);
            let mode = if full {
                BuildMode::Full
            } else {
                BuildMode::Incremental
            };
            let cancel = install_cancel_handler();

            println!(
                "==> Building {} → {}",
                cli.source.display(),
                cli.output.display()
            );
            let report = site::build(&cli.source, &cli.output, mode, Some(cancel))?;
            output::print_build_report(&report);
            Ok(report.outcome().exit_code())
        }
        Command::Status => {
            let config = config::load_config(&cli.source)?;
            init_thread_pool(&config.processing);
            let plan = site::status(&cli.source, &cli.output)?;
            output::print_plan(&plan);
            Ok(0)
        }
        Command::Check => {
            println!("==> Checking {}", cli.source.display());
            let decls = site::check(&cli.source)?;
            output::print_check(&decls);
            println!("==> Content is valid");
            Ok(0)
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(0)
        }
    }
}

/// Log to stderr. `RUST_LOG` wins when set; otherwise `warn`, or `debug`
/// with `--verbose`.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(verbose)));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn default_log_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "warn" }
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores: the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

/// First Ctrl-C asks the build to stop after the current page; a second one
/// exits immediately.
fn install_cancel_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    let installed = ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("interrupted, finishing the current page");
    });
    if let Err(err) = installed {
        tracing::warn!(error = %err, "cannot install Ctrl-C handler");
    }
    flag
}
