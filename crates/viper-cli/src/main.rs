//! Viper driver CLI (§6): `-emit-il`/`-run`/`check` over the core's textual
//! IL. The only crate in the workspace allowed to use `anyhow` — every crate
//! below this one returns its own typed error, and this binary is where
//! those get flattened into a process exit code.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use viper_diag::SourceManager;
use viper_il::Module;
use viper_rt::bridge::Bridge;
use viper_rt::name_map::NameMap;
use viper_vm::{Interpreter, RunOutcome};

#[derive(Parser)]
#[command(name = "viper")]
#[command(about = "Viper IL toolchain driver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a module and execute its `@main`
    Run {
        source: PathBuf,
        /// Run the mem2reg pass before executing
        #[arg(long)]
        mem2reg: bool,
        /// Run the constfold pass before executing
        #[arg(long)]
        constfold: bool,
    },
    /// Parse (and optionally optimize) a module, re-serializing it
    #[command(name = "emit-il")]
    EmitIl {
        source: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        mem2reg: bool,
        #[arg(long)]
        constfold: bool,
    },
    /// Verify a module without executing it
    Check { source: PathBuf },
}

fn main() -> Result<ExitCode> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("VIPER_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { source, mem2reg, constfold } => run(&source, mem2reg, constfold),
        Commands::EmitIl { source, output, mem2reg, constfold } => emit_il(&source, output.as_deref(), mem2reg, constfold),
        Commands::Check { source } => check(&source),
    }
}

fn load(source: &Path) -> Result<(Module, SourceManager)> {
    let text = fs::read_to_string(source).with_context(|| format!("reading {}", source.display()))?;
    let module = viper_il::parse(&text).with_context(|| format!("parsing {}", source.display()))?;
    let mut sources = SourceManager::new();
    sources.add_file(source.display().to_string(), text);
    tracing::debug!(functions = module.functions.len(), "parsed module");
    Ok((module, sources))
}

fn optimize(module: &mut Module, mem2reg: bool, constfold: bool) {
    if mem2reg {
        viper_opt::mem2reg(module);
    }
    if constfold {
        viper_opt::constfold(module);
    }
}

fn verify_or_report(module: &Module, sources: &SourceManager) -> Result<bool> {
    let report = viper_verify::verify_module(module);
    if !report.is_ok() {
        report.diagnostics.emit_all(sources).context("rendering verifier diagnostics")?;
    }
    Ok(report.is_ok())
}

fn run(source: &Path, mem2reg: bool, constfold: bool) -> Result<ExitCode> {
    let (mut module, sources) = load(source)?;
    optimize(&mut module, mem2reg, constfold);
    if !verify_or_report(&module, &sources)? {
        return Ok(ExitCode::from(254));
    }

    let bridge = Bridge::new();
    let mut vm = Interpreter::new(&module, &bridge, NameMap::for_load());
    match vm.run("@main") {
        RunOutcome::Exit(code) => {
            tracing::debug!(code, "program exited");
            Ok(ExitCode::from(code as u8))
        }
        RunOutcome::Trapped { exit_code, diagnostic } => {
            eprintln!("{diagnostic}");
            Ok(ExitCode::from(exit_code as u8))
        }
    }
}

fn emit_il(source: &Path, output: Option<&Path>, mem2reg: bool, constfold: bool) -> Result<ExitCode> {
    let (mut module, sources) = load(source)?;
    optimize(&mut module, mem2reg, constfold);
    if !verify_or_report(&module, &sources)? {
        return Ok(ExitCode::from(254));
    }

    let text = viper_il::serialize(&module);
    match output {
        Some(path) => fs::write(path, text).with_context(|| format!("writing {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn check(source: &Path) -> Result<ExitCode> {
    let (module, sources) = load(source)?;
    if verify_or_report(&module, &sources)? {
        println!("{}: ok", source.display());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(254))
    }
}
