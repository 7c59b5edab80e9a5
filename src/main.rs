use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::error;

use linfea::{
    analysis::{Analysis, AnalysisSettings},
    error::Result,
    input, post_processor,
    solver::SolverMethod,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Method {
    Auto,
    Direct,
    Iterative,
}

impl From<Method> for SolverMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Auto => SolverMethod::Auto,
            Method::Direct => SolverMethod::Direct,
            Method::Iterative => SolverMethod::Iterative,
        }
    }
}

/// Linear static finite element analysis of a JSON model file
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Model file
    input: String,

    /// Directory for nodes.csv and elements.csv
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Overrides the solver method of the input file
    #[arg(short, long, value_enum)]
    method: Option<Method>,

    /// Assemble on a single thread
    #[arg(long)]
    serial: bool,

    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,

    /// Log every conjugate gradient iteration
    #[arg(long)]
    trace_solver: bool,
}

fn run(cli: &Cli) -> Result<()> {
    let input = input::read_input(&cli.input)?;

    let mut settings = AnalysisSettings {
        solver: input.solver,
        parallel: !cli.serial,
        with_mass: false,
        progress: !cli.quiet,
    };
    if let Some(method) = cli.method {
        settings.solver.method = method.into();
    }
    settings.solver.trace_iterations = cli.trace_solver;

    let kind = input.setup.kind;
    let analysis = Analysis::new(
        input.model,
        input.setup,
        input.loads,
        input.boundaries,
        settings,
    )?;
    let results = analysis.run()?;

    post_processor::csv_output(&analysis.model, kind, &results, &cli.output_dir)?;
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        error!("{err}");
        std::process::exit(1)
    }
}
