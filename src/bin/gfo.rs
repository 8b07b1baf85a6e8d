//! CLI entry point: one subcommand per §4.7 operation, plus the hidden
//! `__exec-batch` subcommand `coordinator::run` re-launches itself as to
//! execute a single batch in its own process (§5).

use clap::{Args, Parser, Subcommand};
use geofileops::config;
use geofileops::coordinator::{OperationRequest, RunOutcome};
use geofileops::ops_api;
use geofileops::worker;
use geofileops::GfoResult;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "gfo",
    about = "Parallel batched spatial-SQL execution engine for large on-disk vector datasets"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Raise log verbosity to debug.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Lower log verbosity to errors only.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Args)]
struct SingleLayerArgs {
    /// Input GeoPackage.
    #[arg(long)]
    input: PathBuf,
    /// Layer name, if the input has more than one.
    #[arg(long)]
    input_layer: Option<String>,
    /// Comma-separated list of attribute columns to carry through.
    #[arg(long, value_delimiter = ',')]
    columns: Option<Vec<String>>,
    /// Output GeoPackage to write.
    #[arg(long)]
    output: PathBuf,
    #[arg(long)]
    output_layer: Option<String>,
    #[arg(long)]
    explode_collections: bool,
    /// Batch count hint; -1 autodetects, omitted uses the operation default.
    #[arg(long)]
    nb_parallel: Option<i64>,
    /// Overwrite an existing output.
    #[arg(long)]
    force: bool,
}

impl SingleLayerArgs {
    fn into_request(self) -> OperationRequest {
        let mut request = OperationRequest::single_layer(self.input, self.output);
        request.input1_layer = self.input_layer;
        request.input1_columns = self.columns;
        request.output_layer = self.output_layer;
        request.explode_collections = self.explode_collections;
        request.nb_parallel = self.nb_parallel;
        request.force = self.force;
        request
    }
}

#[derive(Args)]
struct TwoLayerArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    input_layer: Option<String>,
    #[arg(long, value_delimiter = ',')]
    columns: Option<Vec<String>>,
    #[arg(long)]
    input2: PathBuf,
    #[arg(long)]
    input2_layer: Option<String>,
    #[arg(long, value_delimiter = ',')]
    columns2: Option<Vec<String>>,
    #[arg(long)]
    output: PathBuf,
    #[arg(long)]
    output_layer: Option<String>,
    #[arg(long)]
    explode_collections: bool,
    #[arg(long)]
    nb_parallel: Option<i64>,
    #[arg(long)]
    force: bool,
}

impl TwoLayerArgs {
    fn into_request(self) -> OperationRequest {
        let mut request = OperationRequest::two_layer(self.input, self.input2, self.output);
        request.input1_layer = self.input_layer;
        request.input1_columns = self.columns;
        request.input2_layer = self.input2_layer;
        request.input2_columns = self.columns2;
        request.output_layer = self.output_layer;
        request.explode_collections = self.explode_collections;
        request.nb_parallel = self.nb_parallel;
        request.force = self.force;
        request
    }
}

#[derive(Subcommand)]
enum Command {
    Buffer {
        #[command(flatten)]
        args: SingleLayerArgs,
        #[arg(long)]
        distance: f64,
        #[arg(long, default_value_t = 8)]
        quadrant_segments: i32,
    },
    Isvalid {
        #[command(flatten)]
        args: SingleLayerArgs,
        #[arg(long)]
        only_invalid: bool,
    },
    Convexhull {
        #[command(flatten)]
        args: SingleLayerArgs,
    },
    Simplify {
        #[command(flatten)]
        args: SingleLayerArgs,
        #[arg(long)]
        tolerance: f64,
    },
    Makevalid {
        #[command(flatten)]
        args: SingleLayerArgs,
    },
    Select {
        #[command(flatten)]
        args: SingleLayerArgs,
        #[arg(long)]
        sql: String,
    },
    Dissolve {
        #[command(flatten)]
        args: SingleLayerArgs,
        #[arg(long, value_delimiter = ',')]
        groupby: Vec<String>,
    },
    Erase {
        #[command(flatten)]
        args: TwoLayerArgs,
    },
    Intersect {
        #[command(flatten)]
        args: TwoLayerArgs,
    },
    Split {
        #[command(flatten)]
        args: TwoLayerArgs,
    },
    Union {
        #[command(flatten)]
        args: TwoLayerArgs,
    },
    JoinByLocation {
        #[command(flatten)]
        args: TwoLayerArgs,
        #[arg(long)]
        discard_nonmatching: bool,
        #[arg(long)]
        min_area_intersect: Option<f64>,
        #[arg(long)]
        area_inters_column: Option<String>,
    },
    ExportByLocation {
        #[command(flatten)]
        args: TwoLayerArgs,
        #[arg(long)]
        min_area_intersect: Option<f64>,
        #[arg(long)]
        area_inters_column: Option<String>,
    },
    ExportByDistance {
        #[command(flatten)]
        args: TwoLayerArgs,
        #[arg(long)]
        max_distance: f64,
    },
    /// Worker-process entry point; never invoked directly by a user.
    #[command(name = "__exec-batch", hide = true)]
    ExecBatch { path: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_directive = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    config::init_logging(default_directive);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "operation failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> GfoResult<()> {
    match command {
        Command::Buffer {
            args,
            distance,
            quadrant_segments,
        } => report(ops_api::buffer(&args.into_request(), distance, quadrant_segments)?),
        Command::Isvalid { args, only_invalid } => {
            let no_invalid_found = ops_api::isvalid(&args.into_request(), only_invalid)?;
            if no_invalid_found {
                println!("no invalid geometries found");
            } else {
                println!("invalid geometries found, see output layer");
            }
        }
        Command::Convexhull { args } => report(ops_api::convexhull(&args.into_request())?),
        Command::Simplify { args, tolerance } => {
            report(ops_api::simplify(&args.into_request(), tolerance)?)
        }
        Command::Makevalid { args } => report(ops_api::makevalid(&args.into_request())?),
        Command::Select { args, sql } => report(ops_api::select(&args.into_request(), sql)?),
        Command::Dissolve { args, groupby } => {
            report(ops_api::dissolve(&args.into_request(), &groupby)?)
        }
        Command::Erase { args } => report(ops_api::erase(&args.into_request())?),
        Command::Intersect { args } => report(ops_api::intersect(&args.into_request())?),
        Command::Split { args } => report(ops_api::split(&args.into_request())?),
        Command::Union { args } => report(ops_api::union(&args.into_request())?),
        Command::JoinByLocation {
            args,
            discard_nonmatching,
            min_area_intersect,
            area_inters_column,
        } => report(ops_api::join_by_location(
            &args.into_request(),
            discard_nonmatching,
            min_area_intersect,
            area_inters_column.as_deref(),
        )?),
        Command::ExportByLocation {
            args,
            min_area_intersect,
            area_inters_column,
        } => report(ops_api::export_by_location(
            &args.into_request(),
            min_area_intersect,
            area_inters_column.as_deref(),
        )?),
        Command::ExportByDistance { args, max_distance } => report(ops_api::export_by_distance(
            &args.into_request(),
            max_distance,
        )?),
        Command::ExecBatch { path } => worker::run_exec_batch(&path)?,
    }
    Ok(())
}

fn report(outcome: RunOutcome) {
    if outcome.output_produced {
        println!("produced {} feature(s)", outcome.feature_count);
    } else {
        println!("no output produced");
    }
}
