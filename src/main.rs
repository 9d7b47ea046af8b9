use std::{
    path::{Path, PathBuf},
    thread::scope,
};

use clap::{AppSettings, Parser, Subcommand};
use crossbeam_channel::bounded;
use crossbeam_utils::atomic::AtomicCell;
use hifitime::Duration;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use log::{debug, error, info};
use ndarray::prelude::*;
use rayon::prelude::*;
use vec1::Vec1;

use maser::{
    averaging::timestamps_to_timeblocks,
    open_reader,
    read::{
        cdf::CdfFile,
        pds3::{ColumnLayout, Pds3Product},
    },
    write::write_dynspec,
    DataRead, Dataset,
};

#[derive(Parser)]
#[clap(version, about)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences), global = true)]
    verbosity: u8,

    /// Disable progress bars.
    #[clap(long, global = true)]
    no_progress_bars: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print the dataset of each file.
    Detect {
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },

    /// Summarise a file.
    Info { file: PathBuf },

    /// Convert a dynamic spectrum to a FITS cube.
    Convert {
        file: PathBuf,

        /// The FITS file to write.
        #[clap(short, long)]
        output: PathBuf,

        /// Average sweeps into blocks of this many seconds.
        #[clap(short, long)]
        time_average: Option<f64>,

        /// Only use these sweeps (0-indexed).
        #[clap(short, long, multiple_values(true))]
        sweeps: Option<Vec<usize>>,
    },
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_logging(args.verbosity);

    match args.command {
        Command::Detect { files } => detect(&files),
        Command::Info { file } => info(&file),
        Command::Convert {
            file,
            output,
            time_average,
            sweeps,
        } => convert(&file, &output, time_average, sweeps, args.no_progress_bars),
    }
}

fn detect(files: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    let results = files
        .par_iter()
        .map(|f| (f, Dataset::detect(f)))
        .collect::<Vec<_>>();
    let mut num_failed = 0;
    for (file, result) in &results {
        match result {
            Ok(dataset) => info!("{}: {dataset}", file.display()),
            Err(e) => {
                error!("{e}");
                num_failed += 1;
            }
        }
    }
    if num_failed > 0 {
        return Err(format!(
            "{num_failed} of {} files couldn't be identified",
            results.len()
        )
        .into());
    }
    Ok(())
}

fn info(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = Dataset::detect(file)?;
    info!("{}: {dataset}", file.display());
    if !dataset.is_spectral() {
        return pds3_info(file);
    }
    if dataset == Dataset::Cdf {
        cdf_info(file)?;
    }

    let reader = open_reader(file)?;
    let context = reader.get_data_context();
    info!("Sweeps: {}", context.num_sweeps());
    info!(
        "Time range: {} to {}",
        context.timestamps.first(),
        context.timestamps.last()
    );
    if let Some(time_res) = context.time_res {
        info!("Median sweep spacing: {time_res}");
    }
    info!(
        "Frequency grid: {} values, {} to {} kHz",
        context.freqs_khz.len(),
        context.freqs_khz.first(),
        context.freqs_khz.last()
    );
    info!("Fields: {}", context.fields.iter().join(", "));
    for (key, value) in &context.metadata {
        info!("  {key}: {value}");
    }
    Ok(())
}

fn cdf_info(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cdf = CdfFile::open(file)?;
    for v in &cdf.variables {
        info!(
            "Variable {}: {:?} [{}], {} records{}",
            v.name,
            v.data_type,
            v.dims.iter().join(", "),
            v.num_records(),
            if v.record_variance { "" } else { " (non-varying)" }
        );
    }
    Ok(())
}

fn pds3_info(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let product = Pds3Product::open(file)?;
    let label = product.label();
    for key in ["PRODUCT_ID", "INSTRUMENT_NAME", "START_TIME", "STOP_TIME"] {
        if let Some(value) = label.get(key) {
            info!("{key}: {value}");
        }
    }
    for (name, pointer) in label.pointers() {
        info!("^{name} = {pointer}");
    }
    for name in product.table_names() {
        let layout = product.table_layout(name)?;
        info!(
            "{name}: {} rows of {} bytes ({})",
            layout.rows,
            layout.row_bytes,
            if layout.ascii { "ASCII" } else { "binary" }
        );
        for ColumnLayout {
            name,
            data_type,
            items,
            unit,
            ..
        } in &layout.columns
        {
            let unit = unit.as_deref().map(|u| format!(" [{u}]")).unwrap_or_default();
            if *items > 1 {
                info!("  {name}: {data_type:?} x {items}{unit}");
            } else {
                info!("  {name}: {data_type:?}{unit}");
            }
        }
    }
    Ok(())
}

fn convert(
    file: &Path,
    output: &Path,
    time_average: Option<f64>,
    sweeps: Option<Vec<usize>>,
    no_progress_bars: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let reader = open_reader(file)?;
    let dataset = reader.get_dataset();
    let context = reader.get_data_context();
    info!("Input: {} ({dataset})", file.display());

    // Which sweeps?
    let sweeps = match sweeps {
        Some(mut v) => {
            v.sort_unstable();
            v.dedup();
            Vec1::try_from_vec(v).map_err(|_| "No sweeps were specified")?
        }
        None => Vec1::try_from_vec((0..context.num_sweeps()).collect())
            .map_err(|_| "The input has no sweeps")?,
    };
    let timeblocks = timestamps_to_timeblocks(
        &context.timestamps,
        time_average.map(Duration::from_seconds),
        &sweeps,
    )?;
    info!(
        "Writing {} sweeps as {} timeblocks to {}",
        sweeps.len(),
        timeblocks.len(),
        output.display()
    );

    let (tx, rx) = bounded(5);
    let error = AtomicCell::new(false);
    let multi_progress = MultiProgress::with_draw_target(if no_progress_bars {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stdout()
    });
    let read_progress = multi_progress.add(
        ProgressBar::new(sweeps.len() as _)
            .with_style(
                ProgressStyle::default_bar()
                    .template("{msg:17}: [{wide_bar:.blue}] {pos:2}/{len:2} sweeps ({elapsed_precise}<{eta_precise})")?
                    .progress_chars("=> "),
            )
            .with_position(0)
            .with_message("Reading"),
    );
    let write_progress = multi_progress.add(
        ProgressBar::new(timeblocks.len() as _)
            .with_style(
                ProgressStyle::default_bar()
                    .template("{msg:17}: [{wide_bar:.blue}] {pos:2}/{len:2} timeblocks ({elapsed_precise}<{eta_precise})")?
                    .progress_chars("=> "),
            )
            .with_position(0)
            .with_message("Writing"),
    );
    read_progress.tick();
    write_progress.tick();

    let reader: &dyn DataRead = reader.as_ref();
    let (read_result, write_result) = scope(|s| {
        let read_handle = s.spawn(|| {
            for &sweep in &sweeps {
                debug!("Reading sweep {sweep}");
                let mut data_fq = Array2::zeros((context.fields.len(), context.freqs_khz.len()));
                if let Err(e) = reader.read(data_fq.view_mut(), sweep) {
                    error.store(true);
                    return Err(e);
                }
                // The writer has hung up; it reports its own error.
                if tx.send((data_fq, context.timestamps[sweep])).is_err() {
                    break;
                }
                read_progress.inc(1);
            }
            drop(tx);
            read_progress.abandon_with_message("Finished reading");
            Ok(())
        });

        let write_handle = s.spawn(|| {
            let result = write_dynspec(
                output,
                context,
                dataset,
                &timeblocks,
                rx,
                &error,
                Some(write_progress),
            );
            if result.is_err() {
                error.store(true);
            }
            result
        });

        (
            join_thread(read_handle.join()),
            join_thread(write_handle.join()),
        )
    });
    read_result?;
    write_result?;

    info!("Wrote {}", output.display());
    Ok(())
}

/// Unwrap the result of a joined thread, re-raising its panic if it had one.
fn join_thread<T>(result: std::thread::Result<T>) -> T {
    match result {
        Ok(r) => r,
        Err(e) => std::panic::resume_unwind(e),
    }
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.init();
}
