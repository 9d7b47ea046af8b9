pub(crate) mod binary;
pub mod cdf;
pub mod ecallisto;
mod error;
pub(crate) mod fits;
pub mod interball;
pub mod kronos;
pub mod nda;
pub mod pds3;
pub mod radiojove;
pub mod stereo;
pub mod wind;

pub use error::{BinaryError, DetectError, ReadError};

use std::{
    collections::BTreeMap,
    fs::File,
    io::Read,
    path::Path,
};

use hifitime::{Duration, Epoch};
use itertools::Itertools;
use log::debug;
use ndarray::prelude::*;
use strum_macros::{Display, EnumIter, EnumString};
use vec1::Vec1;

use crate::DataContext;

/// Every dataset that can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
pub enum Dataset {
    #[strum(serialize = "wind_waves_l2_hres")]
    WindWavesL2Hres,

    #[strum(serialize = "wind_waves_l2_60s")]
    WindWavesL260s,

    #[strum(serialize = "kronos_n1")]
    KronosN1,

    #[strum(serialize = "kronos_n2")]
    KronosN2,

    #[strum(serialize = "kronos_n3d")]
    KronosN3d,

    #[strum(serialize = "kronos_n3e")]
    KronosN3e,

    #[strum(serialize = "radiojove_sps")]
    RadioJoveSps,

    #[strum(serialize = "nda_routine")]
    NdaRoutine,

    #[strum(serialize = "nda_new_routine")]
    NdaNewRoutine,

    #[strum(serialize = "stereo_waves_l2")]
    StereoWavesL2,

    #[strum(serialize = "interball_polrad")]
    InterballPolrad,

    #[strum(serialize = "ecallisto")]
    ECallisto,

    #[strum(serialize = "pds3")]
    Pds3,

    #[strum(serialize = "cdf")]
    Cdf,
}

impl Dataset {
    /// Work out which dataset a file belongs to. The file extension decides
    /// most cases; generic `.dat` files are told apart by their name and, as
    /// a last resort, their first bytes.
    pub fn detect<P: AsRef<Path>>(file: P) -> Result<Dataset, DetectError> {
        let file = file.as_ref();
        if !file.exists() {
            return Err(DetectError::Missing {
                file: file.to_path_buf(),
            });
        }

        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_lowercase())
            .unwrap_or_default();
        if [".fit", ".fits", ".fit.gz", ".fits.gz"]
            .iter()
            .any(|suffix| name.ends_with(suffix))
        {
            return Ok(Dataset::ECallisto);
        }

        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        let dataset = match ext.as_deref() {
            Some("lbl") => Some(Dataset::Pds3),
            Some("cdf") => Some(Dataset::Cdf),
            Some("sps") => Some(Dataset::RadioJoveSps),
            Some("rt1") => Some(Dataset::NdaRoutine),
            Some("n1") => Some(Dataset::KronosN1),
            Some("n2") => Some(Dataset::KronosN2),
            Some("n3d") => Some(Dataset::KronosN3d),
            Some("n3e") => Some(Dataset::KronosN3e),
            Some("dat") => detect_dat(file, &name)?,
            _ => None,
        };

        match dataset {
            Some(d) => {
                debug!("{} looks like {d}", file.display());
                Ok(d)
            }
            None => Err(DetectError::Unknown {
                file: file.to_path_buf(),
            }),
        }
    }

    /// Can files of this dataset be read as sweeps of a dynamic spectrum?
    pub fn is_spectral(self) -> bool {
        !matches!(self, Dataset::Pds3)
    }
}

fn detect_dat(file: &Path, name: &str) -> Result<Option<Dataset>, DetectError> {
    if name.starts_with("wi_wa_") {
        return Ok(Some(if name.contains("_60s") {
            Dataset::WindWavesL260s
        } else {
            Dataset::WindWavesL2Hres
        }));
    }
    if name.starts_with("sta_wav") || name.starts_with("stb_wav") {
        return Ok(Some(Dataset::StereoWavesL2));
    }
    if name.contains("polrad") {
        return Ok(Some(Dataset::InterballPolrad));
    }

    let mut magic = [0; 4];
    let mut f = File::open(file)?;
    match f.read_exact(&mut magic) {
        Ok(()) => (),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if u32::from_le_bytes(magic) == nda::NEW_ROUTINE_HEADER_MAGIC {
        return Ok(Some(Dataset::NdaNewRoutine));
    }
    Ok(None)
}

/// Something that can read the sweeps of a dynamic spectrum.
pub trait DataRead: Sync + Send {
    fn get_data_context(&self) -> &DataContext;

    fn get_dataset(&self) -> Dataset;

    /// Read a single sweep into `data_fq`, which must have the shape
    /// (number of fields, number of grid frequencies). Grid frequencies that
    /// the sweep didn't sample are set to NaN.
    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError>;
}

/// Detect the dataset of a file and open the appropriate reader.
pub fn open_reader<P: AsRef<Path>>(file: P) -> Result<Box<dyn DataRead>, ReadError> {
    let file = file.as_ref();
    let dataset = Dataset::detect(file)?;
    let reader: Box<dyn DataRead> = match dataset {
        Dataset::WindWavesL2Hres => Box::new(wind::WindWavesReader::new(
            file,
            wind::WavesProduct::HighResolution,
        )?),
        Dataset::WindWavesL260s => Box::new(wind::WindWavesReader::new(
            file,
            wind::WavesProduct::Averaged60s,
        )?),
        Dataset::KronosN1 => Box::new(kronos::KronosReader::new(file, kronos::KronosLevel::N1)?),
        Dataset::KronosN2 => Box::new(kronos::KronosReader::new(file, kronos::KronosLevel::N2)?),
        Dataset::KronosN3d => {
            Box::new(kronos::KronosReader::new(file, kronos::KronosLevel::N3d)?)
        }
        Dataset::KronosN3e => {
            Box::new(kronos::KronosReader::new(file, kronos::KronosLevel::N3e)?)
        }
        Dataset::RadioJoveSps => Box::new(radiojove::SpsReader::new(file)?),
        Dataset::NdaRoutine => Box::new(nda::RoutineReader::new(file)?),
        Dataset::NdaNewRoutine => Box::new(nda::NewRoutineReader::new(file)?),
        Dataset::StereoWavesL2 => Box::new(stereo::StereoWavesReader::new(file)?),
        Dataset::InterballPolrad => Box::new(interball::PolradReader::new(file)?),
        Dataset::ECallisto => Box::new(ecallisto::CallistoReader::new(file)?),
        Dataset::Cdf => Box::new(cdf::CdfReader::new(file)?),
        Dataset::Pds3 => return Err(ReadError::NotSpectral { dataset }),
    };
    Ok(reader)
}

impl DataContext {
    /// Assemble a context from what a reader decoded. The frequency grid is
    /// the sorted union of `sweep_freqs`.
    pub(crate) fn new<'a, I>(
        file: &Path,
        timestamps: Vec<Epoch>,
        sweep_freqs: I,
        fields: Vec<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<DataContext, ReadError>
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        let no_sweeps = || ReadError::NoSweeps {
            file: file.to_path_buf(),
        };
        let time_res = median_spacing(&timestamps);
        let timestamps = Vec1::try_from_vec(timestamps).map_err(|_| no_sweeps())?;
        let freqs_khz = Vec1::try_from_vec(freq_grid(sweep_freqs)).map_err(|_| no_sweeps())?;
        let fields = Vec1::try_from_vec(fields).map_err(|_| no_sweeps())?;

        debug!("{}: {} sweeps", file.display(), timestamps.len());
        debug!(
            "Frequency grid: {} values, {} to {} kHz",
            freqs_khz.len(),
            freqs_khz.first(),
            freqs_khz.last()
        );
        debug!("Fields: {}", fields.iter().join(", "));

        Ok(DataContext {
            file: file.to_path_buf(),
            timestamps,
            time_res,
            freqs_khz,
            fields,
            metadata,
        })
    }
}

/// The sorted, de-duplicated union of all finite sweep frequencies.
pub(crate) fn freq_grid<'a, I>(sweep_freqs: I) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    sweep_freqs
        .into_iter()
        .flatten()
        .copied()
        .filter(|f| f.is_finite())
        .sorted_by(f64::total_cmp)
        .dedup()
        .collect()
}

/// The median spacing between consecutive timestamps, if there are at least
/// two.
fn median_spacing(timestamps: &[Epoch]) -> Option<Duration> {
    let mut diffs = timestamps
        .windows(2)
        .map(|t| (t[1] - t[0]).abs())
        .collect::<Vec<_>>();
    if diffs.is_empty() {
        return None;
    }
    diffs.sort_unstable();
    Some(diffs[diffs.len() / 2])
}

/// Write the rows of a sweep into `data_fq` after checking its shape and the
/// sweep index. `rows` holds one slice per context field, each parallel to
/// `freqs`. Values that land on the same grid channel are averaged, ignoring
/// NaNs; a channel with no finite value is NaN.
pub(crate) fn fill_sweep(
    mut data_fq: ArrayViewMut2<f32>,
    context: &DataContext,
    sweep: usize,
    freqs: &[f64],
    rows: &[&[f32]],
) -> Result<(), ReadError> {
    check_sweep_index(context, sweep)?;
    if data_fq.len_of(Axis(0)) != context.fields.len() {
        return Err(ReadError::BadArraySize {
            array_type: "data_fq",
            expected_len: context.fields.len(),
            axis_num: 0,
        });
    }
    if data_fq.len_of(Axis(1)) != context.freqs_khz.len() {
        return Err(ReadError::BadArraySize {
            array_type: "data_fq",
            expected_len: context.freqs_khz.len(),
            axis_num: 1,
        });
    }

    data_fq.fill(f32::NAN);
    let channels = freqs
        .iter()
        .map(|f| context.freqs_khz.binary_search_by(|g| g.total_cmp(f)).ok())
        .collect::<Vec<_>>();
    let mut sums = vec![0.0_f64; context.freqs_khz.len()];
    let mut counts = vec![0_u32; context.freqs_khz.len()];
    for (mut out, row) in data_fq.outer_iter_mut().zip(rows) {
        sums.fill(0.0);
        counts.fill(0);
        for (&i, &v) in channels.iter().zip(row.iter()) {
            if let Some(i) = i {
                if !v.is_nan() {
                    sums[i] += f64::from(v);
                    counts[i] += 1;
                }
            }
        }
        for ((o, &sum), &count) in out.iter_mut().zip(&sums).zip(&counts) {
            if count > 0 {
                *o = (sum / f64::from(count)) as f32;
            }
        }
    }
    Ok(())
}

pub(crate) fn check_sweep_index(context: &DataContext, sweep: usize) -> Result<(), ReadError> {
    if sweep >= context.timestamps.len() {
        return Err(ReadError::SweepOutOfRange {
            sweep,
            num_sweeps: context.timestamps.len(),
        });
    }
    Ok(())
}

/// Linearly spaced frequencies from `start` to `end` inclusive.
pub(crate) fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
