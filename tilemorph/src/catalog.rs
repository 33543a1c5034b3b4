//! Source catalogs and candidate selection.
//!
//! A tile has two catalogs describing the same detections row by row: the
//! SExtractor extraction catalog (positions, shapes, photometry) and the
//! star/galaxy classification catalog (`M1`, `M2`, `M3`, `s21`, `s31`).
//! There is no shared key between them; rows are merged by position, which
//! is only valid while both catalogs come from the same extraction run. The
//! row counts are checked, the ordering is trusted.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use shared::image_proc::SourceGeometry;
use shared::io::fits::{is_fits_file, read_table_columns};
use shared::io::FitsError;
use thiserror::Error;

/// Columns taken from the star/galaxy catalog
pub const STAR_GALAXY_COLUMNS: [&str; 5] = ["M1", "M2", "M3", "s21", "s31"];

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read FITS table {}: {source}", path.display())]
    Fits { path: PathBuf, source: FitsError },
    #[error("{}:{line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("{}: missing column {column}", path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error(
        "extraction catalog has {extraction} rows but star/galaxy catalog has {star_galaxy}; \
         row-position merge is not possible"
    )]
    RowMismatch {
        extraction: usize,
        star_galaxy: usize,
    },
}

/// Column-oriented numeric table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    names: Vec<String>,
    columns: HashMap<String, Vec<f64>>,
    rows: usize,
    source: PathBuf,
}

impl Catalog {
    fn from_columns(source: PathBuf, names: Vec<String>, data: Vec<Vec<f64>>) -> Self {
        let rows = data.first().map_or(0, Vec::len);
        let columns = names.iter().cloned().zip(data).collect();
        Self {
            names,
            columns,
            rows,
            source,
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Column names in file order
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    fn require(&self, name: &str) -> Result<&[f64], CatalogError> {
        self.column(name).ok_or_else(|| CatalogError::MissingColumn {
            path: self.source.clone(),
            column: name.to_string(),
        })
    }

    /// Append the columns of `other`, aligning rows by position.
    pub fn merge_by_row(mut self, other: Catalog) -> Result<Self, CatalogError> {
        if self.rows != other.rows {
            return Err(CatalogError::RowMismatch {
                extraction: self.rows,
                star_galaxy: other.rows,
            });
        }
        for name in other.names {
            if let Some(values) = other.columns.get(&name) {
                if self.columns.insert(name.clone(), values.clone()).is_none() {
                    self.names.push(name);
                }
            }
        }
        Ok(self)
    }
}

/// Parse a SExtractor ASCII catalog.
///
/// Header lines look like `#   3 X_IMAGE   Object position along x   [pixel]`
/// and give the 1-based column index and name. A gap between consecutive
/// indices means the earlier column is a vector; its extra elements are named
/// `NAME_1`, `NAME_2`, ...
pub fn parse_sextractor(path: &Path) -> Result<Catalog, CatalogError> {
    let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |line: usize, reason: String| CatalogError::Parse {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut header: Vec<(usize, String)> = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix('#') {
            let mut tokens = rest.split_whitespace();
            let (Some(index), Some(name)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let index: usize = index
                .parse()
                .map_err(|_| parse_error(line_no, format!("bad column index '{index}'")))?;
            if index == 0 {
                return Err(parse_error(line_no, "column indices start at 1".to_string()));
            }
            header.push((index, name.to_string()));
            continue;
        }

        let values = trimmed
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|_| parse_error(line_no, format!("non-numeric value '{token}'")))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        if let Some(first) = rows.first() {
            if values.len() != first.len() {
                return Err(parse_error(
                    line_no,
                    format!("expected {} values, found {}", first.len(), values.len()),
                ));
            }
        }
        rows.push(values);
    }

    if header.is_empty() {
        return Err(parse_error(0, "no column header found".to_string()));
    }
    header.sort_by_key(|(index, _)| *index);

    let width = match rows.first() {
        Some(first) => first.len(),
        None => header.last().map_or(0, |(index, _)| *index),
    };

    let mut names = Vec::with_capacity(width);
    for (i, (index, name)) in header.iter().enumerate() {
        let end = header.get(i + 1).map_or(width + 1, |(next, _)| *next);
        if *index > width {
            return Err(parse_error(
                0,
                format!("column {name} at index {index} but rows have {width} values"),
            ));
        }
        names.push(name.clone());
        for k in 1..end.saturating_sub(*index) {
            names.push(format!("{name}_{k}"));
        }
    }
    if names.len() != width {
        return Err(parse_error(
            0,
            format!("header describes {} columns, rows have {width}", names.len()),
        ));
    }

    let mut data = vec![Vec::with_capacity(rows.len()); width];
    for row in rows {
        for (column, value) in data.iter_mut().zip(row) {
            column.push(value);
        }
    }

    Ok(Catalog::from_columns(path.to_path_buf(), names, data))
}

/// Parse a whitespace-separated table whose first line names the columns.
///
/// A leading `#` on the header line is ignored. Later lines starting with `#`
/// are comments.
pub fn parse_plain_table(path: &Path) -> Result<Catalog, CatalogError> {
    let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |line: usize, reason: String| CatalogError::Parse {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let names: Vec<String> = match lines.next() {
        Some((_, header)) => header
            .trim_start_matches('#')
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        None => return Err(parse_error(0, "empty table".to_string())),
    };

    let mut data = vec![Vec::new(); names.len()];
    for (line_no, line) in lines {
        if line.starts_with('#') {
            continue;
        }
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() != names.len() {
            return Err(parse_error(
                line_no,
                format!("expected {} values, found {}", names.len(), values.len()),
            ));
        }
        for (column, token) in data.iter_mut().zip(values) {
            let value = token
                .parse::<f64>()
                .map_err(|_| parse_error(line_no, format!("non-numeric value '{token}'")))?;
            column.push(value);
        }
    }

    Ok(Catalog::from_columns(path.to_path_buf(), names, data))
}

/// Load the star/galaxy classification catalog.
///
/// FITS files are read from the binary table in HDU 1; anything else is
/// parsed as a plain whitespace table.
pub fn load_star_galaxy(path: &Path) -> Result<Catalog, CatalogError> {
    let fits_error = |source| CatalogError::Fits {
        path: path.to_path_buf(),
        source,
    };

    if is_fits_file(path).map_err(fits_error)? {
        let data = read_table_columns(path, 1, &STAR_GALAXY_COLUMNS).map_err(fits_error)?;
        let names = STAR_GALAXY_COLUMNS.iter().map(|s| s.to_string()).collect();
        return Ok(Catalog::from_columns(path.to_path_buf(), names, data));
    }

    let table = parse_plain_table(path)?;
    let mut data = Vec::with_capacity(STAR_GALAXY_COLUMNS.len());
    for name in STAR_GALAXY_COLUMNS {
        data.push(table.require(name)?.to_vec());
    }
    let names = STAR_GALAXY_COLUMNS.iter().map(|s| s.to_string()).collect();
    Ok(Catalog::from_columns(path.to_path_buf(), names, data))
}

/// Photometric and morphological cuts defining the candidate sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionCriteria {
    /// Minimum `FLUX_RADIUS` in pixels (inclusive)
    pub min_flux_radius: f64,
    /// `FLAGS` must be strictly below this
    pub max_flags: f64,
    /// Minimum `B_WORLD / A_WORLD` (inclusive)
    pub min_axis_ratio: f64,
    /// Inclusive `MAG_COG` range
    pub mag_range: (f64, f64),
    /// Exclusive range for the `M1 - M2` color
    pub color_range: (f64, f64),
    /// A source is stellar when both `s21` and `s31` are below this
    pub star_discriminant: f64,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            min_flux_radius: 4.0,
            max_flags: 17.0,
            min_axis_ratio: 0.05,
            mag_range: (14.0, 27.0),
            color_range: (0.5, 1.5),
            star_discriminant: 3.0,
        }
    }
}

/// One row of the merged catalog with the fields the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Row index in the catalog, used as the source id
    pub idx: usize,
    pub x_image: f64,
    pub y_image: f64,
    pub a_world: f64,
    pub b_world: f64,
    pub flux_radius: f64,
    pub mag_cog: f64,
    pub flags: f64,
    /// Seeing FWHM estimate in arcseconds
    pub prediq: f64,
    pub ra: f64,
    pub dec: f64,
    pub m1: f64,
    pub m2: f64,
    pub m3: f64,
    pub s21: f64,
    pub s31: f64,
}

impl Candidate {
    pub fn axis_ratio(&self) -> f64 {
        self.b_world / self.a_world
    }

    pub fn color(&self) -> f64 {
        self.m1 - self.m2
    }

    pub fn geometry(&self) -> SourceGeometry {
        SourceGeometry {
            x: self.x_image,
            y: self.y_image,
            flux_radius: self.flux_radius,
            axis_ratio: self.axis_ratio(),
            seeing: self.prediq,
        }
    }
}

impl SelectionCriteria {
    /// Photometric and morphological cuts (comparisons with NaN fail).
    pub fn passes_cuts(&self, c: &Candidate) -> bool {
        let q = c.axis_ratio();
        let color = c.color();
        c.flux_radius >= self.min_flux_radius
            && c.flags < self.max_flags
            && q >= self.min_axis_ratio
            && c.mag_cog >= self.mag_range.0
            && c.mag_cog <= self.mag_range.1
            && color > self.color_range.0
            && color < self.color_range.1
    }

    pub fn is_star(&self, c: &Candidate) -> bool {
        c.s21 < self.star_discriminant && c.s31 < self.star_discriminant
    }

    pub fn selects(&self, c: &Candidate) -> bool {
        self.passes_cuts(c) && !self.is_star(c)
    }
}

const EXTRACTION_COLUMNS: [&str; 10] = [
    "X_IMAGE",
    "Y_IMAGE",
    "A_WORLD",
    "B_WORLD",
    "FLUX_RADIUS",
    "MAG_COG",
    "FLAGS",
    "PREDIQ",
    "ALPHA_J2000",
    "DELTA_J2000",
];

/// Materialize every row of a merged catalog as a [`Candidate`].
pub fn candidates(catalog: &Catalog) -> Result<Vec<Candidate>, CatalogError> {
    for name in EXTRACTION_COLUMNS.iter().chain(STAR_GALAXY_COLUMNS.iter()) {
        catalog.require(name)?;
    }
    let col = |name: &str| catalog.column(name).unwrap_or(&[]);
    let (x, y, a, b) = (col("X_IMAGE"), col("Y_IMAGE"), col("A_WORLD"), col("B_WORLD"));
    let (fr, mag, flags, prediq) = (col("FLUX_RADIUS"), col("MAG_COG"), col("FLAGS"), col("PREDIQ"));
    let (ra, dec) = (col("ALPHA_J2000"), col("DELTA_J2000"));
    let (m1, m2, m3, s21, s31) = (col("M1"), col("M2"), col("M3"), col("s21"), col("s31"));

    Ok((0..catalog.len())
        .map(|i| Candidate {
            idx: i,
            x_image: x[i],
            y_image: y[i],
            a_world: a[i],
            b_world: b[i],
            flux_radius: fr[i],
            mag_cog: mag[i],
            flags: flags[i],
            prediq: prediq[i],
            ra: ra[i],
            dec: dec[i],
            m1: m1[i],
            m2: m2[i],
            m3: m3[i],
            s21: s21[i],
            s31: s31[i],
        })
        .collect())
}

/// Full merged catalog of a tile together with its selected candidates.
#[derive(Debug, Clone)]
pub struct Selection {
    pub catalog: Catalog,
    pub candidates: Vec<Candidate>,
}

/// Apply the selection to an already merged catalog.
pub fn select_from(
    catalog: Catalog,
    criteria: &SelectionCriteria,
) -> Result<Selection, CatalogError> {
    let candidates = candidates(&catalog)?
        .into_iter()
        .filter(|c| criteria.selects(c))
        .collect();
    Ok(Selection {
        catalog,
        candidates,
    })
}

/// Load both catalogs of a tile, merge them and select candidates.
pub fn select(
    extraction_path: &Path,
    star_galaxy_path: &Path,
    criteria: &SelectionCriteria,
) -> Result<Selection, CatalogError> {
    let extraction = parse_sextractor(extraction_path)?;
    let star_galaxy = load_star_galaxy(star_galaxy_path)?;
    let merged = extraction.merge_by_row(star_galaxy)?;
    let selection = select_from(merged, criteria)?;
    info!(
        "{} galaxies selected from {} catalog rows",
        selection.candidates.len(),
        selection.catalog.len()
    );
    Ok(selection)
}
