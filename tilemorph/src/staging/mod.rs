//! Resource staging: fetching tile products into the local working directory.
//!
//! Every product has a deterministic remote path and a deterministic local file
//! name derived from the tile id, so a product already present locally is
//! never fetched again and an interrupted run picks up where it stopped.

mod cache;
mod decompress;
mod store;

pub use cache::{ResourceCache, StagedProducts, StagingError};
pub use decompress::{DecompressError, Decompressor, FunpackDecompressor};
pub use store::{HttpObjectStore, MirrorObjectStore, ObjectStore, StoreError};

use std::fmt;
use std::path::{Path, PathBuf};

use crate::tile::TileId;

/// Suffix of tile-compressed FITS products
pub const COMPRESSED_SUFFIX: &str = ".fz";

/// Sibling a file is written to before being renamed into place.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// One of the remote products associated with a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProductKind {
    Image,
    Weight,
    Catalog,
    StarGalaxy,
    Segmentation,
    PhotoZ,
}

impl ProductKind {
    /// Products every tile needs before sources can be measured
    pub const MANDATORY: [ProductKind; 5] = [
        ProductKind::Image,
        ProductKind::Weight,
        ProductKind::Catalog,
        ProductKind::Segmentation,
        ProductKind::StarGalaxy,
    ];

    /// Remote paths to try in order, relative to the store root.
    pub fn remote_paths(&self, dataset: &str, tile: &TileId) -> Vec<String> {
        let id = tile.as_str();
        match self {
            ProductKind::Image => vec![format!("{dataset}/tiles_LSB_DR5/CFIS_LSB.{id}.r.fits")],
            ProductKind::Weight => {
                vec![format!("{dataset}/tiles_LSB_DR5/CFIS_LSB.{id}.r.weight.fits.fz")]
            }
            ProductKind::Catalog => vec![format!("{dataset}/tiles_DR5/CFIS.{id}.r.cog.cat")],
            ProductKind::StarGalaxy => vec![format!(
                "{dataset}/Processed_catalogues/StellarClass/stargal.cfis.r.dr5/tile.cats/CFIS.{id}.r.sg.fits"
            )],
            ProductKind::Segmentation => vec![format!("{dataset}/tiles_DR5/CFIS.{id}.r.seg.fits.fz")],
            ProductKind::PhotoZ => vec![
                format!("{dataset}/gaap/UNIONS.{id}_ugriz_photoz_ext.cat"),
                format!("{dataset}/gaap/UNIONS.{id}_ugri_photoz_ext.cat"),
            ],
        }
    }

    /// Local file name callers see (after decompression for compressed products).
    pub fn local_file_name(&self, tile: &TileId) -> String {
        let id = tile.as_str();
        match self {
            ProductKind::Image => format!("tile_{id}.fits"),
            ProductKind::Weight => format!("wht_{id}.fits"),
            ProductKind::Catalog => format!("cat_{id}.cat"),
            ProductKind::StarGalaxy => format!("sg_{id}.cat"),
            ProductKind::Segmentation => format!("seg_{id}.fits"),
            ProductKind::PhotoZ => format!("photoz_{id}_ugriz.cat"),
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, ProductKind::Weight | ProductKind::Segmentation)
    }

    /// Optional products never fail a tile
    pub fn is_optional(&self) -> bool {
        matches!(self, ProductKind::PhotoZ)
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProductKind::Image => "image",
            ProductKind::Weight => "weight",
            ProductKind::Catalog => "catalog",
            ProductKind::StarGalaxy => "star/galaxy catalog",
            ProductKind::Segmentation => "segmentation",
            ProductKind::PhotoZ => "photo-z catalog",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_convention() {
        let tile = TileId::parse("123.456").unwrap();
        assert_eq!(
            ProductKind::Image.remote_paths("cfis", &tile),
            vec!["cfis/tiles_LSB_DR5/CFIS_LSB.123.456.r.fits"]
        );
        assert_eq!(
            ProductKind::Weight.remote_paths("cfis", &tile),
            vec!["cfis/tiles_LSB_DR5/CFIS_LSB.123.456.r.weight.fits.fz"]
        );
        assert_eq!(
            ProductKind::Segmentation.remote_paths("cfis", &tile),
            vec!["cfis/tiles_DR5/CFIS.123.456.r.seg.fits.fz"]
        );
        assert_eq!(
            ProductKind::PhotoZ.remote_paths("cfis", &tile),
            vec![
                "cfis/gaap/UNIONS.123.456_ugriz_photoz_ext.cat",
                "cfis/gaap/UNIONS.123.456_ugri_photoz_ext.cat"
            ]
        );

        assert_eq!(ProductKind::Image.local_file_name(&tile), "tile_123.456.fits");
        assert_eq!(ProductKind::Weight.local_file_name(&tile), "wht_123.456.fits");
        assert_eq!(ProductKind::StarGalaxy.local_file_name(&tile), "sg_123.456.cat");
        assert_eq!(ProductKind::PhotoZ.local_file_name(&tile), "photoz_123.456_ugriz.cat");
    }

    #[test]
    fn test_compression_and_optionality() {
        let compressed: Vec<_> = ProductKind::MANDATORY
            .iter()
            .filter(|k| k.is_compressed())
            .collect();
        assert_eq!(
            compressed,
            vec![&ProductKind::Weight, &ProductKind::Segmentation]
        );
        assert!(ProductKind::PhotoZ.is_optional());
        assert!(!ProductKind::MANDATORY.iter().any(ProductKind::is_optional));
    }
}
