//! Code for reading manufacturers from a CSV file.
use super::*;
use crate::manufacturer::{Manufacturer, ManufacturerMap};
use anyhow::ensure;

const MANUFACTURERS_FILE_NAME: &str = "manufacturers.csv";

/// Read manufacturers from the model directory.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
///
/// # Returns
///
/// A map of manufacturers keyed by ID or an error.
pub fn read_manufacturers(model_dir: &Path) -> Result<ManufacturerMap> {
    let file_path = model_dir.join(MANUFACTURERS_FILE_NAME);
    let manufacturers = read_csv(&file_path)?;
    read_manufacturers_from_iter(manufacturers).with_context(|| input_err_msg(&file_path))
}

fn read_manufacturers_from_iter<I>(iter: I) -> Result<ManufacturerMap>
where
    I: IntoIterator<Item = Manufacturer>,
{
    let mut manufacturers = ManufacturerMap::new();
    for manufacturer in iter {
        ensure!(
            manufacturer.market_share.is_finite()
                && (0.0..=1.0).contains(&manufacturer.market_share.value()),
            "market_share for manufacturer {} must be between 0 and 1",
            manufacturer.id
        );

        let id = manufacturer.id.clone();
        ensure!(
            manufacturers.insert(id.clone(), manufacturer).is_none(),
            "Duplicate manufacturer ID {id}"
        );
    }

    let total_share: f64 = manufacturers
        .values()
        .map(|m| m.market_share.value())
        .sum();
    ensure!(
        total_share <= 1.0 + 1e-6,
        "Manufacturer market shares sum to more than one ({total_share})"
    );

    Ok(manufacturers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn manufacturer(id: &str, market_share: f64) -> Manufacturer {
        Manufacturer {
            id: id.into(),
            description: String::new(),
            market_share: Dimensionless(market_share),
        }
    }

    #[test]
    fn test_read_manufacturers() {
        let dir = tempdir().unwrap();
        {
            let mut file = File::create(dir.path().join(MANUFACTURERS_FILE_NAME)).unwrap();
            writeln!(
                file,
                "id,description,market_share
OEM_A,First manufacturer,0.6
OEM_B,Second manufacturer,0.4"
            )
            .unwrap();
        }

        let manufacturers = read_manufacturers(dir.path()).unwrap();
        assert_eq!(
            manufacturers.keys().map(|id| id.as_str()).collect::<Vec<_>>(),
            ["OEM_A", "OEM_B"]
        );
        assert_eq!(manufacturers["OEM_A"].market_share, Dimensionless(0.6));
    }

    #[test]
    fn test_read_manufacturers_duplicate() {
        assert_error!(
            read_manufacturers_from_iter([manufacturer("a", 0.1), manufacturer("a", 0.1)]),
            "Duplicate manufacturer ID a"
        );
    }

    #[test]
    fn test_read_manufacturers_bad_share() {
        assert_error!(
            read_manufacturers_from_iter([manufacturer("a", 1.5)]),
            "market_share for manufacturer a must be between 0 and 1"
        );
        assert_error!(
            read_manufacturers_from_iter([manufacturer("a", 0.7), manufacturer("b", 0.7)]),
            "Manufacturer market shares sum to more than one (1.4)"
        );
    }
}
