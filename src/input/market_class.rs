//! Code for reading market classes from a CSV file.
use super::*;
use crate::market_class::{FuelingClass, MarketClass, MarketClassTree};
use anyhow::ensure;
use serde::Deserialize;

const MARKET_CLASSES_FILE_NAME: &str = "market_classes.csv";

/// A market class as it appears in the input file
#[derive(Debug, PartialEq, Deserialize)]
struct MarketClassRaw {
    market_class_id: String,
    fueling_class: FuelingClass,
    share_weight: f64,
    #[serde(deserialize_with = "deserialise_proportion")]
    min_share: Dimensionless,
    #[serde(deserialize_with = "deserialise_proportion")]
    max_share: Dimensionless,
}

/// Read the market class hierarchy from the model directory.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
///
/// # Returns
///
/// A [`MarketClassTree`] containing every leaf market class or an error.
pub fn read_market_classes(model_dir: &Path) -> Result<MarketClassTree> {
    let file_path = model_dir.join(MARKET_CLASSES_FILE_NAME);
    let raw = read_csv(&file_path)?;
    read_market_classes_from_iter(raw).with_context(|| input_err_msg(&file_path))
}

fn read_market_classes_from_iter<I>(iter: I) -> Result<MarketClassTree>
where
    I: IntoIterator<Item = MarketClassRaw>,
{
    let mut market_classes = Vec::new();
    for raw in iter {
        ensure!(
            raw.share_weight.is_finite() && raw.share_weight > 0.0,
            "share_weight for market class {} must be a finite number greater than zero",
            raw.market_class_id
        );
        ensure!(
            raw.min_share <= raw.max_share,
            "min_share for market class {} cannot be greater than max_share",
            raw.market_class_id
        );

        market_classes.push(MarketClass {
            id: raw.market_class_id.into(),
            fueling_class: raw.fueling_class,
            share_weight: Dimensionless(raw.share_weight),
            min_share: raw.min_share,
            max_share: raw.max_share,
        });
    }

    let min_total: f64 = market_classes.iter().map(|mc| mc.min_share.value()).sum();
    let max_total: f64 = market_classes.iter().map(|mc| mc.max_share.value()).sum();
    ensure!(
        min_total <= 1.0 && max_total >= 1.0,
        "Market class share limits must allow shares which sum to one"
    );

    MarketClassTree::from_market_classes(market_classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn raw(id: &str, min_share: f64, max_share: f64) -> MarketClassRaw {
        MarketClassRaw {
            market_class_id: id.to_string(),
            fueling_class: FuelingClass::ICE,
            share_weight: 1.0,
            min_share: Dimensionless(min_share),
            max_share: Dimensionless(max_share),
        }
    }

    #[test]
    fn test_read_market_classes() {
        let dir = tempdir().unwrap();
        {
            let mut file = File::create(dir.path().join(MARKET_CLASSES_FILE_NAME)).unwrap();
            writeln!(
                file,
                "market_class_id,fueling_class,share_weight,min_share,max_share
hauling.BEV,BEV,0.8,0,1
hauling.ICE,ICE,1,0,1
non_hauling,ICE,1,0,1"
            )
            .unwrap();
        }

        let tree = read_market_classes(dir.path()).unwrap();
        assert_eq!(tree.len(), 3);
        let bev = tree.get("hauling.BEV").unwrap();
        assert_eq!(bev.fueling_class, FuelingClass::BEV);
        assert_eq!(bev.share_weight, Dimensionless(0.8));
    }

    #[test]
    fn test_read_market_classes_bad_limits() {
        assert_error!(
            read_market_classes_from_iter([raw("a", 0.6, 0.5)]),
            "min_share for market class a cannot be greater than max_share"
        );
        assert_error!(
            read_market_classes_from_iter([raw("a", 0.0, 0.4), raw("b", 0.0, 0.4)]),
            "Market class share limits must allow shares which sum to one"
        );
    }

    #[test]
    fn test_read_market_classes_bad_weight() {
        let mut bad = raw("a", 0.0, 1.0);
        bad.share_weight = 0.0;
        assert_error!(
            read_market_classes_from_iter([bad]),
            "share_weight for market class a must be a finite number greater than zero"
        );
    }
}
