//! The consumer's side of the negotiation: which market classes buyers choose at given prices.
use super::grid_search::SalesDemandCandidate;
use crate::market_class::{MarketClassNode, MarketClassTree, get_market_class};
use crate::model::ModelParameters;
use crate::units::{Dimensionless, Miles};
use anyhow::{Context, Result};
use std::collections::HashMap;

/// Estimates consumer demand for each market class at the prices in a batch of grid rows
pub trait ConsumerDemand {
    /// Fill in `consumer_share_frac` and `consumer_abs_share_frac` for every class of every row.
    ///
    /// For each row, the absolute shares of the leaf classes must sum to one.
    fn demanded_shares(
        &self,
        year: u32,
        tree: &MarketClassTree,
        rows: &mut [SalesDemandCandidate],
    ) -> Result<()>;
}

/// Nested logit choice over the market class tree.
///
/// At each level of the tree, siblings split their parent's demand in proportion to
/// `share_weight * generalised_cost ^ logit_exponent`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogitConsumerDemand {
    logit_exponent: f64,
    consumer_fuel_miles: Miles,
}

impl LogitConsumerDemand {
    /// Create a new [`LogitConsumerDemand`]
    pub fn new(logit_exponent: f64, consumer_fuel_miles: Miles) -> Self {
        Self {
            logit_exponent,
            consumer_fuel_miles,
        }
    }

    /// Create a [`LogitConsumerDemand`] using a model's parameters
    pub fn from_parameters(parameters: &ModelParameters) -> Self {
        Self::new(parameters.logit_exponent, parameters.consumer_fuel_miles)
    }

    /// Split the demand for `node` between its children, returning the node's generalised cost.
    ///
    /// The share of each child within `node` is recorded in `node_shares`, keyed by path.
    fn split_node(
        &self,
        node: &MarketClassNode,
        tree: &MarketClassTree,
        row: &SalesDemandCandidate,
        node_shares: &mut HashMap<String, f64>,
    ) -> Result<f64> {
        if node.is_leaf() {
            let class = row
                .classes
                .get(node.path.as_str())
                .with_context(|| format!("No prices for market class '{}'", node.path))?;
            let fuel_cost = class.average_fuel_price * self.consumer_fuel_miles;
            return Ok((class.average_cost + fuel_cost).value());
        }

        let mut children = Vec::with_capacity(node.children.len());
        for child in node.children.values() {
            let cost = self.split_node(child, tree, row, node_shares)?;
            let share_weight = if child.is_leaf() {
                get_market_class(tree, &child.path)?.share_weight.value()
            } else {
                1.0
            };
            let weight = if cost > 0.0 {
                share_weight * cost.powf(self.logit_exponent)
            } else {
                0.0
            };
            children.push((child.path.as_str(), cost, weight));
        }

        let total_weight: f64 = children.iter().map(|(_, _, weight)| weight).sum();
        let mut node_cost = 0.0;
        for (path, cost, weight) in children.iter().copied() {
            let share = if total_weight > 0.0 && total_weight.is_finite() {
                weight / total_weight
            } else {
                1.0 / children.len() as f64
            };
            node_shares.insert(path.to_string(), share);
            node_cost += share * cost;
        }

        Ok(node_cost)
    }
}

impl ConsumerDemand for LogitConsumerDemand {
    fn demanded_shares(
        &self,
        _year: u32,
        tree: &MarketClassTree,
        rows: &mut [SalesDemandCandidate],
    ) -> Result<()> {
        let mut node_shares = HashMap::new();
        for row in rows {
            node_shares.clear();
            self.split_node(tree.root(), tree, row, &mut node_shares)?;

            for (id, class) in &mut row.classes {
                let share = node_shares[id.as_str()];

                // Product of the shares of every node along the path
                let mut abs_share = 1.0;
                let mut path = String::new();
                for segment in id.as_str().split('.') {
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(segment);
                    abs_share *= node_shares[&path];
                }

                class.consumer_share_frac = Dimensionless(share);
                class.consumer_abs_share_frac = Dimensionless(abs_share);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{market_class, market_class_tree};
    use crate::market_class::{FuelingClass, MarketClassID};
    use crate::simulation::grid_search::ClassDemand;
    use crate::units::{DollarsPerMile, DollarsPerVehicle};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn row_with_costs(costs: &[(&str, f64)]) -> SalesDemandCandidate {
        let classes = costs
            .iter()
            .map(|(id, cost)| {
                let class = ClassDemand {
                    average_cost: DollarsPerVehicle(*cost),
                    ..Default::default()
                };
                (MarketClassID::from(*id), class)
            })
            .collect();

        SalesDemandCandidate {
            classes,
            ..Default::default()
        }
    }

    fn logit() -> LogitConsumerDemand {
        LogitConsumerDemand::new(-8.0, Miles(75_000.0))
    }

    fn abs_shares(row: &SalesDemandCandidate) -> Vec<f64> {
        row.classes
            .values()
            .map(|class| class.consumer_abs_share_frac.value())
            .collect()
    }

    #[rstest]
    fn test_equal_costs(market_class_tree: MarketClassTree) {
        let mut rows = [row_with_costs(&[("hauling", 30_000.0), ("non_hauling", 30_000.0)])];
        logit()
            .demanded_shares(2020, &market_class_tree, &mut rows)
            .unwrap();
        for share in abs_shares(&rows[0]) {
            assert_approx_eq!(f64, share, 0.5);
        }
    }

    #[rstest]
    fn test_cheaper_class_preferred(market_class_tree: MarketClassTree) {
        let mut rows = [row_with_costs(&[("hauling", 40_000.0), ("non_hauling", 20_000.0)])];
        logit()
            .demanded_shares(2020, &market_class_tree, &mut rows)
            .unwrap();

        // Weights are 2^-8 to 1
        let expected = 1.0 / (1.0 + 2.0_f64.powi(8));
        let shares = abs_shares(&rows[0]);
        assert_approx_eq!(f64, shares[0], expected);
        assert_approx_eq!(f64, shares[0] + shares[1], 1.0);
    }

    #[rstest]
    fn test_fuel_cost_included(market_class_tree: MarketClassTree) {
        let mut rows = [row_with_costs(&[("hauling", 30_000.0), ("non_hauling", 30_000.0)])];
        rows[0].classes["hauling"].average_fuel_price = DollarsPerMile(0.1);
        logit()
            .demanded_shares(2020, &market_class_tree, &mut rows)
            .unwrap();
        let shares = abs_shares(&rows[0]);
        assert!(shares[0] < shares[1]);
    }

    #[rstest]
    fn test_zero_cost_class(market_class_tree: MarketClassTree) {
        // Classes without vehicles have no cost and get no demand
        let mut rows = [row_with_costs(&[("hauling", 0.0), ("non_hauling", 25_000.0)])];
        logit()
            .demanded_shares(2020, &market_class_tree, &mut rows)
            .unwrap();
        assert_eq!(abs_shares(&rows[0]), [0.0, 1.0]);
    }

    #[rstest]
    fn test_all_zero_cost(market_class_tree: MarketClassTree) {
        let mut rows = [row_with_costs(&[("hauling", 0.0), ("non_hauling", 0.0)])];
        logit()
            .demanded_shares(2020, &market_class_tree, &mut rows)
            .unwrap();
        assert_eq!(abs_shares(&rows[0]), [0.5, 0.5]);
    }

    #[test]
    fn test_share_weight() {
        let mut hauling = market_class("hauling", FuelingClass::ICE);
        hauling.share_weight = Dimensionless(3.0);
        let tree = MarketClassTree::from_market_classes([
            hauling,
            market_class("non_hauling", FuelingClass::ICE),
        ])
        .unwrap();

        let mut rows = [row_with_costs(&[("hauling", 30_000.0), ("non_hauling", 30_000.0)])];
        logit().demanded_shares(2020, &tree, &mut rows).unwrap();
        let shares = abs_shares(&rows[0]);
        assert_approx_eq!(f64, shares[0], 0.75);
    }

    #[test]
    fn test_nested_tree() {
        let tree = MarketClassTree::from_market_classes([
            market_class("hauling.BEV", FuelingClass::BEV),
            market_class("hauling.ICE", FuelingClass::ICE),
            market_class("non_hauling", FuelingClass::ICE),
        ])
        .unwrap();
        let mut rows = [row_with_costs(&[
            ("hauling.BEV", 30_000.0),
            ("hauling.ICE", 30_000.0),
            ("non_hauling", 30_000.0),
        ])];
        logit().demanded_shares(2020, &tree, &mut rows).unwrap();

        // hauling and non_hauling split evenly, then BEV and ICE split hauling's half
        let row = &rows[0];
        let bev = &row.classes["hauling.BEV"];
        assert_approx_eq!(f64, bev.consumer_share_frac.value(), 0.5);
        assert_approx_eq!(f64, bev.consumer_abs_share_frac.value(), 0.25);
        assert_approx_eq!(
            f64,
            row.classes["non_hauling"].consumer_abs_share_frac.value(),
            0.5
        );
        assert_approx_eq!(f64, abs_shares(row).iter().sum::<f64>(), 1.0);
    }

    #[rstest]
    fn test_missing_class(market_class_tree: MarketClassTree) {
        let mut rows = [row_with_costs(&[("hauling", 30_000.0)])];
        assert!(
            logit()
                .demanded_shares(2020, &market_class_tree, &mut rows)
                .is_err()
        );
    }
}
