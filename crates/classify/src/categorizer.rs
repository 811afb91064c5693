use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use jobrelay_core::{Compute, ComputeError, JobArgs};

use crate::preprocess::{normalize_fields, preprocess};

/// Category labels, indexed by class id.
pub const LABELS: [&str; 25] = [
    "Household",
    "Dairy",
    "galletas",
    "Beverages",
    "Meat/Poultry/Seafood",
    "bombones",
    "Other",
    "AlcoholicBeverages",
    "Snacks/Candy",
    "Canned/JarredGoods",
    "PersonalCare",
    "FrozenFoods",
    "Pasta/Grains",
    "Bakery",
    "Prepared/Ready-Made Foods",
    "Toys: Other",
    "Prepared/Ready-Made_Foods",
    "Electronics",
    "Baby",
    "Pet",
    "FreshProduce",
    "Toys",
    "Produce",
    "Vitamins: Other",
    "Medicines: Household",
];

/// Label used when no rule matches.
const FALLBACK_LABEL: &str = "Other";

/// Keyword rules; on equal scores the earlier rule wins.
const RULES: &[(&str, &[&str])] = &[
    ("Dairy", &["milk", "cheese", "yogurt", "yoghurt", "butter", "cream", "kefir"]),
    (
        "Bakery",
        &["bread", "bagel", "croissant", "muffin", "bun", "baguette", "cake", "tortilla"],
    ),
    ("galletas", &["galletas", "galleta", "cookie", "cookies", "biscuit", "biscuits", "cracker"]),
    ("bombones", &["bombones", "bombon", "praline", "truffle", "truffles"]),
    ("Beverages", &["water", "juice", "soda", "coffee", "tea", "cola", "lemonade"]),
    (
        "AlcoholicBeverages",
        &["beer", "wine", "vodka", "whiskey", "rum", "gin", "cider", "tequila"],
    ),
    (
        "Meat/Poultry/Seafood",
        &["chicken", "beef", "pork", "salmon", "tuna", "shrimp", "turkey", "ham", "sausage", "bacon"],
    ),
    ("Snacks/Candy", &["chips", "candy", "chocolate", "gummy", "popcorn", "pretzel", "snack"]),
    ("Canned/JarredGoods", &["canned", "jar", "beans", "soup", "sauce", "pickles"]),
    (
        "PersonalCare",
        &["shampoo", "soap", "toothpaste", "deodorant", "lotion", "conditioner", "razor"],
    ),
    ("FrozenFoods", &["frozen", "ice", "pizza"]),
    (
        "Pasta/Grains",
        &["pasta", "rice", "spaghetti", "noodles", "quinoa", "oats", "flour", "cereal"],
    ),
    (
        "Household",
        &["detergent", "bleach", "towel", "towels", "sponge", "trash", "cleaner", "tissue"],
    ),
    ("Electronics", &["battery", "batteries", "charger", "cable", "headphones", "usb"]),
    ("Baby", &["diaper", "diapers", "wipes", "formula", "infant"]),
    ("Pet", &["dog", "cat", "pet", "litter", "kibble"]),
    (
        "FreshProduce",
        &["apple", "banana", "tomato", "lettuce", "onion", "potato", "carrot", "avocado", "lemon"],
    ),
    ("Toys", &["toy", "toys", "lego", "puzzle", "doll"]),
    ("Prepared/Ready-Made Foods", &["sandwich", "salad", "sushi", "meal"]),
    ("Vitamins: Other", &["vitamin", "vitamins", "supplement", "multivitamin"]),
    ("Medicines: Household", &["aspirin", "ibuprofen", "paracetamol", "bandage", "antacid"]),
];

/// Result payload stored as the job output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPrediction {
    pub category: String,
    /// Preprocessed text the category was derived from.
    pub input: String,
}

#[derive(Debug)]
struct Rule {
    label: &'static str,
    keywords: HashSet<&'static str>,
}

/// Deterministic keyword categorizer for product name/brand text.
///
/// Model:
/// - Normalize fields (see [`preprocess`]) and split values into words.
/// - Score each category by how many words hit its keyword set.
/// - Highest score wins; no hits means `Other`.
///
/// Built once per worker process and shared by all worker threads.
#[derive(Debug)]
pub struct ProductCategorizer {
    rules: Vec<Rule>,
}

impl ProductCategorizer {
    pub fn new() -> Self {
        let rules: Vec<Rule> = RULES
            .iter()
            .map(|&(label, keywords)| Rule {
                label,
                keywords: keywords.iter().copied().collect(),
            })
            .collect();

        info!(labels = LABELS.len(), rules = rules.len(), "product categorizer ready");
        Self { rules }
    }

    pub fn predict(&self, args: &JobArgs) -> Result<CategoryPrediction, ComputeError> {
        let fields = normalize_fields(args);
        let words: Vec<&str> = fields
            .iter()
            .flat_map(|(_, value)| value.split(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return Err(ComputeError::invalid_input("no product text to categorize"));
        }

        let mut best: Option<(&'static str, usize)> = None;
        for rule in &self.rules {
            let score = words.iter().filter(|w| rule.keywords.contains(**w)).count();
            if score > 0 && best.is_none_or(|(_, top)| score > top) {
                best = Some((rule.label, score));
            }
        }

        let input = preprocess(args);
        let category = best.map_or(FALLBACK_LABEL, |(label, _)| label);
        debug!(%input, category, "categorized product");

        Ok(CategoryPrediction {
            category: category.to_string(),
            input,
        })
    }
}

impl Default for ProductCategorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Compute for ProductCategorizer {
    fn compute(&self, args: &JobArgs) -> Result<JsonValue, ComputeError> {
        let prediction = self.predict(args)?;
        serde_json::to_value(prediction).map_err(|e| ComputeError::failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(item_a: &str, item_b: &str) -> JobArgs {
        JobArgs::new().with("item_a", item_a).with("item_b", item_b)
    }

    fn category(args: &JobArgs) -> String {
        ProductCategorizer::new().predict(args).unwrap().category
    }

    #[test]
    fn bread_is_bakery() {
        let prediction = ProductCategorizer::new().predict(&form("Bread", "Acme")).unwrap();
        assert_eq!(prediction.category, "Bakery");
        assert_eq!(prediction.input, "product_name=bread product_brand=acme");
    }

    #[test]
    fn matching_is_case_and_punctuation_insensitive() {
        assert_eq!(category(&form("  SKIM-MILK 1L ", "Farmhouse")), "Dairy");
        assert_eq!(category(&form("Chicken, thighs", "")), "Meat/Poultry/Seafood");
    }

    #[test]
    fn most_hits_win() {
        // one Dairy hit, two Snacks/Candy hits
        assert_eq!(category(&form("chocolate milk candy", "")), "Snacks/Candy");
    }

    #[test]
    fn unknown_products_fall_back_to_other() {
        assert_eq!(category(&form("Jyoti", "Yadav")), "Other");
    }

    #[test]
    fn blank_input_is_rejected() {
        let categorizer = ProductCategorizer::new();
        assert!(matches!(
            categorizer.predict(&JobArgs::new()),
            Err(ComputeError::InvalidInput(_))
        ));
        assert!(matches!(
            categorizer.predict(&form("   ", " ")),
            Err(ComputeError::InvalidInput(_))
        ));
    }

    #[test]
    fn compute_output_is_json_prediction() {
        let output = ProductCategorizer::new().compute(&form("Pasta", "Barilla")).unwrap();
        assert_eq!(
            output,
            json!({ "category": "Pasta/Grains", "input": "product_name=pasta product_brand=barilla" })
        );
    }

    #[test]
    fn every_rule_maps_to_a_known_label() {
        for (label, _) in RULES {
            assert!(LABELS.contains(label), "{label} is not a known label");
        }
        assert!(LABELS.contains(&FALLBACK_LABEL));
    }
}
