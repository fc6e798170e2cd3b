//! Recipe ideas from what has been logged

use schemars::JsonSchema;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::client::LlmClient;
use super::extract;
use crate::error::{Error, Result};
use crate::storage::Ingredient;

pub const MAX_SUGGESTIONS: usize = 10;
pub const DEFAULT_SUGGESTIONS: usize = 3;
const DISH_IDEAS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
    #[default]
    Any,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
            MealType::Any => "any",
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            "any" | "" => Ok(MealType::Any),
            other => Err(Error::InvalidInput(format!(
                "Unknown meal type '{}', expected breakfast, lunch, dinner, snack or any",
                other
            ))),
        }
    }
}

impl TryFrom<String> for MealType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "description")]
    pub introduction: String,
    #[serde(default, deserialize_with = "text")]
    #[schemars(with = "String")]
    pub prep_time: String,
    #[serde(default, deserialize_with = "text")]
    #[schemars(with = "String")]
    pub cook_time: String,
    #[serde(default, deserialize_with = "text")]
    #[schemars(with = "String")]
    pub servings: String,
    #[serde(default, deserialize_with = "text_list")]
    #[schemars(with = "Vec<String>")]
    pub ingredients: Vec<String>,
    #[serde(default, deserialize_with = "text_list")]
    #[schemars(with = "Vec<String>")]
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutritional_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tips: Option<Value>,
}

/// A short idea, expanded later with [`RecipeSuggestor::full_recipe`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DishIdea {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "text_list")]
    #[schemars(with = "Vec<String>")]
    pub ingredients: Vec<String>,
    /// Grams of each logged ingredient the dish uses
    #[serde(default, deserialize_with = "gram_map")]
    #[schemars(with = "BTreeMap<String, f64>")]
    pub required_amounts: BTreeMap<String, f64>,
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Strings or numbers (`"servings": 2`)
fn text<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(value_text(Value::deserialize(d)?))
}

/// Lists whose items are sometimes objects instead of strings
fn text_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items.into_iter().map(value_text).collect(),
        Value::Null => Vec::new(),
        single => vec![value_text(single)],
    })
}

/// `{"rice": 150}` or `{"rice": "150g"}`; unreadable amounts are dropped
fn gram_map<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<BTreeMap<String, f64>, D::Error> {
    let raw = Option::<BTreeMap<String, Value>>::deserialize(d)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(name, amount)| {
            let grams = match amount {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().trim_end_matches('g').trim().parse().ok(),
                _ => None,
            }?;
            Some((name, grams))
        })
        .collect())
}

fn ingredient_lines(ingredients: &[Ingredient]) -> String {
    ingredients
        .iter()
        .map(|i| format!("- {}: {}g", i.food_type, i.weight_grams))
        .collect::<Vec<_>>()
        .join("\n")
}

fn amount_lines(amounts: &BTreeMap<String, f64>) -> String {
    amounts
        .iter()
        .map(|(name, grams)| format!("- {}: {}g", name, grams))
        .collect::<Vec<_>>()
        .join("\n")
}

fn suggestions_prompt(ingredients: &[Ingredient], meal_type: MealType, count: usize) -> String {
    format!(
        r#"Generate {count} full recipe ideas suitable for {meal_type} using mainly these ingredients:

Available Ingredients:
{lines}

For each recipe, provide the following details:
- Name
- Introduction/Description
- Preparation time (e.g., "15 minutes")
- Cooking time (e.g., "30 minutes")
- Servings (e.g., "2")
- Ingredients list (including amounts needed - try to use available ingredients but mention if others are needed)
- Step-by-step instructions
- Estimated nutritional information (optional, if possible)
- Tips or variations (optional)

Return the result ONLY as a JSON array of objects, where each object represents a full recipe with the following structure:
[{{
  "name": "Recipe Name",
  "introduction": "Brief description of the dish",
  "prepTime": "XX minutes",
  "cookTime": "XX minutes",
  "servings": "X",
  "ingredients": ["Ingredient 1 with measurement", "Ingredient 2 with measurement", ...],
  "instructions": ["Step 1", "Step 2", ...],
  "nutritionalInfo": "Optional: Calories, protein, etc.",
  "tips": "Optional: Additional tips"
}}]

Ensure the output is ONLY the JSON array, nothing before or after. Use the available ingredients where possible.
"#,
        lines = ingredient_lines(ingredients),
    )
}

fn dish_ideas_prompt(ingredients: &[Ingredient], meal_type: MealType) -> String {
    format!(
        r#"Suggest {DISH_IDEAS} dish ideas suitable for {meal_type} using these ingredients:

Available Ingredients:
{lines}

Keep each idea short. For each one, say how many grams of each available ingredient it needs.

Return ONLY a JSON array with this structure:
[{{
  "name": "Dish Name",
  "description": "One or two sentences about the dish",
  "ingredients": ["Ingredient 1", "Ingredient 2", ...],
  "requiredAmounts": {{"ingredient name": grams, ...}}
}}]
"#,
        lines = ingredient_lines(ingredients),
    )
}

fn full_recipe_prompt(name: &str, amounts: &BTreeMap<String, f64>) -> String {
    format!(
        r#"Create a detailed recipe for "{name}" using these ingredients:

{lines}

Include the following sections:
1. Introduction: A brief description of the dish
2. Preparation time
3. Cooking time
4. Servings
5. Ingredients (with measurements)
6. Step-by-step instructions
7. Nutritional information (estimate)
8. Tips and variations

Return the result as a JSON object with the following structure:
{{
  "name": "{name}",
  "introduction": "Brief description of the dish",
  "prepTime": "XX minutes",
  "cookTime": "XX minutes",
  "servings": "X",
  "ingredients": ["Ingredient 1 with measurement", "Ingredient 2 with measurement", ...],
  "instructions": ["Step 1", "Step 2", ...],
  "nutritionalInfo": "Calories, protein, carbs, fat information",
  "tips": "Additional tips and variations"
}}
"#,
        lines = amount_lines(amounts),
    )
}

fn has_name(value: &Value) -> bool {
    value
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|n| !n.trim().is_empty())
}

/// Named items from a reply that should be a JSON array, falling back to
/// loose objects when the array itself is broken
fn parse_named_list<T: DeserializeOwned>(reply: &str, what: &str) -> Result<Vec<T>> {
    let candidates = match extract::json_array(reply) {
        Some(items) => items,
        None => {
            let objects = extract::named_objects(reply);
            if !objects.is_empty() {
                tracing::warn!("Parsed individual {} objects, array was malformed", what);
            }
            objects
        }
    };

    let parsed: Vec<T> = candidates
        .into_iter()
        .filter(has_name)
        .filter_map(|v| match serde_json::from_value(v) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("Skipping malformed {}: {}", what, e);
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        return Err(Error::Parse {
            message: format!("Failed to parse {}", what),
            raw: reply.to_string(),
        });
    }
    Ok(parsed)
}

#[derive(Debug)]
pub struct RecipeSuggestor<C> {
    client: C,
}

impl<C: LlmClient> RecipeSuggestor<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Full recipes for the logged ingredients. `count` is clamped to 1..=10.
    pub async fn suggest(
        &self,
        ingredients: &[Ingredient],
        meal_type: MealType,
        count: usize,
    ) -> Result<Vec<Recipe>> {
        if ingredients.is_empty() {
            return Err(Error::EmptyLog);
        }
        let count = count.clamp(1, MAX_SUGGESTIONS);
        tracing::info!(
            "Requesting {} {} recipes from {} ingredients",
            count,
            meal_type,
            ingredients.len()
        );

        let reply = self
            .client
            .generate_with_text(
                "You are a creative chef specialized in generating detailed recipes based on available ingredients.",
                &suggestions_prompt(ingredients, meal_type, count),
                0.8,
                2000,
            )
            .await?;

        parse_named_list(&reply, "recipe suggestions")
    }

    pub async fn dish_ideas(
        &self,
        ingredients: &[Ingredient],
        meal_type: MealType,
    ) -> Result<Vec<DishIdea>> {
        if ingredients.is_empty() {
            return Err(Error::EmptyLog);
        }

        let reply = self
            .client
            .generate_with_text(
                "You are a creative chef who suggests simple dishes from what is in the kitchen.",
                &dish_ideas_prompt(ingredients, meal_type),
                0.8,
                1000,
            )
            .await?;

        parse_named_list(&reply, "dish ideas")
    }

    /// One detailed recipe for a dish idea
    pub async fn full_recipe(&self, name: &str, amounts: &BTreeMap<String, f64>) -> Result<Recipe> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Recipe name is required".to_string()));
        }
        if amounts.is_empty() {
            return Err(Error::InvalidInput(
                "At least one ingredient amount is required".to_string(),
            ));
        }

        let reply = self
            .client
            .generate_with_text(
                "You are a professional chef specialized in creating detailed recipes.",
                &full_recipe_prompt(name, amounts),
                0.7,
                1000,
            )
            .await?;

        let parse_error = || Error::Parse {
            message: "Failed to generate recipe".to_string(),
            raw: reply.clone(),
        };
        let map = extract::json_object(&reply).ok_or_else(parse_error)?;
        let mut recipe: Recipe =
            serde_json::from_value(Value::Object(map)).map_err(|_| parse_error())?;
        if recipe.name.trim().is_empty() {
            recipe.name = name.to_string();
        }
        Ok(recipe)
    }
}
