//! MCP server: the food log and recipe ideas as tools for AI assistants

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::*,
    ErrorData as McpError,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::ai::{MealType, OpenAiClient, RecipeSuggestor};
use crate::shared::{format_grams, internal_error, mcp_error};
use crate::storage::{FoodLog, LogEntry, Order};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FoodLogParams {
    #[schemars(description = "Maximum number of entries to return (default: all)")]
    pub limit: Option<usize>,
    #[schemars(description = "newest (default) or oldest first")]
    pub order: Option<Order>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EntryIdParams {
    #[schemars(description = "Log entry id, e.g. 1714000000_9f3a2b1c")]
    pub id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SuggestRecipesParams {
    #[schemars(description = "breakfast, lunch, dinner, snack or any (default)")]
    pub meal_type: Option<MealType>,
    #[schemars(description = "Number of recipes, 1-10 (default: 3)")]
    pub count: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DishIdeasParams {
    #[schemars(description = "breakfast, lunch, dinner, snack or any (default)")]
    pub meal_type: Option<MealType>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FullRecipeParams {
    #[schemars(description = "Name of the dish")]
    pub name: String,
    #[schemars(description = "Grams of each ingredient to use, e.g. {\"Rice\": 150}")]
    pub required_amounts: BTreeMap<String, f64>,
}

#[derive(Debug)]
pub struct FoodBotServer {
    pub tool_router: ToolRouter<Self>,
    log: Arc<FoodLog>,
    recipes: Option<Arc<RecipeSuggestor<OpenAiClient>>>,
}

impl FoodBotServer {
    pub fn new(
        log: Arc<FoodLog>,
        recipes: Option<Arc<RecipeSuggestor<OpenAiClient>>>,
        disabled: &[String],
    ) -> Self {
        let mut tool_router = Self::tool_router();

        for tool_name in disabled {
            if tool_router.has_route(tool_name) {
                tool_router.remove_route(tool_name);
                tracing::info!("Disabled tool: {}", tool_name);
            } else {
                tracing::warn!("Config disables unknown tool: {}", tool_name);
            }
        }

        Self {
            tool_router,
            log,
            recipes,
        }
    }

    fn suggestor(&self) -> Result<&RecipeSuggestor<OpenAiClient>, McpError> {
        self.recipes
            .as_deref()
            .ok_or_else(|| internal_error("Recipe tools need OPENAI_API_KEY to be set"))
    }
}

fn describe(entry: &LogEntry) -> String {
    let when = entry
        .timestamp
        .map_or_else(|| "undated".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
    let mut line = format!(
        "{}  {}  {}  {}",
        entry.id,
        when,
        entry.food_type,
        format_grams(entry.weight_grams)
    );
    if let Some(confidence) = entry.confidence {
        let _ = write!(line, "  ({:.0}% sure)", confidence * 100.0);
    }
    line
}

fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| internal_error(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

#[rmcp::tool_router]
impl FoodBotServer {
    #[rmcp::tool(description = "List logged food items with weight, time and identification confidence")]
    pub async fn get_food_log(
        &self,
        Parameters(params): Parameters<FoodLogParams>,
    ) -> Result<CallToolResult, McpError> {
        let entries = self
            .log
            .entries(params.limit, params.order.unwrap_or_default())
            .await
            .map_err(mcp_error)?;

        if entries.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                "The food log is empty.",
            )]));
        }

        let total: f64 = entries.iter().map(|e| e.weight_grams).sum();
        let mut output = format!(
            "{} entries, {} total:\n",
            entries.len(),
            format_grams(total)
        );
        for entry in &entries {
            output.push_str(&describe(entry));
            output.push('\n');
        }
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[rmcp::tool(description = "Get one food log entry by id, as JSON")]
    pub async fn get_log_entry(
        &self,
        Parameters(params): Parameters<EntryIdParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.log.entry(&params.id).await.map_err(mcp_error)? {
            Some(entry) => json_result(&entry),
            None => Err(McpError::invalid_params(
                format!("No log entry with id {}", params.id),
                None,
            )),
        }
    }

    #[rmcp::tool(description = "Delete a food log entry by id (the photo is kept)")]
    pub async fn delete_log_entry(
        &self,
        Parameters(params): Parameters<EntryIdParams>,
    ) -> Result<CallToolResult, McpError> {
        if self.log.delete_entry(&params.id).await.map_err(mcp_error)? {
            Ok(CallToolResult::success(vec![Content::text(format!(
                "Deleted {}",
                params.id
            ))]))
        } else {
            Err(McpError::invalid_params(
                format!("No log entry with id {}", params.id),
                None,
            ))
        }
    }

    #[rmcp::tool(description = "Suggest full recipes (ingredients, steps, timings) that use the logged food")]
    pub async fn suggest_recipes(
        &self,
        Parameters(params): Parameters<SuggestRecipesParams>,
    ) -> Result<CallToolResult, McpError> {
        let suggestor = self.suggestor()?;
        let ingredients = self.log.ingredients().await.map_err(mcp_error)?;
        let recipes = suggestor
            .suggest(
                &ingredients,
                params.meal_type.unwrap_or_default(),
                params.count.unwrap_or(crate::ai::recipes::DEFAULT_SUGGESTIONS),
            )
            .await
            .map_err(mcp_error)?;
        json_result(&recipes)
    }

    #[rmcp::tool(description = "Short dish ideas from the logged food, with grams of each ingredient needed")]
    pub async fn get_dish_ideas(
        &self,
        Parameters(params): Parameters<DishIdeasParams>,
    ) -> Result<CallToolResult, McpError> {
        let suggestor = self.suggestor()?;
        let ingredients = self.log.ingredients().await.map_err(mcp_error)?;
        let ideas = suggestor
            .dish_ideas(&ingredients, params.meal_type.unwrap_or_default())
            .await
            .map_err(mcp_error)?;
        json_result(&ideas)
    }

    #[rmcp::tool(description = "Write a detailed recipe for a named dish from given ingredient amounts")]
    pub async fn get_full_recipe(
        &self,
        Parameters(params): Parameters<FullRecipeParams>,
    ) -> Result<CallToolResult, McpError> {
        let recipe = self
            .suggestor()?
            .full_recipe(&params.name, &params.required_amounts)
            .await
            .map_err(mcp_error)?;
        json_result(&recipe)
    }
}

#[rmcp::tool_handler]
impl ServerHandler for FoodBotServer {
    fn get_info(&self) -> ServerInfo {
        let mut description = String::from("foodbot: a kitchen scale and camera that logs food.\n");
        description.push_str("- log: get_food_log, get_log_entry, delete_log_entry\n");
        if self.recipes.is_some() {
            description.push_str("- recipes: suggest_recipes, get_dish_ideas, get_full_recipe\n");
        }

        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewEntry;

    async fn server(dir: &std::path::Path) -> FoodBotServer {
        let log = FoodLog::open(dir.join("food_log.json")).await.unwrap();
        log.add_entry(NewEntry {
            food_type: "Avocado".to_string(),
            weight_grams: 170.0,
            image_path: "images/image_1.jpg".to_string(),
            confidence: Some(0.9),
            metadata: None,
        })
        .await
        .unwrap();
        FoodBotServer::new(Arc::new(log), None, &[])
    }

    fn text(result: &CallToolResult) -> String {
        let value = serde_json::to_value(result).unwrap();
        value["content"][0]["text"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_food_log_tool() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path()).await;

        let result = server
            .get_food_log(Parameters(FoodLogParams {
                limit: None,
                order: None,
            }))
            .await
            .unwrap();
        let output = text(&result);
        assert!(output.starts_with("1 entries, 170.0 g total"));
        assert!(output.contains("Avocado"));
        assert!(output.contains("(90% sure)"));
    }

    #[tokio::test]
    async fn test_entry_tools() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path()).await;
        let id = server.log.entries(None, Order::Newest).await.unwrap()[0]
            .id
            .clone();

        let result = server
            .get_log_entry(Parameters(EntryIdParams { id: id.clone() }))
            .await
            .unwrap();
        assert!(text(&result).contains("\"food_type\": \"Avocado\""));

        server
            .delete_log_entry(Parameters(EntryIdParams { id: id.clone() }))
            .await
            .unwrap();
        assert!(server
            .get_log_entry(Parameters(EntryIdParams { id }))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_recipe_tools_need_model() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path()).await;
        let result = server
            .get_dish_ideas(Parameters(DishIdeasParams { meal_type: None }))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_disabled_tools_removed() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(FoodLog::open(dir.path().join("food_log.json")).await.unwrap());
        let server = FoodBotServer::new(
            log,
            None,
            &["delete_log_entry".to_string(), "no_such_tool".to_string()],
        );
        assert!(!server.tool_router.has_route("delete_log_entry"));
        assert!(server.tool_router.has_route("get_food_log"));
    }
}
