//! Recipe extraction protocol
//!
//! Asks the assistant to restate the conversation as a single JSON object,
//! reads that object into a [`NewRecipe`] and persists it. Only the shape of
//! the reply is enforced; whether steps really carry exact quantities is left
//! to the model and never checked here.
//!
//! Field typing is lenient. Strings pass through untouched, numbers and
//! booleans are stringified, `null` or a missing key becomes the default, and
//! arrays are joined with newlines. A string given where a list was asked for
//! is kept as-is. Only a non-object reply, or an object nested where text is
//! expected, fails the attempt.

use crate::conversation::{Conversation, Role};
use crate::error::ChefError;
use crate::llm::{reply_or_empty, ChatBackend};
use crate::recipe::{NewRecipe, Recipe};
use crate::store::RecipeStore;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Sent as a user turn to make the assistant emit the final recipe
pub const FINALIZE_INSTRUCTION: &str = r#"Собери итоговый рецепт по нашей переписке.
ВАЖНО: В массиве steps каждый шаг должен содержать ТОЧНЫЕ количества ингредиентов.
Например: "Взбей 3 яйца со 180 г сахара до пышности" вместо "Взбей яйца с сахаром".

Верни ТОЛЬКО валидный JSON (без пояснений) со структурой:
{
  "title": "Название блюда",
  "category": "категория",
  "servings": "4",
  "time": "45 мин",
  "ingredients": ["3 яйца", "180 г сахара"],
  "steps": ["Взбей 3 яйца со 180 г сахара до пышности."],
  "notes": "Советы",
  "tags": ["тег1"]
}"#;

/// Shown while the finalize request is in flight
pub const FINALIZE_NOTICE: &str = "Формирую рецепт…";

/// Appended to the conversation once the recipe is stored
pub const CONFIRMATION: &str = "✅ Рецепт добавлен в каталог!";

/// Shown when the reply could not be turned into a recipe
pub const EXTRACTION_FAILED_NOTICE: &str = "❌ Не удалось создать рецепт. Попробуй ещё раз.";

/// Remove Markdown fence markers the model may wrap around the JSON
pub fn strip_code_fences(reply: &str) -> String {
    reply.replace("```json", "").replace("```", "").trim().to_string()
}

/// Read a finalize reply into a creatable recipe with defaults filled in
pub fn parse_recipe_reply(reply: &str) -> Result<NewRecipe, ChefError> {
    let text = strip_code_fences(reply);

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| ChefError::ExtractionFailed(format!("reply is not JSON: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| ChefError::ExtractionFailed("reply is not a JSON object".to_string()))?;

    recipe_from_object(object)
}

/// Read an import file: a JSON array of recipe objects, or a single object
///
/// Fields are coerced the same way as a finalize reply.
pub fn parse_recipe_batch(text: &str) -> Result<Vec<NewRecipe>, ChefError> {
    let invalid = |detail: String| ChefError::Validation(format!("Invalid import file: {}", detail));

    let value: Value = serde_json::from_str(text.trim()).map_err(|e| invalid(e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => return Err(invalid("expected an array of recipes".to_string())),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let object = item
                .as_object()
                .ok_or_else(|| invalid(format!("entry {} is not an object", i + 1)))?;
            recipe_from_object(object).map_err(|e| invalid(format!("entry {}: {}", i + 1, e)))
        })
        .collect()
}

fn recipe_from_object(object: &Map<String, Value>) -> Result<NewRecipe, ChefError> {
    let recipe = NewRecipe {
        title: text_field(object, "title")?,
        category: text_field(object, "category")?,
        servings: text_field(object, "servings")?,
        time: text_field(object, "time")?,
        ingredients: text_field(object, "ingredients")?,
        steps: text_field(object, "steps")?,
        notes: text_field(object, "notes")?,
        tags: tag_field(object)?,
    };

    Ok(recipe.normalized())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn shape_error(key: &str) -> ChefError {
    ChefError::ExtractionFailed(format!("field '{}' has an unexpected shape", key))
}

/// Text form of a field; arrays become newline-delimited lines
fn text_field(object: &Map<String, Value>, key: &str) -> Result<String, ChefError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::Array(items)) => {
            let mut lines = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Null => continue,
                    other => lines.push(scalar_text(other).ok_or_else(|| shape_error(key))?),
                }
            }
            Ok(lines.join("\n"))
        }
        Some(other) => scalar_text(other).ok_or_else(|| shape_error(key)),
    }
}

fn tag_field(object: &Map<String, Value>) -> Result<BTreeSet<String>, ChefError> {
    let raw: Vec<String> = match object.get("tags") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => {
            let mut tags = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Null => continue,
                    other => tags.push(scalar_text(other).ok_or_else(|| shape_error("tags"))?),
                }
            }
            tags
        }
        Some(other) => vec![scalar_text(other).ok_or_else(|| shape_error("tags"))?],
    };

    Ok(raw
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

/// Drive the conversation to a structured recipe and persist it
///
/// No retries: a failed parse reports `ExtractionFailed` and creates
/// nothing, and store errors propagate unchanged. The confirmation turn is
/// appended only after the store accepted the recipe.
pub async fn finalize_recipe(
    conversation: &mut Conversation,
    chat: &dyn ChatBackend,
    store: &dyn RecipeStore,
) -> Result<Recipe, ChefError> {
    log::info!("Finalizing recipe from {} turns", conversation.turns().len());

    conversation.append(Role::User, FINALIZE_INSTRUCTION)?;

    let reply = reply_or_empty(chat.send(&conversation.snapshot()).await)?;
    log::debug!("Finalize reply: {}", reply);

    let draft = parse_recipe_reply(&reply).map_err(|e| {
        log::warn!("Discarding finalize reply: {}", e);
        e
    })?;

    let recipe = store.create(draft).await?;
    conversation.append(Role::Assistant, CONFIRMATION)?;

    log::info!("Recipe '{}' stored with id {}", recipe.title, recipe.id);

    Ok(recipe)
}
