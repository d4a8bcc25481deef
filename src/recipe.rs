use crate::error::ChefError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Stored when a recipe arrives without a title
pub const UNTITLED: &str = "Без названия";

/// A persisted recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub owner: String,
    pub title: String,
    pub category: String,
    pub servings: String,
    pub time: String,
    /// Newline-delimited ingredient lines
    pub ingredients: String,
    /// Newline-delimited step lines
    pub steps: String,
    pub notes: String,
    pub tags: BTreeSet<String>,
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
}

impl Recipe {
    pub fn ingredient_lines(&self) -> Vec<&str> {
        non_empty_lines(&self.ingredients)
    }

    pub fn step_lines(&self) -> Vec<&str> {
        non_empty_lines(&self.steps)
    }
}

fn non_empty_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Fields supplied on creation; id, owner, timestamp and favorite flag are
/// assigned by the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecipe {
    pub title: String,
    pub category: String,
    pub servings: String,
    pub time: String,
    pub ingredients: String,
    pub steps: String,
    pub notes: String,
    pub tags: BTreeSet<String>,
}

impl NewRecipe {
    /// Apply insert defaults
    pub fn normalized(mut self) -> Self {
        if self.title.trim().is_empty() {
            self.title = UNTITLED.to_string();
        }
        self
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipePatch {
    pub title: Option<String>,
    pub category: Option<String>,
    pub servings: Option<String>,
    pub time: Option<String>,
    pub ingredients: Option<String>,
    pub steps: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub is_favorite: Option<bool>,
}

impl RecipePatch {
    pub fn favorite(value: bool) -> Self {
        Self {
            is_favorite: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Set one text field by name; `tags` takes a comma-separated list
    pub fn with_field(mut self, field: &str, value: &str) -> Result<Self, ChefError> {
        let value = value.trim().to_string();
        match field {
            "title" => self.title = Some(value),
            "category" => self.category = Some(value),
            "servings" => self.servings = Some(value),
            "time" => self.time = Some(value),
            "ingredients" => self.ingredients = Some(value),
            "steps" => self.steps = Some(value),
            "notes" => self.notes = Some(value),
            "tags" => {
                self.tags = Some(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            other => {
                return Err(ChefError::Validation(format!(
                    "Unknown recipe field: {}. Must be one of: title, category, servings, time, ingredients, steps, notes, tags",
                    other
                )))
            }
        }
        Ok(self)
    }
}

/// Raw input from the manual entry form
#[derive(Debug, Clone, Default)]
pub struct ManualRecipeForm {
    pub title: String,
    pub category: String,
    pub servings: String,
    pub time: String,
    pub ingredients: String,
    pub steps: String,
    pub notes: String,
}

impl ManualRecipeForm {
    /// Trim every field and require title, ingredients and steps
    pub fn validate(&self) -> Result<NewRecipe, ChefError> {
        let title = self.title.trim();
        let ingredients = self.ingredients.trim();
        let steps = self.steps.trim();

        if title.is_empty() {
            return Err(ChefError::Validation("Укажите название блюда".to_string()));
        }
        if ingredients.is_empty() {
            return Err(ChefError::Validation("Укажите ингредиенты".to_string()));
        }
        if steps.is_empty() {
            return Err(ChefError::Validation("Укажите шаги приготовления".to_string()));
        }

        Ok(NewRecipe {
            title: title.to_string(),
            category: self.category.trim().to_string(),
            servings: self.servings.trim().to_string(),
            time: self.time.trim().to_string(),
            ingredients: ingredients.to_string(),
            steps: steps.to_string(),
            notes: self.notes.trim().to_string(),
            tags: BTreeSet::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> ManualRecipeForm {
        ManualRecipeForm {
            title: "  Сырники ".to_string(),
            category: "Завтрак".to_string(),
            servings: "2".to_string(),
            time: "20 мин".to_string(),
            ingredients: "300 г творога\n1 яйцо\n".to_string(),
            steps: "Смешай 300 г творога и 1 яйцо.".to_string(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_manual_form_trims() {
        let recipe = form().validate().unwrap();
        assert_eq!(recipe.title, "Сырники");
        assert_eq!(recipe.ingredients, "300 г творога\n1 яйцо");
        assert!(recipe.tags.is_empty());
    }

    #[test]
    fn test_manual_form_requires_fields() {
        let mut missing_title = form();
        missing_title.title = "   ".to_string();
        assert!(matches!(missing_title.validate(), Err(ChefError::Validation(m)) if m == "Укажите название блюда"));

        let mut missing_ingredients = form();
        missing_ingredients.ingredients.clear();
        assert!(missing_ingredients.validate().is_err());

        let mut missing_steps = form();
        missing_steps.steps = "\n".to_string();
        assert!(missing_steps.validate().is_err());
    }

    #[test]
    fn test_untitled_default() {
        let recipe = NewRecipe::default().normalized();
        assert_eq!(recipe.title, UNTITLED);
    }

    #[test]
    fn test_patch_helpers() {
        assert!(RecipePatch::default().is_empty());
        assert!(!RecipePatch::favorite(true).is_empty());
    }

    #[test]
    fn test_patch_with_field() {
        let patch = RecipePatch::default()
            .with_field("title", " Сырники со сметаной ")
            .unwrap()
            .with_field("tags", "завтрак, ,сладкое")
            .unwrap();

        assert_eq!(patch.title.as_deref(), Some("Сырники со сметаной"));
        assert_eq!(patch.tags.unwrap().len(), 2);
        assert_eq!(patch.is_favorite, None);

        assert!(matches!(
            RecipePatch::default().with_field("id", "5"),
            Err(ChefError::Validation(_))
        ));
    }
}
