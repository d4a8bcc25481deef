use crate::auth::AuthGate;
use crate::error::{ChefError, IntoChefError};
use crate::recipe::{NewRecipe, Recipe, RecipePatch};
use crate::store::{ChangeFeed, ChangeKind, ChangeSubscription, RecipeStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const RECIPE_COLUMNS: &str =
    "id, owner, title, category, servings, time, ingredients, steps, notes, tags, is_favorite, created_at";

/// Represents application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub api_base_url: String,  // Backend base URL hosting the edge functions (or an OpenAI-compatible /v1 base)
    pub chat_backend: String,  // "proxy" or "openai"
    pub model_name: String,    // Model used when talking to the provider directly
    pub temperature: f32,      // Sampling temperature for direct provider calls
    pub history_limit: usize,  // Turns resent per chat call, 0 = unbounded
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:54321".to_string(),
            chat_backend: "proxy".to_string(),
            model_name: crate::llm::DEFAULT_MODEL.to_string(),
            temperature: crate::llm::DEFAULT_TEMPERATURE,
            history_limit: 0,
        }
    }
}

impl Settings {
    /// Environment variables take precedence over stored settings
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("RECIPE_CHEF_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(backend) = std::env::var("RECIPE_CHEF_BACKEND") {
            self.chat_backend = backend;
        }
        if let Ok(model) = std::env::var("RECIPE_CHEF_MODEL") {
            self.model_name = model;
        }
        self
    }
}

/// Database manager for Recipe Chef
///
/// Handles all SQLite operations for recipe and settings persistence
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database connection and initialize tables
    pub fn new(db_path: PathBuf) -> Result<Self, ChefError> {
        log::info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)
            .map_chef_err(|e| ChefError::Store(format!("Failed to open database: {}", e)))?;

        let db = Database { conn };
        db.init_tables()?;

        log::info!("Database initialized successfully");

        Ok(db)
    }

    /// Create database tables if they don't exist
    fn init_tables(&self) -> Result<(), ChefError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner TEXT NOT NULL,
                    title TEXT NOT NULL,
                    category TEXT NOT NULL DEFAULT '',
                    servings TEXT NOT NULL DEFAULT '',
                    time TEXT NOT NULL DEFAULT '',
                    ingredients TEXT NOT NULL DEFAULT '',
                    steps TEXT NOT NULL DEFAULT '',
                    notes TEXT NOT NULL DEFAULT '',
                    tags TEXT NOT NULL DEFAULT '[]',
                    is_favorite INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_recipes_owner_created
                    ON recipes(owner, created_at);
                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );",
            )
            .map_chef_err(|e| ChefError::Store(format!("Failed to create tables: {}", e)))?;

        // Insert default settings if they don't exist
        let defaults = Settings::default();
        for (key, value) in Self::settings_pairs(&defaults) {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )
                .map_chef_err(|e| ChefError::Store(format!("Failed to insert default {}: {}", key, e)))?;
        }

        log::info!("Database tables initialized");

        Ok(())
    }

    fn settings_pairs(settings: &Settings) -> [(&'static str, String); 5] {
        [
            ("api_base_url", settings.api_base_url.clone()),
            ("chat_backend", settings.chat_backend.clone()),
            ("model_name", settings.model_name.clone()),
            ("temperature", settings.temperature.to_string()),
            ("history_limit", settings.history_limit.to_string()),
        ]
    }

    fn setting(&self, key: &str) -> Option<String> {
        self.conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .ok()
    }

    /// Load application settings, falling back to defaults per key
    pub fn load_settings(&self) -> Settings {
        let defaults = Settings::default();

        let settings = Settings {
            api_base_url: self.setting("api_base_url").unwrap_or(defaults.api_base_url),
            chat_backend: self.setting("chat_backend").unwrap_or(defaults.chat_backend),
            model_name: self.setting("model_name").unwrap_or(defaults.model_name),
            temperature: self
                .setting("temperature")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.temperature),
            history_limit: self
                .setting("history_limit")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.history_limit),
        };

        log::info!(
            "Loaded settings: api_base_url={}, backend={}, model={}, temperature={}, history_limit={}",
            settings.api_base_url,
            settings.chat_backend,
            settings.model_name,
            settings.temperature,
            settings.history_limit
        );

        settings
    }

    /// Save application settings to the database
    pub fn save_settings(&self, settings: &Settings) -> Result<(), ChefError> {
        for (key, value) in Self::settings_pairs(settings) {
            self.conn
                .execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )
                .map_chef_err(|e| ChefError::Store(format!("Failed to save {}: {}", key, e)))?;
        }

        log::info!("Saved settings");

        Ok(())
    }

    /// Load every recipe owned by `owner`, newest first
    pub fn list_recipes(&self, owner: &str) -> Result<Vec<Recipe>, ChefError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM recipes WHERE owner = ?1 ORDER BY created_at DESC, id DESC",
                RECIPE_COLUMNS
            ))
            .map_chef_err(|e| ChefError::Store(format!("Failed to prepare statement: {}", e)))?;

        let recipes = stmt
            .query_map(params![owner], recipe_from_row)
            .map_chef_err(ChefError::Store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_chef_err(ChefError::Store)?;

        log::info!("Loaded {} recipes for {}", recipes.len(), owner);

        Ok(recipes)
    }

    /// Insert a recipe; exactly one row per call
    pub fn insert_recipe(&self, owner: &str, recipe: &NewRecipe) -> Result<Recipe, ChefError> {
        let recipe = recipe.clone().normalized();
        // Stored with microsecond precision; keep the returned value identical
        let created_at = Utc::now().trunc_subsecs(6);
        let tags = serde_json::to_string(&recipe.tags)?;

        self.conn
            .execute(
                "INSERT INTO recipes
                    (owner, title, category, servings, time, ingredients, steps, notes, tags, is_favorite, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
                params![
                    owner,
                    recipe.title,
                    recipe.category,
                    recipe.servings,
                    recipe.time,
                    recipe.ingredients,
                    recipe.steps,
                    recipe.notes,
                    tags,
                    format_timestamp(&created_at),
                ],
            )
            .map_chef_err(ChefError::Store)?;

        let id = self.conn.last_insert_rowid();

        log::info!("Created recipe '{}' (id: {})", recipe.title, id);

        Ok(Recipe {
            id,
            owner: owner.to_string(),
            title: recipe.title,
            category: recipe.category,
            servings: recipe.servings,
            time: recipe.time,
            ingredients: recipe.ingredients,
            steps: recipe.steps,
            notes: recipe.notes,
            tags: recipe.tags,
            is_favorite: false,
            created_at,
        })
    }

    /// Apply a partial update; returns the number of rows touched
    pub fn update_recipe(&self, owner: &str, id: i64, patch: &RecipePatch) -> Result<usize, ChefError> {
        let mut assignments: Vec<(&'static str, Value)> = Vec::new();

        let text_fields = [
            ("title", &patch.title),
            ("category", &patch.category),
            ("servings", &patch.servings),
            ("time", &patch.time),
            ("ingredients", &patch.ingredients),
            ("steps", &patch.steps),
            ("notes", &patch.notes),
        ];
        for (column, value) in text_fields {
            if let Some(value) = value {
                assignments.push((column, Value::Text(value.clone())));
            }
        }
        if let Some(tags) = &patch.tags {
            assignments.push(("tags", Value::Text(serde_json::to_string(tags)?)));
        }
        if let Some(favorite) = patch.is_favorite {
            assignments.push(("is_favorite", Value::Integer(favorite as i64)));
        }

        if assignments.is_empty() {
            log::debug!("Empty patch for recipe {}, nothing to update", id);
            return Ok(0);
        }

        let set_clause = assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let n = assignments.len();
        let sql = format!(
            "UPDATE recipes SET {} WHERE id = ?{} AND owner = ?{}",
            set_clause,
            n + 1,
            n + 2
        );

        let mut values: Vec<Value> = assignments.into_iter().map(|(_, v)| v).collect();
        values.push(Value::Integer(id));
        values.push(Value::Text(owner.to_string()));

        let updated = self
            .conn
            .execute(&sql, params_from_iter(values))
            .map_chef_err(ChefError::Store)?;

        log::info!("Updated recipe {} ({} rows)", id, updated);

        Ok(updated)
    }

    pub fn delete_recipe(&self, owner: &str, id: i64) -> Result<usize, ChefError> {
        let deleted = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1 AND owner = ?2", params![id, owner])
            .map_chef_err(ChefError::Store)?;

        log::info!("Deleted recipe {} ({} rows)", id, deleted);

        Ok(deleted)
    }

    /// Get the total number of recipes across all owners
    pub fn count_recipes(&self) -> Result<i64, ChefError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM recipes", [], |row| row.get(0))
            .map_chef_err(|e| ChefError::Store(format!("Failed to count recipes: {}", e)))
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn recipe_from_row(row: &Row<'_>) -> rusqlite::Result<Recipe> {
    let tags: String = row.get(9)?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    let created_at: String = row.get(11)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?;

    Ok(Recipe {
        id: row.get(0)?,
        owner: row.get(1)?,
        title: row.get(2)?,
        category: row.get(3)?,
        servings: row.get(4)?,
        time: row.get(5)?,
        ingredients: row.get(6)?,
        steps: row.get(7)?,
        notes: row.get(8)?,
        tags,
        is_favorite: row.get(10)?,
        created_at,
    })
}

/// Get the path to the database file
///
/// `RECIPE_CHEF_DB` overrides the per-user data directory.
pub fn get_database_path() -> Result<PathBuf, ChefError> {
    if let Ok(path) = std::env::var("RECIPE_CHEF_DB") {
        return Ok(PathBuf::from(path));
    }

    let mut db_path = dirs::data_local_dir()
        .ok_or_else(|| ChefError::Config("Failed to get local data directory".to_string()))?;

    db_path.push("com.recipe-chef");
    db_path.push("recipes.db");

    Ok(db_path)
}

/// Thread-safe database wrapper shared between the store and settings access
pub type DatabaseState = Arc<Mutex<Database>>;

/// [`RecipeStore`] backed by the local SQLite database
///
/// Rows are scoped to the signed-in owner and every successful mutation is
/// published on the change feed.
pub struct SqliteRecipeStore {
    db: DatabaseState,
    auth: AuthGate,
    feed: ChangeFeed,
}

impl SqliteRecipeStore {
    pub fn new(db: DatabaseState, auth: AuthGate) -> Self {
        Self {
            db,
            auth,
            feed: ChangeFeed::new(),
        }
    }
}

#[async_trait]
impl RecipeStore for SqliteRecipeStore {
    async fn list(&self) -> Result<Vec<Recipe>, ChefError> {
        let session = self.auth.current()?;
        let db = self.db.lock().await;
        db.list_recipes(&session.user_id)
    }

    async fn create(&self, recipe: NewRecipe) -> Result<Recipe, ChefError> {
        let session = self.auth.current()?;
        let created = {
            let db = self.db.lock().await;
            db.insert_recipe(&session.user_id, &recipe)?
        };
        self.feed.publish(ChangeKind::Insert, created.id);
        Ok(created)
    }

    async fn update(&self, id: i64, patch: RecipePatch) -> Result<(), ChefError> {
        let session = self.auth.current()?;
        if patch.is_empty() {
            return Ok(());
        }

        let updated = {
            let db = self.db.lock().await;
            db.update_recipe(&session.user_id, id, &patch)?
        };
        if updated == 0 {
            log::warn!("Update of recipe {} matched no rows", id);
            return Err(ChefError::Store(format!("Recipe {} not found", id)));
        }

        self.feed.publish(ChangeKind::Update, id);
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), ChefError> {
        let session = self.auth.current()?;
        let deleted = {
            let db = self.db.lock().await;
            db.delete_recipe(&session.user_id, id)?
        };
        if deleted == 0 {
            log::warn!("Delete of recipe {} matched no rows", id);
            return Err(ChefError::Store(format!("Recipe {} not found", id)));
        }

        self.feed.publish(ChangeKind::Delete, id);
        Ok(())
    }

    fn subscribe(&self) -> ChangeSubscription {
        self.feed.subscribe()
    }
}
