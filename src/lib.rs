pub mod assistant;
pub mod auth;
pub mod catalog;
pub mod conversation;
pub mod database;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod recipe;
pub mod secrets;
pub mod store;
pub mod transcription;

#[cfg(test)]
mod testing;

use assistant::{KitchenAssistant, VoiceOutcome, NOTHING_RECOGNIZED};
use auth::{AuthGate, Session};
use catalog::{spawn_reconciler, CatalogViewModel, FilterState, EMPTY_STATE};
use conversation::Conversation;
use database::{get_database_path, Database, Settings, SqliteRecipeStore};
use error::ChefError;
use extraction::{parse_recipe_batch, CONFIRMATION, EXTRACTION_FAILED_NOTICE, FINALIZE_NOTICE};
use llm::{ChatBackend, OpenAiChatClient, ProxyChatClient};
use recipe::{ManualRecipeForm, Recipe, RecipePatch};
use secrets::{delete_api_key, resolve_api_key, save_api_key, ApiKey};
use std::path::Path;
use std::sync::Arc;
use store::{import_recipes, RecipeStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use transcription::{AudioClip, ProxyTranscriber};

/// Build the chat backend selected in settings
fn build_chat_backend(
    settings: &Settings,
    anon_key: &str,
    provider_key: &str,
    auth: &AuthGate,
) -> Result<Arc<dyn ChatBackend>, ChefError> {
    let provider_key = Some(provider_key.to_string()).filter(|k| !k.is_empty());

    match settings.chat_backend.as_str() {
        "proxy" => Ok(Arc::new(ProxyChatClient::new(
            &settings.api_base_url,
            anon_key.to_string(),
            provider_key,
            auth.clone(),
        )?)),
        "openai" => Ok(Arc::new(
            OpenAiChatClient::new(
                &settings.api_base_url,
                settings.model_name.clone(),
                provider_key,
                auth.clone(),
            )?
            .with_temperature(settings.temperature),
        )),
        other => Err(ChefError::Config(format!(
            "Invalid chat backend: {}. Must be one of: proxy, openai",
            other
        ))),
    }
}

fn session_from_env() -> Result<Session, ChefError> {
    let user_id = std::env::var("RECIPE_CHEF_USER").map_err(|_| ChefError::Authentication)?;
    let token = std::env::var("RECIPE_CHEF_TOKEN").unwrap_or_default();
    let session = Session::new(user_id, token);

    match std::env::var("RECIPE_CHEF_EMAIL") {
        Ok(email) => {
            let password = std::env::var("RECIPE_CHEF_PASSWORD").unwrap_or_default();
            session.with_credentials(&email, &password)
        }
        Err(_) => Ok(session),
    }
}

fn print_recipe(recipe: &Recipe) {
    let star = if recipe.is_favorite { "★" } else { "☆" };
    let or_dash = |s: &str| if s.is_empty() { "—".to_string() } else { s.to_string() };

    println!("#{} {} {}", recipe.id, star, recipe.title);
    println!(
        "   ⏱ {}  🍽 {}  {}",
        or_dash(&recipe.time),
        or_dash(&recipe.servings),
        or_dash(&recipe.category)
    );
    for line in recipe.ingredient_lines() {
        println!("   • {}", line);
    }
    for (i, line) in recipe.step_lines().iter().enumerate() {
        println!("   {}. {}", i + 1, line);
    }
}

async fn print_catalog(catalog: &CatalogViewModel) {
    let visible = catalog.visible().await;
    if visible.is_empty() {
        println!("🍽️ {}", EMPTY_STATE);
        return;
    }
    for recipe in &visible {
        print_recipe(recipe);
    }
}

fn parse_id(arg: &str) -> Result<i64, ChefError> {
    arg.trim()
        .parse()
        .map_err(|_| ChefError::Validation(format!("Invalid recipe id: {}", arg)))
}

/// `title | category | time | servings | ingredients | steps | notes`,
/// with `;` separating lines inside ingredients and steps
fn parse_manual_form(arg: &str) -> ManualRecipeForm {
    let mut fields = arg.split('|').map(str::trim);
    let mut next = || fields.next().unwrap_or_default().to_string();
    let lines = |text: String| text.split(';').map(str::trim).collect::<Vec<_>>().join("\n");

    ManualRecipeForm {
        title: next(),
        category: next(),
        time: next(),
        servings: next(),
        ingredients: lines(next()),
        steps: lines(next()),
        notes: next(),
    }
}

/// `<id> field=value | field=value ...`
fn parse_edit(arg: &str) -> Result<(i64, RecipePatch), ChefError> {
    let (id, assignments) = arg
        .split_once(' ')
        .ok_or_else(|| ChefError::Validation("Usage: /edit <id> field=value | ...".to_string()))?;

    let mut patch = RecipePatch::default();
    for assignment in assignments.split('|') {
        let (field, value) = assignment
            .split_once('=')
            .ok_or_else(|| ChefError::Validation(format!("Expected field=value, got: {}", assignment.trim())))?;
        patch = patch.with_field(field.trim(), value)?;
    }

    Ok((parse_id(id)?, patch))
}

fn parse_key_name(name: &str) -> Result<ApiKey, ChefError> {
    match name {
        "anon" => Ok(ApiKey::BackendAnon),
        "openai" => Ok(ApiKey::OpenAi),
        other => Err(ChefError::Validation(format!(
            "Unknown key: {}. Must be one of: anon, openai",
            other
        ))),
    }
}

/// Handle one input line; returns `false` when the user asked to quit
async fn handle_line(
    line: &str,
    assistant: &KitchenAssistant,
    catalog: &CatalogViewModel,
    store: &dyn RecipeStore,
) -> Result<bool, ChefError> {
    let line = line.trim();
    let (command, arg) = match line.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command {
        "/quit" => return Ok(false),
        "/build" => {
            println!("> {}", FINALIZE_NOTICE);
            match assistant.build_recipe().await {
                Ok(recipe) => {
                    println!("{}", CONFIRMATION);
                    print_recipe(&recipe);
                }
                Err(ChefError::ExtractionFailed(detail)) => {
                    log::warn!("Extraction failed: {}", detail);
                    println!("{}", EXTRACTION_FAILED_NOTICE);
                }
                Err(e) => return Err(e),
            }
        }
        "/voice" => {
            let clip = AudioClip::from_file(Path::new(arg))?;
            println!("> [Голосовое: распознаю…]");
            match assistant.send_voice(&clip).await? {
                VoiceOutcome::NothingRecognized => println!("{}", NOTHING_RECOGNIZED),
                VoiceOutcome::Replied { transcript, reply } => {
                    println!("> {}", transcript);
                    println!("{}", reply);
                }
            }
        }
        "/list" => {
            catalog.reload().await?;
            print_catalog(catalog).await;
        }
        "/search" | "/category" | "/time" | "/fav" => {
            let mut filter = catalog.filter().await;
            match command {
                "/search" => filter.query = arg.to_string(),
                "/category" => filter.category = arg.to_string(),
                "/time" => {
                    filter.max_time = if arg.is_empty() {
                        0
                    } else {
                        arg.parse().map_err(|_| {
                            ChefError::Validation(format!("Invalid time limit: {}", arg))
                        })?
                    }
                }
                _ => filter.favorite = arg.parse()?,
            }
            catalog.set_filter(filter).await;
            print_catalog(catalog).await;
        }
        "/reset" => {
            catalog.set_filter(FilterState::default()).await;
            print_catalog(catalog).await;
        }
        "/add" => {
            let recipe = assistant.add_manual_recipe(&parse_manual_form(arg)).await?;
            println!("{}", CONFIRMATION);
            print_recipe(&recipe);
        }
        "/edit" => {
            let (id, patch) = parse_edit(arg)?;
            catalog.edit(id, patch).await?;
        }
        "/import" => {
            let drafts = parse_recipe_batch(&std::fs::read_to_string(arg)?)?;
            let created = import_recipes(store, drafts).await?;
            println!("Импортировано рецептов: {}", created);
        }
        "/key" => {
            let (name, value) = arg.split_once(' ').unwrap_or((arg, ""));
            let key = parse_key_name(name)?;
            if value.trim().is_empty() {
                delete_api_key(key)?;
                println!("Ключ удалён");
            } else {
                save_api_key(key, value.trim())?;
                println!("Ключ сохранён, он будет использован после перезапуска");
            }
        }
        "/star" => catalog.toggle_favorite(parse_id(arg)?).await?,
        "/delete" => catalog.delete(parse_id(arg)?).await?,
        _ if command.starts_with('/') => {
            println!("Commands: /build /voice <file> /add <title|category|time|servings|ingredients|steps|notes> /edit <id> field=value|... /import <file> /list /search <q> /category <c> /time <min> /fav all|only|exclude /reset /star <id> /delete <id> /key anon|openai [value] /quit");
        }
        _ => {
            if let Some(reply) = assistant.send_text(line).await? {
                println!("{}", reply);
            }
        }
    }

    Ok(true)
}

async fn run_async() -> Result<(), ChefError> {
    log::info!("=== Recipe Chef Initialization ===");

    let db = Database::new(get_database_path()?)?;
    log::info!("  - {} recipes stored", db.count_recipes().unwrap_or(0));
    let settings = db.load_settings().with_env_overrides();
    let db = Arc::new(Mutex::new(db));

    let anon_key = resolve_api_key(ApiKey::BackendAnon, "RECIPE_CHEF_ANON_KEY")?;
    let provider_key = resolve_api_key(ApiKey::OpenAi, "OPENAI_API_KEY")?;

    let auth = AuthGate::signed_in(session_from_env()?);

    let chat = build_chat_backend(&settings, &anon_key, &provider_key, &auth)?;
    let transcriber = Arc::new(ProxyTranscriber::new(&settings.api_base_url, anon_key, auth.clone())?);
    let store: Arc<dyn RecipeStore> = Arc::new(SqliteRecipeStore::new(db, auth.clone()));

    let catalog = Arc::new(CatalogViewModel::new(store.clone()));
    let reconciler = spawn_reconciler(catalog.clone(), store.subscribe());
    if let Err(e) = catalog.reload().await {
        println!("Ошибка загрузки рецептов: {}", e);
    }

    let conversation = Conversation::new().with_history_limit(settings.history_limit);
    let assistant = KitchenAssistant::new(conversation, chat, transcriber, store.clone());

    log::info!("=== Recipe Chef Ready ===");

    if let Some(greeting) = assistant.greet() {
        println!("{}", greeting);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match handle_line(&line, &assistant, &catalog, store.as_ref()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                log::error!("Command failed: {}", e);
                println!("❌ Ошибка: {}", e);
            }
        }
    }

    auth.sign_out();
    reconciler.abort();
    Ok(())
}

pub fn run() -> Result<(), ChefError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_async())
}
