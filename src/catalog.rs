//! Catalog view model
//!
//! Holds the locally cached recipe list, derives the visible set from the
//! current filter, and reconciles with the store by full reloads only.

use crate::error::ChefError;
use crate::recipe::{Recipe, RecipePatch};
use crate::store::{ChangeSubscription, RecipeStore};
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Minutes assumed for a recipe whose time field has no digits
pub const NO_TIME: u64 = 999;

/// Shown when nothing passes the current filter
pub const EMPTY_STATE: &str = "Пока нет рецептов по выбранным фильтрам";

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

/// Cooking time in minutes: the first run of ASCII digits in the free-text field
pub fn recipe_minutes(time: &str) -> u64 {
    match DIGIT_RUN.find(time) {
        Some(m) => m.as_str().parse().unwrap_or(u64::MAX),
        None => NO_TIME,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FavoriteFilter {
    #[default]
    All,
    Only,
    Exclude,
}

impl FavoriteFilter {
    fn matches(self, is_favorite: bool) -> bool {
        match self {
            FavoriteFilter::All => true,
            FavoriteFilter::Only => is_favorite,
            FavoriteFilter::Exclude => !is_favorite,
        }
    }
}

impl FromStr for FavoriteFilter {
    type Err = ChefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(FavoriteFilter::All),
            "only" => Ok(FavoriteFilter::Only),
            "exclude" => Ok(FavoriteFilter::Exclude),
            other => Err(ChefError::Validation(format!(
                "Invalid favorite filter: {}. Must be one of: all, only, exclude",
                other
            ))),
        }
    }
}

/// Ephemeral catalog filter; the default matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub query: String,
    /// Empty matches every category
    pub category: String,
    /// Maximum minutes, 0 = no limit
    pub max_time: u64,
    pub favorite: FavoriteFilter,
}

impl FilterState {
    pub fn matches(&self, recipe: &Recipe) -> bool {
        let query = self.query.to_lowercase();
        let in_query = query.is_empty()
            || recipe.title.to_lowercase().contains(&query)
            || recipe.ingredients.to_lowercase().contains(&query);

        let in_category = self.category.is_empty() || recipe.category == self.category;

        let in_time = self.max_time == 0 || recipe_minutes(&recipe.time) <= self.max_time;

        in_query && in_category && in_time && self.favorite.matches(recipe.is_favorite)
    }
}

/// Recipes passing every predicate, in cache order
pub fn apply_filter(recipes: &[Recipe], filter: &FilterState) -> Vec<Recipe> {
    recipes.iter().filter(|r| filter.matches(r)).cloned().collect()
}

#[derive(Debug, Default)]
struct CatalogState {
    cache: Vec<Recipe>,
    filter: FilterState,
    visible: Vec<Recipe>,
    /// Sequence number of the reload whose snapshot is in `cache`
    applied_seq: u64,
}

impl CatalogState {
    fn recompute(&mut self) {
        self.visible = apply_filter(&self.cache, &self.filter);
    }
}

pub struct CatalogViewModel {
    store: Arc<dyn RecipeStore>,
    state: RwLock<CatalogState>,
    next_seq: AtomicU64,
}

impl CatalogViewModel {
    pub fn new(store: Arc<dyn RecipeStore>) -> Self {
        Self {
            store,
            state: RwLock::new(CatalogState::default()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Replace the cache with a fresh snapshot from the store
    ///
    /// Safe to run concurrently: a snapshot requested earlier never replaces
    /// one requested later. On failure the previous cache is kept.
    pub async fn reload(&self) -> Result<(), ChefError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let recipes = match self.store.list().await {
            Ok(recipes) => recipes,
            Err(e) => {
                log::error!("Error loading recipes: {}", e);
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        if seq < state.applied_seq {
            log::debug!("Discarding stale catalog snapshot #{} (have #{})", seq, state.applied_seq);
            return Ok(());
        }

        state.cache = recipes;
        state.applied_seq = seq;
        state.recompute();

        log::info!(
            "Catalog reloaded: {} recipes, {} visible",
            state.cache.len(),
            state.visible.len()
        );

        Ok(())
    }

    pub async fn set_filter(&self, filter: FilterState) {
        let mut state = self.state.write().await;
        state.filter = filter;
        state.recompute();
    }

    pub async fn filter(&self) -> FilterState {
        self.state.read().await.filter.clone()
    }

    pub async fn visible(&self) -> Vec<Recipe> {
        self.state.read().await.visible.clone()
    }

    pub async fn cached(&self) -> Vec<Recipe> {
        self.state.read().await.cache.clone()
    }

    pub async fn find(&self, id: i64) -> Option<Recipe> {
        self.state.read().await.cache.iter().find(|r| r.id == id).cloned()
    }

    /// Flip the favorite flag through the store
    ///
    /// The local copy is updated right away; the next reload reconciles it
    /// with whatever the store holds.
    pub async fn toggle_favorite(&self, id: i64) -> Result<(), ChefError> {
        let current = self
            .find(id)
            .await
            .map(|r| r.is_favorite)
            .ok_or_else(|| ChefError::Store(format!("Recipe {} not found", id)))?;

        log::info!("Setting favorite on recipe {} to {}", id, !current);
        self.store.set_favorite(id, !current).await?;

        let mut state = self.state.write().await;
        if let Some(recipe) = state.cache.iter_mut().find(|r| r.id == id) {
            recipe.is_favorite = !current;
        }
        state.recompute();

        Ok(())
    }

    pub async fn edit(&self, id: i64, patch: RecipePatch) -> Result<(), ChefError> {
        self.store.update(id, patch).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ChefError> {
        self.store.delete(id).await
    }
}

/// Reload the catalog on every change notification until the feed closes
pub fn spawn_reconciler(
    catalog: Arc<CatalogViewModel>,
    mut subscription: ChangeSubscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::info!("Catalog reconciler started");

        while let Some(event) = subscription.recv().await {
            log::debug!("Change notification: {:?}", event);
            if let Err(e) = catalog.reload().await {
                log::warn!("Reconciling reload failed, keeping previous catalog: {}", e);
            }
        }

        log::info!("Change feed closed, catalog reconciler stopped");
    })
}
