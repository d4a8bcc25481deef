//! Recipe persistence facade and change feed
//!
//! The catalog and the extraction protocol only talk to [`RecipeStore`];
//! the SQLite implementation lives in `database.rs`.

use crate::error::ChefError;
use crate::recipe::{NewRecipe, Recipe, RecipePatch};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Events a subscriber may fall behind before it lags. Kept a power of two,
/// the broadcast channel rounds any other value up.
const FEED_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Subscriber fell behind; some notifications were collapsed
    Resync,
}

/// "Something changed" notification. Consumers always reload the full list
/// and must not depend on the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub recipe_id: Option<i64>,
}

/// Sender side of the recipe change feed
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        log::debug!("New change feed subscriber");
        ChangeSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn publish(&self, kind: ChangeKind, recipe_id: i64) {
        let event = ChangeEvent {
            kind,
            recipe_id: Some(recipe_id),
        };
        match self.tx.send(event) {
            Ok(n) => log::debug!("Change {:?} on recipe {} sent to {} subscribers", kind, recipe_id, n),
            Err(_) => log::trace!("Change {:?} on recipe {} had no subscribers", kind, recipe_id),
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`RecipeStore::subscribe`]; dropping it unsubscribes
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// Next notification, or `None` once the feed is gone
    ///
    /// Missed notifications are reported as a single `Resync` event.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Change subscriber lagged by {} notifications", skipped);
                Some(ChangeEvent {
                    kind: ChangeKind::Resync,
                    recipe_id: None,
                })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Create/read/update/delete against the persistence backend
///
/// Every operation requires a signed-in session; `create` binds the owner
/// from that session and never from client input. Backend rejections surface
/// as `ChefError::Store` with the backend's message, with no local retry.
#[async_trait]
pub trait RecipeStore: Send + Sync {
    /// Visible recipes, newest first
    async fn list(&self) -> Result<Vec<Recipe>, ChefError>;

    async fn create(&self, recipe: NewRecipe) -> Result<Recipe, ChefError>;

    async fn update(&self, id: i64, patch: RecipePatch) -> Result<(), ChefError>;

    async fn delete(&self, id: i64) -> Result<(), ChefError>;

    async fn set_favorite(&self, id: i64, value: bool) -> Result<(), ChefError> {
        self.update(id, RecipePatch::favorite(value)).await
    }

    fn subscribe(&self) -> ChangeSubscription;
}

/// Create each draft in order, stopping at the first store error
pub async fn import_recipes(
    store: &dyn RecipeStore,
    drafts: Vec<NewRecipe>,
) -> Result<usize, ChefError> {
    let total = drafts.len();
    log::info!("Importing {} recipes", total);

    let mut created = 0;
    for draft in drafts {
        store.create(draft).await?;
        created += 1;
    }

    log::info!("Imported {}/{} recipes", created, total);
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_delivers_to_all_subscribers() {
        let feed = ChangeFeed::new();
        let mut a = feed.subscribe();
        let mut b = feed.subscribe();

        feed.publish(ChangeKind::Insert, 7);

        assert_eq!(a.recv().await.unwrap().recipe_id, Some(7));
        assert_eq!(b.recv().await.unwrap().kind, ChangeKind::Insert);
    }

    #[tokio::test]
    async fn test_lag_collapses_to_resync() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe();

        for id in 0..(FEED_CAPACITY as i64 + 10) {
            feed.publish(ChangeKind::Update, id);
        }

        let first = sub.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Resync);
        assert_eq!(first.recipe_id, None);

        // The subscription keeps working after a resync
        let next = sub.recv().await.unwrap();
        assert_eq!(next.kind, ChangeKind::Update);
    }

    #[tokio::test]
    async fn test_closed_feed_ends_subscription() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe();
        drop(feed);
        assert!(sub.recv().await.is_none());
    }
}
