//! In-process stand-ins for the network and persistence seams

use crate::conversation::Message;
use crate::error::ChefError;
use crate::llm::ChatBackend;
use crate::recipe::{NewRecipe, Recipe, RecipePatch};
use crate::store::{ChangeFeed, ChangeKind, ChangeSubscription, RecipeStore};
use crate::transcription::{AudioClip, Transcriber};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Chat backend answering from a fixed script
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Result<String, ChefError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl ScriptedChat {
    pub fn replying(replies: &[&str]) -> Self {
        let chat = Self::default();
        for reply in replies {
            chat.push(Ok(reply.to_string()));
        }
        chat
    }

    pub fn push(&self, reply: Result<String, ChefError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Vec<Message> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn send(&self, messages: &[Message]) -> Result<String, ChefError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ChefError::Upstream("script exhausted".to_string())))
    }
}

/// Transcriber returning one fixed result
pub struct ScriptedTranscriber {
    text: Mutex<Option<Result<String, ChefError>>>,
}

impl ScriptedTranscriber {
    pub fn new(result: Result<String, ChefError>) -> Self {
        Self {
            text: Mutex::new(Some(result)),
        }
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String, ChefError> {
        self.text
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// In-memory store counting create calls, optionally rejecting them
#[derive(Default)]
pub struct RecordingStore {
    created: Mutex<Vec<Recipe>>,
    reject_with: Option<String>,
    creates: AtomicUsize,
    feed: ChangeFeed,
}

impl RecordingStore {
    pub fn rejecting(message: &str) -> Self {
        Self {
            reject_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<Recipe> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecipeStore for RecordingStore {
    async fn list(&self) -> Result<Vec<Recipe>, ChefError> {
        let mut recipes = self.created();
        recipes.reverse();
        Ok(recipes)
    }

    async fn create(&self, recipe: NewRecipe) -> Result<Recipe, ChefError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.reject_with {
            return Err(ChefError::Store(message.clone()));
        }

        let recipe = recipe.normalized();
        let mut created = self.created.lock().unwrap();
        let stored = Recipe {
            id: created.len() as i64 + 1,
            owner: "user-1".to_string(),
            title: recipe.title,
            category: recipe.category,
            servings: recipe.servings,
            time: recipe.time,
            ingredients: recipe.ingredients,
            steps: recipe.steps,
            notes: recipe.notes,
            tags: recipe.tags,
            is_favorite: false,
            created_at: Utc::now(),
        };
        created.push(stored.clone());
        self.feed.publish(ChangeKind::Insert, stored.id);
        Ok(stored)
    }

    async fn update(&self, id: i64, _patch: RecipePatch) -> Result<(), ChefError> {
        Err(ChefError::Store(format!("Recipe {} not found", id)))
    }

    async fn delete(&self, id: i64) -> Result<(), ChefError> {
        Err(ChefError::Store(format!("Recipe {} not found", id)))
    }

    fn subscribe(&self) -> ChangeSubscription {
        self.feed.subscribe()
    }
}
