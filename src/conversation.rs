//! Conversation state for the cooking assistant
//!
//! An append-only log of chat turns. The fixed system prompt is always the
//! first message sent and is never mutated or removed.

use crate::error::ChefError;
use serde::{Deserialize, Serialize};

/// Cooking-assistant persona sent as the first message of every request
pub const SYSTEM_PROMPT: &str = "Ты — талантливый шеф-повар, который пишет рецепты для НОВИЧКОВ на кухне.

🎯 ГЛАВНОЕ ПРАВИЛО: В каждом шаге рецепта указывай ТОЧНЫЕ количества продуктов.

ПРАВИЛЬНО: \"Взбей 3 яйца со 180 г сахара и 2 г ванильного сахара до пышности.\"
НЕПРАВИЛЬНО: \"Взбей яйца с сахаром и ванильным сахаром до пышности.\"

ПРАВИЛЬНО: \"Добавь 200 мл молока и 50 г растопленного сливочного масла.\"
НЕПРАВИЛЬНО: \"Добавь молоко и масло.\"

📝 Формат рецепта:
- Каждый шаг — отдельное действие с конкретными количествами
- Указывай температуру духовки, время готовки, размер формы
- Описывай консистенцию (\"до густоты сметаны\", \"до золотистой корочки\")
- Предупреждай о важных моментах (\"не перемешивай слишком долго\", \"следи, чтобы не подгорело\")

🎨 Стиль общения:
- Дружелюбный, но чёткий
- Короткие предложения
- Можно лёгкие смайлы 😋🔥

📏 Единицы измерения:
- Только метрическая система (г, кг, мл, л, °C)
- Порции: 2—6 по умолчанию
- Время: всегда указывай точно (не \"около\", а \"25-30 минут\")

💡 Стратегия:
- Сначала уточни важные детали (аллергии, оборудование)
- Предлагай варианты (быстрее/дешевле/полезнее)
- Объясняй \"почему\" (почему нужно охладить тесто, зачем просеивать муку)

Язык: русский
Безопасность: только проверенные техники готовки";

/// Shown once per login session; not part of the model context
pub const GREETING: &str =
    "Привет! Я ваш шеф-повар 🤖 Надиктуйте или напишите, а я помогу собрать рецепт и подскажу фишки.";

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Chat message in OpenAI format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered message log owned by one signed-in client
#[derive(Debug, Clone)]
pub struct Conversation {
    system: Message,
    turns: Vec<Message>,
    /// When set, only the newest `n` turns are sent (system prompt always kept)
    history_limit: Option<usize>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            system: Message::new(Role::System, SYSTEM_PROMPT),
            turns: Vec::new(),
            history_limit: None,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = if limit == 0 { None } else { Some(limit) };
        self
    }

    /// Append a user or assistant turn
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> Result<(), ChefError> {
        let content = content.into();

        if role == Role::System {
            return Err(ChefError::Validation(
                "The system prompt is fixed and cannot be appended".to_string(),
            ));
        }

        if content.trim().is_empty() {
            return Err(ChefError::Validation(format!(
                "Empty {} message",
                role.as_str()
            )));
        }

        log::debug!("Conversation append: {} ({} chars)", role.as_str(), content.len());
        self.turns.push(Message { role, content });
        Ok(())
    }

    /// Full ordered log to send to the chat backend
    pub fn snapshot(&self) -> Vec<Message> {
        let start = match self.history_limit {
            Some(limit) => self.turns.len().saturating_sub(limit),
            None => 0,
        };

        let mut messages = Vec::with_capacity(self.turns.len() - start + 1);
        messages.push(self.system.clone());
        messages.extend_from_slice(&self.turns[start..]);
        messages
    }

    /// Turns after the system prompt, in order
    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.turns.iter().rev().find(|m| m.role == Role::Assistant)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
