use crate::conversation::{Conversation, Message, Role, GREETING};
use crate::error::ChefError;
use crate::extraction::finalize_recipe;
use crate::llm::{reply_or_empty, ChatBackend};
use crate::recipe::{ManualRecipeForm, Recipe};
use crate::store::RecipeStore;
use crate::transcription::{AudioClip, Transcriber};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Notice shown when a recording produced no text
pub const NOTHING_RECOGNIZED: &str = "[Пустой результат распознавания]";

/// Result of a voice turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceOutcome {
    /// Silence or noise; nothing was sent to the model
    NothingRecognized,
    Replied { transcript: String, reply: String },
}

/// Session-scoped chat controller
///
/// Owns the conversation for one signed-in client. The conversation lock is
/// held for the whole of each call, so sends, voice turns and builds from the
/// same client run one at a time and never interleave replies.
pub struct KitchenAssistant {
    conversation: Mutex<Conversation>,
    chat: Arc<dyn ChatBackend>,
    transcriber: Arc<dyn Transcriber>,
    store: Arc<dyn RecipeStore>,
    greeted: AtomicBool,
}

impl KitchenAssistant {
    pub fn new(
        conversation: Conversation,
        chat: Arc<dyn ChatBackend>,
        transcriber: Arc<dyn Transcriber>,
        store: Arc<dyn RecipeStore>,
    ) -> Self {
        Self {
            conversation: Mutex::new(conversation),
            chat,
            transcriber,
            store,
            greeted: AtomicBool::new(false),
        }
    }

    /// Greeting text, only on the first call
    pub fn greet(&self) -> Option<&'static str> {
        if self.greeted.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(GREETING)
        }
    }

    /// Send a typed message; blank input sends nothing and returns `None`
    ///
    /// On failure the user turn stays in the log so the user can retry.
    pub async fn send_text(&self, text: &str) -> Result<Option<String>, ChefError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let mut conversation = self.conversation.lock().await;
        self.exchange(&mut conversation, text).await.map(Some)
    }

    /// Transcribe a recording and, if anything was heard, send it as a turn
    pub async fn send_voice(&self, clip: &AudioClip) -> Result<VoiceOutcome, ChefError> {
        let mut conversation = self.conversation.lock().await;

        let transcript = self.transcriber.transcribe(clip).await?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            log::info!("Transcription was empty, nothing sent");
            return Ok(VoiceOutcome::NothingRecognized);
        }

        let reply = self.exchange(&mut conversation, transcript).await?;
        Ok(VoiceOutcome::Replied {
            transcript: transcript.to_string(),
            reply,
        })
    }

    async fn exchange(&self, conversation: &mut Conversation, text: &str) -> Result<String, ChefError> {
        conversation.append(Role::User, text)?;

        let reply = reply_or_empty(self.chat.send(&conversation.snapshot()).await)?;
        if reply.trim().is_empty() {
            log::warn!("Assistant returned an empty reply");
        } else {
            conversation.append(Role::Assistant, reply.clone())?;
        }

        Ok(reply)
    }

    /// Ask for the final recipe and store it
    pub async fn build_recipe(&self) -> Result<Recipe, ChefError> {
        let mut conversation = self.conversation.lock().await;
        finalize_recipe(&mut conversation, self.chat.as_ref(), self.store.as_ref()).await
    }

    pub async fn add_manual_recipe(&self, form: &ManualRecipeForm) -> Result<Recipe, ChefError> {
        let recipe = form.validate()?;
        log::info!("Adding manual recipe '{}'", recipe.title);
        self.store.create(recipe).await
    }

    /// Copy of the current log, system prompt first
    pub async fn transcript(&self) -> Vec<Message> {
        self.conversation.lock().await.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{CONFIRMATION, FINALIZE_INSTRUCTION};
    use crate::testing::{RecordingStore, ScriptedChat, ScriptedTranscriber};
    use crate::transcription::FALLBACK_MIME;

    fn assistant(
        chat: Arc<ScriptedChat>,
        transcriber: ScriptedTranscriber,
        store: Arc<RecordingStore>,
    ) -> KitchenAssistant {
        KitchenAssistant::new(Conversation::new(), chat, Arc::new(transcriber), store)
    }

    fn silent() -> ScriptedTranscriber {
        ScriptedTranscriber::new(Ok(String::new()))
    }

    #[test]
    fn test_greets_once() {
        let a = assistant(Arc::new(ScriptedChat::default()), silent(), Arc::new(RecordingStore::default()));
        assert_eq!(a.greet(), Some(GREETING));
        assert_eq!(a.greet(), None);
    }

    #[tokio::test]
    async fn test_send_text_appends_both_turns() {
        let chat = Arc::new(ScriptedChat::replying(&["Сколько порций?"]));
        let a = assistant(chat.clone(), silent(), Arc::new(RecordingStore::default()));

        let reply = a.send_text("  Хочу сырники ").await.unwrap();
        assert_eq!(reply.as_deref(), Some("Сколько порций?"));

        let log = a.transcript().await;
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].content, "Хочу сырники");
        assert_eq!(log[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_blank_text_sends_nothing() {
        let chat = Arc::new(ScriptedChat::default());
        let a = assistant(chat.clone(), silent(), Arc::new(RecordingStore::default()));

        assert_eq!(a.send_text("   ").await.unwrap(), None);
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_keeps_user_turn() {
        let chat = Arc::new(ScriptedChat::default());
        chat.push(Err(ChefError::Upstream("Chat API failed".to_string())));
        let a = assistant(chat.clone(), silent(), Arc::new(RecordingStore::default()));

        let result = a.send_text("Привет").await;
        assert!(matches!(result, Err(ChefError::Upstream(ref m)) if m == "Chat API failed"));

        let log = a.transcript().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].role, Role::User);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_empty_not_error() {
        let chat = Arc::new(ScriptedChat::default());
        chat.push(Err(ChefError::MalformedResponse("no choices".to_string())));
        let a = assistant(chat, silent(), Arc::new(RecordingStore::default()));

        assert_eq!(a.send_text("Привет").await.unwrap().as_deref(), Some(""));
        assert_eq!(a.transcript().await.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_transcription_sends_nothing() {
        let chat = Arc::new(ScriptedChat::default());
        let a = assistant(chat.clone(), silent(), Arc::new(RecordingStore::default()));

        let outcome = a.send_voice(&AudioClip::new(vec![0; 16], FALLBACK_MIME)).await.unwrap();
        assert_eq!(outcome, VoiceOutcome::NothingRecognized);
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test]
    async fn test_voice_turn_reaches_chat() {
        let chat = Arc::new(ScriptedChat::replying(&["Отличный выбор!"]));
        let transcriber = ScriptedTranscriber::new(Ok("Хочу борщ".to_string()));
        let a = assistant(chat.clone(), transcriber, Arc::new(RecordingStore::default()));

        let outcome = a.send_voice(&AudioClip::new(vec![0; 16], FALLBACK_MIME)).await.unwrap();
        assert_eq!(
            outcome,
            VoiceOutcome::Replied {
                transcript: "Хочу борщ".to_string(),
                reply: "Отличный выбор!".to_string(),
            }
        );
        assert_eq!(chat.last_request()[1].content, "Хочу борщ");
    }

    #[tokio::test]
    async fn test_transcription_failure_propagates() {
        let chat = Arc::new(ScriptedChat::default());
        let transcriber = ScriptedTranscriber::new(Err(ChefError::Upstream("Transcription failed".to_string())));
        let a = assistant(chat.clone(), transcriber, Arc::new(RecordingStore::default()));

        let result = a.send_voice(&AudioClip::new(vec![0; 16], FALLBACK_MIME)).await;
        assert!(matches!(result, Err(ChefError::Upstream(_))));
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test]
    async fn test_build_after_chat() {
        let chat = Arc::new(ScriptedChat::replying(&[
            "Давай сделаем омлет из 2 яиц.",
            r#"{"title":"Омлет","ingredients":["2 яйца"],"steps":["Взбей 2 яйца."]}"#,
        ]));
        let store = Arc::new(RecordingStore::default());
        let a = assistant(chat.clone(), silent(), store.clone());

        a.send_text("Омлет на завтрак").await.unwrap();
        let recipe = a.build_recipe().await.unwrap();

        assert_eq!(recipe.title, "Омлет");
        assert_eq!(store.created().len(), 1);

        let log = a.transcript().await;
        let contents: Vec<&str> = log.iter().skip(1).map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["Омлет на завтрак", "Давай сделаем омлет из 2 яиц.", FINALIZE_INSTRUCTION, CONFIRMATION]
        );
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let chat = Arc::new(ScriptedChat::replying(&["Ответ 1", "Ответ 2"]));
        let a = Arc::new(assistant(chat.clone(), silent(), Arc::new(RecordingStore::default())));

        let (first, second) = tokio::join!(a.send_text("Вопрос 1"), a.send_text("Вопрос 2"));
        assert!(first.is_ok() && second.is_ok());

        let roles: Vec<Role> = a.transcript().await.iter().skip(1).map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_manual_recipe_validation() {
        let store = Arc::new(RecordingStore::default());
        let a = assistant(Arc::new(ScriptedChat::default()), silent(), store.clone());

        let empty = ManualRecipeForm::default();
        assert!(matches!(a.add_manual_recipe(&empty).await, Err(ChefError::Validation(_))));
        assert_eq!(store.create_calls(), 0);

        let form = ManualRecipeForm {
            title: "Чай".to_string(),
            ingredients: "1 пакетик".to_string(),
            steps: "Залей 250 мл кипятка.".to_string(),
            ..ManualRecipeForm::default()
        };
        assert_eq!(a.add_manual_recipe(&form).await.unwrap().title, "Чай");
    }
}
