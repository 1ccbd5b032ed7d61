//! Script generation from a topic.
//!
//! Generated text is untrusted and goes through the parser like any
//! hand-written script.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PodcastError, Result};
use crate::script::WORDS_PER_MINUTE;

/// Overall style of a generated episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Casual,
    Educational,
    Entertaining,
}

impl Tone {
    pub const ALL: [Tone; 4] = [
        Tone::Professional,
        Tone::Casual,
        Tone::Educational,
        Tone::Entertaining,
    ];

    fn style(&self) -> &'static str {
        match self {
            Tone::Professional => "professional interview style with expert analysis",
            Tone::Casual => "casual, friendly conversation between friends",
            Tone::Educational => "educational lecture format with clear explanations",
            Tone::Entertaining => "entertaining and engaging debate or discussion",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            Tone::Professional => PROFESSIONAL_TEMPLATE,
            Tone::Casual => CASUAL_TEMPLATE,
            Tone::Educational => EDUCATIONAL_TEMPLATE,
            Tone::Entertaining => ENTERTAINING_TEMPLATE,
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tone::Professional => "professional",
            Tone::Casual => "casual",
            Tone::Educational => "educational",
            Tone::Entertaining => "entertaining",
        };
        f.write_str(name)
    }
}

impl FromStr for Tone {
    type Err = PodcastError;

    fn from_str(s: &str) -> Result<Self> {
        Tone::ALL
            .into_iter()
            .find(|t| t.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                PodcastError::ScriptGeneration(format!(
                    "unknown tone '{s}', expected professional, casual, educational or entertaining"
                ))
            })
    }
}

/// What the generated episode should cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRequirements {
    pub topic: String,
    pub duration_minutes: u32,
    pub tone: Tone,
    pub key_points: Vec<String>,
    /// Target locale, e.g. `en-US`.
    pub language: String,
}

impl ScriptRequirements {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            duration_minutes: 5,
            tone: Tone::default(),
            key_points: Vec::new(),
            language: "en-US".to_string(),
        }
    }

    pub fn target_words(&self) -> u32 {
        (f64::from(self.duration_minutes) * WORDS_PER_MINUTE) as u32
    }

    /// Prompt for a chat-completion model.
    pub fn prompt(&self) -> String {
        let key_points = if self.key_points.is_empty() {
            String::new()
        } else {
            format!("\n- Cover these key points: {}", self.key_points.join(", "))
        };
        let language = if self.language == "en-US" {
            String::new()
        } else {
            format!(
                "\n- Generate the script in {} language",
                language_name(&self.language)
            )
        };

        format!(
            "Generate a podcast script about: {topic}

Requirements:
- Style: {style}
- Target length: approximately {words} words (for {minutes} minutes at 150 words/minute)
- Format: Use [SPEAKER|emotion] before each line{key_points}{language}

Available speakers: HOST, GUEST, CO-HOST, NARRATOR
Available emotions: enthusiastic, calm, questioning, explaining, excited, thoughtful, serious, grateful, intrigued, amazed, greeting, closing, warm, optimistic, storytelling

Format example:
[HOST|enthusiastic] Welcome to our podcast! Today we're exploring {topic}.
[GUEST|calm] Thanks for having me. I'm excited to discuss this topic.
[HOST|questioning] Let's start with the basics...

Rules:
- Put each line of dialogue on its own line, starting with its [SPEAKER|emotion] tag
- Do not mention voice models, prosody or any other technical detail in the dialogue
- Plain text only, no markdown
- Use varied emotions and end with a proper closing
- Keep each line under 400 words

Output only the script.",
            topic = self.topic,
            style = self.tone.style(),
            words = self.target_words(),
            minutes = self.duration_minutes,
        )
    }
}

fn language_name(locale: &str) -> &'static str {
    match locale {
        "es-ES" => "Spanish",
        "fr-FR" => "French",
        "de-DE" => "German",
        "it-IT" => "Italian",
        "pt-BR" => "Portuguese",
        "hi-IN" => "Hindi",
        "zh-CN" => "Chinese",
        "ja-JP" => "Japanese",
        "ko-KR" => "Korean",
        "ar-SA" => "Arabic",
        "ru-RU" => "Russian",
        "ta-IN" => "Tamil",
        "te-IN" => "Telugu",
        "ml-IN" => "Malayalam",
        "bn-IN" => "Bengali",
        _ => "English",
    }
}

/// Produces raw script text for a topic.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, requirements: &ScriptRequirements) -> Result<String>;
}

/// Offline generator using a fixed template per tone.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateScriptGenerator;

impl TemplateScriptGenerator {
    pub fn render(&self, requirements: &ScriptRequirements) -> String {
        requirements
            .tone
            .template()
            .replace("{topic}", requirements.topic.trim())
    }
}

#[async_trait]
impl ScriptGenerator for TemplateScriptGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, requirements: &ScriptRequirements) -> Result<String> {
        Ok(self.render(requirements))
    }
}

/// Connection settings for [`ChatScriptGenerator`].
#[derive(Debug, Clone)]
pub struct ChatScriptConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

/// Generator backed by an OpenAI-compatible chat-completion endpoint.
pub struct ChatScriptGenerator {
    client: Client<OpenAIConfig>,
    config: ChatScriptConfig,
}

const MAX_RETRIES: u32 = 3;

const SYSTEM_PROMPT: &str = "You write podcast scripts. Every line you output starts with a \
[SPEAKER|emotion] tag followed by the words that speaker says.";

impl ChatScriptGenerator {
    pub fn new(config: ChatScriptConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                PodcastError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let openai = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(&config.api_base);

        Ok(Self {
            client: Client::with_config(openai).with_http_client(http_client),
            config,
        })
    }

    async fn get_completion(&self, prompt: String) -> Result<String> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: SYSTEM_PROMPT.into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: prompt.into(),
                name: None,
            }),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .max_completion_tokens(self.config.max_tokens)
            .messages(messages)
            .build()?;

        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s
                let delay = std::time::Duration::from_secs(1 << attempt);
                tokio::time::sleep(delay).await;
            }

            match self.client.chat().create(request.clone()).await {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    return Ok(content);
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "chat completion failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map(PodcastError::from).unwrap_or_else(|| {
            PodcastError::ScriptGeneration("Unknown API error after retries".to_string())
        }))
    }
}

#[async_trait]
impl ScriptGenerator for ChatScriptGenerator {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn generate(&self, requirements: &ScriptRequirements) -> Result<String> {
        let response = self.get_completion(requirements.prompt()).await?;
        let script = sanitize_script(&response);
        if script.trim().is_empty() {
            return Err(PodcastError::ScriptGeneration(
                "model returned an empty script".to_string(),
            ));
        }
        tracing::info!(
            model = %self.config.model,
            chars = script.len(),
            "generated script"
        );
        Ok(script)
    }
}

/// Tries `primary` and falls back to the template generator on failure.
pub struct FallbackScriptGenerator<G> {
    primary: G,
    fallback: TemplateScriptGenerator,
}

impl<G: ScriptGenerator> FallbackScriptGenerator<G> {
    pub fn new(primary: G) -> Self {
        Self {
            primary,
            fallback: TemplateScriptGenerator,
        }
    }
}

#[async_trait]
impl<G: ScriptGenerator> ScriptGenerator for FallbackScriptGenerator<G> {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    async fn generate(&self, requirements: &ScriptRequirements) -> Result<String> {
        match self.primary.generate(requirements).await {
            Ok(script) => Ok(script),
            Err(e) => {
                tracing::warn!(
                    generator = self.primary.name(),
                    error = %e,
                    "script generation failed, falling back to template"
                );
                self.fallback.generate(requirements).await
            }
        }
    }
}

static REASONING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:think|thinking|reasoning|reflection|analysis|plan)\b[^>]*>.*?</(?:think|thinking|reasoning|reflection|analysis|plan)>")
        .expect("valid regex")
});

/// Strip model artefacts from a completion while keeping its line structure.
fn sanitize_script(response: &str) -> String {
    let stripped = REASONING_BLOCK.replace_all(response, "");

    let lines: Vec<&str> = stripped
        .lines()
        .map(|line| line.trim().trim_matches('*').trim())
        .filter(|line| !line.starts_with("```"))
        .collect();
    let script = lines.join("\n").replace("**", "");
    let script = script.trim();

    if script.contains('[') && script.contains('|') {
        script.to_string()
    } else if script.is_empty() {
        String::new()
    } else {
        tracing::warn!("completion has no speaker tags, attributing it to HOST");
        format!("[HOST|enthusiastic] {}", script.replace('\n', " "))
    }
}

const PROFESSIONAL_TEMPLATE: &str = "\
[HOST|greeting] Welcome to our podcast. Today, we're exploring {topic}.

[HOST|calm] I'm joined by our expert guest to discuss this fascinating subject.

[GUEST|greeting] Thank you for having me. I'm excited to share insights about {topic}.

[HOST|questioning] Let's start with the fundamentals. What exactly is {topic}?

[GUEST|explaining] {topic} is a complex and evolving field that encompasses multiple dimensions. At its core, it represents a significant area of innovation and development.

[HOST|intrigued] That's a great foundation. Can you provide a concrete example?

[GUEST|storytelling] Absolutely. Consider how {topic} impacts our daily lives through various applications and use cases.

[HOST|thoughtful] I see. What are the key challenges or considerations people should be aware of?

[GUEST|serious] There are several important factors. First, we need to consider the technical aspects. Second, the practical implications. And third, the broader societal impact.

[HOST|questioning] What does the future hold for {topic}?

[GUEST|optimistic] The future is incredibly promising. We're seeing rapid advancement and innovation across multiple fronts.

[HOST|grateful] This has been incredibly insightful. Thank you for sharing your expertise.

[GUEST|warm] My pleasure. Thank you for the thoughtful discussion.

[HOST|closing] That's all for today. Join us next time for more fascinating conversations.";

const CASUAL_TEMPLATE: &str = "\
[HOST|enthusiastic] Hey everyone! Welcome back to the show. Today we're talking about {topic}.

[CO-HOST|excited] Oh man, I've been looking forward to this one!

[HOST|questioning] So what got you interested in {topic}?

[CO-HOST|storytelling] Funny story actually. I stumbled upon it while reading late one night.

[HOST|intrigued] No way! That's amazing.

[CO-HOST|explaining] Right? So basically, {topic} touches far more of our lives than most people realize.

[HOST|amazed] Wow, I had no idea it was that deep.

[CO-HOST|calm] Yeah, there's a lot more to it than people think.

[HOST|questioning] What's the coolest thing about {topic}?

[CO-HOST|excited] Oh, definitely how it connects to everyday life!

[HOST|grateful] Thanks for breaking that down! Super helpful.

[CO-HOST|warm] Anytime! This was fun.

[HOST|closing] Alright folks, that's it for today. Catch you next time!";

const EDUCATIONAL_TEMPLATE: &str = "\
[NARRATOR|calm] Welcome to our educational series. Today's topic: {topic}.

[NARRATOR|explaining] To understand {topic}, we must first establish the foundational concepts.

[NARRATOR|thoughtful] Let's begin with a definition and the questions it helps us answer.

[NARRATOR|explaining] Now, consider the key components, how they fit together, and where they come from.

[NARRATOR|storytelling] To illustrate this, picture a real-world situation where {topic} makes a difference.

[NARRATOR|serious] It's important to note the implications and limitations.

[NARRATOR|optimistic] However, the potential applications are extensive.

[NARRATOR|explaining] In summary, {topic} represents a significant area of study with far-reaching consequences.

[NARRATOR|closing] Thank you for learning with us today. Until next time.";

const ENTERTAINING_TEMPLATE: &str = "\
[HOST|excited] Alright, buckle up folks! Today we're diving into the wild world of {topic}!

[HOST|storytelling] Picture this: You're sitting there, minding your own business, when suddenly everything changes.

[GUEST|amazed] Wait, seriously? That's crazy!

[HOST|enthusiastic] I know, right? But here's where it gets even better.

[GUEST|intrigued] Tell me more!

[HOST|explaining] So {topic} is basically like two old friends meeting by surprise at a party.

[GUEST|excited] Ha! That's the perfect analogy.

[HOST|questioning] But seriously, what makes {topic} so special?

[GUEST|thoughtful] Well, beyond the entertainment value, there's actually some deep stuff here.

[HOST|amazed] Whoa, mind blown.

[GUEST|warm] That's what makes it so fascinating.

[HOST|grateful] This was awesome! Thanks for the chat.

[GUEST|enthusiastic] Anytime! This was a blast.

[HOST|closing] And that's a wrap! See you next time, folks!";
