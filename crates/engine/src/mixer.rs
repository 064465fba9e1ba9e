//! Response mixing — the last stop before an assistant message is persisted.
//!
//! The mixer composes the final content from the raw model output, appends
//! tool citations when the tool loop ran, applies decorator plugins
//! (no-ops unless registered), and enforces a hard length cap.

use prism_core::message::meta;

/// Hard cap on assistant message length, in characters.
pub const DEFAULT_MAX_LENGTH: usize = 4000;

/// A pluggable post-processing step applied to the final content.
pub trait ResponseDecorator: Send + Sync {
    fn id(&self) -> &str;

    /// Transform the content. Metadata carries hints like the target
    /// emotion; decorators must be total (never fail).
    fn decorate(
        &self,
        content: String,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> String;
}

/// Appends a light tone marker matching the requested emotion.
pub struct EmotionDecorator;

impl ResponseDecorator for EmotionDecorator {
    fn id(&self) -> &str {
        "emotion"
    }

    fn decorate(
        &self,
        content: String,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> String {
        let marker = match metadata.get(meta::EMOTION).and_then(|v| v.as_str()) {
            Some("happy") => " 😊",
            Some("sad") => " 😔",
            Some("excited") => " 🎉",
            _ => return content,
        };
        format!("{content}{marker}")
    }
}

pub struct ResponseMixer {
    decorators: Vec<Box<dyn ResponseDecorator>>,
    max_length: usize,
}

impl ResponseMixer {
    /// A mixer with the emotion decorator and the default length cap.
    pub fn new() -> Self {
        Self {
            decorators: vec![Box::new(EmotionDecorator)],
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn register(&mut self, decorator: Box<dyn ResponseDecorator>) {
        self.decorators.push(decorator);
    }

    /// Compose the final assistant content.
    pub fn mix(
        &self,
        raw: &str,
        tools_used: &[String],
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> String {
        let mut content = raw.trim().to_string();

        if !tools_used.is_empty() {
            content.push_str(&format!("\n\n(via {})", tools_used.join(", ")));
        }

        for decorator in &self.decorators {
            content = decorator.decorate(content, metadata);
        }

        if content.chars().count() > self.max_length {
            content = content.chars().take(self.max_length - 1).collect();
            content.push('…');
        }
        content
    }
}

impl Default for ResponseMixer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with_emotion(emotion: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("emotion".into(), serde_json::json!(emotion));
        map
    }

    #[test]
    fn plain_mix_trims() {
        let mixer = ResponseMixer::new();
        let out = mixer.mix("  hello there  ", &[], &serde_json::Map::new());
        assert_eq!(out, "hello there");
    }

    #[test]
    fn tool_citation_appended() {
        let mixer = ResponseMixer::new();
        let out = mixer.mix(
            "It will rain.",
            &["weather".to_string()],
            &serde_json::Map::new(),
        );
        assert_eq!(out, "It will rain.\n\n(via weather)");
    }

    #[test]
    fn emotion_decoration_applies() {
        let mixer = ResponseMixer::new();
        let out = mixer.mix("Good news!", &[], &meta_with_emotion("happy"));
        assert!(out.ends_with('😊'));

        let untouched = mixer.mix("Good news!", &[], &meta_with_emotion("neutral"));
        assert_eq!(untouched, "Good news!");
    }

    #[test]
    fn length_cap_enforced() {
        let mixer = ResponseMixer::new().with_max_length(10);
        let out = mixer.mix(&"a".repeat(50), &[], &serde_json::Map::new());
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn custom_decorator_runs() {
        struct Upper;
        impl ResponseDecorator for Upper {
            fn id(&self) -> &str {
                "upper"
            }
            fn decorate(
                &self,
                content: String,
                _metadata: &serde_json::Map<String, serde_json::Value>,
            ) -> String {
                content.to_uppercase()
            }
        }
        let mut mixer = ResponseMixer::new();
        mixer.register(Box::new(Upper));
        assert_eq!(mixer.mix("hi", &[], &serde_json::Map::new()), "HI");
    }
}
