//! Per-language-pair translation routing with passthrough fallback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::MachineTranslator;
use crate::error::Result;

/// Dispatches each request to the translator registered for its
/// `(source, target)` pair.
///
/// Unregistered pairs, and requests whose source equals the target, return the
/// input text unchanged. The router itself never fails; errors only come from
/// a registered backend.
#[derive(Default, Clone)]
pub struct TranslationRouter {
    routes: HashMap<(String, String), Arc<dyn MachineTranslator>>,
}

impl TranslationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` for `source → target`, replacing any previous route.
    pub fn with_route(
        mut self,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        backend: Arc<dyn MachineTranslator>,
    ) -> Self {
        self.routes.insert(
            (normalize_tag(&source_lang.into()), normalize_tag(&target_lang.into())),
            backend,
        );
        self
    }

    pub fn supports(&self, source_lang: &str, target_lang: &str) -> bool {
        self.routes
            .contains_key(&(normalize_tag(source_lang), normalize_tag(target_lang)))
    }
}

#[async_trait]
impl MachineTranslator for TranslationRouter {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let key = (normalize_tag(source_lang), normalize_tag(target_lang));
        if key.0 == key.1 {
            return Ok(text.to_string());
        }
        match self.routes.get(&key) {
            Some(backend) => backend.translate(text, source_lang, target_lang).await,
            None => {
                debug!(
                    source_lang,
                    target_lang, "no translator for language pair; passing text through"
                );
                Ok(text.to_string())
            }
        }
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl MachineTranslator for Upper {
        async fn translate(&self, text: &str, _s: &str, _t: &str) -> Result<String> {
            Ok(text.to_uppercase())
        }
    }

    #[tokio::test]
    async fn unconfigured_pair_passes_text_through() {
        let router = TranslationRouter::new();
        let out = router.translate("good morning", "en", "ja").await.unwrap();
        assert_eq!(out, "good morning");
    }

    #[tokio::test]
    async fn configured_pair_uses_backend() {
        let router = TranslationRouter::new().with_route("en", "es", Arc::new(Upper));
        assert!(router.supports("EN", "es"));
        assert_eq!(router.translate("hi", "en", "es").await.unwrap(), "HI");
        assert_eq!(router.translate("hi", "es", "en").await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn same_language_is_identity() {
        let router = TranslationRouter::new().with_route("en", "en", Arc::new(Upper));
        assert_eq!(router.translate("hi", "en", "en").await.unwrap(), "hi");
    }
}
