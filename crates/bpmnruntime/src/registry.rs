use bpmncore::ExpressionEvaluator;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of expression evaluators, keyed by language (case-insensitive)
#[derive(Clone)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<String, Arc<dyn ExpressionEvaluator>>,
    languages: Vec<String>,
    condition_language: Option<String>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self {
            evaluators: HashMap::new(),
            languages: Vec::new(),
            condition_language: None,
        }
    }

    /// Register an evaluator under its language and aliases.
    ///
    /// The first evaluator registered also evaluates flow conditions unless
    /// [`set_condition_language`](Self::set_condition_language) says otherwise.
    pub fn register(&mut self, evaluator: Arc<dyn ExpressionEvaluator>) {
        let language = evaluator.language().to_ascii_lowercase();
        tracing::info!("Registering evaluator: {}", language);

        for alias in evaluator.aliases() {
            self.evaluators
                .insert(alias.to_ascii_lowercase(), Arc::clone(&evaluator));
        }
        if self.condition_language.is_none() {
            self.condition_language = Some(language.clone());
        }
        if !self.languages.contains(&language) {
            self.languages.push(language.clone());
        }
        self.evaluators.insert(language, evaluator);
    }

    pub fn set_condition_language(&mut self, language: impl Into<String>) {
        self.condition_language = Some(language.into().to_ascii_lowercase());
    }

    /// Look an evaluator up by language or alias.
    pub fn get(&self, language: &str) -> Option<Arc<dyn ExpressionEvaluator>> {
        self.evaluators.get(&language.to_ascii_lowercase()).cloned()
    }

    /// Evaluator used for sequence flow conditions.
    pub fn condition_evaluator(&self) -> Option<Arc<dyn ExpressionEvaluator>> {
        self.condition_language
            .as_deref()
            .and_then(|language| self.get(language))
    }

    /// Registered primary language names, in registration order.
    pub fn list_languages(&self) -> Vec<String> {
        self.languages.clone()
    }

    /// Every name (language or alias) that resolves to `language`'s evaluator.
    pub fn names_for(&self, language: &str) -> Vec<String> {
        let Some(target) = self.get(language) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .evaluators
            .iter()
            .filter(|(_, e)| Arc::ptr_eq(e, &target))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
