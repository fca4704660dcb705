//! Prompt selection and instantiation.
//!
//! A prompt is chosen in three steps: an explicitly requested template id
//! wins, otherwise the best active stored template for the stage and
//! content type, otherwise built-in prose. The optimization stage also
//! derives a rewrite band from the measured AI probability.

mod catalog;
mod classify;
mod defaults;

pub use catalog::{fill_variables, InstantiatedPrompt, OptimizationRequest, PromptCatalog};
pub use classify::{ClassifierConfig, ContentClassifier, OptimizationBand};
pub use defaults::{
    build_ai_reduction_prompt, build_creation_prompt, build_optimization_prompt,
    build_translation_prompt, level_requirements_text, optimization_objective, role_definition,
};
