//! Prompts sent to the generative model.
//!
//! The user's task is never sent bare. [`build_generation_prompt`] wraps it
//! with the resolved target language, any constraints inferred from the task
//! and the `<CODE>`/`<EXPLANATION>` output contract that normalization parses.
//!
//! # Usage
//!
//! ```
//! use codeforge::prompts::{build_generation_prompt, infer_intent};
//!
//! let intent = infer_intent("find duplicate entries in a list");
//! let prompt = build_generation_prompt("find duplicate entries in a list", "python", &intent.constraints);
//! assert!(prompt.contains("LANGUAGE:\npython"));
//! assert!(prompt.contains("Optimize for O(n) time"));
//! ```

pub mod generation;

pub use generation::{
    build_generation_prompt, infer_intent, TaskIntent, CODE_CLOSE, CODE_OPEN, EXPLANATION_CLOSE,
    EXPLANATION_OPEN,
};
