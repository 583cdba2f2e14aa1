//! Pipeline stages for notes-to-LaTeX normalization.
//!
//! Each submodule implements exactly one step; no stage holds state between
//! runs.
//!
//! ## Data Flow
//!
//! ```text
//!                                     ┌──▶ score ────┐
//! raw ──▶ parse ──▶ normalize ──▶ render              ├──▶ decide
//!                                     └──▶ validate ─┘
//! ```
//!
//! 1. [`sanitize`]: line-ending, invisible-character and fence cleanup
//! 2. [`parse`]: recognise the output shape, build the node sequence
//! 3. [`normalize`]: ordered rule table, token gate after every rule
//! 4. [`render`]: nodes to LaTeX body text, environment balance check
//! 5. [`score`]: sentence and character fidelity against the baseline
//! 6. [`validate`]: structural checks against the raw parse
//! 7. [`decide`]: verdict and ranked suggestions
//!
//! [`lexicon`] holds the language-keyed trigger and phrase tables shared by
//! the normalizer and the validator.

pub mod decide;
pub mod lexicon;
pub mod normalize;
pub mod parse;
pub mod render;
pub mod sanitize;
pub mod score;
pub mod validate;
