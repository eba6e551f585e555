//! Cross-module scene graph tests

mod lifecycle_integration;
