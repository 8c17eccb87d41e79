//! Módulo LLM - Acceso a modelos de lenguaje
//!
//! Proveedores HTTP usados para resumir fragmentos y extraer palabras clave.
//! Cada llamada es una [`CompletionRequest`] con instrucción de sistema y un
//! presupuesto de tokens según la tarea ([`Task::Summary`] o [`Task::Keyword`]).
//!
//! - [`provider::OllamaProvider`] - Modelos locales vía Ollama
//! - [`provider::OpenAIProvider`] - APIs compatibles con OpenAI

pub mod provider;

pub use provider::{
    create_provider, Completion, CompletionRequest, ModelProvider, ProviderError, Task,
};
