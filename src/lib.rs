//! OntoTree - Árbol de conocimiento por clustering jerárquico
//!
//! OntoTree agrupa fragmentos de texto de forma iterativa: en cada ronda
//! re-embebe los representantes actuales, decide cuántos clusters formar y
//! añade un nivel al árbol, hasta que queda un único nodo raíz.
//!
//! # Arquitectura
//!
//! - **Tree Builder**: Árbol en arena (vector plano) con procedencia completa de hojas
//! - **Selector**: Colapso por similitud o análisis de codo con votación de estimadores
//! - **Clusterer**: k-means++ con semilla fija, determinista
//! - **Round Driver**: Bucle asíncrono de rondas con límite de seguridad y cancelación
//!
//! # Módulos Principales
//!
//! - [`raptor`] - Motor de clustering y construcción del árbol
//! - [`embedding`] - Embeddings locales con FastEmbed
//! - [`llm`] - Proveedores de modelos para resúmenes y palabras clave
//! - [`config`] - Configuración JSON con overrides por entorno
//!
//! # Ejemplo de Uso
//!
//! ```rust,no_run
//! use ontotree::embedding::EmbeddingEngine;
//! use ontotree::raptor::{EngineConfig, Fragment, RoundDriver};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let embedder = Arc::new(EmbeddingEngine::new().await?);
//! let fragments = vec![
//!     Fragment::new("Ownership moves values between bindings", "ownership"),
//!     Fragment::new("Borrowing lends references without moving", "borrowing"),
//! ];
//!
//! let outcome = RoundDriver::new(embedder, &EngineConfig::default())
//!     .build(&fragments)
//!     .await?;
//! println!("{} nodes, {}", outcome.snapshot.len(), outcome.termination);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod llm;
pub mod logging;

// Clustering engine & tree builder
pub mod raptor;

pub use embedding::{Embedder, EmbeddingEngine};
pub use raptor::builder::{BuildOutcome, RoundDriver, Termination};
pub use raptor::tree::{ClusteringTree, Fragment, TreeNode, TreeSnapshot};
