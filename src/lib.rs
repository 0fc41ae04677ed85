// src/lib.rs
// Core of an embeddable chat widget for a retrieval-augmented backend

pub mod citations;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod render;
pub mod session;
pub mod stream;
pub mod surface;
pub mod terminal;
pub mod visitor;
pub mod widget;

pub use config::WidgetConfig;
pub use error::{Result, SendRejected, WidgetError};
pub use render::{CmarkRenderer, MarkdownRenderer};
pub use surface::{ChatSurface, RenderedMessage};
pub use widget::ChatWidget;
