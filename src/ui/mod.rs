//! UI components for Cosmic Docs

pub mod auth;
pub mod document_list;
pub mod editor;
