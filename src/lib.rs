//! Lead Generation Pipeline Library
//!
//! Finds companies matching an Ideal Customer Profile (ICP), enriches them with
//! crawled and searched material, and scores each one with a chain of LLM agents
//! plus deterministic arithmetic.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Detection, enrichment, qualification and scoring.
//! - `data`: Document storage.
//! - `integrations`: Oracle, search, crawl and embedding capabilities.
//! - `agents`: Stage agents over the Oracle.
//! - `cache_validator`: Checksum-validated crawl cache.
//! - `circuit_breaker`: Circuit breakers for the Oracle and the database.
//! - `config`: Configuration management.
//! - `db`: Database connection and schema.
//! - `db_storage`: Document store and typed lead storage.
//! - `detection`: Discovery strategies and lead merging.
//! - `enrichment`: Per-lead report building.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `jobs`: Task queue and pipeline runner.
//! - `json_extract`: JSON extraction from free-form Oracle text.
//! - `models`: Core data models.
//! - `oracle`: LLM providers.
//! - `prompts`: Prompt builders.
//! - `qualification`: Per-lead agent chain.
//! - `retry`: Bounded retry with backoff.
//! - `scoring`: Pure scoring arithmetic.
//! - `services`: Search, crawl and embedding clients.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod agents;
pub mod cache_validator;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod detection;
pub mod enrichment;
pub mod errors;
pub mod handlers;
pub mod jobs;
pub mod json_extract;
pub mod models;
pub mod oracle;
pub mod prompts;
pub mod qualification;
pub mod retry;
pub mod scoring;
pub mod services;
