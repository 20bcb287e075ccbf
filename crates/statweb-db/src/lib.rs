//! Statweb DB - PostgreSQL ledger for harvest objects
//!
//! This crate keeps the intermediate records of the harvest pipeline
//! between the gather, fetch and import stages.
//!
//! # Overview
//!
//! The main components are:
//! - [`ObjectRepository`] - `HarvestLedger` implementation over the `harvest_objects` table
//! - [`MIGRATIONS`] - schema statements, applied by [`ObjectRepository::migrate`]

mod object_repository;

pub use object_repository::{MIGRATIONS, ObjectRepository};
